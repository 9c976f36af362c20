pub mod db;
pub mod io;
pub mod stage_cache;

pub use db::LeadflowDb;
pub use stage_cache::{StageCache, StageCacheEntry};
