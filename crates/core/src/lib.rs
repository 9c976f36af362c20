//! # Leadflow Core
//!
//! Pipeline stage transition engine. Moves a sales lead through a fixed
//! sequence of stages, each of which owns a separate backend record, and
//! keeps a durable local map from lead to those records.
//!
//! ## Architecture
//!
//! - `lead` - Lead record, addressable fields and stage links
//! - `stages/` - Stage registry and the pure transition validator
//! - `gateway/` - Remote CRUD over the stage entity collections
//! - `state/` - SQLite database and the stage cache
//! - `transition/` - Orchestrator, phase machine and board events
//! - `board` - Drag/drop glue and field prompts for a kanban view
//! - `config` - Persisted engine configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use leadflow_core::gateway::{HttpStageGateway, StaticCredentials};
//! use leadflow_core::state::{LeadflowDb, StageCache};
//! use leadflow_core::transition::TransitionOrchestrator;
//!
//! let config = EngineConfig::load().await?;
//! let db = LeadflowDb::open_at(config.db_path())?;
//! let gateway = HttpStageGateway::new(&config.api_base_url, credentials, config.gateway_timeout())?;
//! let orchestrator = TransitionOrchestrator::new(Arc::new(gateway), StageCache::new(&db), config.transition_settings());
//! orchestrator.move_lead("L-42", Stage::Opportunity, None).await?;
//! ```

pub mod board;
pub mod config;
pub mod gateway;
pub mod lead;
pub mod stages;
pub mod state;
pub mod transition;

pub use board::{BoardCard, BoardColumn, BoardController, CardBadge, DropOutcome, FieldPrompt};
pub use config::EngineConfig;
pub use lead::{ExtraFields, Lead, LeadField, StageLinks};
pub use stages::{EntityKind, Stage, StageRegistry, ValidationResult};
pub use transition::{CommittedTransition, TransitionError, TransitionOrchestrator};
