//! # Stage Transitions
//!
//! Everything that happens between a card being dropped on a column and the
//! move being committed or rolled back.
//!
//! ## Architecture
//!
//! ```text
//! BoardController
//!       ↓
//! TransitionOrchestrator ── TransitionValidator (pure)
//!       ├── LocalLeads / OptimisticMove (board state, pending marks)
//!       ├── StageEntityGateway (remote create / update)
//!       ├── StageCache (lead → entity ids)
//!       └── broadcast<TransitionEvent>
//! ```

pub mod error;
pub mod events;
pub mod local;
pub mod machine;
pub mod orchestrator;

pub use error::TransitionError;
pub use events::{TransitionEvent, TransitionEventKind};
pub use local::{LocalLeads, OptimisticMove, PendingGuard};
pub use machine::{CommitPlan, EntityOperation, IllegalPhaseChange, TransitionMachine, TransitionPhase};
pub use orchestrator::{CommittedTransition, TransitionOrchestrator, TransitionSettings};
