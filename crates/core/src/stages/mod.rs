//! # Pipeline Stages
//!
//! ```text
//! lead → opportunity → quotation_received → quotation_shared → negotiation_started → po_received
//! ```

pub mod registry;
pub mod validator;

pub use registry::{EntityKind, Stage, StageDefinition, StageRegistry, UnknownStage};
pub use validator::{validate, BlockingDependency, TransitionValidator, ValidationResult};
