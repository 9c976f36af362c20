//! Errors surfaced by a stage move

use thiserror::Error;

use super::machine::{EntityOperation, IllegalPhaseChange};
use crate::gateway::GatewayError;
use crate::lead::{FieldError, LeadField};
use crate::stages::{BlockingDependency, EntityKind, Stage};

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("lead {0} is not on the board")]
    UnknownLead(String),

    /// A previous move for this lead has not settled
    #[error("lead {0} has a stage move in flight")]
    LeadBusy(String),

    #[error(transparent)]
    InvalidField(#[from] FieldError),

    /// Recoverable: collect the fields and re-issue the move
    #[error("missing required fields for {stage}: {}", join_fields(.fields))]
    MissingFields {
        lead_id: String,
        stage: Stage,
        fields: Vec<LeadField>,
    },

    /// Recoverable only by completing the predecessor stage
    #[error("{0}")]
    BlockedDependency(BlockingDependency),

    #[error("{operation} of {kind} failed: {source}")]
    Gateway {
        kind: EntityKind,
        operation: EntityOperation,
        #[source]
        source: GatewayError,
    },

    /// The remote mutation succeeded but the cache could not record it
    #[error("stage cache write failed for lead {lead_id} after remote {}: {reason}", describe_entity(.kind, .entity_id))]
    CacheWriteFailed {
        lead_id: String,
        kind: Option<EntityKind>,
        entity_id: Option<String>,
        reason: String,
    },

    #[error("stage cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error(transparent)]
    Machine(#[from] IllegalPhaseChange),

    /// The task running the move panicked or was cancelled
    #[error("stage move for lead {lead_id} aborted: {reason}")]
    Aborted { lead_id: String, reason: String },
}

fn join_fields(fields: &[LeadField]) -> String {
    fields
        .iter()
        .map(LeadField::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_entity(kind: &Option<EntityKind>, id: &Option<String>) -> String {
    match (kind, id) {
        (Some(kind), Some(id)) => format!("{} {}", kind.display_name(), id),
        (Some(kind), None) => kind.display_name().to_string(),
        _ => "commit".to_string(),
    }
}

impl TransitionError {
    /// Stable code for the error taxonomy
    pub fn kind(&self) -> &'static str {
        match self {
            TransitionError::UnknownLead(_) => "unknown_lead",
            TransitionError::LeadBusy(_) => "lead_busy",
            TransitionError::InvalidField(_) => "invalid_field",
            TransitionError::MissingFields { .. } => "validation_missing_fields",
            TransitionError::BlockedDependency(_) => "validation_blocked_dependency",
            TransitionError::Gateway { source, .. } => match source {
                GatewayError::AuthExpired(_) => "gateway_auth_expired",
                GatewayError::Timeout(_) => "gateway_timeout",
                GatewayError::Json(_) | GatewayError::InvalidResponse(_) => {
                    "gateway_response_invalid"
                }
                _ => "gateway_request_failed",
            },
            TransitionError::CacheWriteFailed { .. } => "cache_write_failed",
            TransitionError::CacheUnavailable(_) => "cache_unavailable",
            TransitionError::Machine(_) => "illegal_phase_change",
            TransitionError::Aborted { .. } => "transition_aborted",
        }
    }

    /// Whether re-issuing the same move (after user review) can succeed
    pub fn retryable(&self) -> bool {
        match self {
            TransitionError::LeadBusy(_) => true,
            TransitionError::MissingFields { .. } => true,
            // An unreadable reply to a create may hide a record that exists
            TransitionError::Gateway {
                source: GatewayError::Json(_) | GatewayError::InvalidResponse(_),
                operation,
                ..
            } => *operation != EntityOperation::Created,
            TransitionError::Gateway { source, .. } => !source.is_auth_expired(),
            TransitionError::CacheUnavailable(_) => true,
            _ => false,
        }
    }

    /// The session must end (credentials could not be refreshed)
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, TransitionError::Gateway { source, .. } if source.is_auth_expired())
    }

    pub fn missing_fields(&self) -> Option<&[LeadField]> {
        match self {
            TransitionError::MissingFields { fields, .. } => Some(fields),
            _ => None,
        }
    }
}
