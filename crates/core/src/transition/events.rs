//! # Transition Events
//!
//! Change notifications broadcast to views so they re-render after a stage
//! move is applied, reverted, committed or reconciled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stages::Stage;

/// Kind of transition event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEventKind {
    /// Card moved locally before remote confirmation
    OptimisticApplied,
    /// Optimistic move rolled back
    Reverted,
    /// Remote mutation confirmed and cache written
    Committed,
    /// Remote mutation or cache write failed
    Failed,
    /// A call that had timed out settled later and its entity id was recorded
    Reconciled,
    /// Board reloaded from the lead backend and cache
    BoardHydrated,
    /// Stage cache entries removed
    CacheCleared,
}

/// An event on the board
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: TransitionEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    /// Stage the lead shows after this event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TransitionEvent {
    pub fn new(kind: TransitionEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            lead_id: None,
            stage: None,
            data: None,
        }
    }

    pub fn for_lead(kind: TransitionEventKind, lead_id: &str, stage: Stage) -> Self {
        Self::new(kind).with_lead(lead_id).with_stage(stage)
    }

    pub fn with_lead(mut self, lead_id: &str) -> Self {
        self.lead_id = Some(lead_id.to_string());
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = TransitionEvent::for_lead(TransitionEventKind::Committed, "L-1", Stage::Opportunity)
            .with_data(serde_json::json!({ "entityId": "opp-1" }));

        assert_eq!(event.lead_id.as_deref(), Some("L-1"));
        assert_eq!(event.stage, Some(Stage::Opportunity));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "committed");
        assert_eq!(json["leadId"], "L-1");
        assert_eq!(json["data"]["entityId"], "opp-1");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = TransitionEvent::new(TransitionEventKind::CacheCleared);
        let b = TransitionEvent::new(TransitionEventKind::CacheCleared);
        assert_ne!(a.id, b.id);
    }
}
