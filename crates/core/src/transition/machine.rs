//! # Transition State Machine
//!
//! Phases of one in-flight stage move:
//!
//! ```text
//! Idle → Validating → MissingFields
//!                   → Blocked
//!                   → ReadyToCommit → Committing → Committed
//!                                               → Failed
//! ```
//!
//! `MissingFields` and `Blocked` end the move without any remote mutation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::StageEntity;
use crate::stages::{EntityKind, Stage};

/// Phase of a stage transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    Idle,
    Validating,
    MissingFields,
    Blocked,
    ReadyToCommit,
    Committing,
    Committed,
    Failed,
}

impl TransitionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MissingFields | Self::Blocked | Self::Committed | Self::Failed
        )
    }

    fn can_enter(&self, next: TransitionPhase) -> bool {
        use TransitionPhase::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, MissingFields)
                | (Validating, Blocked)
                | (Validating, ReadyToCommit)
                | (Validating, Failed)
                | (ReadyToCommit, Committing)
                | (ReadyToCommit, Failed)
                | (Committing, Committed)
                | (Committing, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal transition phase change {from:?} -> {to:?}")]
pub struct IllegalPhaseChange {
    pub from: TransitionPhase,
    pub to: TransitionPhase,
}

/// Remote mutation decided for a validated move
#[derive(Debug, Clone, PartialEq)]
pub enum CommitPlan {
    /// Target stage owns no entity
    Skip,
    /// First entry into the stage
    Create(StageEntity),
    /// Re-entry: the entity id is already cached
    Update { id: String, entity: StageEntity },
}

impl CommitPlan {
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            CommitPlan::Skip => None,
            CommitPlan::Create(entity) | CommitPlan::Update { entity, .. } => Some(entity.kind()),
        }
    }

    pub fn operation(&self) -> EntityOperation {
        match self {
            CommitPlan::Skip => EntityOperation::Skipped,
            CommitPlan::Create(_) => EntityOperation::Created,
            CommitPlan::Update { .. } => EntityOperation::Updated,
        }
    }
}

/// What happened to the stage entity during a committed move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityOperation {
    Created,
    Updated,
    Skipped,
}

impl std::fmt::Display for EntityOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityOperation::Created => "create",
            EntityOperation::Updated => "update",
            EntityOperation::Skipped => "skip",
        })
    }
}

/// State machine for one stage move
#[derive(Debug, Clone)]
pub struct TransitionMachine {
    pub lead_id: String,
    pub from: Stage,
    pub to: Stage,
    phase: TransitionPhase,
    history: Vec<TransitionPhase>,
}

impl TransitionMachine {
    pub fn new(lead_id: impl Into<String>, from: Stage, to: Stage) -> Self {
        Self {
            lead_id: lead_id.into(),
            from,
            to,
            phase: TransitionPhase::Idle,
            history: vec![TransitionPhase::Idle],
        }
    }

    pub fn phase(&self) -> TransitionPhase {
        self.phase
    }

    /// Every phase entered, in order
    pub fn history(&self) -> &[TransitionPhase] {
        &self.history
    }

    pub fn is_settled(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn advance(&mut self, next: TransitionPhase) -> Result<(), IllegalPhaseChange> {
        if !self.phase.can_enter(next) {
            return Err(IllegalPhaseChange {
                from: self.phase,
                to: next,
            });
        }
        tracing::trace!(lead_id = %self.lead_id, from = ?self.phase, to = ?next, "Transition phase");
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed` from whatever non-terminal phase we are in
    pub fn fail(&mut self) {
        if self.phase.can_enter(TransitionPhase::Failed) {
            self.phase = TransitionPhase::Failed;
            self.history.push(TransitionPhase::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransitionPhase::*;

    #[test]
    fn test_happy_path() {
        let mut machine = TransitionMachine::new("L-1", Stage::Lead, Stage::Opportunity);
        assert_eq!(machine.phase(), Idle);

        machine.advance(Validating).unwrap();
        machine.advance(ReadyToCommit).unwrap();
        machine.advance(Committing).unwrap();
        machine.advance(Committed).unwrap();

        assert!(machine.is_settled());
        assert_eq!(
            machine.history(),
            &[Idle, Validating, ReadyToCommit, Committing, Committed]
        );
    }

    #[test]
    fn test_validation_exits_are_terminal() {
        let mut machine = TransitionMachine::new("L-2", Stage::Lead, Stage::QuotationShared);
        machine.advance(Validating).unwrap();
        machine.advance(Blocked).unwrap();
        assert!(machine.is_settled());

        let err = machine.advance(Committing).unwrap_err();
        assert_eq!(err.from, Blocked);
        assert_eq!(err.to, Committing);
    }

    #[test]
    fn test_cannot_skip_validation() {
        let mut machine = TransitionMachine::new("L-3", Stage::Lead, Stage::Opportunity);
        assert!(machine.advance(Committing).is_err());
        assert!(machine.advance(Committed).is_err());
        assert_eq!(machine.phase(), Idle);
    }

    #[test]
    fn test_fail_only_from_live_phases() {
        let mut machine = TransitionMachine::new("L-4", Stage::Lead, Stage::Opportunity);
        machine.advance(Validating).unwrap();
        machine.advance(ReadyToCommit).unwrap();
        machine.advance(Committing).unwrap();
        machine.fail();
        assert_eq!(machine.phase(), Failed);

        // Already terminal: no-op
        machine.fail();
        assert_eq!(machine.history().last(), Some(&Failed));
        assert_eq!(machine.history().len(), 5);
    }
}
