//! # Stage Registry
//!
//! Static definition of the lead pipeline: stage order, the fields each stage
//! requires, the remote entity a stage owns and the entity it depends on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::lead::LeadField;

/// Stage of the lead pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Raw lead, no stage entity yet
    #[default]
    Lead,
    /// Qualified opportunity for a part
    Opportunity,
    /// Supplier quotation received
    QuotationReceived,
    /// Customer quotation shared
    QuotationShared,
    /// Price negotiation under way
    NegotiationStarted,
    /// Purchase order received
    PoReceived,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 6] = [
        Stage::Lead,
        Stage::Opportunity,
        Stage::QuotationReceived,
        Stage::QuotationShared,
        Stage::NegotiationStarted,
        Stage::PoReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Opportunity => "opportunity",
            Self::QuotationReceived => "quotation_received",
            Self::QuotationShared => "quotation_shared",
            Self::NegotiationStarted => "negotiation_started",
            Self::PoReceived => "po_received",
        }
    }

    /// Display name for board columns
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Lead => "Lead",
            Self::Opportunity => "Opportunity",
            Self::QuotationReceived => "Quotation Received",
            Self::QuotationShared => "Quotation Shared",
            Self::NegotiationStarted => "Negotiation Started",
            Self::PoReceived => "PO Received",
        }
    }

    fn position(&self) -> usize {
        match self {
            Self::Lead => 0,
            Self::Opportunity => 1,
            Self::QuotationReceived => 2,
            Self::QuotationShared => 3,
            Self::NegotiationStarted => 4,
            Self::PoReceived => 5,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Remote record type owned by exactly one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Opportunity,
    QuotationSupplier,
    QuotationCustomer,
    Negotiation,
    PoReceived,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Opportunity,
        EntityKind::QuotationSupplier,
        EntityKind::QuotationCustomer,
        EntityKind::Negotiation,
        EntityKind::PoReceived,
    ];

    /// Remote collection path segment
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Opportunity => "opportunities",
            Self::QuotationSupplier => "quotation-suppliers",
            Self::QuotationCustomer => "quotation-customers",
            Self::Negotiation => "negotiations",
            Self::PoReceived => "po-received",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Opportunity => "Opportunity",
            Self::QuotationSupplier => "Supplier Quotation",
            Self::QuotationCustomer => "Customer Quotation",
            Self::Negotiation => "Negotiation",
            Self::PoReceived => "PO Receipt",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Static definition of one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDefinition {
    #[serde(rename = "stageId")]
    pub stage: Stage,
    pub order: usize,
    pub required_fields: &'static [LeadField],
    #[serde(rename = "ownedEntityType")]
    pub owned_entity: Option<EntityKind>,
    #[serde(rename = "dependsOnEntityType")]
    pub depends_on: Option<EntityKind>,
}

const DEFINITIONS: [StageDefinition; 6] = [
    StageDefinition {
        stage: Stage::Lead,
        order: 0,
        required_fields: &[LeadField::Title],
        owned_entity: None,
        depends_on: None,
    },
    StageDefinition {
        stage: Stage::Opportunity,
        order: 1,
        required_fields: &[
            LeadField::Title,
            LeadField::ContactPerson,
            LeadField::Organization,
            LeadField::PartNumber,
            LeadField::Quantity,
            LeadField::Region,
        ],
        owned_entity: Some(EntityKind::Opportunity),
        depends_on: None,
    },
    StageDefinition {
        stage: Stage::QuotationReceived,
        order: 2,
        required_fields: &[
            LeadField::SupplierName,
            LeadField::SupplierPrice,
            LeadField::Quantity,
        ],
        owned_entity: Some(EntityKind::QuotationSupplier),
        depends_on: Some(EntityKind::Opportunity),
    },
    StageDefinition {
        stage: Stage::QuotationShared,
        order: 3,
        required_fields: &[LeadField::SellingPrice, LeadField::GrossMargin],
        owned_entity: Some(EntityKind::QuotationCustomer),
        depends_on: Some(EntityKind::QuotationSupplier),
    },
    StageDefinition {
        stage: Stage::NegotiationStarted,
        order: 4,
        required_fields: &[LeadField::TargetPrice],
        owned_entity: Some(EntityKind::Negotiation),
        depends_on: Some(EntityKind::QuotationCustomer),
    },
    StageDefinition {
        stage: Stage::PoReceived,
        order: 5,
        required_fields: &[LeadField::PoNumber, LeadField::PoValue],
        owned_entity: Some(EntityKind::PoReceived),
        depends_on: Some(EntityKind::Negotiation),
    },
];

/// Lookup table over the fixed pipeline. Pure and stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageRegistry;

impl StageRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Stage definitions in pipeline order
    pub fn definitions(&self) -> &'static [StageDefinition] {
        &DEFINITIONS
    }

    pub fn definition(&self, stage: Stage) -> &'static StageDefinition {
        &DEFINITIONS[stage.position()]
    }

    /// Stages in pipeline order
    pub fn stages(&self) -> impl Iterator<Item = Stage> {
        DEFINITIONS.iter().map(|def| def.stage)
    }

    pub fn initial_stage(&self) -> Stage {
        DEFINITIONS[0].stage
    }

    pub fn order(&self, stage: Stage) -> usize {
        self.definition(stage).order
    }

    pub fn required_fields(&self, stage: Stage) -> &'static [LeadField] {
        self.definition(stage).required_fields
    }

    pub fn owned_entity(&self, stage: Stage) -> Option<EntityKind> {
        self.definition(stage).owned_entity
    }

    /// Entity that must already exist before `stage` can be entered
    pub fn dependency(&self, stage: Stage) -> Option<EntityKind> {
        self.definition(stage).depends_on
    }

    /// Stage whose entity `stage` depends on
    pub fn predecessor_stage(&self, stage: Stage) -> Option<Stage> {
        self.dependency(stage)
            .and_then(|kind| self.stage_owning(kind))
    }

    pub fn stage_owning(&self, kind: EntityKind) -> Option<Stage> {
        DEFINITIONS
            .iter()
            .find(|def| def.owned_entity == Some(kind))
            .map(|def| def.stage)
    }

    pub fn next(&self, stage: Stage) -> Option<Stage> {
        DEFINITIONS.get(stage.position() + 1).map(|def| def.stage)
    }

    pub fn previous(&self, stage: Stage) -> Option<Stage> {
        stage
            .position()
            .checked_sub(1)
            .map(|pos| DEFINITIONS[pos].stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_follow_stage_order() {
        let registry = StageRegistry::new();
        for (index, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(registry.order(*stage), index);
            assert_eq!(registry.definition(*stage).stage, *stage);
        }
        assert_eq!(registry.initial_stage(), Stage::Lead);
    }

    #[test]
    fn test_every_entity_has_one_owner() {
        let registry = StageRegistry::new();
        for kind in EntityKind::ALL {
            let owners = registry
                .definitions()
                .iter()
                .filter(|def| def.owned_entity == Some(kind))
                .count();
            assert_eq!(owners, 1, "{kind} should be owned by exactly one stage");
        }
        assert_eq!(registry.owned_entity(Stage::Lead), None);
    }

    #[test]
    fn test_dependency_points_to_earlier_stage() {
        let registry = StageRegistry::new();
        assert_eq!(
            registry.predecessor_stage(Stage::QuotationShared),
            Some(Stage::QuotationReceived)
        );
        assert_eq!(
            registry.dependency(Stage::QuotationShared),
            Some(EntityKind::QuotationSupplier)
        );
        for stage in registry.stages() {
            if let Some(predecessor) = registry.predecessor_stage(stage) {
                assert!(registry.order(predecessor) < registry.order(stage));
            }
        }
    }

    #[test]
    fn test_next_and_previous() {
        let registry = StageRegistry::new();
        assert_eq!(registry.next(Stage::Lead), Some(Stage::Opportunity));
        assert_eq!(registry.next(Stage::PoReceived), None);
        assert_eq!(registry.previous(Stage::Lead), None);
        assert_eq!(
            registry.previous(Stage::PoReceived),
            Some(Stage::NegotiationStarted)
        );
    }

    #[test]
    fn test_stage_parse_and_serialization() {
        assert_eq!(
            "quotation_shared".parse::<Stage>(),
            Ok(Stage::QuotationShared)
        );
        assert!("won".parse::<Stage>().is_err());

        let json = serde_json::to_string(&Stage::NegotiationStarted).unwrap();
        assert_eq!(json, "\"negotiation_started\"");
    }
}
