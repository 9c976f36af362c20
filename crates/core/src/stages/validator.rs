//! # Transition Validator
//!
//! Pure stage-entry checks. Given a lead (already merged with its cached
//! stage links) and a target stage, decide whether the move may proceed.
//!
//! The dependency check runs first and short-circuits: a stage whose
//! predecessor entity was never created cannot be fixed by filling a form.

use serde::Serialize;

use super::registry::{EntityKind, Stage, StageRegistry};
use crate::lead::{Lead, LeadField};

/// Predecessor entity missing for a target stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingDependency {
    /// Stage the lead was moving to
    pub stage: Stage,
    /// Stage that creates the missing entity
    pub required_stage: Stage,
    /// Entity kind that is missing
    pub entity: EntityKind,
    pub message: String,
}

impl BlockingDependency {
    fn new(stage: Stage, required_stage: Stage, entity: EntityKind) -> Self {
        let message = format!(
            "Cannot move to {}: no {} exists for this lead. Complete the {} stage first.",
            stage.display_name(),
            entity.display_name(),
            required_stage.display_name()
        );
        Self {
            stage,
            required_stage,
            entity,
            message,
        }
    }
}

impl std::fmt::Display for BlockingDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of validating a lead against a target stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub missing_fields: Vec<LeadField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_error: Option<BlockingDependency>,
}

impl ValidationResult {
    fn valid() -> Self {
        Self {
            is_valid: true,
            missing_fields: Vec::new(),
            blocking_error: None,
        }
    }

    fn blocked(dependency: BlockingDependency) -> Self {
        Self {
            is_valid: false,
            missing_fields: Vec::new(),
            blocking_error: Some(dependency),
        }
    }

    fn missing(fields: Vec<LeadField>) -> Self {
        Self {
            is_valid: false,
            missing_fields: fields,
            blocking_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionValidator {
    registry: StageRegistry,
}

impl TransitionValidator {
    pub fn new(registry: StageRegistry) -> Self {
        Self { registry }
    }

    /// Validate `lead` for entry into `target`.
    ///
    /// `lead` must already carry the cached stage links; this function does
    /// not read any store.
    pub fn validate(&self, lead: &Lead, target: Stage) -> ValidationResult {
        if let Some(entity) = self.registry.dependency(target) {
            if lead.links.get(entity).is_none() {
                let required_stage = self
                    .registry
                    .stage_owning(entity)
                    .unwrap_or_else(|| self.registry.initial_stage());
                return ValidationResult::blocked(BlockingDependency::new(
                    target,
                    required_stage,
                    entity,
                ));
            }
        }

        let missing = self.missing_fields(lead, target);
        if missing.is_empty() {
            ValidationResult::valid()
        } else {
            ValidationResult::missing(missing)
        }
    }

    /// Required fields of `target` that are missing on `lead`, in declaration order
    pub fn missing_fields(&self, lead: &Lead, target: Stage) -> Vec<LeadField> {
        self.registry
            .required_fields(target)
            .iter()
            .copied()
            .filter(|field| lead.field(*field).is_missing())
            .collect()
    }

    /// Highest stage whose requirements and dependency hold for `lead`.
    /// Falls back to the initial stage.
    pub fn effective_stage(&self, lead: &Lead) -> Stage {
        self.registry
            .stages()
            .filter(|stage| self.validate(lead, *stage).is_valid)
            .last()
            .unwrap_or_else(|| self.registry.initial_stage())
    }
}

/// Validate with the standard registry
pub fn validate(lead: &Lead, target: Stage) -> ValidationResult {
    TransitionValidator::default().validate(lead, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::StageLinks;

    fn qualified_lead() -> Lead {
        Lead {
            id: "L-100".to_string(),
            title: Some("MAX3040 sourcing".to_string()),
            contact_person: Some("Dana Ruiz".to_string()),
            organization: Some("Acme Controls".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_opportunity_valid_with_part_details() {
        let mut lead = qualified_lead();
        lead.part_number = Some("MAX3040EWE+".to_string());
        lead.quantity = Some(1000);
        lead.region = Some("APAC".to_string());

        let result = validate(&lead, Stage::Opportunity);
        assert!(result.is_valid);
        assert!(result.missing_fields.is_empty());
        assert!(result.blocking_error.is_none());
    }

    #[test]
    fn test_zero_quantity_is_missing() {
        let mut lead = qualified_lead();
        lead.part_number = Some("MAX3040EWE+".to_string());
        lead.quantity = Some(0);
        lead.region = Some("APAC".to_string());

        let result = validate(&lead, Stage::Opportunity);
        assert!(!result.is_valid);
        assert_eq!(result.missing_fields, vec![LeadField::Quantity]);
    }

    #[test]
    fn test_missing_fields_keep_declaration_order() {
        let lead = Lead::new("L-101");
        let result = validate(&lead, Stage::Opportunity);
        assert_eq!(
            result.missing_fields,
            vec![
                LeadField::Title,
                LeadField::ContactPerson,
                LeadField::Organization,
                LeadField::PartNumber,
                LeadField::Quantity,
                LeadField::Region,
            ]
        );
    }

    #[test]
    fn test_dependency_short_circuits_field_check() {
        // quotation_shared needs a supplier quotation; fields are also missing
        let lead = qualified_lead();
        let result = validate(&lead, Stage::QuotationShared);

        assert!(!result.is_valid);
        assert!(result.missing_fields.is_empty());
        let blocking = result.blocking_error.expect("should be blocked");
        assert_eq!(blocking.entity, EntityKind::QuotationSupplier);
        assert_eq!(blocking.required_stage, Stage::QuotationReceived);
        assert!(blocking.message.contains("Supplier Quotation"));
    }

    #[test]
    fn test_dependency_satisfied_by_links() {
        let mut lead = qualified_lead();
        lead.links = StageLinks::default().with(EntityKind::QuotationSupplier, "qs-1");

        let result = validate(&lead, Stage::QuotationShared);
        assert!(result.blocking_error.is_none());
        assert_eq!(
            result.missing_fields,
            vec![LeadField::SellingPrice, LeadField::GrossMargin]
        );
    }

    #[test]
    fn test_validate_is_pure() {
        let lead = qualified_lead();
        let before = lead.clone();
        let first = validate(&lead, Stage::NegotiationStarted);
        let second = validate(&lead, Stage::NegotiationStarted);
        assert_eq!(first, second);
        assert_eq!(lead, before);
    }

    #[test]
    fn test_effective_stage() {
        let validator = TransitionValidator::default();
        let mut lead = qualified_lead();
        assert_eq!(validator.effective_stage(&lead), Stage::Lead);

        lead.part_number = Some("MAX3040EWE+".to_string());
        lead.quantity = Some(1000);
        lead.region = Some("APAC".to_string());
        assert_eq!(validator.effective_stage(&lead), Stage::Opportunity);

        // Supplier fields without an opportunity entity stay blocked
        lead.supplier_name = Some("Arrow".to_string());
        lead.supplier_price = Some(1.2);
        assert_eq!(validator.effective_stage(&lead), Stage::Opportunity);

        lead.links.set(EntityKind::Opportunity, "opp-1");
        assert_eq!(validator.effective_stage(&lead), Stage::QuotationReceived);

        assert_eq!(validator.effective_stage(&Lead::new("empty")), Stage::Lead);
    }
}
