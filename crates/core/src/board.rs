//! # Board Controller
//!
//! Glue between a kanban view and the orchestrator: hydrates the board from
//! the lead directory, computes per-card badges and turns drop events into
//! stage moves. A drop that needs more data comes back as a `FieldPrompt`
//! the view renders as a form and submits with `submit_fields`.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::gateway::LeadDirectory;
use crate::lead::{ExtraFields, Lead, LeadField};
use crate::stages::{Stage, StageRegistry};
use crate::transition::{CommittedTransition, TransitionError, TransitionOrchestrator};

/// What the card shows about its next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardBadge {
    /// Next stage can be entered as is
    Ready,
    /// Next stage needs fields filled in
    NeedsFields,
    /// Next stage waits on a predecessor entity
    Blocked,
    /// Lead is in the last stage
    Final,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardCard {
    pub lead: Lead,
    /// Highest stage the lead's data supports
    pub effective_stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<Stage>,
    pub badge: CardBadge,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<LeadField>,
    /// A move for this lead is in flight
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardColumn {
    pub stage: Stage,
    pub title: &'static str,
    pub cards: Vec<BoardCard>,
}

/// One input the view must collect
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptField {
    pub field: LeadField,
    pub label: &'static str,
    /// `text`, `number` or `integer`
    pub input: &'static str,
}

/// Form request raised when a move lacks required fields
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPrompt {
    pub lead_id: String,
    pub stage: Stage,
    pub fields: Vec<PromptField>,
    /// JSON Schema for the form
    pub schema: Value,
}

impl FieldPrompt {
    pub fn new(lead_id: &str, stage: Stage, fields: &[LeadField]) -> Self {
        let prompt_fields: Vec<PromptField> = fields
            .iter()
            .map(|field| PromptField {
                field: *field,
                label: field.label(),
                input: input_kind(*field),
            })
            .collect();

        let mut properties = Map::new();
        for field in &prompt_fields {
            let schema_type = match field.input {
                "text" => "string",
                other => other,
            };
            let mut property = json!({
                "type": schema_type,
                "title": field.label,
            });
            if field.input == "text" {
                property["minLength"] = json!(1);
            } else {
                property["exclusiveMinimum"] = json!(0);
            }
            properties.insert(field.field.as_str().to_string(), property);
        }

        let schema = json!({
            "type": "object",
            "title": format!("Move to {}", stage.display_name()),
            "required": fields.iter().map(LeadField::as_str).collect::<Vec<_>>(),
            "properties": properties,
        });

        Self {
            lead_id: lead_id.to_string(),
            stage,
            fields: prompt_fields,
            schema,
        }
    }
}

fn input_kind(field: LeadField) -> &'static str {
    if field.is_integer() {
        "integer"
    } else if field.is_numeric() {
        "number"
    } else {
        "text"
    }
}

/// Result of a drop, ready for the view
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DropOutcome {
    Moved(CommittedTransition),
    /// Dropped on the column it already sits in
    Unchanged { lead_id: String, stage: Stage },
    NeedsFields(FieldPrompt),
    /// Predecessor stage incomplete
    Refused {
        lead_id: String,
        stage: Stage,
        required_stage: Stage,
        message: String,
    },
    Failed {
        lead_id: String,
        kind: &'static str,
        message: String,
        retryable: bool,
        session_expired: bool,
    },
}

impl DropOutcome {
    fn from_error(lead_id: &str, err: TransitionError) -> Self {
        match err {
            TransitionError::MissingFields { stage, fields, .. } => {
                DropOutcome::NeedsFields(FieldPrompt::new(lead_id, stage, &fields))
            }
            TransitionError::BlockedDependency(blocking) => DropOutcome::Refused {
                lead_id: lead_id.to_string(),
                stage: blocking.stage,
                required_stage: blocking.required_stage,
                message: blocking.message,
            },
            other => DropOutcome::Failed {
                lead_id: lead_id.to_string(),
                kind: other.kind(),
                message: other.to_string(),
                retryable: other.retryable(),
                session_expired: other.is_session_fatal(),
            },
        }
    }
}

pub struct BoardController {
    orchestrator: Arc<TransitionOrchestrator>,
    directory: Option<Arc<dyn LeadDirectory>>,
    registry: StageRegistry,
}

impl BoardController {
    pub fn new(
        orchestrator: Arc<TransitionOrchestrator>,
        directory: Option<Arc<dyn LeadDirectory>>,
    ) -> Self {
        let registry = orchestrator.registry();
        Self {
            orchestrator,
            directory,
            registry,
        }
    }

    pub fn orchestrator(&self) -> &Arc<TransitionOrchestrator> {
        &self.orchestrator
    }

    /// Fetch every lead from the directory and hydrate the board
    pub async fn load(&self) -> Result<usize> {
        let directory = self
            .directory
            .as_ref()
            .context("No lead directory configured")?;
        let leads = directory
            .list_leads()
            .await
            .context("Failed to list leads")?;
        let count = self.orchestrator.hydrate(leads)?;
        Ok(count)
    }

    pub fn hydrate(&self, leads: Vec<Lead>) -> Result<usize, TransitionError> {
        self.orchestrator.hydrate(leads)
    }

    pub fn card(&self, lead_id: &str) -> Result<BoardCard, TransitionError> {
        let lead = self
            .orchestrator
            .leads()
            .get(lead_id)
            .ok_or_else(|| TransitionError::UnknownLead(lead_id.to_string()))?;
        Ok(self.describe(lead))
    }

    /// Every card as currently displayed, optimistic moves included
    pub fn cards(&self) -> Vec<BoardCard> {
        self.orchestrator
            .leads()
            .all()
            .into_iter()
            .map(|lead| self.describe(lead))
            .collect()
    }

    /// Cards grouped by displayed stage, in pipeline order
    pub fn columns(&self) -> Vec<BoardColumn> {
        let mut columns: Vec<BoardColumn> = self
            .registry
            .stages()
            .map(|stage| BoardColumn {
                stage,
                title: stage.display_name(),
                cards: Vec::new(),
            })
            .collect();

        for card in self.cards() {
            let index = self.registry.order(card.lead.stage);
            if let Some(column) = columns.get_mut(index) {
                column.cards.push(card);
            }
        }
        columns
    }

    pub async fn drop_card(&self, lead_id: &str, target: Stage) -> DropOutcome {
        if let Some(stage) = self.orchestrator.leads().stage_of(lead_id) {
            if stage == target && !self.orchestrator.leads().is_pending(lead_id) {
                return DropOutcome::Unchanged {
                    lead_id: lead_id.to_string(),
                    stage,
                };
            }
        }
        self.run_move(lead_id, target, None).await
    }

    /// Re-issue a move with the values collected from a `FieldPrompt`
    pub async fn submit_fields(&self, lead_id: &str, target: Stage, fields: &ExtraFields) -> DropOutcome {
        self.run_move(lead_id, target, Some(fields)).await
    }

    async fn run_move(&self, lead_id: &str, target: Stage, extra: Option<&ExtraFields>) -> DropOutcome {
        match self.orchestrator.move_lead(lead_id, target, extra).await {
            Ok(done) => DropOutcome::Moved(done),
            Err(err) => DropOutcome::from_error(lead_id, err),
        }
    }

    fn describe(&self, lead: Lead) -> BoardCard {
        let validator = self.orchestrator.validator();
        let effective_stage = validator.effective_stage(&lead);
        let next_stage = self.registry.next(lead.stage);

        let (badge, missing_fields) = match next_stage {
            None => (CardBadge::Final, Vec::new()),
            Some(next) => {
                let result = validator.validate(&lead, next);
                if result.blocking_error.is_some() {
                    (CardBadge::Blocked, Vec::new())
                } else if result.is_valid {
                    (CardBadge::Ready, Vec::new())
                } else {
                    (CardBadge::NeedsFields, result.missing_fields)
                }
            }
        };

        let pending = self.orchestrator.leads().is_pending(&lead.id);
        BoardCard {
            lead,
            effective_stage,
            next_stage,
            badge,
            missing_fields,
            pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{self, GatewayError, StageEntity, StageEntityGateway};
    use crate::lead::StageLinks;
    use crate::stages::EntityKind;
    use crate::state::{LeadflowDb, StageCache};
    use crate::transition::TransitionSettings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StageEntityGateway for CountingGateway {
        async fn create(&self, entity: &StageEntity) -> gateway::Result<StageEntity> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(entity.clone().with_id(format!("id-{}", n)))
        }

        async fn get(&self, _kind: EntityKind, _id: &str) -> gateway::Result<StageEntity> {
            Err(GatewayError::server(404, "not found"))
        }

        async fn update(&self, id: &str, entity: &StageEntity) -> gateway::Result<StageEntity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(entity.clone().with_id(id))
        }

        async fn delete(&self, _kind: EntityKind, _id: &str) -> gateway::Result<()> {
            Ok(())
        }
    }

    struct FixedDirectory(Vec<Lead>);

    #[async_trait]
    impl LeadDirectory for FixedDirectory {
        async fn list_leads(&self) -> gateway::Result<Vec<Lead>> {
            Ok(self.0.clone())
        }

        async fn get_lead(&self, id: &str) -> gateway::Result<Lead> {
            self.0
                .iter()
                .find(|lead| lead.id == id)
                .cloned()
                .ok_or_else(|| GatewayError::server(404, "no such lead"))
        }
    }

    fn lead(id: &str) -> Lead {
        Lead {
            id: id.to_string(),
            title: Some("Connector kit".to_string()),
            contact_person: Some("Jo Park".to_string()),
            organization: Some("Northwind".to_string()),
            ..Default::default()
        }
    }

    fn controller(leads: Vec<Lead>) -> (BoardController, StageCache) {
        let db = LeadflowDb::open_in_memory().unwrap();
        let cache = StageCache::new(&db);
        let orchestrator = Arc::new(TransitionOrchestrator::new(
            Arc::new(CountingGateway::default()),
            cache.clone(),
            TransitionSettings::default(),
        ));
        let directory: Arc<dyn LeadDirectory> = Arc::new(FixedDirectory(leads));
        (BoardController::new(orchestrator, Some(directory)), cache)
    }

    #[tokio::test]
    async fn test_load_and_columns() {
        let mut ready = lead("L-1");
        ready.part_number = Some("TE-1-480".to_string());
        ready.quantity = Some(40);
        ready.region = Some("NA".to_string());
        let (board, cache) = controller(vec![ready, lead("L-2")]);
        cache
            .put("L-2", Stage::Opportunity, &StageLinks::default().with(EntityKind::Opportunity, "opp-2"))
            .unwrap();

        assert_eq!(board.load().await.unwrap(), 2);
        let columns = board.columns();
        assert_eq!(columns.len(), 6);
        assert_eq!(columns[0].cards.len(), 1);
        assert_eq!(columns[0].cards[0].badge, CardBadge::Ready);
        assert_eq!(columns[1].cards.len(), 1);

        let card = &columns[1].cards[0];
        assert_eq!(card.lead.id, "L-2");
        assert_eq!(card.badge, CardBadge::NeedsFields);
        assert_eq!(
            card.missing_fields,
            vec![LeadField::SupplierName, LeadField::SupplierPrice, LeadField::Quantity]
        );
        assert!(!card.pending);
    }

    #[tokio::test]
    async fn test_drop_prompts_then_moves_with_fields() {
        let (board, _) = controller(vec![]);
        board.hydrate(vec![lead("L-3")]).unwrap();

        let prompt = match board.drop_card("L-3", Stage::Opportunity).await {
            DropOutcome::NeedsFields(prompt) => prompt,
            other => panic!("expected a field prompt, got {other:?}"),
        };
        let names: Vec<_> = prompt.fields.iter().map(|f| f.field).collect();
        assert_eq!(
            names,
            vec![LeadField::PartNumber, LeadField::Quantity, LeadField::Region]
        );
        assert_eq!(prompt.schema["properties"]["quantity"]["type"], "integer");
        assert_eq!(prompt.schema["required"][0], "partNumber");

        let fields = ExtraFields::new()
            .with(LeadField::PartNumber, "TE-1-480")
            .with(LeadField::Quantity, 40)
            .with(LeadField::Region, "NA");
        match board.submit_fields("L-3", Stage::Opportunity, &fields).await {
            DropOutcome::Moved(done) => assert_eq!(done.to, Stage::Opportunity),
            other => panic!("expected a move, got {other:?}"),
        }
        assert_eq!(board.card("L-3").unwrap().lead.stage, Stage::Opportunity);
    }

    #[tokio::test]
    async fn test_drop_on_blocked_stage_is_refused() {
        let (board, _) = controller(vec![]);
        board.hydrate(vec![lead("L-4")]).unwrap();

        match board.drop_card("L-4", Stage::PoReceived).await {
            DropOutcome::Refused { required_stage, .. } => {
                assert_eq!(required_stage, Stage::NegotiationStarted)
            }
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drop_on_same_column_is_unchanged() {
        let (board, _) = controller(vec![]);
        board.hydrate(vec![lead("L-5")]).unwrap();
        assert!(matches!(
            board.drop_card("L-5", Stage::Lead).await,
            DropOutcome::Unchanged { .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_field_value_fails() {
        let (board, _) = controller(vec![]);
        board.hydrate(vec![lead("L-6")]).unwrap();
        let fields = ExtraFields::new().with(LeadField::Quantity, "lots");

        match board.submit_fields("L-6", Stage::Opportunity, &fields).await {
            DropOutcome::Failed { kind, retryable, .. } => {
                assert_eq!(kind, "invalid_field");
                assert!(!retryable);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_outcome_serialization() {
        let prompt = FieldPrompt::new("L-7", Stage::QuotationShared, &[LeadField::SellingPrice]);
        let json = serde_json::to_value(DropOutcome::NeedsFields(prompt)).unwrap();
        assert_eq!(json["outcome"], "needs_fields");
        assert_eq!(json["stage"], "quotation_shared");
        assert_eq!(json["schema"]["properties"]["sellingPrice"]["type"], "number");
    }
}
