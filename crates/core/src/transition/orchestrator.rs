//! # Transition Orchestrator
//!
//! Coordinates one stage move end to end:
//!
//! ```text
//! move_lead(id, target, extra)
//!   ├─ pending guard (LeadBusy if a move is in flight)
//!   ├─ effective lead = board lead ⊕ cache entry ⊕ extra fields
//!   ├─ optimistic stage change on the board
//!   ├─ validate → Blocked / MissingFields (revert, no network)
//!   ├─ plan: skip / create / update (cached id)
//!   ├─ gateway call in its own task, bounded by the gateway timeout
//!   └─ cache write → board merge → Committed   (any failure reverts)
//! ```
//!
//! The whole sequence runs in a spawned task that owns the lead's pending
//! mark, so a caller that goes away does not orphan a remote call. The cache
//! is written only after the remote mutation is confirmed. A call that
//! outlives the timeout keeps running; if it later succeeds, its entity
//! id is recorded in the cache without touching the stage so the next move
//! updates instead of creating a duplicate.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::error::TransitionError;
use super::events::{TransitionEvent, TransitionEventKind};
use super::local::{LocalLeads, OptimisticMove, PendingGuard};
use super::machine::{CommitPlan, EntityOperation, TransitionMachine, TransitionPhase};
use crate::gateway::{GatewayError, StageEntity, StageEntityGateway};
use crate::lead::{ExtraFields, Lead, StageLinks};
use crate::stages::{EntityKind, Stage, StageRegistry, TransitionValidator, ValidationResult};
use crate::state::StageCache;

/// Tunables for remote commits
#[derive(Debug, Clone)]
pub struct TransitionSettings {
    /// Upper bound on one commit call (including update retries)
    pub gateway_timeout: Duration,
    /// Extra attempts for a failed `update`. `create` is never retried.
    pub update_retries: u32,
    /// Base delay between update attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
    /// Broadcast channel capacity for transition events
    pub event_capacity: usize,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(15),
            update_retries: 0,
            retry_backoff: Duration::from_millis(250),
            event_capacity: 100,
        }
    }
}

/// A move that reached `Committed`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedTransition {
    /// Lead as the board now shows it
    pub lead: Lead,
    pub from: Stage,
    pub to: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<StageEntity>,
    pub operation: EntityOperation,
    pub phases: Vec<TransitionPhase>,
}

type CommitCall = JoinHandle<Result<Option<StageEntity>, GatewayError>>;

/// Cheap to clone: every clone shares the board, cache and event channel
#[derive(Clone)]
pub struct TransitionOrchestrator {
    registry: StageRegistry,
    validator: TransitionValidator,
    gateway: Arc<dyn StageEntityGateway>,
    cache: StageCache,
    leads: Arc<LocalLeads>,
    events: broadcast::Sender<TransitionEvent>,
    settings: TransitionSettings,
}

impl TransitionOrchestrator {
    pub fn new(
        gateway: Arc<dyn StageEntityGateway>,
        cache: StageCache,
        settings: TransitionSettings,
    ) -> Self {
        let registry = StageRegistry::new();
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            registry,
            validator: TransitionValidator::new(registry),
            gateway,
            cache,
            leads: Arc::new(LocalLeads::new()),
            events,
            settings,
        }
    }

    /// Subscribe to board change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> StageRegistry {
        self.registry
    }

    pub fn validator(&self) -> TransitionValidator {
        self.validator
    }

    pub fn leads(&self) -> &Arc<LocalLeads> {
        &self.leads
    }

    pub fn cache(&self) -> &StageCache {
        &self.cache
    }

    pub fn settings(&self) -> &TransitionSettings {
        &self.settings
    }

    fn emit(&self, event: TransitionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Replace the board with `leads`, each enriched from the cache.
    /// Leads with a move in flight keep their local copy.
    pub fn hydrate(&self, leads: Vec<Lead>) -> Result<usize, TransitionError> {
        let enriched = self
            .cache
            .enrich_many(&leads)
            .map_err(|e| TransitionError::CacheUnavailable(format!("{:#}", e)))?;

        let board: Vec<Lead> = enriched
            .into_iter()
            .map(|lead| {
                if self.leads.is_pending(&lead.id) {
                    self.leads.get(&lead.id).unwrap_or(lead)
                } else {
                    lead
                }
            })
            .collect();
        let count = board.len();
        self.leads.replace_all(board);

        tracing::info!(leads = count, "Board hydrated");
        self.emit(
            TransitionEvent::new(TransitionEventKind::BoardHydrated)
                .with_data(serde_json::json!({ "leads": count })),
        );
        Ok(count)
    }

    /// Board lead merged with its cache entry
    pub fn effective_lead(&self, lead_id: &str) -> Result<Lead, TransitionError> {
        let lead = self
            .leads
            .get(lead_id)
            .ok_or_else(|| TransitionError::UnknownLead(lead_id.to_string()))?;
        self.cache
            .enrich(&lead)
            .map_err(|e| TransitionError::CacheUnavailable(format!("{:#}", e)))
    }

    /// Check whether `lead_id` could enter `target` right now
    pub fn validate(&self, lead_id: &str, target: Stage) -> Result<ValidationResult, TransitionError> {
        let lead = self.effective_lead(lead_id)?;
        let result = self.validator.validate(&lead, target);
        tracing::debug!(lead_id = %lead_id, stage = %target, valid = result.is_valid, "Validated lead");
        Ok(result)
    }

    /// Drop the cached links for one lead. Returns whether an entry existed.
    pub fn clear_cache(&self, lead_id: &str) -> Result<bool, TransitionError> {
        let removed = self
            .cache
            .clear(lead_id)
            .map_err(|e| TransitionError::CacheUnavailable(format!("{:#}", e)))?;
        self.leads
            .update(lead_id, |lead| lead.links = StageLinks::default());

        if removed {
            tracing::info!(lead_id = %lead_id, "Stage cache entry cleared");
            self.emit(TransitionEvent::new(TransitionEventKind::CacheCleared).with_lead(lead_id));
        }
        Ok(removed)
    }

    /// Drop every cache entry. Returns the number removed.
    pub fn clear_all(&self) -> Result<usize, TransitionError> {
        let removed = self
            .cache
            .clear_all()
            .map_err(|e| TransitionError::CacheUnavailable(format!("{:#}", e)))?;
        for lead in self.leads.all() {
            self.leads
                .update(&lead.id, |lead| lead.links = StageLinks::default());
        }

        tracing::info!(entries = removed, "Stage cache cleared");
        self.emit(
            TransitionEvent::new(TransitionEventKind::CacheCleared)
                .with_data(serde_json::json!({ "entries": removed })),
        );
        Ok(removed)
    }

    /// Move `lead_id` to `target`, creating or updating the stage entity
    /// the target owns. `extra` patches the lead before validation.
    ///
    /// The move runs in its own task that holds the lead's pending mark.
    /// Dropping the returned future detaches from the move without
    /// cancelling it, so the remote call still settles into the cache.
    pub async fn move_lead(
        &self,
        lead_id: &str,
        target: Stage,
        extra: Option<&ExtraFields>,
    ) -> Result<CommittedTransition, TransitionError> {
        let pending = self
            .leads
            .try_begin(lead_id)
            .ok_or_else(|| TransitionError::LeadBusy(lead_id.to_string()))?;

        let this = self.clone();
        let extra = extra.cloned();
        let task = tokio::spawn(async move { this.run_move(pending, target, extra).await });

        task.await.unwrap_or_else(|join_error| {
            tracing::error!(lead_id = %lead_id, error = %join_error, "Stage move task failed");
            Err(TransitionError::Aborted {
                lead_id: lead_id.to_string(),
                reason: join_error.to_string(),
            })
        })
    }

    async fn run_move(
        &self,
        pending: PendingGuard,
        target: Stage,
        extra: Option<ExtraFields>,
    ) -> Result<CommittedTransition, TransitionError> {
        let owned_id = pending.lead_id().to_string();
        let lead_id = owned_id.as_str();
        let mut pending = Some(pending);

        let board_lead = self
            .leads
            .get(lead_id)
            .ok_or_else(|| TransitionError::UnknownLead(lead_id.to_string()))?;
        let cached = self
            .cache
            .get(lead_id)
            .map_err(|e| TransitionError::CacheUnavailable(format!("{:#}", e)))?;

        let mut effective = board_lead.clone();
        if let Some(entry) = &cached {
            entry.overlay(&mut effective);
        }
        if let Some(extra) = &extra {
            effective.apply_extra(extra)?;
        }

        let mut machine = TransitionMachine::new(lead_id, board_lead.stage, target);
        let optimistic = OptimisticMove::apply(&self.leads, lead_id, target)
            .ok_or_else(|| TransitionError::UnknownLead(lead_id.to_string()))?;
        self.emit(TransitionEvent::for_lead(
            TransitionEventKind::OptimisticApplied,
            lead_id,
            target,
        ));

        machine.advance(TransitionPhase::Validating)?;
        let validation = self.validator.validate(&effective, target);

        if let Some(blocking) = validation.blocking_error {
            self.revert(optimistic, lead_id);
            machine.advance(TransitionPhase::Blocked)?;
            tracing::debug!(lead_id = %lead_id, stage = %target, "Move blocked by missing predecessor");
            return Err(TransitionError::BlockedDependency(blocking));
        }

        if !validation.missing_fields.is_empty() {
            self.revert(optimistic, lead_id);
            machine.advance(TransitionPhase::MissingFields)?;
            tracing::debug!(lead_id = %lead_id, stage = %target, missing = validation.missing_fields.len(), "Move needs fields");
            return Err(TransitionError::MissingFields {
                lead_id: lead_id.to_string(),
                stage: target,
                fields: validation.missing_fields,
            });
        }

        let plan = self.plan(&effective, target);
        let kind = plan.kind();
        let operation = plan.operation();
        machine.advance(TransitionPhase::ReadyToCommit)?;
        machine.advance(TransitionPhase::Committing)?;

        let entity = match kind {
            None => None,
            Some(kind) => match self.commit(lead_id, plan, kind, &mut pending, board_lead.stage).await {
                Ok(entity) => entity,
                Err(source) => {
                    self.revert(optimistic, lead_id);
                    machine.fail();
                    let err = TransitionError::Gateway {
                        kind,
                        operation,
                        source,
                    };
                    tracing::warn!(lead_id = %lead_id, stage = %target, error = %err, "Stage move failed");
                    self.emit_failure(lead_id, board_lead.stage, &err);
                    return Err(err);
                }
            },
        };

        let mut links = effective.links.clone();
        if let Some(entity) = &entity {
            if let Some(id) = entity.id() {
                links.set(entity.kind(), id);
            }
        }

        if let Err(e) = self.cache.put(lead_id, target, &links) {
            self.revert(optimistic, lead_id);
            machine.fail();
            let err = TransitionError::CacheWriteFailed {
                lead_id: lead_id.to_string(),
                kind,
                entity_id: entity.as_ref().and_then(|e| e.id()).map(str::to_string),
                reason: format!("{:#}", e),
            };
            tracing::error!(lead_id = %lead_id, stage = %target, error = %err, "Remote commit succeeded but cache write failed");
            self.emit_failure(lead_id, board_lead.stage, &err);
            return Err(err);
        }

        effective.stage = target;
        effective.links = links;
        self.leads.upsert(effective.clone());
        optimistic.confirm();
        machine.advance(TransitionPhase::Committed)?;

        let entity_id = entity.as_ref().and_then(|e| e.id()).map(str::to_string);
        tracing::info!(
            lead_id = %lead_id,
            from = %board_lead.stage,
            to = %target,
            operation = %operation,
            entity_id = entity_id.as_deref().unwrap_or("-"),
            "Stage move committed"
        );
        self.emit(
            TransitionEvent::for_lead(TransitionEventKind::Committed, lead_id, target).with_data(
                serde_json::json!({
                    "from": board_lead.stage,
                    "operation": operation,
                    "entityKind": kind,
                    "entityId": entity_id,
                }),
            ),
        );

        Ok(CommittedTransition {
            lead: effective,
            from: board_lead.stage,
            to: target,
            entity,
            operation,
            phases: machine.history().to_vec(),
        })
    }

    /// Decide the remote mutation for a validated move
    fn plan(&self, lead: &Lead, target: Stage) -> CommitPlan {
        let Some(kind) = self.registry.owned_entity(target) else {
            return CommitPlan::Skip;
        };
        let entity = StageEntity::from_lead(kind, lead);
        match lead.links.get(kind) {
            Some(id) => CommitPlan::Update {
                id: id.to_string(),
                entity: entity.with_id(id),
            },
            None => CommitPlan::Create(entity),
        }
    }

    /// Run `plan` in its own task under the gateway timeout. On timeout the
    /// task keeps running and the pending guard moves to the reconciler.
    async fn commit(
        &self,
        lead_id: &str,
        plan: CommitPlan,
        kind: EntityKind,
        pending: &mut Option<PendingGuard>,
        prior: Stage,
    ) -> Result<Option<StageEntity>, GatewayError> {
        let mut call: CommitCall = tokio::spawn(execute_plan(
            Arc::clone(&self.gateway),
            plan,
            self.settings.update_retries,
            self.settings.retry_backoff,
        ));

        match tokio::time::timeout(self.settings.gateway_timeout, &mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(GatewayError::InvalidResponse(format!(
                "gateway call aborted: {}",
                join_error
            ))),
            Err(_) => {
                tracing::warn!(
                    lead_id = %lead_id,
                    timeout_ms = self.settings.gateway_timeout.as_millis() as u64,
                    "Gateway call timed out; awaiting late result"
                );
                if let Some(guard) = pending.take() {
                    self.spawn_reconciler(call, guard, kind, prior);
                }
                Err(GatewayError::Timeout(self.settings.gateway_timeout))
            }
        }
    }

    /// Wait for a timed-out call. A late success records the entity id in
    /// the cache under the lead's current cached stage.
    fn spawn_reconciler(&self, call: CommitCall, guard: PendingGuard, kind: EntityKind, prior: Stage) {
        let cache = self.cache.clone();
        let leads = Arc::clone(&self.leads);
        let events = self.events.clone();

        tokio::spawn(async move {
            let lead_id = guard.lead_id().to_string();
            let entity = match call.await {
                Ok(Ok(Some(entity))) => entity,
                Ok(Ok(None)) => return,
                Ok(Err(e)) => {
                    tracing::debug!(lead_id = %lead_id, error = %e, "Timed-out call failed late");
                    return;
                }
                Err(e) => {
                    tracing::warn!(lead_id = %lead_id, error = %e, "Timed-out call aborted");
                    return;
                }
            };
            let Some(id) = entity.id().map(str::to_string) else {
                return;
            };

            let stage = match cache.get(&lead_id) {
                Ok(entry) => entry.map(|entry| entry.stage).unwrap_or(prior),
                Err(e) => {
                    tracing::error!(lead_id = %lead_id, entity_id = %id, error = %e, "Cannot reconcile late {}", kind);
                    return;
                }
            };
            let links = StageLinks::default().with(kind, id.as_str());
            if let Err(e) = cache.put(&lead_id, stage, &links) {
                tracing::error!(lead_id = %lead_id, entity_id = %id, error = %e, "Cannot reconcile late {}", kind);
                return;
            }
            leads.update(&lead_id, |lead| lead.links.set(kind, id.as_str()));

            tracing::warn!(lead_id = %lead_id, entity_id = %id, "Recorded {} from a timed-out call", kind);
            let _ = events.send(
                TransitionEvent::for_lead(TransitionEventKind::Reconciled, &lead_id, stage)
                    .with_data(serde_json::json!({ "entityKind": kind, "entityId": id })),
            );
            drop(guard);
        });
    }

    fn revert(&self, optimistic: OptimisticMove, lead_id: &str) {
        let prior = optimistic.revert();
        self.emit(TransitionEvent::for_lead(
            TransitionEventKind::Reverted,
            lead_id,
            prior,
        ));
    }

    fn emit_failure(&self, lead_id: &str, stage: Stage, err: &TransitionError) {
        self.emit(
            TransitionEvent::for_lead(TransitionEventKind::Failed, lead_id, stage).with_data(
                serde_json::json!({
                    "kind": err.kind(),
                    "message": err.to_string(),
                    "retryable": err.retryable(),
                }),
            ),
        );
    }
}

/// Perform the remote mutation. Updates may be retried on transient errors.
async fn execute_plan(
    gateway: Arc<dyn StageEntityGateway>,
    plan: CommitPlan,
    update_retries: u32,
    retry_backoff: Duration,
) -> Result<Option<StageEntity>, GatewayError> {
    match plan {
        CommitPlan::Skip => Ok(None),
        CommitPlan::Create(entity) => {
            let created = gateway.create(&entity).await?;
            if created.id().is_none() {
                return Err(GatewayError::InvalidResponse(format!(
                    "created {} has no id",
                    entity.kind()
                )));
            }
            Ok(Some(created))
        }
        CommitPlan::Update { id, entity } => {
            let mut attempt = 0;
            loop {
                match gateway.update(&id, &entity).await {
                    Ok(updated) => {
                        let updated = match updated.id() {
                            Some(_) => updated,
                            None => updated.with_id(id.as_str()),
                        };
                        return Ok(Some(updated));
                    }
                    Err(e) if e.is_transient() && attempt < update_retries => {
                        attempt += 1;
                        tracing::warn!(entity_id = %id, attempt, error = %e, "Retrying {} update", entity.kind());
                        tokio::time::sleep(retry_backoff * attempt).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
