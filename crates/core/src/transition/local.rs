//! # Local Lead State
//!
//! The board's in-memory copy of every lead, the set of leads with a move in
//! flight, and the reversible optimistic stage change.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::lead::Lead;
use crate::stages::Stage;

/// Leads as the board currently shows them
#[derive(Debug, Default)]
pub struct LocalLeads {
    leads: RwLock<BTreeMap<String, Lead>>,
    pending: Mutex<HashSet<String>>,
}

impl LocalLeads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole board, keeping nothing from before
    pub fn replace_all(&self, leads: Vec<Lead>) {
        let mut map = self.leads.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
        for lead in leads {
            map.insert(lead.id.clone(), lead);
        }
    }

    pub fn upsert(&self, lead: Lead) {
        self.leads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(lead.id.clone(), lead);
    }

    pub fn get(&self, lead_id: &str) -> Option<Lead> {
        self.leads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(lead_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Lead> {
        self.leads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn stage_of(&self, lead_id: &str) -> Option<Stage> {
        self.leads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(lead_id)
            .map(|lead| lead.stage)
    }

    /// Mutate one lead in place; returns the updated copy
    pub fn update<F>(&self, lead_id: &str, f: F) -> Option<Lead>
    where
        F: FnOnce(&mut Lead),
    {
        let mut map = self.leads.write().unwrap_or_else(PoisonError::into_inner);
        map.get_mut(lead_id).map(|lead| {
            f(lead);
            lead.clone()
        })
    }

    pub fn is_pending(&self, lead_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(lead_id)
    }

    /// Mark `lead_id` pending. `None` if a move is already in flight.
    pub fn try_begin(self: &Arc<Self>, lead_id: &str) -> Option<PendingGuard> {
        let inserted = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(lead_id.to_string());

        inserted.then(|| PendingGuard {
            leads: Arc::clone(self),
            lead_id: lead_id.to_string(),
        })
    }
}

/// Holds the pending mark for a lead until dropped
#[derive(Debug)]
pub struct PendingGuard {
    leads: Arc<LocalLeads>,
    lead_id: String,
}

impl PendingGuard {
    pub fn lead_id(&self) -> &str {
        &self.lead_id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.leads
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.lead_id);
    }
}

/// Optimistic stage reassignment. Reverts on drop unless confirmed, so every
/// early return restores the prior stage.
#[derive(Debug)]
pub struct OptimisticMove {
    leads: Arc<LocalLeads>,
    lead_id: String,
    prior: Stage,
    settled: bool,
}

impl OptimisticMove {
    /// Show `lead_id` in `target` right away. `None` if the lead is unknown.
    pub fn apply(leads: &Arc<LocalLeads>, lead_id: &str, target: Stage) -> Option<Self> {
        let mut prior = None;
        leads.update(lead_id, |lead| {
            prior = Some(lead.stage);
            lead.stage = target;
        })?;

        prior.map(|prior| Self {
            leads: Arc::clone(leads),
            lead_id: lead_id.to_string(),
            prior,
            settled: false,
        })
    }

    /// Restore the prior stage now
    pub fn revert(mut self) -> Stage {
        self.restore();
        self.settled = true;
        self.prior
    }

    /// Keep the optimistic stage
    pub fn confirm(mut self) {
        self.settled = true;
    }

    fn restore(&self) {
        let prior = self.prior;
        self.leads.update(&self.lead_id, |lead| lead.stage = prior);
    }
}

impl Drop for OptimisticMove {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(lead_id = %self.lead_id, stage = %self.prior, "Reverting unsettled optimistic move");
            self.restore();
        }
    }
}
