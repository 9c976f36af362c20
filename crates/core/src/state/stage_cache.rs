//! # Stage Cache
//!
//! Durable local map from lead id to the lead's confirmed stage and the ids of
//! the stage entities created for it. The lead backend never stores these
//! links, so this table is the only place they survive a reload.
//!
//! Entries never expire. They are removed only by `clear` / `clear_all`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::db::LeadflowDb;
use crate::lead::{Lead, StageLinks};
use crate::stages::{EntityKind, Stage};

/// Persisted record for one lead
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCacheEntry {
    pub lead_id: String,
    pub stage: Stage,
    #[serde(flatten)]
    pub links: StageLinks,
    pub updated_at: DateTime<Utc>,
}

impl StageCacheEntry {
    /// Overlay this entry onto `lead`; cached values win over stale lead fields
    pub fn overlay(&self, lead: &mut Lead) {
        lead.stage = self.stage;
        lead.links.merge(&self.links);
    }
}

/// SQLite-backed stage cache using the shared LeadflowDb connection
#[derive(Clone)]
pub struct StageCache {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT lead_id, stage, opportunity_id, quotation_supplier_id,
           quotation_customer_id, negotiation_id, po_received_id, updated_at
    FROM stage_cache
"#;

impl StageCache {
    pub fn new(db: &LeadflowDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    pub fn get(&self, lead_id: &str) -> Result<Option<StageCacheEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            &format!("{} WHERE lead_id = ?1", SELECT_COLUMNS),
            params![lead_id],
            Self::row_to_entry,
        )
        .optional()
        .with_context(|| format!("Failed to read stage cache for lead {}", lead_id))
    }

    /// Write `stage` and every id set in `links`; ids not set keep their
    /// cached value. Stamps `updated_at`.
    pub fn put(&self, lead_id: &str, stage: Stage, links: &StageLinks) -> Result<StageCacheEntry> {
        let now = Utc::now();
        {
            let conn = self
                .conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

            conn.execute(
                r#"
                INSERT INTO stage_cache
                    (lead_id, stage, opportunity_id, quotation_supplier_id,
                     quotation_customer_id, negotiation_id, po_received_id, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(lead_id) DO UPDATE SET
                    stage = excluded.stage,
                    opportunity_id = COALESCE(excluded.opportunity_id, stage_cache.opportunity_id),
                    quotation_supplier_id = COALESCE(excluded.quotation_supplier_id, stage_cache.quotation_supplier_id),
                    quotation_customer_id = COALESCE(excluded.quotation_customer_id, stage_cache.quotation_customer_id),
                    negotiation_id = COALESCE(excluded.negotiation_id, stage_cache.negotiation_id),
                    po_received_id = COALESCE(excluded.po_received_id, stage_cache.po_received_id),
                    updated_at = excluded.updated_at
                "#,
                params![
                    lead_id,
                    stage.as_str(),
                    links.get(EntityKind::Opportunity),
                    links.get(EntityKind::QuotationSupplier),
                    links.get(EntityKind::QuotationCustomer),
                    links.get(EntityKind::Negotiation),
                    links.get(EntityKind::PoReceived),
                    now.to_rfc3339(),
                ],
            )
            .with_context(|| format!("Failed to write stage cache for lead {}", lead_id))?;
        }

        tracing::debug!(lead_id = %lead_id, stage = %stage, "Stage cache written");

        self.get(lead_id)?
            .ok_or_else(|| anyhow::anyhow!("Stage cache entry for {} vanished after write", lead_id))
    }

    /// Remove the entry for one lead (e.g. when the lead is deleted)
    pub fn clear(&self, lead_id: &str) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let affected = conn.execute(
            "DELETE FROM stage_cache WHERE lead_id = ?1",
            params![lead_id],
        )?;
        Ok(affected > 0)
    }

    pub fn clear_all(&self) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let affected = conn.execute("DELETE FROM stage_cache", [])?;
        tracing::info!("Cleared {} stage cache entries", affected);
        Ok(affected)
    }

    /// All entries, most recently updated first
    pub fn list(&self) -> Result<Vec<StageCacheEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(&format!("{} ORDER BY updated_at DESC", SELECT_COLUMNS))?;
        let entries = stmt
            .query_map([], Self::row_to_entry)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list stage cache")?;

        Ok(entries)
    }

    /// Lead with its cached stage and entity ids overlaid
    pub fn enrich(&self, lead: &Lead) -> Result<Lead> {
        let mut enriched = lead.clone();
        if let Some(entry) = self.get(&lead.id)? {
            entry.overlay(&mut enriched);
        }
        Ok(enriched)
    }

    pub fn enrich_many(&self, leads: &[Lead]) -> Result<Vec<Lead>> {
        let entries: HashMap<String, StageCacheEntry> = self
            .list()?
            .into_iter()
            .map(|entry| (entry.lead_id.clone(), entry))
            .collect();

        Ok(leads
            .iter()
            .map(|lead| {
                let mut enriched = lead.clone();
                if let Some(entry) = entries.get(&lead.id) {
                    entry.overlay(&mut enriched);
                }
                enriched
            })
            .collect())
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<StageCacheEntry> {
        let lead_id: String = row.get(0)?;
        let stage: String = row.get(1)?;
        let updated_at_str: String = row.get(7)?;

        let stage = stage.parse::<Stage>().unwrap_or_else(|e| {
            tracing::warn!(lead_id = %lead_id, "Stage cache holds {}, treating as initial stage", e);
            Stage::default()
        });

        Ok(StageCacheEntry {
            lead_id,
            stage,
            links: StageLinks {
                opportunity_id: row.get(2)?,
                quotation_supplier_id: row.get(3)?,
                quotation_customer_id: row.get(4)?,
                negotiation_id: row.get(5)?,
                po_received_id: row.get(6)?,
            },
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
