//! # Leadflow Database
//!
//! Single SQLite database for local engine state at `.leadflow/leadflow.db`.
//! Holds the one authoritative stage cache table.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::io::get_runtime_path;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Database file name inside the runtime directory
pub const DB_FILE: &str = "leadflow.db";

/// Shared handle to the local database
#[derive(Clone)]
pub struct LeadflowDb {
    conn: Arc<Mutex<Connection>>,
}

impl LeadflowDb {
    /// Open or create the database in the runtime directory
    pub fn open() -> Result<Self> {
        Self::open_at(get_runtime_path().join(DB_FILE))
    }

    /// Open database at a specific path (useful for testing)
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open leadflow database")?;
        Self::from_connection(conn)
    }

    /// Non-durable database, for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Writes must be on disk before the orchestrator reports a commit
        conn.pragma_update(None, "synchronous", "FULL")
            .context("Failed to set synchronous pragma")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - stage cache
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS stage_cache (
                lead_id TEXT PRIMARY KEY,
                stage TEXT NOT NULL,
                opportunity_id TEXT,
                quotation_supplier_id TEXT,
                quotation_customer_id TEXT,
                negotiation_id TEXT,
                po_received_id TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_stage_cache_stage ON stage_cache(stage)",
            [],
        )?;

        tracing::info!(
            "LeadflowDb initialized with schema version {}",
            SCHEMA_VERSION
        );

        Ok(())
    }
}
