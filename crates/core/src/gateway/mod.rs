//! # Stage Entity Gateway
//!
//! Per-resource remote boundary for the five stage entity collections. The
//! gateway knows nothing about stage order or validation; the orchestrator
//! decides what to create or update.
//!
//! ## Architecture
//!
//! ```text
//! TransitionOrchestrator
//!          ↓
//!   StageEntityGateway (trait)
//!          ↓
//!   HttpStageGateway ── CredentialProvider (bearer, one refresh on 401)
//! ```

pub mod auth;
pub mod entities;
pub mod error;
pub mod http;

use async_trait::async_trait;

use crate::lead::Lead;
use crate::stages::EntityKind;

pub use auth::{CredentialProvider, StaticCredentials};
pub use entities::{
    Negotiation, Opportunity, PoReceived, QuotationCustomer, QuotationSupplier, StageEntity,
};
pub use error::{GatewayError, Result};
pub use http::HttpStageGateway;

/// CRUD over the stage entity collections
#[async_trait]
pub trait StageEntityGateway: Send + Sync {
    /// Create a record; the returned entity carries the generated id
    async fn create(&self, entity: &StageEntity) -> Result<StageEntity>;

    async fn get(&self, kind: EntityKind, id: &str) -> Result<StageEntity>;

    /// Update record `id` of `entity.kind()` with the fields in `entity`
    async fn update(&self, id: &str, entity: &StageEntity) -> Result<StageEntity>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;
}

/// Read access to the lead backend for board hydration
#[async_trait]
pub trait LeadDirectory: Send + Sync {
    async fn list_leads(&self) -> Result<Vec<Lead>>;

    async fn get_lead(&self, id: &str) -> Result<Lead>;
}
