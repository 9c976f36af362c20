//! HTTP implementation of the stage entity gateway and lead directory

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::auth::CredentialProvider;
use super::entities::StageEntity;
use super::error::{ErrorBody, GatewayError, Result};
use super::{LeadDirectory, StageEntityGateway};
use crate::lead::Lead;
use crate::stages::EntityKind;

/// HTTP client addressing each entity kind's top-level collection
///
/// # Example
///
/// ```rust,no_run
/// use leadflow_core::gateway::{HttpStageGateway, StageEntityGateway, StaticCredentials};
/// use leadflow_core::stages::EntityKind;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = HttpStageGateway::new(
///     "http://localhost:3000/api",
///     Arc::new(StaticCredentials::new("token")),
///     Duration::from_secs(10),
/// )?;
/// let opportunity = gateway.get(EntityKind::Opportunity, "opp-1").await?;
/// # Ok(())
/// # }
/// ```
pub struct HttpStageGateway {
    base_url: String,
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpStageGateway {
    /// `connect_timeout` bounds connection setup only. Requests carry no
    /// total timeout: a sent mutation must be allowed to settle so a late
    /// result can still be reconciled by the caller.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            credentials,
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.collection())
    }

    fn item_url(&self, kind: EntityKind, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            kind.collection(),
            urlencoding::encode(id)
        )
    }

    /// Send with the current token; on 401 refresh once and resend
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let token = self.credentials.token().await?;
        let response = build(&self.client).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!("Gateway returned 401, refreshing credentials");
        let token = self.credentials.refresh().await.map_err(|e| match e {
            GatewayError::AuthExpired(msg) => GatewayError::AuthExpired(msg),
            other => GatewayError::AuthExpired(other.to_string()),
        })?;

        let response = build(&self.client).bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::AuthExpired(
                "credentials rejected after refresh".to_string(),
            ));
        }
        Ok(response)
    }

    async fn error_from(response: Response) -> GatewayError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

        let message = body
            .message
            .filter(|m| !m.is_empty())
            .or_else(|| (!text.is_empty()).then(|| text.clone()))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

        GatewayError::RequestFailed {
            status: status.as_u16(),
            message,
            field_errors: body
                .errors
                .into_iter()
                .map(|(field, messages)| (field, messages.into_vec()))
                .collect(),
        }
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(GatewayError::from)
    }
}

/// Lists come back bare or wrapped in `{ "data": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum LeadList {
    Bare(Vec<Lead>),
    Wrapped { data: Vec<Lead> },
}

#[async_trait]
impl StageEntityGateway for HttpStageGateway {
    async fn create(&self, entity: &StageEntity) -> Result<StageEntity> {
        let kind = entity.kind();
        let url = self.collection_url(kind);
        let body = entity.to_body()?;

        tracing::debug!(kind = ?kind, lead_id = %entity.lead_id(), "POST {}", url);
        let response = self
            .send(|client| {
                client
                    .post(&url)
                    .header(header::CONTENT_TYPE, "application/json")
                    .json(&body)
            })
            .await?;

        let value: Value = Self::handle_response(response).await?;
        StageEntity::from_body_with_id(kind, value)
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<StageEntity> {
        let url = self.item_url(kind, id);
        let response = self.send(|client| client.get(&url)).await?;
        let value: Value = Self::handle_response(response).await?;
        StageEntity::from_body(kind, value).map(|entity| match entity.id() {
            Some(_) => entity,
            None => entity.with_id(id),
        })
    }

    async fn update(&self, id: &str, entity: &StageEntity) -> Result<StageEntity> {
        let kind = entity.kind();
        let url = self.item_url(kind, id);
        let body = entity.to_body()?;

        tracing::debug!(kind = ?kind, id = %id, "PUT {}", url);
        let response = self
            .send(|client| {
                client
                    .put(&url)
                    .header(header::CONTENT_TYPE, "application/json")
                    .json(&body)
            })
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(entity.clone().with_id(id));
        }
        let value: Value = Self::handle_response(response).await?;
        StageEntity::from_body(kind, value).map(|updated| match updated.id() {
            Some(_) => updated,
            None => updated.with_id(id),
        })
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let url = self.item_url(kind, id);
        let response = self.send(|client| client.delete(&url)).await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl LeadDirectory for HttpStageGateway {
    async fn list_leads(&self) -> Result<Vec<Lead>> {
        let url = format!("{}/leads", self.base_url);
        let response = self.send(|client| client.get(&url)).await?;
        let list: LeadList = Self::handle_response(response).await?;
        Ok(match list {
            LeadList::Bare(leads) => leads,
            LeadList::Wrapped { data } => data,
        })
    }

    async fn get_lead(&self, id: &str) -> Result<Lead> {
        let url = format!("{}/leads/{}", self.base_url, urlencoding::encode(id));
        let response = self.send(|client| client.get(&url)).await?;
        Self::handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::auth::StaticCredentials;
    use crate::gateway::entities::Opportunity;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out "stale" first, "fresh" after a refresh
    struct RotatingCredentials {
        refreshes: AtomicUsize,
        refresh_ok: bool,
    }

    #[async_trait]
    impl CredentialProvider for RotatingCredentials {
        async fn token(&self) -> Result<String> {
            if self.refreshes.load(Ordering::SeqCst) == 0 {
                Ok("stale".to_string())
            } else {
                Ok("fresh".to_string())
            }
        }

        async fn refresh(&self) -> Result<String> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.refresh_ok {
                Ok("fresh".to_string())
            } else {
                Err(GatewayError::AuthExpired("refresh token revoked".to_string()))
            }
        }
    }

    fn gateway(server: &MockServer, credentials: Arc<dyn CredentialProvider>) -> HttpStageGateway {
        HttpStageGateway::new(server.uri(), credentials, Duration::from_secs(5)).unwrap()
    }

    fn opportunity() -> StageEntity {
        StageEntity::Opportunity(Opportunity {
            lead_id: "L-1".to_string(),
            part_number: Some("MAX3040EWE+".to_string()),
            quantity: Some(1000),
            region: Some("APAC".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_create_posts_to_collection_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/opportunities"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({ "leadId": "L-1", "quantity": 1000 })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "opp-1",
                "leadId": "L-1",
                "partNumber": "MAX3040EWE+",
                "quantity": 1000,
                "region": "APAC"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, Arc::new(StaticCredentials::new("secret")));
        let created = gw.create(&opportunity()).await.unwrap();
        assert_eq!(created.id(), Some("opp-1"));
        assert_eq!(created.kind(), EntityKind::Opportunity);
    }

    #[tokio::test]
    async fn test_create_accepts_numeric_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/opportunities"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "id": 42, "leadId": "L-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, Arc::new(StaticCredentials::new("secret")));
        let created = gw.create(&opportunity()).await.unwrap();
        assert_eq!(created.id(), Some("42"));
    }

    #[tokio::test]
    async fn test_update_puts_to_item_url() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/negotiations/neg-7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "leadId": "L-1",
                "targetPrice": 2.0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, Arc::new(StaticCredentials::new("secret")));
        let lead = Lead {
            id: "L-1".to_string(),
            target_price: Some(2.0),
            ..Default::default()
        };
        let entity = StageEntity::from_lead(EntityKind::Negotiation, &lead);
        let updated = gw.update("neg-7", &entity).await.unwrap();
        assert_eq!(updated.id(), Some("neg-7"));
    }

    #[tokio::test]
    async fn test_non_2xx_maps_to_typed_error_with_field_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/opportunities"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "message": "Validation failed",
                "errors": { "quantity": ["must be greater than 0"] }
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server, Arc::new(StaticCredentials::new("secret")));
        match gw.create(&opportunity()).await {
            Err(GatewayError::RequestFailed {
                status,
                message,
                field_errors,
            }) => {
                assert_eq!(status, 422);
                assert_eq!(message, "Validation failed");
                assert_eq!(field_errors["quantity"], vec!["must be greater than 0"]);
            }
            other => panic!("expected RequestFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/opportunities/opp-1"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/opportunities/opp-1"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": "opp-1", "leadId": "L-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let credentials = Arc::new(RotatingCredentials {
            refreshes: AtomicUsize::new(0),
            refresh_ok: true,
        });
        let gw = gateway(&server, credentials.clone());
        let entity = gw.get(EntityKind::Opportunity, "opp-1").await.unwrap();
        assert_eq!(entity.id(), Some("opp-1"));
        assert_eq!(credentials.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_is_auth_expired() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/po-received/po-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = Arc::new(RotatingCredentials {
            refreshes: AtomicUsize::new(0),
            refresh_ok: false,
        });
        let gw = gateway(&server, credentials);
        let err = gw.delete(EntityKind::PoReceived, "po-1").await.unwrap_err();
        assert!(err.is_auth_expired());
    }

    #[tokio::test]
    async fn test_list_leads_accepts_wrapped_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/leads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "id": "L-1", "title": "First" },
                    { "id": "L-2", "title": "Second", "stage": "opportunity" }
                ]
            })))
            .mount(&server)
            .await;

        let gw = gateway(&server, Arc::new(StaticCredentials::new("secret")));
        let leads = gw.list_leads().await.unwrap();
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[1].stage, crate::stages::Stage::Opportunity);
    }
}
