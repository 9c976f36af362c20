//! # Stage Entities
//!
//! Payloads of the five backend records owned by pipeline stages. Each lives
//! in its own collection with its own id space and points back at the lead.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{GatewayError, Result};
use crate::lead::Lead;
use crate::stages::EntityKind;

/// Backends hand out ids as strings or integers
fn id_from_json<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id)),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a string or numeric id, got {}",
            other
        ))),
    }
}

fn lead_ref_from_json<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    id_from_json(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    #[serde(
        default,
        deserialize_with = "id_from_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lead_ref_from_json")]
    pub lead_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub part_number: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub target_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationSupplier {
    #[serde(
        default,
        deserialize_with = "id_from_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lead_ref_from_json")]
    pub lead_id: String,
    #[serde(default, deserialize_with = "id_from_json")]
    pub opportunity_id: Option<String>,
    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub lead_time_weeks: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationCustomer {
    #[serde(
        default,
        deserialize_with = "id_from_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lead_ref_from_json")]
    pub lead_id: String,
    #[serde(default, deserialize_with = "id_from_json")]
    pub quotation_supplier_id: Option<String>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub gross_margin: Option<f64>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Negotiation {
    #[serde(
        default,
        deserialize_with = "id_from_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lead_ref_from_json")]
    pub lead_id: String,
    #[serde(default, deserialize_with = "id_from_json")]
    pub quotation_customer_id: Option<String>,
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub counter_offer: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoReceived {
    #[serde(
        default,
        deserialize_with = "id_from_json",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lead_ref_from_json")]
    pub lead_id: String,
    #[serde(default, deserialize_with = "id_from_json")]
    pub negotiation_id: Option<String>,
    #[serde(default)]
    pub po_number: Option<String>,
    #[serde(default)]
    pub po_value: Option<f64>,
    #[serde(default)]
    pub awb_number: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// One record owned by a pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageEntity {
    Opportunity(Opportunity),
    QuotationSupplier(QuotationSupplier),
    QuotationCustomer(QuotationCustomer),
    Negotiation(Negotiation),
    PoReceived(PoReceived),
}

impl StageEntity {
    /// Draw the fields relevant to `kind` from a (merged) lead
    pub fn from_lead(kind: EntityKind, lead: &Lead) -> Self {
        let lead_id = lead.id.clone();
        let link = |k: EntityKind| lead.links.get(k).map(str::to_string);
        match kind {
            EntityKind::Opportunity => StageEntity::Opportunity(Opportunity {
                id: None,
                lead_id,
                title: lead.title.clone(),
                contact_person: lead.contact_person.clone(),
                organization: lead.organization.clone(),
                part_number: lead.part_number.clone(),
                manufacturer: lead.manufacturer.clone(),
                quantity: lead.quantity,
                region: lead.region.clone(),
                target_price: lead.target_price,
            }),
            EntityKind::QuotationSupplier => StageEntity::QuotationSupplier(QuotationSupplier {
                id: None,
                lead_id,
                opportunity_id: link(EntityKind::Opportunity),
                supplier_name: lead.supplier_name.clone(),
                unit_price: lead.supplier_price,
                quantity: lead.quantity,
                lead_time_weeks: lead.lead_time_weeks,
                currency: lead.currency.clone(),
            }),
            EntityKind::QuotationCustomer => StageEntity::QuotationCustomer(QuotationCustomer {
                id: None,
                lead_id,
                quotation_supplier_id: link(EntityKind::QuotationSupplier),
                unit_price: lead.selling_price,
                gross_margin: lead.gross_margin,
                quantity: lead.quantity,
                currency: lead.currency.clone(),
            }),
            EntityKind::Negotiation => StageEntity::Negotiation(Negotiation {
                id: None,
                lead_id,
                quotation_customer_id: link(EntityKind::QuotationCustomer),
                target_price: lead.target_price,
                counter_offer: lead.counter_offer,
                notes: lead.negotiation_notes.clone(),
            }),
            EntityKind::PoReceived => StageEntity::PoReceived(PoReceived {
                id: None,
                lead_id,
                negotiation_id: link(EntityKind::Negotiation),
                po_number: lead.po_number.clone(),
                po_value: lead.po_value,
                awb_number: lead.awb_number.clone(),
                delivery_date: lead.delivery_date.clone(),
                currency: lead.currency.clone(),
            }),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            StageEntity::Opportunity(_) => EntityKind::Opportunity,
            StageEntity::QuotationSupplier(_) => EntityKind::QuotationSupplier,
            StageEntity::QuotationCustomer(_) => EntityKind::QuotationCustomer,
            StageEntity::Negotiation(_) => EntityKind::Negotiation,
            StageEntity::PoReceived(_) => EntityKind::PoReceived,
        }
    }

    pub fn id(&self) -> Option<&str> {
        let id = match self {
            StageEntity::Opportunity(e) => &e.id,
            StageEntity::QuotationSupplier(e) => &e.id,
            StageEntity::QuotationCustomer(e) => &e.id,
            StageEntity::Negotiation(e) => &e.id,
            StageEntity::PoReceived(e) => &e.id,
        };
        id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn lead_id(&self) -> &str {
        match self {
            StageEntity::Opportunity(e) => &e.lead_id,
            StageEntity::QuotationSupplier(e) => &e.lead_id,
            StageEntity::QuotationCustomer(e) => &e.lead_id,
            StageEntity::Negotiation(e) => &e.lead_id,
            StageEntity::PoReceived(e) => &e.lead_id,
        }
    }

    pub fn with_id(mut self, new_id: impl Into<String>) -> Self {
        let id = match &mut self {
            StageEntity::Opportunity(e) => &mut e.id,
            StageEntity::QuotationSupplier(e) => &mut e.id,
            StageEntity::QuotationCustomer(e) => &mut e.id,
            StageEntity::Negotiation(e) => &mut e.id,
            StageEntity::PoReceived(e) => &mut e.id,
        };
        *id = Some(new_id.into());
        self
    }

    /// Untagged JSON body sent to the entity's collection
    pub fn to_body(&self) -> Result<Value> {
        let value = match self {
            StageEntity::Opportunity(e) => serde_json::to_value(e)?,
            StageEntity::QuotationSupplier(e) => serde_json::to_value(e)?,
            StageEntity::QuotationCustomer(e) => serde_json::to_value(e)?,
            StageEntity::Negotiation(e) => serde_json::to_value(e)?,
            StageEntity::PoReceived(e) => serde_json::to_value(e)?,
        };
        Ok(value)
    }

    /// Parse a collection response body as `kind`
    pub fn from_body(kind: EntityKind, body: Value) -> Result<Self> {
        let entity = match kind {
            EntityKind::Opportunity => StageEntity::Opportunity(serde_json::from_value(body)?),
            EntityKind::QuotationSupplier => {
                StageEntity::QuotationSupplier(serde_json::from_value(body)?)
            }
            EntityKind::QuotationCustomer => {
                StageEntity::QuotationCustomer(serde_json::from_value(body)?)
            }
            EntityKind::Negotiation => StageEntity::Negotiation(serde_json::from_value(body)?),
            EntityKind::PoReceived => StageEntity::PoReceived(serde_json::from_value(body)?),
        };
        Ok(entity)
    }

    /// Like `from_body`, but the backend must have assigned an id
    pub(crate) fn from_body_with_id(kind: EntityKind, body: Value) -> Result<Self> {
        let entity = Self::from_body(kind, body)?;
        if entity.id().is_none() {
            return Err(GatewayError::InvalidResponse(format!(
                "{} response is missing an id",
                kind.display_name()
            )));
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::StageLinks;
    use serde_json::json;

    #[test]
    fn test_opportunity_from_lead() {
        let lead = Lead {
            id: "L-7".to_string(),
            title: Some("Sensor buy".to_string()),
            part_number: Some("MAX3040EWE+".to_string()),
            quantity: Some(1000),
            region: Some("APAC".to_string()),
            ..Default::default()
        };

        let entity = StageEntity::from_lead(EntityKind::Opportunity, &lead);
        assert_eq!(entity.kind(), EntityKind::Opportunity);
        assert_eq!(entity.lead_id(), "L-7");
        assert_eq!(entity.id(), None);

        let body = entity.to_body().unwrap();
        assert_eq!(body["partNumber"], "MAX3040EWE+");
        assert_eq!(body["quantity"], 1000);
        assert_eq!(body["leadId"], "L-7");
        assert!(body.get("id").is_none());
        assert!(body.get("kind").is_none());
    }

    #[test]
    fn test_payload_carries_predecessor_link() {
        let lead = Lead {
            id: "L-8".to_string(),
            selling_price: Some(2.4),
            gross_margin: Some(18.0),
            links: StageLinks::default().with(EntityKind::QuotationSupplier, "qs-3"),
            ..Default::default()
        };

        let body = StageEntity::from_lead(EntityKind::QuotationCustomer, &lead)
            .to_body()
            .unwrap();
        assert_eq!(body["quotationSupplierId"], "qs-3");
        assert_eq!(body["unitPrice"], 2.4);
    }

    #[test]
    fn test_from_body_requires_id_when_asked() {
        let body = json!({ "leadId": "L-9", "targetPrice": 1.1 });
        assert!(StageEntity::from_body(EntityKind::Negotiation, body.clone()).is_ok());
        assert!(matches!(
            StageEntity::from_body_with_id(EntityKind::Negotiation, body),
            Err(GatewayError::InvalidResponse(_))
        ));

        let entity = StageEntity::from_body_with_id(
            EntityKind::Negotiation,
            json!({ "id": "neg-1", "leadId": "L-9" }),
        )
        .unwrap();
        assert_eq!(entity.id(), Some("neg-1"));
    }

    #[test]
    fn test_numeric_ids_and_missing_lead_ref_are_accepted() {
        let entity = StageEntity::from_body_with_id(
            EntityKind::QuotationCustomer,
            json!({ "id": 42, "quotationSupplierId": 7, "unitPrice": 2.4 }),
        )
        .unwrap();
        assert_eq!(entity.id(), Some("42"));
        assert_eq!(entity.lead_id(), "");
        match entity {
            StageEntity::QuotationCustomer(qc) => {
                assert_eq!(qc.quotation_supplier_id.as_deref(), Some("7"))
            }
            other => panic!("expected a quotation customer, got {other:?}"),
        }

        assert!(matches!(
            StageEntity::from_body(EntityKind::Opportunity, json!({ "id": ["opp"] })),
            Err(GatewayError::Json(_))
        ));
    }
}
