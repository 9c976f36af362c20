//! # Leads
//!
//! The lead record as the board holds it, the closed set of addressable lead
//! fields, and the per-stage entity ids linked to a lead.
//!
//! The lead backend never stores the entity ids; they arrive through the
//! stage cache and are overlaid onto the lead before validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::stages::{EntityKind, Stage};

/// A field of a lead that stages can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeadField {
    Title,
    ContactPerson,
    Organization,
    Value,
    Currency,
    PartNumber,
    Manufacturer,
    Quantity,
    Region,
    TargetPrice,
    SupplierName,
    SupplierPrice,
    LeadTimeWeeks,
    SellingPrice,
    GrossMargin,
    NegotiationNotes,
    CounterOffer,
    PoNumber,
    PoValue,
    AwbNumber,
    DeliveryDate,
}

impl LeadField {
    pub const ALL: [LeadField; 21] = [
        LeadField::Title,
        LeadField::ContactPerson,
        LeadField::Organization,
        LeadField::Value,
        LeadField::Currency,
        LeadField::PartNumber,
        LeadField::Manufacturer,
        LeadField::Quantity,
        LeadField::Region,
        LeadField::TargetPrice,
        LeadField::SupplierName,
        LeadField::SupplierPrice,
        LeadField::LeadTimeWeeks,
        LeadField::SellingPrice,
        LeadField::GrossMargin,
        LeadField::NegotiationNotes,
        LeadField::CounterOffer,
        LeadField::PoNumber,
        LeadField::PoValue,
        LeadField::AwbNumber,
        LeadField::DeliveryDate,
    ];

    /// Wire name (camelCase)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::ContactPerson => "contactPerson",
            Self::Organization => "organization",
            Self::Value => "value",
            Self::Currency => "currency",
            Self::PartNumber => "partNumber",
            Self::Manufacturer => "manufacturer",
            Self::Quantity => "quantity",
            Self::Region => "region",
            Self::TargetPrice => "targetPrice",
            Self::SupplierName => "supplierName",
            Self::SupplierPrice => "supplierPrice",
            Self::LeadTimeWeeks => "leadTimeWeeks",
            Self::SellingPrice => "sellingPrice",
            Self::GrossMargin => "grossMargin",
            Self::NegotiationNotes => "negotiationNotes",
            Self::CounterOffer => "counterOffer",
            Self::PoNumber => "poNumber",
            Self::PoValue => "poValue",
            Self::AwbNumber => "awbNumber",
            Self::DeliveryDate => "deliveryDate",
        }
    }

    /// Human label for field-collection forms
    pub fn label(&self) -> &'static str {
        match self {
            Self::Title => "Title",
            Self::ContactPerson => "Contact person",
            Self::Organization => "Organization",
            Self::Value => "Deal value",
            Self::Currency => "Currency",
            Self::PartNumber => "Part number",
            Self::Manufacturer => "Manufacturer",
            Self::Quantity => "Quantity",
            Self::Region => "Region",
            Self::TargetPrice => "Target price",
            Self::SupplierName => "Supplier name",
            Self::SupplierPrice => "Supplier unit price",
            Self::LeadTimeWeeks => "Lead time (weeks)",
            Self::SellingPrice => "Selling unit price",
            Self::GrossMargin => "Gross margin (%)",
            Self::NegotiationNotes => "Negotiation notes",
            Self::CounterOffer => "Counter offer",
            Self::PoNumber => "PO number",
            Self::PoValue => "PO value",
            Self::AwbNumber => "AWB number",
            Self::DeliveryDate => "Delivery date",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Value
                | Self::Quantity
                | Self::TargetPrice
                | Self::SupplierPrice
                | Self::LeadTimeWeeks
                | Self::SellingPrice
                | Self::GrossMargin
                | Self::CounterOffer
                | Self::PoValue
        )
    }

    /// Integer-valued numeric fields
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Quantity | Self::LeadTimeWeeks)
    }
}

impl fmt::Display for LeadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadField {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| FieldError::UnknownField(s.to_string()))
    }
}

/// Errors raised while patching lead fields
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FieldError {
    #[error("unknown lead field: {0}")]
    UnknownField(String),

    #[error("invalid value for {field}: expected {expected}, got {value}")]
    InvalidValue {
        field: LeadField,
        expected: &'static str,
        value: String,
    },
}

/// Borrowed view of a single field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Absent,
    Text(&'a str),
    Number(f64),
}

impl FieldValue<'_> {
    /// Undefined, empty text, or a number that is not strictly positive
    pub fn is_missing(&self) -> bool {
        match self {
            FieldValue::Absent => true,
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::Number(n) => !n.is_finite() || *n <= 0.0,
        }
    }
}

fn text(value: &Option<String>) -> FieldValue<'_> {
    value
        .as_deref()
        .map(FieldValue::Text)
        .unwrap_or(FieldValue::Absent)
}

fn number(value: Option<f64>) -> FieldValue<'static> {
    value.map(FieldValue::Number).unwrap_or(FieldValue::Absent)
}

fn integer(value: Option<i64>) -> FieldValue<'static> {
    value
        .map(|n| FieldValue::Number(n as f64))
        .unwrap_or(FieldValue::Absent)
}

/// Ids of the stage entities created for a lead
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opportunity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotation_supplier_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotation_customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub po_received_id: Option<String>,
}

impl StageLinks {
    /// Id of the `kind` entity, ignoring blank ids
    pub fn get(&self, kind: EntityKind) -> Option<&str> {
        let id = match kind {
            EntityKind::Opportunity => &self.opportunity_id,
            EntityKind::QuotationSupplier => &self.quotation_supplier_id,
            EntityKind::QuotationCustomer => &self.quotation_customer_id,
            EntityKind::Negotiation => &self.negotiation_id,
            EntityKind::PoReceived => &self.po_received_id,
        };
        id.as_deref().filter(|id| !id.trim().is_empty())
    }

    pub fn set(&mut self, kind: EntityKind, id: impl Into<String>) {
        let slot = match kind {
            EntityKind::Opportunity => &mut self.opportunity_id,
            EntityKind::QuotationSupplier => &mut self.quotation_supplier_id,
            EntityKind::QuotationCustomer => &mut self.quotation_customer_id,
            EntityKind::Negotiation => &mut self.negotiation_id,
            EntityKind::PoReceived => &mut self.po_received_id,
        };
        *slot = Some(id.into());
    }

    pub fn with(mut self, kind: EntityKind, id: impl Into<String>) -> Self {
        self.set(kind, id);
        self
    }

    /// Overlay every id set in `other`
    pub fn merge(&mut self, other: &StageLinks) {
        for kind in EntityKind::ALL {
            if let Some(id) = other.get(kind) {
                self.set(kind, id);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

/// The central sales record moved through the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub stage: Stage,

    // Opportunity
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

    // Quotations
    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub supplier_price: Option<f64>,
    #[serde(default)]
    pub lead_time_weeks: Option<i64>,
    #[serde(default)]
    pub selling_price: Option<f64>,
    #[serde(default)]
    pub gross_margin: Option<f64>,

    // Negotiation
    #[serde(default)]
    pub negotiation_notes: Option<String>,
    #[serde(default)]
    pub counter_offer: Option<f64>,

    // Purchase order
    #[serde(default)]
    pub po_number: Option<String>,
    #[serde(default)]
    pub po_value: Option<f64>,
    #[serde(default)]
    pub awb_number: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,

    #[serde(flatten)]
    pub links: StageLinks,
}

impl Lead {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn field(&self, field: LeadField) -> FieldValue<'_> {
        match field {
            LeadField::Title => text(&self.title),
            LeadField::ContactPerson => text(&self.contact_person),
            LeadField::Organization => text(&self.organization),
            LeadField::Value => number(self.value),
            LeadField::Currency => text(&self.currency),
            LeadField::PartNumber => text(&self.part_number),
            LeadField::Manufacturer => text(&self.manufacturer),
            LeadField::Quantity => integer(self.quantity),
            LeadField::Region => text(&self.region),
            LeadField::TargetPrice => number(self.target_price),
            LeadField::SupplierName => text(&self.supplier_name),
            LeadField::SupplierPrice => number(self.supplier_price),
            LeadField::LeadTimeWeeks => integer(self.lead_time_weeks),
            LeadField::SellingPrice => number(self.selling_price),
            LeadField::GrossMargin => number(self.gross_margin),
            LeadField::NegotiationNotes => text(&self.negotiation_notes),
            LeadField::CounterOffer => number(self.counter_offer),
            LeadField::PoNumber => text(&self.po_number),
            LeadField::PoValue => number(self.po_value),
            LeadField::AwbNumber => text(&self.awb_number),
            LeadField::DeliveryDate => text(&self.delivery_date),
        }
    }

    /// Set one field from a JSON value. `null` clears the field.
    pub fn set_field(&mut self, field: LeadField, value: &Value) -> Result<(), FieldError> {
        if field.is_numeric() {
            let parsed = parse_number(field, value)?;
            if field.is_integer() {
                let int = match parsed {
                    Some(n) if n.fract() != 0.0 => {
                        return Err(invalid(field, "an integer", value));
                    }
                    Some(n) => Some(n as i64),
                    None => None,
                };
                match field {
                    LeadField::Quantity => self.quantity = int,
                    _ => self.lead_time_weeks = int,
                }
                return Ok(());
            }
            let slot = match field {
                LeadField::Value => &mut self.value,
                LeadField::TargetPrice => &mut self.target_price,
                LeadField::SupplierPrice => &mut self.supplier_price,
                LeadField::SellingPrice => &mut self.selling_price,
                LeadField::GrossMargin => &mut self.gross_margin,
                LeadField::CounterOffer => &mut self.counter_offer,
                _ => &mut self.po_value,
            };
            *slot = parsed;
            return Ok(());
        }

        let parsed = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => return Err(invalid(field, "a string", value)),
        };
        let slot = match field {
            LeadField::Title => &mut self.title,
            LeadField::ContactPerson => &mut self.contact_person,
            LeadField::Organization => &mut self.organization,
            LeadField::Currency => &mut self.currency,
            LeadField::PartNumber => &mut self.part_number,
            LeadField::Manufacturer => &mut self.manufacturer,
            LeadField::Region => &mut self.region,
            LeadField::SupplierName => &mut self.supplier_name,
            LeadField::NegotiationNotes => &mut self.negotiation_notes,
            LeadField::PoNumber => &mut self.po_number,
            LeadField::AwbNumber => &mut self.awb_number,
            _ => &mut self.delivery_date,
        };
        *slot = parsed;
        Ok(())
    }

    /// Apply collected extra fields on top of this lead
    pub fn apply_extra(&mut self, extra: &ExtraFields) -> Result<(), FieldError> {
        for (field, value) in extra.iter() {
            self.set_field(*field, value)?;
        }
        Ok(())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}

fn parse_number(field: LeadField, value: &Value) -> Result<Option<f64>, FieldError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(field, "a number", value)),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(field, "a number", value)),
        _ => Err(invalid(field, "a number", value)),
    }
}

fn invalid(field: LeadField, expected: &'static str, value: &Value) -> FieldError {
    FieldError::InvalidValue {
        field,
        expected,
        value: value.to_string(),
    }
}

/// Field values collected from the user to complete a stage move
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraFields(BTreeMap<LeadField, Value>);

impl ExtraFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: LeadField, value: impl Into<Value>) -> Self {
        self.0.insert(field, value.into());
        self
    }

    pub fn insert(&mut self, field: LeadField, value: impl Into<Value>) {
        self.0.insert(field, value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LeadField, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(LeadField, Value)> for ExtraFields {
    fn from_iter<I: IntoIterator<Item = (LeadField, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
