// src/document.rs

use crate::schema::{DOCUMENT_TYPE, DocumentType, ITEMS, Schema, UnknownDocumentType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    UnknownType(#[from] UnknownDocumentType),

    #[error("document body could not be decoded: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A transaction document, tagged by `document_type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "document_type", rename_all = "snake_case", try_from = "Value")]
pub enum Document {
    GstInvoice(GstInvoice),
    BillOfSupply(BillOfSupply),
    Quotation(Quotation),
    PaymentReceipt(PaymentReceipt),
}

/// A single line on an invoice, bill or quotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub hsn_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Keys the model emitted that are not part of the canonical item, and
    /// canonical values that could not be coerced.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Key under which a line that is not an object (e.g. a bare string) is kept.
pub const RAW_ITEM: &str = "raw";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GstInvoice {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub customer_gstin: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub customer_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::items", skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<LineItem>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub cgst_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub cgst_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub sgst_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub sgst_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Composition-scheme bill: no per-line tax breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillOfSupply {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub bill_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub bill_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::items", skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<LineItem>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quotation {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub quotation_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub quotation_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::items", skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<LineItem>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub tax_note: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub total_estimate: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub receipt_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub received_from: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub amount_received: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub payment_mode: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub payment_for: Option<String>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub previous_balance: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A canonical field as the validator sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(Option<&'a str>),
    Number(Option<f64>),
}

impl FieldValue<'_> {
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Text(None) | FieldValue::Number(None))
    }
}

impl TryFrom<Value> for Document {
    type Error = DocumentError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Document::from_value(value)
    }
}

impl Document {
    /// Decode an untyped model reply. Only the tag can make this fail. Every
    /// other field decodes leniently, and a canonical value that cannot be
    /// coerced is kept verbatim in `extra` under its own key.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(mut map) = value else {
            return Err(UnknownDocumentType::Missing.into());
        };
        let document_type = match map.remove(DOCUMENT_TYPE) {
            Some(Value::String(tag)) => tag.parse::<DocumentType>()?,
            Some(Value::Null) | None => return Err(UnknownDocumentType::Missing.into()),
            Some(other) => return Err(UnknownDocumentType::Unknown(other.to_string()).into()),
        };
        let raw = map.clone();
        let body = Value::Object(map);
        let mut document = match document_type {
            DocumentType::GstInvoice => Document::GstInvoice(serde_json::from_value(body)?),
            DocumentType::BillOfSupply => Document::BillOfSupply(serde_json::from_value(body)?),
            DocumentType::Quotation => Document::Quotation(serde_json::from_value(body)?),
            DocumentType::PaymentReceipt => {
                Document::PaymentReceipt(serde_json::from_value(body)?)
            }
        };

        let has_items = document.schema().required.contains(&ITEMS);
        let unconverted: Vec<(String, Value)> = raw
            .into_iter()
            .filter(|(key, value)| {
                if value.is_null() {
                    return false;
                }
                if key == ITEMS {
                    return has_items && !value.is_array();
                }
                document.field(key).is_some_and(|f| f.is_absent())
            })
            .collect();
        document.extra_mut().extend(unconverted);
        Ok(document)
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            Document::GstInvoice(_) => DocumentType::GstInvoice,
            Document::BillOfSupply(_) => DocumentType::BillOfSupply,
            Document::Quotation(_) => DocumentType::Quotation,
            Document::PaymentReceipt(_) => DocumentType::PaymentReceipt,
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.document_type().schema()
    }

    /// Invoice / bill / quotation / receipt number, whichever applies.
    pub fn number(&self) -> Option<&str> {
        let number = match self {
            Document::GstInvoice(d) => &d.invoice_number,
            Document::BillOfSupply(d) => &d.bill_number,
            Document::Quotation(d) => &d.quotation_number,
            Document::PaymentReceipt(d) => &d.receipt_number,
        };
        number.as_deref().filter(|n| !n.trim().is_empty())
    }

    pub fn items(&self) -> &[LineItem] {
        match self {
            Document::GstInvoice(d) => &d.items,
            Document::BillOfSupply(d) => &d.items,
            Document::Quotation(d) => &d.items,
            Document::PaymentReceipt(_) => &[],
        }
    }

    pub fn extra_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            Document::GstInvoice(d) => &mut d.extra,
            Document::BillOfSupply(d) => &mut d.extra,
            Document::Quotation(d) => &mut d.extra,
            Document::PaymentReceipt(d) => &mut d.extra,
        }
    }

    /// Scalar canonical field by wire name. `None` when this document type
    /// has no such field; `items` is reached through [`Document::items`].
    pub fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        use FieldValue::{Number, Text};
        Some(match self {
            Document::GstInvoice(d) => match name {
                "invoice_number" => Text(d.invoice_number.as_deref()),
                "invoice_date" => Text(d.invoice_date.as_deref()),
                "customer_name" => Text(d.customer_name.as_deref()),
                "customer_gstin" => Text(d.customer_gstin.as_deref()),
                "customer_address" => Text(d.customer_address.as_deref()),
                "subtotal" => Number(d.subtotal),
                "cgst_rate" => Number(d.cgst_rate),
                "cgst_amount" => Number(d.cgst_amount),
                "sgst_rate" => Number(d.sgst_rate),
                "sgst_amount" => Number(d.sgst_amount),
                "total" => Number(d.total),
                _ => return None,
            },
            Document::BillOfSupply(d) => match name {
                "bill_number" => Text(d.bill_number.as_deref()),
                "bill_date" => Text(d.bill_date.as_deref()),
                "customer_name" => Text(d.customer_name.as_deref()),
                "total" => Number(d.total),
                "note" => Text(d.note.as_deref()),
                _ => return None,
            },
            Document::Quotation(d) => match name {
                "quotation_number" => Text(d.quotation_number.as_deref()),
                "quotation_date" => Text(d.quotation_date.as_deref()),
                "valid_until" => Text(d.valid_until.as_deref()),
                "customer_name" => Text(d.customer_name.as_deref()),
                "subtotal" => Number(d.subtotal),
                "tax_note" => Text(d.tax_note.as_deref()),
                "total_estimate" => Number(d.total_estimate),
                "note" => Text(d.note.as_deref()),
                _ => return None,
            },
            Document::PaymentReceipt(d) => match name {
                "receipt_number" => Text(d.receipt_number.as_deref()),
                "receipt_date" => Text(d.receipt_date.as_deref()),
                "received_from" => Text(d.received_from.as_deref()),
                "amount_received" => Number(d.amount_received),
                "payment_mode" => Text(d.payment_mode.as_deref()),
                "payment_for" => Text(d.payment_for.as_deref()),
                "previous_balance" => Number(d.previous_balance),
                "current_balance" => Number(d.current_balance),
                _ => return None,
            },
        })
    }
}

impl LineItem {
    /// Decode one model-emitted line without losing any of it. A line that is
    /// not an object is kept whole under [`RAW_ITEM`].
    pub fn from_value(value: Value) -> LineItem {
        let Value::Object(map) = value else {
            let mut item = LineItem::default();
            item.extra.insert(RAW_ITEM.to_string(), value);
            return item;
        };
        let raw = map.clone();
        let mut item = serde_json::from_value::<LineItem>(Value::Object(map)).unwrap_or_else(|_| {
            LineItem {
                extra: raw.clone(),
                ..LineItem::default()
            }
        });
        let unconverted: Vec<(String, Value)> = raw
            .into_iter()
            .filter(|(key, value)| !value.is_null() && item.field(key).is_some_and(|f| f.is_absent()))
            .collect();
        item.extra.extend(unconverted);
        item
    }

    pub fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        use FieldValue::{Number, Text};
        Some(match name {
            "description" => Text(self.description.as_deref()),
            "hsn_code" => Text(self.hsn_code.as_deref()),
            "quantity" => Number(self.quantity),
            "unit" => Text(self.unit.as_deref()),
            "rate" => Number(self.rate),
            "amount" => Number(self.amount),
            _ => return None,
        })
    }
}

/// Coercing field decoders for model output, which is schema-advisory only.
pub(crate) mod lenient {
    use super::LineItem;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_amount(&s),
            _ => None,
        }
        .filter(|n| n.is_finite()))
    }

    pub fn items<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<LineItem>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(values) => values.into_iter().map(LineItem::from_value).collect(),
            _ => Vec::new(),
        })
    }

    /// "₹1,250.50", "Rs. 500", " 12 " -> number.
    pub fn parse_amount(s: &str) -> Option<f64> {
        let cleaned: String = s
            .trim()
            .trim_start_matches('₹')
            .trim_start_matches("Rs.")
            .trim_start_matches("Rs")
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ',')
            .collect();
        cleaned.parse().ok()
    }
}
