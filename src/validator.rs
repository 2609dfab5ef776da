// src/validator.rs

use crate::document::{Document, DocumentError, FieldValue, LineItem};
use crate::schema::{
    Conditional, DOCUMENT_TYPE, ITEMS, PREVIOUS_BALANCE, RATE_OR_AMOUNT, UDHAAR, item_path,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of checking one candidate document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub missing_fields: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.missing_fields.is_empty()
    }

    fn missing(&mut self, path: impl Into<String>) {
        self.missing_fields.push(path.into());
    }
}

/// Validate an untyped candidate. An unknown or absent `document_type`
/// short-circuits with that tag as the only missing field.
pub fn validate(candidate: &Value) -> ValidationResult {
    match Document::from_value(candidate.clone()) {
        Ok(document) => validate_document(&document),
        Err(DocumentError::UnknownType(e)) => {
            debug!(error = %e, "Rejecting document before validation");
            ValidationResult {
                missing_fields: vec![DOCUMENT_TYPE.to_string()],
            }
        }
        Err(DocumentError::Malformed(e)) => {
            warn!(error = %e, "Candidate document body could not be decoded");
            ValidationResult {
                missing_fields: vec![DOCUMENT_TYPE.to_string()],
            }
        }
    }
}

/// Check a typed document against its registry entry: the schema's
/// top-level paths in order, per-item paths for each line, then conditionals.
pub fn validate_document(document: &Document) -> ValidationResult {
    let schema = document.schema();
    let mut result = ValidationResult::default();

    for &field in schema.required {
        if field == ITEMS {
            check_items(document.items(), schema.item_required, &mut result);
        } else if !is_present(document.field(field)) {
            result.missing(field);
        }
    }

    for rule in schema.conditional {
        match rule {
            Conditional::PreviousBalanceOnUdhaar => {
                // Zero is a legitimate previous balance; only absence counts.
                if let Document::PaymentReceipt(receipt) = document
                    && mentions_udhaar(receipt.payment_for.as_deref())
                    && receipt.previous_balance.is_none()
                {
                    result.missing(PREVIOUS_BALANCE);
                }
            }
        }
    }

    debug!(
        document_type = %document.document_type(),
        missing = ?result.missing_fields,
        "Validated document"
    );
    result
}

fn check_items(items: &[LineItem], item_required: &[&str], result: &mut ValidationResult) {
    if items.is_empty() {
        result.missing(ITEMS);
        return;
    }
    for (i, item) in items.iter().enumerate() {
        for &field in item_required {
            let present = if field == RATE_OR_AMOUNT {
                has_amount(item.rate) || has_amount(item.amount)
            } else {
                is_present(item.field(field))
            };
            if !present {
                result.missing(item_path(i, field));
            }
        }
    }
}

/// Text must be non-blank and numbers strictly positive. A name the typed
/// model does not know is never present.
fn is_present(field: Option<FieldValue<'_>>) -> bool {
    match field {
        Some(FieldValue::Text(text)) => text.is_some_and(|s| !s.trim().is_empty()),
        Some(FieldValue::Number(n)) => has_amount(n),
        None => false,
    }
}

/// Required amounts, rates and quantities must be strictly positive.
pub fn has_amount(value: Option<f64>) -> bool {
    value.is_some_and(|v| v.is_finite() && v > 0.0)
}

pub fn mentions_udhaar(payment_for: Option<&str>) -> bool {
    payment_for.is_some_and(|p| p.to_lowercase().contains(UDHAAR))
}
