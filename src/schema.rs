//! Static shape of the four transaction documents: which fields must be
//! present before a document can be saved, and the canonical names the rest
//! of the crate keys on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    GstInvoice,
    BillOfSupply,
    Quotation,
    PaymentReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnknownDocumentType {
    #[error("document_type is missing")]
    Missing,
    #[error("unknown document_type '{0}'")]
    Unknown(String),
}

pub const ALL_TYPES: [DocumentType; 4] = [
    DocumentType::GstInvoice,
    DocumentType::BillOfSupply,
    DocumentType::Quotation,
    DocumentType::PaymentReceipt,
];

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::GstInvoice => "gst_invoice",
            DocumentType::BillOfSupply => "bill_of_supply",
            DocumentType::Quotation => "quotation",
            DocumentType::PaymentReceipt => "payment_receipt",
        }
    }

    pub fn schema(self) -> &'static Schema {
        schema_for(self)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = UnknownDocumentType;

    /// Accepts the canonical tag in any case, with spaces or hyphens in place
    /// of underscores ("GST Invoice", "bill-of-supply").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = normalize_tag(s);
        if tag.is_empty() {
            return Err(UnknownDocumentType::Missing);
        }
        ALL_TYPES
            .into_iter()
            .find(|t| t.as_str() == tag)
            .ok_or(UnknownDocumentType::Unknown(s.to_string()))
    }
}

pub fn normalize_tag(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

// Canonical field paths reported by the validator.
pub const DOCUMENT_TYPE: &str = "document_type";
pub const CUSTOMER_NAME: &str = "customer_name";
pub const ITEMS: &str = "items";
pub const TOTAL: &str = "total";
pub const AMOUNT_RECEIVED: &str = "amount_received";
pub const PAYMENT_MODE: &str = "payment_mode";
pub const PREVIOUS_BALANCE: &str = "previous_balance";
pub const HSN_CODE: &str = "hsn_code";
pub const RATE: &str = "rate";
pub const QUANTITY: &str = "quantity";
pub const RATE_OR_AMOUNT: &str = "rate_or_amount";

/// Token in `payment_for` that marks a credit (udhaar) settlement.
pub const UDHAAR: &str = "udhaar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conditional {
    /// `previous_balance` becomes required when `payment_for` mentions udhaar.
    PreviousBalanceOnUdhaar,
}

#[derive(Debug)]
pub struct Schema {
    /// Top-level required paths in report order. `items` means "at least one".
    pub required: &'static [&'static str],
    /// Required per-item sub-fields, reported as `items[i].<field>`.
    pub item_required: &'static [&'static str],
    pub conditional: &'static [Conditional],
    /// Heading printed on the rendered PDF.
    pub title: &'static str,
    pub file_prefix: &'static str,
}

static GST_INVOICE: Schema = Schema {
    required: &[CUSTOMER_NAME, ITEMS],
    item_required: &[HSN_CODE, RATE, QUANTITY],
    conditional: &[],
    title: "TAX INVOICE",
    file_prefix: "GST_Invoice",
};

static BILL_OF_SUPPLY: Schema = Schema {
    required: &[ITEMS, TOTAL],
    item_required: &[],
    conditional: &[],
    title: "BILL OF SUPPLY",
    file_prefix: "Bill_of_Supply",
};

static QUOTATION: Schema = Schema {
    required: &[ITEMS],
    item_required: &[RATE_OR_AMOUNT],
    conditional: &[],
    title: "QUOTATION",
    file_prefix: "Quotation",
};

static PAYMENT_RECEIPT: Schema = Schema {
    required: &[AMOUNT_RECEIVED, PAYMENT_MODE],
    item_required: &[],
    conditional: &[Conditional::PreviousBalanceOnUdhaar],
    title: "PAYMENT RECEIPT",
    file_prefix: "Receipt",
};

pub fn schema_for(document_type: DocumentType) -> &'static Schema {
    match document_type {
        DocumentType::GstInvoice => &GST_INVOICE,
        DocumentType::BillOfSupply => &BILL_OF_SUPPLY,
        DocumentType::Quotation => &QUOTATION,
        DocumentType::PaymentReceipt => &PAYMENT_RECEIPT,
    }
}

pub fn item_path(index: usize, field: &str) -> String {
    format!("{ITEMS}[{index}].{field}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parsing() {
        assert_eq!("gst_invoice".parse::<DocumentType>(), Ok(DocumentType::GstInvoice));
        assert_eq!("GST Invoice".parse::<DocumentType>(), Ok(DocumentType::GstInvoice));
        assert_eq!(" bill-of-supply ".parse::<DocumentType>(), Ok(DocumentType::BillOfSupply));
        assert_eq!(
            "Payment_Receipt".parse::<DocumentType>(),
            Ok(DocumentType::PaymentReceipt)
        );
        assert_eq!(
            "credit_note".parse::<DocumentType>(),
            Err(UnknownDocumentType::Unknown("credit_note".to_string()))
        );
        assert_eq!("  ".parse::<DocumentType>(), Err(UnknownDocumentType::Missing));
    }

    #[test]
    fn test_display_matches_serde() {
        for t in ALL_TYPES {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, t.to_string());
        }
    }

    #[test]
    fn test_registry_rule_sets() {
        let gst = schema_for(DocumentType::GstInvoice);
        assert_eq!(gst.required, [CUSTOMER_NAME, ITEMS]);
        assert_eq!(gst.item_required, [HSN_CODE, RATE, QUANTITY]);
        assert_eq!(schema_for(DocumentType::Quotation).item_required, [RATE_OR_AMOUNT]);
        assert_eq!(
            schema_for(DocumentType::PaymentReceipt).conditional,
            [Conditional::PreviousBalanceOnUdhaar]
        );
        assert_eq!(item_path(2, RATE), "items[2].rate");
    }
}
