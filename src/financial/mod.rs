// src/financial/mod.rs

//! Structured extraction from UPI screenshots, bills and handwritten notes.

pub mod agent;
pub mod report;
pub mod store;

use crate::document::lenient;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static DATE_DMY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").unwrap());
static ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z0-9]+$").unwrap());
static GSTIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}[A-Z]{5}\d{4}[A-Z][A-Z\d]Z[A-Z\d]$").unwrap()
});

/// Loose date shapes seen on receipts, captured as (a, b, c).
static LOOSE_DATES: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"(\d{2})/(\d{2})/(\d{4})").unwrap(),
        Regex::new(r"(\d{2})-(\d{2})-(\d{4})").unwrap(),
        Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap(),
        Regex::new(r"(\d{2})\.(\d{2})\.(\d{4})").unwrap(),
    ]
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancialKind {
    UpiScreenshot,
    Invoice,
    HandwrittenNote,
    #[default]
    Unknown,
}

impl FinancialKind {
    pub const ALL: [FinancialKind; 4] = [
        FinancialKind::UpiScreenshot,
        FinancialKind::Invoice,
        FinancialKind::HandwrittenNote,
        FinancialKind::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FinancialKind::UpiScreenshot => "upi_screenshot",
            FinancialKind::Invoice => "invoice",
            FinancialKind::HandwrittenNote => "handwritten_note",
            FinancialKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        let tag = s.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .unwrap_or_default()
    }
}

impl fmt::Display for FinancialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields read off a financial image. Everything but the kind is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    #[serde(default, deserialize_with = "kind")]
    pub document_type: FinancialKind,
    #[serde(default, deserialize_with = "lenient::number")]
    pub amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub vendor_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub gstin: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub items: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub invoice_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub utr_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub sender_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub receiver_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub payment_app: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub description: Option<String>,
}

fn kind<'de, D: Deserializer<'de>>(d: D) -> Result<FinancialKind, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => FinancialKind::parse(&s),
        _ => FinancialKind::Unknown,
    })
}

fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(values) => Some(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        Value::String(s) => Some(vec![s]),
        _ => None,
    })
}

/// Drop values that do not have the expected shape instead of rejecting the
/// whole extraction.
pub fn post_validate(mut data: ExtractedData) -> ExtractedData {
    data.date = data
        .date
        .map(|d| d.trim().to_string())
        .filter(|d| DATE_DMY.is_match(d));
    data.gstin = data
        .gstin
        .map(|g| compact_upper(&g))
        .filter(|g| g.len() == 15 && ALNUM.is_match(g));
    data.utr_number = data
        .utr_number
        .map(|u| compact_upper(&u))
        .filter(|u| (10..=20).contains(&u.len()) && ALNUM.is_match(u));
    data.amount = data.amount.filter(|a| *a >= 0.0);
    data
}

fn compact_upper(s: &str) -> String {
    s.replace(' ', "").to_uppercase()
}

/// Full GSTIN structure: state code, PAN, entity number, `Z`, checksum.
pub fn validate_gstin(gstin: &str) -> bool {
    let gstin = gstin.to_uppercase();
    gstin.len() == 15 && GSTIN.is_match(&gstin)
}

pub fn validate_utr(utr: &str) -> bool {
    let utr = compact_upper(utr);
    (10..=20).contains(&utr.len()) && ALNUM.is_match(&utr)
}

/// Find a DD/MM/YYYY, DD-MM-YYYY, YYYY-MM-DD or DD.MM.YYYY date anywhere in
/// `s` and return it as DD/MM/YYYY.
pub fn parse_indian_date(s: &str) -> Option<String> {
    LOOSE_DATES.iter().find_map(|re| {
        let caps = re.captures(s)?;
        let (a, b, c) = (&caps[1], &caps[2], &caps[3]);
        Some(if a.len() == 4 {
            format!("{c}/{b}/{a}")
        } else {
            format!("{a}/{b}/{c}")
        })
    })
}

/// 0-100, from how complete the extraction is for its kind.
pub fn confidence_score(data: &ExtractedData) -> f64 {
    let mut score = 0.0;
    if data.document_type != FinancialKind::Unknown {
        score += 30.0;
    }
    if data.amount.is_some_and(|a| a > 0.0) {
        score += 40.0;
    }
    match data.document_type {
        FinancialKind::UpiScreenshot => {
            if present(&data.utr_number) {
                score += 20.0;
            }
            if present(&data.payment_app) {
                score += 10.0;
            }
        }
        FinancialKind::Invoice => {
            if present(&data.vendor_name) {
                score += 15.0;
            }
            if present(&data.gstin) {
                score += 15.0;
            }
        }
        FinancialKind::HandwrittenNote | FinancialKind::Unknown => {}
    }
    f64::min(score, 100.0)
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extracted(value: Value) -> ExtractedData {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_lenient_decode() {
        let data = extracted(json!({
            "document_type": "UPI Screenshot",
            "amount": "₹1,500",
            "items": "Tea",
            "utr_number": 412345678901u64
        }));
        assert_eq!(data.document_type, FinancialKind::UpiScreenshot);
        assert_eq!(data.amount, Some(1500.0));
        assert_eq!(data.items, Some(vec!["Tea".to_string()]));
        assert_eq!(data.utr_number.as_deref(), Some("412345678901"));

        let data = extracted(json!({"document_type": "selfie"}));
        assert_eq!(data.document_type, FinancialKind::Unknown);
    }

    #[test]
    fn test_post_validate_drops_bad_fields() {
        let data = post_validate(extracted(json!({
            "document_type": "invoice",
            "amount": -10,
            "date": "2026-02-01",
            "gstin": "27abcde 1234f1z5",
            "utr_number": "123"
        })));
        assert_eq!(data.amount, None);
        assert_eq!(data.date, None);
        assert_eq!(data.gstin.as_deref(), Some("27ABCDE1234F1Z5"));
        assert_eq!(data.utr_number, None);

        let data = post_validate(extracted(json!({"date": " 01/02/2026 ", "utr_number": "ab12 cd34 ef56"})));
        assert_eq!(data.date.as_deref(), Some("01/02/2026"));
        assert_eq!(data.utr_number.as_deref(), Some("AB12CD34EF56"));
    }

    #[test]
    fn test_validate_gstin() {
        assert!(validate_gstin("27ABCDE1234F1Z5"));
        assert!(validate_gstin("27abcde1234f1z5"));
        assert!(!validate_gstin("27ABCDE1234F1X5"));
        assert!(!validate_gstin("27ABCDE1234F1Z"));
    }

    #[test]
    fn test_validate_utr() {
        assert!(validate_utr("412345678901"));
        assert!(validate_utr("ab 1234 5678"));
        assert!(!validate_utr("12345"));
        assert!(!validate_utr("4123-4567-8901"));
    }

    #[test]
    fn test_parse_indian_date() {
        assert_eq!(parse_indian_date("Paid on 05/03/2026").as_deref(), Some("05/03/2026"));
        assert_eq!(parse_indian_date("05-03-2026").as_deref(), Some("05/03/2026"));
        assert_eq!(parse_indian_date("2026-03-05").as_deref(), Some("05/03/2026"));
        assert_eq!(parse_indian_date("05.03.2026").as_deref(), Some("05/03/2026"));
        assert_eq!(parse_indian_date("kal"), None);
    }

    #[test]
    fn test_confidence_score() {
        let upi = extracted(json!({
            "document_type": "upi_screenshot",
            "amount": 500,
            "utr_number": "412345678901",
            "payment_app": "PhonePe"
        }));
        assert_eq!(confidence_score(&upi), 100.0);

        let invoice = extracted(json!({"document_type": "invoice", "amount": 0, "vendor_name": "Sharma"}));
        assert_eq!(confidence_score(&invoice), 45.0);

        assert_eq!(confidence_score(&ExtractedData::default()), 0.0);

        let note = extracted(json!({"document_type": "handwritten_note", "amount": 200, "vendor_name": "Dudhwala"}));
        assert_eq!(confidence_score(&note), 70.0);
    }
}
