// src/generator.rs

use crate::config::GenerationConfig;
use crate::dates;
use crate::llm::{CompletionRequest, LlmClient, LlmError, truncate_chars, unwrap_json_object};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// How much of a bad reply is kept for diagnostics.
const RAW_RESPONSE_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to generate document: {0}")]
    Model(#[from] LlmError),

    #[error("failed to parse JSON response: {source}")]
    JsonParse {
        source: serde_json::Error,
        /// First 500 characters of what the model sent back.
        raw: String,
    },

    #[error("model returned JSON that is not an object")]
    NotAnObject { raw: String },
}

/// System instruction for turning a shop-counter command into a document.
pub fn system_prompt(today: &str) -> String {
    format!(
        r#"You are a specialized agent for Indian small businesses.
Convert Hinglish / Hindi / English commands into structured JSON for transaction documents.

DOCUMENT TYPES (field "document_type"):
- "gst_invoice" ("pakka bill"): invoice_number, invoice_date, customer_name, customer_gstin,
  customer_address, items[], subtotal, cgst_rate, cgst_amount, sgst_rate, sgst_amount, total
- "bill_of_supply" ("kachha bill", "cash memo"): bill_number, bill_date, customer_name, items[], total, note
- "quotation" ("estimate"): quotation_number, quotation_date, valid_until, customer_name, items[],
  subtotal, tax_note, total_estimate, note
- "payment_receipt" ("parchi"): receipt_number, receipt_date, received_from, amount_received,
  payment_mode, payment_for, previous_balance, current_balance

Each item: description, hsn_code, quantity, unit, rate, amount.

RULES:
- Output ONLY one valid JSON object. No markdown, no explanations.
- Use today's date if none is given: {today}
- Auto-generate document numbers.
- Leave out any field the user did not give and you cannot infer; never invent prices or names."#
    )
}

pub struct DocumentGenerator {
    llm: Arc<dyn LlmClient>,
    config: GenerationConfig,
}

impl DocumentGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, config: GenerationConfig) -> Self {
        Self { llm, config }
    }

    /// One model round-trip; no retry. The reply is returned as an untyped
    /// mapping, enforcing the schema is the validator's job.
    pub async fn generate(&self, command: &str) -> Result<Value, GenerationError> {
        let request = CompletionRequest::new(command, self.config.temperature)
            .with_system(system_prompt(&dates::iso(dates::today())))
            .with_max_tokens(self.config.max_tokens);

        let response = self.llm.complete(&request).await?;
        let candidate = parse_candidate(&response)?;
        info!(
            document_type = candidate.get("document_type").and_then(|v| v.as_str()).unwrap_or("?"),
            "Model produced candidate document"
        );
        Ok(candidate)
    }
}

pub fn parse_candidate(response: &str) -> Result<Value, GenerationError> {
    let json_str = unwrap_json_object(response);
    match serde_json::from_str::<Value>(json_str) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(GenerationError::NotAnObject {
            raw: truncate_chars(response, RAW_RESPONSE_LIMIT).to_string(),
        }),
        Err(source) => {
            warn!(error = %source, "Model reply is not valid JSON");
            Err(GenerationError::JsonParse {
                source,
                raw: truncate_chars(response, RAW_RESPONSE_LIMIT).to_string(),
            })
        }
    }
}
