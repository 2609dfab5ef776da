// src/clarifier.rs

use crate::config::ClarificationConfig;
use crate::llm::{CompletionRequest, LlmClient, LlmError, unwrap_json_array};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const MAX_QUESTIONS: usize = 3;

/// Never leaves this module: every failure falls back to templated questions.
#[derive(Debug, Error)]
enum ClarificationError {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error("reply is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reply contained no usable questions")]
    NoQuestions,
}

fn clarification_prompt(missing_fields: &[String], original_input: &str) -> String {
    format!(
        r#"The user said: "{original_input}"

We need these missing fields to complete the document:
{fields}

Generate 1-3 natural, conversational questions in Hinglish to ask the user for this information.
Make the questions simple and friendly.

Output ONLY a JSON array of questions, like:
["Rahul ka GSTIN number kya hai?", "Kitne rate pe becha?"]"#,
        fields = missing_fields.join(", ")
    )
}

/// Deterministic questions used whenever the model cannot help.
pub fn fallback_questions(missing_fields: &[String]) -> Vec<String> {
    missing_fields
        .iter()
        .take(MAX_QUESTIONS)
        .map(|field| format!("Please provide: {field}"))
        .collect()
}

pub struct Clarifier {
    llm: Arc<dyn LlmClient>,
    config: ClarificationConfig,
}

impl Clarifier {
    pub fn new(llm: Arc<dyn LlmClient>, config: ClarificationConfig) -> Self {
        Self { llm, config }
    }

    /// Phrase follow-up questions for `missing_fields`. Always returns 1-3
    /// questions for a non-empty input.
    pub async fn clarify(&self, missing_fields: &[String], original_input: &str) -> Vec<String> {
        match self.ask_model(missing_fields, original_input).await {
            Ok(questions) => {
                info!(count = questions.len(), "Model phrased clarification questions");
                questions
            }
            Err(e) => {
                warn!(error = %e, "Clarification failed, using templated questions");
                fallback_questions(missing_fields)
            }
        }
    }

    async fn ask_model(
        &self,
        missing_fields: &[String],
        original_input: &str,
    ) -> Result<Vec<String>, ClarificationError> {
        let request = CompletionRequest::new(
            clarification_prompt(missing_fields, original_input),
            self.config.temperature,
        );
        let response = self.llm.complete(&request).await?;
        parse_questions(&response)
    }
}

/// Accepts a JSON array of strings or a single JSON string.
fn parse_questions(response: &str) -> Result<Vec<String>, ClarificationError> {
    let value: Value = serde_json::from_str(unwrap_json_array(response))?;
    let questions: Vec<String> = match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|q| match q {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .take(MAX_QUESTIONS)
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };
    if questions.is_empty() {
        return Err(ClarificationError::NoQuestions);
    }
    Ok(questions)
}
