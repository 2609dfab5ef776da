// src/orchestrator.rs

use crate::clarifier::Clarifier;
use crate::config::Config;
use crate::document::{Document, DocumentError};
use crate::generator::{DocumentGenerator, GenerationError};
use crate::llm::LlmClient;
use crate::storage::{PersistenceError, save_document_json};
use crate::validator::{ValidationResult, validate, validate_document};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Terminal result of one command. Exactly one per invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Complete {
        document: Document,
        json_path: PathBuf,
    },
    NeedsClarification {
        missing_fields: Vec<String>,
        clarification_questions: Vec<String>,
        /// The model's reply exactly as generated.
        partial_document: Value,
    },
    Error {
        message: String,
    },
}

/// What the caller remembers between turns. The orchestrator itself keeps
/// nothing; a follow-up is just a new, merged command.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub previous_command: String,
    pub missing_fields: Vec<String>,
}

impl ConversationContext {
    pub fn from_outcome(command: &str, outcome: &Outcome) -> Option<Self> {
        match outcome {
            Outcome::NeedsClarification { missing_fields, .. } => Some(Self {
                previous_command: command.to_string(),
                missing_fields: missing_fields.clone(),
            }),
            _ => None,
        }
    }

    /// Fold the user's answer into the original command.
    pub fn merge(&self, answer: &str) -> String {
        let answer = answer.trim();
        if self.previous_command.trim().is_empty() {
            return answer.to_string();
        }
        format!("{}. {}", self.previous_command.trim().trim_end_matches('.'), answer)
    }
}

pub struct Orchestrator {
    generator: DocumentGenerator,
    clarifier: Clarifier,
    output_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, config: &Config) -> Self {
        Self {
            generator: DocumentGenerator::new(llm.clone(), config.generation.clone()),
            clarifier: Clarifier::new(llm, config.clarification.clone()),
            output_dir: config.output.dir.clone(),
        }
    }

    /// Like [`Orchestrator::run`], with fatal errors folded into [`Outcome::Error`].
    pub async fn process(&self, command: &str, context: Option<&ConversationContext>) -> Outcome {
        match self.run(command, context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Command failed");
                Outcome::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Generate -> validate -> persist or clarify. Generation and persistence
    /// failures are returned as errors; clarification failures never are.
    pub async fn run(
        &self,
        command: &str,
        context: Option<&ConversationContext>,
    ) -> Result<Outcome, PipelineError> {
        let span = info_span!("orchestrate", follow_up = context.is_some());
        async move {
            let command = match context {
                Some(ctx) => {
                    debug!(missing = ?ctx.missing_fields, "Merging follow-up answer");
                    ctx.merge(command)
                }
                None => command.to_string(),
            };

            let candidate = self.generator.generate(&command).await?;

            let (document, validation) = match Document::from_value(candidate.clone()) {
                Ok(document) => {
                    let validation = validate_document(&document);
                    (Some(document), validation)
                }
                Err(DocumentError::UnknownType(_)) | Err(DocumentError::Malformed(_)) => {
                    (None, validate(&candidate))
                }
            };

            match document {
                Some(document) if validation.is_valid() => {
                    let json_path = save_document_json(&document, &self.output_dir)?;
                    info!(
                        document_type = %document.document_type(),
                        path = %json_path.display(),
                        "Document complete"
                    );
                    Ok(Outcome::Complete {
                        document,
                        json_path,
                    })
                }
                _ => Ok(self.needs_clarification(&command, validation, candidate).await),
            }
        }
        .instrument(span)
        .await
    }

    async fn needs_clarification(
        &self,
        command: &str,
        validation: ValidationResult,
        partial_document: Value,
    ) -> Outcome {
        info!(missing = ?validation.missing_fields, "Document incomplete, asking for details");
        let clarification_questions = self
            .clarifier
            .clarify(&validation.missing_fields, command)
            .await;
        Outcome::NeedsClarification {
            missing_fields: validation.missing_fields,
            clarification_questions,
            partial_document,
        }
    }
}
