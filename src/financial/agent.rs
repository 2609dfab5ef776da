// src/financial/agent.rs

use super::{ExtractedData, confidence_score, post_validate, validate_gstin};
use crate::config::FinancialConfig;
use crate::dates;
use crate::llm::{CompletionRequest, InlineImage, LlmClient, LlmError, unwrap_json_object};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::{Instrument, error, info, info_span, warn};

pub const EXTRACTION_TEMPERATURE: f64 = 0.1;

const EXTRACTION_PROMPT: &str = r#"You are an expert Indian financial document analyzer with deep knowledge of UPI systems, GST invoices and billing formats.

Step 1: classify the image as exactly one of "upi_screenshot", "invoice", "handwritten_note", "unknown".

Step 2: extract
- UPI screenshots: amount, utr_number, date, sender_name, receiver_name, payment_app
- Invoices: amount, vendor_name, gstin, invoice_number, date, items (list of strings)
- Handwritten notes: amount, date, vendor_name, description

Rules:
- amount is numeric only, in INR
- date is DD/MM/YYYY
- GSTIN has 15 characters
- missing fields are null

Return ONLY one JSON object with the key "document_type" and the fields above. No markdown."#;

#[derive(Debug, Error)]
pub enum FinancialError {
    #[error("image not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported format: {extension}. Supported: {supported}")]
    UnsupportedFormat { extension: String, supported: String },

    #[error("image too large: {size_mb:.1} MB (max {max_mb} MB)")]
    TooLarge { size_mb: f64, max_mb: u64 },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Model(#[from] LlmError),

    #[error("model returned invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    pub filename: Option<String>,
    pub timestamp: String,
    pub data: Option<ExtractedData>,
    pub confidence_score: Option<f64>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl ProcessingResult {
    pub fn is_success(&self) -> bool {
        self.status == ProcessingStatus::Success
    }

    fn failed(filename: Option<String>, err: &FinancialError) -> Self {
        Self {
            status: ProcessingStatus::Error,
            filename,
            timestamp: iso_now(),
            data: None,
            confidence_score: None,
            error: Some(err.to_string()),
            output_path: None,
        }
    }
}

/// Per-image results in input order, plus where the batch log went.
#[derive(Debug)]
pub struct BatchRun {
    pub results: Vec<ProcessingResult>,
    pub log_path: PathBuf,
}

pub struct FinancialAgent {
    llm: Arc<dyn LlmClient>,
    config: FinancialConfig,
}

impl FinancialAgent {
    pub fn new(llm: Arc<dyn LlmClient>, config: FinancialConfig) -> Self {
        Self { llm, config }
    }

    /// Extract one image. Failures are reported in the result, never raised.
    pub async fn process_image(&self, path: &Path) -> ProcessingResult {
        let filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let span = info_span!("extract", file = filename.as_deref().unwrap_or("?"));
        async {
            match self.extract(path).await {
                Ok(data) => {
                    let confidence = confidence_score(&data);
                    info!(
                        document_type = %data.document_type,
                        confidence,
                        "Extraction complete"
                    );
                    let mut result = ProcessingResult {
                        status: ProcessingStatus::Success,
                        filename,
                        timestamp: iso_now(),
                        data: Some(data),
                        confidence_score: Some(confidence),
                        error: None,
                        output_path: None,
                    };
                    match self.save_result(path, &result).await {
                        Ok(saved) => result.output_path = Some(saved),
                        Err(e) => warn!(error = %e, "Could not save extraction result"),
                    }
                    result
                }
                Err(e) => {
                    error!(error = %e, "Extraction failed");
                    ProcessingResult::failed(filename, &e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Process `paths` with bounded parallelism, keeping input order, and write
    /// the combined results to `<logs_dir>/batch_results_<timestamp>.json`.
    pub async fn batch_process(&self, paths: &[PathBuf]) -> Result<BatchRun, FinancialError> {
        let total = paths.len();
        info!(total, concurrency = self.config.concurrency, "Starting batch processing");

        let results: Vec<ProcessingResult> = stream::iter(paths.iter().enumerate())
            .map(|(idx, path)| async move {
                info!(index = idx + 1, total, path = %path.display(), "Processing image");
                self.process_image(path).await
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let logs_dir = &self.config.logs_dir;
        tokio::fs::create_dir_all(logs_dir)
            .await
            .map_err(|source| FinancialError::Io {
                path: logs_dir.clone(),
                source,
            })?;
        let log_path = logs_dir.join(format!("batch_results_{}.json", dates::timestamp()));
        let json = serde_json::to_string_pretty(&results)?;
        tokio::fs::write(&log_path, json)
            .await
            .map_err(|source| FinancialError::Io {
                path: log_path.clone(),
                source,
            })?;

        info!(path = %log_path.display(), "Batch processing complete");
        Ok(BatchRun { results, log_path })
    }

    async fn extract(&self, path: &Path) -> Result<ExtractedData, FinancialError> {
        let image = self.load_image(path).await?;
        let request = CompletionRequest::new(EXTRACTION_PROMPT, EXTRACTION_TEMPERATURE)
            .with_image(image)
            .json();
        let response = self.llm.complete(&request).await?;
        let data = post_validate(serde_json::from_str(unwrap_json_object(&response))?);
        if let Some(gstin) = data.gstin.as_deref()
            && !validate_gstin(gstin)
        {
            warn!(gstin, "Extracted GSTIN does not follow the state/PAN/checksum layout");
        }
        Ok(data)
    }

    /// Existence, extension and size checks, then the raw bytes.
    pub async fn load_image(&self, path: &Path) -> Result<InlineImage, FinancialError> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(FinancialError::NotFound(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FinancialError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(FinancialError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !self.config.supported_formats.iter().any(|f| *f == extension) {
            return Err(FinancialError::UnsupportedFormat {
                extension,
                supported: self.config.supported_formats.join(", "),
            });
        }

        let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
        if size_mb > self.config.max_image_mb as f64 {
            return Err(FinancialError::TooLarge {
                size_mb,
                max_mb: self.config.max_image_mb,
            });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| FinancialError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(InlineImage {
            mime_type: mime_type(&extension).to_string(),
            bytes,
        })
    }

    async fn save_result(
        &self,
        image_path: &Path,
        result: &ProcessingResult,
    ) -> Result<PathBuf, FinancialError> {
        let out_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|source| FinancialError::Io {
                path: out_dir.clone(),
                source,
            })?;
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "result".to_string());
        let path = out_dir.join(format!("{stem}_{}.json", dates::timestamp()));
        tokio::fs::write(&path, serde_json::to_string_pretty(result)?)
            .await
            .map_err(|source| FinancialError::Io {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "Saved extraction result");
        Ok(path)
    }
}

fn mime_type(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "image/jpeg",
    }
}

fn iso_now() -> String {
    dates::now().format(&Rfc3339).unwrap_or_default()
}

/// Supported images directly inside `dir`, sorted by name.
pub fn collect_images(dir: &Path, supported: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .is_some_and(|ext| supported.iter().any(|f| *f == ext))
        })
        .collect();
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::financial::FinancialKind;
    use crate::llm::testing::ScriptedLlm;

    fn agent(llm: Arc<ScriptedLlm>, root: &Path) -> FinancialAgent {
        let config = FinancialConfig {
            output_dir: root.join("outputs"),
            logs_dir: root.join("logs"),
            ..FinancialConfig::default()
        };
        FinancialAgent::new(llm, config)
    }

    fn write_image(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_process_image_success() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "gpay.jpg");
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"document_type": "upi_screenshot", "amount": 1500, "utr_number": "4123 4567 8901", "payment_app": "GPay", "date": "01/02/2026"}"#,
        ]));
        let result = agent(llm.clone(), dir.path()).process_image(&image).await;

        assert!(result.is_success());
        assert_eq!(result.filename.as_deref(), Some("gpay.jpg"));
        assert_eq!(result.confidence_score, Some(100.0));
        let data = result.data.as_ref().unwrap();
        assert_eq!(data.document_type, FinancialKind::UpiScreenshot);
        assert_eq!(data.utr_number.as_deref(), Some("412345678901"));

        let saved = result.output_path.as_ref().unwrap();
        assert!(saved.starts_with(dir.path().join("outputs")));
        assert!(saved.file_name().unwrap().to_string_lossy().starts_with("gpay_"));

        let requests = llm.requests.lock().unwrap();
        assert!(requests[0].json_mode);
        assert_eq!(requests[0].temperature, 0.1);
        let image = requests[0].image.as_ref().unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert!(image.data_url().starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_bad_json_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "bill.png");
        let llm = Arc::new(ScriptedLlm::replying(&["not json at all"]));
        let result = agent(llm, dir.path()).process_image(&image).await;
        assert_eq!(result.status, ProcessingStatus::Error);
        assert!(result.error.unwrap().contains("invalid JSON"));
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn test_input_checks() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let agent = agent(llm.clone(), dir.path());

        let missing = agent.load_image(&dir.path().join("nope.jpg")).await;
        assert!(matches!(missing, Err(FinancialError::NotFound(_))));

        let gif = write_image(dir.path(), "anim.gif");
        let unsupported = agent.load_image(&gif).await;
        assert!(matches!(unsupported, Err(FinancialError::UnsupportedFormat { .. })));

        let big = dir.path().join("big.png");
        std::fs::write(&big, vec![0u8; 11 * 1024 * 1024]).unwrap();
        let too_large = agent.load_image(&big).await;
        assert!(matches!(too_large, Err(FinancialError::TooLarge { max_mb: 10, .. })));

        // Rejected inputs never reach the model.
        assert_eq!(llm.request_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_image(dir.path(), "a.jpg");
        let second = dir.path().join("missing.jpg");
        let llm = Arc::new(ScriptedLlm::replying(&[
            r#"{"document_type": "invoice", "amount": 900, "vendor_name": "Sharma Traders"}"#,
        ]));
        let run = agent(llm, dir.path())
            .batch_process(&[first, second])
            .await
            .unwrap();

        assert_eq!(run.results.len(), 2);
        assert!(run.results[0].is_success());
        assert_eq!(run.results[1].status, ProcessingStatus::Error);
        assert!(run.log_path.starts_with(dir.path().join("logs")));

        let logged: Vec<ProcessingResult> =
            serde_json::from_str(&std::fs::read_to_string(&run.log_path).unwrap()).unwrap();
        assert_eq!(logged.len(), 2);
    }

    #[test]
    fn test_collect_images_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "b.PNG");
        write_image(dir.path(), "a.jpeg");
        write_image(dir.path(), "notes.txt");
        let supported = FinancialConfig::default().supported_formats;
        let images = collect_images(dir.path(), &supported).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpeg", "b.PNG"]);
    }
}
