// src/llm.rs

use crate::config::{LlmBackend, LlmSection};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Env vars checked (in order) for the remote backend's key.
pub const API_KEY_VARS: [&str; 2] = ["LLM_API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key found: set LLM_API_KEY or GEMINI_API_KEY")]
    MissingApiKey,

    #[error("HTTP error talking to model: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from model")]
    EmptyResponse,

    #[error("model backend unavailable: {0}")]
    Unavailable(String),
}

/// Image bytes sent inline alongside a prompt.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl InlineImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }
}

/// One round-trip to the model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
    pub image: Option<InlineImage>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    /// Ask the backend to constrain output to a JSON object.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(user: impl Into<String>, temperature: f64) -> Self {
        Self {
            system: None,
            user: user.into(),
            image: None,
            temperature,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Anything that can turn a [`CompletionRequest`] into raw model text.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub backend: LlmBackend,
    pub base_url: String,
    pub model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint. `lookup` reads
/// environment variables.
pub fn resolve_endpoint(
    llm: &LlmSection,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedEndpoint, LlmError> {
    let endpoint = llm.active();
    let api_key = match llm.backend {
        LlmBackend::Ollama => "ollama".to_string(), // required by API but ignored
        LlmBackend::Cliproxy => "cliproxy".to_string(), // CLIProxyAPI uses OAuth, not API keys
        LlmBackend::Remote => API_KEY_VARS
            .iter()
            .find_map(|var| lookup(var).filter(|v| !v.trim().is_empty()))
            .ok_or(LlmError::MissingApiKey)?,
    };
    info!(
        backend = ?llm.backend,
        url = %endpoint.base_url,
        model = %endpoint.model,
        "Resolved model endpoint"
    );
    Ok(ResolvedEndpoint {
        backend: llm.backend,
        base_url: endpoint.base_url.trim_end_matches('/').to_string(),
        model: endpoint.model.clone(),
        api_key,
    })
}

/// OpenAI-compatible `/chat/completions` client (Gemini, Ollama, CLIProxyAPI).
pub struct ChatClient {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl ChatClient {
    pub fn new(endpoint: ResolvedEndpoint, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &ResolvedEndpoint {
        &self.endpoint
    }

    /// Fail fast when a local Ollama server is not running.
    pub async fn ensure_ready(&self) -> Result<(), LlmError> {
        if self.endpoint.backend != LlmBackend::Ollama {
            return Ok(());
        }
        if check_ollama_health(&self.client, &self.endpoint.base_url).await {
            Ok(())
        } else {
            Err(LlmError::Unavailable(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                self.endpoint.base_url
            )))
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: MessageContent::Text(system.clone()),
            });
        }
        let content = match &request.image {
            None => MessageContent::Text(request.user.clone()),
            Some(image) => MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.user.clone(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                    },
                },
            ]),
        };
        messages.push(ChatMessage {
            role: "user",
            content,
        });

        ChatRequest {
            model: self.endpoint.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

#[async_trait]
impl LlmClient for ChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.endpoint.base_url);
        debug!(url = %url, model = %body.model, "Sending chat completion");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                info!("Ollama server is reachable");
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// Strip markdown fences the model may add despite instructions.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = trimmed.trim_start_matches("```");
    // Drop the info string ("json", "JSON", ...) on the opening fence line.
    let body = match body.find('\n') {
        Some(pos) if !body[..pos].contains(['{', '[']) => &body[pos + 1..],
        _ => body,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Extract the outermost JSON value delimited by `open`/`close` from a string
/// that may contain surrounding text (e.g. thinking tokens). Returns the input
/// unchanged when no such span exists so the JSON parser reports the error.
pub fn extract_json_span(s: &str, open: char, close: char) -> &str {
    match (s.find(open), s.rfind(close)) {
        (Some(start), Some(end)) if end > start => &s[start..=end],
        _ => s,
    }
}

/// Fence-strip then isolate the outermost JSON object.
pub fn unwrap_json_object(raw: &str) -> &str {
    extract_json_span(strip_code_fences(raw), '{', '}')
}

/// Fence-strip then isolate the outermost JSON array, if the reply has one.
pub fn unwrap_json_array(raw: &str) -> &str {
    extract_json_span(strip_code_fences(raw), '[', ']')
}

/// Cut `s` to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every request.
    #[derive(Default)]
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::default(),
            }
        }

        pub fn replying(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::Unavailable("script exhausted".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1,2]\n```"), "[1,2]");
        assert_eq!(strip_code_fences("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_unwrap_json_object_skips_prose() {
        let raw = "Sure! Here it is:\n{\"document_type\": \"quotation\"}\nHope this helps.";
        assert_eq!(unwrap_json_object(raw), "{\"document_type\": \"quotation\"}");
        assert_eq!(unwrap_json_object("no json here"), "no json here");
    }

    #[test]
    fn test_unwrap_json_array() {
        let raw = "```json\n[\"Rate kya hai?\"]\n```";
        assert_eq!(unwrap_json_array(raw), "[\"Rate kya hai?\"]");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("₹₹₹₹", 2), "₹₹");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_remote_requires_key() {
        let cfg = Config::default();
        let err = resolve_endpoint(&cfg.llm, |_| None).unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));

        let endpoint = resolve_endpoint(&cfg.llm, |var| {
            (var == "GEMINI_API_KEY").then(|| "secret".to_string())
        })
        .unwrap();
        assert_eq!(endpoint.model, "gemini-2.5-flash");
        assert!(!endpoint.base_url.ends_with('/'));
    }

    #[test]
    fn test_local_backend_needs_no_key() {
        let mut cfg = Config::default();
        cfg.llm.backend = LlmBackend::Ollama;
        assert!(resolve_endpoint(&cfg.llm, |_| None).is_ok());
    }

    #[test]
    fn test_vision_request_shape() {
        let endpoint = resolve_endpoint(&Config::default().llm, |_| Some("k".to_string())).unwrap();
        let client = ChatClient::new(endpoint, Duration::from_secs(5)).unwrap();
        let request = CompletionRequest::new("classify", 0.1)
            .with_image(InlineImage {
                mime_type: "image/png".to_string(),
                bytes: vec![1, 2, 3],
            })
            .json();

        let body = serde_json::to_value(client.build_request(&request)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body.get("max_tokens").is_none());
        let parts = &body["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AQID");
    }
}
