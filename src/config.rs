use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{env, fs};
use thiserror::Error;
use toml_edit::{DocumentMut, value};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = ".config/vyapaar.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config {path} is not editable TOML: {source}")]
    Edit {
        path: PathBuf,
        source: toml_edit::TomlError,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmSection,
    pub generation: GenerationConfig,
    pub clarification: ClarificationConfig,
    pub output: OutputConfig,
    pub business: BusinessConfig,
    pub financial: FinancialConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Hosted OpenAI-compatible API (Gemini by default). Needs an API key.
    #[default]
    Remote,
    Ollama,
    Cliproxy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub backend: LlmBackend,
    pub timeout_secs: u64,
    pub remote: EndpointConfig,
    pub ollama: EndpointConfig,
    pub cliproxy: EndpointConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Remote,
            timeout_secs: 60,
            remote: EndpointConfig {
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
                model: "gemini-2.5-flash".to_string(),
            },
            ollama: EndpointConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                model: "qwen2.5vl:7b".to_string(),
            },
            cliproxy: EndpointConfig {
                base_url: "http://localhost:8317/v1".to_string(),
                model: "gemini-2.5-flash".to_string(),
            },
        }
    }
}

impl LlmSection {
    pub fn active(&self) -> &EndpointConfig {
        match self.backend {
            LlmBackend::Remote => &self.remote,
            LlmBackend::Ollama => &self.ollama,
            LlmBackend::Cliproxy => &self.cliproxy,
        }
    }

    fn active_mut(&mut self) -> &mut EndpointConfig {
        match self.backend {
            LlmBackend::Remote => &mut self.remote,
            LlmBackend::Ollama => &mut self.ollama,
            LlmBackend::Cliproxy => &mut self.cliproxy,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClarificationConfig {
    pub temperature: f64,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self { temperature: 0.7 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
        }
    }
}

/// Seller details printed on every rendered PDF.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    pub name: String,
    pub address: String,
    pub gstin: String,
    pub phone: String,
    pub email: String,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            name: "Your Business Name".to_string(),
            address: "123 Main Street, Mumbai, Maharashtra 400001".to_string(),
            gstin: "27XXXXX1234X1Z5".to_string(),
            phone: "+91 98765 43210".to_string(),
            email: "business@example.com".to_string(),
        }
    }
}

impl BusinessConfig {
    pub fn apply(&mut self, update: &BusinessUpdate) {
        let fields = [
            (&mut self.name, &update.name),
            (&mut self.address, &update.address),
            (&mut self.gstin, &update.gstin),
            (&mut self.phone, &update.phone),
            (&mut self.email, &update.email),
        ];
        for (field, new_value) in fields {
            if let Some(v) = new_value {
                field.clone_from(v);
            }
        }
    }
}

/// Partial update for [`BusinessConfig`]; `None` fields are left untouched.
#[derive(Debug, Default)]
pub struct BusinessUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub gstin: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FinancialConfig {
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub max_image_mb: u64,
    pub supported_formats: Vec<String>,
    pub concurrency: usize,
}

impl Default for FinancialConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("financial_docs.db"),
            output_dir: PathBuf::from("outputs/financial"),
            logs_dir: PathBuf::from("logs"),
            max_image_mb: 10,
            supported_formats: ["jpg", "jpeg", "png", "webp", "heic", "heif"]
                .into_iter()
                .map(String::from)
                .collect(),
            concurrency: 4,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file if present, fall back to defaults otherwise, then apply
    /// `MODEL_NAME` / `MODEL_TEMPERATURE` / `MODEL_MAX_TOKENS` from the environment.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            info!(path = %path.display(), "Loading configuration");
            Self::load(path)?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        cfg.apply_env_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    /// Unparseable numeric overrides are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("MODEL_NAME").filter(|m| !m.trim().is_empty()) {
            self.llm.active_mut().model = model;
        }
        if let Some(t) = lookup("MODEL_TEMPERATURE").and_then(|v| v.trim().parse().ok()) {
            self.generation.temperature = t;
        }
        if let Some(n) = lookup("MODEL_MAX_TOKENS").and_then(|v| v.trim().parse().ok()) {
            self.generation.max_tokens = n;
        }
    }

    /// Rewrite the `[business]` table in place, keeping the rest of the file
    /// (comments, ordering) intact. Creates the file if it does not exist.
    pub fn update_business(
        path: impl AsRef<Path>,
        update: &BusinessUpdate,
    ) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = if path.exists() {
            fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            String::new()
        };
        let mut doc = content
            .parse::<DocumentMut>()
            .map_err(|source| ConfigError::Edit {
                path: path.to_path_buf(),
                source,
            })?;

        let fields = [
            ("name", &update.name),
            ("address", &update.address),
            ("gstin", &update.gstin),
            ("phone", &update.phone),
            ("email", &update.email),
        ];
        for (key, new_value) in fields {
            if let Some(v) = new_value {
                doc["business"][key] = value(v.as_str());
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, doc.to_string()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Business details updated");
        Ok(())
    }
}
