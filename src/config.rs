//! Configuration: TOML file with per-section defaults.
//!
//! Read from `$XDG_CONFIG_HOME/scrivd/config.toml` unless a path is
//! given on the command line. A missing file yields defaults. The
//! daemon only reads configuration; it never writes it back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::command::CommandSpec;
use crate::provider::ProviderKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::error::PipelineError {
    fn from(e: ConfigError) -> Self {
        crate::error::PipelineError::Config(e.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub capture: CaptureConfig,
    pub providers: ProvidersConfig,
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub provider: ProviderKind,
    pub hotkey: String,
    pub default_command: String,
    /// Cancel the active provider's in-flight request when the hotkey
    /// fires again.
    pub cancel_on_retrigger: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            hotkey: "Ctrl+Space".to_string(),
            default_command: "Custom".to_string(),
            cancel_on_retrigger: false,
        }
    }
}

/// Capture and delivery timing, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub settle_ms: u64,
    /// Second, longer settle-wait when the first one captured nothing.
    /// `0` disables the second attempt.
    pub retry_settle_ms: u64,
    pub poll_interval_ms: u64,
    pub scope_timeout_ms: u64,
    pub paste_settle_ms: u64,
    pub modifier_release_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            retry_settle_ms: 500,
            poll_interval_ms: 20,
            scope_timeout_ms: 5_000,
            paste_settle_ms: 200,
            modifier_release_timeout_ms: 500,
        }
    }
}

impl CaptureConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn retry_settle(&self) -> Option<Duration> {
        (self.retry_settle_ms > 0).then(|| Duration::from_millis(self.retry_settle_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn scope_timeout(&self) -> Duration {
        Duration::from_millis(self.scope_timeout_ms)
    }

    pub fn paste_settle(&self) -> Duration {
        Duration::from_millis(self.paste_settle_ms)
    }

    pub fn modifier_release_timeout(&self) -> Duration {
        Duration::from_millis(self.modifier_release_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub gemini: GeminiConfig,
    pub openai: OpenAiConfig,
    pub ollama: OllamaConfig,
    pub local: LocalModelConfig,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<REDACTED>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub organization: String,
    pub project: String,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            organization: String::new(),
            project: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub keep_alive_minutes: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            keep_alive_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalModelConfig {
    pub model_url: String,
    pub tokenizer_url: String,
    /// Expected SHA-256 of the model file, lowercase hex.
    pub sha256: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub max_retries: u32,
    pub max_tokens: usize,
    pub temperature: f64,
    pub architecture: Option<String>,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model_url: "https://huggingface.co/Qwen/Qwen2.5-1.5B-Instruct-GGUF/resolve/main/qwen2.5-1.5b-instruct-q4_k_m.gguf".to_string(),
            tokenizer_url: "https://huggingface.co/Qwen/Qwen2.5-1.5B-Instruct/resolve/main/tokenizer.json".to_string(),
            sha256: None,
            cache_dir: None,
            max_retries: 3,
            max_tokens: 1000,
            temperature: 0.5,
            architecture: None,
        }
    }
}

impl LocalModelConfig {
    /// Model cache directory, defaulting to `$XDG_CACHE_HOME/scrivd/models`.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("scrivd")
                .join("models")
        })
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file is not an error. A missing explicit
    /// file is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default().with_env_credentials()),
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default().with_env_credentials());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let config = Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config.with_env_credentials())
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.settle_ms == 0 {
            return Err(ConfigError::Invalid("capture.settle_ms must be > 0".into()));
        }
        if self.capture.scope_timeout_ms <= self.capture.settle_ms {
            return Err(ConfigError::Invalid(
                "capture.scope_timeout_ms must exceed capture.settle_ms".into(),
            ));
        }
        if self.providers.local.max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "providers.local.max_tokens must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Fill empty API keys from `GEMINI_API_KEY` / `OPENAI_API_KEY`.
    fn with_env_credentials(mut self) -> Self {
        if self.providers.gemini.api_key.is_empty()
            && let Ok(key) = std::env::var("GEMINI_API_KEY")
        {
            self.providers.gemini.api_key = key;
        }
        if self.providers.openai.api_key.is_empty()
            && let Ok(key) = std::env::var("OPENAI_API_KEY")
        {
            self.providers.openai.api_key = key;
        }
        self
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scrivd").join("config.toml"))
}
