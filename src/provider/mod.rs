//! ProviderClient: one request/response/cancel contract over several
//! AI backends.
//!
//! The backend is picked by [`ProviderKind`]; each variant owns its
//! own wire protocol and error-envelope translation. Every client
//! carries a [`RuntimeGuard`] so that at most one request is in flight
//! per instance.

pub mod gemini;
pub mod local;
pub mod ollama;
pub mod openai;
pub mod runtime;
pub mod sse;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clipboard::ClipboardImage;
use crate::config::ProvidersConfig;
use crate::error::PipelineError;

pub use gemini::GeminiClient;
pub use local::{LocalModel, LocalModelState};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use runtime::{InFlight, ProviderRuntimeState, RuntimeGuard};

/// Receives partial text while a streaming request is running.
pub type ChunkSender = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
    Local,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gemini,
        ProviderKind::OpenAi,
        ProviderKind::Ollama,
        ProviderKind::Local,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "unknown provider {s:?} (expected gemini, openai, ollama or local)"
                ))
            })
    }
}

/// One call on one provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub images: Vec<ClipboardImage>,
    pub streaming: bool,
    pub target: ProviderKind,
}

enum Backend {
    Gemini(GeminiClient),
    OpenAi(OpenAiClient),
    Ollama(OllamaClient),
    Local(Arc<LocalModel>),
}

/// A backend plus its single-in-flight guard.
pub struct ProviderClient {
    kind: ProviderKind,
    backend: Backend,
    guard: RuntimeGuard,
}

impl fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderClient")
            .field("kind", &self.kind)
            .field("state", &self.guard.state())
            .finish()
    }
}

/// Shared HTTP client for the cloud adapters.
///
/// No overall timeout: streamed answers can take a while. Connect
/// failures surface as network errors.
pub fn http_client() -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .user_agent(concat!("scrivd/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PipelineError::Config(format!("HTTP client: {e}")))
}

impl ProviderClient {
    /// Build the client for `kind` from configuration.
    pub fn from_config(
        kind: ProviderKind,
        config: &ProvidersConfig,
        http: &reqwest::Client,
    ) -> Self {
        let backend = match kind {
            ProviderKind::Gemini => Backend::Gemini(GeminiClient::new(http.clone(), config.gemini.clone())),
            ProviderKind::OpenAi => Backend::OpenAi(OpenAiClient::new(http.clone(), config.openai.clone())),
            ProviderKind::Ollama => Backend::Ollama(OllamaClient::new(http.clone(), config.ollama.clone())),
            ProviderKind::Local => {
                Backend::Local(Arc::new(LocalModel::new(http.clone(), config.local.clone())))
            }
        };
        Self {
            kind,
            backend,
            guard: RuntimeGuard::new(),
        }
    }

    /// Wrap an existing local model, sharing its lifecycle state.
    pub fn local(model: Arc<LocalModel>) -> Self {
        Self {
            kind: ProviderKind::Local,
            backend: Backend::Local(model),
            guard: RuntimeGuard::new(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn state(&self) -> ProviderRuntimeState {
        self.guard.state()
    }

    pub fn local_model(&self) -> Option<&Arc<LocalModel>> {
        match &self.backend {
            Backend::Local(model) => Some(model),
            _ => None,
        }
    }

    /// Run `request`, refusing with `ConcurrentUseConflict` if busy.
    pub async fn try_process(
        &self,
        request: &ProviderRequest,
        chunks: Option<&ChunkSender>,
    ) -> Result<String, PipelineError> {
        let flight = self.guard.try_begin(self.kind)?;
        self.run(flight, request, chunks).await
    }

    /// Run `request`, waiting behind any in-flight request.
    pub async fn process(
        &self,
        request: &ProviderRequest,
        chunks: Option<&ChunkSender>,
    ) -> Result<String, PipelineError> {
        let flight = self.guard.begin().await?;
        self.run(flight, request, chunks).await
    }

    /// Convenience form of [`process`](Self::process).
    pub async fn process_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        images: &[ClipboardImage],
        streaming: bool,
    ) -> Result<String, PipelineError> {
        let request = ProviderRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            images: images.to_vec(),
            streaming,
            target: self.kind,
        };
        self.process(&request, None).await
    }

    /// Cancel the in-flight request, if any. Safe at any time; repeated
    /// calls are no-ops.
    pub fn cancel(&self) {
        if self.guard.cancel() {
            tracing::info!(provider = %self.kind, "cancellation requested");
        }
    }

    /// Wait until no request is in flight.
    pub async fn wait_idle(&self) {
        self.guard.idle().await;
    }

    async fn run(
        &self,
        flight: InFlight<'_>,
        request: &ProviderRequest,
        chunks: Option<&ChunkSender>,
    ) -> Result<String, PipelineError> {
        let token = flight.token().clone();
        tracing::info!(
            provider = %self.kind,
            streaming = request.streaming,
            images = request.images.len(),
            "request started"
        );

        let call = self.call(request, chunks, &token);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PipelineError::Cancelled),
            r = call => r,
        };
        drop(flight);

        match result {
            Ok(text) => {
                let text = text.trim_end_matches(['\n', '\r']).to_string();
                tracing::info!(provider = %self.kind, chars = text.chars().count(), "request finished");
                Ok(text)
            }
            Err(PipelineError::Cancelled) => {
                tracing::info!(provider = %self.kind, "request cancelled");
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(provider = %self.kind, kind = %e.kind(), error = %e, "request failed");
                Err(e)
            }
        }
    }

    async fn call(
        &self,
        request: &ProviderRequest,
        chunks: Option<&ChunkSender>,
        token: &CancellationToken,
    ) -> Result<String, PipelineError> {
        match &self.backend {
            Backend::Gemini(c) => c.generate(request, chunks).await,
            Backend::OpenAi(c) => c.generate(request, chunks).await,
            Backend::Ollama(c) => c.generate(request, chunks).await,
            Backend::Local(m) => m.generate(request, chunks, token).await,
        }
    }
}

/// Turn a non-2xx response into a `Backend` error.
///
/// `extract` pulls the human-readable message out of the backend's
/// error envelope; the raw body is used when it cannot.
pub(crate) async fn error_for_status(
    response: reqwest::Response,
    extract: fn(&str) -> Option<String>,
) -> Result<reqwest::Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = extract(&body)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(300).collect())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(PipelineError::Backend {
        status: Some(status.as_u16()),
        detail,
    })
}

/// Base64 payload for an inline image.
pub(crate) fn encode_image(image: &ClipboardImage) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(&image.bytes)
}

/// Forward a chunk to the sink, ignoring a closed receiver.
pub(crate) fn emit(chunks: Option<&ChunkSender>, text: &str) {
    if let Some(tx) = chunks
        && !text.is_empty()
    {
        let _ = tx.send(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeminiConfig;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gemini_at(server: &MockServer) -> ProviderClient {
        let config = ProvidersConfig {
            gemini: GeminiConfig {
                api_key: "test-key".into(),
                base_url: server.uri(),
                ..GeminiConfig::default()
            },
            ..ProvidersConfig::default()
        };
        ProviderClient::from_config(ProviderKind::Gemini, &config, &reqwest::Client::new())
    }

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        })
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!(" local ".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert!(matches!(
            "claude".parse::<ProviderKind>(),
            Err(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn trailing_newlines_trimmed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("Fixed text.\n\n")))
            .mount(&server)
            .await;

        let client = gemini_at(&server);
        let out = client.process_text("sys", "user", &[], false).await.unwrap();
        assert_eq!(out, "Fixed text.");
        assert_eq!(client.state(), ProviderRuntimeState::Idle);
    }

    #[tokio::test]
    async fn second_request_rejected_while_busy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("first"))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let client = Arc::new(gemini_at(&server));
        let request = ProviderRequest {
            system_prompt: "sys".into(),
            user_prompt: "one".into(),
            images: vec![],
            streaming: false,
            target: ProviderKind::Gemini,
        };

        let first = {
            let client = Arc::clone(&client);
            let request = request.clone();
            tokio::spawn(async move { client.try_process(&request, None).await })
        };
        while client.state() != ProviderRuntimeState::Busy {
            tokio::task::yield_now().await;
        }

        let second = client.try_process(&request, None).await;
        assert!(matches!(second, Err(PipelineError::ConcurrentUseConflict(_))));

        assert_eq!(first.await.unwrap().unwrap(), "first");
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_interrupts_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("too late"))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let client = Arc::new(gemini_at(&server));
        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.process_text("s", "u", &[], false).await })
        };
        while client.state() != ProviderRuntimeState::Busy {
            tokio::task::yield_now().await;
        }

        client.cancel();
        client.cancel();

        assert!(matches!(task.await.unwrap(), Err(PipelineError::Cancelled)));
        assert_eq!(client.state(), ProviderRuntimeState::Idle);
        client.cancel();
    }
}
