//! Ollama `/api/chat` adapter.

use serde::Deserialize;
use serde_json::{Value, json};

use super::sse::{Flow, read_lines};
use super::{ChunkSender, ProviderRequest, emit, encode_image, error_for_status};
use crate::config::OllamaConfig;
use crate::error::PipelineError;

pub struct OllamaClient {
    http: reqwest::Client,
    config: OllamaConfig,
}

/// One response object; streaming sends one per line.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// `{"error": "model 'x' not found"}`
fn error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.get("error").and_then(Value::as_str).map(str::to_string)
}

impl OllamaClient {
    pub fn new(http: reqwest::Client, config: OllamaConfig) -> Self {
        Self { http, config }
    }

    fn body(&self, request: &ProviderRequest) -> Value {
        let mut user = json!({ "role": "user", "content": request.user_prompt });
        if !request.images.is_empty() {
            user["images"] = request.images.iter().map(encode_image).collect();
        }
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                user,
            ],
            "stream": request.streaming,
            "keep_alive": format!("{}m", self.config.keep_alive_minutes),
            "options": { "temperature": 0.5 },
        })
    }

    pub async fn generate(
        &self,
        request: &ProviderRequest,
        chunks: Option<&ChunkSender>,
    ) -> Result<String, PipelineError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        tracing::debug!(model = %self.config.model, streaming = request.streaming, "ollama request");

        let response = self
            .http
            .post(url)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| match PipelineError::from(e) {
                PipelineError::Network(detail) => PipelineError::Network(format!(
                    "{detail} (is Ollama running at {}?)",
                    self.config.base_url
                )),
                other => other,
            })?;
        let response = error_for_status(response, error_message).await?;

        if !request.streaming {
            let parsed: ChatChunk = response.json().await?;
            if let Some(e) = parsed.error {
                return Err(PipelineError::backend(e));
            }
            return parsed
                .message
                .map(|m| m.content)
                .ok_or_else(|| PipelineError::backend("response contained no message"));
        }

        let mut out = String::new();
        read_lines(response, |line| {
            let parsed: ChatChunk = serde_json::from_str(line)
                .map_err(|e| PipelineError::backend(format!("malformed stream line: {e}")))?;
            if let Some(e) = parsed.error {
                return Err(PipelineError::backend(e));
            }
            if let Some(m) = parsed.message {
                emit(chunks, &m.content);
                out.push_str(&m.content);
            }
            Ok(if parsed.done { Flow::Done } else { Flow::Continue })
        })
        .await?;
        Ok(out)
    }
}
