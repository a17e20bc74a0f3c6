//! OpenAI-compatible `chat/completions` adapter.
//!
//! Works against any server speaking the same schema (OpenAI, Groq,
//! OpenRouter, LM Studio, vLLM) by changing `base_url`.

use serde::Deserialize;
use serde_json::{Value, json};

use super::sse::{Flow, read_lines, sse_data};
use super::{ChunkSender, ProviderRequest, emit, encode_image, error_for_status};
use crate::config::OpenAiConfig;
use crate::error::PipelineError;

pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
    delta: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

/// `{"error": {"message": "...", "type": "..."}}`
fn error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    let err = v.get("error")?;
    let message = err.get("message").and_then(Value::as_str)?;
    Some(match err.get("type").and_then(Value::as_str) {
        Some(kind) if !kind.is_empty() => format!("{message} ({kind})"),
        _ => message.to_string(),
    })
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { http, config }
    }

    fn body(&self, request: &ProviderRequest) -> Value {
        let user = if request.images.is_empty() {
            json!(request.user_prompt)
        } else {
            let mut parts = vec![json!({ "type": "text", "text": request.user_prompt })];
            parts.extend(request.images.iter().map(|image| {
                json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", image.format.mime(), encode_image(image))
                    }
                })
            }));
            Value::Array(parts)
        };

        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": user },
            ],
            "temperature": 0.5,
            "stream": request.streaming,
        })
    }

    pub async fn generate(
        &self,
        request: &ProviderRequest,
        chunks: Option<&ChunkSender>,
    ) -> Result<String, PipelineError> {
        if self.config.api_key.is_empty() {
            return Err(PipelineError::MissingCredential(
                "OpenAI API key (providers.openai.api_key or OPENAI_API_KEY)".into(),
            ));
        }

        let mut builder = self
            .http
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key);
        if !self.config.organization.is_empty() {
            builder = builder.header("OpenAI-Organization", &self.config.organization);
        }
        if !self.config.project.is_empty() {
            builder = builder.header("OpenAI-Project", &self.config.project);
        }

        tracing::debug!(model = %self.config.model, streaming = request.streaming, "openai request");
        let response = builder.json(&self.body(request)).send().await?;
        let response = error_for_status(response, error_message).await?;

        if !request.streaming {
            let parsed: ChatResponse = response.json().await?;
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message)
                .and_then(|m| m.content)
                .ok_or_else(|| PipelineError::backend("response contained no message"));
        }

        let mut out = String::new();
        read_lines(response, |line| {
            let Some(data) = sse_data(line) else {
                return Ok(Flow::Continue);
            };
            if data == "[DONE]" {
                return Ok(Flow::Done);
            }
            if let Some(detail) = error_message(data) {
                return Err(PipelineError::backend(detail));
            }
            let parsed: ChatResponse = serde_json::from_str(data)
                .map_err(|e| PipelineError::backend(format!("malformed stream event: {e}")))?;
            if let Some(text) = parsed
                .choices
                .first()
                .and_then(|c| c.delta.as_ref())
                .and_then(|d| d.content.as_deref())
            {
                emit(chunks, text);
                out.push_str(text);
            }
            Ok(Flow::Continue)
        })
        .await?;
        Ok(out)
    }
}
