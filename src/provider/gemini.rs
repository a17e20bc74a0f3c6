//! Google Gemini `generateContent` adapter.

use serde::Deserialize;
use serde_json::{Value, json};

use super::sse::{Flow, read_lines, sse_data};
use super::{ChunkSender, ProviderRequest, emit, encode_image, error_for_status};
use crate::config::GeminiConfig;
use crate::error::PipelineError;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> Result<String, PipelineError> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(PipelineError::backend(format!("content blocked: {reason}")));
        }
        let Some(candidate) = self.candidates.first() else {
            return Ok(String::new());
        };
        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(PipelineError::backend("content blocked: SAFETY"));
        }
        Ok(candidate
            .content
            .iter()
            .flat_map(|c| &c.parts)
            .filter_map(|p| p.text.as_deref())
            .collect())
    }
}

/// `{"error": {"code": 400, "message": "...", "status": "..."}}`
fn error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: GeminiConfig) -> Self {
        Self { http, config }
    }

    fn body(request: &ProviderRequest) -> Value {
        let mut parts = vec![json!({ "text": request.user_prompt })];
        parts.extend(request.images.iter().map(|image| {
            json!({
                "inlineData": {
                    "mimeType": image.format.mime(),
                    "data": encode_image(image),
                }
            })
        }));

        json!({
            "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "candidateCount": 1,
                "maxOutputTokens": 1000,
                "temperature": 0.5,
            },
            "safetySettings": HARM_CATEGORIES
                .iter()
                .map(|c| json!({ "category": c, "threshold": "BLOCK_NONE" }))
                .collect::<Vec<_>>(),
        })
    }

    pub async fn generate(
        &self,
        request: &ProviderRequest,
        chunks: Option<&ChunkSender>,
    ) -> Result<String, PipelineError> {
        if self.config.api_key.is_empty() {
            return Err(PipelineError::MissingCredential(
                "Gemini API key (providers.gemini.api_key or GEMINI_API_KEY)".into(),
            ));
        }

        let method = if request.streaming {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let url = format!(
            "{}/models/{}:{method}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let mut builder = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.config.api_key);
        if request.streaming {
            builder = builder.query(&[("alt", "sse")]);
        }

        tracing::debug!(model = %self.config.model, streaming = request.streaming, "gemini request");
        let response = builder.json(&Self::body(request)).send().await?;
        let response = error_for_status(response, error_message).await?;

        if !request.streaming {
            let parsed: GenerateResponse = response.json().await?;
            return parsed.text();
        }

        let mut out = String::new();
        read_lines(response, |line| {
            let Some(data) = sse_data(line) else {
                return Ok(Flow::Continue);
            };
            let parsed: GenerateResponse = serde_json::from_str(data)
                .map_err(|e| PipelineError::backend(format!("malformed stream event: {e}")))?;
            let text = parsed.text()?;
            emit(chunks, &text);
            out.push_str(&text);
            Ok(Flow::Continue)
        })
        .await?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{ClipboardImage, ImageFormat};
    use crate::provider::ProviderKind;
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, key: &str) -> GeminiClient {
        GeminiClient::new(
            reqwest::Client::new(),
            GeminiConfig {
                api_key: key.into(),
                model: "gemini-test".into(),
                base_url: server.uri(),
            },
        )
    }

    fn request(streaming: bool) -> ProviderRequest {
        ProviderRequest {
            system_prompt: "You are a proofreader.".into(),
            user_prompt: "Proofread: teh cat".into(),
            images: vec![],
            streaming,
            target: ProviderKind::Gemini,
        }
    }

    #[tokio::test]
    async fn sends_key_system_instruction_and_settings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "k-123"))
            .and(body_partial_json(json!({
                "systemInstruction": {"parts": [{"text": "You are a proofreader."}]},
                "generationConfig": {"candidateCount": 1, "maxOutputTokens": 1000},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "the "}, {"text": "cat"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = client(&server, "k-123").generate(&request(false), None).await.unwrap();
        assert_eq!(out, "the cat");
    }

    #[tokio::test]
    async fn images_sent_inline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [
                    {"text": "Proofread: teh cat"},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                ]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut req = request(false);
        req.images.push(ClipboardImage {
            format: ImageFormat::Png,
            bytes: vec![1, 2, 3],
        });
        assert_eq!(client(&server, "k").generate(&req, None).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn key_stays_out_of_url_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}]}}]
            })))
            .mount(&server)
            .await;
        client(&server, "SECRET-KEY-123").generate(&request(false), None).await.unwrap();
        let received = server.received_requests().await.unwrap();
        assert!(!received[0].url.as_str().contains("SECRET-KEY-123"));

        let offline = GeminiClient::new(
            reqwest::Client::new(),
            GeminiConfig {
                api_key: "SECRET-KEY-123".into(),
                model: "m".into(),
                base_url: "http://127.0.0.1:1".into(),
            },
        );
        let err = offline.generate(&request(false), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Network(_)));
        assert!(!err.user_message().unwrap().contains("SECRET-KEY-123"));
        assert!(!err.to_string().contains("SECRET-KEY-123"));
    }

    #[tokio::test]
    async fn missing_key_sends_nothing() {
        let server = MockServer::start().await;
        let err = client(&server, "").generate(&request(false), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingCredential(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_envelope_becomes_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}
            })))
            .mount(&server)
            .await;

        let err = client(&server, "bad").generate(&request(false), None).await.unwrap_err();
        match err {
            PipelineError::Backend { status, detail } => {
                assert_eq!(status, Some(400));
                assert_eq!(detail, "API key not valid.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn quota_error_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": 429, "message": "Resource has been exhausted (e.g. check quota)."}
            })))
            .mount(&server)
            .await;

        let err = client(&server, "k").generate(&request(false), None).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn blocked_prompt_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "OTHER"}
            })))
            .mount(&server)
            .await;

        let err = client(&server, "k").generate(&request(false), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Backend { ref detail, .. } if detail.contains("OTHER")));
    }

    #[tokio::test]
    async fn streaming_collects_sse_chunks() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hello\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\", world\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        );
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let out = client(&server, "k").generate(&request(true), Some(&tx)).await.unwrap();
        drop(tx);

        assert_eq!(out, "Hello, world");
        let mut seen = Vec::new();
        while let Some(c) = rx.recv().await {
            seen.push(c);
        }
        assert_eq!(seen, vec!["Hello", ", world"]);
    }
}
