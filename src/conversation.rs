//! Follow-up chat over a transformation result.
//!
//! Backends are treated as stateless: every follow-up resends the whole
//! history as a role-prefixed transcript. History is append-only and a
//! session runs one `ask` at a time.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::error::PipelineError;
use crate::provider::{ChunkSender, ProviderClient, ProviderKind, ProviderRequest};

/// System instruction for every follow-up question.
pub const FOLLOW_UP_INSTRUCTION: &str = "You are a helpful AI assistant. Provide clear and direct \
    responses, maintaining the same format and style as your previous responses. If appropriate, \
    use Markdown formatting to make your response more readable.";

/// Current time as Unix epoch milliseconds.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Unix epoch milliseconds; never decreases along the history.
    pub timestamp: u64,
}

pub struct ConversationSession {
    id: Uuid,
    provider: Arc<ProviderClient>,
    messages: Mutex<Vec<Message>>,
    asking: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("id", &self.id)
            .field("provider", &self.provider.kind())
            .field("messages", &self.len())
            .finish()
    }
}

impl ConversationSession {
    /// An empty session bound to `provider`.
    pub fn new(provider: Arc<ProviderClient>) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, provider = %provider.kind(), "conversation opened");
        Self {
            id,
            provider,
            messages: Mutex::new(Vec::new()),
            asking: tokio::sync::Mutex::new(()),
        }
    }

    /// A session whose history starts with `opening` and the first reply.
    pub fn seeded(provider: Arc<ProviderClient>, opening: &str, reply: &str) -> Self {
        let session = Self::new(provider);
        session.append(&[(Role::User, opening), (Role::Assistant, reply)]);
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn messages(&self) -> Vec<Message> {
        self.history().clone()
    }

    pub fn len(&self) -> usize {
        self.history().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history().is_empty()
    }

    /// Whether a follow-up is in flight.
    pub fn is_asking(&self) -> bool {
        self.asking.try_lock().is_err()
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    /// Cancel the follow-up in flight, if any.
    pub fn cancel(&self) {
        self.provider.cancel();
    }

    /// History as `Role: content` blocks separated by blank lines.
    pub fn transcript(&self) -> String {
        render(&self.history())
    }

    /// Send `question` with the full history and append both sides.
    ///
    /// Nothing is appended when the request fails, so the history
    /// always alternates question and answer.
    pub async fn ask(
        &self,
        question: &str,
        chunks: Option<&ChunkSender>,
    ) -> Result<String, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::Config("the question is empty".into()));
        }
        let Ok(_asking) = self.asking.try_lock() else {
            return Err(PipelineError::ConcurrentUseConflict(
                "this conversation is still waiting for a reply".into(),
            ));
        };

        let asked_at = epoch_millis();
        let request = ProviderRequest {
            system_prompt: FOLLOW_UP_INSTRUCTION.to_string(),
            user_prompt: self.follow_up_prompt(question),
            images: Vec::new(),
            streaming: chunks.is_some(),
            target: self.provider.kind(),
        };
        tracing::debug!(session = %self.id, history = self.len(), "follow-up sent");

        let reply = self.provider.try_process(&request, chunks).await?;

        let mut history = self.history();
        let asked_at = asked_at.max(history.last().map_or(0, |m| m.timestamp));
        let answered_at = epoch_millis().max(asked_at);
        history.push(Message {
            role: Role::User,
            content: question.to_string(),
            timestamp: asked_at,
        });
        history.push(Message {
            role: Role::Assistant,
            content: reply.clone(),
            timestamp: answered_at,
        });
        Ok(reply)
    }

    fn follow_up_prompt(&self, question: &str) -> String {
        let transcript = self.transcript();
        if transcript.is_empty() {
            format!("{}: {question}", Role::User)
        } else {
            format!("{transcript}\n\n{}: {question}", Role::User)
        }
    }

    fn append(&self, entries: &[(Role, &str)]) {
        let mut history = self.history();
        for (role, content) in entries {
            let now = epoch_millis().max(history.last().map_or(0, |m| m.timestamp));
            history.push(Message {
                role: *role,
                content: content.to_string(),
                timestamp: now,
            });
        }
    }

    fn history(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        // Plain pushes cannot leave the vector half-written.
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn render(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OllamaConfig, ProvidersConfig};
    use crate::provider::ProviderKind;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Arc<ProviderClient> {
        let config = ProvidersConfig {
            ollama: OllamaConfig {
                base_url: server.uri(),
                ..OllamaConfig::default()
            },
            ..ProvidersConfig::default()
        };
        Arc::new(ProviderClient::from_config(
            ProviderKind::Ollama,
            &config,
            &reqwest::Client::new(),
        ))
    }

    fn reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": text},
            "done": true
        }))
    }

    #[tokio::test]
    async fn seeded_history_is_ordered() {
        let server = MockServer::start().await;
        let s = ConversationSession::seeded(client(&server), "Original text to summary:\n\nLong text", "Short.");
        let m = s.messages();
        assert_eq!(m.len(), 2);
        assert_eq!(m[0].role, Role::User);
        assert_eq!(m[1].role, Role::Assistant);
        assert!(m[0].timestamp <= m[1].timestamp);
        assert_eq!(
            s.transcript(),
            "User: Original text to summary:\n\nLong text\n\nAssistant: Short."
        );
    }

    #[tokio::test]
    async fn follow_up_sends_transcript_and_appends_both_sides() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "system", "content": FOLLOW_UP_INSTRUCTION},
                    {"role": "user", "content": "User: hi\n\nAssistant: hello\n\nUser: and then?"}
                ]
            })))
            .respond_with(reply("then this\n"))
            .expect(1)
            .mount(&server)
            .await;

        let s = ConversationSession::seeded(client(&server), "hi", "hello");
        let answer = s.ask("  and then? ", None).await.unwrap();

        assert_eq!(answer, "then this");
        let m = s.messages();
        assert_eq!(m.len(), 4);
        assert_eq!(m[2].content, "and then?");
        assert_eq!(m[3].role, Role::Assistant);
        assert!(m.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn each_answer_is_resent_with_the_next_question() {
        let server = MockServer::start().await;
        for (prompt, answer) in [
            ("User: Q1", "A1"),
            ("User: Q1\n\nAssistant: A1\n\nUser: Q2", "A2"),
            (
                "User: Q1\n\nAssistant: A1\n\nUser: Q2\n\nAssistant: A2\n\nUser: Q3",
                "A3",
            ),
        ] {
            Mock::given(method("POST"))
                .and(path("/api/chat"))
                .and(body_partial_json(json!({
                    "messages": [
                        {"role": "system", "content": FOLLOW_UP_INSTRUCTION},
                        {"role": "user", "content": prompt}
                    ]
                })))
                .respond_with(reply(answer))
                .expect(1)
                .mount(&server)
                .await;
        }

        let s = ConversationSession::new(client(&server));
        assert_eq!(s.ask("Q1", None).await.unwrap(), "A1");
        assert_eq!(s.ask("Q2", None).await.unwrap(), "A2");
        assert_eq!(s.ask("Q3", None).await.unwrap(), "A3");

        let contents: Vec<_> = s.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, ["Q1", "A1", "Q2", "A2", "Q3", "A3"]);
        assert!(s.messages().windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn failed_follow_up_leaves_history_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
            .mount(&server)
            .await;

        let s = ConversationSession::seeded(client(&server), "q", "a");
        assert!(s.ask("again", None).await.is_err());
        assert_eq!(s.len(), 2);
    }

    #[tokio::test]
    async fn one_ask_at_a_time() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply("slow").set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let s = Arc::new(ConversationSession::seeded(client(&server), "q", "a"));
        let first = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.ask("one", None).await })
        };
        while !s.is_asking() {
            tokio::task::yield_now().await;
        }

        let err = s.ask("two", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::ConcurrentUseConflict(_)));
        assert_eq!(first.await.unwrap().unwrap(), "slow");
        assert_eq!(s.len(), 4);
    }

    #[tokio::test]
    async fn empty_question_rejected() {
        let server = MockServer::start().await;
        let s = ConversationSession::new(client(&server));
        assert!(s.ask("   ", None).await.is_err());
        assert!(s.is_empty());
    }
}
