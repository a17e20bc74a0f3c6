//! Dispatcher: captured content + command → provider → delivery.
//!
//! One request per provider at a time. A dispatch against a busy
//! provider is refused, never interleaved. The provider is fixed when
//! a dispatch starts, so switching the active provider only affects
//! the next one.

pub mod command;
pub mod prompt;
pub mod spam;

use std::sync::{Arc, RwLock};

pub use command::{Command, CommandSet, DeliveryMode};
pub use spam::SpamGuard;

use crate::capture::CaptureResult;
use crate::conversation::ConversationSession;
use crate::deliver::ResultDeliverer;
use crate::error::PipelineError;
use crate::provider::{ProviderClient, ProviderRequest, ProviderRuntimeState};

/// How a dispatch ended.
#[derive(Debug)]
pub enum Outcome {
    /// The result replaced the selection.
    Pasted {
        text: String,
        /// Set when the user's clipboard could not be restored.
        restore_warning: Option<PipelineError>,
    },
    /// The result opened a conversation owned by the caller.
    Conversation(ConversationSession),
    /// The request was cancelled; nothing was delivered.
    Cancelled,
}

pub struct Dispatcher {
    active: RwLock<Arc<ProviderClient>>,
    deliverer: ResultDeliverer,
}

impl Dispatcher {
    pub fn new(provider: Arc<ProviderClient>, deliverer: ResultDeliverer) -> Self {
        Self {
            active: RwLock::new(provider),
            deliverer,
        }
    }

    pub fn active(&self) -> Arc<ProviderClient> {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&active)
    }

    /// Route later dispatches to `provider`. A request already running
    /// on the previous provider finishes normally.
    pub fn set_active(&self, provider: Arc<ProviderClient>) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        tracing::info!(from = %active.kind(), to = %provider.kind(), "active provider switched");
        *active = provider;
    }

    pub fn is_busy(&self) -> bool {
        self.active().state() != ProviderRuntimeState::Idle
    }

    /// Cancel the active provider's in-flight request, if any.
    pub fn cancel(&self) {
        self.active().cancel();
    }

    /// Run `command` over `capture` and deliver the result.
    ///
    /// Errors are returned to the caller for display. Nothing is pasted
    /// unless the whole reply arrived and is usable.
    pub async fn execute(
        &self,
        command: &Command,
        capture: &CaptureResult,
        instruction: Option<&str>,
    ) -> Result<Outcome, PipelineError> {
        let prompt = prompt::assemble(command, capture, instruction)?;
        let provider = self.active();
        tracing::info!(
            command = %command.name,
            provider = %provider.kind(),
            delivery = ?prompt.delivery,
            chars = capture.text.chars().count(),
            images = capture.images.len(),
            "dispatching"
        );

        let request = ProviderRequest {
            system_prompt: prompt.system,
            user_prompt: prompt.user,
            images: prompt.images,
            streaming: false,
            target: provider.kind(),
        };
        let reply = match provider.try_process(&request, None).await {
            Ok(reply) => reply,
            Err(PipelineError::Cancelled) => return Ok(Outcome::Cancelled),
            Err(e) => return Err(e),
        };

        if prompt::is_incompatible(&reply) {
            tracing::warn!(command = %command.name, "backend declared the text incompatible");
            return Err(PipelineError::IncompatibleRequest);
        }
        if reply.trim().is_empty() {
            return Err(PipelineError::backend("the provider returned an empty response"));
        }

        match prompt.delivery {
            DeliveryMode::PasteBack => {
                let restore_warning = self.deliverer.deliver(&reply, &capture.source).await?;
                Ok(Outcome::Pasted {
                    text: reply,
                    restore_warning,
                })
            }
            DeliveryMode::OpenConversation => Ok(Outcome::Conversation(
                ConversationSession::seeded(provider, &prompt.opening, &reply),
            )),
        }
    }
}
