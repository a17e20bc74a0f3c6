//! Turn a command plus captured content into a provider request.

use super::command::{Command, DeliveryMode, INCOMPATIBLE_SENTINEL};
use crate::capture::CaptureResult;
use crate::clipboard::ClipboardImage;
use crate::error::PipelineError;

/// System instruction when the user asks a question with nothing selected.
pub const CHAT_INSTRUCTION: &str = "You are a friendly, helpful, compassionate, and endearing AI \
    conversational assistant. Avoid making assumptions or generating harmful, biased, or \
    inappropriate content. When in doubt, do not make up information. Ask the user for \
    clarification if needed. Try not be unnecessarily repetitive in your response. You can, and \
    should as appropriate, use Markdown formatting to make your response nicely readable.";

/// A request ready to send, plus where its answer goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub images: Vec<ClipboardImage>,
    pub delivery: DeliveryMode,
    /// First user message of the conversation, if one is opened.
    pub opening: String,
}

/// Build the prompt for `command` over `capture`.
///
/// With nothing captured only Custom is allowed: the instruction is
/// asked as a plain question and the answer always opens a conversation.
pub fn assemble(
    command: &Command,
    capture: &CaptureResult,
    instruction: Option<&str>,
) -> Result<Prompt, PipelineError> {
    let instruction = instruction.map(str::trim).filter(|s| !s.is_empty());

    if capture.is_empty() {
        if !command.is_custom() {
            return Err(PipelineError::Capture(
                "select text to use this command".into(),
            ));
        }
        let Some(question) = instruction else {
            return Err(PipelineError::Config(
                "nothing selected and no instruction given".into(),
            ));
        };
        return Ok(Prompt {
            system: CHAT_INSTRUCTION.to_string(),
            user: question.to_string(),
            images: Vec::new(),
            delivery: DeliveryMode::OpenConversation,
            opening: question.to_string(),
        });
    }

    let text = capture.text.as_str();
    let user = if command.is_custom() {
        let Some(change) = instruction else {
            return Err(PipelineError::Config(
                "the Custom command needs an instruction describing the change".into(),
            ));
        };
        format!("{}Described change: {change}\n\nText: {text}", command.prefix)
    } else {
        format!("{}{text}", command.prefix)
    };

    Ok(Prompt {
        system: command.instruction.clone(),
        user,
        images: capture.images.clone(),
        delivery: command.delivery,
        opening: format!(
            "Original text to {}:\n\n{text}",
            command.name.to_lowercase()
        ),
    })
}

/// Whether `reply` is the backend saying the text does not fit the command.
///
/// Whitespace is ignored so a reply wrapped or padded by the model still
/// counts.
pub fn is_incompatible(reply: &str) -> bool {
    reply
        .chars()
        .filter(|c| !c.is_whitespace())
        .eq(INCOMPATIBLE_SENTINEL.chars())
}
