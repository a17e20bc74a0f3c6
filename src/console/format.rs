//! Terminal output for the CLI and the daemon.
//!
//! Results meant for piping (a conversation reply) go to stdout; status
//! lines and errors go to stderr.

use crate::dispatch::{Command, CommandSet, DeliveryMode, Outcome};
use crate::error::PipelineError;
use crate::provider::local::{LocalModelState, ModelFiles};

/// Short name for an outcome, for logs.
pub fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Pasted { .. } => "pasted",
        Outcome::Conversation(_) => "conversation",
        Outcome::Cancelled => "cancelled",
    }
}

pub fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Pasted {
            text,
            restore_warning,
        } => {
            eprintln!("Pasted {} characters", text.chars().count());
            if let Some(message) = restore_warning.as_ref().and_then(PipelineError::user_message) {
                eprintln!("warning: {message}");
            }
        }
        Outcome::Conversation(session) => {
            if let Some(reply) = session.messages().last() {
                println!("{}", reply.content);
            }
        }
        Outcome::Cancelled => eprintln!("Cancelled"),
    }
}

/// Print the user-facing form of `e`. Cancellation prints nothing.
pub fn print_error(e: &PipelineError) {
    if let Some(message) = e.user_message() {
        eprintln!("{message}");
    }
}

pub fn print_commands(commands: &CommandSet) {
    println!("{:<16} {:<14} SOURCE", "NAME", "RESULT");
    println!("{}", "-".repeat(40));
    for command in commands.iter() {
        println!("{}", command_row(command));
    }
}

fn command_row(command: &Command) -> String {
    format!(
        "{:<16} {:<14} {}",
        command.name,
        delivery_label(command.delivery),
        if command.builtin { "built-in" } else { "config" }
    )
}

fn delivery_label(mode: DeliveryMode) -> &'static str {
    match mode {
        DeliveryMode::PasteBack => "paste",
        DeliveryMode::OpenConversation => "conversation",
    }
}

pub fn print_model(state: &LocalModelState, files: &ModelFiles) {
    println!("State:     {state}");
    println!("Weights:   {}", files.model.display());
    println!("Tokenizer: {}", files.tokenizer.display());
}
