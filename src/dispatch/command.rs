//! Writing commands: built-ins plus user definitions from config.
//!
//! A user command whose name matches a built-in (case-insensitively)
//! replaces it; other user commands are appended in file order.

use serde::Deserialize;

/// Reply a backend gives when the text cannot be used with a command.
pub const INCOMPATIBLE_SENTINEL: &str = "ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST";

pub const CUSTOM: &str = "Custom";

/// Where a command's result goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    PasteBack,
    OpenConversation,
}

/// A command as written in `[[commands]]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    pub instruction: String,
    #[serde(default)]
    pub open_in_window: bool,
}

/// A resolved command ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub prefix: String,
    /// System prompt sent with every request for this command.
    pub instruction: String,
    pub delivery: DeliveryMode,
    pub builtin: bool,
}

impl Command {
    fn user(spec: &CommandSpec) -> Self {
        Self {
            name: spec.name.clone(),
            prefix: spec.prefix.clone(),
            instruction: spec.instruction.clone(),
            delivery: if spec.open_in_window {
                DeliveryMode::OpenConversation
            } else {
                DeliveryMode::PasteBack
            },
            builtin: false,
        }
    }

    pub fn is_custom(&self) -> bool {
        self.name.eq_ignore_ascii_case(CUSTOM)
    }
}

struct Builtin {
    name: &'static str,
    prefix: &'static str,
    instruction: &'static str,
    delivery: DeliveryMode,
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "Proofread",
        prefix: "Proofread this:\n\n",
        instruction: "You are a grammar proofreading assistant. Output ONLY the corrected text without any additional comments. Maintain the original text structure and writing style. Respond in the same language as the input (e.g., English US, French). If the text is incompatible with this (e.g., random gibberish), output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::PasteBack,
    },
    Builtin {
        name: "Rewrite",
        prefix: "Rewrite this:\n\n",
        instruction: "You are a writing assistant. Rewrite the text provided by the user to improve phrasing. Output ONLY the rewritten text without additional comments. Respond in the same language as the input (e.g., English US, French). If the text is incompatible with rewriting (e.g., random gibberish), output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::PasteBack,
    },
    Builtin {
        name: "Friendly",
        prefix: "Make this more friendly:\n\n",
        instruction: "You are a writing assistant. Rewrite the text provided by the user to be more friendly. Output ONLY the revised text without additional comments. Respond in the same language as the input (e.g., English US, French). If the text is incompatible with rewriting (e.g., random gibberish), output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::PasteBack,
    },
    Builtin {
        name: "Professional",
        prefix: "Make this more professional:\n\n",
        instruction: "You are a writing assistant. Rewrite the text provided by the user to sound more professional. Output ONLY the revised text without additional comments. Respond in the same language as the input (e.g., English US, French). If the text is incompatible with this (e.g., random gibberish), output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::PasteBack,
    },
    Builtin {
        name: "Concise",
        prefix: "Make this more concise:\n\n",
        instruction: "You are a writing assistant. Rewrite the text provided by the user to be more concise. Output ONLY the concise version without additional comments. Respond in the same language as the input (e.g., English US, French). If the text is incompatible with this (e.g., random gibberish), output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::PasteBack,
    },
    Builtin {
        name: "Summary",
        prefix: "Summarize this:\n\n",
        instruction: "You are a summarization assistant. Provide a concise summary of the text provided by the user. Output ONLY the summary without additional comments. Respond in the same language as the input (e.g., English US, French). If the text is incompatible with summarization (e.g., random gibberish), output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::OpenConversation,
    },
    Builtin {
        name: "Key Points",
        prefix: "Extract key points from this:\n\n",
        instruction: "You are an assistant that extracts key points from text provided by the user. Output ONLY the key points without additional comments. Respond in the same language as the input (e.g., English US, French). If the text is incompatible with extracting key points (e.g., random gibberish), output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::OpenConversation,
    },
    Builtin {
        name: "Table",
        prefix: "Convert this into a table:\n\n",
        instruction: "You are an assistant that converts text provided by the user into a table. Output ONLY the table without additional comments. Respond in the same language as the input (e.g., English US, French). If the text is incompatible with conversion to a table, output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::OpenConversation,
    },
    Builtin {
        name: CUSTOM,
        prefix: "Make the following change to this text:\n\n",
        instruction: "You are a writing assistant. You MUST make the user's described change to the text provided by the user. Output ONLY the appropriately modified text without additional comments. Respond in the same language as the input (e.g., English US, French). If the text is completely incompatible with the requested change, output \"ERROR_TEXT_INCOMPATIBLE_WITH_REQUEST\".",
        delivery: DeliveryMode::PasteBack,
    },
];

/// The built-in command set, in menu order.
pub fn builtins() -> Vec<Command> {
    BUILTINS
        .iter()
        .map(|b| Command {
            name: b.name.to_string(),
            prefix: b.prefix.to_string(),
            instruction: b.instruction.to_string(),
            delivery: b.delivery,
            builtin: true,
        })
        .collect()
}

/// Named lookup over built-ins merged with user commands.
#[derive(Debug, Clone)]
pub struct CommandSet {
    commands: Vec<Command>,
}

impl CommandSet {
    pub fn new(user: &[CommandSpec]) -> Self {
        let mut commands = builtins();
        for spec in user {
            let command = Command::user(spec);
            match commands
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&spec.name))
            {
                Some(existing) => {
                    tracing::debug!(name = %spec.name, "user command overrides built-in");
                    *existing = command;
                }
                None => commands.push(command),
            }
        }
        Self { commands }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Command> {
        let name = name.trim();
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }
}
