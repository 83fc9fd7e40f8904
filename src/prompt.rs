//! Conversation history and request composition.

use crate::distro::DistroFamily;
use std::fmt;

/// Instruction block sent once at the top of every request.
///
/// The sentinel prefixes here are the contract that
/// [`crate::model_client::classify_reply`] relies on.
pub const TASK_INSTRUCTION: &str = "You are a Unix command line assistant. \
Your job is to turn the user's goal into a single shell command for their system.\n\
If you have enough information, reply with exactly one line of the form\n\
COMMAND: <the command>\n\
and nothing else. If you need more information, reply with exactly one line of the form\n\
QUESTION: <a single clarifying question ending with ?>\n\
Never reply with both.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// Append-only record of one goal's clarification exchange.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role,
            text: text.into(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Only called when a new top-level goal starts.
    pub(crate) fn reset(&mut self) {
        self.turns.clear();
    }
}

/// Builds the request text for the model.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(&self, goal: &str, history: &ConversationHistory, family: &DistroFamily) -> String {
        let mut prompt = String::with_capacity(TASK_INSTRUCTION.len() + 256);
        prompt.push_str(TASK_INSTRUCTION);
        prompt.push_str("\n\n");
        prompt.push_str(&format!("System distribution: {}\n", family));
        prompt.push_str(&format!("Package manager syntax must suit a {} system.\n\n", family.kind.label()));
        prompt.push_str(&format!("Goal: {}\n", goal.trim()));

        for turn in history.turns() {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.text));
        }

        prompt.push_str("Assistant:");
        prompt
    }
}
