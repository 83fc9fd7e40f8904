//! Multi-turn clarification with the model.
//!
//! ```text
//! Start ──► AwaitingModel ──FinalCommand──► Resolved
//!              ▲      │
//!       answer │      │ Clarification
//!              │      ▼
//!     AwaitingUserClarification ──cancel──► Cancelled
//! ```
//!
//! Only one request is ever in flight: the dialogue awaits each reply before
//! composing the next request.

use crate::distro::DistroFamily;
use crate::error::ModelError;
use crate::model_client::{CommandOracle, ModelResponse};
use crate::prompt::{ConversationHistory, PromptComposer, Role};
use crate::terminal::UserInterface;
use anyhow::Result;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueState {
    Start,
    AwaitingModel,
    AwaitingUserClarification { question: String },
    Resolved(String),
    Cancelled,
    /// The backend failed; the goal ends here.
    Failed,
}

impl DialogueState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DialogueState::Resolved(_) | DialogueState::Cancelled | DialogueState::Failed
        )
    }
}

#[derive(Debug)]
pub enum DialogueOutcome {
    Resolved(String),
    Cancelled,
    Failed(ModelError),
}

pub struct ClarificationDialogue {
    composer: PromptComposer,
    cancel_keywords: Vec<String>,
    history: ConversationHistory,
    state: DialogueState,
}

impl ClarificationDialogue {
    pub fn new(composer: PromptComposer, cancel_keywords: Vec<String>) -> Self {
        Self {
            composer,
            cancel_keywords,
            history: ConversationHistory::new(),
            state: DialogueState::Start,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn state(&self) -> &DialogueState {
        &self.state
    }

    fn is_cancel(&self, answer: &str) -> bool {
        self.cancel_keywords
            .iter()
            .any(|keyword| keyword.eq_ignore_ascii_case(answer))
    }

    /// Runs the exchange for one goal until it resolves, is cancelled, or the
    /// backend fails. History from any previous goal is discarded first.
    ///
    /// # Errors
    ///
    /// Only terminal I/O errors. Backend failures come back as
    /// [`DialogueOutcome::Failed`].
    pub async fn run(
        &mut self,
        goal: &str,
        family: &DistroFamily,
        oracle: &dyn CommandOracle,
        ui: &mut dyn UserInterface,
    ) -> Result<DialogueOutcome> {
        self.history.reset();
        self.state = DialogueState::Start;

        loop {
            let prompt = self.composer.compose(goal, &self.history, family);
            self.state = DialogueState::AwaitingModel;
            ui.say("\nQuerying the model for a command suggestion...")?;
            debug!("Request #{} for goal '{}'", self.history.len() / 2 + 1, goal);

            let response = match oracle.request(&prompt).await {
                Ok(response) => response,
                Err(e) => {
                    self.state = DialogueState::Failed;
                    return Ok(DialogueOutcome::Failed(e));
                }
            };

            match response {
                ModelResponse::FinalCommand { command } => {
                    info!("Resolved to '{}'", command);
                    self.history.push(Role::Assistant, command.clone());
                    self.state = DialogueState::Resolved(command.clone());
                    return Ok(DialogueOutcome::Resolved(command));
                }
                ModelResponse::Clarification { question } => {
                    self.history.push(Role::Assistant, question.clone());
                    self.state = DialogueState::AwaitingUserClarification {
                        question: question.clone(),
                    };

                    match self.await_answer(&question, ui)? {
                        Some(answer) => self.history.push(Role::User, answer),
                        None => {
                            info!("Clarification cancelled after {} turns", self.history.len());
                            self.state = DialogueState::Cancelled;
                            return Ok(DialogueOutcome::Cancelled);
                        }
                    }
                }
            }
        }
    }

    /// Reads the user's answer. `None` means cancel keyword or end of input.
    fn await_answer(&self, question: &str, ui: &mut dyn UserInterface) -> Result<Option<String>> {
        ui.say(&format!("The model asks: {}", question))?;
        let prompt = format!(
            "Your clarification (or type '{}' to abort): ",
            self.cancel_keywords.first().map(String::as_str).unwrap_or("cancel")
        );

        loop {
            let Some(answer) = ui.ask(&prompt)? else {
                return Ok(None);
            };
            if self.is_cancel(&answer) {
                return Ok(None);
            }
            if answer.is_empty() {
                ui.say("No clarification provided. Please provide additional details.")?;
                continue;
            }
            return Ok(Some(answer));
        }
    }
}
