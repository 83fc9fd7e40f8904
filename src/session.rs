//! Top-level session: goal → dialogue → validation → execution → recovery.

use crate::config::Config;
use crate::dialogue::{ClarificationDialogue, DialogueOutcome};
use crate::distro::{DistroFamily, DistroProfiler};
use crate::error::ModelError;
use crate::executor::{ExecutionResult, InteractiveExecutor};
use crate::model_client::{CommandOracle, MockOracle, ModelClient};
use crate::prompt::PromptComposer;
use crate::recovery::{ErrorRecoveryEngine, RecoveryOutcome, RemediationBudget};
use crate::terminal::UserInterface;
use crate::validator::PackageManagerValidator;
use anyhow::Result;
use tracing::{info, warn};

const EXIT_KEYWORDS: &[&str] = &["exit", "quit"];

/// Everything mutable about a session. Lives exactly as long as the
/// controller; nothing is persisted.
pub struct SessionState {
    pub family: DistroFamily,
    pub dialogue: ClarificationDialogue,
    pub candidate: Option<String>,
    pub budget: RemediationBudget,
}

/// How one goal ended.
#[derive(Debug)]
pub enum GoalOutcome {
    Succeeded { command: String },
    Failed { command: String, exit_code: i32 },
    /// The user chose not to run the command.
    Declined { command: String },
    Cancelled,
    ModelFailed(ModelError),
}

pub struct SessionController {
    oracle: Box<dyn CommandOracle>,
    validator: PackageManagerValidator,
    executor: InteractiveExecutor,
    recovery: ErrorRecoveryEngine,
    state: SessionState,
}

impl SessionController {
    /// Builds a session from configuration. Detects the distro family once.
    pub fn new(config: &Config) -> Result<Self> {
        let family = DistroProfiler::new(&config.os_release_path, config.family_table()).detect();
        info!("Detected distribution {}", family);

        let oracle: Box<dyn CommandOracle> = if config.use_mock {
            info!("Using mock oracle (LLAMA_TERM_USE_MOCK=1)");
            Box::new(MockOracle::new())
        } else {
            Box::new(ModelClient::new(config))
        };

        Ok(Self::with_components(
            family,
            oracle,
            ClarificationDialogue::new(PromptComposer::new(), config.cancel_keywords.clone()),
            PackageManagerValidator::new(config.package_manager_table()),
            InteractiveExecutor::new(config.shell.clone(), config.stderr_tail_bytes),
            ErrorRecoveryEngine::new(config.recovery_rules()?),
        ))
    }

    /// Creates a session with injected components (for testing).
    pub fn with_components(
        family: DistroFamily,
        oracle: Box<dyn CommandOracle>,
        dialogue: ClarificationDialogue,
        validator: PackageManagerValidator,
        executor: InteractiveExecutor,
        recovery: ErrorRecoveryEngine,
    ) -> Self {
        Self {
            oracle,
            validator,
            executor,
            recovery,
            state: SessionState {
                family,
                dialogue,
                candidate: None,
                budget: RemediationBudget::new(),
            },
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Interactive loop: asks for goals until `exit`, `quit` or end of input.
    pub async fn run(&mut self, ui: &mut dyn UserInterface) -> Result<()> {
        ui.say(&format!("Detected system distribution: {}", self.state.family))?;
        ui.say("Interactive LLM Command Runner. Type 'exit' to quit.")?;

        loop {
            let Some(goal) = ui.ask("\nDescribe what you want to accomplish:\n> ")? else {
                ui.say("")?;
                break;
            };
            if EXIT_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(&goal)) {
                break;
            }
            if goal.is_empty() {
                continue;
            }

            let outcome = self.run_goal(&goal, ui).await?;
            info!("Goal '{}' ended: {:?}", goal, outcome);
        }

        ui.say("Exiting.")?;
        Ok(())
    }

    /// Takes one goal from text to a reported result.
    pub async fn run_goal(&mut self, goal: &str, ui: &mut dyn UserInterface) -> Result<GoalOutcome> {
        self.state.candidate = None;
        self.state.budget = RemediationBudget::new();

        let outcome = self
            .state
            .dialogue
            .run(goal, &self.state.family, self.oracle.as_ref(), ui)
            .await?;

        let command = match outcome {
            DialogueOutcome::Resolved(command) => command,
            DialogueOutcome::Cancelled => {
                ui.say("Clarification aborted. No command was run.")?;
                return Ok(GoalOutcome::Cancelled);
            }
            DialogueOutcome::Failed(e) => {
                warn!("Model request failed: {}", e);
                ui.say(&format!("Error: {}. Aborting this request.", e))?;
                return Ok(GoalOutcome::ModelFailed(e));
            }
        };
        self.state.candidate = Some(command.clone());

        ui.say("\nFinal command suggested by the model:")?;
        ui.say(&"-".repeat(40))?;
        ui.say(&command)?;
        ui.say(&"-".repeat(40))?;

        let validation = self.validator.validate(&command, &self.state.family);
        if let Some(advisory) = validation.advisory.as_deref() {
            ui.say(&format!("Warning: {}", advisory))?;
            if !ui.confirm("Proceed with this command anyway?")? {
                ui.say("Command skipped.")?;
                return Ok(GoalOutcome::Declined { command });
            }
        }

        if !ui.confirm("Execute this command?")? {
            ui.say("Command skipped.")?;
            return Ok(GoalOutcome::Declined { command });
        }

        let result = self.executor.run(&command);
        let recovery = self.recovery.recover(
            result,
            &command,
            &mut self.state.budget,
            &self.executor,
            ui,
        )?;

        self.report(&command, &recovery, ui)
    }

    fn report(&self, command: &str, outcome: &RecoveryOutcome, ui: &mut dyn UserInterface) -> Result<GoalOutcome> {
        let result = outcome.final_result();
        let remediated = outcome.was_remediated();

        if result.succeeded() {
            ui.say(if remediated {
                "Command executed successfully after remediation."
            } else {
                "Command executed successfully."
            })?;
            return Ok(GoalOutcome::Succeeded {
                command: command.to_string(),
            });
        }

        match outcome {
            RecoveryOutcome::Declined(_) => ui.say("Remediation declined.")?,
            RecoveryOutcome::BudgetSpent(_) => ui.say("Already tried one fix; not attempting another.")?,
            _ => {}
        }
        ui.say(&format!(
            "Command exited with return code {}{}.",
            result.exit_code,
            if remediated { " after remediation" } else { "" }
        ))?;
        Self::show_diagnostics(result, ui)?;

        Ok(GoalOutcome::Failed {
            command: command.to_string(),
            exit_code: result.exit_code,
        })
    }

    fn show_diagnostics(result: &ExecutionResult, ui: &mut dyn UserInterface) -> Result<()> {
        let tail = result.stderr_tail.trim();
        if tail.is_empty() {
            return Ok(());
        }
        ui.say("Last error output:")?;
        for line in tail.lines() {
            ui.say(&format!("  {}", line))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distro::FamilyKind;
    use crate::executor::test_support::ScriptedRunner;
    use crate::model_client::test_support::ScriptedOracle;
    use crate::recovery::{RecoveryRule, RecoveryRuleSet};
    use crate::terminal::Terminal;
    use crate::validator::PackageManagerTable;
    use std::io::Cursor;

    const DOCKER_CMD: &str = "usermod -aG docker alice";
    const MISSING_GROUP: &str = "usermod: group 'docker' does not exist\n";

    fn family(kind: FamilyKind) -> DistroFamily {
        DistroFamily {
            kind,
            distro_id: "test".to_string(),
        }
    }

    fn session(kind: FamilyKind, oracle: ScriptedOracle, runner: &ScriptedRunner) -> SessionController {
        SessionController::with_components(
            family(kind),
            Box::new(oracle),
            ClarificationDialogue::new(PromptComposer::new(), vec!["cancel".to_string()]),
            PackageManagerValidator::new(PackageManagerTable::default()),
            runner.executor(),
            ErrorRecoveryEngine::new(RecoveryRuleSet::compile(RecoveryRule::defaults()).unwrap()),
        )
    }

    fn terminal(input: &str) -> Terminal<Cursor<Vec<u8>>, Vec<u8>> {
        Terminal::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn docker_oracle() -> ScriptedOracle {
        ScriptedOracle::new(vec![
            ScriptedOracle::question("Which user should be added?"),
            ScriptedOracle::command(DOCKER_CMD),
        ])
    }

    #[tokio::test]
    async fn test_docker_group_scenario_recovers() {
        let runner = ScriptedRunner::new(&[(6, MISSING_GROUP), (0, ""), (0, "")]);
        let mut session = session(FamilyKind::Debian, docker_oracle(), &runner);
        // answer, execute?, create group?
        let mut ui = terminal("alice\ny\ny\n");

        let outcome = session.run_goal("add this user to docker group", &mut ui).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::Succeeded { ref command } if command == DOCKER_CMD));
        assert_eq!(
            runner.ran(),
            vec![DOCKER_CMD.to_string(), "groupadd docker".to_string(), DOCKER_CMD.to_string()]
        );
        assert_eq!(session.state().candidate.as_deref(), Some(DOCKER_CMD));
        assert!(session.state().budget.is_spent());

        let output = String::from_utf8(ui.into_output()).unwrap();
        assert!(output.contains("group 'docker' does not exist. Would you like to create it?"));
        assert!(output.contains("successfully after remediation"));
    }

    #[tokio::test]
    async fn test_second_failure_is_terminal_without_second_prompt() {
        let runner = ScriptedRunner::new(&[(6, MISSING_GROUP), (0, ""), (6, MISSING_GROUP)]);
        let mut session = session(FamilyKind::Debian, docker_oracle(), &runner);
        let mut ui = terminal("alice\ny\ny\ny\ny\n");

        let outcome = session.run_goal("add this user to docker group", &mut ui).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::Failed { exit_code: 6, .. }));
        assert_eq!(runner.ran().len(), 3);

        let output = String::from_utf8(ui.into_output()).unwrap();
        assert_eq!(output.matches("Would you like to create it?").count(), 1);
        assert!(output.contains("return code 6 after remediation"));
        assert!(output.contains("group 'docker' does not exist"));
    }

    #[tokio::test]
    async fn test_successful_command_needs_no_recovery() {
        let oracle = ScriptedOracle::new(vec![ScriptedOracle::command("ls -la")]);
        let runner = ScriptedRunner::new(&[(0, "")]);
        let mut session = session(FamilyKind::Arch, oracle, &runner);
        let mut ui = terminal("\n");

        let outcome = session.run_goal("list files", &mut ui).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::Succeeded { .. }));
        assert_eq!(runner.ran(), vec!["ls -la".to_string()]);
        assert_eq!(session.state().budget.attempts(), 0);
    }

    #[tokio::test]
    async fn test_declining_execution_runs_nothing() {
        let oracle = ScriptedOracle::new(vec![ScriptedOracle::command("rm -rf build")]);
        let runner = ScriptedRunner::new(&[]);
        let mut session = session(FamilyKind::Debian, oracle, &runner);

        let outcome = session.run_goal("clean build", &mut terminal("n\n")).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::Declined { .. }));
        assert!(runner.ran().is_empty());
    }

    #[tokio::test]
    async fn test_package_manager_advisory_can_abort() {
        let oracle = ScriptedOracle::new(vec![ScriptedOracle::command("sudo apt install git")]);
        let runner = ScriptedRunner::new(&[]);
        let mut session = session(FamilyKind::Arch, oracle, &runner);
        let mut ui = terminal("n\n");

        let outcome = session.run_goal("install git", &mut ui).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::Declined { .. }));
        assert!(runner.ran().is_empty());
        let output = String::from_utf8(ui.into_output()).unwrap();
        assert!(output.contains("Warning:"));
        assert!(output.contains("pacman"));
    }

    #[tokio::test]
    async fn test_package_manager_advisory_can_be_overridden() {
        let oracle = ScriptedOracle::new(vec![ScriptedOracle::command("sudo apt install git")]);
        let runner = ScriptedRunner::new(&[(0, "")]);
        let mut session = session(FamilyKind::Arch, oracle, &runner);

        let outcome = session.run_goal("install git", &mut terminal("y\ny\n")).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::Succeeded { .. }));
        assert_eq!(runner.ran(), vec!["sudo apt install git".to_string()]);
    }

    #[tokio::test]
    async fn test_unmatched_failure_reports_exit_code() {
        let oracle = ScriptedOracle::new(vec![ScriptedOracle::command("ls /nope")]);
        let runner = ScriptedRunner::new(&[(2, "ls: cannot access '/nope': No such file or directory")]);
        let mut session = session(FamilyKind::Debian, oracle, &runner);
        let mut ui = terminal("y\n");

        let outcome = session.run_goal("list nope", &mut ui).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::Failed { exit_code: 2, .. }));
        let output = String::from_utf8(ui.into_output()).unwrap();
        assert!(output.contains("return code 2."));
        assert!(output.contains("cannot access '/nope'"));
    }

    #[tokio::test]
    async fn test_cancelled_goal_runs_nothing() {
        let oracle = ScriptedOracle::new(vec![ScriptedOracle::question("Which user?")]);
        let runner = ScriptedRunner::new(&[]);
        let mut session = session(FamilyKind::Debian, oracle, &runner);

        let outcome = session.run_goal("add user", &mut terminal("cancel\n")).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::Cancelled));
        assert!(session.state().candidate.is_none());
        assert!(runner.ran().is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_is_reported() {
        let oracle = ScriptedOracle::new(vec![Err(ModelError::BackendUnavailable("connection refused".to_string()))]);
        let runner = ScriptedRunner::new(&[]);
        let mut session = session(FamilyKind::Debian, oracle, &runner);
        let mut ui = terminal("");

        let outcome = session.run_goal("anything", &mut ui).await.unwrap();

        assert!(matches!(outcome, GoalOutcome::ModelFailed(ModelError::BackendUnavailable(_))));
        let output = String::from_utf8(ui.into_output()).unwrap();
        assert!(output.contains("connection refused"));
        assert!(runner.ran().is_empty());
    }

    #[tokio::test]
    async fn test_loop_handles_goals_until_exit() {
        let oracle = ScriptedOracle::new(vec![ScriptedOracle::command("date"), ScriptedOracle::command("uptime")]);
        let runner = ScriptedRunner::new(&[]);
        let mut session = session(FamilyKind::Debian, oracle, &runner);
        let mut ui = terminal("what time is it\ny\n\nhow long has it been up\ny\nexit\n");

        session.run(&mut ui).await.unwrap();

        assert_eq!(runner.ran(), vec!["date".to_string(), "uptime".to_string()]);
        let output = String::from_utf8(ui.into_output()).unwrap();
        assert!(output.contains("Detected system distribution: test"));
        assert!(output.ends_with("Exiting.\n"));
    }

    #[tokio::test]
    async fn test_loop_stops_at_end_of_input() {
        let oracle = ScriptedOracle::new(vec![]);
        let runner = ScriptedRunner::new(&[]);
        let mut session = session(FamilyKind::Debian, oracle, &runner);

        session.run(&mut terminal("")).await.unwrap();
        assert!(runner.ran().is_empty());
    }
}
