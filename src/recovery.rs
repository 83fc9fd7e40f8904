//! Signature-based failure recovery.
//!
//! When a command fails, its stderr tail is matched against an ordered table
//! of [`RecoveryRule`]s. The first match proposes a remediation; if the user
//! agrees it runs, and the original command is retried exactly once. Rules
//! whose remediation already re-runs the command (`sudo {command}`) skip the
//! retry.

use crate::error::ConfigError;
use crate::executor::{ExecutionResult, InteractiveExecutor};
use crate::terminal::UserInterface;
use anyhow::Result;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Remediation cycles allowed per original command.
pub const MAX_REMEDIATIONS: u8 = 1;

/// One known failure and its fix.
///
/// Templates may use `{0}` for the whole match, `{1}`..`{9}` for capture
/// groups, and `{command}` for the command that failed. Captures come from
/// stderr, so in the remediation command they are shell-quoted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRule {
    pub signature_pattern: String,
    pub remediation_command_template: String,
    pub prompt_text: String,
    /// Re-run the original command after the remediation.
    #[serde(default = "retry_by_default")]
    pub retry_original: bool,
}

fn retry_by_default() -> bool {
    true
}

impl RecoveryRule {
    pub fn new(signature_pattern: &str, remediation_command_template: &str, prompt_text: &str) -> Self {
        Self {
            signature_pattern: signature_pattern.to_string(),
            remediation_command_template: remediation_command_template.to_string(),
            prompt_text: prompt_text.to_string(),
            retry_original: true,
        }
    }

    /// The remediation's own result is final; the original is not re-run.
    pub fn without_retry(mut self) -> Self {
        self.retry_original = false;
        self
    }

    /// Built-in table, most specific first.
    pub fn defaults() -> Vec<RecoveryRule> {
        vec![
            RecoveryRule::new(
                r"group '([^']+)' does not exist",
                "groupadd {1}",
                "It appears the group '{1}' does not exist. Would you like to create it?",
            ),
            RecoveryRule::new(
                r"user '([^']+)' does not exist",
                "useradd {1}",
                "It appears the user '{1}' does not exist. Would you like to create it?",
            ),
            RecoveryRule::new(
                r"cannot create directory '(.+)/[^/']+': No such file or directory",
                "mkdir -p {1}",
                "The parent directory '{1}' is missing. Would you like to create it?",
            ),
            RecoveryRule::new(
                r"(?i)permission denied|operation not permitted|are you root|must be (?:run as )?root|must be superuser",
                "sudo {command}",
                "The command was refused for lack of privileges. Try running it with sudo?",
            )
            .without_retry(),
        ]
    }
}

struct CompiledRule {
    rule: RecoveryRule,
    signature: Regex,
}

/// A compiled, ordered rule table. Read-only once built.
pub struct RecoveryRuleSet {
    rules: Vec<CompiledRule>,
}

/// A rule that matched, with its templates filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub remediation_command: String,
    pub prompt: String,
    pub retry_original: bool,
}

impl RecoveryRuleSet {
    pub fn compile(rules: Vec<RecoveryRule>) -> Result<Self, ConfigError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let signature = Regex::new(&rule.signature_pattern).map_err(|source| {
                    ConfigError::InvalidPattern {
                        pattern: rule.signature_pattern.clone(),
                        source,
                    }
                })?;
                Ok(CompiledRule { rule, signature })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule whose signature matches `stderr_tail`, in table order.
    pub fn find_match(&self, stderr_tail: &str, command: &str) -> Option<RuleMatch> {
        self.rules.iter().find_map(|compiled| {
            let caps = compiled.signature.captures(stderr_tail)?;
            info!("Failure matches signature '{}'", compiled.rule.signature_pattern);
            Some(RuleMatch {
                remediation_command: expand_template(
                    &compiled.rule.remediation_command_template,
                    &caps,
                    command,
                    |capture| shell_words::quote(capture).into_owned(),
                ),
                prompt: expand_template(&compiled.rule.prompt_text, &caps, command, |s: &str| s.to_string()),
                retry_original: compiled.rule.retry_original,
            })
        })
    }
}

/// Fills placeholders, passing each capture through `render` first.
fn expand_template<F>(template: &str, caps: &Captures<'_>, command: &str, render: F) -> String
where
    F: Fn(&str) -> String,
{
    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        expanded.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            expanded.push_str(&rest[open..]);
            return expanded;
        };

        let key = &after[..close];
        if key == "command" {
            expanded.push_str(command);
        } else if let Ok(index) = key.parse::<usize>() {
            if let Some(capture) = caps.get(index) {
                expanded.push_str(&render(capture.as_str()));
            }
        } else {
            expanded.push_str(&rest[open..open + close + 2]);
        }
        rest = &after[close + 1..];
    }

    expanded.push_str(rest);
    expanded
}

/// Counts remediation cycles for one original command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemediationBudget {
    attempts: u8,
}

impl RemediationBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn is_spent(&self) -> bool {
        self.attempts >= MAX_REMEDIATIONS
    }

    fn consume(&mut self) -> bool {
        if self.is_spent() {
            return false;
        }
        self.attempts += 1;
        true
    }
}

/// What the engine did with a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Exit code was zero; nothing to do.
    Succeeded(ExecutionResult),
    /// Non-zero exit and no rule matched.
    Unrecognized(ExecutionResult),
    /// A rule matched but the cycle was already used.
    BudgetSpent(ExecutionResult),
    /// A rule matched and the user refused the remediation.
    Declined(ExecutionResult),
    /// The remediation ran and the original command was retried once.
    Remediated {
        remediation_command: String,
        remediation: ExecutionResult,
        retry: ExecutionResult,
    },
    /// The remediation re-ran the command itself (e.g. under sudo); its
    /// result is final.
    Rerun {
        remediation_command: String,
        result: ExecutionResult,
    },
}

impl RecoveryOutcome {
    /// The result that decides how the goal ended.
    pub fn final_result(&self) -> &ExecutionResult {
        match self {
            RecoveryOutcome::Succeeded(result)
            | RecoveryOutcome::Unrecognized(result)
            | RecoveryOutcome::BudgetSpent(result)
            | RecoveryOutcome::Declined(result) => result,
            RecoveryOutcome::Remediated { retry, .. } => retry,
            RecoveryOutcome::Rerun { result, .. } => result,
        }
    }

    /// Whether a remediation ran.
    pub fn was_remediated(&self) -> bool {
        matches!(self, RecoveryOutcome::Remediated { .. } | RecoveryOutcome::Rerun { .. })
    }

    pub fn is_success(&self) -> bool {
        self.final_result().succeeded()
    }
}

pub struct ErrorRecoveryEngine {
    rules: RecoveryRuleSet,
}

impl ErrorRecoveryEngine {
    pub fn new(rules: RecoveryRuleSet) -> Self {
        Self { rules }
    }

    /// Inspects `result` and, when a rule applies and the user agrees, runs
    /// one remediation followed by one retry of `command`.
    ///
    /// The retry's result is final even if it fails with a matchable error.
    pub fn recover(
        &self,
        result: ExecutionResult,
        command: &str,
        budget: &mut RemediationBudget,
        executor: &InteractiveExecutor,
        ui: &mut dyn UserInterface,
    ) -> Result<RecoveryOutcome> {
        if result.succeeded() {
            return Ok(RecoveryOutcome::Succeeded(result));
        }

        let Some(rule_match) = self.rules.find_match(&result.stderr_tail, command) else {
            info!("No recovery rule matches exit code {}", result.exit_code);
            return Ok(RecoveryOutcome::Unrecognized(result));
        };

        if !budget.consume() {
            warn!("Remediation already attempted for '{}'", command);
            return Ok(RecoveryOutcome::BudgetSpent(result));
        }

        let question = format!("{}\n  Fix: {}\nProceed?", rule_match.prompt, rule_match.remediation_command);
        if !ui.confirm(&question)? {
            return Ok(RecoveryOutcome::Declined(result));
        }

        ui.say(&format!("Running: {}", rule_match.remediation_command))?;
        let remediation = executor.run(&rule_match.remediation_command);
        if !rule_match.retry_original {
            return Ok(RecoveryOutcome::Rerun {
                remediation_command: rule_match.remediation_command,
                result: remediation,
            });
        }
        if !remediation.succeeded() {
            warn!("Remediation exited with {}", remediation.exit_code);
            ui.say(&format!(
                "Remediation exited with code {}. Retrying the original command anyway.",
                remediation.exit_code
            ))?;
        } else {
            ui.say("Remediation done. Re-running the original command.")?;
        }

        let retry = executor.run(command);
        Ok(RecoveryOutcome::Remediated {
            remediation_command: rule_match.remediation_command,
            remediation,
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::ScriptedRunner;
    use crate::terminal::Terminal;
    use std::io::Cursor;

    const DOCKER_CMD: &str = "usermod -aG docker alice";
    const MISSING_GROUP: &str = "usermod: group 'docker' does not exist\n";

    fn engine() -> ErrorRecoveryEngine {
        ErrorRecoveryEngine::new(RecoveryRuleSet::compile(RecoveryRule::defaults()).unwrap())
    }

    fn terminal(input: &str) -> Terminal<Cursor<Vec<u8>>, Vec<u8>> {
        Terminal::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn failed(code: i32, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            exit_code: code,
            stderr_tail: stderr.to_string(),
            stdout_was_streamed: true,
        }
    }

    // =========================================================================
    // Rule matching
    // =========================================================================

    #[test]
    fn test_find_match_expands_captures() {
        let rules = RecoveryRuleSet::compile(RecoveryRule::defaults()).unwrap();
        let found = rules.find_match(MISSING_GROUP, DOCKER_CMD).unwrap();

        assert_eq!(found.remediation_command, "groupadd docker");
        assert!(found.prompt.contains("'docker'"));
    }

    #[test]
    fn test_first_match_wins() {
        let rules = RecoveryRuleSet::compile(vec![
            RecoveryRule::new("does not exist", "echo generic", "generic?"),
            RecoveryRule::new("group '([^']+)' does not exist", "groupadd {1}", "specific?"),
        ])
        .unwrap();

        let found = rules.find_match(MISSING_GROUP, DOCKER_CMD).unwrap();
        assert_eq!(found.remediation_command, "echo generic");
    }

    #[test]
    fn test_no_match() {
        let rules = RecoveryRuleSet::compile(RecoveryRule::defaults()).unwrap();
        assert!(rules.find_match("segmentation fault", "a.out").is_none());
        assert!(rules.find_match("", "a.out").is_none());
    }

    #[test]
    fn test_missing_parent_directory_rule() {
        let rules = RecoveryRuleSet::compile(RecoveryRule::defaults()).unwrap();
        let stderr = "mkdir: cannot create directory '/tmp/a/b/c': No such file or directory";
        let found = rules.find_match(stderr, "mkdir /tmp/a/b/c").unwrap();
        assert_eq!(found.remediation_command, "mkdir -p /tmp/a/b");
    }

    #[test]
    fn test_expand_template_placeholders() {
        let re = Regex::new(r"(\w+)-(\w+)").unwrap();
        let caps = re.captures("left-right").unwrap();

        let plain = |s: &str| s.to_string();

        assert_eq!(expand_template("{2} {1} {0}", &caps, "cmd", plain), "right left left-right");
        assert_eq!(expand_template("sudo {command}", &caps, "ls /root", plain), "sudo ls /root");
        assert_eq!(expand_template("{9}|{other}|{", &caps, "cmd", plain), "|{other}|{");
        assert_eq!(expand_template("<{1}>", &caps, "cmd", |s: &str| s.to_uppercase()), "<LEFT>");
    }

    #[test]
    fn test_captures_are_quoted_in_remediation_only() {
        let rules = RecoveryRuleSet::compile(RecoveryRule::defaults()).unwrap();
        let stderr = "usermod: group 'x; touch /tmp/owned' does not exist";
        let found = rules.find_match(stderr, "usermod -aG x alice").unwrap();

        assert_eq!(found.remediation_command, "groupadd 'x; touch /tmp/owned'");
        assert!(found.prompt.contains("group 'x; touch /tmp/owned' does not exist"));
    }

    #[test]
    fn test_permission_failure_offers_sudo_without_retry() {
        let rules = RecoveryRuleSet::compile(RecoveryRule::defaults()).unwrap();
        let found = rules
            .find_match("cat: /etc/shadow: Permission denied", "cat /etc/shadow")
            .unwrap();

        assert_eq!(found.remediation_command, "sudo cat /etc/shadow");
        assert!(!found.retry_original);
    }

    #[test]
    fn test_specific_rules_outrank_permission_rule() {
        let rules = RecoveryRuleSet::compile(RecoveryRule::defaults()).unwrap();
        let stderr = "usermod: Permission denied.\nusermod: group 'docker' does not exist\n";
        let found = rules.find_match(stderr, DOCKER_CMD).unwrap();
        assert_eq!(found.remediation_command, "groupadd docker");
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = RecoveryRuleSet::compile(vec![RecoveryRule::new("(unclosed", "true", "?")]);
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    // =========================================================================
    // Engine
    // =========================================================================

    #[test]
    fn test_success_takes_no_action() {
        let runner = ScriptedRunner::new(&[]);
        let mut budget = RemediationBudget::new();
        let mut ui = terminal("");

        let outcome = engine()
            .recover(failed(0, ""), DOCKER_CMD, &mut budget, &runner.executor(), &mut ui)
            .unwrap();

        assert!(matches!(outcome, RecoveryOutcome::Succeeded(_)));
        assert!(outcome.is_success());
        assert!(runner.ran().is_empty());
        assert_eq!(budget.attempts(), 0);
        assert!(ui.into_output().is_empty());
    }

    #[test]
    fn test_unmatched_failure_is_reported_unmodified() {
        let runner = ScriptedRunner::new(&[]);
        let mut budget = RemediationBudget::new();
        let result = failed(2, "ls: cannot access 'nope'");

        let outcome = engine()
            .recover(result.clone(), "ls nope", &mut budget, &runner.executor(), &mut terminal(""))
            .unwrap();

        assert_eq!(outcome, RecoveryOutcome::Unrecognized(result));
        assert!(runner.ran().is_empty());
    }

    #[test]
    fn test_consent_runs_remediation_then_retries_once() {
        let runner = ScriptedRunner::new(&[(0, ""), (0, "")]);
        let mut budget = RemediationBudget::new();
        let mut ui = terminal("y\n");

        let outcome = engine()
            .recover(failed(6, MISSING_GROUP), DOCKER_CMD, &mut budget, &runner.executor(), &mut ui)
            .unwrap();

        assert!(outcome.is_success());
        assert!(outcome.was_remediated());
        assert_eq!(runner.ran(), vec!["groupadd docker".to_string(), DOCKER_CMD.to_string()]);
        assert!(budget.is_spent());

        let output = String::from_utf8(ui.into_output()).unwrap();
        assert!(output.contains("Fix: groupadd docker"));
    }

    #[test]
    fn test_injected_group_name_runs_as_one_argument() {
        let runner = ScriptedRunner::new(&[(0, ""), (0, "")]);
        let mut budget = RemediationBudget::new();
        let mut ui = terminal("\n");
        let stderr = "usermod: group 'x; touch /tmp/owned' does not exist\n";

        engine()
            .recover(failed(6, stderr), "usermod -aG x alice", &mut budget, &runner.executor(), &mut ui)
            .unwrap();

        assert_eq!(
            runner.ran(),
            vec!["groupadd 'x; touch /tmp/owned'".to_string(), "usermod -aG x alice".to_string()]
        );
        let output = String::from_utf8(ui.into_output()).unwrap();
        assert!(output.contains("Fix: groupadd 'x; touch /tmp/owned'"));
    }

    #[test]
    fn test_sudo_rerun_is_final_and_not_retried() {
        let runner = ScriptedRunner::new(&[(0, "")]);
        let mut budget = RemediationBudget::new();

        let outcome = engine()
            .recover(
                failed(1, "cat: /etc/shadow: Permission denied\n"),
                "cat /etc/shadow",
                &mut budget,
                &runner.executor(),
                &mut terminal("y\n"),
            )
            .unwrap();

        assert_eq!(runner.ran(), vec!["sudo cat /etc/shadow".to_string()]);
        assert!(outcome.is_success());
        assert!(matches!(outcome, RecoveryOutcome::Rerun { .. }));
        assert!(budget.is_spent());
    }

    #[test]
    fn test_retry_happens_even_if_remediation_fails() {
        let runner = ScriptedRunner::new(&[(9, "groupadd: permission denied"), (6, MISSING_GROUP)]);
        let mut budget = RemediationBudget::new();

        let outcome = engine()
            .recover(failed(6, MISSING_GROUP), DOCKER_CMD, &mut budget, &runner.executor(), &mut terminal("\n"))
            .unwrap();

        assert_eq!(runner.ran().len(), 2);
        match outcome {
            RecoveryOutcome::Remediated { remediation, retry, .. } => {
                assert_eq!(remediation.exit_code, 9);
                assert_eq!(retry.exit_code, 6);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_refusal_reports_failure_without_running_anything() {
        let runner = ScriptedRunner::new(&[]);
        let mut budget = RemediationBudget::new();
        let result = failed(6, MISSING_GROUP);

        let outcome = engine()
            .recover(result.clone(), DOCKER_CMD, &mut budget, &runner.executor(), &mut terminal("n\n"))
            .unwrap();

        assert_eq!(outcome, RecoveryOutcome::Declined(result));
        assert!(runner.ran().is_empty());
    }

    #[test]
    fn test_spent_budget_never_prompts_again() {
        let runner = ScriptedRunner::new(&[]);
        let mut budget = RemediationBudget::new();
        budget.consume();
        let mut ui = terminal("y\n");

        let outcome = engine()
            .recover(failed(6, MISSING_GROUP), DOCKER_CMD, &mut budget, &runner.executor(), &mut ui)
            .unwrap();

        assert!(matches!(outcome, RecoveryOutcome::BudgetSpent(_)));
        assert!(runner.ran().is_empty());
        assert!(ui.into_output().is_empty());
    }

    #[test]
    fn test_budget_caps_at_one() {
        let mut budget = RemediationBudget::new();
        assert!(budget.consume());
        assert!(!budget.consume());
        assert_eq!(budget.attempts(), MAX_REMEDIATIONS);
    }
}
