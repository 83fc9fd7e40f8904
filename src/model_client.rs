//! Model backend client and reply classification.
//!
//! The backend is asked (see [`crate::prompt::TASK_INSTRUCTION`]) to answer
//! with a `COMMAND:` or `QUESTION:` line. [`classify_reply`] turns whatever
//! comes back into a [`ModelResponse`], or rejects it.

use crate::config::Config;
use crate::error::ModelError;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

const COMMAND_SENTINEL: &str = "COMMAND:";
const QUESTION_SENTINEL: &str = "QUESTION:";

/// First words that mark a reply as small talk rather than a command.
const CONVERSATION_STARTERS: &[&str] = &["i", "i'm", "it", "hello", "hi", "sure", "ok", "okay", "here", "certainly"];

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:[A-Za-z]+\n)?([\s\S]+?)```").expect("static regex"));
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("static regex"));

/// A classified model reply. Exactly one of the two, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelResponse {
    Clarification { question: String },
    FinalCommand { command: String },
}

/// Anything that can answer a composed request.
#[async_trait]
pub trait CommandOracle: Send + Sync {
    async fn request(&self, prompt: &str) -> Result<ModelResponse, ModelError>;
}

/// Classifies raw model text.
///
/// 1. The first line starting with `COMMAND:` or `QUESTION:` decides.
/// 2. Otherwise a single-line command in backticks is a final command.
/// 3. Otherwise text ending in `?` is a clarification.
/// 4. Anything else is malformed.
pub fn classify_reply(text: &str) -> Result<ModelResponse, ModelError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ModelError::MalformedResponse("empty reply".to_string()));
    }

    for line in text.lines() {
        let line = line.trim();
        if let Some(payload) = strip_prefix_ignore_case(line, COMMAND_SENTINEL) {
            let command = strip_backticks(payload);
            return if is_valid_command(command) {
                Ok(ModelResponse::FinalCommand {
                    command: command.to_string(),
                })
            } else {
                Err(ModelError::MalformedResponse(format!(
                    "'{}' is not a runnable command",
                    command
                )))
            };
        }
        if let Some(payload) = strip_prefix_ignore_case(line, QUESTION_SENTINEL) {
            let question = payload.trim();
            return if question.is_empty() {
                Err(ModelError::MalformedResponse("empty question".to_string()))
            } else {
                Ok(ModelResponse::Clarification {
                    question: question.to_string(),
                })
            };
        }
    }

    if let Some(command) = extract_fenced_command(text) {
        if is_valid_command(&command) {
            return Ok(ModelResponse::FinalCommand { command });
        }
    }

    if text.ends_with('?') {
        return Ok(ModelResponse::Clarification {
            question: text.to_string(),
        });
    }

    Err(ModelError::MalformedResponse(text.to_string()))
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn strip_backticks(payload: &str) -> &str {
    payload.trim().trim_matches('`').trim()
}

fn extract_fenced_command(text: &str) -> Option<String> {
    FENCED_BLOCK
        .captures(text)
        .or_else(|| INLINE_CODE.captures(text))
        .map(|caps| caps[1].trim().to_string())
}

/// Generic shape check: one non-empty line that doesn't read like prose.
pub fn is_valid_command(command: &str) -> bool {
    let command = command.trim();
    if command.is_empty() || command.contains('\n') {
        return false;
    }

    let lower = command.to_lowercase();
    let first_word = lower
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches([',', '.', '!', ':']);
    if CONVERSATION_STARTERS.contains(&first_word) {
        return false;
    }

    !(lower.contains("command:") || lower.contains("output:"))
}

/// Joins the `response` fields of an Ollama-style body.
///
/// Handles both a single JSON object and newline-delimited streaming chunks.
fn parse_backend_body(body: &str) -> Result<String, ModelError> {
    let mut parts = Vec::new();
    let mut parsed_any = false;

    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let chunk: serde_json::Value = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Skipping undecodable backend line: {}", e);
                continue;
            }
        };
        parsed_any = true;

        if let Some(error) = chunk.get("error").and_then(|e| e.as_str()) {
            return Err(ModelError::BackendUnavailable(error.to_string()));
        }
        if let Some(part) = chunk.get("response").and_then(|r| r.as_str()) {
            parts.push(part.to_string());
        }
        if chunk.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
            break;
        }
    }

    if !parsed_any {
        return Err(ModelError::MalformedResponse(format!(
            "backend body is not JSON: {}",
            body
        )));
    }

    Ok(parts.concat().trim().to_string())
}

/// Talks to the model backend over HTTP.
pub struct ModelClient {
    http: Box<dyn HttpClient>,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ModelClient {
    pub fn new(config: &Config) -> Self {
        Self::with_http_client(config, Box::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(config: &Config, http: Box<dyn HttpClient>) -> Self {
        Self {
            http,
            endpoint: config.endpoint(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl CommandOracle for ModelClient {
    async fn request(&self, prompt: &str) -> Result<ModelResponse, ModelError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            }
        });

        info!("Querying {} with model {}", self.endpoint, self.model);
        let raw = self
            .http
            .post_json(&self.endpoint, &body)
            .await
            .map_err(|e| ModelError::BackendUnavailable(format!("{:#}", e)))?;

        let reply = parse_backend_body(&raw)?;
        debug!("Model reply: {}", reply);
        classify_reply(&reply)
    }
}

/// Offline oracle with canned answers, enabled by `LLAMA_TERM_USE_MOCK`.
pub struct MockOracle;

impl MockOracle {
    pub fn new() -> Self {
        Self
    }

    /// Produces the raw reply a model might give for this prompt.
    pub fn reply_for(&self, prompt: &str) -> String {
        let goal = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Goal: "))
            .unwrap_or("")
            .to_lowercase();
        let last_answer = prompt
            .lines()
            .filter_map(|line| line.strip_prefix("User: "))
            .last();

        if goal.contains("docker") && goal.contains("group") {
            return match last_answer {
                Some(user) => format!("COMMAND: usermod -aG docker {}", user.trim()),
                None => "QUESTION: Which user should be added to the docker group?".to_string(),
            };
        }
        if goal.contains("hello") || goal.contains("greet") {
            return "COMMAND: echo hello".to_string();
        }
        if goal.contains("list") && goal.contains("file") {
            return "`ls -la`".to_string();
        }
        if goal.contains("missing") {
            return "COMMAND: cat /nonexistent/llama-term-missing".to_string();
        }
        if goal.contains("time") || goal.contains("date") {
            return "COMMAND: date".to_string();
        }
        format!("COMMAND: echo '{}'", goal.replace('\'', ""))
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandOracle for MockOracle {
    async fn request(&self, prompt: &str) -> Result<ModelResponse, ModelError> {
        debug!("Using mock oracle (LLAMA_TERM_USE_MOCK=1)");
        classify_reply(&self.reply_for(prompt))
    }
}
