//! llama-term - turn a plain-language goal into a checked, executed shell command.
//!
//! A language model proposes the command, asking clarifying questions when it
//! needs to. The proposal is checked against the running distribution's
//! package manager, confirmed by the user, and run with the terminal attached.
//! Known failures (a missing group, a missing parent directory) can be
//! repaired once and the command retried.
//!
//! # Architecture
//!
//! - [`config`] - Backend location, rule tables, environment overrides
//! - [`distro`] - Distribution family detection from os-release
//! - [`prompt`] - Conversation history and request composition
//! - [`http_client`] - HTTP transport abstraction
//! - [`model_client`] - Backend client and reply classification
//! - [`dialogue`] - The clarification state machine
//! - [`validator`] - Package-manager advisory check
//! - [`executor`] - Interactive command execution
//! - [`recovery`] - Failure signatures and one-shot remediation
//! - [`terminal`] - Prompts and messages over injectable I/O
//! - [`session`] - The top-level session controller
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use llama_term::config::Config;
//! use llama_term::session::SessionController;
//! use llama_term::terminal::Terminal;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let mut session = SessionController::new(&config)?;
//!     session.run_goal("add this user to the docker group", &mut Terminal::stdio()?).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dialogue;
pub mod distro;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod model_client;
pub mod prompt;
pub mod recovery;
pub mod session;
pub mod terminal;
pub mod validator;
