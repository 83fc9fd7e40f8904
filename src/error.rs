//! Error types surfaced by the model and configuration layers.

use thiserror::Error;

/// Failures talking to the model backend.
///
/// Both variants end the current goal. Neither is retried.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The request could not complete (connection refused, timeout, HTTP error).
    #[error("model backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The reply was neither a clarifying question nor a final command.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid recovery rule pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
