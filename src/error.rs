//! Error types for the benchmark harness.

use std::path::PathBuf;

/// Harness errors.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Query file missing or unreadable.
    #[error("cannot read input file {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or incomplete configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Bearer token could not be resolved.
    #[error("authentication error: {message}")]
    Auth { message: String },

    /// The agent session could not be opened.
    #[error("session error: {message}")]
    Session { message: String },

    /// Network failure or non-success HTTP status.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A reply event that does not decode as an activity.
    #[error("invalid reply event: {message}")]
    InvalidEvent { message: String },

    /// A planner telemetry event missing a required field.
    #[error("malformed {value_type} telemetry: missing `{field}`")]
    MalformedTelemetry { value_type: String, field: String },

    /// Writing or reading a checkpoint file failed.
    #[error("checkpoint error for {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },
}

impl BenchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for BenchError {
    fn from(e: reqwest::Error) -> Self {
        Self::transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
