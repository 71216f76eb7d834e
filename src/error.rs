//! Error types for metric-attributor
//!
//! `AppError` covers everything that stops the process: configuration, rule
//! loading, transport and lifecycle failures. The narrower enums describe the
//! failures of a single component and convert into `AppError` with `?`.
//!
//! `AppError` implements `IntoResponse` for Axum handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read configuration file '{path}': {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file '{path}': {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Failed to read rule file '{path}': {source}")]
    RuleFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rule file '{path}': {source}")]
    RuleFileParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid rule: {0}")]
    Rule(#[from] RuleError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Consumer(ConsumerError::AlreadyClosed) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// Rule definitions rejected at load time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule at index {index} has an empty name")]
    EmptyName { index: usize },

    #[error(
        "rule '{name}' at index {index} declares both use_tags and pattern; only one may be set"
    )]
    TagsAndPattern { index: usize, name: String },
}

/// A transport payload that could not be decoded into a metric record
///
/// Parse errors are recovered locally: the record is counted, dropped and
/// still acknowledged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no path delimiter found")]
    NoPathDelimiter,

    #[error("no timestamp delimiter found")]
    NoTimestampDelimiter,

    #[error("invalid timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error("payload is not valid UTF-8 at byte {valid_up_to}")]
    InvalidUtf8 { valid_up_to: usize },
}

/// Failures reported by a `LogClient`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to create client: {0}")]
    Create(String),

    #[error("failed to subscribe to topic '{topic}': {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("brokers unreachable: {0}")]
    Unreachable(String),

    #[error("failed to receive record: {0}")]
    Receive(String),

    #[error("failed to mark offset {offset} on partition {partition}: {reason}")]
    Mark {
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("failed to close client: {0}")]
    Close(String),

    #[error("client is already closed")]
    AlreadyClosed,
}

/// Lifecycle and claim-loop failures of the `StreamConsumer`
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("can not consume an empty topic")]
    EmptyTopic,

    #[error("cannot {operation} while consumer is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("consumer is already closed")]
    AlreadyClosed,

    #[error("claim loop failed: {0}")]
    Transport(#[from] TransportError),

    #[error("claim loop task panicked: {0}")]
    TaskPanicked(String),
}
