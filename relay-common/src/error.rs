//! Error types for the relay services.

use crate::kv::KvError;
use thiserror::Error;

/// Result type alias using the relay error type.
pub type Result<T> = std::result::Result<T, Error>;

/// How an error should be treated by the event pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limit or authorization refusal. Shown to the user, never logged as an error.
    AdmissionDenied,
    /// A dependency (KV store, database, completion service, transport) failed.
    /// Logged; the user gets a generic retry-later reply.
    Transient,
    /// Unparseable user input. The user gets a format hint.
    MalformedInput,
    /// Startup cannot continue.
    Fatal,
}

/// Unified error type for relay services.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ephemeral store error
    #[error("Store error: {0}")]
    Store(#[from] KvError),

    /// Allow-list database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Completion service error
    #[error("Completion error: {0}")]
    Completion(String),

    /// Chat transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Authorization refused
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Invalid input or command arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify the error for the event pipeline.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Forbidden(_) | Self::RateLimited(_) => ErrorCategory::AdmissionDenied,
            Self::InvalidInput(_) => ErrorCategory::MalformedInput,
            Self::Config(_) => ErrorCategory::Fatal,
            Self::WithContext { source, .. } => source.category(),
            _ => ErrorCategory::Transient,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
