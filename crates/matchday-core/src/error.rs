use serde::Serialize;
use thiserror::Error;

use crate::data_source::{Operation, SourceError};
use crate::ProviderId;

/// Validation errors for domain values and identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("round {value} is outside 1..={max}")]
    InvalidRound { value: u32, max: u32 },
    #[error("invalid source '{value}', expected one of fpl, football_data")]
    InvalidSource { value: String },
    #[error("invalid operation '{value}'")]
    InvalidOperation { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("field '{field}' cannot be empty")]
    EmptyField { field: &'static str },
}

/// Startup configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ttl table is invalid: {reason}")]
    InvalidTtl { reason: String },

    #[error("'{field}' must be greater than zero")]
    NonPositive { field: String },

    #[error("no source policy configured for '{provider}'")]
    MissingSource { provider: ProviderId },

    #[error("invalid route for '{operation}': {reason}")]
    InvalidRoute { operation: Operation, reason: String },

    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

/// One failed attempt against a single source, reported when routing gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceAttempt {
    pub provider: ProviderId,
    pub code: &'static str,
    pub message: String,
}

impl SourceAttempt {
    pub fn from_error(provider: ProviderId, error: &SourceError) -> Self {
        Self {
            provider,
            code: error.code(),
            message: error.message().to_owned(),
        }
    }
}

/// Errors that cross the feed boundary into callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("all sources exhausted for '{operation}' ({} attempt(s))", attempts.len())]
    SourcesExhausted {
        operation: Operation,
        attempts: Vec<SourceAttempt>,
    },

    #[error("schema mismatch from '{provider}' on '{operation}': {detail}")]
    SchemaMismatch {
        provider: ProviderId,
        operation: Operation,
        detail: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("feed service has been shut down")]
    Shutdown,
}

impl FeedError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SourcesExhausted { .. } => "feed.sources_exhausted",
            Self::SchemaMismatch { .. } => "feed.schema_mismatch",
            Self::InvalidRequest(_) => "feed.invalid_request",
            Self::Shutdown => "feed.shutdown",
        }
    }
}
