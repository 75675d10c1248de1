use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of one bulk fetch. Never escapes the fetch except as its result.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The provider was shut down while the fetch was in flight.
    #[error("fetch cancelled")]
    Cancelled,
    #[error("request building error: {0}")]
    Request(String),
    #[error("failed to make a request: {0}")]
    Transport(String),
    #[error("unexpected status {status}{}", retry_hint(.retry_after))]
    Status {
        status: u16,
        /// Server supplied throttling hint. Exposed for callers, not acted upon.
        retry_after: Option<Duration>,
    },
    #[error("error parsing bulk evaluation response: {0}")]
    Parse(#[from] serde_json::Error),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Resolution error codes as defined by OpenFeature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProviderNotReady,
    FlagNotFound,
    ParseError,
    TypeMismatch,
    TargetingKeyMissing,
    InvalidContext,
    General,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ProviderNotReady => "PROVIDER_NOT_READY",
            ErrorCode::FlagNotFound => "FLAG_NOT_FOUND",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::TargetingKeyMissing => "TARGETING_KEY_MISSING",
            ErrorCode::InvalidContext => "INVALID_CONTEXT",
            ErrorCode::General => "GENERAL",
        }
    }

    /// Maps a server reported code. Anything unrecognised is `General`.
    pub fn from_server(code: &str) -> Self {
        match code {
            "PROVIDER_NOT_READY" => ErrorCode::ProviderNotReady,
            "FLAG_NOT_FOUND" => ErrorCode::FlagNotFound,
            "PARSE_ERROR" => ErrorCode::ParseError,
            "TYPE_MISMATCH" => ErrorCode::TypeMismatch,
            "TARGETING_KEY_MISSING" => ErrorCode::TargetingKeyMissing,
            "INVALID_CONTEXT" => ErrorCode::InvalidContext,
            _ => ErrorCode::General,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("error code: {code}: {message}")]
pub struct ResolutionError {
    pub code: ErrorCode,
    pub message: String,
}

impl ResolutionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn flag_not_found(key: &str) -> Self {
        Self::new(ErrorCode::FlagNotFound, format!("flag {key} not found"))
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeMismatch, message)
    }
}
