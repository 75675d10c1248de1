//! Implements an OFREP bulk evaluation provider
//!
//! All flags are evaluated by the remote service in a single request and
//! served from a local snapshot that is refreshed in the background.
//!
//! To change the default request timeout set the OFREP_TIMEOUT_MS
//! environment variable to the desired timeout value.
//!
//! Reference: https://openfeature.dev/specification/appendix-c
mod evaluator;
mod http;
mod provider;

pub mod error;
pub mod models;
pub mod state;

pub use crate::evaluator::models::{EvaluationFailure, EvaluationSuccess, FlagOutcome, Snapshot};
pub use crate::evaluator::EvaluationCache;
pub use crate::http::{parse_retry_after, HttpTransport, Resolution, Transport, OFREP_BULK_PATH};
pub use crate::provider::{Provider, PROVIDER_NAME};
