use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::models::{FlagMetadata, FlattenedContext, Reason};

#[derive(Debug, Clone, Serialize)]
pub struct BulkEvaluationRequest<'a> {
    pub context: &'a FlattenedContext,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BulkEvaluationResponse {
    pub flags: Vec<FlagEvaluation>,
}

/// One element of the `flags` array. `error_code` decides between the two
/// forms, `value` may legitimately be falsy.
#[skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagEvaluation {
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub variant: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub error_code: Option<String>,
    pub error_details: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSuccess {
    pub value: serde_json::Value,
    pub variant: Option<String>,
    pub reason: Reason,
    pub metadata: FlagMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationFailure {
    pub error_code: String,
    pub error_details: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlagOutcome {
    Success(EvaluationSuccess),
    Failure(EvaluationFailure),
}

/// Immutable result of one bulk fetch.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub flags: HashMap<String, FlagOutcome>,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn get(&self, key: &str) -> Option<&FlagOutcome> {
        self.flags.get(key)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}
