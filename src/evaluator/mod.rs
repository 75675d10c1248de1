use std::{any, sync::Arc};

use chrono::Utc;
use crossbeam::sync::ShardedLock;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use crate::{
    error::{ErrorCode, FetchError, ResolutionError},
    http::Transport,
    models::{FlagMetadata, FlagMetadataValue, FlattenedContext, Reason, ResolutionDetail},
    state::ProviderState,
};

use self::models::{
    BulkEvaluationRequest, BulkEvaluationResponse, EvaluationFailure, EvaluationSuccess,
    FlagEvaluation, FlagOutcome, Snapshot,
};

pub mod getters;
pub mod models;

/// Everything guarded by the cache lock. State and snapshot always move together.
#[derive(Debug, Default)]
pub(crate) struct Guarded {
    pub(crate) state: ProviderState,
    pub(crate) snapshot: Option<Arc<Snapshot>>,
}

/// Current snapshot and operational state behind a single shared-read lock.
#[derive(Debug, Default)]
pub struct EvaluationCache {
    inner: ShardedLock<Guarded>,
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProviderState {
        self.inner
            .read()
            .expect("should always be able to acquire read lock")
            .state
    }

    pub fn set_state(&self, state: ProviderState) {
        self.update(|g| g.state = state);
    }

    /// Calls `f` with the current snapshot, which stays alive for the call only.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(Option<&Snapshot>) -> R) -> R {
        let guard = self
            .inner
            .read()
            .expect("should always be able to acquire read lock");
        f(guard.snapshot.as_deref())
    }

    pub fn lookup<R>(&self, key: &str, f: impl FnOnce(Option<&FlagOutcome>) -> R) -> R {
        self.with_snapshot(|snapshot| f(snapshot.and_then(|s| s.get(key))))
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner
            .read()
            .expect("should always be able to acquire read lock")
            .snapshot
            .clone()
    }

    pub fn replace(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        self.update(|g| g.snapshot = Some(snapshot));
    }

    /// Back to `NotReady`, dropping the snapshot.
    pub fn reset(&self) {
        self.update(|g| *g = Guarded::default());
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Guarded) -> R) -> R {
        let mut guard = self.inner.write().expect("should not be poisoned");
        f(&mut guard)
    }
}

/// Parses a bulk response body into a snapshot. A body that does not match the
/// schema fails as a whole.
pub fn build_snapshot(body: &[u8]) -> Result<Snapshot, FetchError> {
    let response: BulkEvaluationResponse = serde_json::from_slice(body)?;
    let flags = response
        .flags
        .into_iter()
        .map(|f| (f.key.clone(), into_outcome(f)))
        .collect();
    Ok(Snapshot {
        flags,
        fetched_at: Utc::now(),
    })
}

fn into_outcome(flag: FlagEvaluation) -> FlagOutcome {
    if let Some(error_code) = flag.error_code {
        return FlagOutcome::Failure(EvaluationFailure {
            error_code,
            error_details: flag.error_details.unwrap_or_default(),
        });
    }

    let mut metadata = FlagMetadata::new();
    for (name, value) in flag.metadata.unwrap_or_default() {
        match FlagMetadataValue::from_json(&value) {
            Some(v) => {
                metadata.insert(name, v);
            }
            None => event!(
                Level::DEBUG,
                "Dropping non scalar metadata {} of flag {}",
                name,
                flag.key
            ),
        }
    }

    FlagOutcome::Success(EvaluationSuccess {
        value: flag.value.unwrap_or(serde_json::Value::Null),
        variant: flag.variant,
        reason: flag.reason.map(Reason::from).unwrap_or(Reason::Unknown),
        metadata,
    })
}

/// Fetches every flag for one evaluation context in a single request.
pub struct BulkEvaluator {
    transport: Arc<dyn Transport>,
    context: FlattenedContext,
}

impl BulkEvaluator {
    pub fn new(transport: Arc<dyn Transport>, context: FlattenedContext) -> Self {
        Self { transport, context }
    }

    /// Runs one bulk fetch. Cancelling `cancel` drops the in-flight request
    /// and yields `FetchError::Cancelled`.
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<Snapshot, FetchError> {
        let payload = serde_json::to_vec(&BulkEvaluationRequest {
            context: &self.context,
        })
        .map_err(|e| FetchError::Request(e.to_string()))?;

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            res = self.transport.bulk(payload) => res?,
        };

        if res.status != 200 {
            return Err(FetchError::Status {
                status: res.status,
                retry_after: res.retry_after(),
            });
        }

        build_snapshot(&res.body)
    }

    /// Fetches and swaps the snapshot in. On failure the cache is untouched.
    pub async fn fetch_and_replace(
        &self,
        cache: &EvaluationCache,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let snapshot = self.fetch(cancel).await?;
        event!(Level::DEBUG, "Replacing snapshot with {} flags", snapshot.len());
        cache.replace(snapshot);
        Ok(())
    }
}

/// Resolves `key` against the cache, converting the stored value with
/// `convert`. Always returns a value, `default` whenever something is off.
pub fn resolve<T>(
    cache: &EvaluationCache,
    key: &str,
    default: T,
    convert: impl FnOnce(&serde_json::Value) -> Option<T>,
) -> ResolutionDetail<T> {
    cache.lookup(key, |outcome| {
        let success = match outcome {
            None => return ResolutionDetail::error(default, ResolutionError::flag_not_found(key)),
            Some(FlagOutcome::Failure(f)) => {
                return ResolutionDetail::error(
                    default,
                    ResolutionError::new(
                        ErrorCode::from_server(&f.error_code),
                        f.error_details.clone(),
                    ),
                )
            }
            Some(FlagOutcome::Success(s)) => s,
        };

        if success.reason == Reason::Disabled {
            return ResolutionDetail {
                value: default,
                reason: Reason::Disabled,
                variant: success.variant.clone(),
                flag_metadata: success.metadata.clone(),
                error: None,
            };
        }

        match convert(&success.value) {
            Some(value) => ResolutionDetail {
                value,
                reason: success.reason.clone(),
                variant: success.variant.clone(),
                flag_metadata: success.metadata.clone(),
                error: None,
            },
            None => ResolutionDetail::error(
                default,
                ResolutionError::type_mismatch(format!(
                    "resolved value {} ({}) is not of {} type",
                    success.value,
                    getters::type_name(&success.value),
                    any::type_name::<T>()
                )),
            ),
        }
    })
}
