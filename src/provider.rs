use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use crate::{
    error::FetchError,
    evaluator::{self, getters, models::Snapshot, BulkEvaluator, EvaluationCache},
    http::{HttpTransport, Transport},
    models::{
        EvaluationContext, Metadata, ProviderEvent, ProviderEventKind, ProviderOptions,
        ResolutionDetail,
    },
    state::{self, ProviderState},
};

pub const PROVIDER_NAME: &str = "OFREP Bulk Provider";

/// Events are dropped rather than blocking state transitions once this many
/// are waiting for the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 3;

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    poller: Option<JoinHandle<()>>,
}

/// OFREP provider that evaluates all flags in bulk and serves them from a local
/// snapshot, refreshed in the background.
///
/// The provider is inert until [`Provider::init`]. While `init` runs, `status`
/// may read `Ready` before the first fetch has completed, it is corrected to
/// `Error` if that fetch fails.
pub struct Provider {
    options: ProviderOptions,
    transport: Arc<dyn Transport>,
    cache: EvaluationCache,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    events_tx: mpsc::Sender<ProviderEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ProviderEvent>>>,
}

impl Provider {
    pub fn new(options: ProviderOptions) -> Result<Arc<Self>> {
        let transport = HttpTransport::new(&options)?;
        Ok(Self::with_transport(options, Arc::new(transport)))
    }

    /// Creates a provider that talks to the evaluation service through `transport`.
    pub fn with_transport(options: ProviderOptions, transport: Arc<dyn Transport>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            options,
            transport,
            cache: EvaluationCache::new(),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    pub fn metadata(&self) -> Metadata {
        Metadata {
            name: PROVIDER_NAME.to_string(),
        }
    }

    pub fn status(&self) -> ProviderState {
        self.cache.state()
    }

    /// Hands out the receiving end of the event channel. Only the first call
    /// gets it.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ProviderEvent>> {
        self.events_rx
            .lock()
            .expect("should always be able to acquire lock")
            .take()
    }

    /// When the snapshot currently served was fetched.
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.cache.snapshot().map(|s| s.fetched_at)
    }

    /// Fetches the flags for `context` and starts polling when configured.
    ///
    /// Calling it again while the provider is not `NotReady` does nothing.
    /// A failed first fetch is returned, and the provider stays in `Error`
    /// until a poll succeeds.
    pub async fn init(self: &Arc<Self>, context: &EvaluationContext) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.cache.state() != ProviderState::NotReady {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let evaluator = BulkEvaluator::new(self.transport.clone(), context.flatten());

        self.cache.set_state(ProviderState::Ready);
        let result = evaluator.fetch_and_replace(&self.cache, &cancel).await;
        if let Err(e) = &result {
            event!(Level::ERROR, "Failed to fetch initial flags: {}", e);
            self.cache.set_state(ProviderState::Error);
        }

        if self.options.polling_enabled() {
            lifecycle.poller = Some(tokio::spawn(self.clone().poll_for_changes(
                evaluator,
                cancel.clone(),
                self.options.polling_interval,
            )));
        }
        lifecycle.cancel = Some(cancel);

        result.context("failed to fetch data")
    }

    /// Stops polling and drops the snapshot. The provider can be initialized again.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
        if let Some(poller) = lifecycle.poller.take() {
            if let Err(e) = poller.await {
                event!(Level::ERROR, "Polling task ended abnormally: {}", e);
            }
        }
        self.cache.reset();
    }

    pub fn resolve_bool(&self, key: &str, default: bool) -> ResolutionDetail<bool> {
        evaluator::resolve(&self.cache, key, default, getters::get_bool)
    }

    pub fn resolve_string(&self, key: &str, default: String) -> ResolutionDetail<String> {
        evaluator::resolve(&self.cache, key, default, getters::get_string)
    }

    pub fn resolve_float(&self, key: &str, default: f64) -> ResolutionDetail<f64> {
        evaluator::resolve(&self.cache, key, default, getters::get_float)
    }

    pub fn resolve_int(&self, key: &str, default: i64) -> ResolutionDetail<i64> {
        evaluator::resolve(&self.cache, key, default, getters::get_int)
    }

    pub fn resolve_object(
        &self,
        key: &str,
        default: serde_json::Value,
    ) -> ResolutionDetail<serde_json::Value> {
        evaluator::resolve(&self.cache, key, default, getters::get_object)
    }

    /// Decodes a structured flag into `T`. A value that does not decode is a
    /// type mismatch.
    pub fn resolve_struct<T: DeserializeOwned>(&self, key: &str, default: T) -> ResolutionDetail<T> {
        evaluator::resolve(&self.cache, key, default, |v| {
            serde_json::from_value(v.clone()).ok()
        })
    }
}

// Private methods
impl Provider {
    async fn poll_for_changes(
        self: Arc<Self>,
        evaluator: BulkEvaluator,
        cancel: CancellationToken,
        polling_interval: Duration,
    ) {
        let mut interval = time::interval_at(Instant::now() + polling_interval, polling_interval);
        // a slow fetch is followed by at most one catch-up tick
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            event!(Level::DEBUG, "Refreshing flags");
            let result = evaluator.fetch(&cancel).await;
            if matches!(&result, Err(e) if e.is_cancelled()) {
                // shutdown
                return;
            }
            self.commit_tick(result, &cancel);
        }
    }

    /// Applies one poll outcome. Snapshot, state and event go out under the
    /// same write lock, so readers never see a state from another fetch.
    fn commit_tick(&self, result: Result<Snapshot, FetchError>, cancel: &CancellationToken) {
        self.cache.update(|guarded| {
            // shutdown won the race against this fetch
            if cancel.is_cancelled() {
                return;
            }

            let transition = state::on_tick(guarded.state, result.as_ref().map(|_| ()));
            match result {
                Ok(snapshot) => guarded.snapshot = Some(Arc::new(snapshot)),
                Err(e) => event!(Level::ERROR, "Failed to refresh flags: {}", e),
            }

            if let Some(transition) = transition {
                if transition.is_recovery(guarded.state) {
                    event!(Level::INFO, "Provider state {} -> {}", guarded.state, transition.state);
                } else if transition.state != guarded.state {
                    event!(Level::WARN, "Provider state {} -> {}", guarded.state, transition.state);
                }
                guarded.state = transition.state;
                self.emit(transition.event, transition.message);
            }
        });
    }

    /// Never waits on the consumer, a full channel drops the event.
    fn emit(&self, kind: ProviderEventKind, message: String) {
        let notification = ProviderEvent {
            provider_name: PROVIDER_NAME.to_string(),
            kind,
            message,
        };
        if let Err(e) = self.events_tx.try_send(notification) {
            event!(Level::WARN, "Dropping provider event: {}", e);
        }
    }
}
