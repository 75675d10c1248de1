//! Operational state of a provider and the transitions a polling tick applies.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::FetchError, models::ProviderEventKind};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderState {
    #[default]
    NotReady,
    Ready,
    Stale,
    Error,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderState::NotReady => "NOT_READY",
            ProviderState::Ready => "READY",
            ProviderState::Stale => "STALE",
            ProviderState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: ProviderState,
    pub event: ProviderEventKind,
    pub message: String,
}

impl Transition {
    /// True when this transition brings a provider back to `Ready`.
    pub fn is_recovery(&self, prior: ProviderState) -> bool {
        self.state == ProviderState::Ready && prior != ProviderState::Ready
    }
}

/// Computes the transition for one polling tick, given the state before the
/// tick. `None` means the state is left alone and nothing is emitted.
///
/// A failed tick while `NotReady` is deliberately a no-op: only `init` leaves
/// that state.
pub fn on_tick(prior: ProviderState, outcome: Result<(), &FetchError>) -> Option<Transition> {
    match (prior, outcome) {
        (_, Err(e)) if e.is_cancelled() => None,
        (ProviderState::Ready, Ok(())) => Some(Transition {
            state: ProviderState::Ready,
            event: ProviderEventKind::ConfigurationChanged,
            message: "Flags is updated".to_string(),
        }),
        (_, Ok(())) => Some(Transition {
            state: ProviderState::Ready,
            event: ProviderEventKind::Ready,
            message: "Provider is ready".to_string(),
        }),
        (ProviderState::Ready | ProviderState::Stale, Err(e)) => Some(Transition {
            state: ProviderState::Stale,
            event: ProviderEventKind::Stale,
            message: e.to_string(),
        }),
        (ProviderState::Error, Err(e)) => Some(Transition {
            state: ProviderState::Error,
            event: ProviderEventKind::Error,
            message: e.to_string(),
        }),
        (ProviderState::NotReady, Err(_)) => None,
    }
}
