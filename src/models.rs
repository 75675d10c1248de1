use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::ResolutionError;

/// Reserved attribute name the targeting key is folded in under.
pub const TARGETING_KEY: &str = "targetingKey";

/// Flat attribute mapping sent as the bulk request context.
pub type FlattenedContext = serde_json::Map<String, serde_json::Value>;

/// Attributes describing the subject of an evaluation.
#[derive(Debug, Default, PartialEq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub targeting_key: Option<String>,
    pub attributes: FlattenedContext,
}

impl EvaluationContext {
    pub fn new(targeting_key: impl Into<String>) -> Self {
        Self {
            targeting_key: Some(targeting_key.into()),
            attributes: FlattenedContext::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Folds the targeting key into the attributes, when it is not empty.
    pub fn flatten(&self) -> FlattenedContext {
        let mut flat = self.attributes.clone();
        if let Some(key) = self.targeting_key.as_ref().filter(|k| !k.is_empty()) {
            flat.insert(
                TARGETING_KEY.to_string(),
                serde_json::Value::String(key.clone()),
            );
        }
        flat
    }
}

/// Why a value was returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Reason {
    Static,
    Default,
    TargetingMatch,
    Split,
    Cached,
    Disabled,
    Unknown,
    Stale,
    Error,
    Other(String),
}

impl From<String> for Reason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "STATIC" => Reason::Static,
            "DEFAULT" => Reason::Default,
            "TARGETING_MATCH" => Reason::TargetingMatch,
            "SPLIT" => Reason::Split,
            "CACHED" => Reason::Cached,
            "DISABLED" => Reason::Disabled,
            "UNKNOWN" => Reason::Unknown,
            "STALE" => Reason::Stale,
            "ERROR" => Reason::Error,
            _ => Reason::Other(s),
        }
    }
}

impl From<Reason> for String {
    fn from(r: Reason) -> Self {
        r.to_string()
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::Static => "STATIC",
            Reason::Default => "DEFAULT",
            Reason::TargetingMatch => "TARGETING_MATCH",
            Reason::Split => "SPLIT",
            Reason::Cached => "CACHED",
            Reason::Disabled => "DISABLED",
            Reason::Unknown => "UNKNOWN",
            Reason::Stale => "STALE",
            Reason::Error => "ERROR",
            Reason::Other(s) => s,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagMetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl FlagMetadataValue {
    /// Non-scalar JSON values have no metadata representation.
    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::Bool(b) => Some(FlagMetadataValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FlagMetadataValue::Int(i)),
                None => n.as_f64().map(FlagMetadataValue::Float),
            },
            serde_json::Value::String(s) => Some(FlagMetadataValue::String(s.clone())),
            serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                None
            }
        }
    }
}

pub type FlagMetadata = HashMap<String, FlagMetadataValue>;

/// The outcome of a typed resolution. `value` is the caller's default whenever
/// `error` is set or the flag is disabled.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDetail<T> {
    pub value: T,
    pub reason: Reason,
    pub variant: Option<String>,
    #[serde(default)]
    pub flag_metadata: FlagMetadata,
    pub error: Option<ResolutionError>,
}

impl<T> ResolutionDetail<T> {
    pub fn error(value: T, error: ResolutionError) -> Self {
        Self {
            value,
            reason: Reason::Error,
            variant: None,
            flag_metadata: FlagMetadata::new(),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEventKind {
    Ready,
    Stale,
    Error,
    ConfigurationChanged,
}

/// Notification sent on the provider's event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    pub provider_name: String,
    pub kind: ProviderEventKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
}

/// Produces one header name and value per request.
pub type HeaderCallback = Arc<dyn Fn() -> (String, String) + Send + Sync>;

/// Default interval between two background refreshes.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);

/// Options to use when creating the provider.
///
/// The default polling interval is 30s, a zero interval disables polling.
/// The default request timeout is 10s and can be changed with the
/// OFREP_TIMEOUT_MS environment variable.
#[derive(Clone)]
pub struct ProviderOptions {
    pub base_uri: String,
    pub header_callbacks: Vec<HeaderCallback>,
    pub polling_interval: Duration,
    pub timeout: Option<Duration>,
}

impl ProviderOptions {
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            header_callbacks: vec![],
            polling_interval: DEFAULT_POLLING_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_header_callback(mut self, callback: HeaderCallback) -> Self {
        self.header_callbacks.push(callback);
        self
    }

    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        let value = format!("Bearer {}", token.into());
        self.with_header_callback(Arc::new(move || ("Authorization".to_string(), value.clone())))
    }

    pub fn with_api_key(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.with_header_callback(Arc::new(move || ("X-API-Key".to_string(), key.clone())))
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn polling_enabled(&self) -> bool {
        !self.polling_interval.is_zero()
    }
}

impl fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderOptions")
            .field("base_uri", &self.base_uri)
            .field("header_callbacks", &self.header_callbacks.len())
            .field("polling_interval", &self.polling_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}
