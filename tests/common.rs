use std::{sync::Arc, time::Duration};

use httptest::{
    matchers::{contains, eq, json_decoded, request},
    responders::json_encoded,
    Expectation, Server,
};
use ofrep::{
    models::{EvaluationContext, ProviderEvent, ProviderEventKind, ProviderOptions},
    Provider, OFREP_BULK_PATH,
};
use serde_json::json;
use tokio::sync::mpsc;

pub fn eval_ctx() -> EvaluationContext {
    EvaluationContext::new("keyboard").with_attribute("color", "red")
}

pub fn success_body() -> serde_json::Value {
    json!({"flags": [
        {"key": "flag-bool", "reason": "DEFAULT", "variant": "true", "metadata": {}, "value": true},
        {"key": "flag-error", "errorCode": "INVALID", "errorDetails": "something wrong"}
    ]})
}

/// Checks the request shape the provider must send, then answers `body`.
pub fn expect_bulk_evaluation(server: &Server) {
    server.expect(
        Expectation::matching(httptest::all_of![
            request::method_path("POST", OFREP_BULK_PATH),
            request::headers(contains(("authorization", "Bearer api-key"))),
            request::body(json_decoded(eq(json!({
                "context": {"color": "red", "targetingKey": "keyboard"}
            })))),
        ])
        .times(..)
        .respond_with(json_encoded(success_body())),
    );
}

pub fn create_provider(server: &Server, polling_interval: Duration) -> Arc<Provider> {
    Provider::new(
        ProviderOptions::new(format!("http://{}", server.addr()))
            .with_bearer_token("api-key")
            .with_polling_interval(polling_interval),
    )
    .expect("should be able to create the provider")
}

pub async fn next_event(events: &mut mpsc::Receiver<ProviderEvent>) -> ProviderEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("should receive an event in time")
        .expect("event channel should be open")
}

pub async fn next_kind(events: &mut mpsc::Receiver<ProviderEvent>) -> ProviderEventKind {
    next_event(events).await.kind
}
