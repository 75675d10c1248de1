use std::time::Duration;

use anyhow::Result;
use ofrep::{
    models::{EvaluationContext, ProviderOptions},
    Provider,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let base_uri =
        std::env::var("OFREP_BASE_URI").unwrap_or_else(|_| "http://localhost:8016".to_string());
    let poll_ms = std::env::var("OFREP_POLL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5000);

    let mut options =
        ProviderOptions::new(base_uri).with_polling_interval(Duration::from_millis(poll_ms));
    if let Ok(token) = std::env::var("OFREP_BEARER_TOKEN") {
        options = options.with_bearer_token(token);
    }

    let provider = Provider::new(options)?;
    let mut events = provider.take_events();
    tokio::spawn(async move {
        if let Some(events) = events.as_mut() {
            while let Some(event) = events.recv().await {
                println!("{:?}: {}", event.kind, event.message);
            }
        }
    });

    let ctx = EvaluationContext::new("1238").with_attribute("tier", "production");
    if let Err(e) = provider.init(&ctx).await {
        println!("{:#}", e);
    }
    println!("{}", provider.status());

    println!("{:?}", provider.resolve_bool("test_feature_flag", false));
    println!(
        "{:?}",
        provider.resolve_string("test_string_flag", "default".to_string())
    );

    tokio::time::sleep(tokio::time::Duration::from_secs(20)).await;

    println!("{:?}", provider.resolve_bool("test_feature_flag", false));
    provider.shutdown().await;

    Ok(())
}
