use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    header,
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder,
};
use tokio::time::Duration;

use crate::{
    error::FetchError,
    models::{HeaderCallback, ProviderOptions},
};

/// Path of the bulk evaluation endpoint, relative to the base uri.
pub const OFREP_BULK_PATH: &str = "/ofrep/v1/evaluate/flags";

/// The environment variable to change the default timeout for OFREP requests.
const OFREP_TIMEOUT_MS: &str = "OFREP_TIMEOUT_MS";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Raw result of one exchange with the evaluation service, whatever the status.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: HeaderMap,
}

impl Resolution {
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)
    }
}

/// Sends a serialized bulk evaluation request and returns the raw response.
///
/// Implementations report any status as `Ok`; only a failure to exchange
/// bytes with the server is an `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn bulk(&self, payload: Vec<u8>) -> Result<Resolution, FetchError>;
}

/// Parses a Retry-After value, either delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&Utc) - Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

fn create_http_connection_client(timeout: Option<Duration>) -> reqwest::Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    let timeout = timeout.unwrap_or_else(|| {
        Duration::from_millis(
            std::env::var(OFREP_TIMEOUT_MS)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        )
    });
    ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(60)))
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .timeout(timeout)
        .default_headers(headers)
        .build()
}

/// Transport talking to an OFREP server over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    bulk_url: String,
    header_callbacks: Vec<HeaderCallback>,
    http_client: Client,
}

impl HttpTransport {
    pub fn new(options: &ProviderOptions) -> Result<Self, FetchError> {
        let http_client = create_http_connection_client(options.timeout)
            .map_err(|e| FetchError::Request(format!("failed to build http client: {e}")))?;
        Ok(Self {
            bulk_url: format!("{}{}", options.base_uri.trim_end_matches('/'), OFREP_BULK_PATH),
            header_callbacks: options.header_callbacks.clone(),
            http_client,
        })
    }

    /// Runs the header callbacks in order, later ones overwrite earlier ones.
    fn request_headers(&self) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        for callback in &self.header_callbacks {
            let (name, value) = callback();
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::Request(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| FetchError::Request(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn bulk(&self, payload: Vec<u8>) -> Result<Resolution, FetchError> {
        let headers = self.request_headers()?;
        let response = self
            .http_client
            .post(&self.bulk_url)
            .headers(headers)
            .body(payload)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read the body: {e}")))?;

        Ok(Resolution {
            status,
            body: body.to_vec(),
            headers,
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use httptest::{
        matchers::{contains, eq, json_decoded, request},
        responders::{json_encoded, status_code},
        Expectation, Server,
    };
    use serde_json::json;

    #[tokio::test]
    async fn test_bulk_posts_payload_with_headers() -> anyhow::Result<()> {
        let http_server = Server::run();
        http_server.expect(
            Expectation::matching(httptest::all_of![
                request::method_path("POST", OFREP_BULK_PATH),
                request::headers(contains(("authorization", "Bearer api-key"))),
                request::headers(contains(("content-type", "application/json"))),
                request::body(json_decoded(eq(json!({"context": {"color": "red"}})))),
            ])
            .respond_with(json_encoded(json!({"flags": []}))),
        );

        let options = ProviderOptions::new(format!("http://{}/", http_server.addr()))
            .with_bearer_token("api-key");
        let transport = HttpTransport::new(&options)?;
        let res = transport
            .bulk(serde_json::to_vec(&json!({"context": {"color": "red"}}))?)
            .await?;

        assert_eq!(res.status, 200);
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&res.body)?,
            json!({"flags": []})
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_later_header_callback_wins() -> anyhow::Result<()> {
        let http_server = Server::run();
        http_server.expect(
            Expectation::matching(httptest::all_of![
                request::method_path("POST", OFREP_BULK_PATH),
                request::headers(contains(("authorization", "Bearer second"))),
            ])
            .respond_with(json_encoded(json!({"flags": []}))),
        );

        let options = ProviderOptions::new(format!("http://{}", http_server.addr()))
            .with_bearer_token("first")
            .with_bearer_token("second");
        let transport = HttpTransport::new(&options)?;
        let res = transport.bulk(b"{}".to_vec()).await?;
        assert_eq!(res.status, 200);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_ok_status_is_returned_with_retry_hint() -> anyhow::Result<()> {
        let http_server = Server::run();
        http_server.expect(
            Expectation::matching(request::method_path("POST", OFREP_BULK_PATH)).respond_with(
                status_code(429)
                    .append_header("Retry-After", "13")
                    .body("{}"),
            ),
        );

        let transport =
            HttpTransport::new(&ProviderOptions::new(format!("http://{}", http_server.addr())))?;
        let res = transport.bulk(b"{}".to_vec()).await?;
        assert_eq!(res.status, 429);
        assert_eq!(res.retry_after(), Some(Duration::from_secs(13)));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_header_is_a_request_error() -> anyhow::Result<()> {
        let options = ProviderOptions::new("http://127.0.0.1:1")
            .with_header_callback(Arc::new(|| ("bad header".to_string(), "v".to_string())));
        let transport = HttpTransport::new(&options)?;
        match transport.bulk(b"{}".to_vec()).await {
            Err(FetchError::Request(_)) => Ok(()),
            other => anyhow::bail!("expected request error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("13"), Some(Duration::from_secs(13)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }
}
