// SPDX-License-Identifier: Apache-2.0

//! Generic HTTP sink: encodes a batch as JSON and POSTs it with bounded
//! retry. Receivers that take a bare JSON array (OpenObserve-style `_json`
//! endpoints) get one; everything else gets the batch envelope.

use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::Request;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

use super::retry::{status_is_retryable, Backoff};
use super::{tls, Sink, SinkError};
use crate::collectors::HealthHandle;
use crate::config::SinkSpec;
use crate::record::{Record, RecordKind};

pub struct HttpSink {
    name: String,
    url: String,
    auth: crate::config::AuthConfig,
    headers: Vec<(String, String)>,
    timeout: Duration,
    retry: crate::config::RetrySpec,
    accepts: Vec<RecordKind>,
    bare_array: bool,
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    health: HealthHandle,
}

impl HttpSink {
    pub fn new(spec: &SinkSpec) -> Result<Self, SinkError> {
        if spec.url.is_empty() {
            return Err(SinkError::Request(format!(
                "sink '{}': url is required",
                spec.name
            )));
        }
        spec.url
            .parse::<http::Uri>()
            .map_err(|e| SinkError::Request(format!("sink '{}': invalid url: {}", spec.name, e)))?;

        let client = build_client(&spec.tls)?;

        let health = HealthHandle::new();
        health.set_detail("url", &spec.url);

        Ok(Self {
            name: spec.name.clone(),
            url: spec.url.clone(),
            auth: spec.auth.clone(),
            headers: spec.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            timeout: spec.timeout,
            retry: spec.retry.clone(),
            accepts: super::parse_data_types(&spec.data_types),
            bare_array: spec.url.contains("openobserve") || spec.url.contains("_json"),
            client,
            health,
        })
    }

    fn build_request(&self, body: Bytes) -> Result<Request<Full<Bytes>>, SinkError> {
        let mut builder = Request::post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, crate::USER_AGENT);

        for (key, value) in &self.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        match self.auth.kind.as_str() {
            "bearer" if !self.auth.token.is_empty() => {
                builder = builder.header(AUTHORIZATION, format!("Bearer {}", self.auth.token));
            }
            "basic" if !self.auth.username.is_empty() => {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", self.auth.username, self.auth.password));
                builder = builder.header(AUTHORIZATION, format!("Basic {}", credentials));
            }
            "api_key" if !self.auth.api_key.is_empty() => {
                let header = if self.auth.header.is_empty() {
                    "X-API-Key"
                } else {
                    self.auth.header.as_str()
                };
                builder = builder.header(header, self.auth.api_key.as_str());
            }
            _ => {}
        }

        builder
            .body(Full::new(body))
            .map_err(|e| SinkError::Request(e.to_string()))
    }

    async fn send_with_retry(&self, body: Bytes, items: usize) -> Result<(), SinkError> {
        let mut backoff = Backoff::new(&self.retry);
        let mut last_err = SinkError::Transport("no attempts made".to_string());

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = backoff.next_delay();
                debug!(sink = %self.name, attempt, delay = ?delay, "Retrying request");
                tokio::time::sleep(delay).await;
            }

            let request = self.build_request(body.clone())?;

            let response = match tokio::time::timeout(self.timeout, self.client.request(request)).await {
                Err(_) => {
                    last_err = SinkError::Transport("request timed out".to_string());
                    warn!(sink = %self.name, attempt, "HTTP request timed out");
                    continue;
                }
                Ok(Err(e)) => {
                    last_err = SinkError::Transport(e.to_string());
                    warn!(sink = %self.name, attempt, error = %e, "HTTP request failed");
                    continue;
                }
                Ok(Ok(resp)) => resp,
            };

            let status = response.status().as_u16();
            // Drain the body so the connection can be reused.
            let _ = response.into_body().collect().await;

            if (200..300).contains(&status) {
                self.health.clear_error();
                debug!(sink = %self.name, items, "Successfully sent batch");
                return Ok(());
            }

            last_err = SinkError::Status(status);

            if !status_is_retryable(status) {
                error!(sink = %self.name, status, "HTTP client error, not retrying");
                break;
            }

            warn!(sink = %self.name, attempt, status, "HTTP request failed with server error");
        }

        self.health.set_error(last_err.to_string());
        Err(last_err)
    }
}

impl Sink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self) -> &[RecordKind] {
        &self.accepts
    }

    fn start(&self) {
        tracing::info!(sink = %self.name, url = %self.url, "Starting HTTP output");
    }

    fn stop(&self) {
        tracing::info!(sink = %self.name, "Stopping HTTP output");
    }

    fn send(&self, batch: Vec<Record>) -> BoxFuture<'_, Result<(), SinkError>> {
        async move {
            let items = batch.len();
            let payload = build_payload(&batch, self.bare_array);
            let body = Bytes::from(serde_json::to_vec(&payload)?);

            self.send_with_retry(body, items).await
        }
        .boxed()
    }

    fn health(&self) -> HealthHandle {
        self.health.clone()
    }
}

/// Bare array for OpenObserve-style receivers, envelope for everything else.
fn build_payload(batch: &[Record], bare_array: bool) -> Value {
    if bare_array {
        json!(batch)
    } else {
        json!({
            "items": batch,
            "timestamp": crate::record::now_rfc3339(),
            "batch_id": format!("batch-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            "source": "hive-agent",
        })
    }
}

fn build_client(
    tls_config: &crate::config::TlsConfig,
) -> Result<HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>, SinkError> {
    let client_config = tls::client_config(tls_config)?;

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(client_config)
        .https_or_http()
        .enable_http1()
        .build();

    let client = HyperClient::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .timer(TokioTimer::new())
        .build::<_, Full<Bytes>>(https);

    Ok(client)
}
