// SPDX-License-Identifier: Apache-2.0

//! The local health endpoint: a single JSON GET surface reporting the
//! supervisor's status string, uptime, and version.

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collectors::TaskResult;
use crate::config::HealthcheckConfig;
use crate::listener::Listener;
use crate::record::now_rfc3339;

pub struct HealthServer {
    config: HealthcheckConfig,
    status: Arc<RwLock<String>>,
    started_at: Instant,
}

impl HealthServer {
    pub fn new(config: HealthcheckConfig, status: Arc<RwLock<String>>, started_at: Instant) -> Self {
        Self {
            config,
            status,
            started_at,
        }
    }

    pub async fn serve(self, listener: Listener, cancel: CancellationToken) -> TaskResult {
        let listener = listener.into_async()?;
        info!(
            addr = %listener.local_addr()?,
            path = %self.config.path,
            "Starting health check server"
        );

        let path = Arc::new(self.config.path.clone());
        let status = self.status.clone();
        let started_at = self.started_at;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Health check server stopped");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    let (stream, _peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Health check accept failed");
                            continue;
                        }
                    };

                    let path = path.clone();
                    let status = status.clone();

                    tokio::spawn(async move {
                        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let path = path.clone();
                            let status = status.clone();
                            async move {
                                let response = if req.uri().path() == path.as_str() {
                                    let body = json!({
                                        "status": status.read().unwrap().clone(),
                                        "timestamp": now_rfc3339(),
                                        "uptime": format!("{:.0?}", started_at.elapsed()),
                                        "version": crate::VERSION,
                                    });
                                    hyper::Response::builder()
                                        .status(StatusCode::OK)
                                        .header(http::header::CONTENT_TYPE, "application/json")
                                        .body(Full::new(Bytes::from(body.to_string())))
                                } else {
                                    hyper::Response::builder()
                                        .status(StatusCode::NOT_FOUND)
                                        .body(Full::new(Bytes::new()))
                                };
                                response
                            }
                        });

                        let _ = hyper::server::conn::http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
            }
        }
    }
}
