// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::sinks::tls;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("failed to build request: {0}")]
    Request(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("{0} failed with status {1}: {2}")]
    Status(&'static str, u16, String),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRegistration {
    pub name: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    pub os_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    pub arch: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub system_info: Map<String, Value>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub status: String,
    pub system_info: Map<String, Value>,
    pub metrics: Map<String, Value>,
    pub timestamp: String,
}

/// A command delivered by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exit_code: i32,
    pub execution_time_ms: i64,
    pub timestamp: String,
}

/// HTTP client for the platform control plane. Every call carries the bearer
/// API key, the agent User-Agent, and the configured request timeout; a
/// failed call is the caller's to log, the next periodic tick retries.
pub struct ControlClient {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl ControlClient {
    pub fn new(config: &ServerConfig) -> Result<Self, PlatformError> {
        let tls_config = tls::client_config(&crate::config::TlsConfig::default())
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(https);

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            client,
        })
    }

    pub async fn register(&self, registration: &AgentRegistration) -> Result<(), PlatformError> {
        let mut payload = serde_json::to_value(registration)?;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("api_key".to_string(), Value::String(self.api_key.clone()));
        }

        let (status, body) = self
            .request(Method::POST, "/api/hive/register", Some(&payload))
            .await?;

        if status != 200 && status != 201 {
            return Err(PlatformError::Status("registration", status, body));
        }

        info!("Successfully registered with platform");
        Ok(())
    }

    pub async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), PlatformError> {
        let mut payload = serde_json::to_value(heartbeat)?;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("api_key".to_string(), Value::String(self.api_key.clone()));
        }

        let (status, body) = self
            .request(Method::POST, "/api/hive/heartbeat", Some(&payload))
            .await?;

        if status != 200 {
            return Err(PlatformError::Status("heartbeat", status, body));
        }

        Ok(())
    }

    /// Poll for pending commands. 204 and 404 both mean "none pending".
    pub async fn pending_commands(&self) -> Result<Vec<Command>, PlatformError> {
        let (status, body) = self
            .request(Method::GET, "/api/hive/commands/pending", None)
            .await?;

        match status {
            200 => {
                if body.trim().is_empty() {
                    return Ok(Vec::new());
                }
                let commands: Vec<Command> = serde_json::from_str(&body)?;
                debug!(count = commands.len(), "Fetched pending commands");
                Ok(commands)
            }
            204 | 404 => Ok(Vec::new()),
            _ => Err(PlatformError::Status("command poll", status, body)),
        }
    }

    pub async fn send_command_response(
        &self,
        response: &CommandResponse,
    ) -> Result<(), PlatformError> {
        let path = format!("/api/hive/commands/{}/response", response.id);
        let payload = serde_json::to_value(response)?;

        let (status, body) = self.request(Method::POST, &path, Some(&payload)).await?;

        if status != 200 && status != 201 {
            return Err(PlatformError::Status("command response", status, body));
        }

        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
    ) -> Result<(u16, String), PlatformError> {
        let url = format!("{}{}", self.base_url, path);

        let body = match payload {
            Some(p) => Bytes::from(serde_json::to_vec(p)?),
            None => Bytes::new(),
        };

        let request = Request::builder()
            .method(method)
            .uri(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, crate::USER_AGENT)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .body(Full::new(body))
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        let response = match tokio::time::timeout(self.timeout, self.client.request(request)).await
        {
            Err(_) => return Err(PlatformError::Timeout),
            Ok(Err(e)) => return Err(PlatformError::Transport(e.to_string())),
            Ok(Ok(resp)) => resp,
        };

        let status = response.status().as_u16();
        let body = match response.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(_) => String::new(),
        };

        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full as FullBody;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct Seen {
        requests: Arc<Mutex<Vec<(String, String, String)>>>, // method, path, auth
    }

    async fn spawn_platform(status: u16, body: &'static str) -> (SocketAddr, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Seen::default();

        let server_seen = seen.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let seen = server_seen.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                        let seen = seen.clone();
                        async move {
                            let auth = req
                                .headers()
                                .get(AUTHORIZATION.as_str())
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default()
                                .to_string();
                            seen.requests.lock().unwrap().push((
                                req.method().to_string(),
                                req.uri().path().to_string(),
                                auth,
                            ));
                            let resp = hyper::Response::builder()
                                .status(status)
                                .body(FullBody::new(Bytes::from_static(body.as_bytes())))
                                .unwrap();
                            Ok::<_, std::convert::Infallible>(resp)
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (addr, seen)
    }

    fn client_for(addr: SocketAddr) -> ControlClient {
        ControlClient::new(&ServerConfig {
            url: format!("http://{}", addr),
            api_key: "secret".to_string(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    fn registration() -> AgentRegistration {
        AgentRegistration {
            name: "agent-1".to_string(),
            hostname: "host-1".to_string(),
            ip_address: "127.0.0.1".to_string(),
            os_type: "linux".to_string(),
            os_version: "linux".to_string(),
            arch: "x86_64".to_string(),
            version: crate::VERSION.to_string(),
            capabilities: vec!["logs".to_string()],
            system_info: Map::new(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn register_hits_endpoint_with_bearer_auth() {
        let (addr, seen) = spawn_platform(201, "{}").await;
        let client = client_for(addr);

        client.register(&registration()).await.unwrap();

        let requests = seen.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (method, path, auth) = &requests[0];
        assert_eq!(method, "POST");
        assert_eq!(path, "/api/hive/register");
        assert_eq!(auth, "Bearer secret");
    }

    #[tokio::test]
    async fn register_failure_surfaces_status() {
        let (addr, _seen) = spawn_platform(403, "nope").await;
        let client = client_for(addr);

        let err = client.register(&registration()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Status("registration", 403, _)));
    }

    #[tokio::test]
    async fn heartbeat_posts() {
        let (addr, seen) = spawn_platform(200, "{}").await;
        let client = client_for(addr);

        client
            .heartbeat(&Heartbeat {
                status: "running".to_string(),
                system_info: Map::new(),
                metrics: Map::new(),
                timestamp: crate::record::now_rfc3339(),
            })
            .await
            .unwrap();

        let requests = seen.requests.lock().unwrap();
        assert_eq!(requests[0].1, "/api/hive/heartbeat");
    }

    #[tokio::test]
    async fn pending_commands_parses_array() {
        let body = r#"[{"id":"c1","type":"system","command":"uptime"}]"#;
        let (addr, _seen) = spawn_platform(200, body).await;
        let client = client_for(addr);

        let commands = client.pending_commands().await.unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].id, "c1");
        assert_eq!(commands[0].kind, "system");
        assert_eq!(commands[0].command, "uptime");
    }

    #[tokio::test]
    async fn no_pending_commands_on_204_and_404() {
        for status in [204u16, 404] {
            let (addr, _seen) = spawn_platform(status, "").await;
            let client = client_for(addr);
            assert!(client.pending_commands().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn command_response_includes_id_in_path() {
        let (addr, seen) = spawn_platform(200, "{}").await;
        let client = client_for(addr);

        client
            .send_command_response(&CommandResponse {
                id: "c42".to_string(),
                success: true,
                response: Some("ok".to_string()),
                error: None,
                exit_code: 0,
                execution_time_ms: 5,
                timestamp: crate::record::now_rfc3339(),
            })
            .await
            .unwrap();

        let requests = seen.requests.lock().unwrap();
        assert_eq!(requests[0].1, "/api/hive/commands/c42/response");
    }
}
