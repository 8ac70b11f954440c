// SPDX-License-Identifier: Apache-2.0

//! End-to-end agent tests: a real config, a mock platform, a mock HTTP sink,
//! and actual log files on disk.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use pulse_hive_agent::config::Config;
use pulse_hive_agent::init::agent::Agent;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct PlatformState {
    registrations: Arc<AtomicUsize>,
    heartbeats: Arc<AtomicUsize>,
}

/// Minimal platform: accepts registration and heartbeats, has no commands.
async fn spawn_platform() -> (SocketAddr, PlatformState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = PlatformState::default();

    let server_state = state.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let state = server_state.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let state = state.clone();
                    async move {
                        let status = match req.uri().path() {
                            "/api/hive/register" => {
                                state.registrations.fetch_add(1, Ordering::SeqCst);
                                200
                            }
                            "/api/hive/heartbeat" => {
                                state.heartbeats.fetch_add(1, Ordering::SeqCst);
                                200
                            }
                            "/api/hive/commands/pending" => 204,
                            _ => 404,
                        };
                        let resp = hyper::Response::builder()
                            .status(status)
                            .body(Full::new(Bytes::new()))
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

    (addr, state)
}

/// HTTP sink endpoint capturing every request body.
async fn spawn_sink() -> (SocketAddr, Arc<Mutex<Vec<Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bodies = Arc::new(Mutex::new(Vec::new()));

    let server_bodies = bodies.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let bodies = server_bodies.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let bodies = bodies.clone();
                    async move {
                        let collected = req.into_body().collect().await.unwrap().to_bytes();
                        if let Ok(value) = serde_json::from_slice::<Value>(&collected) {
                            bodies.lock().unwrap().push(value);
                        }
                        let resp = hyper::Response::builder()
                            .status(200)
                            .body(Full::new(Bytes::new()))
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

    (addr, bodies)
}

fn agent_config(
    platform: SocketAddr,
    sink: SocketAddr,
    log_dir: &TempDir,
    data_dir: &TempDir,
) -> Config {
    let yaml = format!(
        r#"
server:
  url: http://{platform}
  api_key: test-key
  heartbeat_interval: 200ms
agent:
  name: integration-agent
  data_dir: {data_dir}
  batch_size: 500
  flush_interval: 100ms
collectors:
  logs:
    enabled: true
    scan_frequency: 50ms
    rotate_wait: 100ms
    paths:
      - path: "{log_dir}/*.log"
outputs:
  - name: capture
    type: http
    enabled: true
    url: http://{sink}/ingest
"#,
        platform = platform,
        sink = sink,
        data_dir = data_dir.path().display(),
        log_dir = log_dir.path().display(),
    );

    Config::from_yaml(&yaml).unwrap()
}

fn batch_messages(bodies: &[Value]) -> Vec<String> {
    let mut messages = Vec::new();
    for body in bodies {
        if let Some(items) = body["items"].as_array() {
            for item in items {
                if item["type"] == "log" {
                    messages.push(item["message"].as_str().unwrap_or_default().to_string());
                }
            }
        }
    }
    messages
}

#[tokio::test]
async fn log_lines_flow_to_the_sink_and_the_platform_sees_us() {
    let (platform_addr, platform) = spawn_platform().await;
    let (sink_addr, sink_bodies) = spawn_sink().await;

    let log_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();
    std::fs::write(log_dir.path().join("app.log"), "first\nsecond\n").unwrap();

    let config = agent_config(platform_addr, sink_addr, &log_dir, &data_dir);
    let agent = Agent::new(
        config,
        data_dir.path().join("config.yaml"),
        Duration::from_secs(10),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.run(cancel.clone()));

    // Wait for the batch to arrive at the sink.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        {
            let bodies = sink_bodies.lock().unwrap();
            if !batch_messages(&bodies).is_empty() {
                break;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("no batch reached the sink in time");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    {
        let bodies = sink_bodies.lock().unwrap();
        let messages = batch_messages(&bodies);
        assert_eq!(messages, vec!["first", "second"]);

        // Envelope shape for a non-_json endpoint.
        assert_eq!(bodies[0]["source"], "hive-agent");
        assert!(bodies[0]["batch_id"].as_str().unwrap().starts_with("batch-"));

        // Every record carries its emission timestamp.
        for item in bodies[0]["items"].as_array().unwrap() {
            assert!(item["timestamp"].is_string());
            assert!(!item["timestamp"].as_str().unwrap().is_empty());
        }
    }

    assert_eq!(platform.registrations.load(Ordering::SeqCst), 1);

    // Heartbeats tick at 200ms; at least one should have landed.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while platform.heartbeats.load(Ordering::SeqCst) == 0 {
        if tokio::time::Instant::now() > deadline {
            panic!("no heartbeat reached the platform");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    cancel.cancel();
    handle.await.unwrap().expect("agent did not shut down cleanly");

    // Offsets were persisted on shutdown: a restart must not re-emit.
    let store =
        pulse_hive_agent::collectors::logs::position::PositionStore::new(data_dir.path()).unwrap();
    assert_eq!(store.get(&log_dir.path().join("app.log")), Some(13));
}

#[tokio::test]
async fn appended_lines_arrive_after_the_initial_batch() {
    let (platform_addr, _platform) = spawn_platform().await;
    let (sink_addr, sink_bodies) = spawn_sink().await;

    let log_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();
    let log_path = log_dir.path().join("app.log");
    std::fs::write(&log_path, "one\n").unwrap();

    let config = agent_config(platform_addr, sink_addr, &log_dir, &data_dir);
    let agent = Agent::new(
        config,
        data_dir.path().join("config.yaml"),
        Duration::from_secs(10),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.run(cancel.clone()));

    let wait_for = |expected: Vec<&'static str>| {
        let sink_bodies = sink_bodies.clone();
        async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            loop {
                {
                    let bodies = sink_bodies.lock().unwrap();
                    let messages = batch_messages(&bodies);
                    if messages == expected {
                        return;
                    }
                }
                if tokio::time::Instant::now() > deadline {
                    panic!("expected messages did not arrive");
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    };

    wait_for(vec!["one"]).await;

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&log_path)
        .unwrap();
    use std::io::Write;
    file.write_all(b"two\n").unwrap();
    drop(file);

    wait_for(vec!["one", "two"]).await;

    cancel.cancel();
    handle.await.unwrap().expect("agent did not shut down cleanly");
}
