//! Integration tests for startup transport selection and endpoint probing.
//!
//! A real HTTP server is started on an ephemeral port so the prober and the
//! stdio conflict check run against a live endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use cloud_backend_mcp::config::{TransportConfig, TransportKind};
use cloud_backend_mcp::error::StartupError;
use cloud_backend_mcp::mcp::ToolRegistry;
use cloud_backend_mcp::startup::{
    is_server_running, select_transport, serve_http, Endpoint, EndpointProbe, HttpProbe,
    RuntimeContext,
};
use cloud_backend_mcp::transport::http::SESSION_ID_HEADER;

const PIPED: RuntimeContext = RuntimeContext {
    stdin_is_terminal: false,
    stdout_is_terminal: false,
};

struct RunningServer {
    port: u16,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), StartupError>>,
}

impl RunningServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve_http(
            listener,
            "/mcp",
            Arc::new(ToolRegistry::new()),
            async move {
                let _ = rx.await;
            },
        ));
        Self {
            port,
            shutdown,
            task,
        }
    }

    fn config(&self) -> TransportConfig {
        TransportConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            ..TransportConfig::default()
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server should stop after shutdown")
            .unwrap()
            .unwrap();
    }
}

struct NeverRunning;

#[async_trait]
impl EndpointProbe for NeverRunning {
    async fn is_running(&self, _endpoint: &Endpoint) -> bool {
        false
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// =============================================================================
// Endpoint Prober
// =============================================================================

#[tokio::test]
async fn probe_detects_live_server() {
    let server = RunningServer::start().await;
    assert!(is_server_running("127.0.0.1", server.port).await);
    server.stop().await;
}

#[tokio::test]
async fn probe_reports_closed_port_as_not_running() {
    let port = free_port().await;
    assert!(!is_server_running("127.0.0.1", port).await);
}

#[tokio::test]
async fn probe_times_out_on_silent_listener() {
    // Accepts connections but never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let _hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let probe = HttpProbe::with_timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    assert!(!probe.is_running(&Endpoint::new("127.0.0.1", port)).await);
    assert!(started.elapsed() < Duration::from_secs(3));
}

// =============================================================================
// Transport Selector
// =============================================================================

#[tokio::test]
async fn stdio_conflicts_with_running_http_server() {
    let server = RunningServer::start().await;

    let err = select_transport(&server.config(), PIPED, &HttpProbe::new())
        .await
        .unwrap_err();
    match err {
        StartupError::EndpointOccupied { url } => {
            assert_eq!(url, format!("http://127.0.0.1:{}", server.port));
        }
        other => panic!("expected EndpointOccupied, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn stdio_starts_when_endpoint_is_free() {
    let config = TransportConfig {
        host: "127.0.0.1".to_string(),
        port: free_port().await,
        ..TransportConfig::default()
    };
    let kind = select_transport(&config, PIPED, &HttpProbe::new())
        .await
        .unwrap();
    assert_eq!(kind, TransportKind::Stdio);
}

#[tokio::test]
async fn forced_http_ignores_running_server() {
    let server = RunningServer::start().await;
    let config = TransportConfig {
        kind: TransportKind::Http,
        force_http: true,
        ..server.config()
    };

    let kind = select_transport(&config, PIPED, &HttpProbe::new())
        .await
        .unwrap();
    assert_eq!(kind, TransportKind::Http);

    server.stop().await;
}

#[tokio::test]
async fn selection_with_fake_probe() {
    let config = TransportConfig {
        kind: TransportKind::Http,
        ..TransportConfig::default()
    };
    let kind = select_transport(&config, PIPED, &NeverRunning).await.unwrap();
    assert_eq!(kind, TransportKind::Stdio);
}

// =============================================================================
// HTTP Server
// =============================================================================

#[tokio::test]
async fn http_server_creates_sessions_over_tcp() {
    let server = RunningServer::start().await;
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/mcp", server.port);

    let response = client
        .post(&url)
        .header("content-type", "application/json")
        .header("accept", "application/json, text/event-stream")
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{}}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");

    let response = client
        .delete(&url)
        .header(SESSION_ID_HEADER, &id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .delete(&url)
        .header(SESSION_ID_HEADER, &id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    server.stop().await;
}
