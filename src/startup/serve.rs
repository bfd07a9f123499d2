//! Starting and stopping the selected transport.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::config::{Config, TransportConfig, TransportKind};
use crate::error::{EngineError, StartupError};
use crate::mcp::engine::McpEngine;
use crate::mcp::tools::ToolRegistry;
use crate::session::{router, SessionRouter, SessionStore};
use crate::startup::probe::HttpProbe;
use crate::startup::selector::{select_transport, RuntimeContext};
use crate::transport::{StdioTransport, Transport};

/// Selects a transport for this process and serves on it until the client
/// goes away or a shutdown signal arrives.
///
/// # Errors
///
/// Returns [`StartupError::EndpointOccupied`] when stdio is selected while an
/// HTTP server already runs on the configured endpoint, and bind, attach or
/// I/O errors otherwise.
pub async fn run(config: &Config, tools: Arc<ToolRegistry>) -> Result<(), StartupError> {
    let kind = select_transport(&config.transport, RuntimeContext::detect(), &HttpProbe::new())
        .await?;

    match kind {
        TransportKind::Stdio => run_stdio(tools, shutdown_signal()).await,
        TransportKind::Http => run_http(&config.transport, tools, shutdown_signal()).await,
    }
}

/// Serves a single engine over the process's stdin and stdout.
///
/// Returns when stdin reaches EOF or `shutdown` completes.
///
/// # Errors
///
/// Returns an error if the engine cannot be attached.
pub async fn run_stdio<F>(tools: Arc<ToolRegistry>, shutdown: F) -> Result<(), StartupError>
where
    F: Future<Output = ()>,
{
    let engine = Arc::new(McpEngine::new(tools));
    let transport = bootstrap_stdio(&engine, StdioTransport::new())?;
    tracing::info!("MCP server ready on stdio, waiting for client connection...");

    tokio::select! {
        () = transport.close_signal().closed() => {}
        () = shutdown => {
            engine.close();
        }
    }
    transport.finished().await;

    tracing::info!(
        handled = engine.handled_messages(),
        reason = ?transport.close_signal().reason(),
        "stdio session ended"
    );
    Ok(())
}

/// Binds `engine` to a stdio adapter over `transport`'s streams.
///
/// The adapter's read loop runs as a background task from here on.
///
/// # Errors
///
/// Returns an error if the engine or the adapter is already bound.
pub fn bootstrap_stdio<R, W>(
    engine: &Arc<McpEngine>,
    transport: StdioTransport<R, W>,
) -> Result<Arc<StdioTransport<R, W>>, EngineError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let transport = Arc::new(transport);
    engine.attach(&*transport)?;
    Ok(transport)
}

/// Binds the configured HTTP endpoint and serves sessions on it.
///
/// # Errors
///
/// Returns [`StartupError::Bind`] if the listener cannot be bound, or an
/// I/O error from the server.
pub async fn run_http<F>(
    config: &TransportConfig,
    tools: Arc<ToolRegistry>,
    shutdown: F,
) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let endpoint = config.endpoint();
    let listener = TcpListener::bind(endpoint.authority())
        .await
        .map_err(|source| StartupError::Bind {
            address: endpoint.to_string(),
            source,
        })?;

    serve_http(listener, &config.path, tools, shutdown).await
}

/// Serves the session router on an already-bound listener.
///
/// When `shutdown` completes every live session is closed, which ends open
/// notification streams, and the server drains in-flight requests.
///
/// # Errors
///
/// Returns an I/O error from the server.
pub async fn serve_http<F>(
    listener: TcpListener,
    path: &str,
    tools: Arc<ToolRegistry>,
    shutdown: F,
) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = Arc::new(SessionStore::new());
    let sessions = Arc::new(SessionRouter::new(store, move || {
        McpEngine::new(Arc::clone(&tools))
    }));
    let app = router(Arc::clone(&sessions), path);

    let address = listener.local_addr()?;
    tracing::info!(%address, path, "MCP server listening on HTTP");

    let closer = Arc::clone(&sessions);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let closed = closer.close_all();
            tracing::info!(closed, "Closed live sessions");
        })
        .await?;

    Ok(())
}

/// Completes on SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Cannot install signal handlers, shutdown on signal disabled");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Completes on Ctrl+C.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot install Ctrl+C handler, shutdown on signal disabled");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_refuses_second_transport() {
        let engine = Arc::new(McpEngine::new(Arc::new(ToolRegistry::new())));
        let (_client, server) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(server);
        let first = bootstrap_stdio(&engine, StdioTransport::with_streams(reader, writer)).unwrap();

        let (_client2, server2) = tokio::io::duplex(64);
        let (reader2, writer2) = tokio::io::split(server2);
        let err = bootstrap_stdio(&engine, StdioTransport::with_streams(reader2, writer2))
            .unwrap_err();
        assert_eq!(err, EngineError::AlreadyAttached);

        engine.close();
        first.finished().await;
    }

    #[tokio::test]
    async fn http_bind_failure_is_reported() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = TransportConfig {
            kind: TransportKind::Http,
            host: "127.0.0.1".to_string(),
            port: occupied.local_addr().unwrap().port(),
            ..TransportConfig::default()
        };

        let err = run_http(&config, Arc::new(ToolRegistry::new()), async {})
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Bind { .. }));
    }
}
