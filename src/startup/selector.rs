//! Transport selection at startup.
//!
//! The decision runs once:
//!
//! 1. Take the configured transport (default stdio).
//! 2. If stdin and stdout are both piped and HTTP is not forced, use stdio.
//! 3. For stdio, refuse to start if an HTTP server already answers on the
//!    configured endpoint; the client should talk to that server instead.
//! 4. For HTTP, skip the probe. A busy port surfaces as a bind error.

use std::io::IsTerminal;

use crate::config::{TransportConfig, TransportKind};
use crate::error::StartupError;
use crate::startup::probe::EndpointProbe;

/// Terminal status of the process's standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeContext {
    /// Whether stdin is a terminal.
    pub stdin_is_terminal: bool,
    /// Whether stdout is a terminal.
    pub stdout_is_terminal: bool,
}

impl RuntimeContext {
    /// Inspects the current process.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            stdin_is_terminal: std::io::stdin().is_terminal(),
            stdout_is_terminal: std::io::stdout().is_terminal(),
        }
    }

    /// Both streams are pipes: a client launched us to speak stdio.
    #[must_use]
    pub const fn is_piped(&self) -> bool {
        !self.stdin_is_terminal && !self.stdout_is_terminal
    }
}

/// Resolves the transport from configuration and runtime context.
#[must_use]
pub fn resolve_transport(config: &TransportConfig, context: RuntimeContext) -> TransportKind {
    if context.is_piped() && !config.force_http {
        if config.kind == TransportKind::Http {
            tracing::info!("stdin/stdout are piped, using stdio transport instead of HTTP");
        }
        return TransportKind::Stdio;
    }
    config.kind
}

/// Resolves the transport and, for stdio, checks for a competing server.
///
/// # Errors
///
/// Returns [`StartupError::EndpointOccupied`] when stdio is chosen and
/// `probe` finds a server at the configured endpoint.
pub async fn select_transport<P>(
    config: &TransportConfig,
    context: RuntimeContext,
    probe: &P,
) -> Result<TransportKind, StartupError>
where
    P: EndpointProbe + ?Sized,
{
    let kind = resolve_transport(config, context);

    if kind == TransportKind::Stdio {
        let endpoint = config.endpoint();
        if probe.is_running(&endpoint).await {
            let url = endpoint.url();
            tracing::error!("Cannot connect via stdio: HTTP server already running at {url}");
            tracing::error!("To connect to the HTTP server, configure your client to use HTTP transport");
            return Err(StartupError::EndpointOccupied { url });
        }
    }

    tracing::debug!(transport = %kind, "Transport selected");
    Ok(kind)
}
