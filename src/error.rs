//! Error types for cloud-backend-mcp.
//!
//! Errors are grouped by concern. Only [`StartupError`] is ever fatal to the
//! process; everything that happens inside a single session is answered on
//! that session's wire and never escapes it.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// An environment override could not be interpreted.
    #[error("invalid value for {name}: {value}")]
    InvalidEnv {
        /// Name of the environment variable.
        name: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised while attaching an engine to a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine is already bound to a transport.
    #[error("protocol engine is already attached to a transport")]
    AlreadyAttached,

    /// The transport refused the engine.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by transport adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A second engine tried to bind to the same adapter.
    #[error("transport already has an engine bound")]
    AlreadyBound,

    /// The adapter was closed before the operation completed.
    #[error("transport is closed")]
    Closed,
}

/// Errors that abort server startup.
#[derive(Error, Debug)]
pub enum StartupError {
    /// Another server already answers on the endpoint the stdio path would
    /// otherwise collide with.
    #[error("HTTP server already running at {url}")]
    EndpointOccupied {
        /// URL of the competing server.
        url: String,
    },

    /// The HTTP listener could not be bound.
    #[error("failed to bind HTTP listener on {address}")]
    Bind {
        /// The address that was requested.
        address: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The protocol engine could not be attached.
    #[error("failed to attach protocol engine")]
    Attach(#[from] EngineError),

    /// The server failed while running.
    #[error("server I/O error")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "invalid setting".to_string(),
        };
        assert!(error.to_string().contains("invalid setting"));
    }

    #[test]
    fn endpoint_occupied_names_url() {
        let error = StartupError::EndpointOccupied {
            url: "http://localhost:3000".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "HTTP server already running at http://localhost:3000"
        );
    }

    #[test]
    fn engine_error_wraps_transport() {
        let error = EngineError::from(TransportError::AlreadyBound);
        assert_eq!(error.to_string(), "transport already has an engine bound");
    }
}
