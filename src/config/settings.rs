//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.
//! Environment overrides are applied on top of the parsed file.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::startup::Endpoint;

/// Environment variable selecting the transport kind.
pub const ENV_TRANSPORT: &str = "MCP_TRANSPORT";
/// Environment variable overriding the HTTP host.
pub const ENV_HTTP_HOST: &str = "MCP_HTTP_HOST";
/// Environment variable overriding the HTTP port.
pub const ENV_HTTP_PORT: &str = "MCP_HTTP_PORT";
/// Environment variable overriding the HTTP endpoint path.
pub const ENV_HTTP_PATH: &str = "MCP_HTTP_PATH";
/// Environment variable forcing HTTP even when piped.
pub const ENV_FORCE_HTTP: &str = "MCP_FORCE_HTTP";

/// Root configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()
    }

    /// Applies `MCP_*` environment overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides resolved through `lookup`.
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(value) = get(ENV_TRANSPORT) {
            self.transport.kind = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_TRANSPORT,
                value,
            })?;
        }
        if let Some(value) = get(ENV_HTTP_HOST) {
            self.transport.host = value;
        }
        if let Some(value) = get(ENV_HTTP_PORT) {
            self.transport.port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_HTTP_PORT,
                value,
            })?;
        }
        if let Some(value) = get(ENV_HTTP_PATH) {
            self.transport.path = value;
        }
        if let Some(value) = get(ENV_FORCE_HTTP) {
            self.transport.force_http = parse_flag(&value).ok_or(ConfigError::InvalidEnv {
                name: ENV_FORCE_HTTP,
                value,
            })?;
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Wire transport the server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    #[default]
    Stdio,
    /// Streamable HTTP on a single endpoint path.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Http => f.write_str("http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            other => Err(format!("unknown transport '{other}' (expected stdio or http)")),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Requested transport. Default: stdio.
    #[serde(default)]
    pub kind: TransportKind,

    /// Host the HTTP transport binds (and the stdio path probes).
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP transport binds (and the stdio path probes).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Endpoint path serving POST/GET/DELETE.
    #[serde(default = "default_path")]
    pub path: String,

    /// Keep HTTP even when stdin and stdout are both piped.
    #[serde(default)]
    pub force_http: bool,
}

impl TransportConfig {
    /// Returns the (host, port) pair this configuration points at.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "transport.host cannot be empty".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError {
                message: "transport.port must be between 1 and 65535".to_string(),
            });
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::ValidationError {
                message: format!("transport.path '{}' must start with '/'", self.path),
            });
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            path: default_path(),
            force_http: false,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    3000
}

fn default_path() -> String {
    "/mcp".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn parse_minimal_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "transport": {
                "kind": "http",
                "host": "0.0.0.0",
                "port": 8765,
                "path": "/rpc",
                "force_http": true
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.kind, TransportKind::Http);
        assert_eq!(config.transport.host, "0.0.0.0");
        assert_eq!(config.transport.port, 8765);
        assert_eq!(config.transport.path, "/rpc");
        assert!(config.transport.force_http);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn transport_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.kind, TransportKind::Stdio);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3000);
        assert_eq!(config.path, "/mcp");
        assert!(!config.force_http);
    }

    #[test]
    fn logging_config_defaults() {
        assert_eq!(LoggingConfig::default().level, "warn");
    }

    #[test]
    fn reject_unknown_fields() {
        let result: Result<Config, _> = serde_json::from_str(r#"{"unknown_field": "value"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn reject_unknown_transport_kind() {
        let result: Result<Config, _> = serde_json::from_str(r#"{"transport": {"kind": "ws"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn reject_relative_path() {
        let config: Config =
            serde_json::from_str(r#"{"transport": {"path": "mcp"}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_port() {
        let config: Config = serde_json::from_str(r#"{"transport": {"port": 0}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                (ENV_TRANSPORT, "HTTP"),
                (ENV_HTTP_HOST, "127.0.0.1"),
                (ENV_HTTP_PORT, "4000"),
                (ENV_HTTP_PATH, "/custom"),
                (ENV_FORCE_HTTP, "yes"),
            ]))
            .unwrap();

        assert_eq!(config.transport.kind, TransportKind::Http);
        assert_eq!(config.transport.host, "127.0.0.1");
        assert_eq!(config.transport.port, 4000);
        assert_eq!(config.transport.path, "/custom");
        assert!(config.transport.force_http);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[(ENV_TRANSPORT, ""), (ENV_HTTP_PORT, "  ")]))
            .unwrap();
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn bad_env_port_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_HTTP_PORT, "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_HTTP_PORT));
    }

    #[test]
    fn transport_kind_round_trips_display() {
        for kind in [TransportKind::Stdio, TransportKind::Http] {
            assert_eq!(kind.to_string().parse::<TransportKind>(), Ok(kind));
        }
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }
}
