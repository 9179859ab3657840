// Configuration support: client connection parameters plus the ambient
// retry/circuit-breaker layers, structured the way a layered TOML config
// with per-concern sections and a `Default` impl usually is.

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::ClientError;
use crate::retry::RetryConfig;

/// Maximum number of configured endpoints — only the first is ever dialed
/// (mirrors `HIETCD_MAX_NODE_NUM` in the original client; failover across
/// the rest is out of scope, see DESIGN.md).
pub const MAX_ENDPOINTS: usize = 11;

/// How deep the response parser recurses into a node's `nodes` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseDepth {
    /// Expand every level of the child/sibling tree the server returns.
    Full,
    /// Expand only the direct children of the top-level node.
    Shallow,
}

impl Default for ParseDepth {
    fn default() -> Self {
        ParseDepth::Full
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub connection: ConnectionConfigSection,
    pub retry: RetryConfigSection,
    pub circuit_breaker: CircuitBreakerConfigSection,
    pub parsing: ParsingConfigSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfigSection {
    /// Request timeout, seconds.
    pub timeout_secs: u32,
    /// Connect timeout, seconds.
    pub connect_timeout_secs: u32,
    /// Whether to keep connections alive between requests.
    pub keepalive: bool,
    /// Up to [`MAX_ENDPOINTS`] server base URLs; only `endpoints[0]` is used.
    pub endpoints: Vec<String>,
    /// Optional client certificate file for mTLS.
    pub certfile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfigSection {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfigSection {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfigSection {
    pub depth: ParseDepth,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfigSection {
                timeout_secs: 30,
                connect_timeout_secs: 1,
                keepalive: true,
                endpoints: Vec::new(),
                certfile: None,
            },
            retry: RetryConfigSection {
                max_retries: 3,
                initial_delay_ms: 100,
                max_delay_ms: 5000,
                multiplier: 2.0,
                enabled: false,
            },
            circuit_breaker: CircuitBreakerConfigSection {
                enabled: false,
                failure_threshold: 5,
                reset_timeout_ms: 60_000,
            },
            parsing: ParsingConfigSection {
                depth: ParseDepth::Full,
            },
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::generic(format!("failed to read config file {path}: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| ClientError::generic(format!("failed to parse config file: {e}")))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        if self.connection.endpoints.len() < MAX_ENDPOINTS {
            self.connection.endpoints.push(endpoint.into());
        }
        self
    }

    /// The endpoint actually dialed. Only the first configured endpoint is
    /// ever used (see DESIGN.md — multi-endpoint failover is future work).
    pub fn endpoint(&self) -> Option<&str> {
        self.connection.endpoints.first().map(String::as_str)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry.max_retries,
            initial_delay_ms: self.retry.initial_delay_ms,
            max_delay_ms: self.retry.max_delay_ms,
            multiplier: self.retry.multiplier,
            enabled: self.retry.enabled,
        }
    }

    /// Builds a [`CircuitBreaker`] for this config's endpoint, or `None`
    /// when `circuit_breaker.enabled` is false — the default. Used by
    /// [`crate::client::Client::call_resilient`] to guard the verb dispatch
    /// path this config section otherwise has no call site for.
    pub fn circuit_breaker(&self) -> Option<CircuitBreaker> {
        if !self.circuit_breaker.enabled {
            return None;
        }
        Some(CircuitBreaker::new(
            self.endpoint().unwrap_or("unconfigured").to_string(),
            self.circuit_breaker.failure_threshold,
            self.circuit_breaker.reset_timeout_ms,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_endpoints_and_full_parse_depth() {
        let cfg = ClientConfig::default();
        assert!(cfg.endpoint().is_none());
        assert_eq!(cfg.parsing.depth, ParseDepth::Full);
        assert!(!cfg.retry.enabled);
        assert!(!cfg.circuit_breaker.enabled);
    }

    #[test]
    fn with_endpoint_caps_at_max_endpoints() {
        let mut cfg = ClientConfig::default();
        for i in 0..(MAX_ENDPOINTS + 5) {
            cfg = cfg.with_endpoint(format!("http://host{i}:2379"));
        }
        assert_eq!(cfg.connection.endpoints.len(), MAX_ENDPOINTS);
        assert_eq!(cfg.endpoint(), Some("http://host0:2379"));
    }

    #[test]
    fn toml_round_trip() {
        let cfg = ClientConfig::default().with_endpoint("http://127.0.0.1:2379");
        let text = toml::to_string(&cfg).expect("serialize");
        let parsed: ClientConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(parsed.endpoint(), cfg.endpoint());
    }
}
