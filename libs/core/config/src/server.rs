use crate::{env_or_default, env_parse_or_default, ConfigError, FromEnv};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Server configuration for HTTP APIs
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for a single request, including outbound provider calls.
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            ..Self::default()
        }
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address().parse().map_err(|e| ConfigError::ParseError {
            key: "HOST".to_string(),
            details: format!("{}", e),
        })
    }
}

impl FromEnv for ServerConfig {
    /// - HOST: defaults to 0.0.0.0
    /// - PORT: defaults to 8080
    /// - REQUEST_TIMEOUT_SECS: defaults to 30
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = env_parse_or_default("PORT", 8080u16)?;
        let timeout_secs = env_parse_or_default("REQUEST_TIMEOUT_SECS", 30u64)?;

        Ok(Self {
            host,
            port,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED.to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}
