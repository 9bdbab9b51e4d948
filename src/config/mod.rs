/// Configuration management for resilis

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::client::{Client, ClientConfig};
use crate::core::Endpoint;
pub use crate::error::ConfigError;
use crate::error::ResilisResult;
use crate::utils::timeout_from_millis;

/// Main resilis configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Client handle settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Candidate servers, in registration order
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One candidate server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    /// Connect timeout in milliseconds; unbounded when absent or zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    /// Read/write timeout in milliseconds; unbounded when absent or zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_ms: Option<u64>,
}

impl EndpointConfig {
    pub fn to_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.as_str(), self.port).with_timeouts(
            self.connect_timeout_ms.and_then(timeout_from_millis),
            self.operation_timeout_ms.and_then(timeout_from_millis),
        )
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.max_endpoints == 0 {
            return Err(ConfigError::ValidationError(
                "max_endpoints must be greater than 0".to_string(),
            ));
        }

        if self.endpoints.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one endpoint is required".to_string(),
            ));
        }

        if self.endpoints.len() > self.client.max_endpoints {
            return Err(ConfigError::ValidationError(format!(
                "{} endpoints configured but max_endpoints is {}",
                self.endpoints.len(),
                self.client.max_endpoints
            )));
        }

        for endpoint in &self.endpoints {
            if endpoint.host.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "endpoint host cannot be empty".to_string(),
                ));
            }
            if endpoint.port == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid port for endpoint {}",
                    endpoint.host
                )));
            }
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Client with every configured endpoint registered, not yet connected
    pub fn build_client(&self) -> ResilisResult<Client> {
        let mut client = Client::new(self.client.clone());
        for endpoint in &self.endpoints {
            client.register(endpoint.to_endpoint())?;
        }
        Ok(client)
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, mode: &str) -> Result<(), ConfigError> {
        let endpoint = |host: &str, port| EndpointConfig {
            host: host.to_string(),
            port,
            connect_timeout_ms: Some(1050),
            operation_timeout_ms: Some(5000),
        };

        let endpoints = match mode {
            "standalone" => vec![endpoint("127.0.0.1", 6379)],
            "replicated" => vec![
                endpoint("10.0.1.20", 6379),
                endpoint("10.0.1.21", 6379),
                endpoint("10.0.1.22", 6379),
            ],
            _ => return Err(ConfigError::ValidationError(
                "Mode must be 'standalone' or 'replicated'".to_string(),
            )),
        };

        let config = Config {
            endpoints,
            ..Default::default()
        };
        config.save_to_file(path)
    }
}
