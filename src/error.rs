/// Unified error handling for resilis
///
/// This module provides the error type shared by the endpoint registry, the
/// transport session, topology discovery, the failover engine and the
/// command façade.
use std::fmt;
use std::io;
use thiserror::Error;

use crate::protocol::resp::RespParseError;

/// Main error type for resilis operations
#[derive(Debug, Error)]
pub enum ResilisError {
    /// Every endpoint slot is occupied
    #[error("Endpoint registry is full (capacity {capacity})")]
    CapacityExhausted { capacity: usize },

    /// No endpoint registered at the given slot
    #[error("No endpoint registered at slot {index}")]
    EndpointNotFound { index: usize },

    /// A single endpoint could not be connected
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectFailed {
        endpoint: String,
        reason: ConnectFailure,
    },

    /// AUTH was rejected or answered with something other than a status
    #[error("Authentication against {endpoint} failed: {message}")]
    AuthFailed { endpoint: String, message: String },

    /// INFO did not carry a usable redis_version field
    #[error("Cannot parse server version: {message}")]
    VersionParseFailed { message: String },

    /// Server is older than the oldest discovery strategy supports
    #[error("Unsupported server version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    /// Topology discovery got a reply of an unexpected shape
    #[error("Malformed discovery reply: {message}")]
    DiscoveryMalformed { message: String },

    /// A full pass over the registry produced no working master
    #[error("Failover exhausted after trying {attempted} endpoint(s)")]
    FailoverExhausted { attempted: usize },

    /// Discovery named a master that could not be reached
    #[error("Discovered master {endpoint} is unreachable")]
    MasterUnreachable { endpoint: String },

    /// No live connection and the caller asked not to reconnect
    #[error("Not connected")]
    NotConnected,

    /// A command line could not be turned into a command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A non-pipelined command was issued while replies are still queued
    #[error("{pending} pipelined command(s) pending, call exec first")]
    PipelineInProgress { pending: usize },

    /// Replies on the wire did not match the requests still waiting for
    /// them, typically after a caller was cancelled mid-request
    #[error("Connection dropped with {unread} unread reply(ies), expected {expected}")]
    StaleReplies { unread: usize, expected: usize },

    /// I/O failure on the live connection
    #[error("Transport error: {0}")]
    TransportIo(#[from] io::Error),

    /// The server sent bytes that are not valid RESP
    #[error("Protocol error: {0}")]
    Protocol(#[from] RespParseError),

    /// An operation exceeded its timeout
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Integer coercion on a reply of an incompatible type
    #[error("Expected {expected}, found {found}")]
    ReplyTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Integer coercion on a string that is not a number
    #[error("Invalid numeric value: {value:?}")]
    NumericParseFailed { value: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Why a connection attempt failed
#[derive(Debug, Error)]
pub enum ConnectFailure {
    #[error("connection refused")]
    Refused,

    #[error("connect timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for resilis operations
pub type ResilisResult<T> = Result<T, ResilisError>;

impl ResilisError {
    /// Create a discovery error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        ResilisError::DiscoveryMalformed {
            message: message.into(),
        }
    }

    /// Create a version parse error
    pub fn version<S: Into<String>>(message: S) -> Self {
        ResilisError::VersionParseFailed {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        ResilisError::Timeout {
            operation: operation.into(),
        }
    }

    /// Whether the connection this error came from must be discarded
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            ResilisError::TransportIo(_)
                | ResilisError::Protocol(_)
                | ResilisError::Timeout { .. }
                | ResilisError::StaleReplies { .. }
                | ResilisError::ConnectFailed { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ResilisError::Config(_) => ErrorSeverity::Critical,
            ResilisError::FailoverExhausted { .. } => ErrorSeverity::Critical,
            ResilisError::MasterUnreachable { .. } => ErrorSeverity::Error,
            ResilisError::AuthFailed { .. } => ErrorSeverity::Error,
            ResilisError::DiscoveryMalformed { .. } => ErrorSeverity::Error,
            ResilisError::ConnectFailed { .. } => ErrorSeverity::Warning,
            ResilisError::TransportIo(_) => ErrorSeverity::Warning,
            ResilisError::Timeout { .. } => ErrorSeverity::Warning,
            ResilisError::StaleReplies { .. } => ErrorSeverity::Warning,
            ResilisError::NumericParseFailed { .. } => ErrorSeverity::Info,
            ResilisError::ReplyTypeMismatch { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    /// Emit this error through `tracing` at the level its severity calls for
    pub fn trace(&self, context: &str) {
        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => {
                tracing::error!("{}: {}", context, self)
            }
            ErrorSeverity::Warning => tracing::warn!("{}: {}", context, self),
            ErrorSeverity::Info => tracing::debug!("{}: {}", context, self),
        }
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Nothing usable is left, the caller sees the failure
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
