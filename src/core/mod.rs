/// Core abstractions: endpoints, the endpoint registry, connections and sessions
pub mod connection;
pub mod registry;
pub mod session;

use std::fmt;
use std::time::Duration;

/// A candidate server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// `None` connects without a deadline
    pub connect_timeout: Option<Duration>,
    /// `None` leaves reads and writes unbounded
    pub operation_timeout: Option<Duration>,
    pub success_count: u64,
    pub failure_count: u64,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: None,
            operation_timeout: None,
            success_count: 0,
            failure_count: 0,
        }
    }

    pub fn with_timeouts(
        mut self,
        connect_timeout: Option<Duration>,
        operation_timeout: Option<Duration>,
    ) -> Self {
        self.connect_timeout = connect_timeout;
        self.operation_timeout = operation_timeout;
        self
    }

    /// Whether this endpoint has the given address
    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host == host
    }

    /// `host:port`, suitable for `TcpStream::connect`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
