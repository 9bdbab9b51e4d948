/// resilis - a failover-aware client layer for replicated Redis deployments
///
/// A [`Client`] keeps one connection to whichever registered endpoint is the
/// current master. It reconnects round-robin when the connection breaks,
/// follows replicas to their master (via `INFO` on 2.4 servers and
/// `CONFIG GET slaveof` on 2.6 and later), moves away from a node that starts
/// answering writes with `READONLY`, and supports pipelining and `MULTI`/`EXEC`
/// transactions on top of that connection.
pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod topology;
pub mod utils;

#[cfg(test)]
mod mock;

pub use client::{Client, ClientConfig, ClientGuard};
pub use crate::core::connection::{Connection, Connector, TcpConnector};
pub use crate::core::Endpoint;
pub use error::{ResilisError, ResilisResult};
pub use protocol::{Command, Reply};
pub use topology::ServerVersion;
