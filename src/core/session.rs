/// Transport session: the single live connection a client owns
use tracing::debug;

use crate::core::connection::{Connection, Connector};
use crate::core::Endpoint;
use crate::error::ResilisResult;
use crate::protocol::{Command, Reply};
use crate::topology::ServerVersion;

/// An open connection bound to one registry slot.
///
/// The server version is learned after connecting and belongs to this
/// session only; a new session always starts without one.
pub struct Session {
    connection: Box<dyn Connection>,
    endpoint_index: usize,
    address: String,
    version: Option<ServerVersion>,
    closed: bool,
}

impl Session {
    /// Connect to `endpoint` and apply its operation timeout. Never retries.
    pub async fn open(
        connector: &dyn Connector,
        endpoint_index: usize,
        endpoint: &Endpoint,
    ) -> ResilisResult<Self> {
        let mut connection = connector.connect(endpoint).await?;
        if endpoint.operation_timeout.is_some() {
            connection.set_operation_timeout(endpoint.operation_timeout);
        }

        Ok(Self {
            connection,
            endpoint_index,
            address: endpoint.address(),
            version: None,
            closed: false,
        })
    }

    /// Registry slot this session was opened against
    pub fn endpoint_index(&self) -> usize {
        self.endpoint_index
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn version(&self) -> Option<ServerVersion> {
        self.version
    }

    pub fn set_version(&mut self, version: ServerVersion) {
        self.version = Some(version);
    }

    pub async fn send(&mut self, command: &Command) -> ResilisResult<Reply> {
        self.connection.send_command(command).await
    }

    pub fn queue(&mut self, command: &Command) -> ResilisResult<()> {
        self.connection.queue_command(command)
    }

    pub async fn read_queued(&mut self) -> ResilisResult<Reply> {
        self.connection.read_queued_reply().await
    }

    /// Requests whose replies have not been read yet
    pub fn outstanding(&self) -> usize {
        self.connection.outstanding()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if !self.closed {
            debug!("Closing session to {}", self.address);
            self.connection.release();
            self.closed = true;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
