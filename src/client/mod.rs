/// Client handle: the command façade over a failover-aware connection
///
/// Every public operation takes the handle's lock once and holds it until it
/// returns; [`Client::lock`] holds it across several operations. Internal
/// helpers work on the already locked [`ClientState`], so nothing ever locks
/// twice.
pub mod failover;
pub mod pipeline;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::core::connection::{Connector, TcpConnector};
use crate::core::registry::{EndpointRegistry, DEFAULT_CAPACITY};
use crate::core::session::Session;
use crate::core::Endpoint;
use crate::error::{ResilisError, ResilisResult};
use crate::protocol::{Command, Reply};
use crate::topology::ServerVersion;

/// Client construction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Number of endpoint slots
    #[serde(default = "default_max_endpoints")]
    pub max_endpoints: usize,
    /// Sent with AUTH on every new connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_max_endpoints() -> usize {
    DEFAULT_CAPACITY
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_endpoints: DEFAULT_CAPACITY,
            password: None,
        }
    }
}

/// Everything the lock protects
pub(crate) struct ClientState {
    pub(crate) registry: EndpointRegistry,
    pub(crate) session: Option<Session>,
    /// Commands queued by `append` whose replies were not read yet
    pub(crate) pending: usize,
    pub(crate) password: Option<String>,
    pub(crate) connector: Arc<dyn Connector>,
    /// Slot of the last established session, charged a failure when abandoned
    pub(crate) connected: Option<usize>,
}

impl ClientState {
    fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry: EndpointRegistry::new(config.max_endpoints),
            session: None,
            pending: 0,
            password: config.password,
            connector,
            connected: None,
        }
    }

    /// Close the live connection. Queued replies are lost with it.
    pub(crate) fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if self.pending != 0 {
            debug!("Discarding {} pending pipelined command(s)", self.pending);
            self.pending = 0;
        }
    }

    pub(crate) fn install(&mut self, session: Session) {
        let index = session.endpoint_index();
        match session.version() {
            Some(version) => info!("Connected to {} (version {})", session.address(), version),
            None => info!("Connected to {}", session.address()),
        }
        self.registry.set_current(index);
        self.connected = Some(index);
        self.session = Some(session);
    }

    /// Drop a session whose unread replies do not match `pending`. A caller
    /// cancelled mid-request leaves its reply on the wire, and the next
    /// reader would take it for its own.
    pub(crate) fn check_in_sync(&mut self) -> ResilisResult<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let unread = session.outstanding();
        let expected = self.pending;
        if unread == expected {
            return Ok(());
        }

        warn!(
            "{} has {} unread reply(ies) where {} were expected, dropping the connection",
            session.address(),
            unread,
            expected
        );
        self.drop_session();
        Err(ResilisError::StaleReplies { unread, expected })
    }

    /// Send without any reconnect. A broken connection is dropped.
    pub(crate) async fn send(&mut self, command: &Command) -> ResilisResult<Reply> {
        if self.pending > 0 {
            return Err(ResilisError::PipelineInProgress {
                pending: self.pending,
            });
        }
        self.check_in_sync()?;
        let session = self.session.as_mut().ok_or(ResilisError::NotConnected)?;

        match session.send(command).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e.is_connection_loss() {
                    debug!("Connection to {} lost: {}", session.address(), e);
                    self.drop_session();
                }
                Err(e)
            }
        }
    }

    /// Send, reconnecting first when needed and failing over after a
    /// transport error or a read-only rejection.
    pub(crate) async fn command(&mut self, command: &Command) -> ResilisResult<Reply> {
        if self.pending > 0 {
            return Err(ResilisError::PipelineInProgress {
                pending: self.pending,
            });
        }

        if let Err(e) = self.check_in_sync() {
            debug!("{}, reconnecting", e);
        }
        if self.session.is_none() {
            if let Err(e) = failover::reopen(self).await {
                e.trace("Re-connection failed");
                return Err(e);
            }
            debug!("Re-connected");
        }

        match self.send(command).await {
            Ok(reply) => {
                if let Reply::Error(message) = &reply {
                    debug!("Server error for {}: {}", command.name(), message);
                    if reply.is_readonly_error() {
                        if let Some(session) = &self.session {
                            warn!(
                                "{} refused a write, disconnecting from a likely replica",
                                session.address()
                            );
                        }
                        self.recover("Failover after read-only error").await;
                    }
                }
                Ok(reply)
            }
            Err(e) => {
                if e.is_connection_loss() {
                    self.recover("Failover after transport error").await;
                }
                Err(e)
            }
        }
    }

    /// Best-effort failover whose outcome the caller does not see
    pub(crate) async fn recover(&mut self, context: &str) {
        match failover::reopen(self).await {
            Ok(()) => debug!("Re-connected"),
            Err(e) => e.trace(context),
        }
    }

    fn remove_endpoint(&mut self, index: usize) -> ResilisResult<Endpoint> {
        let endpoint = self.registry.remove(index)?;
        if self.session.as_ref().map(Session::endpoint_index) == Some(index) {
            debug!("Removed endpoint {} was in use, disconnecting", endpoint);
            self.drop_session();
        }
        if self.connected == Some(index) {
            self.connected = None;
        }
        Ok(endpoint)
    }

    fn shutdown(&mut self) {
        self.drop_session();
        self.registry.clear();
        self.connected = None;
    }
}

/// A handle that keeps one connection to the current master of a
/// replicated deployment.
///
/// The handle is cheap to share behind an `Arc`; concurrent callers are
/// served one at a time. A caller building a pipeline or transaction while
/// others share the handle should hold a [`ClientGuard`] for the whole batch.
pub struct Client {
    state: Mutex<ClientState>,
}

/// Exclusive use of a [`Client`] across several calls.
///
/// Other callers wait until the guard is dropped, so appended commands and
/// the `exec` that collects their replies cannot interleave with theirs.
pub struct ClientGuard<'a> {
    state: MutexGuard<'a, ClientState>,
}

impl ClientGuard<'_> {
    /// See [`Client::command`]
    pub async fn command(&mut self, command: Command) -> ResilisResult<Reply> {
        self.state.command(&command).await
    }

    /// See [`Client::fast_command`]
    pub async fn fast_command(&mut self, command: Command) -> ResilisResult<Reply> {
        self.state.send(&command).await
    }

    pub async fn append(&mut self, command: Command) -> ResilisResult<()> {
        self.state.append(&command).await
    }

    pub async fn exec(&mut self) -> ResilisResult<Option<Reply>> {
        self.state.exec().await
    }

    pub async fn multi(&mut self) -> ResilisResult<()> {
        self.append(Command::new("MULTI")).await
    }

    pub async fn multi_exec(&mut self) -> ResilisResult<()> {
        self.append(Command::new("EXEC")).await
    }

    pub fn pending_count(&self) -> usize {
        self.state.pending
    }
}

impl Client {
    /// Client speaking RESP over TCP
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Client using a custom transport
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            state: Mutex::new(ClientState::new(config, connector)),
        }
    }

    /// Client with default settings and a single endpoint. Does not connect;
    /// the first command does.
    pub fn open(
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        operation_timeout: Option<Duration>,
    ) -> ResilisResult<Self> {
        let mut client = Self::new(ClientConfig::default());
        client.register(Endpoint::new(host, port).with_timeouts(connect_timeout, operation_timeout))?;
        Ok(client)
    }

    /// Register an endpoint on a handle nobody else holds yet
    pub fn register(&mut self, endpoint: Endpoint) -> ResilisResult<usize> {
        self.state.get_mut().registry.add(endpoint)
    }

    /// Register a candidate endpoint, returning its slot
    pub async fn add_endpoint(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        operation_timeout: Option<Duration>,
    ) -> ResilisResult<usize> {
        let endpoint = Endpoint::new(host, port).with_timeouts(connect_timeout, operation_timeout);
        self.state.lock().await.registry.add(endpoint)
    }

    /// Unregister the endpoint at `index`, disconnecting if it is in use
    pub async fn remove_endpoint(&self, index: usize) -> ResilisResult<Endpoint> {
        self.state.lock().await.remove_endpoint(index)
    }

    /// Password for connections opened from now on
    pub async fn set_password(&self, password: Option<String>) {
        self.state.lock().await.password = password;
    }

    /// Drop the current connection and fail over to a working master
    pub async fn reopen(&self) -> ResilisResult<()> {
        failover::reopen(&mut *self.state.lock().await).await
    }

    /// Hold the handle until the returned guard is dropped
    pub async fn lock(&self) -> ClientGuard<'_> {
        ClientGuard {
            state: self.state.lock().await,
        }
    }

    /// Run a command, connecting and failing over as needed.
    ///
    /// Error replies from the server are returned as `Ok(Reply::Error(..))`.
    /// A reply starting with `READONLY` additionally moves the handle to the
    /// current master before returning.
    pub async fn command(&self, command: Command) -> ResilisResult<Reply> {
        self.lock().await.command(command).await
    }

    /// Run a command on the current connection only, never reconnecting
    pub async fn fast_command(&self, command: Command) -> ResilisResult<Reply> {
        self.lock().await.fast_command(command).await
    }

    /// Queue a command; its reply is collected by [`Client::exec`]
    pub async fn append(&self, command: Command) -> ResilisResult<()> {
        self.lock().await.append(command).await
    }

    /// Read the replies of every queued command, in order
    pub async fn exec(&self) -> ResilisResult<Option<Reply>> {
        self.lock().await.exec().await
    }

    /// Queue `MULTI`
    pub async fn multi(&self) -> ResilisResult<()> {
        self.lock().await.multi().await
    }

    /// Queue `EXEC`; the results land in the last element of the
    /// [`Client::exec`] reply
    pub async fn multi_exec(&self) -> ResilisResult<()> {
        self.lock().await.multi_exec().await
    }

    /// Disconnect and forget every endpoint. The handle stays usable.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutdown();
    }

    /// Disconnect and dispose of the handle
    pub fn close(self) {
        self.state.into_inner().shutdown();
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    /// Endpoint of the live connection
    pub async fn current_endpoint(&self) -> Option<Endpoint> {
        let state = self.state.lock().await;
        let index = state.session.as_ref()?.endpoint_index();
        state.registry.get(index).cloned()
    }

    /// Registered endpoints with their slots, in slot order
    pub async fn endpoints(&self) -> Vec<(usize, Endpoint)> {
        let state = self.state.lock().await;
        state
            .registry
            .iter()
            .map(|(index, endpoint)| (index, endpoint.clone()))
            .collect()
    }

    /// Version of the server behind the live connection
    pub async fn server_version(&self) -> Option<ServerVersion> {
        self.state.lock().await.session.as_ref()?.version()
    }
}
