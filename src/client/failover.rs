/// Reconnection and master failover
///
/// One pass walks the registry round-robin starting after the current slot.
/// Each candidate is connected, authenticated and version-checked, then asked
/// about its role. A replica hands us its master, which is connected
/// directly; if that fails the whole pass fails.
use std::fmt;
use tracing::{debug, error, info, warn};

use super::ClientState;
use crate::core::connection::Connector;
use crate::core::session::Session;
use crate::core::Endpoint;
use crate::error::{ResilisError, ResilisResult};
use crate::protocol::{Command, Reply};
use crate::topology;

/// Where a reconnect attempt currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    Disconnected,
    Connecting,
    Authenticating,
    VersionCheck,
    TopologyCheck,
    Connected,
    Exhausted,
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailoverState::Disconnected => "disconnected",
            FailoverState::Connecting => "connecting",
            FailoverState::Authenticating => "authenticating",
            FailoverState::VersionCheck => "version-check",
            FailoverState::TopologyCheck => "topology-check",
            FailoverState::Connected => "connected",
            FailoverState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// Tracks the state of one candidate and logs every transition
struct Attempt<'a> {
    endpoint: &'a Endpoint,
    state: FailoverState,
}

impl<'a> Attempt<'a> {
    fn new(endpoint: &'a Endpoint) -> Self {
        Self {
            endpoint,
            state: FailoverState::Disconnected,
        }
    }

    fn enter(&mut self, next: FailoverState) {
        debug!("{}: {} -> {}", self.endpoint, self.state, next);
        self.state = next;
    }
}

/// Drop the current session and connect to a working master.
pub(crate) async fn reopen(state: &mut ClientState) -> ResilisResult<()> {
    state.drop_session();
    if let Some(abandoned) = state.connected.take() {
        state.registry.record_failure(abandoned);
    }

    let mut attempted = 0;
    for _ in 0..state.registry.capacity() {
        let Some(index) = state.registry.advance() else {
            continue;
        };
        let Some(endpoint) = state.registry.get(index).cloned() else {
            continue;
        };
        attempted += 1;

        let mut attempt = Attempt::new(&endpoint);
        let mut session = match establish(
            state.connector.as_ref(),
            state.password.as_deref(),
            index,
            &endpoint,
            &mut attempt,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                state.registry.record_failure(index);
                attempt.enter(FailoverState::Disconnected);
                debug!("Skipping {}: {}", endpoint, e);
                continue;
            }
        };
        state.registry.record_success(index);

        attempt.enter(FailoverState::TopologyCheck);
        let master_index =
            match topology::discover_master(&mut session, &mut state.registry).await {
                Ok(None) => {
                    attempt.enter(FailoverState::Connected);
                    state.install(session);
                    return Ok(());
                }
                Ok(Some(master_index)) => master_index,
                Err(e) => {
                    state.registry.record_failure(index);
                    attempt.enter(FailoverState::Disconnected);
                    debug!("Cannot determine the role of {}: {}", endpoint, e);
                    continue;
                }
            };
        session.close();

        let Some(master) = state.registry.get(master_index).cloned() else {
            return Err(ResilisError::EndpointNotFound {
                index: master_index,
            });
        };
        info!("{} is a replica, switching to master {}", endpoint, master);

        let mut attempt = Attempt::new(&master);
        match establish(
            state.connector.as_ref(),
            state.password.as_deref(),
            master_index,
            &master,
            &mut attempt,
        )
        .await
        {
            Ok(session) => {
                state.registry.record_success(master_index);
                state.registry.set_current(master_index);
                attempt.enter(FailoverState::Connected);
                state.install(session);
                return Ok(());
            }
            Err(e) => {
                state.registry.record_failure(master_index);
                attempt.enter(FailoverState::Exhausted);
                error!("Cannot connect to master {}: {}", master, e);
                return Err(ResilisError::MasterUnreachable {
                    endpoint: master.to_string(),
                });
            }
        }
    }

    warn!(
        "Tried {} registered endpoint(s), none is a usable master",
        attempted
    );
    Err(ResilisError::FailoverExhausted { attempted })
}

/// Connect, authenticate when a password is set, and learn the version
async fn establish(
    connector: &dyn Connector,
    password: Option<&str>,
    index: usize,
    endpoint: &Endpoint,
    attempt: &mut Attempt<'_>,
) -> ResilisResult<Session> {
    attempt.enter(FailoverState::Connecting);
    let mut session = Session::open(connector, index, endpoint).await?;

    if let Some(password) = password {
        attempt.enter(FailoverState::Authenticating);
        authenticate(&mut session, password).await?;
    }

    attempt.enter(FailoverState::VersionCheck);
    let version = topology::query_version(&mut session).await?;
    session.set_version(version);
    Ok(session)
}

async fn authenticate(session: &mut Session, password: &str) -> ResilisResult<()> {
    let reply = session.send(&Command::new("AUTH").arg(password)).await?;
    match reply {
        Reply::Status(_) => Ok(()),
        Reply::Error(message) => Err(ResilisError::AuthFailed {
            endpoint: session.address().to_string(),
            message,
        }),
        other => Err(ResilisError::AuthFailed {
            endpoint: session.address().to_string(),
            message: format!("unexpected {} reply", other.type_name()),
        }),
    }
}
