/// Topology resolution: is the connected node the master, and if not, who is?
pub mod info;
pub mod slaveof;

use std::fmt;
use std::str;
use tracing::debug;

use crate::core::registry::EndpointRegistry;
use crate::core::session::Session;
use crate::error::{ResilisError, ResilisResult};
use crate::protocol::{Command, Reply};

/// `major.minor` of a server, as reported by INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
}

impl ServerVersion {
    /// Oldest version whose INFO reports replication role
    pub const INFO_DISCOVERY: ServerVersion = ServerVersion::new(2, 4);
    /// Oldest version answering `CONFIG GET slaveof`
    pub const CONFIG_DISCOVERY: ServerVersion = ServerVersion::new(2, 6);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Parse a `redis_version` value such as `2.6.17`. The patch level and
    /// any suffix are ignored; a missing minor counts as zero.
    pub fn parse(text: &str) -> ResilisResult<Self> {
        let mut parts = text.trim().split('.');
        let major = parts
            .next()
            .and_then(leading_number)
            .ok_or_else(|| ResilisError::version(format!("invalid version {:?}", text)))?;
        let minor = match parts.next() {
            Some(part) => leading_number(part)
                .ok_or_else(|| ResilisError::version(format!("invalid version {:?}", text)))?,
            None => 0,
        };
        Ok(Self::new(major, minor))
    }

    pub fn at_least(&self, other: ServerVersion) -> bool {
        *self >= other
    }
}

fn leading_number(part: &str) -> Option<u16> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Replication role of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica { host: String, port: u16 },
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Replica { host, port } => write!(f, "replica of {}:{}", host, port),
        }
    }
}

/// How the role of a node is queried, chosen by server version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// `INFO`, role in the Replication section (2.4, 2.5)
    Info,
    /// `CONFIG GET slaveof` (2.6 and later)
    ConfigSlaveof,
}

impl DiscoveryStrategy {
    pub fn for_version(version: ServerVersion) -> ResilisResult<Self> {
        if version.at_least(ServerVersion::CONFIG_DISCOVERY) {
            Ok(DiscoveryStrategy::ConfigSlaveof)
        } else if version.at_least(ServerVersion::INFO_DISCOVERY) {
            Ok(DiscoveryStrategy::Info)
        } else {
            Err(ResilisError::UnsupportedVersion {
                major: version.major,
                minor: version.minor,
            })
        }
    }

    pub fn command(&self) -> Command {
        match self {
            DiscoveryStrategy::Info => Command::new("INFO"),
            DiscoveryStrategy::ConfigSlaveof => Command::new("CONFIG").arg("GET").arg("slaveof"),
        }
    }

    pub fn parse(&self, reply: &Reply) -> ResilisResult<Role> {
        match self {
            DiscoveryStrategy::Info => info::parse_replication_info(text_body(reply)?),
            DiscoveryStrategy::ConfigSlaveof => slaveof::parse_slaveof_reply(reply),
        }
    }
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryStrategy::Info => write!(f, "INFO"),
            DiscoveryStrategy::ConfigSlaveof => write!(f, "CONFIG GET slaveof"),
        }
    }
}

fn text_body(reply: &Reply) -> ResilisResult<&str> {
    match reply {
        Reply::String(bytes) => {
            str::from_utf8(bytes).map_err(|_| ResilisError::malformed("INFO is not valid UTF-8"))
        }
        Reply::Error(message) => Err(ResilisError::malformed(format!(
            "INFO failed: {}",
            message
        ))),
        other => Err(ResilisError::malformed(format!(
            "INFO returned {} reply",
            other.type_name()
        ))),
    }
}

/// Ask the node for its version through INFO
pub async fn query_version(session: &mut Session) -> ResilisResult<ServerVersion> {
    let reply = session.send(&Command::new("INFO")).await?;
    let body = match &reply {
        Reply::String(bytes) => str::from_utf8(bytes)
            .map_err(|_| ResilisError::version("INFO is not valid UTF-8"))?,
        Reply::Error(message) => {
            return Err(ResilisError::version(format!("INFO failed: {}", message)))
        }
        other => {
            return Err(ResilisError::version(format!(
                "INFO returned {} reply",
                other.type_name()
            )))
        }
    };

    let version = info::find_field(body, "redis_version")
        .ok_or_else(|| ResilisError::version("INFO has no redis_version field"))?;
    ServerVersion::parse(version)
}

/// Find out whether the session's node is the master.
///
/// Returns `None` when it is, or the registry index of the master it
/// replicates from, registering that master when it is not known yet.
/// The session's version must already be known.
pub async fn discover_master(
    session: &mut Session,
    registry: &mut EndpointRegistry,
) -> ResilisResult<Option<usize>> {
    let version = session
        .version()
        .ok_or_else(|| ResilisError::version("server version unknown"))?;
    let strategy = DiscoveryStrategy::for_version(version)?;

    debug!(
        "Checking role of {} (version {}) with {}",
        session.address(),
        version,
        strategy
    );
    let reply = session.send(&strategy.command()).await?;
    let role = strategy.parse(&reply)?;
    debug!("{} is {}", session.address(), role);

    match role {
        Role::Master => Ok(None),
        Role::Replica { host, port } => registry
            .find_or_create(&host, port, session.endpoint_index())
            .map(Some),
    }
}
