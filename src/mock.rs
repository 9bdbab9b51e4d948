/// In-memory server fleet used by unit tests
///
/// Each [`MockNode`] answers the handful of commands the client relies on
/// (AUTH, PING, INFO, CONFIG GET slaveof, MULTI/EXEC) plus a tiny key-value
/// store. Nodes can be taken down, demoted or promoted while a test runs.
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::connection::{Connection, Connector};
use crate::core::Endpoint;
use crate::error::{ConnectFailure, ResilisError, ResilisResult};
use crate::protocol::{Command, Reply};

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeRole {
    Master,
    Replica { host: String, port: u16 },
}

pub struct MockNode {
    version: String,
    password: Option<String>,
    role: Mutex<NodeRole>,
    reachable: AtomicBool,
    store: Mutex<HashMap<Bytes, Bytes>>,
    fail_read: Mutex<Option<usize>>,
    slaveof_reply: Mutex<Option<Reply>>,
    info_reply: Mutex<Option<Reply>>,
    operation_timeout: Mutex<Option<Duration>>,
    latency: Mutex<Duration>,
    connects: AtomicUsize,
    releases: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl MockNode {
    fn with_role(version: &str, role: NodeRole) -> Self {
        Self {
            version: version.to_string(),
            password: None,
            role: Mutex::new(role),
            reachable: AtomicBool::new(true),
            store: Mutex::new(HashMap::new()),
            fail_read: Mutex::new(None),
            slaveof_reply: Mutex::new(None),
            info_reply: Mutex::new(None),
            operation_timeout: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            connects: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn master(version: &str) -> Self {
        Self::with_role(version, NodeRole::Master)
    }

    pub fn replica(version: &str, master_host: &str, master_port: u16) -> Self {
        Self::with_role(
            version,
            NodeRole::Replica {
                host: master_host.to_string(),
                port: master_port,
            },
        )
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Refuse new connections and break open ones
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn promote(&self) {
        *self.role.lock().unwrap() = NodeRole::Master;
    }

    pub fn demote(&self, master_host: &str, master_port: u16) {
        *self.role.lock().unwrap() = NodeRole::Replica {
            host: master_host.to_string(),
            port: master_port,
        };
    }

    /// Break the connection on the `nth` queued read (1-based), once
    pub fn fail_read(&self, nth: usize) {
        *self.fail_read.lock().unwrap() = Some(nth);
    }

    /// Answer `CONFIG GET slaveof` with a canned reply
    pub fn set_slaveof_reply(&self, reply: Reply) {
        *self.slaveof_reply.lock().unwrap() = Some(reply);
    }

    /// Answer `INFO` with a canned reply
    pub fn set_info_reply(&self, reply: Reply) {
        *self.info_reply.lock().unwrap() = Some(reply);
    }

    /// Delay every reply by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        *self.operation_timeout.lock().unwrap()
    }

    /// Every command this node executed, rendered with `Display`
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.store.lock().unwrap().get(key.as_bytes()).cloned()
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn info_body(&self) -> String {
        let mut body = format!(
            "# Server\r\nredis_version:{}\r\nredis_mode:standalone\r\n\r\n# Replication\r\n",
            self.version
        );
        match &*self.role.lock().unwrap() {
            NodeRole::Master => body.push_str("role:master\r\nconnected_slaves:0\r\n"),
            NodeRole::Replica { host, port } => body.push_str(&format!(
                "role:slave\r\nmaster_host:{}\r\nmaster_port:{}\r\nmaster_link_status:up\r\n",
                host, port
            )),
        }
        body
    }

    fn slaveof_value(&self) -> String {
        match &*self.role.lock().unwrap() {
            NodeRole::Master => String::new(),
            NodeRole::Replica { host, port } => format!("{} {}", host, port),
        }
    }

    fn is_replica(&self) -> bool {
        !matches!(*self.role.lock().unwrap(), NodeRole::Master)
    }

    /// Execute one command outside of any transaction
    fn apply(&self, command: &Command) -> Reply {
        let args = &command.args()[1..];
        let name = command.name().to_ascii_uppercase();

        match (name.as_str(), args) {
            ("PING", _) => Reply::Status("PONG".to_string()),
            ("ECHO", [message]) => Reply::String(message.clone()),
            ("INFO", _) => match &*self.info_reply.lock().unwrap() {
                Some(reply) => reply.clone(),
                None => Reply::String(Bytes::from(self.info_body())),
            },
            ("CONFIG", [sub, parameter])
                if sub.eq_ignore_ascii_case(b"GET")
                    && parameter.eq_ignore_ascii_case(b"slaveof") =>
            {
                match &*self.slaveof_reply.lock().unwrap() {
                    Some(reply) => reply.clone(),
                    None => Reply::Array(vec![
                        Reply::String(Bytes::from("slaveof")),
                        Reply::String(Bytes::from(self.slaveof_value())),
                    ]),
                }
            }
            ("GET", [key]) => match self.store.lock().unwrap().get(key) {
                Some(value) => Reply::String(value.clone()),
                None => Reply::Nil,
            },
            ("SET", _) | ("INCR", _) | ("DEL", _) if self.is_replica() => Reply::Error(
                "READONLY You can't write against a read only slave.".to_string(),
            ),
            ("SET", [key, value]) => {
                self.store.lock().unwrap().insert(key.clone(), value.clone());
                Reply::Status("OK".to_string())
            }
            ("INCR", [key]) => {
                let mut store = self.store.lock().unwrap();
                let current = store
                    .get(key)
                    .map(|v| String::from_utf8_lossy(v).parse::<i64>());
                match current {
                    Some(Err(_)) => Reply::Error(
                        "ERR value is not an integer or out of range".to_string(),
                    ),
                    Some(Ok(n)) => {
                        store.insert(key.clone(), Bytes::from((n + 1).to_string()));
                        Reply::Integer(n + 1)
                    }
                    None => {
                        store.insert(key.clone(), Bytes::from("1"));
                        Reply::Integer(1)
                    }
                }
            }
            ("DEL", keys) => {
                let mut store = self.store.lock().unwrap();
                let removed = keys.iter().filter(|k| store.remove(*k).is_some()).count();
                Reply::Integer(removed as i64)
            }
            _ => Reply::Error(format!("ERR unknown command '{}'", name)),
        }
    }
}

/// Connector resolving endpoints to registered mock nodes
#[derive(Default)]
pub struct MockConnector {
    nodes: Mutex<HashMap<String, Arc<MockNode>>>,
    attempts: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, host: &str, port: u16, node: MockNode) -> Arc<MockNode> {
        let node = Arc::new(node);
        self.nodes
            .lock()
            .unwrap()
            .insert(format!("{}:{}", host, port), node.clone());
        node
    }

    /// Addresses of every connect attempt, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn clear_attempts(&self) {
        self.attempts.lock().unwrap().clear();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> ResilisResult<Box<dyn Connection>> {
        let address = endpoint.address();
        self.attempts.lock().unwrap().push(address.clone());

        let node = self.nodes.lock().unwrap().get(&address).cloned();
        match node {
            Some(node) if node.is_reachable() => {
                node.connects.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockConnection::new(node)))
            }
            _ => Err(ResilisError::ConnectFailed {
                endpoint: address,
                reason: ConnectFailure::Refused,
            }),
        }
    }
}

struct MockConnection {
    node: Arc<MockNode>,
    queued: VecDeque<Command>,
    transaction: Option<Vec<Command>>,
    authenticated: bool,
    reads: usize,
    released: bool,
}

impl MockConnection {
    fn new(node: Arc<MockNode>) -> Self {
        Self {
            node,
            queued: VecDeque::new(),
            transaction: None,
            authenticated: false,
            reads: 0,
            released: false,
        }
    }

    fn check_link(&self) -> ResilisResult<()> {
        if self.released {
            return Err(ResilisError::NotConnected);
        }
        if !self.node.is_reachable() {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into());
        }
        Ok(())
    }

    fn pop_queued(&mut self) -> ResilisResult<Command> {
        self.queued.pop_front().ok_or_else(|| {
            ResilisError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "no reply pending"))
        })
    }

    fn execute(&mut self, command: &Command) -> Reply {
        self.node.commands.lock().unwrap().push(command.to_string());
        let args = &command.args()[1..];

        if command.is("AUTH") {
            return match (&self.node.password, args) {
                (None, _) => {
                    Reply::Error("ERR Client sent AUTH, but no password is set".to_string())
                }
                (Some(expected), [given]) if given.as_ref() == expected.as_bytes() => {
                    self.authenticated = true;
                    Reply::Status("OK".to_string())
                }
                _ => Reply::Error("ERR invalid password".to_string()),
            };
        }
        if self.node.password.is_some() && !self.authenticated {
            return Reply::Error("NOAUTH Authentication required.".to_string());
        }

        if command.is("MULTI") {
            if self.transaction.is_some() {
                return Reply::Error("ERR MULTI calls can not be nested".to_string());
            }
            self.transaction = Some(Vec::new());
            return Reply::Status("OK".to_string());
        }
        if command.is("EXEC") {
            return match self.transaction.take() {
                Some(queued) => Reply::Array(queued.iter().map(|c| self.node.apply(c)).collect()),
                None => Reply::Error("ERR EXEC without MULTI".to_string()),
            };
        }
        if let Some(queued) = self.transaction.as_mut() {
            queued.push(command.clone());
            return Reply::Status("QUEUED".to_string());
        }

        self.node.apply(command)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn send_command(&mut self, command: &Command) -> ResilisResult<Reply> {
        self.check_link()?;
        // The request is on the wire; the reply to the oldest one comes back
        self.queued.push_back(command.clone());
        self.node.delay().await;
        let oldest = self.pop_queued()?;
        Ok(self.execute(&oldest))
    }

    fn queue_command(&mut self, command: &Command) -> ResilisResult<()> {
        if self.released {
            return Err(ResilisError::NotConnected);
        }
        self.queued.push_back(command.clone());
        Ok(())
    }

    async fn read_queued_reply(&mut self) -> ResilisResult<Reply> {
        self.check_link()?;
        self.node.delay().await;
        let command = self.pop_queued()?;

        self.reads += 1;
        {
            let mut fail_read = self.node.fail_read.lock().unwrap();
            if *fail_read == Some(self.reads) {
                *fail_read = None;
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into());
            }
        }

        Ok(self.execute(&command))
    }

    fn outstanding(&self) -> usize {
        self.queued.len()
    }

    fn set_operation_timeout(&mut self, limit: Option<Duration>) {
        *self.node.operation_timeout.lock().unwrap() = limit;
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.queued.clear();
            self.node.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}
