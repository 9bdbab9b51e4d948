/// Connection abstraction over the transport codec, plus its TCP implementation
///
/// The failover engine and the command façade only see the [`Connector`] and
/// [`Connection`] traits; [`TcpConnector`] speaks RESP over a tokio
/// `TcpStream`.
use async_trait::async_trait;
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::Endpoint;
use crate::error::{ConnectFailure, ResilisError, ResilisResult};
use crate::protocol::resp::{RespEncoder, RespParser};
use crate::protocol::{Command, Reply};

const READ_CHUNK: usize = 8192;

/// One open connection to a server
#[async_trait]
pub trait Connection: Send {
    /// Write one command and wait for its reply
    async fn send_command(&mut self, command: &Command) -> ResilisResult<Reply>;

    /// Buffer one command without waiting for its reply
    fn queue_command(&mut self, command: &Command) -> ResilisResult<()>;

    /// Flush queued commands and read the reply to the oldest one
    async fn read_queued_reply(&mut self) -> ResilisResult<Reply>;

    /// Commands sent or queued whose replies have not been read.
    ///
    /// A caller dropped between writing a command and reading its reply
    /// leaves this above zero; the stale reply is still on the wire.
    fn outstanding(&self) -> usize;

    /// Bound every subsequent read and write; `None` removes the bound
    fn set_operation_timeout(&mut self, limit: Option<Duration>);

    /// Close the connection. Calling it twice is harmless.
    fn release(&mut self);
}

/// Opens connections to endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> ResilisResult<Box<dyn Connection>>;
}

/// Connector producing RESP-over-TCP connections
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> ResilisResult<Box<dyn Connection>> {
        let address = endpoint.address();
        debug!("Connecting to {}", address);

        let connecting = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let result = match endpoint.connect_timeout {
            Some(limit) => match timeout(limit, connecting).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("Timeout connecting to {}", address);
                    return Err(ResilisError::ConnectFailed {
                        endpoint: address,
                        reason: ConnectFailure::Timeout,
                    });
                }
            },
            None => connecting.await,
        };

        match result {
            Ok(stream) => {
                if let Err(e) = configure_stream(&stream) {
                    warn!("Failed to configure stream to {}: {}", address, e);
                }
                debug!("Connected to {}", address);
                Ok(Box::new(TcpConnection::new(stream)))
            }
            Err(e) => {
                let reason = match e.kind() {
                    io::ErrorKind::ConnectionRefused => ConnectFailure::Refused,
                    io::ErrorKind::TimedOut => ConnectFailure::Timeout,
                    _ => ConnectFailure::Network(e),
                };
                debug!("Connection to {} failed: {}", address, reason);
                Err(ResilisError::ConnectFailed {
                    endpoint: address,
                    reason,
                })
            }
        }
    }
}

/// Low latency for request/reply traffic, keepalive to notice dead peers
fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    socket2::SockRef::from(stream).set_keepalive(true)?;
    Ok(())
}

/// RESP connection over TCP.
///
/// Queued commands sit in `write_buf` until the next read, so a pipeline is
/// sent in a single write.
pub struct TcpConnection {
    stream: Option<TcpStream>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    parser: RespParser,
    outstanding: usize,
    operation_timeout: Option<Duration>,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            parser: RespParser::new(),
            outstanding: 0,
            operation_timeout: None,
        }
    }

    async fn flush(&mut self) -> ResilisResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }

        let stream = self.stream.as_mut().ok_or(ResilisError::NotConnected)?;
        with_deadline(
            self.operation_timeout,
            "write command",
            stream.write_all(&self.write_buf),
        )
        .await?;
        self.write_buf.clear();
        Ok(())
    }
}

async fn with_deadline<T, F>(limit: Option<Duration>, operation: &str, io: F) -> ResilisResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match timeout(limit, io).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ResilisError::timeout(operation)),
        },
        None => Ok(io.await?),
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send_command(&mut self, command: &Command) -> ResilisResult<Reply> {
        self.queue_command(command)?;
        self.read_queued_reply().await
    }

    fn queue_command(&mut self, command: &Command) -> ResilisResult<()> {
        if self.stream.is_none() {
            return Err(ResilisError::NotConnected);
        }
        RespEncoder::encode_into(&mut self.write_buf, command);
        self.outstanding += 1;
        Ok(())
    }

    async fn read_queued_reply(&mut self) -> ResilisResult<Reply> {
        self.flush().await?;

        loop {
            if let Some(reply) = self.parser.parse(&mut self.read_buf)? {
                self.outstanding = self.outstanding.saturating_sub(1);
                return Ok(reply);
            }

            let stream = self.stream.as_mut().ok_or(ResilisError::NotConnected)?;
            self.read_buf.reserve(READ_CHUNK);
            let n = with_deadline(
                self.operation_timeout,
                "read reply",
                stream.read_buf(&mut self.read_buf),
            )
            .await?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )
                .into());
            }
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding
    }

    fn set_operation_timeout(&mut self, limit: Option<Duration>) {
        self.operation_timeout = limit;
    }

    fn release(&mut self) {
        self.stream = None;
        self.read_buf.clear();
        self.write_buf.clear();
        self.parser.reset();
        self.outstanding = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::net::TcpListener;

    /// Accepts one client, waits for `expect_bytes` bytes of request, then
    /// writes `response` in two halves.
    async fn fake_server(expect_bytes: usize, response: &'static [u8]) -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut received = vec![0u8; expect_bytes];
                if stream.read_exact(&mut received).await.is_err() {
                    return;
                }
                let (head, tail) = response.split_at(response.len() / 2);
                let _ = stream.write_all(head).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
                let _ = stream.write_all(tail).await;
                // Keep the socket open until the client is done
                let mut rest = [0u8; 64];
                let _ = stream.read(&mut rest).await;
            }
        });

        Endpoint::new("127.0.0.1", addr.port())
    }

    #[tokio::test]
    async fn test_send_command() {
        let ping = RespEncoder::encode(&Command::new("PING"));
        let endpoint = fake_server(ping.len(), b"+PONG\r\n").await;

        let mut connection = TcpConnector.connect(&endpoint).await.unwrap();
        let reply = connection.send_command(&Command::new("PING")).await.unwrap();
        assert_eq!(reply, Reply::Status("PONG".to_string()));
        connection.release();
        connection.release();
    }

    #[tokio::test]
    async fn test_pipelined_replies_in_order() {
        let commands = [
            Command::new("SET").arg("foo").arg("bar"),
            Command::new("GET").arg("foo"),
            Command::new("INCR").arg("n"),
        ];
        let total: usize = commands.iter().map(|c| RespEncoder::encode(c).len()).sum();
        let endpoint = fake_server(total, b"+OK\r\n$3\r\nbar\r\n:1\r\n").await;

        let mut connection = TcpConnector.connect(&endpoint).await.unwrap();
        for command in &commands {
            connection.queue_command(command).unwrap();
        }
        assert_eq!(connection.outstanding(), 3);

        assert_eq!(
            connection.read_queued_reply().await.unwrap(),
            Reply::Status("OK".to_string())
        );
        assert_eq!(
            connection.read_queued_reply().await.unwrap(),
            Reply::String(Bytes::from("bar"))
        );
        assert_eq!(connection.read_queued_reply().await.unwrap(), Reply::Integer(1));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpConnector.connect(&Endpoint::new("127.0.0.1", port)).await;
        match result {
            Err(ResilisError::ConnectFailed { endpoint, reason }) => {
                assert_eq!(endpoint, format!("127.0.0.1:{}", port));
                assert!(matches!(reason, ConnectFailure::Refused));
            }
            Err(other) => panic!("Unexpected error: {}", other),
            Ok(_) => panic!("Expected connection failure"),
        }
    }

    #[tokio::test]
    async fn test_operation_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and never answer
            if let Ok((stream, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(stream);
            }
        });

        let mut connection = TcpConnector
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();
        connection.set_operation_timeout(Some(Duration::from_millis(50)));

        let err = connection.send_command(&Command::new("PING")).await.unwrap_err();
        assert!(matches!(err, ResilisError::Timeout { .. }));
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_server_closing_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let mut connection = TcpConnector
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();
        let err = connection.send_command(&Command::new("PING")).await.unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_abandoned_request_stays_outstanding() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut request = [0u8; 64];
                if stream.read(&mut request).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = stream.write_all(b"$4\r\nSLOW\r\n").await;
                let _ = stream.read(&mut request).await;
            }
        });

        let mut connection = TcpConnector
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();
        let get = Command::new("GET").arg("slow");
        let abandoned = timeout(Duration::from_millis(50), connection.send_command(&get)).await;
        assert!(abandoned.is_err());
        assert_eq!(connection.outstanding(), 1);

        // The late reply belongs to the abandoned request
        let reply = connection.read_queued_reply().await.unwrap();
        assert_eq!(reply, Reply::String(Bytes::from("SLOW")));
        assert_eq!(connection.outstanding(), 0);

        connection.release();
        assert_eq!(connection.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_released_connection_rejects_commands() {
        let ping = RespEncoder::encode(&Command::new("PING"));
        let endpoint = fake_server(ping.len(), b"+PONG\r\n").await;

        let mut connection = TcpConnector.connect(&endpoint).await.unwrap();
        connection.release();
        assert!(matches!(
            connection.queue_command(&Command::new("PING")),
            Err(ResilisError::NotConnected)
        ));
    }
}
