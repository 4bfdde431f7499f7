//! Connection Handler Module
//!
//! This module handles individual client connections to kvstore.
//! Each client gets its own handler task that runs in a loop,
//! reading framed commands and sending framed replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Decode frame, tokenize  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Execute command         │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send framed reply       │ │
//!    │  └───────────┬─────────────┘ │
//!    │              │               │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / framing error
//!        │
//!        ▼
//! 5. Handler task ends
//! ```
//!
//! ## Error Handling
//!
//! Anything wrong *inside* a frame (bad UTF-8, an unclosed quote, an unknown
//! command, a failed save) is answered with an `ERR ...` reply and the loop
//! keeps going. A malformed length prefix leaves no way to find the next
//! frame, so it ends the connection.

use crate::commands::CommandHandler;
use crate::protocol::{encode_frame, parse_command, parse_frame, FrameError, MAX_FRAME_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// One full frame plus room for its length prefix.
const READ_LIMIT: usize = MAX_FRAME_SIZE + 32;

/// Headroom kept free in the read buffer before each read.
const READ_CHUNK: usize = 4096;

/// Counters shared by every connection the server accepts.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Connections accepted since startup
    pub accepted: AtomicU64,
    /// Connections currently being served
    pub active: AtomicU64,
    /// Requests answered
    pub requests: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new connection. It stays active until the returned guard drops.
    fn open(self: &Arc<Self>) -> OpenConnection {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        OpenConnection(Arc::clone(self))
    }
}

/// Holds one slot of `ConnectionStats::active`.
#[derive(Debug)]
struct OpenConnection(Arc<ConnectionStats>);

impl OpenConnection {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn request_answered(&self, reply_len: usize) {
        self.0.requests.fetch_add(1, Ordering::Relaxed);
        Self::add(&self.0.bytes_out, reply_len);
    }

    fn received(&self, n: usize) {
        Self::add(&self.0.bytes_in, n);
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serves one client: splits frames off the socket, runs each request
/// through the `CommandHandler` and writes the framed reply back.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    peer: SocketAddr,
    /// Bytes read but not yet consumed as a frame
    pending: BytesMut,
    commands: CommandHandler,
    stats: OpenConnection,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            stream: BufWriter::new(stream),
            peer,
            pending: BytesMut::with_capacity(READ_CHUNK),
            commands,
            stats: stats.open(),
        }
    }

    /// Serves requests until the client hangs up.
    ///
    /// A clean close between frames is `Ok(())`. The outcome is logged here,
    /// so callers are free to ignore the returned error.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.peer, "Client connected");

        let outcome = self.serve().await;
        match &outcome {
            Ok(()) => info!(client = %self.peer, "Client disconnected"),
            Err(ConnectionError::Io(e)) if e.kind() == ErrorKind::ConnectionReset => {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Connection closed"),
        }
        outcome
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Pipelined requests are answered in order
            while let Some(payload) = self.next_frame()? {
                let reply = encode_frame(self.answer(&payload).await.as_bytes());
                self.stream.write_all(&reply).await?;
                self.stream.flush().await?;
                self.stats.request_answered(reply.len());
            }

            if !self.fill().await? {
                return Ok(());
            }
        }
    }

    /// Splits one complete frame off the front of `pending`, if there is one.
    fn next_frame(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        let Some((payload, consumed)) = parse_frame(&self.pending)? else {
            return Ok(None);
        };
        self.pending.advance(consumed);
        trace!(client = %self.peer, consumed, left = self.pending.len(), "Frame");
        Ok(Some(payload))
    }

    /// Turns one request payload into the reply text.
    async fn answer(&self, payload: &[u8]) -> String {
        let Ok(line) = std::str::from_utf8(payload) else {
            return "ERR request is not valid UTF-8".to_string();
        };

        let outcome = match parse_command(line) {
            Ok(command) => self.commands.execute(command).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        outcome.unwrap_or_else(|reply| {
            debug!(client = %self.peer, reply = %reply, "Request rejected");
            reply
        })
    }

    /// Reads more bytes into `pending`. Returns `false` once the client has
    /// closed its side with nothing half-sent.
    async fn fill(&mut self) -> Result<bool, ConnectionError> {
        if self.pending.len() >= READ_LIMIT {
            return Err(ConnectionError::Oversized(self.pending.len()));
        }
        self.pending.reserve(READ_CHUNK);

        match self.stream.get_mut().read_buf(&mut self.pending).await? {
            0 if self.pending.is_empty() => Ok(false),
            0 => Err(ConnectionError::Truncated(self.pending.len())),
            n => {
                self.stats.received(n);
                Ok(true)
            }
        }
    }
}

/// Why a connection stopped being served.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The length prefix was malformed, so later frames cannot be found
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("client closed the connection with {0} bytes of an unfinished frame")]
    Truncated(usize),

    #[error("{0} bytes buffered without a complete frame")]
    Oversized(usize),
}

/// Runs a `ConnectionHandler` to completion. Suitable for `tokio::spawn`.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    // Already logged by `run`
    let _ = ConnectionHandler::new(stream, peer, commands, stats).run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame_into;
    use crate::storage::Store;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout, Duration};

    struct TestServer {
        addr: SocketAddr,
        store: Arc<Store>,
        stats: Arc<ConnectionStats>,
    }

    impl TestServer {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let server = TestServer {
                addr: listener.local_addr().unwrap(),
                store: Arc::new(Store::new()),
                stats: Arc::new(ConnectionStats::new()),
            };

            let store = Arc::clone(&server.store);
            let stats = Arc::clone(&server.stats);
            tokio::spawn(async move {
                while let Ok((stream, peer)) = listener.accept().await {
                    let commands = CommandHandler::new(Arc::clone(&store));
                    tokio::spawn(handle_connection(stream, peer, commands, Arc::clone(&stats)));
                }
            });
            server
        }

        async fn connect(&self) -> Client {
            Client {
                stream: TcpStream::connect(self.addr).await.unwrap(),
                unread: BytesMut::new(),
            }
        }
    }

    struct Client {
        stream: TcpStream,
        unread: BytesMut,
    }

    impl Client {
        async fn send_raw(&mut self, bytes: &[u8]) {
            self.stream.write_all(bytes).await.unwrap();
        }

        /// Waits for exactly one framed reply.
        async fn reply(&mut self) -> String {
            loop {
                if let Some((payload, consumed)) = parse_frame(&self.unread[..]).unwrap() {
                    self.unread.advance(consumed);
                    return String::from_utf8(payload.to_vec()).unwrap();
                }
                let n = timeout(Duration::from_secs(2), self.stream.read_buf(&mut self.unread))
                    .await
                    .unwrap()
                    .unwrap();
                assert!(n > 0, "server closed the connection");
            }
        }

        async fn call(&mut self, line: &str) -> String {
            self.send_raw(&encode_frame(line.as_bytes())).await;
            self.reply().await
        }

        /// Bytes read before the server closes, or `None` if it stays open.
        async fn read_until_closed(&mut self) -> Option<usize> {
            let mut raw = [0u8; 64];
            match timeout(Duration::from_secs(2), self.stream.read(&mut raw)).await {
                Ok(read) => Some(read.unwrap_or(0)),
                Err(_) => None,
            }
        }
    }

    #[tokio::test]
    async fn test_set_get() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;

        client.send_raw(b"7:set a 1").await;
        let mut raw = [0u8; 64];
        let n = client.stream.read(&mut raw).await.unwrap();
        assert_eq!(&raw[..n], b"2:OK");

        assert_eq!(client.call("get a").await, "1");
    }

    #[tokio::test]
    async fn test_empty_request() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;

        client.send_raw(b"0:").await;
        assert_eq!(client.reply().await, "ERR empty request");
    }

    #[tokio::test]
    async fn test_quoted_values() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;

        assert_eq!(client.call(r#"set greeting "hello world""#).await, "OK");
        assert_eq!(server.store.get("greeting"), Some("hello world".to_string()));
        assert_eq!(client.call("get greeting").await, "hello world");
    }

    #[tokio::test]
    async fn test_errors_keep_connection_open() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;

        assert_eq!(client.call("get missing").await, "ERR no such key 'missing'");
        assert!(client.call("set 'open").await.starts_with("ERR "));
        assert!(client.call("bogus").await.starts_with("ERR unknown command"));

        client.send_raw(&encode_frame(&[0xff, 0xfe])).await;
        assert_eq!(client.reply().await, "ERR request is not valid UTF-8");

        assert_eq!(client.call("exist missing").await, "false");
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;

        let mut batch = BytesMut::new();
        for line in ["set k1 v1", "set k2 v2", "get k1", "del k1 k2"] {
            encode_frame_into(line.as_bytes(), &mut batch);
        }
        client.send_raw(&batch).await;

        let mut replies = Vec::new();
        for _ in 0..4 {
            replies.push(client.reply().await);
        }
        assert_eq!(replies, vec!["OK", "OK", "v1", "2"]);
    }

    #[tokio::test]
    async fn test_split_frame() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;

        client.send_raw(b"9:set ").await;
        sleep(Duration::from_millis(20)).await;
        client.send_raw(b"key v").await;

        assert_eq!(client.reply().await, "OK");
    }

    #[tokio::test]
    async fn test_bad_prefix_closes_connection() {
        let server = TestServer::start().await;
        let mut client = server.connect().await;

        client.send_raw(b"abc:get a").await;
        assert_eq!(client.read_until_closed().await, Some(0));
    }

    #[tokio::test]
    async fn test_clean_close_is_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let commands = CommandHandler::new(Arc::new(Store::new()));
        let handler = ConnectionHandler::new(stream, peer, commands, Arc::clone(&stats));

        drop(client);
        assert!(handler.run().await.is_ok());
        assert_eq!(stats.active.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_truncated() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let commands = CommandHandler::new(Arc::new(Store::new()));
        let handler =
            ConnectionHandler::new(stream, peer, commands, Arc::new(ConnectionStats::new()));

        client.write_all(b"9:set").await.unwrap();
        drop(client);
        assert!(matches!(handler.run().await, Err(ConnectionError::Truncated(5))));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let server = TestServer::start().await;
        let stats = &server.stats;

        assert_eq!(stats.active.load(Ordering::Relaxed), 0);

        let mut client = server.connect().await;

        // Give the server time to accept the connection
        sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active.load(Ordering::Relaxed), 1);

        client.call("exist key").await;
        sleep(Duration::from_millis(50)).await;

        assert!(stats.requests.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_in.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_out.load(Ordering::Relaxed) > 0);

        drop(client);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active.load(Ordering::Relaxed), 0);
    }
}
