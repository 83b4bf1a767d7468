//! Network Adapter
//!
//! Drives a [`Server`] from real TCP sockets using Tokio. The server core is
//! single threaded and owns all state, so sockets never touch it directly;
//! per-connection tasks exchange messages with one event loop instead:
//!
//! ```text
//!  ┌─────────────┐  Accepted   ┌──────────────────────────────┐
//!  │ accept_loop │────────────>│                              │
//!  └─────────────┘             │          event_loop          │
//!  ┌─────────────┐  Data       │                              │
//!  │ read_loop   │────────────>│  Server::on_accept / on_data │
//!  │ (per conn)  │  Closed     │  Server::on_close / on_tick  │
//!  └─────────────┘             │                              │
//!  ┌─────────────┐  Outbound   │  ChannelTransport            │
//!  │ write_loop  │<────────────│   (write / close)            │
//!  │ (per conn)  │             └──────────────────────────────┘
//!  └─────────────┘
//! ```
//!
//! ## Connection Lifecycle
//!
//! 1. The accept loop assigns a [`ConnectionId`], announces the connection to
//!    the event loop and spawns its reader and writer tasks.
//! 2. The reader forwards every chunk it reads as a `Data` event; the event
//!    loop feeds it to the server, which replies through the transport.
//! 3. The writer drains the connection's outbound queue onto the socket.
//! 4. When the peer hangs up the reader sends `Closed`. When the server
//!    closes the connection the writer shuts the socket down and stops the
//!    reader.
//!
//! Between events the loop sleeps until the next server tick.
//!
//! ## Backpressure
//!
//! The event queue is bounded, so readers stop reading while the event loop
//! is behind. Replies queued for a connection are counted; a client that
//! stops reading while its queue is over the output limit is disconnected.

use crate::config::Config;
use crate::connection::transport::{ConnectionId, Transport, TransportError};
use crate::server::Server;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Bytes reserved in the read buffer before each read
const READ_CHUNK: usize = 4096;

/// Events that may wait for the event loop before readers pause
pub const EVENT_QUEUE_DEPTH: usize = 1024;

/// Default cap on reply bytes queued for one connection
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024 * 1024;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Something that happened on a socket.
#[derive(Debug)]
pub enum Event {
    Accepted {
        conn: ConnectionId,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<Outbound>,
        queued: Arc<AtomicUsize>,
    },
    Data {
        conn: ConnectionId,
        frame: Bytes,
    },
    Closed {
        conn: ConnectionId,
    },
}

/// Instruction for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Data(Bytes),
    Close,
}

/// Writer side of one connection.
#[derive(Debug)]
struct Peer {
    tx: mpsc::UnboundedSender<Outbound>,
    /// Bytes handed to the writer and not yet written to the socket
    queued: Arc<AtomicUsize>,
}

/// [`Transport`] that queues outbound bytes for the writer tasks.
///
/// Writes never block: a write is accepted in full, or refused with
/// [`TransportError::OutputLimit`] once the connection already has
/// `output_limit` bytes waiting.
#[derive(Debug)]
pub struct ChannelTransport {
    peers: HashMap<ConnectionId, Peer>,
    output_limit: usize,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::with_output_limit(DEFAULT_OUTPUT_LIMIT)
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_limit(output_limit: usize) -> Self {
        Self {
            peers: HashMap::new(),
            output_limit,
        }
    }

    pub fn register(
        &mut self,
        conn: ConnectionId,
        tx: mpsc::UnboundedSender<Outbound>,
        queued: Arc<AtomicUsize>,
    ) {
        self.peers.insert(conn, Peer { tx, queued });
    }

    pub fn forget(&mut self, conn: ConnectionId) {
        self.peers.remove(&conn);
    }
}

impl Transport for ChannelTransport {
    fn write(&mut self, conn: ConnectionId, data: &[u8]) -> Result<usize, TransportError> {
        let peer = self
            .peers
            .get(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;

        let queued = peer.queued.load(Ordering::Relaxed);
        if queued >= self.output_limit {
            return Err(TransportError::OutputLimit { conn, queued });
        }

        peer.queued.fetch_add(data.len(), Ordering::Relaxed);
        peer.tx
            .send(Outbound::Data(Bytes::copy_from_slice(data)))
            .map_err(|_| TransportError::Closed(conn))?;
        Ok(data.len())
    }

    fn close(&mut self, conn: ConnectionId) -> Result<(), TransportError> {
        if let Some(peer) = self.peers.remove(&conn) {
            // The writer may already be gone
            let _ = peer.tx.send(Outbound::Close);
        }
        Ok(())
    }
}

/// Binds the listening socket with the configured backlog.
pub async fn bind(config: &Config) -> std::io::Result<TcpListener> {
    let addr = tokio::net::lookup_host(config.bind_address())
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("cannot resolve {}", config.bind_address()),
            )
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(config.tcp_backlog)
}

/// Serves connections from `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, server: Server, stats: Arc<ConnectionStats>) {
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let acceptor = tokio::spawn(accept_loop(listener, events_tx, Arc::clone(&stats)));

    event_loop(server, events_rx).await;
    acceptor.abort();
}

/// Accepts connections and spawns their reader and writer tasks.
async fn accept_loop(
    listener: TcpListener,
    events: mpsc::Sender<Event>,
    stats: Arc<ConnectionStats>,
) {
    let mut next_id = 0u64;

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        next_id += 1;
        let conn = ConnectionId(next_id);
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%conn, error = %e, "Could not set TCP_NODELAY");
        }
        stats.connection_opened();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        if events
            .send(Event::Accepted {
                conn,
                peer,
                outbound: outbound_tx,
                queued: Arc::clone(&queued),
            })
            .await
            .is_err()
        {
            // Event loop is gone
            stats.connection_closed();
            return;
        }

        let (reader, writer) = stream.into_split();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(read_loop(
            conn,
            reader,
            events.clone(),
            stop_rx,
            Arc::clone(&stats),
        ));
        tokio::spawn(write_loop(
            conn,
            writer,
            outbound_rx,
            queued,
            stop_tx,
            Arc::clone(&stats),
        ));
    }
}

/// Forwards everything read from the socket to the event loop.
async fn read_loop(
    conn: ConnectionId,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<Event>,
    mut stop: oneshot::Receiver<()>,
    stats: Arc<ConnectionStats>,
) {
    let mut buffer = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buffer.reserve(READ_CHUNK);
        tokio::select! {
            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) => {
                    debug!(%conn, "Client disconnected");
                    break;
                }
                Ok(n) => {
                    stats.bytes_read(n);
                    trace!(%conn, bytes = n, "Read data");
                    let frame = buffer.split().freeze();
                    // Waits while the event loop is behind
                    if events.send(Event::Data { conn, frame }).await.is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    debug!(%conn, "Connection reset by client");
                    break;
                }
                Err(e) => {
                    warn!(%conn, error = %e, "Connection error");
                    break;
                }
            },
            _ = &mut stop => {
                trace!(%conn, "Reader stopped by server close");
                break;
            }
        }
    }

    let _ = events.send(Event::Closed { conn }).await;
    stats.connection_closed();
}

/// Writes queued replies to the socket.
async fn write_loop(
    conn: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    queued: Arc<AtomicUsize>,
    stop: oneshot::Sender<()>,
    stats: Arc<ConnectionStats>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Data(bytes) => {
                let result = writer.write_all(&bytes).await;
                queued.fetch_sub(bytes.len(), Ordering::Relaxed);
                if let Err(e) = result {
                    debug!(%conn, error = %e, "Write failed");
                    break;
                }
                stats.bytes_written(bytes.len());
                trace!(%conn, bytes = bytes.len(), "Sent response");
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
    let _ = stop.send(());
}

/// Delivers socket events and ticks to the server, one at a time.
async fn event_loop(mut server: Server, mut events: mpsc::Receiver<Event>) {
    let mut transport = ChannelTransport::new();
    let mut next_tick = Instant::now() + server.on_tick();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Accepted { conn, peer, outbound, queued }) => {
                    info!(%conn, client = %peer, "Client connected");
                    transport.register(conn, outbound, queued);
                    server.on_accept(conn);
                }
                Some(Event::Data { conn, frame }) => {
                    server.on_data(conn, &frame, &mut transport);
                }
                Some(Event::Closed { conn }) => {
                    transport.forget(conn);
                    server.on_close(conn);
                }
                None => break,
            },
            _ = tokio::time::sleep_until(next_tick) => {
                next_tick = Instant::now() + server.on_tick();
                server.flush_pending_replies(&mut transport);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MaxMemoryPolicy;
    use tokio::net::TcpStream;
    use tokio::time::{timeout, Duration};

    async fn create_test_server(config: Config) -> (SocketAddr, Arc<ConnectionStats>) {
        let config = Config {
            port: 0,
            ..config
        };
        let listener = bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        tokio::spawn(serve(listener, Server::new(config), Arc::clone(&stats)));
        (addr, stats)
    }

    /// Reads until exactly `expected.len()` bytes have arrived.
    async fn expect_reply(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    #[test]
    fn test_channel_transport_output_limit() {
        let mut transport = ChannelTransport::with_output_limit(16);
        let conn = ConnectionId(7);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        transport.register(conn, tx, Arc::clone(&queued));

        assert_eq!(transport.write(conn, &[b'a'; 10]).unwrap(), 10);
        assert_eq!(transport.write(conn, &[b'b'; 10]).unwrap(), 10);
        assert_eq!(queued.load(Ordering::Relaxed), 20);

        // Nobody drained the queue: the next reply is refused
        assert!(matches!(
            transport.write(conn, b"c"),
            Err(TransportError::OutputLimit { queued: 20, .. })
        ));

        // Once the writer catches up, writes are accepted again
        while let Ok(Outbound::Data(bytes)) = rx.try_recv() {
            queued.fetch_sub(bytes.len(), Ordering::Relaxed);
        }
        assert_eq!(transport.write(conn, b"c").unwrap(), 1);
    }

    #[test]
    fn test_channel_transport_unknown_and_closed() {
        let mut transport = ChannelTransport::new();
        let conn = ConnectionId(1);
        assert!(matches!(
            transport.write(conn, b"x"),
            Err(TransportError::UnknownConnection(_))
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        transport.register(conn, tx, Arc::new(AtomicUsize::new(0)));
        drop(rx);
        assert!(matches!(
            transport.write(conn, b"x"),
            Err(TransportError::Closed(_))
        ));

        assert!(transport.close(conn).is_ok());
        assert!(transport.close(conn).is_ok());
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _) = create_test_server(Config::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nset\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nget\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"$4\r\nAriz\r\n").await;
    }

    #[tokio::test]
    async fn test_multiple_commands() {
        let (addr, _) = create_test_server(Config::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Pipelining: several requests in one write
        client
            .write_all(b"*3\r\n$3\r\nset\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nset\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nget\r\n$2\r\nk1\r\n*2\r\n$3\r\nget\r\n$2\r\nk2\r\n")
            .await
            .unwrap();

        expect_reply(&mut client, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n").await;
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let (addr, _) = create_test_server(Config::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*2\r\n$3\r\nge").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"t\r\n$7\r\nmissing\r\n").await.unwrap();

        expect_reply(&mut client, b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn test_expire_and_ttl() {
        let (addr, _) = create_test_server(Config::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*5\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nex\r\n$3\r\n100\r\n*2\r\n$3\r\nttl\r\n$1\r\nk\r\n*2\r\n$3\r\nttl\r\n$4\r\nnone\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"+OK\r\n:100\r\n:-2\r\n").await;
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection() {
        let (addr, _) = create_test_server(Config::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nping\r\n").await.unwrap();
        expect_reply(&mut client, b"-ERR unknown command 'ping'\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, _) = create_test_server(Config::default()).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nquit\r\n").await.unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        // The server closes its end after the reply
        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_oom_reply_over_the_wire() {
        let config = Config {
            maxmemory: 1,
            maxmemory_policy: MaxMemoryPolicy::NoEviction,
            memory_accounting: crate::config::MemoryAccounting::Estimate,
            ..Default::default()
        };
        let (addr, _) = create_test_server(config).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nset\r\n$1\r\na\r\n$1\r\n1\r\n*3\r\n$3\r\nset\r\n$1\r\nb\r\n$1\r\n2\r\n")
            .await
            .unwrap();
        expect_reply(
            &mut client,
            b"+OK\r\n-OOM command not allowed when used memory > 'maxmemory'\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server(Config::default()).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client
            .write_all(b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"$-1\r\n").await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 5);

        // Close connection
        drop(client);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
