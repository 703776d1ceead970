// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP transport plumbing: the connection façade, the keyed connection
//! pool, and the per-connection serving loop.
//!
//! Concrete socket I/O lives behind the [`Connection`] trait; this crate
//! owns everything between a readable connection and parsed messages with
//! source addressing: one parser and one reader task per connection, TTL
//! bookkeeping, and cleanup on cancellation, expiry, or error.

pub mod pool;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use sipline_core::Message;
use sipline_syntax::SyntaxError;
use thiserror::Error;

pub use pool::{ConnectionHandler, ConnectionPool};

/// Size of the scratch buffer each handler reads into.
pub const READ_BUFFER_SIZE: usize = 65_535;

/// How long a handler sleeps after a timeout or temporary network error
/// before retrying the read.
pub const NET_ERR_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// The transport protocol a connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
}

impl TransportKind {
    /// Lowercase name for logging and keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
        }
    }

    /// Parses a transport token from a Via header or URI parameter,
    /// case-insensitively.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "udp" => Some(TransportKind::Udp),
            "tcp" => Some(TransportKind::Tcp),
            "tls" => Some(TransportKind::Tls),
            _ => None,
        }
    }

    /// `true` for stream-based transports, which need stream-mode framing.
    pub fn is_stream_based(&self) -> bool {
        matches!(self, TransportKind::Tcp | TransportKind::Tls)
    }

    /// `true` for transports whose delivery is acknowledged by the lower
    /// layer; these do not need transaction-level retransmissions.
    pub fn is_reliable(&self) -> bool {
        self.is_stream_based()
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key identifying a pooled connection: remote address plus transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub addr: SocketAddr,
    pub transport: TransportKind,
}

impl ConnKey {
    pub fn new(addr: SocketAddr, transport: TransportKind) -> Self {
        Self { addr, transport }
    }
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.addr)
    }
}

/// A parsed message tagged with where it came from.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub msg: Message,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The per-connection parser rejected input. Non-fatal for the
    /// connection: the handler resets its parser and keeps serving.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// The underlying connection failed.
    #[error("network i/o failed: {0}")]
    Network(#[from] io::Error),

    /// The pool's parent cancellation has fired.
    #[error("connection pool is shut down")]
    PoolClosed,
}

impl TransportError {
    /// `true` when a read may simply be retried after a pause.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::Network(err)
                if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
        )
    }

    /// `true` for transient conditions such as an interrupted syscall.
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            TransportError::Network(err) if err.kind() == io::ErrorKind::Interrupted
        )
    }
}

/// A handler failure, tagged with the connection it happened on.
#[derive(Debug, Error)]
#[error("connection {key}: {source}")]
pub struct HandlerError {
    pub key: ConnKey,
    pub source: TransportError,
}

/// Object-safe façade over a live network connection.
///
/// Implementations wrap concrete sockets (UDP association, TCP stream, TLS
/// session). `close` must be idempotent; the owning handler calls it exactly
/// once on disposal.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    fn local_addr(&self) -> SocketAddr;
    fn remote_addr(&self) -> SocketAddr;

    /// `true` when bytes arrive as an undelimited stream (TCP/TLS), which
    /// selects stream-mode parsing.
    fn is_stream(&self) -> bool;

    /// Reads available bytes into `buf`, returning the count.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Writes the whole buffer.
    async fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Releases the underlying socket.
    async fn close(&self);
}
