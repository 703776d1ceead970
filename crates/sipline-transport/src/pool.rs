// sipline - The Sipline SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keyed pool of live connections with per-connection TTLs.
//!
//! Every pooled connection is served by exactly one [`ConnectionHandler`]
//! task that owns a private parser, forwards parsed messages with source
//! addressing, and notifies the pool when its TTL elapses. The pool map
//! holds a handler iff its task is running: expiry, network failure, and
//! cancellation all remove the entry and dispose of the connection.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sipline_syntax::Parser;

use crate::{
    ConnKey, Connection, HandlerError, IncomingMessage, TransportError, NET_ERR_RETRY_INTERVAL,
    READ_BUFFER_SIZE,
};

struct HandlerEntry {
    handler: Arc<ConnectionHandler>,
    task: JoinHandle<()>,
}

/// Pool of active connections, keyed by remote address and transport.
pub struct ConnectionPool {
    cancel: CancellationToken,
    store: RwLock<HashMap<ConnKey, HandlerEntry>>,
    expired_tx: mpsc::Sender<ConnKey>,
    expired_rx: Mutex<Option<mpsc::Receiver<ConnKey>>>,
    handler_errs_tx: mpsc::Sender<HandlerError>,
    handler_errs_rx: Mutex<Option<mpsc::Receiver<HandlerError>>>,
    output: mpsc::Sender<IncomingMessage>,
    errs: mpsc::Sender<HandlerError>,
}

impl ConnectionPool {
    /// Creates a pool whose handlers forward messages to `output` and
    /// failures to `errs`. Cancelling `cancel` shuts the pool down.
    pub fn new(
        cancel: CancellationToken,
        output: mpsc::Sender<IncomingMessage>,
        errs: mpsc::Sender<HandlerError>,
    ) -> Self {
        let (expired_tx, expired_rx) = mpsc::channel(16);
        let (handler_errs_tx, handler_errs_rx) = mpsc::channel(16);
        Self {
            cancel,
            store: RwLock::new(HashMap::new()),
            expired_tx,
            expired_rx: Mutex::new(Some(expired_rx)),
            handler_errs_tx,
            handler_errs_rx: Mutex::new(Some(handler_errs_rx)),
            output,
            errs,
        }
    }

    /// Adds a connection under `key`, spawning a handler task for it.
    ///
    /// If the key is already present, the existing handler's expiry is
    /// pushed out by `ttl` instead.
    pub async fn add(
        &self,
        key: ConnKey,
        connection: Arc<dyn Connection>,
        ttl: Duration,
    ) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::PoolClosed);
        }

        let mut store = self.store.write().await;
        if let Some(entry) = store.get(&key) {
            entry.handler.update(ttl);
            return Ok(());
        }

        let handler = Arc::new(ConnectionHandler::new(
            key,
            connection,
            ttl,
            self.cancel.child_token(),
            self.expired_tx.clone(),
            self.output.clone(),
            self.handler_errs_tx.clone(),
        ));
        debug!(%key, ?ttl, "spawning connection handler");
        let task = tokio::spawn(handler.clone().serve());
        store.insert(key, HandlerEntry { handler, task });
        Ok(())
    }

    /// Returns the connection currently stored under `key`.
    pub async fn get(&self, key: &ConnKey) -> Option<Arc<dyn Connection>> {
        self.store
            .read()
            .await
            .get(key)
            .map(|entry| entry.handler.connection())
    }

    /// Cancels and removes the handler for `key`, returning whether it was
    /// present.
    pub async fn remove(&self, key: &ConnKey) -> bool {
        let entry = self.store.write().await.remove(key);
        match entry {
            Some(entry) => {
                debug!(%key, "dropping connection handler");
                entry.handler.cancel.cancel();
                let _ = entry.task.await;
                true
            }
            None => false,
        }
    }

    /// Number of pooled connections.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// `true` when no connections are pooled.
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Serves the pool: drains expiry notices and handler failures until the
    /// parent cancellation fires, then disposes of every handler.
    ///
    /// Must be called at most once.
    pub async fn serve(&self) {
        let mut expired_rx = self
            .expired_rx
            .lock()
            .take()
            .expect("ConnectionPool::serve called twice");
        let mut handler_errs_rx = self
            .handler_errs_rx
            .lock()
            .take()
            .expect("ConnectionPool::serve called twice");

        info!("connection pool serving");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(key) = expired_rx.recv() => self.on_expiry(key).await,
                Some(err) = handler_errs_rx.recv() => self.on_handler_error(err).await,
            }
        }

        info!("connection pool stopping");
        let keys: Vec<ConnKey> = self.store.read().await.keys().copied().collect();
        for key in keys {
            self.remove(&key).await;
        }
    }

    /// Handles an expiry notice, discarding it when the handler has been
    /// updated since the notice fired (a benign race).
    async fn on_expiry(&self, key: ConnKey) {
        let handler = self
            .store
            .read()
            .await
            .get(&key)
            .map(|entry| entry.handler.clone());

        match handler {
            None => warn!(%key, "ignoring expiry of an already dropped connection"),
            Some(handler) => {
                if handler.expires() <= Instant::now() {
                    debug!(%key, "connection expired; dropping");
                    self.remove(&key).await;
                } else {
                    warn!(%key, "ignored spurious expiry of an updated connection");
                }
            }
        }
    }

    /// Surfaces a handler failure, dropping the handler when the failure is
    /// fatal to its connection.
    async fn on_handler_error(&self, err: HandlerError) {
        if matches!(err.source, TransportError::Network(_)) {
            self.remove(&err.key).await;
        }
        let _ = self.errs.send(err).await;
    }
}

/// Serves a single pooled connection.
///
/// Owns the connection's parser (framing mode chosen by
/// [`Connection::is_stream`]) and the only reader task for the connection.
pub struct ConnectionHandler {
    key: ConnKey,
    connection: Arc<dyn Connection>,
    expiry: Mutex<Instant>,
    cancel: CancellationToken,
    expired_tx: mpsc::Sender<ConnKey>,
    output: mpsc::Sender<IncomingMessage>,
    errs: mpsc::Sender<HandlerError>,
}

impl ConnectionHandler {
    fn new(
        key: ConnKey,
        connection: Arc<dyn Connection>,
        ttl: Duration,
        cancel: CancellationToken,
        expired_tx: mpsc::Sender<ConnKey>,
        output: mpsc::Sender<IncomingMessage>,
        errs: mpsc::Sender<HandlerError>,
    ) -> Self {
        Self {
            key,
            connection,
            expiry: Mutex::new(Instant::now() + ttl),
            cancel,
            expired_tx,
            output,
            errs,
        }
    }

    /// The connection key this handler serves.
    pub fn key(&self) -> ConnKey {
        self.key
    }

    /// The connection this handler serves.
    pub fn connection(&self) -> Arc<dyn Connection> {
        self.connection.clone()
    }

    /// The instant at which this connection expires.
    pub fn expires(&self) -> Instant {
        *self.expiry.lock()
    }

    /// Moves the expiry forward by `ttl` from now. The expiry never moves
    /// backwards.
    pub fn update(&self, ttl: Duration) {
        let mut expiry = self.expiry.lock();
        let next = Instant::now() + ttl;
        if next > *expiry {
            *expiry = next;
        }
        debug!(key = %self.key, expires_in = ?ttl, "updated connection expiry");
    }

    /// The connection serving loop.
    async fn serve(self: Arc<Self>) {
        let (msg_tx, mut msg_rx) = mpsc::channel(32);
        let (parser_errs_tx, mut parser_errs_rx) = mpsc::channel(32);
        let parser = Parser::new(msg_tx, parser_errs_tx, self.connection.is_stream());
        debug!(key = %self.key, "connection handler serving");

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        // Tracks the expiry we last notified the pool about, so a fired
        // deadline is not re-reported until `update` moves it.
        let mut last_notified: Option<Instant> = None;

        loop {
            let expiry = self.expires();
            let expiry_armed = last_notified != Some(expiry);
            let deadline = tokio::time::Instant::from_std(expiry);

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                _ = tokio::time::sleep_until(deadline), if expiry_armed => {
                    // `update` may have moved the expiry since this sleep
                    // was armed; re-check before notifying.
                    let current = self.expires();
                    if current <= Instant::now() {
                        debug!(key = %self.key, "connection inactive for too long; notifying pool");
                        last_notified = Some(current);
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            sent = self.expired_tx.send(self.key) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }

                Some(msg) = msg_rx.recv() => {
                    debug!(key = %self.key, message = %msg.short(), "passing up parsed message");
                    let incoming = IncomingMessage {
                        msg,
                        local_addr: self.connection.local_addr(),
                        remote_addr: self.connection.remote_addr(),
                    };
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        sent = self.output.send(incoming) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }

                Some(err) = parser_errs_rx.recv() => {
                    warn!(key = %self.key, error = %err, "parser error; resetting parser");
                    parser.reset();
                    if self.forward_error(TransportError::Syntax(err)).await.is_err() {
                        break;
                    }
                }

                read = self.connection.read(&mut buf) => match read {
                    Ok(0) => {
                        if self.connection.is_stream() {
                            // Peer closed the stream.
                            let eof: io::Error = io::ErrorKind::UnexpectedEof.into();
                            let _ = self.forward_error(TransportError::Network(eof)).await;
                            break;
                        }
                        // An empty datagram carries nothing to parse, and
                        // must not enqueue a body-length entry.
                    }
                    Ok(n) => {
                        // Parser::write copies the bytes, so the scratch
                        // buffer can be reused immediately.
                        if let Err(err) = parser.write(&buf[..n]) {
                            warn!(key = %self.key, error = %err, "parser rejected data; resetting");
                            parser.reset();
                            if self.forward_error(TransportError::Syntax(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) if err.is_timeout() || err.is_temporary() => {
                        debug!(key = %self.key, error = %err, "transient read failure; retrying");
                        tokio::time::sleep(NET_ERR_RETRY_INTERVAL).await;
                    }
                    Err(err) => {
                        warn!(key = %self.key, error = %err, "connection failed");
                        let _ = self.forward_error(err).await;
                        break;
                    }
                },
            }
        }

        // Drop the parser's output receivers first so a parse task blocked
        // on a full channel fails its send and exits instead of deadlocking
        // the join inside `stop`.
        drop(msg_rx);
        drop(parser_errs_rx);
        parser.stop().await;
        self.connection.close().await;
        debug!(key = %self.key, "connection handler stopped");
    }

    /// Sends a failure to the pool's serve loop. Errors when the handler
    /// should stop (cancellation or a closed pool).
    async fn forward_error(&self, source: TransportError) -> Result<(), ()> {
        let err = HandlerError {
            key: self.key,
            source,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(()),
            sent = self.errs.send(err) => sent.map_err(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::{sleep, timeout};

    use crate::TransportKind;

    /// Scripted in-memory connection: yields queued read results, then
    /// blocks forever.
    struct MockConnection {
        local: SocketAddr,
        remote: SocketAddr,
        stream: bool,
        reads: tokio::sync::Mutex<VecDeque<Result<Vec<u8>, io::ErrorKind>>>,
        closed: AtomicUsize,
    }

    impl MockConnection {
        fn new(reads: Vec<Result<Vec<u8>, io::ErrorKind>>) -> Arc<Self> {
            Arc::new(Self {
                local: "127.0.0.1:5060".parse().unwrap(),
                remote: "192.0.2.7:5060".parse().unwrap(),
                stream: false,
                reads: tokio::sync::Mutex::new(reads.into_iter().collect()),
                closed: AtomicUsize::new(0),
            })
        }

        fn close_count(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        fn local_addr(&self) -> SocketAddr {
            self.local
        }

        fn remote_addr(&self) -> SocketAddr {
            self.remote
        }

        fn is_stream(&self) -> bool {
            self.stream
        }

        async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let next = self.reads.lock().await.pop_front();
            match next {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(kind)) => Err(TransportError::Network(kind.into())),
                None => std::future::pending().await,
            }
        }

        async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
            Ok(data.len())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options_datagram() -> Vec<u8> {
        b"OPTIONS sip:example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP host;branch=z9hG4bKx\r\n\
Content-Length: 0\r\n\r\n"
            .to_vec()
    }

    fn test_key() -> ConnKey {
        ConnKey::new("192.0.2.7:5060".parse().unwrap(), TransportKind::Udp)
    }

    struct Fixture {
        pool: Arc<ConnectionPool>,
        output_rx: mpsc::Receiver<IncomingMessage>,
        errs_rx: mpsc::Receiver<HandlerError>,
        cancel: CancellationToken,
        serve_task: JoinHandle<()>,
    }

    fn fixture() -> Fixture {
        let cancel = CancellationToken::new();
        let (output_tx, output_rx) = mpsc::channel(16);
        let (errs_tx, errs_rx) = mpsc::channel(16);
        let pool = Arc::new(ConnectionPool::new(cancel.clone(), output_tx, errs_tx));
        let serve_task = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.serve().await })
        };
        Fixture {
            pool,
            output_rx,
            errs_rx,
            cancel,
            serve_task,
        }
    }

    #[tokio::test]
    async fn add_get_remove() {
        let fx = fixture();
        let conn = MockConnection::new(vec![]);
        let key = test_key();

        fx.pool
            .add(key, conn.clone(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(fx.pool.get(&key).await.is_some());
        assert_eq!(fx.pool.len().await, 1);

        assert!(fx.pool.remove(&key).await);
        assert!(fx.pool.get(&key).await.is_none());
        assert!(!fx.pool.remove(&key).await);
        assert_eq!(conn.close_count(), 1);

        fx.cancel.cancel();
        let _ = fx.serve_task.await;
    }

    #[tokio::test]
    async fn handler_forwards_messages_with_addresses() {
        let mut fx = fixture();
        let conn = MockConnection::new(vec![Ok(options_datagram())]);
        let key = test_key();

        fx.pool
            .add(key, conn, Duration::from_secs(60))
            .await
            .unwrap();

        let incoming = timeout(Duration::from_secs(1), fx.output_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(incoming.remote_addr, "192.0.2.7:5060".parse().unwrap());
        assert_eq!(incoming.local_addr, "127.0.0.1:5060".parse().unwrap());
        assert!(incoming.msg.as_request().is_some());

        fx.cancel.cancel();
        let _ = fx.serve_task.await;
    }

    #[tokio::test]
    async fn expired_connection_is_dropped_by_serve() {
        let fx = fixture();
        let conn = MockConnection::new(vec![]);
        let key = test_key();

        fx.pool
            .add(key, conn.clone(), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(fx.pool.get(&key).await.is_some());

        sleep(Duration::from_millis(300)).await;
        assert!(fx.pool.get(&key).await.is_none());
        assert_eq!(conn.close_count(), 1);

        fx.cancel.cancel();
        let _ = fx.serve_task.await;
    }

    #[tokio::test]
    async fn update_pushes_expiry_forward() {
        let fx = fixture();
        let conn = MockConnection::new(vec![]);
        let key = test_key();

        fx.pool
            .add(key, conn, Duration::from_millis(200))
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        // Re-adding a known key only updates its TTL.
        let conn2 = MockConnection::new(vec![]);
        fx.pool
            .add(key, conn2, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(fx.pool.len().await, 1);

        // Past the original expiry, the handler must still be alive.
        sleep(Duration::from_millis(200)).await;
        assert!(fx.pool.get(&key).await.is_some());

        // And gone once the extended TTL elapses.
        sleep(Duration::from_millis(600)).await;
        assert!(fx.pool.get(&key).await.is_none());

        fx.cancel.cancel();
        let _ = fx.serve_task.await;
    }

    #[tokio::test]
    async fn parser_error_is_surfaced_and_handler_kept() {
        let mut fx = fixture();
        let conn = MockConnection::new(vec![
            Ok(b"NOT A SIP MESSAGE AT ALL\r\n\r\n".to_vec()),
            Ok(options_datagram()),
        ]);
        let key = test_key();

        fx.pool
            .add(key, conn, Duration::from_secs(60))
            .await
            .unwrap();

        let err = timeout(Duration::from_secs(1), fx.errs_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(err.key, key);
        assert!(matches!(err.source, TransportError::Syntax(_)));

        // The handler keeps serving and parses the next datagram.
        let incoming = timeout(Duration::from_secs(1), fx.output_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert!(incoming.msg.as_request().is_some());
        assert!(fx.pool.get(&key).await.is_some());

        fx.cancel.cancel();
        let _ = fx.serve_task.await;
    }

    #[tokio::test]
    async fn network_error_drops_the_handler() {
        let mut fx = fixture();
        let conn = MockConnection::new(vec![Err(io::ErrorKind::ConnectionReset)]);
        let key = test_key();

        fx.pool
            .add(key, conn.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        let err = timeout(Duration::from_secs(1), fx.errs_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(err.key, key);
        assert!(matches!(err.source, TransportError::Network(_)));

        // Give serve a cycle to finish removal.
        sleep(Duration::from_millis(50)).await;
        assert!(fx.pool.get(&key).await.is_none());
        assert_eq!(conn.close_count(), 1);

        fx.cancel.cancel();
        let _ = fx.serve_task.await;
    }

    #[tokio::test]
    async fn timeout_errors_keep_the_handler_reading() {
        let mut fx = fixture();
        let conn = MockConnection::new(vec![
            Err(io::ErrorKind::TimedOut),
            Err(io::ErrorKind::Interrupted),
            Ok(options_datagram()),
        ]);
        let key = test_key();

        fx.pool
            .add(key, conn, Duration::from_secs(60))
            .await
            .unwrap();

        let incoming = timeout(Duration::from_secs(2), fx.output_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert!(incoming.msg.as_request().is_some());
        assert!(fx.pool.get(&key).await.is_some());

        fx.cancel.cancel();
        let _ = fx.serve_task.await;
    }

    #[tokio::test]
    async fn cancelled_pool_rejects_add() {
        let fx = fixture();
        fx.cancel.cancel();
        let _ = fx.serve_task.await;

        let result = fx
            .pool
            .add(test_key(), MockConnection::new(vec![]), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(TransportError::PoolClosed)));
    }

    #[tokio::test]
    async fn pool_cancellation_disposes_handlers() {
        let fx = fixture();
        let conn = MockConnection::new(vec![]);
        let key = test_key();

        fx.pool
            .add(key, conn.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        fx.cancel.cancel();
        let _ = fx.serve_task.await;

        assert!(fx.pool.get(&key).await.is_none());
        assert_eq!(conn.close_count(), 1);
    }
}
