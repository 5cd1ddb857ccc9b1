//! TCP host: listener setup, accept loop and connection lifecycle.
//!
//! [`WirecallServer`] owns the dispatch registry, the segment pool and the
//! listening socket. The accept loop admits a connection only after reserving
//! a receive segment for it; an exhausted pool delays further accepts with an
//! exponential backoff instead of admitting connections it cannot buffer.
//! Each admitted connection runs as its own task; all accept, receive and
//! send completions are non-blocking.
//!
//! The pool is created when the server starts running and dropped when it
//! stops; nothing here is process-global state.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep};

use crate::connection;
use crate::pool::SegmentPool;
use crate::registry::ServiceRegistry;
use crate::serializer::{BincodeSerializer, Serializer};

/// Default number of pending connections the listener may queue.
pub const DEFAULT_BACKLOG: u32 = 100;
/// Default size of one receive segment in bytes.
pub const DEFAULT_SEGMENT_SIZE: usize = 1024;
/// Default number of receive segments in the pool.
pub const DEFAULT_SEGMENT_COUNT: usize = 1000;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// TCP host serving a [`ServiceRegistry`] to remote callers.
///
/// Configure with the builder methods, then [`bind`](Self::bind) and
/// [`run`](Self::run):
///
/// ```no_run
/// use wirecall::{ServiceRegistry, ServiceTable, WirecallServer};
///
/// # async fn serve() -> std::io::Result<()> {
/// let mut registry: ServiceRegistry = ServiceRegistry::new();
/// registry
///     .register("math", ServiceTable::new().method("add", |a: i32, b: i32| a + b))
///     .expect("namespace free");
///
/// WirecallServer::new(registry)
///     .bind("127.0.0.1:4960".parse().expect("address"))?
///     .run()
///     .await
/// # }
/// ```
pub struct WirecallServer<S = BincodeSerializer> {
    registry: Arc<ServiceRegistry<S>>,
    listener: Option<TcpListener>,
    backlog: u32,
    segment_size: usize,
    segment_count: usize,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl<S> WirecallServer<S>
where
    S: Serializer + Send + Sync + 'static,
{
    /// Create a server around a fully populated registry.
    ///
    /// The registry is immutable from here on; all namespaces must be
    /// registered before the server is constructed.
    #[must_use]
    pub fn new(registry: ServiceRegistry<S>) -> Self {
        Self {
            registry: Arc::new(registry),
            listener: None,
            backlog: DEFAULT_BACKLOG,
            segment_size: DEFAULT_SEGMENT_SIZE,
            segment_count: DEFAULT_SEGMENT_COUNT,
            ready_tx: None,
        }
    }

    /// Set the listener backlog. Takes effect on the next [`bind`](Self::bind).
    #[must_use]
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Set the size in bytes of each receive segment.
    #[must_use]
    pub fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size.max(1);
        self
    }

    /// Set the number of receive segments, bounding concurrent connections.
    #[must_use]
    pub fn segment_count(mut self, count: usize) -> Self {
        self.segment_count = count.max(1);
        self
    }

    /// Configure a channel signalled once the server is accepting connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Socket address the server is bound to, if [`bind`](Self::bind) ran.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Bind the listening socket with the configured backlog.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the socket cannot be created, bound or
    /// put into listening state.
    pub fn bind(mut self, addr: SocketAddr) -> io::Result<Self> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.bind(addr)?;
        self.listener = Some(socket.listen(self.backlog)?);
        Ok(self)
    }

    /// Run the server until a ctrl-c signal is received.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the accept loop fails irrecoverably.
    ///
    /// # Panics
    ///
    /// Panics if called before [`bind`](Self::bind).
    pub async fn run(self) -> io::Result<()> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// In-flight connections are aborted once the signal fires; the segment
    /// pool is dropped with the server.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the accept loop fails irrecoverably.
    ///
    /// # Panics
    ///
    /// Panics if called before [`bind`](Self::bind).
    pub async fn run_until<F>(mut self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self
            .listener
            .take()
            .expect("`bind` must be called before `run`");
        let pool = Arc::new(SegmentPool::new(self.segment_size, self.segment_count));
        let mut connections = JoinSet::new();
        let mut delay = INITIAL_BACKOFF;

        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(());
        }
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            segments = pool.capacity(),
            "server accepting connections"
        );

        tokio::pin!(shutdown);
        loop {
            // Reserve the receive segment before admitting a connection; an
            // exhausted pool delays accepts rather than admitting a
            // connection with nowhere to read into.
            let Some(segment) = pool.acquire() else {
                tracing::warn!("segment pool exhausted; delaying accepts");
                tokio::select! {
                    () = &mut shutdown => break,
                    () = sleep(delay) => {
                        delay = (delay * 2).min(MAX_BACKOFF);
                        continue;
                    }
                }
            };

            tokio::select! {
                () = &mut shutdown => {
                    pool.release(segment);
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        delay = INITIAL_BACKOFF;
                        if let Err(error) = stream.set_nodelay(true) {
                            tracing::debug!(%peer, %error, "failed to set TCP_NODELAY");
                        }
                        tracing::debug!(%peer, "connection accepted");
                        let registry = Arc::clone(&self.registry);
                        let pool_handle = Arc::clone(&pool);
                        connections.spawn(connection::run(
                            stream,
                            peer,
                            segment,
                            registry,
                            pool_handle,
                        ));
                        // Reap finished connection tasks opportunistically.
                        while connections.try_join_next().is_some() {}
                    }
                    Err(error) => {
                        pool.release(segment);
                        tracing::warn!(%error, "accept failed; backing off");
                        sleep(delay).await;
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                },
            }
        }

        tracing::info!("server shutting down");
        connections.shutdown().await;
        Ok(())
    }
}
