use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpSocket},
    sync::Semaphore,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{session, SharedLottery};

// Pause after a failed accept, errors like EMFILE tend to repeat right away
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts agencies and hands every connection to a bounded pool of workers
pub struct Server {
    listener: TcpListener,
    lottery: SharedLottery,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    connections: Arc<LiveConnections>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Binds the listening socket
    ///
    /// `max_workers` limits how many connections are served at the same time,
    /// and must be at least 1, further connections wait in the listen backlog until a worker is free.
    pub fn bind(
        addr: SocketAddr,
        backlog: u32,
        max_workers: usize,
        lottery: SharedLottery,
    ) -> tokio::io::Result<Self> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;

        Ok(Self {
            listener,
            lottery,
            workers: Arc::new(Semaphore::new(max_workers)),
            tracker: TaskTracker::new(),
            connections: Arc::default(),
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn local_addr(&self) -> tokio::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that can be used to stop the server from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accepts connections until a shutdown is requested
    ///
    /// returns once the listening socket is closed and every worker has finished.
    pub async fn run(self) {
        let Self {
            listener,
            lottery,
            workers,
            tracker,
            connections,
            shutdown,
        } = self;
        let token = shutdown.token.clone();

        loop {
            tracing::info!("action: accept_connections | result: in_progress");
            let accepted = tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(conn) => conn,
                Err(_) if shutdown.is_requested() => break,
                Err(err) => {
                    tracing::error!("action: accept_connections | result: fail | error: {}", err);
                    if !accept_backoff(&token).await {
                        break;
                    }
                    continue;
                }
            };
            tracing::info!(
                "action: accept_connections | result: success | ip: {}",
                addr.ip()
            );

            // register before waiting for a worker, so a shutdown also reaches queued clients
            let guard = connections.register();
            tracing::debug!("{} live connections", connections.len());

            // wait for a free worker, the kernel keeps queueing new clients meanwhile
            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let lottery = lottery.clone();
            tracker.spawn(async move {
                let cancel = guard.cancel.clone();
                session::serve(stream, addr, lottery, cancel).await;

                drop(guard);
                drop(permit);
            });
        }

        // stop accepting new clients and unblock every session waiting on its socket
        drop(listener);
        let closed = connections.close_all();
        tracing::debug!("closed {} live connections", closed);

        tracker.close();
        tracker.wait().await;
        tracing::info!("action: shutdown_server | result: success");
    }
}

// Waits before the next accept, returns false if a shutdown started meanwhile
async fn accept_backoff(token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

/// Stops a running server, can be cloned freely
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            requested: Arc::default(),
        }
    }

    /// Requests a shutdown, further requests are ignored
    pub fn shutdown(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("action: shutdown_server | result: in_progress");
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// The set of currently open client sockets
///
/// each entry holds the token that aborts every pending read and write of its connection,
/// the tokens are independent of the shutdown token and only `close_all` cancels them.
#[derive(Debug, Default)]
struct LiveConnections {
    next_id: AtomicU64,
    connections: Mutex<HashMap<u64, CancellationToken>>,
}

impl LiveConnections {
    fn register(self: &Arc<Self>) -> ConnectionGuard {
        let cancel = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.connections.lock().unwrap().insert(id, cancel.clone());

        ConnectionGuard {
            id,
            cancel,
            registry: self.clone(),
        }
    }

    // aborts every live connection, returns how many there were
    fn close_all(&self) -> usize {
        let connections = self.connections.lock().unwrap();
        for cancel in connections.values() {
            cancel.cancel();
        }

        connections.len()
    }

    fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

// Removes the connection from the registry once the session is over
struct ConnectionGuard {
    id: u64,
    cancel: CancellationToken,
    registry: Arc<LiveConnections>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.connections.lock().unwrap().remove(&self.id);
    }
}
