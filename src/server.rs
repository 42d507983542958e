//! Accept loop and connection lifecycle
//!
//! Every accepted socket becomes one task in a `JoinSet`. A task first waits
//! for a permit from a semaphore sized `max_connections`, so at most that
//! many sessions are served at once and the rest queue. Stopping drops the
//! listener and aborts every task still running.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::channel::{TcpChannel, Timeouts};
use crate::config::ServerConfig;
use crate::error::{Result, SyncError};
use crate::logger::Logger;
use crate::session::Session;
use crate::store::FolderStore;

/// Stops a running [`Server`]. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct ServerHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl ServerHandle {
    /// Idempotent; returns immediately.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

pub struct Server {
    listener: TcpListener,
    store: Arc<FolderStore>,
    logger: Arc<dyn Logger>,
    max_connections: usize,
    timeouts: Timeouts,
    stop: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Create the root directory and bind the listener.
    pub async fn bind(config: &ServerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        let store = FolderStore::open(&config.root)?;
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|source| SyncError::Startup {
                context: format!("bind {}", config.bind),
                source,
            })?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            listener,
            store: Arc::new(store),
            logger,
            max_connections: config.max_connections.max(1),
            timeouts: config.timeouts(),
            stop: Arc::new(stop),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|source| SyncError::Startup {
                context: "query listener address".into(),
                source,
            })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: self.stop.clone(),
        }
    }

    /// Run on the current runtime in the background.
    pub fn spawn(self) -> (ServerHandle, JoinHandle<Result<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Accept until stopped.
    pub async fn run(self) -> Result<()> {
        let Server {
            listener,
            store,
            logger,
            max_connections,
            timeouts,
            stop,
        } = self;
        let mut stopped = stop.subscribe();
        let permits = Arc::new(Semaphore::new(max_connections));
        let mut sessions = JoinSet::new();

        info!(
            addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            root = %store.root().display(),
            max_connections,
            "foldsync server listening"
        );

        while !*stopped.borrow_and_update() {
            tokio::select! {
                _ = stopped.changed() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let permits = permits.clone();
                        let store = store.clone();
                        let logger = logger.clone();
                        sessions.spawn(async move {
                            // Closed only if the semaphore is dropped, i.e. on shutdown
                            let Ok(_permit) = permits.acquire_owned().await else {
                                return;
                            };
                            let channel = TcpChannel::from_tcp(stream, timeouts);
                            let mut session = Session::new(channel, store, logger, peer);
                            session.run().await;
                        });
                    }
                    Err(e) => {
                        // e.g. out of file descriptors; back off instead of spinning
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "session task panicked");
                        }
                    }
                }
            }
        }

        drop(listener);
        let in_flight = sessions.len();
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
        info!(aborted = in_flight, "foldsync server stopped");
        Ok(())
    }
}
