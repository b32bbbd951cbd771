//! # Host
//!
//! Owns the service registry, the optional credential repository and the statistics
//! sink, and serves connections.
//!
//! A [`Host`] is configured and populated first; [`Host::start`] (or one of the
//! listener variants) freezes the registry and returns a [`RunningHost`]. Every
//! connection runs on its own tokio task. [`RunningHost::shutdown`] stops accepting,
//! lets idle connections exit, waits for in-flight calls and runs the services'
//! disposal hooks.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use wirecall::config::HostConfig;
//! use wirecall::protocol::registry::{Interface, MethodSpec};
//! use wirecall::service::host::Host;
//!
//! struct Echo;
//!
//! # async fn run() -> wirecall::error::Result<()> {
//! let mut host = Host::new(HostConfig::default());
//! host.add_service(
//!     Interface::<Echo>::new("Echo").method(
//!         MethodSpec::new("Say").param::<String>().returns::<String>(),
//!         |_, inv| {
//!             let text: String = inv.arg(0)?;
//!             inv.set_return(&text)
//!         },
//!     ),
//!     Arc::new(Echo),
//! )?;
//!
//! let running = host.start_tcp("127.0.0.1:8098").await?;
//! // ...
//! running.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::HostConfig;
use crate::error::{Result, RpcError};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::registry::{Interface, ServiceOptions, ServiceRegistry};
use crate::protocol::zk::ZkRepository;
use crate::transport::{self, Accepted, Acceptor};
use crate::utils::metrics::{NullStats, StatsSink};
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A host being configured. Services can only be added before it is started.
pub struct Host {
    config: HostConfig,
    registry: Arc<ServiceRegistry>,
    zk_repository: Option<Arc<dyn ZkRepository>>,
    stats: Arc<dyn StatsSink>,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        let registry = ServiceRegistry::new(ServiceOptions::from(&config));
        Self {
            config,
            registry: Arc::new(registry),
            zk_repository: None,
            stats: Arc::new(NullStats),
        }
    }

    /// Require every connection to authenticate against `repository`.
    pub fn with_zk_repository<R: ZkRepository + 'static>(mut self, repository: R) -> Self {
        self.zk_repository = Some(Arc::new(repository));
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    fn registry_mut(&mut self) -> Result<&mut ServiceRegistry> {
        Arc::get_mut(&mut self.registry).ok_or(RpcError::AlreadyStarted)
    }

    /// Register a singleton; returns its service ordinal.
    pub fn add_service<T>(&mut self, interface: Interface<T>, singleton: Arc<T>) -> Result<i32>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry_mut()?.register(interface, singleton)
    }

    /// Register a singleton with its own compression and serialization settings.
    pub fn add_service_with_options<T>(
        &mut self,
        interface: Interface<T>,
        singleton: Arc<T>,
        options: ServiceOptions,
    ) -> Result<i32>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry_mut()?
            .register_with_options(interface, singleton, options)
    }

    /// Freeze the registry and start serving externally supplied streams.
    pub fn start(self) -> RunningHost {
        self.launch(None, None)
    }

    /// Start and accept TCP connections on `addr`.
    pub async fn start_tcp(self, addr: &str) -> Result<RunningHost> {
        let listener = transport::tcp::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(self.launch(Some(Acceptor::Tcp(listener)), Some(local_addr)))
    }

    /// Start and accept connections on the Unix domain socket at `path`.
    #[cfg(unix)]
    pub async fn start_unix<P: AsRef<Path>>(self, path: P) -> Result<RunningHost> {
        let listener = transport::local::bind(&path).await?;
        let mut running = self.launch(Some(Acceptor::Unix(listener)), None);
        running.socket_path = Some(path.as_ref().to_path_buf());
        Ok(running)
    }

    fn launch(mut self, acceptor: Option<Acceptor>, local_addr: Option<SocketAddr>) -> RunningHost {
        if let Some(registry) = Arc::get_mut(&mut self.registry) {
            registry.start();
        }

        let (shutdown_tx, _) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel::<()>(1);

        let shared = Arc::new(HostShared {
            dispatcher: Dispatcher::new(
                self.registry,
                self.zk_repository,
                self.stats,
                self.config.max_payload_size,
            ),
            shutdown_tx,
            done_tx: Mutex::new(Some(done_tx)),
        });

        let listener = acceptor.map(|acceptor| {
            let shared = Arc::clone(&shared);
            tokio::spawn(accept_loop(acceptor, shared))
        });

        RunningHost {
            shared,
            listener,
            local_addr,
            done_rx,
            shutdown_timeout: self.config.shutdown_timeout,
            #[cfg(unix)]
            socket_path: None,
        }
    }
}

struct HostShared {
    dispatcher: Dispatcher,
    shutdown_tx: watch::Sender<bool>,
    // each connection task holds a clone; shutdown waits until all are dropped
    done_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl HostShared {
    fn spawn_connection<S>(self: &Arc<Self>, stream: S, peer: String) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let guard = self.done_tx.lock().ok().and_then(|tx| tx.clone());
        let shutdown = self.shutdown_tx.subscribe();
        let shared = Arc::clone(self);

        tokio::spawn(async move {
            let Some(_guard) = guard else {
                debug!(peer = %peer, "Host is shutting down, dropping connection");
                return;
            };
            match shared.dispatcher.run(stream, &peer, shutdown).await {
                Ok(()) => debug!(peer = %peer, "Connection closed"),
                Err(e) => warn!(peer = %peer, error = %e, "Connection ended with error"),
            }
        })
    }
}

async fn accept_loop(acceptor: Acceptor, shared: Arc<HostShared>) {
    let mut shutdown = shared.shutdown_tx.subscribe();
    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = acceptor.accept() => match accepted {
                Ok(Accepted::Tcp(stream, peer)) => {
                    info!(peer = %peer, "New connection established");
                    shared.spawn_connection(stream, peer);
                }
                #[cfg(unix)]
                Ok(Accepted::Unix(stream, peer)) => {
                    info!(peer = %peer, "New connection established");
                    shared.spawn_connection(stream, peer);
                }
                Err(e) => {
                    error!(error = %e, "Error accepting connection");
                }
            }
        }
    }
    debug!("Accept loop stopped");
}

/// A started host.
///
/// Dropping it signals shutdown to the listener and all connections without waiting
/// for them; call [`RunningHost::shutdown`] for an orderly stop.
pub struct RunningHost {
    shared: Arc<HostShared>,
    listener: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    done_rx: mpsc::Receiver<()>,
    shutdown_timeout: std::time::Duration,
    #[cfg(unix)]
    socket_path: Option<PathBuf>,
}

impl RunningHost {
    /// Address of the TCP listener, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> &ServiceRegistry {
        self.shared.dispatcher.registry()
    }

    /// Serve a connection made by some other means.
    pub fn serve<S>(&self, stream: S, peer: impl Into<String>) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.shared.spawn_connection(stream, peer.into())
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shared.shutdown_tx.borrow()
    }

    /// Stop accepting, wait for connections to finish and dispose the services.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down host. Waiting for connections to close...");
        self.shared.shutdown_tx.send_replace(true);

        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                error!(error = %e, "Accept loop failed");
            }
        }

        if let Ok(mut done_tx) = self.shared.done_tx.lock() {
            done_tx.take();
        }

        let drained =
            tokio::time::timeout(self.shutdown_timeout, self.done_rx.recv()).await.is_ok();
        if drained {
            info!("All connections closed");
        } else {
            warn!("Shutdown timeout reached, forcing exit");
        }

        self.shared.dispatcher.registry().dispose_all();
        self.shared.dispatcher.stats().report();

        #[cfg(unix)]
        if let Some(path) = self.socket_path.take() {
            transport::local::cleanup(path).await;
        }

        if drained {
            Ok(())
        } else {
            Err(RpcError::Timeout(
                "Connections still open after shutdown timeout".to_string(),
            ))
        }
    }
}

impl Drop for RunningHost {
    fn drop(&mut self) {
        self.shared.shutdown_tx.send_replace(true);
    }
}
