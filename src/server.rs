//! TCP server: listener, accept loop, worker registry, graceful shutdown.
//!
//! A [`Server`] owns the listener and one worker per accepted connection.
//! `stop` closes the listener, signals every live worker, and blocks until
//! all of them have torn down their connection.

use crate::config::ServerConfig;
use crate::protocol::{Decoder, Encoder, Handler, Keepalive};
use crate::stream::ConnStream;
use crate::worker::Worker;
use slab::Slab;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Server lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Built but not started.
    Idle,
    /// Accepting connections.
    Listening,
    /// No longer accepting; existing workers may still be draining.
    Stopping,
}

/// Failure to start the server. Reported synchronously; the server never
/// listens when `start` fails.
#[derive(Debug)]
pub enum StartError {
    /// No decoder or no encoder configured.
    MissingCodec,
    /// No request handler configured.
    MissingHandler,
    /// Binding the listener failed.
    Bind(io::Error),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::MissingCodec => write!(f, "cannot start without decoder and encoder"),
            StartError::MissingHandler => write!(f, "cannot start without a handler"),
            StartError::Bind(e) => write!(f, "failed to bind listener: {e}"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::Bind(e) => Some(e),
            _ => None,
        }
    }
}

/// The immutable bundle every worker shares: configuration plus the four
/// pluggable seams.
pub(crate) struct Shared<M> {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) decoder: Arc<dyn Decoder<M>>,
    pub(crate) encoder: Arc<dyn Encoder<M>>,
    pub(crate) handler: Arc<dyn Handler<M>>,
    pub(crate) keepalive: Option<Arc<dyn Keepalive<M>>>,
}

/// Registry entry for one live worker.
///
/// The stop channel has capacity 1 so a stop request never blocks the
/// caller; a worker that has already observed a signal simply ignores
/// duplicates.
struct WorkerHandle {
    stop: mpsc::Sender<()>,
}

/// Assembles a [`Server`] from its configuration and pluggable seams.
pub struct ServerBuilder<M> {
    config: ServerConfig,
    decoder: Option<Arc<dyn Decoder<M>>>,
    encoder: Option<Arc<dyn Encoder<M>>>,
    handler: Option<Arc<dyn Handler<M>>>,
    keepalive: Option<Arc<dyn Keepalive<M>>>,
}

impl<M: Send + 'static> ServerBuilder<M> {
    pub fn decoder(mut self, decoder: impl Decoder<M> + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    pub fn encoder(mut self, encoder: impl Encoder<M> + 'static) -> Self {
        self.encoder = Some(Arc::new(encoder));
        self
    }

    pub fn handler(mut self, handler: impl Handler<M> + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn keepalive(mut self, keepalive: impl Keepalive<M> + 'static) -> Self {
        self.keepalive = Some(Arc::new(keepalive));
        self
    }

    pub fn build(self) -> Server<M> {
        Server {
            config: Arc::new(self.config),
            decoder: self.decoder,
            encoder: self.encoder,
            handler: self.handler,
            keepalive: self.keepalive,
            status: Arc::new(Mutex::new(Status::Idle)),
            workers: Arc::new(Mutex::new(Slab::new())),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            local_addr: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }
}

/// A message-oriented TCP server.
pub struct Server<M> {
    config: Arc<ServerConfig>,
    decoder: Option<Arc<dyn Decoder<M>>>,
    encoder: Option<Arc<dyn Encoder<M>>>,
    handler: Option<Arc<dyn Handler<M>>>,
    keepalive: Option<Arc<dyn Keepalive<M>>>,
    status: Arc<Mutex<Status>>,
    workers: Arc<Mutex<Slab<WorkerHandle>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Send + 'static> Server<M> {
    pub fn builder(config: ServerConfig) -> ServerBuilder<M> {
        ServerBuilder {
            config,
            decoder: None,
            encoder: None,
            handler: None,
            keepalive: None,
        }
    }

    /// Bind the listener and begin accepting connections.
    ///
    /// Fails fast when the codec seams or the handler are unset, or when
    /// the bind itself fails.
    pub async fn start(&self) -> Result<(), StartError> {
        let decoder = self.decoder.clone().ok_or(StartError::MissingCodec)?;
        let encoder = self.encoder.clone().ok_or(StartError::MissingCodec)?;
        let handler = self.handler.clone().ok_or(StartError::MissingHandler)?;

        let listener = TcpListener::bind(self.config.listen_addr())
            .await
            .map_err(StartError::Bind)?;
        let addr = listener.local_addr().map_err(StartError::Bind)?;
        *self.local_addr.lock().unwrap() = Some(addr);
        *self.status.lock().unwrap() = Status::Listening;
        info!(address = %addr, "server listening");

        let shared = Arc::new(Shared {
            config: Arc::clone(&self.config),
            decoder,
            encoder,
            handler,
            keepalive: self.keepalive.clone(),
        });

        let handle = tokio::spawn(accept_loop(
            listener,
            shared,
            Arc::clone(&self.workers),
            self.tracker.clone(),
            self.shutdown.clone(),
            Arc::clone(&self.status),
        ));
        *self.accept_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop accepting connections and tear down every live worker.
    ///
    /// Returns only after all workers have finished their current cycle and
    /// closed their connection. A handler that never returns stalls the
    /// shutdown indefinitely; there is no hard deadline.
    pub async fn stop(&self) {
        info!("stopping server");
        self.shutdown.cancel();
        let accept = self.accept_task.lock().unwrap().take();
        if let Some(handle) = accept {
            let _ = handle.await;
        }

        let stops: Vec<mpsc::Sender<()>> = {
            let workers = self.workers.lock().unwrap();
            workers.iter().map(|(_, w)| w.stop.clone()).collect()
        };
        for stop in stops {
            let _ = stop.try_send(());
        }

        self.tracker.close();
        self.tracker.wait().await;
        *self.status.lock().unwrap() = Status::Stopping;
        info!("server stopped");
    }

    /// Current lifecycle status.
    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    /// Address the listener is bound to, once `start` has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Number of live connections.
    pub fn active_connections(&self) -> usize {
        self.workers.lock().unwrap().len()
    }
}

/// Accepts connections until the listener fails or shutdown is requested,
/// spawning one tracked worker per connection.
async fn accept_loop<M: Send + 'static>(
    listener: TcpListener,
    shared: Arc<Shared<M>>,
    workers: Arc<Mutex<Slab<WorkerHandle>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    status: Arc<Mutex<Status>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("stop receiving connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted connection");
                    let conn = match ConnStream::new(stream) {
                        Ok(conn) => Arc::new(conn),
                        Err(e) => {
                            debug!(error = %e, "dropping connection before start");
                            continue;
                        }
                    };
                    let (stop_tx, stop_rx) = mpsc::channel(1);
                    let key = workers
                        .lock()
                        .unwrap()
                        .insert(WorkerHandle { stop: stop_tx });
                    let worker = Worker::new(Arc::clone(&shared), conn, stop_rx);
                    let registry = Arc::clone(&workers);
                    tracker.spawn(async move {
                        worker.run().await;
                        registry.lock().unwrap().remove(key);
                    });
                }
                Err(e) => {
                    info!(error = %e, "stop receiving connections");
                    break;
                }
            },
        }
    }
    *status.lock().unwrap() = Status::Stopping;
    // The listener drops here; no further connections are accepted.
}
