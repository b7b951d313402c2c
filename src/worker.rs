//! Per-connection worker: the reader routine and the dispatch loop.
//!
//! A worker owns exactly one accepted connection and drives it through
//! connected → receiving → (pinging) → disconnected. The reader routine
//! blocks inside the decoder and feeds a bounded channel; the dispatch loop
//! waits on exactly one of a state-dependent timer, that channel, or the
//! stop signal per iteration, so the state machine never races itself.

use crate::config::ServerConfig;
use crate::context::Context;
use crate::protocol::{DecodeError, Decoder};
use crate::server::Shared;
use crate::stream::ConnStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// How long a keep-alive probe may go unanswered before disconnecting.
pub(crate) const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifecycle state of one connection.
///
/// Owned exclusively by the dispatch loop; no other task reads or writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    /// Accepted, nothing received yet.
    Connected,
    /// At least one message dispatched.
    Receiving,
    /// Keep-alive probe sent, awaiting any message.
    Pinging,
    /// Terminal.
    Disconnected,
}

/// Wait duration for the next dispatch cycle in `state`.
pub(crate) fn wait_timeout(state: ConnState, config: &ServerConfig) -> Duration {
    match state {
        ConnState::Connected => config.connect_timeout(),
        ConnState::Pinging => PING_TIMEOUT,
        _ => config.idle_timeout(),
    }
}

pub(crate) struct Worker<M> {
    shared: Arc<Shared<M>>,
    stream: Arc<ConnStream>,
    stop_rx: mpsc::Receiver<()>,
}

impl<M: Send + 'static> Worker<M> {
    pub(crate) fn new(
        shared: Arc<Shared<M>>,
        stream: Arc<ConnStream>,
        stop_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            shared,
            stream,
            stop_rx,
        }
    }

    /// Entry point for the tracked worker task.
    ///
    /// The dispatch loop runs in an inner task so a panicking handler is
    /// contained to this connection; the connection is closed either way
    /// and no other worker or the server is affected.
    pub(crate) async fn run(self) {
        let stream = Arc::clone(&self.stream);
        match tokio::spawn(self.dispatch()).await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                error!(peer = %stream.peer_addr(), "worker panicked");
            }
            Err(_) => {}
        }
        stream.close();
        debug!(peer = %stream.peer_addr(), "connection closed");
    }

    async fn dispatch(self) {
        let Worker {
            shared,
            stream,
            mut stop_rx,
        } = self;
        debug!(peer = %stream.peer_addr(), "worker start");

        let (msg_tx, mut msg_rx) = mpsc::channel(shared.config.queue_depth.max(1));
        let reader = tokio::spawn(read_loop(
            Arc::clone(&shared.decoder),
            Arc::clone(&stream),
            msg_tx,
        ));

        let mut ctx = Context::new(Arc::clone(&stream), Arc::clone(&shared.config));
        let mut state = ConnState::Connected;

        while state != ConnState::Disconnected {
            let timeout = wait_timeout(state, &shared.config);
            ctx.clear_message();

            // Exactly one of the three events is serviced per iteration.
            tokio::select! {
                _ = tokio::time::sleep(timeout) => match (state, shared.keepalive.as_ref()) {
                    (ConnState::Receiving, Some(keepalive)) => {
                        let probe = keepalive.ping(&ctx).await;
                        if let Err(e) = shared.encoder.encode(&probe, &stream).await {
                            error!(peer = %stream.peer_addr(), error = %e, "failed to write keep-alive");
                        }
                        state = ConnState::Pinging;
                        continue;
                    }
                    _ => {
                        debug!(peer = %stream.peer_addr(), ?state, "timeout");
                        state = ConnState::Disconnected;
                    }
                },
                received = msg_rx.recv() => match received {
                    Some(Ok(msg)) => {
                        state = ConnState::Receiving;
                        ctx.set_message(msg);
                    }
                    // Decode failure (logged by the reader) or the reader
                    // is gone entirely.
                    Some(Err(_)) | None => state = ConnState::Disconnected,
                },
                _ = stop_rx.recv() => state = ConnState::Disconnected,
            }

            if state != ConnState::Disconnected && ctx.message().is_some() {
                match shared.handler.handle(&mut ctx).await {
                    Ok(Some(reply)) => {
                        if let Err(e) = shared.encoder.encode(&reply, &stream).await {
                            error!(peer = %stream.peer_addr(), error = %e, "failed to write reply");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!(peer = %stream.peer_addr(), error = %e, "handler error"),
                }
                if ctx.disconnect_requested() {
                    state = ConnState::Disconnected;
                }
            }
        }

        reader.abort();
    }
}

/// Reader routine: decodes messages for the lifetime of the connection.
///
/// On decode failure the error is pushed once and the routine exits; a
/// malformed stream is unrecoverable for its connection. A read pending
/// inside the decoder is unblocked by the connection close that follows
/// the dispatch loop's exit.
async fn read_loop<M: Send + 'static>(
    decoder: Arc<dyn Decoder<M>>,
    stream: Arc<ConnStream>,
    tx: mpsc::Sender<Result<M, DecodeError>>,
) {
    loop {
        match decoder.decode(&stream).await {
            Ok(msg) => {
                if tx.send(Ok(msg)).await.is_err() {
                    // Dispatch loop exited; nobody left to consume.
                    return;
                }
            }
            Err(e) => {
                debug!(peer = %stream.peer_addr(), error = %e, "decode failed");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::line::LineCodec;
    use crate::protocol::{Handler, HandlerError};
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_wait_timeout_per_state() {
        let config = ServerConfig {
            connect_timeout_secs: 5,
            idle_timeout_secs: 60,
            ..ServerConfig::default()
        };

        assert_eq!(
            wait_timeout(ConnState::Connected, &config),
            Duration::from_secs(5)
        );
        assert_eq!(
            wait_timeout(ConnState::Receiving, &config),
            Duration::from_secs(60)
        );
        assert_eq!(wait_timeout(ConnState::Pinging, &config), PING_TIMEOUT);
    }

    struct NullHandler;

    #[async_trait]
    impl Handler<String> for NullHandler {
        async fn handle(&self, _ctx: &mut Context<String>) -> Result<Option<String>, HandlerError> {
            Ok(None)
        }
    }

    fn shared(config: ServerConfig) -> Arc<Shared<String>> {
        Arc::new(Shared {
            config: Arc::new(config),
            decoder: Arc::new(LineCodec),
            encoder: Arc::new(LineCodec),
            handler: Arc::new(NullHandler),
            keepalive: None,
        })
    }

    #[tokio::test]
    async fn test_stop_signal_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        let config = ServerConfig {
            connect_timeout_secs: 60,
            ..ServerConfig::default()
        };
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let worker = Worker::new(
            shared(config),
            Arc::new(ConnStream::new(accepted).unwrap()),
            stop_rx,
        );
        let task = tokio::spawn(worker.run());

        stop_tx.try_send(()).unwrap();

        // The worker observes the stop long before its 60s timer would fire.
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("worker did not stop")
            .unwrap();

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("client read did not unblock")
            .unwrap();
        assert_eq!(n, 0);
    }
}
