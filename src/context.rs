//! Per-connection context passed to application handlers.
//!
//! One `Context` is created per worker and reused for the whole life of the
//! connection: the message slot is overwritten each dispatch cycle, while
//! the value map and the disconnect flag persist across cycles.

use crate::config::ServerConfig;
use crate::stream::ConnStream;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A named value stored on a session.
pub type Value = Box<dyn Any + Send + Sync>;

/// Capability surface a connection exposes to application code.
pub trait Session {
    /// Byte-level access to the underlying connection.
    fn stream(&self) -> &Arc<ConnStream>;

    /// Store a named value scoped to this connection.
    fn set_value(&mut self, key: &str, value: Value);

    /// Fetch a previously stored value.
    fn value(&self, key: &str) -> Option<&Value>;

    /// Request a graceful disconnect once the current dispatch cycle ends.
    fn disconnect(&mut self);
}

/// The per-connection handle handed to [`Handler`](crate::Handler) and
/// [`Keepalive`](crate::Keepalive) implementations.
pub struct Context<M> {
    stream: Arc<ConnStream>,
    config: Arc<ServerConfig>,
    message: Option<M>,
    values: HashMap<String, Value>,
    disconnect: bool,
}

impl<M> Context<M> {
    pub(crate) fn new(stream: Arc<ConnStream>, config: Arc<ServerConfig>) -> Self {
        Self {
            stream,
            config,
            message: None,
            values: HashMap::new(),
            disconnect: false,
        }
    }

    /// The message decoded in the current dispatch cycle, if any.
    pub fn message(&self) -> Option<&M> {
        self.message.as_ref()
    }

    /// Take ownership of the current message, leaving the slot empty.
    pub fn take_message(&mut self) -> Option<M> {
        self.message.take()
    }

    pub(crate) fn set_message(&mut self, msg: M) {
        self.message = Some(msg);
    }

    pub(crate) fn clear_message(&mut self) {
        self.message = None;
    }

    /// Store a typed value under `key`, replacing any previous value.
    pub fn set<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Box::new(value));
    }

    /// Fetch the value stored under `key`, if it exists and has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref()
    }

    /// Configuration of the owning server.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Close the connection immediately, waking any pending read.
    pub fn close(&self) {
        self.stream.close();
    }

    pub(crate) fn disconnect_requested(&self) -> bool {
        self.disconnect
    }
}

impl<M> Session for Context<M> {
    fn stream(&self) -> &Arc<ConnStream> {
        &self.stream
    }

    fn set_value(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn disconnect(&mut self) {
        self.disconnect = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn context() -> Context<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        Context::new(
            Arc::new(ConnStream::new(server).unwrap()),
            Arc::new(ServerConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_typed_value_store() {
        let mut ctx = context().await;

        ctx.set("count", 3u64);
        ctx.set("name", "alice".to_string());

        assert_eq!(ctx.get::<u64>("count"), Some(&3));
        assert_eq!(ctx.get::<String>("name").map(String::as_str), Some("alice"));

        // Wrong type or missing key both come back empty.
        assert_eq!(ctx.get::<i32>("count"), None);
        assert_eq!(ctx.get::<u64>("missing"), None);

        // Overwrite keeps the latest value.
        ctx.set("count", 4u64);
        assert_eq!(ctx.get::<u64>("count"), Some(&4));
    }

    #[tokio::test]
    async fn test_message_slot_per_cycle() {
        let mut ctx = context().await;
        assert!(ctx.message().is_none());

        ctx.set_message("hello".to_string());
        assert_eq!(ctx.message().map(String::as_str), Some("hello"));

        assert_eq!(ctx.take_message().as_deref(), Some("hello"));
        assert!(ctx.message().is_none());

        ctx.set_message("next".to_string());
        ctx.clear_message();
        assert!(ctx.message().is_none());
    }

    #[tokio::test]
    async fn test_session_capability_surface() {
        let mut ctx = context().await;
        let session: &mut dyn Session = &mut ctx;

        session.set_value("attempts", Box::new(2i32));
        let raw = session.value("attempts").unwrap();
        assert_eq!(raw.downcast_ref::<i32>(), Some(&2));

        assert!(!session.stream().is_closed());
        session.disconnect();
        assert!(ctx.disconnect_requested());
    }

    #[tokio::test]
    async fn test_disconnect_flag_persists() {
        let mut ctx = context().await;
        assert!(!ctx.disconnect_requested());

        ctx.disconnect();
        assert!(ctx.disconnect_requested());

        // A new cycle clears the message but not the flag.
        ctx.clear_message();
        assert!(ctx.disconnect_requested());
    }
}
