//! Pluggable protocol seams.
//!
//! A server is assembled from four pieces of application code: a [`Decoder`]
//! that turns raw bytes into messages, an [`Encoder`] that writes messages
//! back out, a [`Handler`] invoked once per inbound message, and an optional
//! [`Keepalive`] that produces the probe sent after the idle timeout.
//!
//! All four are dyn-safe async traits so a `Server<M>` can carry them as
//! trait objects regardless of the concrete wire format.

use crate::context::Context;
use crate::stream::ConnStream;
use async_trait::async_trait;
use std::fmt;
use std::io;

/// Error type handlers may return.
///
/// Handler errors are logged and never terminate the connection; only an
/// explicit [`Session::disconnect`](crate::Session::disconnect) request does.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Failure while decoding the inbound byte stream.
///
/// Fatal to the connection it occurred on: the worker transitions straight
/// to its disconnected state. Never propagated across connections.
#[derive(Debug)]
pub enum DecodeError {
    /// The underlying read failed or the peer closed the connection.
    Io(io::Error),
    /// Bytes arrived but do not form a valid message.
    Corrupt(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Io(e) => write!(f, "read failed: {e}"),
            DecodeError::Corrupt(reason) => write!(f, "malformed message: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Io(e) => Some(e),
            DecodeError::Corrupt(_) => None,
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        DecodeError::Io(e)
    }
}

/// Turns raw bytes from the connection into one decoded message per call.
///
/// Runs on the reader routine; each call may block on the underlying read
/// for as long as the peer stays silent.
#[async_trait]
pub trait Decoder<M>: Send + Sync {
    async fn decode(&self, io: &ConnStream) -> Result<M, DecodeError>;
}

/// Writes one message to the connection.
#[async_trait]
pub trait Encoder<M>: Send + Sync {
    async fn encode(&self, msg: &M, io: &ConnStream) -> io::Result<()>;
}

/// Application request handler, invoked once per decoded message.
///
/// The current message is available through [`Context::message`] or, to take
/// ownership, [`Context::take_message`]. Returning `Ok(Some(reply))` encodes
/// and writes the reply; `Ok(None)` sends nothing. Invocations on one
/// connection are strictly sequential.
#[async_trait]
pub trait Handler<M>: Send + Sync {
    async fn handle(&self, ctx: &mut Context<M>) -> Result<Option<M>, HandlerError>;
}

/// Produces the keep-alive probe sent when a connection sits idle past the
/// idle timeout. When no `Keepalive` is configured the idle timeout
/// disconnects directly.
#[async_trait]
pub trait Keepalive<M>: Send + Sync {
    async fn ping(&self, ctx: &Context<M>) -> M;
}
