//! sockmill: a minimal framework for message-oriented TCP servers.
//!
//! An application supplies a [`Decoder`], an [`Encoder`], a [`Handler`], and
//! an optional [`Keepalive`] producer; the framework owns connection
//! acceptance, the per-connection lifecycle, idle-timeout disconnection,
//! and graceful shutdown.
//!
//! Every accepted connection is driven by one worker: a reader routine that
//! blocks inside the decoder and a sequential dispatch loop that turns
//! decoded messages into handler invocations. Connections that never send
//! an initial message are dropped after a short grace period; established
//! connections get one keep-alive probe cycle before being dropped for
//! real inactivity.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use sockmill::codecs::line::LineCodec;
//! use sockmill::{Context, Handler, HandlerError, Server, ServerConfig};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler<String> for Echo {
//!     async fn handle(&self, ctx: &mut Context<String>) -> Result<Option<String>, HandlerError> {
//!         Ok(ctx.take_message())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::builder(ServerConfig::default())
//!     .decoder(LineCodec)
//!     .encoder(LineCodec)
//!     .handler(Echo)
//!     .build();
//! server.start().await?;
//! // ...
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod codecs;
pub mod config;
pub mod context;
pub mod protocol;
pub mod server;
pub mod stream;
mod worker;

pub use config::ServerConfig;
pub use context::{Context, Session, Value};
pub use protocol::{DecodeError, Decoder, Encoder, Handler, HandlerError, Keepalive};
pub use server::{Server, ServerBuilder, StartError, Status};
pub use stream::ConnStream;
