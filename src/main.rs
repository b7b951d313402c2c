//! sockmill demo: a line-echo server built on the framework.
//!
//! Echoes each line back to the client, answers idle periods with a `PING`
//! probe, and disconnects clients that send `quit`. Configuration comes
//! from CLI arguments layered over an optional TOML file.

use async_trait::async_trait;
use sockmill::codecs::line::LineCodec;
use sockmill::config::AppConfig;
use sockmill::{Context, Handler, HandlerError, Keepalive, Server, Session};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Echo;

#[async_trait]
impl Handler<String> for Echo {
    async fn handle(&self, ctx: &mut Context<String>) -> Result<Option<String>, HandlerError> {
        let Some(line) = ctx.take_message() else {
            return Ok(None);
        };
        if line.eq_ignore_ascii_case("quit") {
            ctx.disconnect();
            return Ok(Some("bye".to_string()));
        }
        Ok(Some(line))
    }
}

struct Ping;

#[async_trait]
impl Keepalive<String> for Ping {
    async fn ping(&self, _ctx: &Context<String>) -> String {
        "PING".to_string()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.server.host,
        port = config.server.port,
        connect_timeout = config.server.connect_timeout_secs,
        idle_timeout = config.server.idle_timeout_secs,
        "Starting sockmill echo server"
    );

    let server = Server::builder(config.server)
        .decoder(LineCodec)
        .encoder(LineCodec)
        .handler(Echo)
        .keepalive(Ping)
        .build();

    server.start().await?;
    tokio::signal::ctrl_c().await?;
    server.stop().await;
    info!("Server stopped");
    Ok(())
}
