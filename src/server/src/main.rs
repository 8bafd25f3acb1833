//! A `flowline` server: a REST job command shell, a `/events` WebSocket
//! feed, and the poll loop and file watcher that drive jobs through their
//! processor pipeline, all behind a single bound socket.
//!
//! Configuration is read entirely from the environment: `DATABASE_URL`,
//! `PLUGIN_DIR`, `WATCH_CONFIG` (optional), `SERVER_BIND`, `LOG_LEVEL`.

mod config;
mod handlers;
mod server;
mod state;
mod ws;

use server::Server;
use std::env;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
        ))
        .init();

    let server = Server::from_environment().await?;
    server.run_to_completion().await?;

    Ok(())
}
