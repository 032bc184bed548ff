//! Inkboard relay: hosts shared boards over WebSocket.
//!
//! ```text
//! inkboard-relay [BIND_ADDR]
//! ```
//!
//! Without an argument the bind address comes from `INKBOARD_BIND`
//! (default `127.0.0.1:9090`). Log level follows `RUST_LOG`.

use inkboard_collab::server::{ServerConfig, SyncServer};
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ServerConfig::from_env();
    if let Some(addr) = std::env::args().nth(1) {
        config.bind_addr = addr;
    }
    info!(
        "Starting relay on {} (max {} peers per room)",
        config.bind_addr, config.max_peers_per_room
    );

    let server = SyncServer::new(config);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Relay stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}
