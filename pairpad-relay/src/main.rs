//! Pairpad relay.
//!
//! ```text
//! pairpad-relay [BIND_ADDR]
//! ```
//!
//! Settings come from `PAIRPAD_*` environment variables (see
//! `ServerConfig::from_env`); a bind address on the command line wins over
//! `PAIRPAD_BIND`. Log level defaults to `info` and follows `RUST_LOG`.

use log::info;
use pairpad_collab::server::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ServerConfig::from_env();
    if let Some(bind) = std::env::args().nth(1) {
        config.bind_addr = bind;
    }

    info!(
        "Starting pairpad relay (max {} per room, auto-create {}, auth {})",
        config.max_peers_per_room,
        config.auto_create_rooms,
        if config.require_auth { "required" } else { "optional" }
    );

    let server = SyncServer::new(config);
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
