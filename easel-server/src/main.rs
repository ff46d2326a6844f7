//! Authority process for shared canvases.
//!
//! Configuration comes from `EASEL_BIND_ADDR`, `EASEL_EPHEMERAL_CAPACITY`
//! and `EASEL_HEARTBEAT_INTERVAL_SECS` (or a `.env` file). Log verbosity
//! follows `RUST_LOG`, defaulting to `info`.

mod config;

use easel_sync::SyncServer;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    log::info!(
        "Starting Easel server on {} (ephemeral capacity {}, heartbeat {}s)",
        config.bind_addr,
        config.ephemeral_capacity,
        config.heartbeat_interval_secs
    );

    let server = SyncServer::new(config);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                log::error!("Server error: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
        }
    }
}
