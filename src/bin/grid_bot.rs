//! Grid trading bot entry point.
//!
//! ```bash
//! cargo run --bin grid_bot -- --config config.toml
//! ```
//!
//! Exits 0 on a clean shutdown signal, nonzero if startup fails.

use std::env;
use std::process::ExitCode;

use log::{error, info};

use grid_engine::config::Settings;
use grid_engine::orchestrator;

#[tokio::main]
async fn main() -> ExitCode {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("loaded environment from {}", path.display());
    }

    let args: Vec<String> = env::args().collect();
    let config_path = match args.iter().position(|a| a == "--config").and_then(|i| args.get(i + 1)) {
        Some(path) => path.clone(),
        None => {
            eprintln!("usage: grid_bot --config <path>");
            return ExitCode::FAILURE;
        }
    };

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load config from {config_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", &settings.log.level);
    }
    env_logger::try_init().ok();

    info!("starting grid bot: symbol={} exchange={}", settings.symbol, settings.exchange);

    let result = orchestrator::run(settings, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    match result {
        Ok(()) => {
            info!("grid bot stopped cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("grid bot failed: {e}");
            ExitCode::FAILURE
        }
    }
}
