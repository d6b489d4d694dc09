use std::sync::Arc;

use tracing::{error, info};

use feedwatch::notify::LogNotificationSink;
use feedwatch::{Config, Database, Pipeline};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = feedwatch::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedwatch::logging::init_console_only(&config.logging.level);
    }

    info!("feedwatch - feed acquisition pipeline");

    let db = match Database::open(&config.database.path).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database {}: {}", config.database.path, e);
            std::process::exit(1);
        }
    };

    let pipeline = match Pipeline::build(&config, db, Arc::new(LogNotificationSink)) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let handles = pipeline.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
}
