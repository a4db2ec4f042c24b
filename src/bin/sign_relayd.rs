//! sign_relayd - realtime sign prediction relay
//!
//! This daemon:
//! 1. Loads configuration (SIGN_RELAY_CONFIG + env overrides)
//! 2. Builds the landmark extractor and static classifier
//! 3. Serves the JSON-lines prediction stream
//! 4. Serves the operator API
//! 5. Stops both on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use sign_relay::{
    api::{ApiConfig, ApiServer},
    classify,
    config::RelayConfig,
    extract,
    stream::{StreamConfig, StreamServer},
    SessionPipeline, SessionRegistry,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelayConfig::load()?;
    let extractor = extract::build_extractor(&config.extractor)?;
    let classifier = classify::build_static(&config.classifier)?;

    let registry = Arc::new(SessionRegistry::new(
        config.session_defaults.clone(),
        config.stream.max_connections,
    ));
    let pipeline = Arc::new(SessionPipeline::new(
        Arc::clone(&registry),
        extractor,
        classifier,
    ));

    let stream_handle =
        StreamServer::new(StreamConfig::from(&config.stream), Arc::clone(&pipeline)).spawn()?;
    let api_handle = ApiServer::new(
        ApiConfig {
            addr: config.api_addr.clone(),
        },
        pipeline,
    )
    .spawn()?;
    log::info!(
        "sign_relayd running: stream {}, api {}, max {} connections",
        stream_handle.addr,
        api_handle.addr,
        config.stream.max_connections
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("sign_relayd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping servers...");
    api_handle.stop()?;
    stream_handle.stop()?;
    let stats = registry.stats();
    log::info!(
        "sign_relayd stopped after {} connections and {} predictions",
        stats.connections_opened,
        stats.total_predictions
    );

    Ok(())
}
