//! jetlog: embedded stream engine host
//!
//! Declares the streams and key-value buckets from configuration, keeps
//! their retention sweeps running and reports their state until interrupted.
//!
//! ## Configuration
//! - First argument or JETLOG_CONFIG: path to a YAML config file
//! - JETLOG__ENGINE__SWEEP_INTERVAL etc.: overrides of individual settings
//! - JETLOG_LOG: log filter (default: info)

use tracing::info;

use jetlog::config::Config;
use jetlog::utils::bootstrap::init_tracing;
use jetlog::Engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;
    let engine = Engine::from_config(&config).await?;

    for name in engine.stream_names().await {
        let info = engine.stream(&name).await?.info().await?;
        info!(
            stream = %name,
            msg_count = info.state.msg_count,
            first_seq = info.state.first_seq,
            last_seq = info.state.last_seq,
            "Stream ready"
        );
    }
    info!(
        streams = config.streams.len(),
        buckets = config.key_value.len(),
        "jetlog started"
    );

    tokio::signal::ctrl_c().await?;
    info!("jetlog shutting down");

    Ok(())
}
