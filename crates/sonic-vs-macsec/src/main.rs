//! vsmacsec-sweep: removes MACsec devices left behind by the virtual switch
//!
//! Usage: vsmacsec-sweep [CONFIG_PATH]

use std::process::ExitCode;

use sonic_vs_macsec::{MacsecConfig, MacsecManager};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    match run(std::env::args().nth(1)).await {
        Ok(deleted) => {
            info!(deleted = deleted, "MACsec sweep finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("MACsec sweep failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: Option<String>) -> anyhow::Result<usize> {
    let config = match config_path {
        Some(path) => MacsecConfig::load_or_default(&path)?,
        None => MacsecConfig::load()?,
    };

    info!(ip_cmd = %config.ip_cmd, "Starting vsmacsec-sweep");

    let mgr = MacsecManager::with_system(config)?;
    Ok(mgr.cleanup_macsec_devices().await?)
}
