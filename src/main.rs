use std::env;
use std::path::PathBuf;

use fix_correlation_client::{Client, ClientConfig, ClientOptions, SessionSettings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const USAGE: &str = "usage: fix_correlation_client <settings.cfg> <private_key.pem>  (API key from FIX_API_KEY)";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let (Some(settings_path), Some(key_path)) = (args.next(), args.next()) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    let api_key = env::var("FIX_API_KEY").map_err(|_| format!("FIX_API_KEY is not set\n{}", USAGE))?;

    let config = ClientConfig {
        api_key,
        private_key_path: PathBuf::from(key_path),
        settings: SessionSettings::from_file(&settings_path)?,
    };
    let client = Client::new(config, ClientOptions::default())?;

    // Ctrl-C aborts whatever is in flight
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    client.start(&cancel).await?;
    info!("Session established");

    match client.get_limits(&cancel).await {
        Ok(response) => {
            for limit in &response.limits {
                info!(
                    limit_type = ?limit.limit_type,
                    count = limit.limit_count,
                    max = limit.limit_max,
                    reset_interval = limit.reset_interval,
                    resolution = ?limit.reset_interval_resolution,
                    "Limit"
                );
            }
        }
        Err(e) => error!("Failed to query limits: {}", e),
    }

    client.stop().await?;
    Ok(())
}
