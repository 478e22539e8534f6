mod backend;
mod config;
mod controller;
mod error;
mod features;
mod geometry;
mod led;
mod protocol;
mod scene;
mod throttle;
mod transport;
use eyre::Result;
use tracing_subscriber::{Layer, layer::SubscriberExt};

pub const PACKET_PROCESSING_TARGET: &str = "keyrelay::packet_processing";

pub fn build_logger() -> Result<()> {
    // Default to "info" when RUST_LOG is not set, and keep the
    // websocket crates and per-frame traffic quiet
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = tracing_subscriber::EnvFilter::new("info");
        for directive in [
            "tungstenite=warn".to_string(),
            "tokio_tungstenite=warn".to_string(),
            format!("{PACKET_PROCESSING_TARGET}=warn"),
        ] {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("Ignoring log directive {directive}: {e}"),
            }
        }
        filter
    });

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(env_filter),
        ),
    )
    .map_err(|e| eyre::eyre!("Failed to initialize logger: {}", e))?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    build_logger()?;
    tracing::debug!("Debug logging is enabled");
    tracing::info!("keyrelay version: {}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(
        "Override with RUST_LOG environment variable if needed (e.g., RUST_LOG=keyrelay=trace)"
    );

    // Load configuration
    let config = config::AppConfig::load_or_default();
    tracing::info!("Configuration loaded successfully");
    tracing::debug!("Active configuration: {:?}", config);

    // Create and run the backend
    backend::setup_and_run_backend(config).await?;

    tracing::info!("Application shutdown complete");
    Ok(())
}
