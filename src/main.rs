#![cfg(not(tarpaulin_include))]

use violation_dashboard::app;
use violation_dashboard::config::Config;

/// Main entry point for the dashboard server
///
/// Loads `.env` if present, initialises logging (default level `info`,
/// overridable with `RUST_LOG`) and serves until the process is stopped.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    app::run(config).await
}
