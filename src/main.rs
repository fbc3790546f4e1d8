//! Faceoff server binary

use tracing::info;
use tracing_subscriber::EnvFilter;

use faceoff::{App, Config, Repositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(addr = %config.bind_addr, "starting faceoff match server");

    let app = App::new(config, Repositories::in_memory())?;
    app.run().await?;
    Ok(())
}
