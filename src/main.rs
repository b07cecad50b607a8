use anyhow::Result;
use tracing::info;
use translation_coalescer::{config, server};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when the variables come from the environment)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("translation_coalescer=info".parse()?),
        )
        .init();

    info!("Starting translation coalescer service");

    let config = config::Config::from_env()?;
    server::run(config).await
}
