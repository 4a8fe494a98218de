//! Mirror sync server binary

use mirror_sync::{MirrorConfig, MirrorStore};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting GH2 mirror sync server");

    // Load configuration
    let config = MirrorConfig::from_env()?;

    // Open the mirror store
    let store = MirrorStore::open(&config)?;
    let stats = store.stats()?;
    tracing::info!(
        submissions = stats.submissions,
        batches = stats.batches,
        listings = stats.listings,
        "Mirror store opened"
    );

    // The chain transport wires an EventSource here and hands it to
    // Reconciler::run; until then the store serves read traffic only.
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down mirror sync server");
    Ok(())
}
