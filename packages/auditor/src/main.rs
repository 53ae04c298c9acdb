use anyhow::Context;
use common::config::EngagementConfig;
use engagement::SeaOrmRemote;
use engagement::database::init_db;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = EngagementConfig::load().context("Failed to load config")?;

    let db = init_db(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    let remote = SeaOrmRemote::new(db);
    auditor::run_consistency_auditor(&remote, config.auditor).await;

    Ok(())
}
