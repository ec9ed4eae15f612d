use std::{sync::Arc, time::Duration};

use migration::{Migrator, MigratorTrait};
use tokio::time::{Instant, MissedTickBehavior};

use engine::{Engine, PlaidClient};
use server::{ServerState, SharedSecretVerifier};

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;
    let mut tasks = tokio::task::JoinSet::new();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "budgee={level},server={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let db = connect(&settings.app.database_url).await?;
    let plaid = PlaidClient::new(
        settings.plaid.environment,
        settings.plaid.client_id,
        settings.plaid.secret,
        Duration::from_secs(settings.plaid.timeout_secs),
    )?;
    let engine = Engine::builder()
        .database(db.clone())
        .aggregator(Arc::new(plaid))
        .build()
        .await?;

    if let Some(server) = settings.server {
        let state = ServerState::new(
            engine.clone(),
            db.clone(),
            Arc::new(SharedSecretVerifier::new(server.webhook_secret)),
            server.admin_users,
        );
        tasks.spawn(async move {
            tracing::info!("Found server settings...");
            server::run(state, &server.bind).await;
        });
    }

    if let Some(scheduler) = settings.scheduler {
        let engine = engine.clone();
        tasks.spawn(async move {
            let period = Duration::from_secs(scheduler.sync_interval_secs.max(1));
            tracing::info!(every_secs = period.as_secs(), "Found scheduler settings...");
            scheduled_sync(engine, period).await;
        });
    }

    if tasks.is_empty() {
        tracing::warn!("neither server nor scheduler configured, nothing to do");
    }

    while tasks.join_next().await.is_some() {
        tasks.shutdown().await;
    }

    Ok(())
}

/// Syncs every item once per `period`, starting one period from now.
async fn scheduled_sync(engine: Engine, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match engine.sync_all().await {
            Ok(results) => {
                let failed = results.iter().filter(|r| r.result.is_err()).count();
                tracing::info!(items = results.len(), failed, "scheduled sync done");
            }
            Err(err) => tracing::error!("scheduled sync failed: {err}"),
        }
    }
}

async fn connect(
    url: &str,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
