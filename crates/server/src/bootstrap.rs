use std::sync::Arc;
use std::time::Duration;

use beerbot_core::config::{AppConfig, ConfigError, LoadOptions};
use beerbot_core::engine::{EngineSettings, LedgerCommandEngine};
use beerbot_core::ports::GatewayError;
use beerbot_db::{connect_with_retry, migrations, DbPool, SqlLedgerStore};
use beerbot_slack::{ledger_dispatcher, SignatureVerifier, SlackWebClient};
use thiserror::Error;
use tracing::info;

use crate::events_api::EventsState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub events: EventsState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("slack client could not be built: {0}")]
    SlackClient(#[source] GatewayError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_retry(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
        Duration::from_secs(config.database.connect_retry_secs),
    )
    .await;

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let gateway = SlackWebClient::from_config(&config.slack).map_err(BootstrapError::SlackClient)?;
    let engine = LedgerCommandEngine::new(
        Arc::new(SqlLedgerStore::new(db_pool.clone())),
        Arc::new(gateway),
        EngineSettings::from_config(&config),
    );
    let dispatcher = ledger_dispatcher(Arc::new(engine));
    info!(
        event_name = "system.bootstrap.dispatcher_ready",
        correlation_id = "bootstrap",
        handlers = dispatcher.handler_count(),
        debt_emoji = %config.ledger.debt_emoji,
        "slack event handlers registered"
    );

    let events = EventsState::new(
        SignatureVerifier::new(config.slack.signing_secret.clone()),
        Arc::new(dispatcher),
    );

    Ok(Application { config, db_pool, events })
}
