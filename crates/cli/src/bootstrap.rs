use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use arena_agent::gateway::{CompletionGateway, GatewayError};
use arena_agent::notify::{LogNotifier, Notifier, NotifyError, WebhookNotifier};
use arena_agent::{
    BattleRunner, BattleSettings, BudgetGovernor, CostAccountant, MessagesApiGateway, Referee,
    ScriptedGateway,
};
use arena_core::budget::BudgetPolicy;
use arena_core::config::{AppConfig, LlmProvider};
use arena_core::cost::PriceTable;
use arena_core::retry::RetrySchedule;
use arena_db::{
    connect_with_settings, migrations, BattleRepository, DbPool, InMemoryBattleRepository,
    InMemoryLedgerRepository, LedgerRepository, PersonaRepository, RepositoryError,
    SqlBattleRepository, SqlLedgerRepository, SqlPersonaRepository,
};

/// Everything a battle or batch command needs, wired from one config.
pub struct Arena {
    pub config: AppConfig,
    pub pool: DbPool,
    pub personas: Arc<dyn PersonaRepository>,
    pub governor: Arc<BudgetGovernor>,
    pub runner: Arc<BattleRunner>,
    pub dry_run: bool,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("completion gateway could not be configured: {0}")]
    Gateway(#[source] GatewayError),
    #[error("notification channel could not be configured: {0}")]
    Notifier(#[source] NotifyError),
    #[error("today's ledger could not be read: {0}")]
    Ledger(#[source] RepositoryError),
}

impl BootstrapError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::DatabaseConnect(_) => "db_connectivity",
            Self::Migration(_) => "migration",
            Self::Gateway(_) | Self::Notifier(_) => "config_validation",
            Self::Ledger(_) => "persistence",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Gateway(_) | Self::Notifier(_) => 2,
            Self::DatabaseConnect(_) | Self::Migration(_) | Self::Ledger(_) => 3,
        }
    }
}

pub async fn connect_and_migrate(config: &AppConfig) -> Result<DbPool, BootstrapError> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );
    Ok(pool)
}

/// Wires the battle runtime. A dry run reads personas and today's spend from
/// the store but keeps every write in memory and uses the scripted gateway.
pub async fn bootstrap(config: AppConfig, dry_run: bool) -> Result<Arena, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        dry_run,
        provider = ?config.llm.provider,
        "starting arena bootstrap"
    );
    let pool = connect_and_migrate(&config).await?;

    let personas: Arc<dyn PersonaRepository> = Arc::new(SqlPersonaRepository::new(pool.clone()));
    let (ledger, battles) = if dry_run {
        let today = SqlLedgerRepository::new(pool.clone())
            .entries_for_day(Utc::now().date_naive())
            .await
            .map_err(BootstrapError::Ledger)?;
        let ledger: Arc<dyn LedgerRepository> = Arc::new(InMemoryLedgerRepository::with_entries(today));
        let battles: Arc<dyn BattleRepository> = Arc::new(InMemoryBattleRepository::default());
        (ledger, battles)
    } else {
        let ledger: Arc<dyn LedgerRepository> = Arc::new(SqlLedgerRepository::new(pool.clone()));
        let battles: Arc<dyn BattleRepository> = Arc::new(SqlBattleRepository::new(pool.clone()));
        (ledger, battles)
    };

    let gateway: Arc<dyn CompletionGateway> = match (dry_run, config.llm.provider) {
        (true, _) | (false, LlmProvider::Scripted) => Arc::new(ScriptedGateway::default()),
        (false, LlmProvider::Anthropic) => Arc::new(
            MessagesApiGateway::from_config(&config.llm).map_err(BootstrapError::Gateway)?,
        ),
    };

    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) if !dry_run => {
            Arc::new(WebhookNotifier::new(url.clone()).map_err(BootstrapError::Notifier)?)
        }
        _ => Arc::new(LogNotifier),
    };

    let retry = RetrySchedule::new(
        config.ledger.write_retries.saturating_add(1),
        Duration::from_millis(config.ledger.retry_base_delay_ms),
    );
    let accountant =
        Arc::new(CostAccountant::new(ledger.clone(), PriceTable::from(&config.pricing), retry));
    let governor = Arc::new(BudgetGovernor::new(
        ledger.clone(),
        BudgetPolicy::from_config(&config.budget, &config.battle),
    ));
    let referee =
        Arc::new(Referee::new(gateway.clone(), accountant.clone(), config.referee.rubric.clone()));

    let runner = Arc::new(BattleRunner::new(
        personas.clone(),
        battles,
        gateway,
        accountant,
        governor.clone(),
        referee,
        notifier,
        BattleSettings::from(&config),
    ));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        dry_run,
        "arena runtime ready"
    );

    Ok(Arena { config, pool, personas, governor, runner, dry_run })
}
