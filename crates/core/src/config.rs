use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rubric::{Criterion, Rubric};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub pricing: PricingConfig,
    pub budget: BudgetConfig,
    pub battle: BattleConfig,
    pub referee: RefereeConfig,
    pub batch: BatchConfig,
    pub ledger: LedgerConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub premium_model: String,
    pub economy_model: String,
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
}

/// USD per million tokens for each tier and direction.
#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub premium_input_per_mtok: Decimal,
    pub premium_output_per_mtok: Decimal,
    pub economy_input_per_mtok: Decimal,
    pub economy_output_per_mtok: Decimal,
}

#[derive(Clone, Debug)]
pub struct BudgetConfig {
    pub daily_cap_usd: Decimal,
    pub throttle_fraction: Decimal,
    pub per_battle_ceiling_usd: Decimal,
    pub run_cost_ceiling_usd: Option<Decimal>,
}

#[derive(Clone, Debug)]
pub struct BattleConfig {
    pub max_turns: u32,
    pub persona_degrades_under_throttle: bool,
}

#[derive(Clone, Debug)]
pub struct RefereeConfig {
    pub audit_enabled: bool,
    pub rubric: Rubric,
}

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub batch_size: u32,
    pub max_concurrent: u32,
    pub delay_ms: u64,
    pub max_attempts_per_persona: u32,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub write_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Anthropic,
    Scripted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_api_key: Option<String>,
    pub daily_cap_usd: Option<Decimal>,
    pub per_battle_ceiling_usd: Option<Decimal>,
    pub max_turns: Option<u32>,
    pub webhook_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://arena.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Scripted,
                api_key: None,
                base_url: "https://api.anthropic.com".to_string(),
                premium_model: "claude-sonnet-4-5".to_string(),
                economy_model: "claude-haiku-4-5".to_string(),
                timeout_secs: 60,
                max_output_tokens: 400,
            },
            pricing: PricingConfig {
                premium_input_per_mtok: Decimal::new(300, 2),
                premium_output_per_mtok: Decimal::new(1_500, 2),
                economy_input_per_mtok: Decimal::new(80, 2),
                economy_output_per_mtok: Decimal::new(400, 2),
            },
            budget: BudgetConfig {
                daily_cap_usd: Decimal::new(1_500, 2),
                throttle_fraction: Decimal::new(2, 1),
                per_battle_ceiling_usd: Decimal::new(500, 2),
                run_cost_ceiling_usd: None,
            },
            battle: BattleConfig { max_turns: 15, persona_degrades_under_throttle: false },
            referee: RefereeConfig { audit_enabled: true, rubric: Rubric::default() },
            batch: BatchConfig {
                batch_size: 10,
                max_concurrent: 2,
                delay_ms: 1_500,
                max_attempts_per_persona: 2,
            },
            ledger: LedgerConfig { write_retries: 3, retry_base_delay_ms: 200 },
            notifications: NotificationConfig { webhook_url: None },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "scripted" => Ok(Self::Scripted),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected anthropic|scripted)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("arena.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(premium_model) = llm.premium_model {
                self.llm.premium_model = premium_model;
            }
            if let Some(economy_model) = llm.economy_model {
                self.llm.economy_model = economy_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_output_tokens) = llm.max_output_tokens {
                self.llm.max_output_tokens = max_output_tokens;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(value) = pricing.premium_input_per_mtok {
                self.pricing.premium_input_per_mtok = value;
            }
            if let Some(value) = pricing.premium_output_per_mtok {
                self.pricing.premium_output_per_mtok = value;
            }
            if let Some(value) = pricing.economy_input_per_mtok {
                self.pricing.economy_input_per_mtok = value;
            }
            if let Some(value) = pricing.economy_output_per_mtok {
                self.pricing.economy_output_per_mtok = value;
            }
        }

        if let Some(budget) = patch.budget {
            if let Some(daily_cap_usd) = budget.daily_cap_usd {
                self.budget.daily_cap_usd = daily_cap_usd;
            }
            if let Some(throttle_fraction) = budget.throttle_fraction {
                self.budget.throttle_fraction = throttle_fraction;
            }
            if let Some(per_battle_ceiling_usd) = budget.per_battle_ceiling_usd {
                self.budget.per_battle_ceiling_usd = per_battle_ceiling_usd;
            }
            if let Some(run_cost_ceiling_usd) = budget.run_cost_ceiling_usd {
                self.budget.run_cost_ceiling_usd = Some(run_cost_ceiling_usd);
            }
        }

        if let Some(battle) = patch.battle {
            if let Some(max_turns) = battle.max_turns {
                self.battle.max_turns = max_turns;
            }
            if let Some(degrade) = battle.persona_degrades_under_throttle {
                self.battle.persona_degrades_under_throttle = degrade;
            }
        }

        if let Some(referee) = patch.referee {
            if let Some(audit_enabled) = referee.audit_enabled {
                self.referee.audit_enabled = audit_enabled;
            }
            if let Some(criteria) = referee.criteria {
                self.referee.rubric = Rubric {
                    criteria: criteria
                        .into_iter()
                        .map(|criterion| {
                            Criterion::new(
                                criterion.key,
                                criterion.description.unwrap_or_default(),
                                criterion.weight.unwrap_or(Decimal::ONE),
                            )
                        })
                        .collect(),
                };
            }
        }

        if let Some(batch) = patch.batch {
            if let Some(batch_size) = batch.batch_size {
                self.batch.batch_size = batch_size;
            }
            if let Some(max_concurrent) = batch.max_concurrent {
                self.batch.max_concurrent = max_concurrent;
            }
            if let Some(delay_ms) = batch.delay_ms {
                self.batch.delay_ms = delay_ms;
            }
            if let Some(max_attempts) = batch.max_attempts_per_persona {
                self.batch.max_attempts_per_persona = max_attempts;
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(write_retries) = ledger.write_retries {
                self.ledger.write_retries = write_retries;
            }
            if let Some(retry_base_delay_ms) = ledger.retry_base_delay_ms {
                self.ledger.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(webhook_url) = notifications.webhook_url {
                self.notifications.webhook_url = Some(webhook_url);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ARENA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ARENA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("ARENA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ARENA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("ARENA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ARENA_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("ARENA_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("ARENA_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("ARENA_LLM_PREMIUM_MODEL") {
            self.llm.premium_model = value;
        }
        if let Some(value) = read_env("ARENA_LLM_ECONOMY_MODEL") {
            self.llm.economy_model = value;
        }
        if let Some(value) = read_env("ARENA_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("ARENA_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ARENA_BUDGET_DAILY_CAP_USD") {
            self.budget.daily_cap_usd = parse_env("ARENA_BUDGET_DAILY_CAP_USD", &value)?;
        }
        if let Some(value) = read_env("ARENA_BUDGET_THROTTLE_FRACTION") {
            self.budget.throttle_fraction = parse_env("ARENA_BUDGET_THROTTLE_FRACTION", &value)?;
        }
        if let Some(value) = read_env("ARENA_BUDGET_PER_BATTLE_CEILING_USD") {
            self.budget.per_battle_ceiling_usd =
                parse_env("ARENA_BUDGET_PER_BATTLE_CEILING_USD", &value)?;
        }
        if let Some(value) = read_env("ARENA_BUDGET_RUN_COST_CEILING_USD") {
            self.budget.run_cost_ceiling_usd =
                Some(parse_env("ARENA_BUDGET_RUN_COST_CEILING_USD", &value)?);
        }

        if let Some(value) = read_env("ARENA_BATTLE_MAX_TURNS") {
            self.battle.max_turns = parse_env("ARENA_BATTLE_MAX_TURNS", &value)?;
        }
        if let Some(value) = read_env("ARENA_REFEREE_AUDIT_ENABLED") {
            self.referee.audit_enabled = parse_env("ARENA_REFEREE_AUDIT_ENABLED", &value)?;
        }

        if let Some(value) = read_env("ARENA_BATCH_SIZE") {
            self.batch.batch_size = parse_env("ARENA_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("ARENA_BATCH_MAX_CONCURRENT") {
            self.batch.max_concurrent = parse_env("ARENA_BATCH_MAX_CONCURRENT", &value)?;
        }
        if let Some(value) = read_env("ARENA_BATCH_DELAY_MS") {
            self.batch.delay_ms = parse_env("ARENA_BATCH_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("ARENA_NOTIFICATIONS_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(value);
        }

        let log_level = read_env("ARENA_LOGGING_LEVEL").or_else(|| read_env("ARENA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("ARENA_LOGGING_FORMAT").or_else(|| read_env("ARENA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(daily_cap_usd) = overrides.daily_cap_usd {
            self.budget.daily_cap_usd = daily_cap_usd;
        }
        if let Some(per_battle_ceiling_usd) = overrides.per_battle_ceiling_usd {
            self.budget.per_battle_ceiling_usd = per_battle_ceiling_usd;
        }
        if let Some(max_turns) = overrides.max_turns {
            self.battle.max_turns = max_turns;
        }
        if let Some(webhook_url) = overrides.webhook_url {
            self.notifications.webhook_url = Some(webhook_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_pricing(&self.pricing)?;
        validate_budget(&self.budget)?;
        validate_battle(&self.battle)?;
        validate_referee(&self.referee)?;
        validate_batch(&self.batch)?;
        validate_ledger(&self.ledger)?;
        validate_notifications(&self.notifications)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("arena.toml"), PathBuf::from("config/arena.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.premium_model.trim().is_empty() || llm.economy_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.premium_model and llm.economy_model must both be set".to_string(),
        ));
    }

    if llm.max_output_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_output_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.provider == LlmProvider::Anthropic {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the anthropic provider (set ARENA_LLM_API_KEY)"
                    .to_string(),
            ));
        }
        if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    let prices = [
        ("pricing.premium_input_per_mtok", pricing.premium_input_per_mtok),
        ("pricing.premium_output_per_mtok", pricing.premium_output_per_mtok),
        ("pricing.economy_input_per_mtok", pricing.economy_input_per_mtok),
        ("pricing.economy_output_per_mtok", pricing.economy_output_per_mtok),
    ];
    for (key, value) in prices {
        if value.is_sign_negative() {
            return Err(ConfigError::Validation(format!("{key} must not be negative")));
        }
    }
    Ok(())
}

fn validate_budget(budget: &BudgetConfig) -> Result<(), ConfigError> {
    if budget.daily_cap_usd <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "budget.daily_cap_usd must be greater than zero".to_string(),
        ));
    }

    if budget.throttle_fraction <= Decimal::ZERO || budget.throttle_fraction >= Decimal::ONE {
        return Err(ConfigError::Validation(
            "budget.throttle_fraction must be strictly between 0 and 1".to_string(),
        ));
    }

    if budget.per_battle_ceiling_usd <= Decimal::ZERO
        || budget.per_battle_ceiling_usd > budget.daily_cap_usd
    {
        return Err(ConfigError::Validation(
            "budget.per_battle_ceiling_usd must be positive and not above budget.daily_cap_usd"
                .to_string(),
        ));
    }

    if let Some(ceiling) = budget.run_cost_ceiling_usd {
        if ceiling <= Decimal::ZERO {
            return Err(ConfigError::Validation(
                "budget.run_cost_ceiling_usd must be greater than zero when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_battle(battle: &BattleConfig) -> Result<(), ConfigError> {
    if battle.max_turns == 0 || battle.max_turns > 100 {
        return Err(ConfigError::Validation(
            "battle.max_turns must be in range 1..=100".to_string(),
        ));
    }
    Ok(())
}

fn validate_referee(referee: &RefereeConfig) -> Result<(), ConfigError> {
    referee
        .rubric
        .validate()
        .map_err(|error| ConfigError::Validation(format!("referee.criteria: {error}")))
}

fn validate_batch(batch: &BatchConfig) -> Result<(), ConfigError> {
    if batch.batch_size == 0 {
        return Err(ConfigError::Validation(
            "batch.batch_size must be greater than zero".to_string(),
        ));
    }
    if batch.max_concurrent == 0 || batch.max_concurrent > 16 {
        return Err(ConfigError::Validation(
            "batch.max_concurrent must be in range 1..=16".to_string(),
        ));
    }
    if batch.max_attempts_per_persona == 0 {
        return Err(ConfigError::Validation(
            "batch.max_attempts_per_persona must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    if ledger.write_retries > 10 {
        return Err(ConfigError::Validation(
            "ledger.write_retries must be at most 10".to_string(),
        ));
    }
    Ok(())
}

fn validate_notifications(notifications: &NotificationConfig) -> Result<(), ConfigError> {
    if let Some(url) = &notifications.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notifications.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    pricing: Option<PricingPatch>,
    budget: Option<BudgetPatch>,
    battle: Option<BattlePatch>,
    referee: Option<RefereePatch>,
    batch: Option<BatchPatch>,
    ledger: Option<LedgerPatch>,
    notifications: Option<NotificationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    premium_model: Option<String>,
    economy_model: Option<String>,
    timeout_secs: Option<u64>,
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    premium_input_per_mtok: Option<Decimal>,
    premium_output_per_mtok: Option<Decimal>,
    economy_input_per_mtok: Option<Decimal>,
    economy_output_per_mtok: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct BudgetPatch {
    daily_cap_usd: Option<Decimal>,
    throttle_fraction: Option<Decimal>,
    per_battle_ceiling_usd: Option<Decimal>,
    run_cost_ceiling_usd: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct BattlePatch {
    max_turns: Option<u32>,
    persona_degrades_under_throttle: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RefereePatch {
    audit_enabled: Option<bool>,
    criteria: Option<Vec<CriterionPatch>>,
}

#[derive(Debug, Deserialize)]
struct CriterionPatch {
    key: String,
    description: Option<String>,
    weight: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchPatch {
    batch_size: Option<u32>,
    max_concurrent: Option<u32>,
    delay_ms: Option<u64>,
    max_attempts_per_persona: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    write_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    webhook_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.llm.provider == LlmProvider::Scripted, "default provider is scripted")?;
        ensure(config.battle.max_turns == 15, "default turn cap is 15")?;
        ensure(config.referee.rubric.criteria.len() == 3, "default rubric has three criteria")?;
        ensure(
            config.budget.daily_cap_usd * config.budget.throttle_fraction == Decimal::new(300, 2),
            "default throttle threshold is 20% of the cap",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation_and_rubric() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ARENA_API_KEY", "sk-ant-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("arena.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "anthropic"
api_key = "${TEST_ARENA_API_KEY}"

[budget]
daily_cap_usd = "40.00"
per_battle_ceiling_usd = 2.5

[[referee.criteria]]
key = "rapport"
description = "Built trust early"
weight = 2

[[referee.criteria]]
key = "closing"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .llm
                    .api_key
                    .as_ref()
                    .map(|key| key.expose_secret() == "sk-ant-from-env")
                    .unwrap_or(false),
                "api key should be loaded from environment",
            )?;
            ensure(config.budget.daily_cap_usd == Decimal::new(4_000, 2), "cap from file")?;
            ensure(
                config.budget.per_battle_ceiling_usd == Decimal::new(25, 1),
                "float ceiling from file",
            )?;
            ensure(config.referee.rubric.criteria.len() == 2, "rubric replaced from file")?;
            ensure(
                config.referee.rubric.criteria[0].weight == Decimal::from(2),
                "criterion weight from file",
            )?;
            ensure(
                config.referee.rubric.criteria[1].weight == Decimal::ONE,
                "criterion weight defaults to one",
            )
        })();

        clear_vars(&["TEST_ARENA_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ARENA_LOG_LEVEL", "warn");
        env::set_var("ARENA_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["ARENA_LOG_LEVEL", "ARENA_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ARENA_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("ARENA_BATTLE_MAX_TURNS", "9");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("arena.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[battle]
max_turns = 7

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.battle.max_turns == 9, "env max turns should win over file")
        })();

        clear_vars(&["ARENA_DATABASE_URL", "ARENA_BATTLE_MAX_TURNS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ARENA_LLM_PROVIDER", "anthropic");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["ARENA_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn budget_ceiling_above_cap_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                daily_cap_usd: Some(Decimal::new(300, 2)),
                per_battle_ceiling_usd: Some(Decimal::new(500, 2)),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("ceiling above cap should fail".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("per_battle_ceiling")),
            "validation failure should mention the per-battle ceiling",
        )
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ARENA_BUDGET_DAILY_CAP_USD", "lots");
        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "ARENA_BUDGET_DAILY_CAP_USD", "error should name the env key")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["ARENA_BUDGET_DAILY_CAP_USD"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ARENA_LLM_PROVIDER", "anthropic");
        env::set_var("ARENA_LLM_API_KEY", "sk-ant-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-ant-secret-value"), "debug output should not contain key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["ARENA_LLM_PROVIDER", "ARENA_LLM_API_KEY"]);
        result
    }
}
