use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use toml::Value;

use arena_core::config::{AppConfig, LoadOptions};

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    command: &'static str,
    status: &'static str,
    precedence: &'static str,
    entries: Vec<ConfigEntry>,
}

/// Effective configuration with per-key source attribution. Secrets are redacted.
pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("config", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries = effective_values(&config)
        .into_iter()
        .map(|(key, env_keys, value)| ConfigEntry {
            key,
            value,
            source: field_source(
                key,
                env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        })
        .collect();

    CommandResult::report(
        0,
        &ConfigReport {
            command: "config",
            status: "ok",
            precedence: "override > env > file > default",
            entries,
        },
    )
}

type Effective = (&'static str, &'static [&'static str], String);

fn entry(key: &'static str, env_keys: &'static [&'static str], value: String) -> Effective {
    (key, env_keys, value)
}

fn effective_values(config: &AppConfig) -> Vec<Effective> {
    let optional = |value: Option<String>| value.unwrap_or_else(|| "<unset>".to_string());
    let criteria = config
        .referee
        .rubric
        .criteria
        .iter()
        .map(|criterion| format!("{}:{}", criterion.key, criterion.weight))
        .collect::<Vec<_>>()
        .join(",");

    vec![
        entry("database.url", &["ARENA_DATABASE_URL"], config.database.url.clone()),
        entry(
            "database.max_connections",
            &["ARENA_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            &["ARENA_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        entry("llm.provider", &["ARENA_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        entry(
            "llm.api_key",
            &["ARENA_LLM_API_KEY"],
            if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
        ),
        entry("llm.base_url", &["ARENA_LLM_BASE_URL"], config.llm.base_url.clone()),
        entry("llm.premium_model", &["ARENA_LLM_PREMIUM_MODEL"], config.llm.premium_model.clone()),
        entry("llm.economy_model", &["ARENA_LLM_ECONOMY_MODEL"], config.llm.economy_model.clone()),
        entry("llm.timeout_secs", &["ARENA_LLM_TIMEOUT_SECS"], config.llm.timeout_secs.to_string()),
        entry("llm.max_output_tokens", &[], config.llm.max_output_tokens.to_string()),
        entry(
            "pricing.premium_input_per_mtok",
            &[],
            config.pricing.premium_input_per_mtok.to_string(),
        ),
        entry(
            "pricing.premium_output_per_mtok",
            &[],
            config.pricing.premium_output_per_mtok.to_string(),
        ),
        entry(
            "pricing.economy_input_per_mtok",
            &[],
            config.pricing.economy_input_per_mtok.to_string(),
        ),
        entry(
            "pricing.economy_output_per_mtok",
            &[],
            config.pricing.economy_output_per_mtok.to_string(),
        ),
        entry(
            "budget.daily_cap_usd",
            &["ARENA_BUDGET_DAILY_CAP_USD"],
            config.budget.daily_cap_usd.to_string(),
        ),
        entry(
            "budget.throttle_fraction",
            &["ARENA_BUDGET_THROTTLE_FRACTION"],
            config.budget.throttle_fraction.to_string(),
        ),
        entry(
            "budget.per_battle_ceiling_usd",
            &["ARENA_BUDGET_PER_BATTLE_CEILING_USD"],
            config.budget.per_battle_ceiling_usd.to_string(),
        ),
        entry(
            "budget.run_cost_ceiling_usd",
            &["ARENA_BUDGET_RUN_COST_CEILING_USD"],
            optional(config.budget.run_cost_ceiling_usd.map(|value| value.to_string())),
        ),
        entry("battle.max_turns", &["ARENA_BATTLE_MAX_TURNS"], config.battle.max_turns.to_string()),
        entry(
            "battle.persona_degrades_under_throttle",
            &[],
            config.battle.persona_degrades_under_throttle.to_string(),
        ),
        entry(
            "referee.audit_enabled",
            &["ARENA_REFEREE_AUDIT_ENABLED"],
            config.referee.audit_enabled.to_string(),
        ),
        entry("referee.criteria", &[], criteria),
        entry("batch.batch_size", &["ARENA_BATCH_SIZE"], config.batch.batch_size.to_string()),
        entry(
            "batch.max_concurrent",
            &["ARENA_BATCH_MAX_CONCURRENT"],
            config.batch.max_concurrent.to_string(),
        ),
        entry("batch.delay_ms", &["ARENA_BATCH_DELAY_MS"], config.batch.delay_ms.to_string()),
        entry(
            "batch.max_attempts_per_persona",
            &[],
            config.batch.max_attempts_per_persona.to_string(),
        ),
        entry("ledger.write_retries", &[], config.ledger.write_retries.to_string()),
        entry("ledger.retry_base_delay_ms", &[], config.ledger.retry_base_delay_ms.to_string()),
        entry(
            "notifications.webhook_url",
            &["ARENA_NOTIFICATIONS_WEBHOOK_URL"],
            optional(config.notifications.webhook_url.as_deref().map(redact_url)),
        ),
        entry(
            "logging.level",
            &["ARENA_LOGGING_LEVEL", "ARENA_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        entry(
            "logging.format",
            &["ARENA_LOGGING_FORMAT", "ARENA_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("arena.toml"), PathBuf::from("config/arena.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Webhook URLs carry their credential in the path; keep only scheme and host.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<redacted>".to_string();
    };
    let host = rest.split('/').next().unwrap_or_default();
    format!("{scheme}://{host}/***")
}
