use std::env;
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;

use arena_cli::commands::batch::{self, BatchArgs};
use arena_cli::commands::battle::{self, BattleArgs};
use arena_cli::commands::{budget, config, migrate};
use arena_core::config::LoadOptions;
use arena_core::domain::battle::BattleId;
use arena_core::domain::ledger::{LedgerEntry, LedgerEntryId, LedgerEntryKind, LedgerTags, TokenUsage};
use arena_core::domain::persona::{Persona, PersonaId};
use arena_core::domain::tier::ModelTier;
use arena_db::{
    connect_with_settings, migrations, BattleRepository, LedgerRepository, PersonaRepository,
    SqlBattleRepository, SqlLedgerRepository, SqlPersonaRepository,
};

#[test]
fn migrate_returns_success_on_fresh_database() {
    let db = TempDir::new().expect("temp dir");
    let url = database_url(&db);
    with_env(&[("ARENA_DATABASE_URL", url.as_str())], || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_anthropic_without_key() {
    with_env(&[("ARENA_LLM_PROVIDER", "anthropic")], || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("llm.api_key"));
    });
}

#[test]
fn config_redacts_api_key_and_reports_env_source() {
    with_env(
        &[
            ("ARENA_LLM_PROVIDER", "anthropic"),
            ("ARENA_LLM_API_KEY", "sk-ant-very-secret"),
            ("ARENA_BUDGET_DAILY_CAP_USD", "20"),
        ],
        || {
            let result = config::run(&LoadOptions::default());
            assert_eq!(result.exit_code, 0);
            assert!(!result.output.contains("very-secret"));

            let payload = parse_payload(&result.output);
            let entries = payload["entries"].as_array().expect("entries");
            let cap = entries
                .iter()
                .find(|entry| entry["key"] == "budget.daily_cap_usd")
                .expect("cap entry");
            assert_eq!(cap["value"], "20");
            assert_eq!(cap["source"], "env (ARENA_BUDGET_DAILY_CAP_USD)");
            let key = entries.iter().find(|entry| entry["key"] == "llm.api_key").expect("key entry");
            assert_eq!(key["value"], "<redacted>");
        },
    );
}

#[test]
fn budget_reports_normal_state_on_empty_ledger() {
    let db = TempDir::new().expect("temp dir");
    let url = database_url(&db);
    with_env(&[("ARENA_DATABASE_URL", url.as_str())], || {
        let result = budget::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["budget"]["status"], "normal");
        assert_eq!(payload["budget"]["is_exceeded"], false);
        assert_eq!(payload["budget"]["ledger_available"], true);
    });
}

#[test]
fn battle_persists_completed_battle_and_ledger() {
    let db = TempDir::new().expect("temp dir");
    let url = database_url(&db);
    seed(&url, &[], &[]);
    with_env(&[("ARENA_DATABASE_URL", url.as_str()), ("ARENA_BATTLE_MAX_TURNS", "4")], || {
        let result = battle::run(
            &LoadOptions::default(),
            BattleArgs { persona_id: "P-CFO".to_string(), dry_run: false },
        );
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "completed");
        assert_eq!(payload["result"]["transcript"].as_array().map(Vec::len), Some(4));

        let battle_id = payload["result"]["battle_id"].as_str().expect("battle id").to_string();
        let (stored, entries) = inspect(&url, &battle_id);
        assert!(stored, "battle should be persisted");
        // Four turns, one grade and one audit note.
        assert_eq!(entries, 6);
    });
}

#[test]
fn dry_run_battle_writes_nothing() {
    let db = TempDir::new().expect("temp dir");
    let url = database_url(&db);
    seed(&url, &[], &[]);
    with_env(&[("ARENA_DATABASE_URL", url.as_str()), ("ARENA_BATTLE_MAX_TURNS", "2")], || {
        let result = battle::run(
            &LoadOptions::default(),
            BattleArgs { persona_id: "P-CFO".to_string(), dry_run: true },
        );
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["dry_run"], true);
        let battle_id = payload["result"]["battle_id"].as_str().expect("battle id").to_string();
        let (stored, entries) = inspect(&url, &battle_id);
        assert!(!stored);
        assert_eq!(entries, 0);
    });
}

#[test]
fn battle_against_unknown_persona_fails() {
    let db = TempDir::new().expect("temp dir");
    let url = database_url(&db);
    seed(&url, &[], &[]);
    with_env(&[("ARENA_DATABASE_URL", url.as_str())], || {
        let result = battle::run(
            &LoadOptions::default(),
            BattleArgs { persona_id: "P-NOBODY".to_string(), dry_run: true },
        );
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "persona_unavailable");
    });
}

#[test]
fn battle_refuses_to_start_when_budget_is_spent() {
    let db = TempDir::new().expect("temp dir");
    let url = database_url(&db);
    seed(&url, &[], &[Decimal::new(150, 2)]);
    with_env(
        &[
            ("ARENA_DATABASE_URL", url.as_str()),
            ("ARENA_BUDGET_DAILY_CAP_USD", "1.00"),
            ("ARENA_BUDGET_PER_BATTLE_CEILING_USD", "0.50"),
        ],
        || {
            let result = battle::run(
                &LoadOptions::default(),
                BattleArgs { persona_id: "P-CFO".to_string(), dry_run: true },
            );
            assert_eq!(result.exit_code, 4);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["error_class"], "budget_exceeded");
        },
    );
}

#[test]
fn dry_run_batch_reports_summary() {
    let db = TempDir::new().expect("temp dir");
    let url = database_url(&db);
    seed(&url, &["P-FOUNDER"], &[]);
    with_env(&[("ARENA_DATABASE_URL", url.as_str()), ("ARENA_BATTLE_MAX_TURNS", "2")], || {
        let result = batch::run(
            &LoadOptions::default(),
            BatchArgs {
                size: Some(3),
                concurrency: Some(1),
                delay_ms: Some(0),
                dry_run: true,
                ..BatchArgs::default()
            },
        );
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["summary"]["battles_started"], 3);
        assert_eq!(payload["summary"]["battles_completed"], 3);
        assert_eq!(payload["summary"]["stop_reason"], Value::Null);
        let personas: Vec<_> = payload["summary"]["results"]
            .as_array()
            .expect("results")
            .iter()
            .map(|result| result["persona_id"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(personas, vec!["P-CFO", "P-FOUNDER", "P-CFO"]);
    });
}

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("arena.db").display())
}

/// Creates the schema, the `P-CFO` persona plus `extra_personas`, and one
/// ledger entry per cost recorded today.
fn seed(url: &str, extra_personas: &[&str], spend: &[Decimal]) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(url, 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let personas = SqlPersonaRepository::new(pool.clone());
        for id in std::iter::once("P-CFO").chain(extra_personas.iter().copied()) {
            personas
                .save(Persona {
                    id: PersonaId(id.to_string()),
                    name: format!("Persona {id}"),
                    instruction: "Stall, then object to price.".to_string(),
                    active: true,
                })
                .await
                .expect("persona");
        }

        let ledger = SqlLedgerRepository::new(pool.clone());
        for cost in spend {
            ledger
                .append(LedgerEntry {
                    id: LedgerEntryId::generate(),
                    provider: "scripted".to_string(),
                    model: "scripted-premium".to_string(),
                    model_tier: ModelTier::Premium,
                    usage: TokenUsage::new(1, 1),
                    cost: *cost,
                    recorded_at: Utc::now(),
                    tags: LedgerTags { battle_id: None, turn_index: None, kind: LedgerEntryKind::Turn },
                })
                .await
                .expect("ledger entry");
        }
        pool.close().await;
    });
}

/// Whether the battle row exists, and how many ledger entries today carry its id.
fn inspect(url: &str, battle_id: &str) -> (bool, usize) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(url, 1, 5).await.expect("connect");
        let battle_id = BattleId(battle_id.to_string());
        let stored = SqlBattleRepository::new(pool.clone())
            .find_by_id(&battle_id)
            .await
            .expect("battle lookup")
            .is_some();
        let entries = SqlLedgerRepository::new(pool.clone())
            .entries_for_day(Utc::now().date_naive())
            .await
            .expect("ledger read")
            .into_iter()
            .filter(|entry| entry.tags.battle_id.as_ref() == Some(&battle_id))
            .count();
        pool.close().await;
        (stored, entries)
    })
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "ARENA_DATABASE_URL",
        "ARENA_DATABASE_MAX_CONNECTIONS",
        "ARENA_DATABASE_TIMEOUT_SECS",
        "ARENA_LLM_PROVIDER",
        "ARENA_LLM_API_KEY",
        "ARENA_LLM_BASE_URL",
        "ARENA_LLM_PREMIUM_MODEL",
        "ARENA_LLM_ECONOMY_MODEL",
        "ARENA_LLM_TIMEOUT_SECS",
        "ARENA_BUDGET_DAILY_CAP_USD",
        "ARENA_BUDGET_THROTTLE_FRACTION",
        "ARENA_BUDGET_PER_BATTLE_CEILING_USD",
        "ARENA_BUDGET_RUN_COST_CEILING_USD",
        "ARENA_BATTLE_MAX_TURNS",
        "ARENA_REFEREE_AUDIT_ENABLED",
        "ARENA_BATCH_SIZE",
        "ARENA_BATCH_MAX_CONCURRENT",
        "ARENA_BATCH_DELAY_MS",
        "ARENA_NOTIFICATIONS_WEBHOOK_URL",
        "ARENA_LOGGING_LEVEL",
        "ARENA_LOGGING_FORMAT",
        "ARENA_LOG_LEVEL",
        "ARENA_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
