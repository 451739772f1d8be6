use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use arena_core::domain::battle::BattleId;
use arena_core::domain::ledger::{
    LedgerEntry, LedgerEntryId, LedgerEntryKind, LedgerTags, TokenUsage,
};
use arena_core::domain::tier::ModelTier;

use super::{LedgerRepository, RepositoryError};
use crate::DbPool;

const LEDGER_DAY_FORMAT: &str = "%Y-%m-%d";

pub struct SqlLedgerRepository {
    pool: DbPool,
}

impl SqlLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LedgerRepository for SqlLedgerRepository {
    async fn append(&self, entry: LedgerEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO cost_ledger (
                id,
                provider,
                model,
                model_tier,
                input_tokens,
                output_tokens,
                cost,
                recorded_at,
                ledger_day,
                battle_id,
                turn_index,
                kind
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(entry.model_tier.as_str())
        .bind(to_i64("input_tokens", entry.usage.input_tokens)?)
        .bind(to_i64("output_tokens", entry.usage.output_tokens)?)
        .bind(entry.cost.to_string())
        .bind(entry.recorded_at.to_rfc3339())
        .bind(entry.ledger_day().format(LEDGER_DAY_FORMAT).to_string())
        .bind(entry.tags.battle_id.as_ref().map(|battle_id| battle_id.0.clone()))
        .bind(entry.tags.turn_index.map(i64::from))
        .bind(entry.tags.kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn entries_for_day(&self, day: NaiveDate) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                provider,
                model,
                model_tier,
                input_tokens,
                output_tokens,
                cost,
                recorded_at,
                battle_id,
                turn_index,
                kind
             FROM cost_ledger
             WHERE ledger_day = ?
             ORDER BY recorded_at ASC, id ASC",
        )
        .bind(day.format(LEDGER_DAY_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: SqliteRow) -> Result<LedgerEntry, RepositoryError> {
    let tier_raw = row.try_get::<String, _>("model_tier")?;
    let model_tier = ModelTier::from_str(&tier_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = LedgerEntryKind::from_str(&kind_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(LedgerEntry {
        id: LedgerEntryId(row.try_get("id")?),
        provider: row.try_get("provider")?,
        model: row.try_get("model")?,
        model_tier,
        usage: TokenUsage::new(
            parse_u64("input_tokens", row.try_get("input_tokens")?)?,
            parse_u64("output_tokens", row.try_get("output_tokens")?)?,
        ),
        cost: parse_decimal("cost", row.try_get("cost")?)?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
        tags: LedgerTags {
            battle_id: row.try_get::<Option<String>, _>("battle_id")?.map(BattleId),
            turn_index: row
                .try_get::<Option<i64>, _>("turn_index")?
                .map(|value| parse_u32("turn_index", value))
                .transpose()?,
            kind,
        },
    })
}

pub(crate) fn to_i64(column: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("value for `{column}` does not fit in i64: {value}"))
    })
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
