use std::str::FromStr;

use sqlx::{sqlite::SqliteRow, Row};

use arena_core::domain::battle::{AbortReason, Battle, BattleId, EndReason, Utterance};
use arena_core::domain::ledger::TokenUsage;
use arena_core::domain::persona::PersonaId;
use arena_core::flows::BattleState;
use arena_core::rubric::RefereeVerdict;

use super::ledger::{parse_decimal, parse_timestamp, parse_u32, parse_u64, to_i64};
use super::{BattleRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBattleRepository {
    pool: DbPool,
}

impl SqlBattleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BattleRepository for SqlBattleRepository {
    async fn find_by_id(&self, id: &BattleId) -> Result<Option<Battle>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                persona_id,
                persona_name,
                state,
                max_turns,
                transcript_json,
                input_tokens,
                output_tokens,
                cost,
                verdict_json,
                abort_reason_json,
                end_reason,
                audit_note,
                contract_status,
                started_at,
                finished_at
             FROM battle
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(battle_from_row).transpose()
    }

    async fn save(&self, battle: Battle) -> Result<(), RepositoryError> {
        let transcript_json = to_json("transcript_json", &battle.transcript)?;
        let verdict_json =
            battle.verdict.as_ref().map(|verdict| to_json("verdict_json", verdict)).transpose()?;
        let abort_reason_json = battle
            .abort_reason
            .as_ref()
            .map(|reason| to_json("abort_reason_json", reason))
            .transpose()?;

        sqlx::query(
            "INSERT INTO battle (
                id,
                persona_id,
                persona_name,
                state,
                max_turns,
                transcript_json,
                input_tokens,
                output_tokens,
                cost,
                verdict_json,
                aggregate_score,
                abort_reason_json,
                end_reason,
                audit_note,
                contract_status,
                started_at,
                finished_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                transcript_json = excluded.transcript_json,
                input_tokens = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                cost = excluded.cost,
                verdict_json = excluded.verdict_json,
                aggregate_score = excluded.aggregate_score,
                abort_reason_json = excluded.abort_reason_json,
                end_reason = excluded.end_reason,
                audit_note = excluded.audit_note,
                contract_status = excluded.contract_status,
                finished_at = excluded.finished_at",
        )
        .bind(&battle.id.0)
        .bind(&battle.persona_id.0)
        .bind(&battle.persona_name)
        .bind(battle.state.as_str())
        .bind(i64::from(battle.max_turns))
        .bind(transcript_json)
        .bind(to_i64("input_tokens", battle.usage.input_tokens)?)
        .bind(to_i64("output_tokens", battle.usage.output_tokens)?)
        .bind(battle.cost.to_string())
        .bind(verdict_json)
        .bind(battle.verdict.as_ref().map(|verdict| verdict.aggregate_score.to_string()))
        .bind(abort_reason_json)
        .bind(battle.end_reason.map(end_reason_as_str))
        .bind(&battle.audit_note)
        .bind(&battle.contract_status)
        .bind(battle.started_at.to_rfc3339())
        .bind(battle.finished_at.map(|finished_at| finished_at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn battle_from_row(row: SqliteRow) -> Result<Battle, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = BattleState::from_str(&state_raw).map_err(RepositoryError::Decode)?;

    let transcript: Vec<Utterance> =
        from_json("transcript_json", &row.try_get::<String, _>("transcript_json")?)?;
    let verdict: Option<RefereeVerdict> = row
        .try_get::<Option<String>, _>("verdict_json")?
        .map(|raw| from_json("verdict_json", &raw))
        .transpose()?;
    let abort_reason: Option<AbortReason> = row
        .try_get::<Option<String>, _>("abort_reason_json")?
        .map(|raw| from_json("abort_reason_json", &raw))
        .transpose()?;
    let end_reason = row
        .try_get::<Option<String>, _>("end_reason")?
        .map(|raw| parse_end_reason(&raw))
        .transpose()?;

    Ok(Battle {
        id: BattleId(row.try_get("id")?),
        persona_id: PersonaId(row.try_get("persona_id")?),
        persona_name: row.try_get("persona_name")?,
        state,
        transcript,
        usage: TokenUsage::new(
            parse_u64("input_tokens", row.try_get("input_tokens")?)?,
            parse_u64("output_tokens", row.try_get("output_tokens")?)?,
        ),
        cost: parse_decimal("cost", row.try_get("cost")?)?,
        max_turns: parse_u32("max_turns", row.try_get("max_turns")?)?,
        verdict,
        abort_reason,
        end_reason,
        audit_note: row.try_get("audit_note")?,
        contract_status: row.try_get("contract_status")?,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: row
            .try_get::<Option<String>, _>("finished_at")?
            .map(|raw| parse_timestamp("finished_at", raw))
            .transpose()?,
    })
}

fn end_reason_as_str(reason: EndReason) -> &'static str {
    match reason {
        EndReason::TurnCap => "turn_cap",
        EndReason::NaturalConclusion => "natural_conclusion",
    }
}

fn parse_end_reason(value: &str) -> Result<EndReason, RepositoryError> {
    match value {
        "turn_cap" => Ok(EndReason::TurnCap),
        "natural_conclusion" => Ok(EndReason::NaturalConclusion),
        other => Err(RepositoryError::Decode(format!("unknown end reason `{other}`"))),
    }
}

fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

fn from_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}
