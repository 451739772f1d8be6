use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use arena_core::domain::battle::{BattleId, Utterance};
use arena_core::domain::ledger::{LedgerEntryKind, LedgerTags, TokenUsage};
use arena_core::domain::tier::ModelTier;
use arena_core::rubric::{RefereeVerdict, Rubric};

use crate::accountant::{CostAccountant, LedgerWriteError};
use crate::gateway::{AuditRequest, CompletionGateway, GatewayError, GradeRequest};

#[derive(Debug, Error)]
pub enum RefereeError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Ledger(#[from] LedgerWriteError),
    /// The grading call was made and paid for, but its answer was unusable.
    #[error("referee returned a malformed verdict: {message}")]
    MalformedVerdict { message: String, usage: TokenUsage, cost: Decimal },
}

#[derive(Clone, Debug, PartialEq)]
pub struct GradedTranscript {
    pub verdict: RefereeVerdict,
    pub usage: TokenUsage,
    pub cost: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuditNote {
    pub note: String,
    pub usage: TokenUsage,
    pub cost: Decimal,
}

/// Grades finished transcripts against a weighted rubric.
pub struct Referee {
    gateway: Arc<dyn CompletionGateway>,
    accountant: Arc<CostAccountant>,
    rubric: Rubric,
}

impl Referee {
    pub fn new(
        gateway: Arc<dyn CompletionGateway>,
        accountant: Arc<CostAccountant>,
        rubric: Rubric,
    ) -> Self {
        Self { gateway, accountant, rubric }
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// The grading call is logged to the ledger before its answer is parsed,
    /// so a malformed verdict still accounts for its cost.
    pub async fn grade(
        &self,
        battle_id: &BattleId,
        persona_name: &str,
        transcript: &[Utterance],
        tier: ModelTier,
    ) -> Result<GradedTranscript, RefereeError> {
        let reply = self
            .gateway
            .grade_transcript(GradeRequest {
                battle_id: battle_id.clone(),
                tier,
                persona_name: persona_name.to_string(),
                transcript: transcript.to_vec(),
                rubric: self.rubric.clone(),
            })
            .await?;

        let entry = self
            .accountant
            .charge(
                self.gateway.provider(),
                &reply.model,
                tier,
                reply.usage,
                LedgerTags {
                    battle_id: Some(battle_id.clone()),
                    turn_index: None,
                    kind: LedgerEntryKind::Referee,
                },
            )
            .await?;

        match self.rubric.parse_verdict(&reply.raw, tier) {
            Ok(verdict) => {
                info!(
                    event_name = "referee.graded",
                    battle_id = %battle_id,
                    model_tier = %tier,
                    aggregate_score = %verdict.aggregate_score,
                    "transcript graded"
                );
                Ok(GradedTranscript { verdict, usage: reply.usage, cost: entry.cost })
            }
            Err(error) => {
                warn!(
                    event_name = "referee.malformed_verdict",
                    battle_id = %battle_id,
                    model_tier = %tier,
                    error = %error,
                    "referee response rejected"
                );
                Err(RefereeError::MalformedVerdict {
                    message: error.to_string(),
                    usage: reply.usage,
                    cost: entry.cost,
                })
            }
        }
    }

    /// Auxiliary audit note, ledgered as a `summary` entry.
    pub async fn audit(
        &self,
        battle_id: &BattleId,
        persona_name: &str,
        transcript: &[Utterance],
        tier: ModelTier,
    ) -> Result<AuditNote, RefereeError> {
        let reply = self
            .gateway
            .audit_transcript(AuditRequest {
                battle_id: battle_id.clone(),
                tier,
                persona_name: persona_name.to_string(),
                transcript: transcript.to_vec(),
            })
            .await?;

        let entry = self
            .accountant
            .charge(
                self.gateway.provider(),
                &reply.model,
                tier,
                reply.usage,
                LedgerTags {
                    battle_id: Some(battle_id.clone()),
                    turn_index: None,
                    kind: LedgerEntryKind::Summary,
                },
            )
            .await?;

        Ok(AuditNote { note: reply.note, usage: reply.usage, cost: entry.cost })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use arena_core::cost::PriceTable;
    use arena_core::domain::battle::{BattleId, Speaker, Utterance};
    use arena_core::domain::ledger::{LedgerEntryKind, TokenUsage};
    use arena_core::domain::tier::ModelTier;
    use arena_core::retry::RetrySchedule;
    use arena_core::rubric::Rubric;
    use arena_db::repositories::InMemoryLedgerRepository;

    use super::{Referee, RefereeError};
    use crate::accountant::CostAccountant;
    use crate::scripted::{Script, ScriptedGateway};

    fn transcript() -> Vec<Utterance> {
        (0..4)
            .map(|turn_index| Utterance {
                speaker: if turn_index % 2 == 0 { Speaker::Closer } else { Speaker::Persona },
                text: format!("line {turn_index}"),
                turn_index,
                model_tier: ModelTier::Premium,
                usage: TokenUsage::new(100, 20),
                cost: Decimal::ZERO,
            })
            .collect()
    }

    fn referee(script: Script) -> (Referee, Arc<InMemoryLedgerRepository>) {
        let ledger = Arc::new(InMemoryLedgerRepository::default());
        let accountant = Arc::new(CostAccountant::new(
            ledger.clone(),
            PriceTable::default(),
            RetrySchedule::new(1, Duration::from_millis(1)),
        ));
        let referee =
            Referee::new(Arc::new(ScriptedGateway::new(script)), accountant, Rubric::default());
        (referee, ledger)
    }

    #[tokio::test]
    async fn grading_same_transcript_twice_is_stable() {
        let (referee, ledger) = referee(Script::default());
        let battle_id = BattleId("BTL-r".to_string());

        let first = referee
            .grade(&battle_id, "Dana", &transcript(), ModelTier::Premium)
            .await
            .expect("first grade");
        let second = referee
            .grade(&battle_id, "Dana", &transcript(), ModelTier::Premium)
            .await
            .expect("second grade");

        assert_eq!(first.verdict.aggregate_score, Decimal::new(700, 1));
        assert_eq!(first.verdict.aggregate_bucket(), second.verdict.aggregate_bucket());
        assert_eq!(ledger.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn malformed_verdict_is_rejected_but_still_ledgered() {
        let (referee, ledger) =
            referee(Script { malformed_verdict: true, ..Script::default() });

        let error = referee
            .grade(&BattleId("BTL-m".to_string()), "Dana", &transcript(), ModelTier::Economy)
            .await
            .expect_err("malformed verdict");

        let entries = ledger.snapshot().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tags.kind, LedgerEntryKind::Referee);
        assert_eq!(entries[0].model_tier, ModelTier::Economy);
        match error {
            RefereeError::MalformedVerdict { cost, .. } => assert_eq!(cost, entries[0].cost),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn audit_note_is_ledgered_as_summary() {
        let (referee, ledger) = referee(Script::default());

        let note = referee
            .audit(&BattleId("BTL-a".to_string()), "Dana", &transcript(), ModelTier::Premium)
            .await
            .expect("audit");

        assert!(note.note.contains("Dana"));
        let entries = ledger.snapshot().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tags.kind, LedgerEntryKind::Summary);
    }
}
