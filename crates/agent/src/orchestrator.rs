//! Drives one battle from the opening line to a persisted verdict.
//!
//! Turns are strictly sequential. Before every turn the governor is asked for
//! a fresh budget state, and after every turn the per-battle ceiling is
//! checked. The battle record is written to the store exactly once, when it
//! reaches a terminal state.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use arena_core::budget::BudgetState;
use arena_core::config::AppConfig;
use arena_core::domain::battle::{
    AbortReason, Battle, BattleId, BattleRunResult, Speaker, Utterance,
};
use arena_core::domain::ledger::{LedgerEntryKind, LedgerTags};
use arena_core::domain::persona::{Persona, PersonaId};
use arena_core::errors::ApplicationError;
use arena_core::flows::{BattleAction, BattleEvent, BattleState, FlowTransitionError};
use arena_db::repositories::{BattleRepository, PersonaRepository, RepositoryError};

use crate::accountant::{CostAccountant, LedgerWriteError};
use crate::gateway::{CompletionGateway, TurnRequest};
use crate::governor::BudgetGovernor;
use crate::notify::{self, KillSwitchAlert, Notifier};
use crate::referee::{Referee, RefereeError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BattleSettings {
    pub max_turns: u32,
    pub audit_enabled: bool,
}

impl Default for BattleSettings {
    fn default() -> Self {
        Self { max_turns: 15, audit_enabled: true }
    }
}

impl From<&AppConfig> for BattleSettings {
    fn from(config: &AppConfig) -> Self {
        Self { max_turns: config.battle.max_turns, audit_enabled: config.referee.audit_enabled }
    }
}

#[derive(Debug, Error)]
pub enum BattleError {
    #[error("persona `{0}` does not exist")]
    PersonaNotFound(PersonaId),
    #[error("persona `{0}` is not active")]
    PersonaInactive(PersonaId),
    #[error("persona lookup failed: {0}")]
    PersonaLookup(#[source] RepositoryError),
    #[error(transparent)]
    Ledger(#[from] LedgerWriteError),
    #[error("battle `{battle_id}` could not be persisted: {source}")]
    Persistence {
        battle_id: BattleId,
        cost: Decimal,
        #[source]
        source: RepositoryError,
    },
    #[error("battle `{battle_id}` could not be graded: {message}")]
    GradingFailed { battle_id: BattleId, cost: Decimal, message: String },
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
}

impl BattleError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::PersonaNotFound(_) | Self::PersonaInactive(_) => "persona_unavailable",
            Self::PersonaLookup(_) | Self::Persistence { .. } => "persistence",
            Self::Ledger(_) => "ledger_write",
            Self::GradingFailed { .. } => "grading_failed",
            Self::Flow(_) => "domain_validation",
        }
    }

    /// Spend already written to the ledger by a battle that reached a
    /// terminal state before failing.
    pub fn spent(&self) -> Decimal {
        match self {
            Self::GradingFailed { cost, .. } | Self::Persistence { cost, .. } => *cost,
            _ => Decimal::ZERO,
        }
    }
}

impl From<&BattleError> for ApplicationError {
    fn from(error: &BattleError) -> Self {
        match error {
            BattleError::PersonaLookup(_) | BattleError::Persistence { .. } => {
                ApplicationError::Persistence(error.to_string())
            }
            BattleError::Ledger(_) => ApplicationError::LedgerWrite(error.to_string()),
            BattleError::Flow(flow) => ApplicationError::Domain(flow.clone().into()),
            BattleError::PersonaNotFound(_)
            | BattleError::PersonaInactive(_)
            | BattleError::GradingFailed { .. } => ApplicationError::Integration(error.to_string()),
        }
    }
}

pub struct BattleRunner {
    personas: Arc<dyn PersonaRepository>,
    battles: Arc<dyn BattleRepository>,
    gateway: Arc<dyn CompletionGateway>,
    accountant: Arc<CostAccountant>,
    governor: Arc<BudgetGovernor>,
    referee: Arc<Referee>,
    notifier: Arc<dyn Notifier>,
    settings: BattleSettings,
}

impl BattleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        personas: Arc<dyn PersonaRepository>,
        battles: Arc<dyn BattleRepository>,
        gateway: Arc<dyn CompletionGateway>,
        accountant: Arc<CostAccountant>,
        governor: Arc<BudgetGovernor>,
        referee: Arc<Referee>,
        notifier: Arc<dyn Notifier>,
        settings: BattleSettings,
    ) -> Self {
        Self { personas, battles, gateway, accountant, governor, referee, notifier, settings }
    }

    pub fn governor(&self) -> &BudgetGovernor {
        &self.governor
    }

    pub async fn run_battle(&self, persona_id: &PersonaId) -> Result<BattleRunResult, BattleError> {
        let persona = self
            .personas
            .find_by_id(persona_id)
            .await
            .map_err(BattleError::PersonaLookup)?
            .ok_or_else(|| BattleError::PersonaNotFound(persona_id.clone()))?;
        if !persona.active {
            return Err(BattleError::PersonaInactive(persona_id.clone()));
        }

        let mut battle = Battle::new(persona.id.clone(), persona.name.clone(), self.settings.max_turns);
        info!(
            event_name = "battle.started",
            battle_id = %battle.id,
            persona_id = %persona.id,
            correlation_id = %battle.id,
            max_turns = battle.max_turns,
            "battle started"
        );

        battle.apply(BattleEvent::Start)?;
        self.run_dialogue(&mut battle, &persona).await?;

        let mut grading_failure = None;
        if battle.state == BattleState::Grading {
            grading_failure = self.grade(&mut battle).await?;
        }

        self.persist(&battle).await?;

        info!(
            event_name = "battle.finished",
            battle_id = %battle.id,
            persona_id = %battle.persona_id,
            correlation_id = %battle.id,
            state = battle.state.as_str(),
            turns = battle.turn_count(),
            cost = %battle.cost,
            aggregate_score = battle
                .verdict
                .as_ref()
                .map(|verdict| verdict.aggregate_score.to_string())
                .unwrap_or_default(),
            abort_reason = battle.abort_reason.as_ref().map(AbortReason::as_str).unwrap_or(""),
            "battle finished"
        );

        match grading_failure {
            Some(message) => {
                Err(BattleError::GradingFailed { battle_id: battle.id, cost: battle.cost, message })
            }
            None => Ok(BattleRunResult::from(battle)),
        }
    }

    async fn run_dialogue(&self, battle: &mut Battle, persona: &Persona) -> Result<(), BattleError> {
        let policy = self.governor.policy().clone();

        while let Some(speaker) = battle.next_speaker() {
            let budget = self.governor.current_state().await;
            let tier = match speaker {
                Speaker::Closer => budget.closer_tier(),
                Speaker::Persona => budget.persona_tier(&policy),
            };
            let Some(tier) = tier else {
                self.abort(battle, AbortReason::DailyCapExceeded)?;
                return Ok(());
            };

            let turn_index = battle.turn_count();
            let request = TurnRequest {
                battle_id: battle.id.clone(),
                speaker,
                tier,
                persona: persona.clone(),
                transcript: battle.transcript.clone(),
                turn_index,
                max_turns: battle.max_turns,
            };

            let reply = match self.gateway.generate_turn(request).await {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(
                        event_name = "battle.gateway_failed",
                        battle_id = %battle.id,
                        correlation_id = %battle.id,
                        turn_index,
                        speaker = speaker.as_str(),
                        error = %error,
                        "completion call failed, aborting battle"
                    );
                    self.abort(battle, AbortReason::GatewayFailure { message: error.to_string() })?;
                    return Ok(());
                }
            };

            let entry = self
                .accountant
                .charge(
                    self.gateway.provider(),
                    &reply.model,
                    tier,
                    reply.usage,
                    LedgerTags {
                        battle_id: Some(battle.id.clone()),
                        turn_index: Some(turn_index),
                        kind: LedgerEntryKind::Turn,
                    },
                )
                .await?;

            battle.record_utterance(Utterance {
                speaker,
                text: reply.text,
                turn_index,
                model_tier: tier,
                usage: reply.usage,
                cost: entry.cost,
            });

            if policy.battle_ceiling_reached(battle.cost) {
                warn!(
                    event_name = "battle.ceiling_reached",
                    battle_id = %battle.id,
                    correlation_id = %battle.id,
                    turn_index,
                    spent = %battle.cost,
                    ceiling = %policy.per_battle_ceiling,
                    "per-battle ceiling reached, aborting battle"
                );
                let reason = AbortReason::PerBattleCeiling {
                    spent: battle.cost,
                    ceiling: policy.per_battle_ceiling,
                };
                self.abort(battle, reason)?;
                return Ok(());
            }

            let event = if reply.ends_conversation {
                BattleEvent::ConversationConcluded
            } else {
                BattleEvent::TurnCompleted
            };
            battle.apply(event)?;
        }

        Ok(())
    }

    /// Grades a battle sitting in `Grading`. Returns the failure message when
    /// the verdict was unusable; the battle is then aborted but still persisted.
    async fn grade(&self, battle: &mut Battle) -> Result<Option<String>, BattleError> {
        let budget = self.governor.current_state().await;
        let Some(tier) = budget.referee_tier() else {
            self.abort(battle, AbortReason::DailyCapExceeded)?;
            return Ok(None);
        };

        let graded =
            match self.referee.grade(&battle.id, &battle.persona_name, &battle.transcript, tier).await
            {
                Ok(graded) => graded,
                Err(RefereeError::Ledger(error)) => return Err(error.into()),
                Err(RefereeError::Gateway(error)) => {
                    self.abort(battle, AbortReason::GatewayFailure { message: error.to_string() })?;
                    return Ok(None);
                }
                Err(RefereeError::MalformedVerdict { message, usage, cost }) => {
                    battle.add_overhead(usage, cost);
                    self.abort(battle, AbortReason::GradingFailed { message: message.clone() })?;
                    return Ok(Some(message));
                }
            };

        battle.add_overhead(graded.usage, graded.cost);
        battle.verdict = Some(graded.verdict);

        if self.settings.audit_enabled && budget.audit_enabled() {
            self.audit(battle, &budget).await?;
        }

        battle.apply(BattleEvent::VerdictRecorded)?;
        Ok(None)
    }

    async fn audit(&self, battle: &mut Battle, budget: &BudgetState) -> Result<(), BattleError> {
        let Some(tier) = budget.referee_tier() else {
            return Ok(());
        };
        match self.referee.audit(&battle.id, &battle.persona_name, &battle.transcript, tier).await {
            Ok(note) => {
                battle.add_overhead(note.usage, note.cost);
                battle.audit_note = Some(note.note);
                Ok(())
            }
            Err(RefereeError::Ledger(error)) => Err(error.into()),
            Err(error) => {
                warn!(
                    event_name = "battle.audit_skipped",
                    battle_id = %battle.id,
                    correlation_id = %battle.id,
                    error = %error,
                    "audit note unavailable"
                );
                Ok(())
            }
        }
    }

    fn abort(&self, battle: &mut Battle, reason: AbortReason) -> Result<(), BattleError> {
        let outcome = battle.apply(BattleEvent::Abort(reason.clone()))?;
        if outcome.actions.contains(&BattleAction::NotifyOperator) {
            notify::dispatch(
                Arc::clone(&self.notifier),
                KillSwitchAlert {
                    battle_id: battle.id.clone(),
                    persona_id: battle.persona_id.clone(),
                    reason,
                    battle_cost: battle.cost,
                    occurred_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    async fn persist(&self, battle: &Battle) -> Result<(), BattleError> {
        self.battles.save(battle.clone()).await.map_err(|source| BattleError::Persistence {
            battle_id: battle.id.clone(),
            cost: battle.cost,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use arena_core::budget::BudgetPolicy;
    use arena_core::cost::{PriceTable, TierPrice};
    use arena_core::domain::battle::{AbortReason, EndReason, Speaker};
    use arena_core::domain::ledger::{LedgerEntryKind, TokenUsage};
    use arena_core::domain::persona::{Persona, PersonaId};
    use arena_core::domain::tier::ModelTier;
    use arena_core::flows::BattleState;
    use arena_core::retry::RetrySchedule;
    use arena_core::rubric::Rubric;
    use arena_db::repositories::{
        BattleRepository, InMemoryBattleRepository, InMemoryLedgerRepository,
        InMemoryPersonaRepository,
    };

    use super::{BattleError, BattleRunner, BattleSettings};
    use crate::accountant::CostAccountant;
    use crate::governor::BudgetGovernor;
    use crate::notify::testing::RecordingNotifier;
    use crate::referee::Referee;
    use crate::scripted::{RecordedCall, Script, ScriptedGateway};

    struct Harness {
        runner: BattleRunner,
        gateway: Arc<ScriptedGateway>,
        ledger: Arc<InMemoryLedgerRepository>,
        battles: Arc<InMemoryBattleRepository>,
        notifier: Arc<RecordingNotifier>,
    }

    fn persona(id: &str, active: bool) -> Persona {
        Persona {
            id: PersonaId(id.to_string()),
            name: "Budget-conscious CFO".to_string(),
            instruction: "Object to price twice before considering anything.".to_string(),
            active,
        }
    }

    /// Output tokens only: premium $1000/M, economy $500/M.
    fn output_only_prices() -> PriceTable {
        PriceTable {
            premium: TierPrice::new(Decimal::ZERO, Decimal::from(1_000)),
            economy: TierPrice::new(Decimal::ZERO, Decimal::from(500)),
        }
    }

    fn harness(
        script: Script,
        prices: PriceTable,
        policy: BudgetPolicy,
        settings: BattleSettings,
    ) -> Harness {
        let gateway = Arc::new(ScriptedGateway::new(script));
        let ledger = Arc::new(InMemoryLedgerRepository::default());
        let battles = Arc::new(InMemoryBattleRepository::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let personas = Arc::new(InMemoryPersonaRepository::with_personas([
            persona("P-CFO", true),
            persona("P-RETIRED", false),
        ]));
        let accountant = Arc::new(CostAccountant::new(
            ledger.clone(),
            prices,
            RetrySchedule::new(2, Duration::from_millis(1)),
        ));
        let governor = Arc::new(BudgetGovernor::new(ledger.clone(), policy));
        let referee = Arc::new(Referee::new(gateway.clone(), accountant.clone(), Rubric::default()));

        let runner = BattleRunner::new(
            personas,
            battles.clone(),
            gateway.clone(),
            accountant,
            governor,
            referee,
            notifier.clone(),
            settings,
        );
        Harness { runner, gateway, ledger, battles, notifier }
    }

    fn default_harness() -> Harness {
        harness(
            Script::default(),
            PriceTable::default(),
            BudgetPolicy::default(),
            BattleSettings { max_turns: 6, audit_enabled: true },
        )
    }

    #[tokio::test]
    async fn battle_alternates_closer_first_and_respects_turn_cap() {
        let h = default_harness();

        let result = h.runner.run_battle(&PersonaId("P-CFO".to_string())).await.expect("battle");

        assert_eq!(result.state, BattleState::Completed);
        assert_eq!(result.transcript.len(), 6);
        assert_eq!(result.end_reason, Some(EndReason::TurnCap));
        for (index, utterance) in result.transcript.iter().enumerate() {
            let expected = if index % 2 == 0 { Speaker::Closer } else { Speaker::Persona };
            assert_eq!(utterance.speaker, expected);
            assert_eq!(utterance.turn_index as usize, index);
        }
        assert_eq!(result.aggregate_score(), Some(Decimal::new(700, 1)));
    }

    #[tokio::test]
    async fn every_turn_sees_the_full_transcript() {
        let h = default_harness();
        h.runner.run_battle(&PersonaId("P-CFO".to_string())).await.expect("battle");

        let lengths: Vec<usize> = h
            .gateway
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Turn { transcript_len, .. } => Some(transcript_len),
                _ => None,
            })
            .collect();
        assert_eq!(lengths, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn ledger_holds_turns_referee_and_summary_and_matches_battle_cost() {
        let h = default_harness();
        let result = h.runner.run_battle(&PersonaId("P-CFO".to_string())).await.expect("battle");

        let entries = h.ledger.snapshot().await;
        let kinds: Vec<_> = entries.iter().map(|entry| entry.tags.kind).collect();
        assert_eq!(kinds.iter().filter(|kind| **kind == LedgerEntryKind::Turn).count(), 6);
        assert_eq!(kinds.iter().filter(|kind| **kind == LedgerEntryKind::Referee).count(), 1);
        assert_eq!(kinds.iter().filter(|kind| **kind == LedgerEntryKind::Summary).count(), 1);

        let ledger_total: Decimal = entries.iter().map(|entry| entry.cost).sum();
        assert_eq!(ledger_total, result.cost);

        let stored = h.battles.find_by_id(&result.battle_id).await.expect("find").expect("saved");
        assert!(stored.audit_note.is_some());
        assert_eq!(h.battles.save_count(), 1);
    }

    #[tokio::test]
    async fn natural_conclusion_ends_battle_before_turn_cap() {
        let h = harness(
            Script { end_on_turn: Some(3), ..Script::default() },
            PriceTable::default(),
            BudgetPolicy::default(),
            BattleSettings { max_turns: 15, audit_enabled: false },
        );

        let result = h.runner.run_battle(&PersonaId("P-CFO".to_string())).await.expect("battle");

        assert_eq!(result.state, BattleState::Completed);
        assert_eq!(result.transcript.len(), 4);
        assert_eq!(result.end_reason, Some(EndReason::NaturalConclusion));
    }

    #[tokio::test]
    async fn per_battle_ceiling_aborts_after_crossing_turn() {
        // 1_700 output tokens at $1000/M = $1.70 per turn; $5.10 after the third.
        let script = Script {
            closer_usage: TokenUsage::new(0, 1_700),
            persona_usage: TokenUsage::new(0, 1_700),
            ..Script::default()
        };
        let h = harness(
            script,
            output_only_prices(),
            BudgetPolicy { daily_cap: Decimal::from(100), ..BudgetPolicy::default() },
            BattleSettings { max_turns: 15, audit_enabled: true },
        );

        let result = h.runner.run_battle(&PersonaId("P-CFO".to_string())).await.expect("battle");

        assert_eq!(result.state, BattleState::Aborted);
        assert_eq!(result.transcript.len(), 3);
        assert_eq!(
            result.abort_reason,
            Some(AbortReason::PerBattleCeiling {
                spent: Decimal::new(510, 2),
                ceiling: Decimal::new(500, 2),
            })
        );
        assert_eq!(result.verdict, None);

        let entries = h.ledger.snapshot().await;
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|entry| entry.tags.kind == LedgerEntryKind::Turn));

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.notifier.alerts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn exceeded_budget_aborts_before_first_dispatch() {
        let h = default_harness();
        h.ledger.set_reads_unavailable(true);

        let result = h.runner.run_battle(&PersonaId("P-CFO".to_string())).await.expect("battle");

        assert_eq!(result.state, BattleState::Aborted);
        assert_eq!(result.abort_reason, Some(AbortReason::DailyCapExceeded));
        assert!(result.transcript.is_empty());
        assert!(h.gateway.calls().is_empty());
        assert_eq!(h.battles.save_count(), 1);
    }

    #[tokio::test]
    async fn gateway_failure_aborts_battle_without_error() {
        let h = default_harness();
        h.gateway.fail_next_turns(1);

        let result = h.runner.run_battle(&PersonaId("P-CFO".to_string())).await.expect("battle");

        assert_eq!(result.state, BattleState::Aborted);
        assert!(matches!(result.abort_reason, Some(AbortReason::GatewayFailure { .. })));
        assert!(h.ledger.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn ledger_write_failure_propagates_and_nothing_is_persisted() {
        let h = default_harness();
        h.ledger.fail_next_appends(10);

        let error = h
            .runner
            .run_battle(&PersonaId("P-CFO".to_string()))
            .await
            .expect_err("ledger failure is fatal");

        assert!(matches!(error, BattleError::Ledger(_)));
        assert_eq!(h.battles.save_count(), 0);
    }

    #[tokio::test]
    async fn malformed_verdict_persists_aborted_battle_and_errors() {
        let h = harness(
            Script { malformed_verdict: true, ..Script::default() },
            PriceTable::default(),
            BudgetPolicy::default(),
            BattleSettings { max_turns: 2, audit_enabled: true },
        );

        let error = h
            .runner
            .run_battle(&PersonaId("P-CFO".to_string()))
            .await
            .expect_err("grading failure");

        assert_eq!(error.error_class(), "grading_failed");
        let spent = error.spent();
        let battle_id = match error {
            BattleError::GradingFailed { battle_id, .. } => battle_id,
            other => panic!("unexpected error: {other}"),
        };
        let stored = h.battles.find_by_id(&battle_id).await.expect("find").expect("persisted");
        let ledger_total: Decimal = h.ledger.snapshot().await.iter().map(|entry| entry.cost).sum();
        assert!(spent > Decimal::ZERO);
        assert_eq!(spent, ledger_total);
        assert_eq!(stored.cost, spent);
        assert_eq!(stored.state, BattleState::Aborted);
        assert_eq!(stored.verdict, None);
        assert!(matches!(stored.abort_reason, Some(AbortReason::GradingFailed { .. })));

        let referee_entries = h
            .ledger
            .snapshot()
            .await
            .into_iter()
            .filter(|entry| entry.tags.kind == LedgerEntryKind::Referee)
            .count();
        assert_eq!(referee_entries, 1);
    }

    #[tokio::test]
    async fn failed_save_reports_spend_already_logged() {
        let h = default_harness();
        h.battles.fail_next_saves(1);

        let error = h
            .runner
            .run_battle(&PersonaId("P-CFO".to_string()))
            .await
            .expect_err("save failure");

        assert!(matches!(error, BattleError::Persistence { .. }));
        let ledger_total: Decimal = h.ledger.snapshot().await.iter().map(|entry| entry.cost).sum();
        assert!(ledger_total > Decimal::ZERO);
        assert_eq!(error.spent(), ledger_total);
        assert_eq!(h.battles.save_count(), 1);
        assert!(h.battles.all().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_and_inactive_personas_are_rejected() {
        let h = default_harness();

        let missing = h.runner.run_battle(&PersonaId("P-NOPE".to_string())).await;
        assert!(matches!(missing, Err(BattleError::PersonaNotFound(_))));

        let retired = h.runner.run_battle(&PersonaId("P-RETIRED".to_string())).await;
        assert!(matches!(retired, Err(BattleError::PersonaInactive(_))));
    }

    #[tokio::test]
    async fn throttled_budget_grades_with_economy_and_skips_audit() {
        // 175 output tokens per turn, two turns: $0.35 dialogue, $0.05 premium grade.
        let script = Script {
            closer_usage: TokenUsage::new(0, 175),
            persona_usage: TokenUsage::new(0, 175),
            grade_usage: TokenUsage::new(0, 50),
            audit_usage: TokenUsage::new(0, 50),
            ..Script::default()
        };
        let h = harness(
            script,
            output_only_prices(),
            BudgetPolicy::default(),
            BattleSettings { max_turns: 2, audit_enabled: false },
        );
        let persona_id = PersonaId("P-CFO".to_string());

        for _ in 0..10 {
            let result = h.runner.run_battle(&persona_id).await.expect("battle");
            assert_eq!(result.state, BattleState::Completed);
        }

        let mut expected = vec![ModelTier::Premium; 7];
        expected.extend(vec![ModelTier::Economy; 3]);
        assert_eq!(h.gateway.grade_tiers(), expected);

        let dialogue_tiers: Vec<_> = h
            .gateway
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Turn { tier, .. } => Some(tier),
                _ => None,
            })
            .collect();
        assert!(dialogue_tiers.iter().all(|tier| *tier == ModelTier::Premium));
    }

    #[tokio::test]
    async fn persona_degrades_only_when_opted_in() {
        let script = Script {
            closer_usage: TokenUsage::new(0, 175),
            persona_usage: TokenUsage::new(0, 175),
            ..Script::default()
        };
        let policy = BudgetPolicy {
            daily_cap: Decimal::ONE,
            per_battle_ceiling: Decimal::ONE,
            persona_degrades_under_throttle: true,
            ..BudgetPolicy::default()
        };
        // Throttle line is $0.20. The persona's first turn sees $0.175 spent,
        // its second sees $0.525.
        let h = harness(
            script,
            output_only_prices(),
            policy,
            BattleSettings { max_turns: 4, audit_enabled: false },
        );

        let _ = h.runner.run_battle(&PersonaId("P-CFO".to_string())).await;

        let turn_tiers: Vec<_> = h
            .gateway
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Turn { speaker, tier, .. } => Some((speaker, tier)),
                _ => None,
            })
            .collect();
        assert_eq!(turn_tiers[0], (Speaker::Closer, ModelTier::Premium));
        assert_eq!(turn_tiers[1], (Speaker::Persona, ModelTier::Premium));
        assert_eq!(turn_tiers[2], (Speaker::Closer, ModelTier::Premium));
        assert_eq!(turn_tiers[3], (Speaker::Persona, ModelTier::Economy));
    }
}
