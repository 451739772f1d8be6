//! Deterministic gateway used by tests and `--dry-run`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use arena_core::domain::battle::Speaker;
use arena_core::domain::ledger::TokenUsage;
use arena_core::domain::tier::ModelTier;

use crate::gateway::{
    AuditReply, AuditRequest, CompletionGateway, GatewayError, GradeReply, GradeRequest,
    TurnReply, TurnRequest,
};

const CLOSER_LINES: &[&str] = &[
    "Hi, this is Sam from Northwind. Do you have two minutes to talk about your renewal?",
    "Understood. What does your current process cost you each quarter?",
    "That's fair. Teams like yours usually recover that within a month. What would it take to try it?",
    "If I can get you a pilot at no cost for thirty days, could we book thirty minutes with your lead?",
    "Great. I'll send the invite for Thursday at ten. Does that work?",
];

const PERSONA_LINES: &[&str] = &[
    "I'm busy. What is this about?",
    "We already have a vendor and honestly the budget is spent.",
    "Every vendor says that. Why would you be different?",
    "Maybe. I'd need my team lead to sign off on anything.",
    "Fine, send something over and we'll see.",
];

#[derive(Clone, Debug)]
pub struct Script {
    pub closer_usage: TokenUsage,
    pub persona_usage: TokenUsage,
    pub grade_usage: TokenUsage,
    pub audit_usage: TokenUsage,
    /// Score given to every rubric criterion.
    pub criterion_score: u8,
    /// Zero-based turn whose reply ends the conversation.
    pub end_on_turn: Option<u32>,
    pub malformed_verdict: bool,
    pub turn_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            closer_usage: TokenUsage::new(600, 60),
            persona_usage: TokenUsage::new(650, 45),
            grade_usage: TokenUsage::new(1_400, 90),
            audit_usage: TokenUsage::new(1_300, 70),
            criterion_score: 7,
            end_on_turn: None,
            malformed_verdict: false,
            turn_delay: Duration::ZERO,
        }
    }
}

/// A call observed by the scripted gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    Turn { persona_id: String, speaker: Speaker, tier: ModelTier, transcript_len: usize },
    Grade { tier: ModelTier },
    Audit { tier: ModelTier },
}

#[derive(Default)]
struct ScriptState {
    calls: Vec<RecordedCall>,
    failing_turns: u32,
    failing_turns_by_persona: HashMap<String, u32>,
}

pub struct ScriptedGateway {
    script: Script,
    state: Mutex<ScriptState>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new(Script::default())
    }
}

impl ScriptedGateway {
    pub fn new(script: Script) -> Self {
        Self { script, state: Mutex::new(ScriptState::default()) }
    }

    /// The next `count` turn calls fail with a transport error.
    pub fn fail_next_turns(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_turns = count;
        }
    }

    /// The next `count` turn calls for one persona fail with a transport error.
    pub fn fail_turns_for_persona(&self, persona_id: &str, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_turns_by_persona.insert(persona_id.to_string(), count);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().map(|state| state.calls.clone()).unwrap_or_default()
    }

    pub fn grade_tiers(&self) -> Vec<ModelTier> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Grade { tier } => Some(tier),
                _ => None,
            })
            .collect()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ScriptState) -> T) -> Result<T, GatewayError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GatewayError::Transport("scripted gateway state poisoned".to_string()))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn generate_turn(&self, request: TurnRequest) -> Result<TurnReply, GatewayError> {
        if !self.script.turn_delay.is_zero() {
            tokio::time::sleep(self.script.turn_delay).await;
        }

        let persona_id = request.persona.id.0.clone();
        let should_fail = self.with_state(|state| {
            state.calls.push(RecordedCall::Turn {
                persona_id: persona_id.clone(),
                speaker: request.speaker,
                tier: request.tier,
                transcript_len: request.transcript.len(),
            });
            if let Some(remaining) = state.failing_turns_by_persona.get_mut(&persona_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return true;
                }
            }
            if state.failing_turns > 0 {
                state.failing_turns -= 1;
                return true;
            }
            false
        })?;
        if should_fail {
            return Err(GatewayError::Transport("scripted connection reset".to_string()));
        }

        let index = usize::try_from(request.turn_index / 2).unwrap_or(usize::MAX);
        let (lines, usage) = match request.speaker {
            Speaker::Closer => (CLOSER_LINES, self.script.closer_usage),
            Speaker::Persona => (PERSONA_LINES, self.script.persona_usage),
        };
        let text = lines[index.min(lines.len() - 1)].to_string();

        Ok(TurnReply {
            text,
            usage,
            ends_conversation: self.script.end_on_turn == Some(request.turn_index),
            model: format!("scripted-{}", request.tier),
        })
    }

    async fn grade_transcript(&self, request: GradeRequest) -> Result<GradeReply, GatewayError> {
        self.with_state(|state| state.calls.push(RecordedCall::Grade { tier: request.tier }))?;

        let raw = if self.script.malformed_verdict {
            "I think the closer did fine overall.".to_string()
        } else {
            let scores = request
                .rubric
                .criteria
                .iter()
                .map(|criterion| {
                    (criterion.key.clone(), serde_json::Value::from(self.script.criterion_score))
                })
                .collect::<serde_json::Map<String, serde_json::Value>>();
            serde_json::json!({
                "scores": scores,
                "rationale": format!(
                    "Graded {} turns against {}.",
                    request.transcript.len(),
                    request.persona_name
                ),
            })
            .to_string()
        };

        Ok(GradeReply {
            raw,
            usage: self.script.grade_usage,
            model: format!("scripted-{}", request.tier),
        })
    }

    async fn audit_transcript(&self, request: AuditRequest) -> Result<AuditReply, GatewayError> {
        self.with_state(|state| state.calls.push(RecordedCall::Audit { tier: request.tier }))?;

        Ok(AuditReply {
            note: format!(
                "Closer kept the call with {} going for {} turns.",
                request.persona_name,
                request.transcript.len()
            ),
            usage: self.script.audit_usage,
            model: format!("scripted-{}", request.tier),
        })
    }
}
