//! Boundary to the metered completion service.
//!
//! The orchestrator and referee only ever talk to [`CompletionGateway`]; the
//! HTTP client and the deterministic script both sit behind it.

use async_trait::async_trait;
use thiserror::Error;

use arena_core::domain::battle::{BattleId, Speaker, Utterance};
use arena_core::domain::ledger::TokenUsage;
use arena_core::domain::persona::Persona;
use arena_core::domain::tier::ModelTier;
use arena_core::rubric::Rubric;

#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub battle_id: BattleId,
    pub speaker: Speaker,
    pub tier: ModelTier,
    pub persona: Persona,
    /// Full transcript so far; the reply continues it.
    pub transcript: Vec<Utterance>,
    pub turn_index: u32,
    pub max_turns: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    pub usage: TokenUsage,
    /// The speaker hung up or signed off.
    pub ends_conversation: bool,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct GradeRequest {
    pub battle_id: BattleId,
    pub tier: ModelTier,
    pub persona_name: String,
    pub transcript: Vec<Utterance>,
    pub rubric: Rubric,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GradeReply {
    pub raw: String,
    pub usage: TokenUsage,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct AuditRequest {
    pub battle_id: BattleId,
    pub tier: ModelTier,
    pub persona_name: String,
    pub transcript: Vec<Utterance>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditReply {
    pub note: String,
    pub usage: TokenUsage,
    pub model: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("completion request timed out after {0}s")]
    Timeout(u64),
    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response could not be decoded: {0}")]
    InvalidResponse(String),
    #[error("gateway misconfigured: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Provider label written to every ledger entry.
    fn provider(&self) -> &str;

    async fn generate_turn(&self, request: TurnRequest) -> Result<TurnReply, GatewayError>;

    async fn grade_transcript(&self, request: GradeRequest) -> Result<GradeReply, GatewayError>;

    async fn audit_transcript(&self, request: AuditRequest) -> Result<AuditReply, GatewayError>;
}
