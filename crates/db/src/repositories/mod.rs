use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use arena_core::domain::battle::{Battle, BattleId};
use arena_core::domain::ledger::LedgerEntry;
use arena_core::domain::persona::{Persona, PersonaId};

pub mod battle;
pub mod ledger;
pub mod memory;
pub mod persona;

pub use battle::SqlBattleRepository;
pub use ledger::SqlLedgerRepository;
pub use memory::{InMemoryBattleRepository, InMemoryLedgerRepository, InMemoryPersonaRepository};
pub use persona::SqlPersonaRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PersonaRepository: Send + Sync {
    async fn find_by_id(&self, id: &PersonaId) -> Result<Option<Persona>, RepositoryError>;
    /// Active personas ordered by id.
    async fn list_active(&self) -> Result<Vec<Persona>, RepositoryError>;
    async fn save(&self, persona: Persona) -> Result<(), RepositoryError>;
}

/// Append-only cost ledger. There is no update or delete path.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn append(&self, entry: LedgerEntry) -> Result<(), RepositoryError>;
    /// Entries whose `recorded_at` falls on the given UTC day, oldest first.
    async fn entries_for_day(&self, day: NaiveDate) -> Result<Vec<LedgerEntry>, RepositoryError>;
}

#[async_trait]
pub trait BattleRepository: Send + Sync {
    async fn find_by_id(&self, id: &BattleId) -> Result<Option<Battle>, RepositoryError>;
    async fn save(&self, battle: Battle) -> Result<(), RepositoryError>;
}
