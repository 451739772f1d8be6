use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::NaiveDate;
use tokio::sync::RwLock;

use arena_core::domain::battle::{Battle, BattleId};
use arena_core::domain::ledger::LedgerEntry;
use arena_core::domain::persona::{Persona, PersonaId};

use super::{BattleRepository, LedgerRepository, PersonaRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryPersonaRepository {
    personas: RwLock<HashMap<String, Persona>>,
}

impl InMemoryPersonaRepository {
    pub fn with_personas(personas: impl IntoIterator<Item = Persona>) -> Self {
        Self {
            personas: RwLock::new(
                personas.into_iter().map(|persona| (persona.id.0.clone(), persona)).collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl PersonaRepository for InMemoryPersonaRepository {
    async fn find_by_id(&self, id: &PersonaId) -> Result<Option<Persona>, RepositoryError> {
        let personas = self.personas.read().await;
        Ok(personas.get(&id.0).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Persona>, RepositoryError> {
        let personas = self.personas.read().await;
        let mut active: Vec<Persona> =
            personas.values().filter(|persona| persona.active).cloned().collect();
        active.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(active)
    }

    async fn save(&self, persona: Persona) -> Result<(), RepositoryError> {
        let mut personas = self.personas.write().await;
        personas.insert(persona.id.0.clone(), persona);
        Ok(())
    }
}

/// Vec-backed ledger with switches for simulating an unavailable store.
#[derive(Default)]
pub struct InMemoryLedgerRepository {
    entries: RwLock<Vec<LedgerEntry>>,
    failing_appends: AtomicU32,
    reads_unavailable: AtomicBool,
}

impl InMemoryLedgerRepository {
    pub fn with_entries(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        Self { entries: RwLock::new(entries.into_iter().collect()), ..Self::default() }
    }

    /// The next `count` appends fail with `RepositoryError::Unavailable`.
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    pub fn set_reads_unavailable(&self, unavailable: bool) {
        self.reads_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait::async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn append(&self, entry: LedgerEntry) -> Result<(), RepositoryError> {
        let should_fail = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RepositoryError::Unavailable("ledger append rejected".to_string()));
        }

        let mut entries = self.entries.write().await;
        if entries.iter().any(|existing| existing.id == entry.id) {
            return Err(RepositoryError::Decode(format!(
                "ledger entry `{}` already exists",
                entry.id.0
            )));
        }
        entries.push(entry);
        Ok(())
    }

    async fn entries_for_day(&self, day: NaiveDate) -> Result<Vec<LedgerEntry>, RepositoryError> {
        if self.reads_unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("ledger read rejected".to_string()));
        }

        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| entry.ledger_day() == day).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryBattleRepository {
    battles: RwLock<HashMap<String, Battle>>,
    save_count: AtomicU32,
    failing_saves: AtomicU32,
}

impl InMemoryBattleRepository {
    pub async fn all(&self) -> Vec<Battle> {
        let battles = self.battles.read().await;
        let mut all: Vec<Battle> = battles.values().cloned().collect();
        all.sort_by(|left, right| left.started_at.cmp(&right.started_at));
        all
    }

    /// The next `count` saves fail with `RepositoryError::Unavailable`.
    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Total number of `save` calls, including overwrites and rejected saves.
    pub fn save_count(&self) -> u32 {
        self.save_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BattleRepository for InMemoryBattleRepository {
    async fn find_by_id(&self, id: &BattleId) -> Result<Option<Battle>, RepositoryError> {
        let battles = self.battles.read().await;
        Ok(battles.get(&id.0).cloned())
    }

    async fn save(&self, battle: Battle) -> Result<(), RepositoryError> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RepositoryError::Unavailable("battle save rejected".to_string()));
        }

        let mut battles = self.battles.write().await;
        battles.insert(battle.id.0.clone(), battle);
        Ok(())
    }
}
