use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use arena_core::domain::persona::{Persona, PersonaId};

use super::{PersonaRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPersonaRepository {
    pool: DbPool,
}

impl SqlPersonaRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PersonaRepository for SqlPersonaRepository {
    async fn find_by_id(&self, id: &PersonaId) -> Result<Option<Persona>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, instruction, active
             FROM persona
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(persona_from_row).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Persona>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, instruction, active
             FROM persona
             WHERE active = 1
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(persona_from_row).collect()
    }

    async fn save(&self, persona: Persona) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO persona (id, name, instruction, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                instruction = excluded.instruction,
                active = excluded.active,
                updated_at = excluded.updated_at",
        )
        .bind(&persona.id.0)
        .bind(&persona.name)
        .bind(&persona.instruction)
        .bind(i64::from(persona.active))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn persona_from_row(row: SqliteRow) -> Result<Persona, RepositoryError> {
    Ok(Persona {
        id: PersonaId(row.try_get("id")?),
        name: row.try_get("name")?,
        instruction: row.try_get("instruction")?,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}
