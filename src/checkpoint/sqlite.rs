//! SQLite-backed checkpoint store.
//!
//! The identifier sets and the aux cache only ever grow, so each save inserts
//! just the entries this store has not written yet. Everything happens in one
//! transaction, which gives the same all-or-nothing guarantee as the file
//! store's rename.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{CHECKPOINT_VERSION, Checkpoint, CheckpointError, CursorStore};
use crate::cursor::Cursor;
use crate::db::Database;

/// Keys already present in the database.
#[derive(Debug, Default)]
struct Persisted {
    seen_ids: HashSet<String>,
    completed_entities: HashSet<String>,
    aux_keys: HashSet<String>,
}

/// Entries of one save that are not in the database yet.
struct Pending {
    seen_ids: Vec<String>,
    completed_entities: Vec<String>,
    aux: Vec<(String, String)>,
}

/// Checkpoint store backed by a SQLite database.
#[derive(Debug)]
pub struct SqliteCursorStore {
    db: Database,
    persisted: Mutex<Persisted>,
}

impl SqliteCursorStore {
    /// Opens (creating if needed) the checkpoint database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Open`] if the database cannot be opened or
    /// migrated.
    pub async fn open(path: &Path) -> Result<Self, CheckpointError> {
        let db = Database::new(path).await?;
        Ok(Self::from_database(db))
    }

    /// Wraps an already opened database.
    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self {
            db,
            persisted: Mutex::new(Persisted::default()),
        }
    }

    /// Returns the underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn pending(&self, checkpoint: &Checkpoint) -> Result<Pending, CheckpointError> {
        let persisted = self.persisted.lock().map_err(|_| CheckpointError::Corrupt {
            path: "sqlite".to_string(),
            reason: "persisted key cache poisoned".to_string(),
        })?;

        let seen_ids = checkpoint
            .seen_ids
            .iter()
            .filter(|id| !persisted.seen_ids.contains(*id))
            .cloned()
            .collect();
        let completed_entities = checkpoint
            .completed_entities
            .iter()
            .filter(|id| !persisted.completed_entities.contains(*id))
            .cloned()
            .collect();
        let aux = checkpoint
            .aux_cache
            .iter()
            .filter(|(key, _)| !persisted.aux_keys.contains(*key))
            .map(|(key, value)| Ok((key.clone(), serde_json::to_string(value)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()
            .map_err(CheckpointError::Encode)?;

        Ok(Pending {
            seen_ids,
            completed_entities,
            aux,
        })
    }

    fn remember(&self, pending: Pending) {
        if let Ok(mut persisted) = self.persisted.lock() {
            persisted.seen_ids.extend(pending.seen_ids);
            persisted.completed_entities.extend(pending.completed_entities);
            persisted
                .aux_keys
                .extend(pending.aux.into_iter().map(|(key, _)| key));
        }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let pool = self.db.pool();

        let meta: Option<(i64, Option<String>)> =
            sqlx::query_as(r"SELECT version, cursor FROM checkpoint_meta WHERE id = 1")
                .fetch_optional(pool)
                .await?;
        let Some((version, cursor)) = meta else {
            debug!("no checkpoint row");
            return Ok(None);
        };

        let version = u32::try_from(version).map_err(|_| CheckpointError::Corrupt {
            path: "checkpoint_meta".to_string(),
            reason: format!("invalid version {version}"),
        })?;
        let mut checkpoint = Checkpoint::new(cursor.as_deref().map(Cursor::parse).transpose()?);
        checkpoint.version = version;
        checkpoint.ensure_supported()?;

        let seen: Vec<(String,)> = sqlx::query_as(r"SELECT id FROM seen_ids")
            .fetch_all(pool)
            .await?;
        checkpoint.seen_ids = seen.into_iter().map(|(id,)| id).collect();

        let completed: Vec<(String,)> = sqlx::query_as(r"SELECT id FROM completed_entities")
            .fetch_all(pool)
            .await?;
        checkpoint.completed_entities = completed.into_iter().map(|(id,)| id).collect();

        let aux: Vec<(String, String)> = sqlx::query_as(r"SELECT group_key, value FROM aux_cache")
            .fetch_all(pool)
            .await?;
        for (key, raw) in aux {
            let value: Value = serde_json::from_str(&raw).map_err(|e| CheckpointError::Corrupt {
                path: "aux_cache".to_string(),
                reason: format!("value for '{key}': {e}"),
            })?;
            checkpoint.aux_cache.insert(key, value);
        }

        if let Ok(mut persisted) = self.persisted.lock() {
            persisted.seen_ids = checkpoint.seen_ids.iter().cloned().collect();
            persisted.completed_entities = checkpoint.completed_entities.iter().cloned().collect();
            persisted.aux_keys = checkpoint.aux_cache.keys().cloned().collect();
        }

        debug!(
            seen = checkpoint.seen_ids.len(),
            completed = checkpoint.completed_entities.len(),
            cached = checkpoint.aux_cache.len(),
            "checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    #[instrument(skip(self, checkpoint))]
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let pending = self.pending(checkpoint)?;
        let cursor = checkpoint.cursor.as_ref().map(|c| c.as_str().to_string());

        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r"INSERT INTO checkpoint_meta (id, version, cursor, updated_at)
              VALUES (1, ?, ?, datetime('now'))
              ON CONFLICT(id) DO UPDATE SET
                  version = excluded.version,
                  cursor = excluded.cursor,
                  updated_at = excluded.updated_at",
        )
        .bind(i64::from(CHECKPOINT_VERSION))
        .bind(cursor)
        .execute(&mut *tx)
        .await?;

        for id in &pending.seen_ids {
            sqlx::query(r"INSERT OR IGNORE INTO seen_ids (id) VALUES (?)")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for id in &pending.completed_entities {
            sqlx::query(r"INSERT OR IGNORE INTO completed_entities (id) VALUES (?)")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for (key, value) in &pending.aux {
            sqlx::query(r"INSERT OR IGNORE INTO aux_cache (group_key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(
            new_ids = pending.seen_ids.len(),
            new_entities = pending.completed_entities.len(),
            new_aux = pending.aux.len(),
            "checkpoint saved"
        );
        self.remember(pending);
        Ok(())
    }
}
