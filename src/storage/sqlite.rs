use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;

use super::{EvaluationStore, EventStore};
use crate::error::{ErrorCode, FlagKitError, Result};
use crate::types::{Evaluation, Event};

/// Number of times a replace-all unit is attempted before giving up.
const REPLACE_ALL_ATTEMPTS: u32 = 3;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS evaluations (
        user_id    TEXT NOT NULL,
        feature_id TEXT NOT NULL,
        data       TEXT NOT NULL,
        PRIMARY KEY (user_id, feature_id)
    );
    CREATE TABLE IF NOT EXISTS events (
        seq  INTEGER PRIMARY KEY AUTOINCREMENT,
        id   TEXT NOT NULL UNIQUE,
        data TEXT NOT NULL
    );
";

const UPSERT_EVALUATION: &str = "
    INSERT INTO evaluations (user_id, feature_id, data) VALUES (?1, ?2, ?3)
    ON CONFLICT(user_id, feature_id) DO UPDATE SET data = excluded.data
";

/// SQLite-backed evaluation table and event queue.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            FlagKitError::with_source(
                ErrorCode::IllegalState,
                format!("Failed to open database: {}", path.as_ref().display()),
                e,
            )
        })?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| storage_error("Failed to open in-memory database", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| storage_error("Failed to create schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn replace_all_once(
        conn: &mut Connection,
        user_id: &str,
        evaluations: &[Evaluation],
    ) -> rusqlite::Result<()> {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM evaluations WHERE user_id = ?1", params![user_id])?;
        for evaluation in evaluations {
            upsert(&tx, user_id, evaluation)?;
        }
        tx.commit()
    }

    fn apply_delta_once(
        conn: &mut Connection,
        user_id: &str,
        upserts: &[Evaluation],
        archived_feature_ids: &[String],
    ) -> rusqlite::Result<bool> {
        let tx = conn.transaction()?;
        let mut changed = false;

        for evaluation in upserts {
            let current: Option<String> = tx
                .query_row(
                    "SELECT data FROM evaluations WHERE user_id = ?1 AND feature_id = ?2",
                    params![user_id, evaluation.feature_id],
                    |row| row.get(0),
                )
                .optional()?;
            let data = encode(evaluation)?;
            if current.as_deref() != Some(data.as_str()) {
                tx.execute(UPSERT_EVALUATION, params![user_id, evaluation.feature_id, data])?;
                changed = true;
            }
        }

        for feature_id in archived_feature_ids {
            let removed = tx.execute(
                "DELETE FROM evaluations WHERE user_id = ?1 AND feature_id = ?2",
                params![user_id, feature_id],
            )?;
            changed |= removed > 0;
        }

        tx.commit()?;
        Ok(changed)
    }
}

fn storage_error(context: &str, error: rusqlite::Error) -> FlagKitError {
    FlagKitError::with_source(ErrorCode::IllegalState, context, error)
}

fn encode(evaluation: &Evaluation) -> rusqlite::Result<String> {
    serde_json::to_string(evaluation).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn upsert(tx: &Transaction<'_>, user_id: &str, evaluation: &Evaluation) -> rusqlite::Result<()> {
    let data = encode(evaluation)?;
    tx.execute(UPSERT_EVALUATION, params![user_id, evaluation.feature_id, data])?;
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        FlagKitError::with_source(ErrorCode::IllegalState, "Failed to decode stored row", e)
    })
}

impl EvaluationStore for SqliteStore {
    fn get(&self, user_id: &str) -> Result<Vec<Evaluation>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT data FROM evaluations WHERE user_id = ?1 ORDER BY feature_id")
            .map_err(|e| storage_error("Failed to prepare evaluation query", e))?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))
            .map_err(|e| storage_error("Failed to query evaluations", e))?;

        let mut evaluations = Vec::new();
        for row in rows {
            let data = row.map_err(|e| storage_error("Failed to read evaluation row", e))?;
            evaluations.push(decode(&data)?);
        }
        Ok(evaluations)
    }

    fn put_evaluations(&self, user_id: &str, evaluations: &[Evaluation]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| storage_error("Failed to begin transaction", e))?;
        for evaluation in evaluations {
            upsert(&tx, user_id, evaluation)
                .map_err(|e| storage_error("Failed to upsert evaluation", e))?;
        }
        tx.commit()
            .map_err(|e| storage_error("Failed to commit evaluations", e))
    }

    fn replace_all(&self, user_id: &str, evaluations: &[Evaluation]) -> Result<()> {
        let mut conn = self.conn.lock();
        let mut last_error = None;

        for attempt in 1..=REPLACE_ALL_ATTEMPTS {
            match Self::replace_all_once(&mut conn, user_id, evaluations) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "Replacing evaluations failed (attempt {} of {}): {}",
                        attempt,
                        REPLACE_ALL_ATTEMPTS,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => storage_error("Failed to replace evaluations", e),
            None => FlagKitError::illegal_state("Failed to replace evaluations"),
        })
    }

    fn apply_delta(
        &self,
        user_id: &str,
        upserts: &[Evaluation],
        archived_feature_ids: &[String],
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        Self::apply_delta_once(&mut conn, user_id, upserts, archived_feature_ids)
            .map_err(|e| storage_error("Failed to apply evaluation delta", e))
    }
}

impl EventStore for SqliteStore {
    fn add(&self, event: &Event) -> Result<()> {
        let data = serde_json::to_string(event).map_err(|e| {
            FlagKitError::with_source(ErrorCode::IllegalState, "Failed to encode event", e)
        })?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO events (id, data) VALUES (?1, ?2)",
            params![event.id, data],
        )
        .map_err(|e| storage_error("Failed to insert event", e))?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT data FROM events ORDER BY seq")
            .map_err(|e| storage_error("Failed to prepare event query", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| storage_error("Failed to query events", e))?;

        let mut events = Vec::new();
        for row in rows {
            let data = row.map_err(|e| storage_error("Failed to read event row", e))?;
            events.push(decode(&data)?);
        }
        Ok(events)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(|e| storage_error("Failed to count events", e))?;
        Ok(count as usize)
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| storage_error("Failed to begin transaction", e))?;
        for id in ids {
            tx.execute("DELETE FROM events WHERE id = ?1", params![id])
                .map_err(|e| storage_error("Failed to delete event", e))?;
        }
        tx.commit()
            .map_err(|e| storage_error("Failed to commit event deletion", e))
    }
}
