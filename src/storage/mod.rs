//! Durable stores for evaluations, pending events and sync-state scalars.
//!
//! The engine only depends on the traits in this module. In-memory
//! implementations are provided for hosts without persistence and for
//! tests; [`SqliteStore`] and [`FilePreferences`] persist across restarts.

mod preferences;
mod sqlite;
mod sync_state;

pub use preferences::FilePreferences;
pub use sqlite::SqliteStore;
pub use sync_state::SyncState;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{Evaluation, Event};

/// Durable keyed table of evaluations, one row per `(user_id, feature_id)`.
pub trait EvaluationStore: Send + Sync {
    /// All rows stored for a user.
    fn get(&self, user_id: &str) -> Result<Vec<Evaluation>>;

    /// Upsert rows by `(user_id, feature_id)`.
    fn put_evaluations(&self, user_id: &str, evaluations: &[Evaluation]) -> Result<()>;

    /// Delete every row of the user, then insert `evaluations`, as one unit.
    ///
    /// Either the full replacement is visible afterwards or the previous rows are.
    fn replace_all(&self, user_id: &str, evaluations: &[Evaluation]) -> Result<()>;

    /// Upsert `upserts` and delete the rows of `archived_feature_ids`, as one unit.
    ///
    /// Returns whether any row was inserted, changed or removed.
    fn apply_delta(
        &self,
        user_id: &str,
        upserts: &[Evaluation],
        archived_feature_ids: &[String],
    ) -> Result<bool>;
}

/// Durable append/delete-only queue of pending events.
pub trait EventStore: Send + Sync {
    fn add(&self, event: &Event) -> Result<()>;

    /// Events in insertion order.
    fn get_all(&self) -> Result<Vec<Event>>;

    fn count(&self) -> Result<usize>;

    fn delete(&self, ids: &[String]) -> Result<()>;
}

/// Durable string scalar store (the platform preference store contract).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Evaluation table kept in process memory.
#[derive(Default)]
pub struct MemoryEvaluationStore {
    rows: RwLock<HashMap<String, Vec<Evaluation>>>,
}

impl MemoryEvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(rows: &mut Vec<Evaluation>, evaluation: &Evaluation) -> bool {
        match rows.iter_mut().find(|e| e.feature_id == evaluation.feature_id) {
            Some(existing) if existing == evaluation => false,
            Some(existing) => {
                *existing = evaluation.clone();
                true
            }
            None => {
                rows.push(evaluation.clone());
                true
            }
        }
    }
}

impl EvaluationStore for MemoryEvaluationStore {
    fn get(&self, user_id: &str) -> Result<Vec<Evaluation>> {
        Ok(self.rows.read().get(user_id).cloned().unwrap_or_default())
    }

    fn put_evaluations(&self, user_id: &str, evaluations: &[Evaluation]) -> Result<()> {
        let mut rows = self.rows.write();
        let user_rows = rows.entry(user_id.to_string()).or_default();
        for evaluation in evaluations {
            Self::upsert(user_rows, evaluation);
        }
        Ok(())
    }

    fn replace_all(&self, user_id: &str, evaluations: &[Evaluation]) -> Result<()> {
        // Build the replacement before taking the lock so the swap is a single step.
        let mut replacement: Vec<Evaluation> = Vec::with_capacity(evaluations.len());
        for evaluation in evaluations {
            Self::upsert(&mut replacement, evaluation);
        }
        self.rows.write().insert(user_id.to_string(), replacement);
        Ok(())
    }

    fn apply_delta(
        &self,
        user_id: &str,
        upserts: &[Evaluation],
        archived_feature_ids: &[String],
    ) -> Result<bool> {
        let mut rows = self.rows.write();
        let user_rows = rows.entry(user_id.to_string()).or_default();

        let mut changed = false;
        for evaluation in upserts {
            changed |= Self::upsert(user_rows, evaluation);
        }

        let before = user_rows.len();
        user_rows.retain(|e| !archived_feature_ids.contains(&e.feature_id));
        changed |= user_rows.len() != before;

        Ok(changed)
    }
}

/// Event queue kept in process memory.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn add(&self, event: &Event) -> Result<()> {
        let mut events = self.events.lock();
        if !events.iter().any(|e| e.id == event.id) {
            events.push(event.clone());
        }
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Event>> {
        Ok(self.events.lock().clone())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.events.lock().len())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        self.events.lock().retain(|e| !ids.contains(&e.id));
        Ok(())
    }
}

/// Scalar store kept in process memory.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}
