use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::EvaluationStore;
use crate::types::Evaluation;

/// Read path over the durable evaluation table.
///
/// Lookups never touch disk or network: they read a map keyed by user id
/// that [`refresh`](Self::refresh) reloads from the store after each write.
/// Safe to read from any thread.
pub struct EvaluationCache {
    store: Arc<dyn EvaluationStore>,
    entries: RwLock<HashMap<String, Vec<Evaluation>>>,
}

impl EvaluationCache {
    pub fn new(store: Arc<dyn EvaluationStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Reload the user's rows from the durable store.
    pub fn refresh(&self, user_id: &str) -> Result<()> {
        let evaluations = self.store.get(user_id)?;
        tracing::debug!(
            "Evaluation cache refreshed for user {} ({} evaluations)",
            user_id,
            evaluations.len()
        );
        self.entries.write().insert(user_id.to_string(), evaluations);
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> Vec<Evaluation> {
        self.entries.read().get(user_id).cloned().unwrap_or_default()
    }

    pub fn get_latest(&self, user_id: &str, feature_id: &str) -> Option<Evaluation> {
        let entries = self.entries.read();
        entries
            .get(user_id)?
            .iter()
            .find(|e| e.feature_id == feature_id)
            .cloned()
    }

    pub fn len(&self, user_id: &str) -> usize {
        self.entries.read().get(user_id).map_or(0, Vec::len)
    }
}
