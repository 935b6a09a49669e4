use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::executor::MainExecutor;

/// Called after a fetch changed the stored evaluations.
pub trait EvaluationUpdateListener: Send + Sync {
    fn on_update(&self);
}

impl<F> EvaluationUpdateListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_update(&self) {
        self()
    }
}

/// Registry of update listeners keyed by an opaque id.
pub struct UpdateListeners {
    listeners: RwLock<HashMap<String, Arc<dyn EvaluationUpdateListener>>>,
    executor: Arc<dyn MainExecutor>,
}

impl UpdateListeners {
    pub fn new(executor: Arc<dyn MainExecutor>) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            executor,
        }
    }

    /// Register a listener and return the key used to remove it.
    pub fn add(&self, listener: Arc<dyn EvaluationUpdateListener>) -> String {
        let key = uuid::Uuid::new_v4().to_string();
        self.listeners.write().insert(key.clone(), listener);
        key
    }

    pub fn remove(&self, key: &str) -> bool {
        self.listeners.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Post every registered listener to the main executor.
    ///
    /// The registry is snapshotted first, so listeners may add or remove
    /// listeners from inside their callback.
    pub fn notify_all(&self) {
        let snapshot: Vec<_> = self.listeners.read().values().cloned().collect();
        if snapshot.is_empty() {
            return;
        }

        tracing::debug!("Notifying {} evaluation update listeners", snapshot.len());
        self.executor.post(Box::new(move || {
            for listener in snapshot {
                listener.on_update();
            }
        }));
    }
}
