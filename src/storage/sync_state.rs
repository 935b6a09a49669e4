use parking_lot::Mutex;
use std::sync::Arc;

use super::KeyValueStore;
use crate::error::Result;

const KEY_CURRENT_EVALUATIONS_ID: &str = "current_evaluations_id";
const KEY_EVALUATED_AT: &str = "evaluated_at";
const KEY_FEATURE_TAG: &str = "feature_tag";
const KEY_USER_ATTRIBUTES_UPDATED: &str = "user_attributes_updated";

/// Watermark sent before any evaluation has been received.
pub const INITIAL_EVALUATED_AT: &str = "0";

/// Durable sync-state scalars of one client instance.
///
/// Each getter and setter is an independent read or write. The
/// `user_attributes_updated` flag is paired with an in-memory version
/// counter: writers bump it under a lock, and the fetch path clears the flag
/// only when the version it captured is still current.
pub struct SyncState {
    store: Arc<dyn KeyValueStore>,
    attributes_version: Mutex<u64>,
}

impl SyncState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            attributes_version: Mutex::new(0),
        }
    }

    pub fn current_evaluations_id(&self) -> Result<String> {
        Ok(self.store.get(KEY_CURRENT_EVALUATIONS_ID)?.unwrap_or_default())
    }

    pub fn set_current_evaluations_id(&self, id: &str) -> Result<()> {
        self.store.set(KEY_CURRENT_EVALUATIONS_ID, id)
    }

    pub fn clear_current_evaluations_id(&self) -> Result<()> {
        self.store.remove(KEY_CURRENT_EVALUATIONS_ID)
    }

    pub fn evaluated_at(&self) -> Result<String> {
        Ok(self
            .store
            .get(KEY_EVALUATED_AT)?
            .unwrap_or_else(|| INITIAL_EVALUATED_AT.to_string()))
    }

    pub fn set_evaluated_at(&self, evaluated_at: &str) -> Result<()> {
        self.store.set(KEY_EVALUATED_AT, evaluated_at)
    }

    pub fn feature_tag(&self) -> Result<String> {
        Ok(self.store.get(KEY_FEATURE_TAG)?.unwrap_or_default())
    }

    pub fn set_feature_tag(&self, tag: &str) -> Result<()> {
        self.store.set(KEY_FEATURE_TAG, tag)
    }

    pub fn user_attributes_updated(&self) -> Result<bool> {
        let _version = self.attributes_version.lock();
        self.read_attributes_flag()
    }

    /// Read the flag and its version, running `read` under the same lock.
    ///
    /// Whatever `read` observes is consistent with the returned version: an
    /// update applied through [`record_user_attributes_update`] is either
    /// fully visible to it or bumps the version afterwards.
    ///
    /// [`record_user_attributes_update`]: Self::record_user_attributes_update
    pub fn user_attributes_snapshot<T>(&self, read: impl FnOnce() -> T) -> Result<(bool, u64, T)> {
        let version = self.attributes_version.lock();
        let value = read();
        Ok((self.read_attributes_flag()?, *version, value))
    }

    pub fn attributes_version(&self) -> u64 {
        *self.attributes_version.lock()
    }

    /// Mark attributes as changed and return the new version.
    pub fn set_user_attributes_updated(&self) -> Result<u64> {
        self.record_user_attributes_update(|| ())
    }

    /// Apply an attribute change and mark it in one step.
    pub fn record_user_attributes_update(&self, apply: impl FnOnce()) -> Result<u64> {
        let mut version = self.attributes_version.lock();
        apply();
        self.store.set(KEY_USER_ATTRIBUTES_UPDATED, "true")?;
        *version = version.wrapping_add(1);
        Ok(*version)
    }

    /// Clear the flag only if no update happened after `captured_version`.
    ///
    /// Returns whether the flag was cleared.
    pub fn clear_user_attributes_updated(&self, captured_version: u64) -> Result<bool> {
        let version = self.attributes_version.lock();
        if *version != captured_version {
            tracing::debug!(
                "User attributes changed during fetch (captured {}, current {}), keeping flag",
                captured_version,
                *version
            );
            return Ok(false);
        }
        self.store.set(KEY_USER_ATTRIBUTES_UPDATED, "false")?;
        Ok(true)
    }

    fn read_attributes_flag(&self) -> Result<bool> {
        Ok(self
            .store
            .get(KEY_USER_ATTRIBUTES_UPDATED)?
            .map(|v| v == "true")
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    fn state() -> SyncState {
        SyncState::new(Arc::new(MemoryKeyValueStore::new()))
    }

    #[test]
    fn test_defaults() {
        let state = state();
        assert_eq!(state.current_evaluations_id().unwrap(), "");
        assert_eq!(state.evaluated_at().unwrap(), INITIAL_EVALUATED_AT);
        assert_eq!(state.feature_tag().unwrap(), "");
        assert!(!state.user_attributes_updated().unwrap());
        assert_eq!(state.attributes_version(), 0);
    }

    #[test]
    fn test_stale_clear_keeps_flag() {
        let state = state();
        let v1 = state.set_user_attributes_updated().unwrap();
        let v2 = state.set_user_attributes_updated().unwrap();
        assert!(v2 > v1);

        assert!(!state.clear_user_attributes_updated(v1).unwrap());
        assert!(state.user_attributes_updated().unwrap());

        assert!(state.clear_user_attributes_updated(v2).unwrap());
        assert!(!state.user_attributes_updated().unwrap());
    }

    #[test]
    fn test_concurrent_updates() {
        let state = Arc::new(state());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        state.set_user_attributes_updated().unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(state.attributes_version() >= 800);
        assert!(state.user_attributes_updated().unwrap());
    }

    #[test]
    fn test_snapshot_sees_recorded_update() {
        let state = Arc::new(state());
        let plan = Arc::new(parking_lot::RwLock::new("free".to_string()));

        let writer = {
            let state = Arc::clone(&state);
            let plan = Arc::clone(&plan);
            std::thread::spawn(move || {
                for round in 0..200 {
                    state
                        .record_user_attributes_update(|| *plan.write() = format!("plan-{}", round))
                        .unwrap();
                }
            })
        };

        // Every snapshot pairs a version with the value written under it.
        for _ in 0..200 {
            let (_, version, seen) = state.user_attributes_snapshot(|| plan.read().clone()).unwrap();
            let expected = match version {
                0 => "free".to_string(),
                v => format!("plan-{}", v - 1),
            };
            assert_eq!(seen, expected);
        }
        writer.join().unwrap();

        let (updated, version, seen) = state.user_attributes_snapshot(|| plan.read().clone()).unwrap();
        assert!(updated);
        assert_eq!(version, 200);
        assert_eq!(seen, "plan-199");
    }
}
