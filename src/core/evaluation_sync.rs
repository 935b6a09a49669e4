//! Differential evaluation sync.
//!
//! A fetch sends the stored sync cursor, watermark and attribute flag to the
//! server and reconciles the answer into the durable store:
//!
//! - same cursor: nothing changed, only the attribute flag is cleared
//! - `force_update`: the user's rows are replaced as a whole
//! - otherwise: a delta of upserts plus archived feature ids
//!
//! The user is read together with the attribute flag version, and the flag
//! is cleared only if that version is still current once the response is
//! applied. An update made while the request was in flight survives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cache::EvaluationCache;
use super::listeners::UpdateListeners;
use super::user_holder::UserHolder;
use crate::error::{ErrorCode, FlagKitError, Result};
use crate::http::{
    with_retry, ApiClient, CancellationCoordinator, GetEvaluationsRequest, GetEvaluationsResponse,
    Generation, RetryConfig, RetryOutcome, UserEvaluationCondition,
};
use crate::storage::{EvaluationStore, SyncState};
use crate::types::User;

#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        feature_tag: String,
        evaluations_changed: bool,
        latency: Duration,
        size_bytes: usize,
    },
    Failure {
        error: FlagKitError,
        feature_tag: String,
    },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            FetchOutcome::Success { .. } => Ok(()),
            FetchOutcome::Failure { error, .. } => Err(error),
        }
    }
}

/// Request condition read from the sync state before a fetch.
struct SyncCondition {
    user: User,
    cursor: String,
    evaluated_at: String,
    attributes_updated: bool,
    captured_version: u64,
}

pub struct EvaluationSyncEngine {
    api: Arc<dyn ApiClient>,
    store: Arc<dyn EvaluationStore>,
    sync_state: Arc<SyncState>,
    cache: Arc<EvaluationCache>,
    listeners: Arc<UpdateListeners>,
    coordinator: Arc<CancellationCoordinator>,
    retry: RetryConfig,
    feature_tag: String,
    app_version: String,
}

impl EvaluationSyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn ApiClient>,
        store: Arc<dyn EvaluationStore>,
        sync_state: Arc<SyncState>,
        cache: Arc<EvaluationCache>,
        listeners: Arc<UpdateListeners>,
        coordinator: Arc<CancellationCoordinator>,
        retry: RetryConfig,
        feature_tag: impl Into<String>,
    ) -> Self {
        Self {
            api,
            store,
            sync_state,
            cache,
            listeners,
            coordinator,
            retry,
            feature_tag: feature_tag.into(),
            app_version: String::new(),
        }
    }

    /// Host application version sent with every evaluation request.
    pub fn with_app_version(mut self, app_version: impl Into<String>) -> Self {
        self.app_version = app_version.into();
        self
    }

    /// Persist the configured feature tag, dropping the sync cursor if it changed.
    ///
    /// Stored evaluations and the watermark are left alone; the next fetch
    /// is a full resync under the new tag.
    pub fn apply_feature_tag(&self) -> Result<bool> {
        let stored = self.sync_state.feature_tag()?;
        if stored == self.feature_tag {
            return Ok(false);
        }

        tracing::debug!(
            "Feature tag changed from '{}' to '{}', forcing full resync",
            stored,
            self.feature_tag
        );
        self.sync_state.clear_current_evaluations_id()?;
        self.sync_state.set_feature_tag(&self.feature_tag)?;
        Ok(true)
    }

    /// Fetch and reconcile the user's evaluations.
    ///
    /// Returns `None` if `generation` was superseded before an attempt ran.
    pub async fn fetch(
        &self,
        user: &UserHolder,
        timeout: Duration,
        generation: Generation,
    ) -> Option<FetchOutcome> {
        let condition = match self.read_condition(user) {
            Ok(condition) => condition,
            Err(e) => return Some(self.failure(rewrap(e))),
        };
        let user = &condition.user;

        let request = GetEvaluationsRequest::new(
            self.feature_tag.clone(),
            user.clone(),
            condition.cursor.clone(),
            UserEvaluationCondition {
                evaluated_at: condition.evaluated_at.clone(),
                user_attributes_updated: condition.attributes_updated,
            },
        )
        .with_app_version(self.app_version.clone());

        let started = Instant::now();
        let outcome = with_retry(
            || self.api.get_evaluations(request.clone(), timeout),
            &self.retry,
            &self.coordinator,
            generation,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Superseded => {
                tracing::debug!("Evaluation fetch for user {} superseded", user.id);
                return None;
            }
            RetryOutcome::Completed(Err(e)) => {
                tracing::debug!("Evaluation fetch failed: {}", e);
                return Some(self.failure(e));
            }
            RetryOutcome::Completed(Ok(response)) => response,
        };
        let latency = started.elapsed();
        let size_bytes = response.size_bytes;

        match self.reconcile(&user.id, &condition, response) {
            Ok(changed) => {
                if changed {
                    self.listeners.notify_all();
                }
                Some(FetchOutcome::Success {
                    feature_tag: self.feature_tag.clone(),
                    evaluations_changed: changed,
                    latency,
                    size_bytes,
                })
            }
            Err(e) => {
                tracing::warn!("Failed to apply evaluations for user {}: {}", user.id, e);
                Some(self.failure(rewrap(e)))
            }
        }
    }

    fn read_condition(&self, holder: &UserHolder) -> Result<SyncCondition> {
        self.apply_feature_tag()?;
        let (attributes_updated, captured_version, user) =
            self.sync_state.user_attributes_snapshot(|| holder.user())?;
        Ok(SyncCondition {
            user,
            cursor: self.sync_state.current_evaluations_id()?,
            evaluated_at: self.sync_state.evaluated_at()?,
            attributes_updated,
            captured_version,
        })
    }

    /// Apply a response to the stores. Returns whether evaluations changed.
    ///
    /// The cursor is written last, after the rows, the cache and the
    /// watermark. Any failure before it leaves the cursor where it was and
    /// the next fetch asks for the same delta again.
    fn reconcile(
        &self,
        user_id: &str,
        condition: &SyncCondition,
        response: GetEvaluationsResponse,
    ) -> Result<bool> {
        if response.user_evaluations_id == condition.cursor {
            tracing::debug!("Evaluations unchanged for user {}", user_id);
            self.sync_state
                .clear_user_attributes_updated(condition.captured_version)?;
            return Ok(false);
        }

        let evaluations = response.evaluations;
        let changed = if evaluations.force_update {
            self.store.replace_all(user_id, &evaluations.evaluations)?;
            true
        } else {
            self.store.apply_delta(
                user_id,
                &evaluations.evaluations,
                &evaluations.archived_feature_ids,
            )?
        };

        self.cache.refresh(user_id)?;
        self.sync_state.set_evaluated_at(&evaluations.created_at)?;
        self.sync_state
            .set_current_evaluations_id(&response.user_evaluations_id)?;
        self.sync_state
            .clear_user_attributes_updated(condition.captured_version)?;

        tracing::debug!(
            "Applied {} evaluations for user {} (force_update: {}, archived: {}, changed: {})",
            evaluations.evaluations.len(),
            user_id,
            evaluations.force_update,
            evaluations.archived_feature_ids.len(),
            changed
        );
        Ok(changed)
    }

    fn failure(&self, error: FlagKitError) -> FetchOutcome {
        FetchOutcome::Failure {
            error,
            feature_tag: self.feature_tag.clone(),
        }
    }
}

fn rewrap(error: FlagKitError) -> FlagKitError {
    if error.code == ErrorCode::IllegalState {
        return error;
    }
    let message = format!("Failed to update local evaluations: {}", error.message);
    FlagKitError::with_source(ErrorCode::IllegalState, message, error)
}
