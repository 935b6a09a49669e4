//! Durable event queue and dispatcher.
//!
//! Tracking calls append events to the [`EventStore`]. Metrics events are
//! deduplicated on `(api id, metrics kind)` so repeated failures do not pile
//! up identical counters. [`EventDispatcher::send_events`] posts the oldest
//! batch and deletes every event the server accepted or rejected for good;
//! events with a retriable error stay queued for the next send.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::config::{
    FlagKitOptions, DEFAULT_EVENTS_FLUSH_THRESHOLD, DEFAULT_EVENTS_MAX_BATCH_SIZE,
    DEFAULT_MAX_QUEUE_SIZE,
};
use crate::error::{FlagKitError, Result};
use crate::http::{
    with_retry, ApiClient, CancellationCoordinator, Generation, RegisterEventsRequest,
    RetryConfig, RetryOutcome,
};
use crate::storage::EventStore;
use crate::types::{
    ApiId, Evaluation, EvaluationEvent, Event, EventPayload, GoalEvent, MetricsEvent, MetricsKind,
    Reason, ReasonType, User,
};

const LABEL_TAG: &str = "tag";

/// Configuration for the event queue.
#[derive(Debug, Clone)]
pub struct EventQueueConfig {
    /// Queue size at which a non-forced send goes out. Default: 50
    pub flush_threshold: usize,

    /// Maximum number of events per request. Default: 50
    pub max_batch_size: usize,

    /// Goal and evaluation events beyond this size are dropped. Default: 10000
    pub max_queue_size: usize,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_EVENTS_FLUSH_THRESHOLD,
            max_batch_size: DEFAULT_EVENTS_MAX_BATCH_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

impl EventQueueConfig {
    pub fn builder() -> EventQueueConfigBuilder {
        EventQueueConfigBuilder::default()
    }

    pub fn from_options(options: &FlagKitOptions) -> Self {
        Self {
            flush_threshold: options.events_flush_threshold,
            max_batch_size: options.events_max_batch_size,
            max_queue_size: options.max_queue_size,
        }
    }
}

/// Builder for EventQueueConfig.
#[derive(Debug, Default)]
pub struct EventQueueConfigBuilder {
    flush_threshold: Option<usize>,
    max_batch_size: Option<usize>,
    max_queue_size: Option<usize>,
}

impl EventQueueConfigBuilder {
    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = Some(threshold);
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    pub fn build(self) -> EventQueueConfig {
        EventQueueConfig {
            flush_threshold: self.flush_threshold.unwrap_or(DEFAULT_EVENTS_FLUSH_THRESHOLD),
            max_batch_size: self.max_batch_size.unwrap_or(DEFAULT_EVENTS_MAX_BATCH_SIZE),
            max_queue_size: self.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
        }
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    /// `sent` is false when nothing needed sending.
    Success { sent: bool },
    Failure { error: FlagKitError },
}

impl SendOutcome {
    pub fn into_result(self) -> Result<()> {
        match self {
            SendOutcome::Success { .. } => Ok(()),
            SendOutcome::Failure { error } => Err(error),
        }
    }
}

pub struct EventDispatcher {
    config: EventQueueConfig,
    store: Arc<dyn EventStore>,
    api: Arc<dyn ApiClient>,
    coordinator: Arc<CancellationCoordinator>,
    retry: RetryConfig,
    timeout: Duration,
    feature_tag: String,
    // Serializes the dedup check with the insert.
    append_lock: Mutex<()>,
}

impl EventDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EventQueueConfig,
        store: Arc<dyn EventStore>,
        api: Arc<dyn ApiClient>,
        coordinator: Arc<CancellationCoordinator>,
        retry: RetryConfig,
        timeout: Duration,
        feature_tag: impl Into<String>,
    ) -> Self {
        Self {
            config,
            store,
            api,
            coordinator,
            retry,
            timeout,
            feature_tag: feature_tag.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EventQueueConfig {
        &self.config
    }

    pub fn track_goal(&self, user: &User, goal_id: &str, value: f64) -> Result<bool> {
        self.append(EventPayload::Goal(GoalEvent {
            goal_id: goal_id.to_string(),
            user_id: user.id.clone(),
            value,
            user: user.clone(),
            tag: self.feature_tag.clone(),
        }))
    }

    pub fn track_evaluation(&self, user: &User, evaluation: &Evaluation) -> Result<bool> {
        self.append(EventPayload::Evaluation(EvaluationEvent {
            feature_id: evaluation.feature_id.clone(),
            feature_version: evaluation.feature_version,
            user_id: user.id.clone(),
            variation_id: evaluation.variation_id.clone(),
            user: user.clone(),
            reason: evaluation.reason.clone(),
            tag: self.feature_tag.clone(),
        }))
    }

    /// Record that the caller's default value was served for `feature_id`.
    pub fn track_default_evaluation(&self, user: &User, feature_id: &str) -> Result<bool> {
        self.append(EventPayload::Evaluation(EvaluationEvent {
            feature_id: feature_id.to_string(),
            feature_version: 0,
            user_id: user.id.clone(),
            variation_id: String::new(),
            user: user.clone(),
            reason: Reason::new(ReasonType::Client),
            tag: self.feature_tag.clone(),
        }))
    }

    /// Append a metrics event unless one with the same key is already queued.
    ///
    /// Returns whether the event was stored.
    pub fn track_metrics(&self, metrics: MetricsEvent) -> Result<bool> {
        let key = metrics.dedup_key();
        let _guard = self.append_lock.lock();

        let duplicate = self
            .store
            .get_all()?
            .iter()
            .any(|event| event.metrics_key() == Some(key));
        if duplicate {
            tracing::debug!("Dropping duplicate metrics event {:?}", key);
            return Ok(false);
        }

        self.store.add(&Event::new(EventPayload::Metrics(metrics)))?;
        Ok(true)
    }

    pub fn track_fetch_success(&self, latency: Duration, size_bytes: usize) -> Result<()> {
        self.track_metrics(self.metrics(
            MetricsKind::Latency,
            ApiId::GetEvaluations,
            Some(latency.as_secs_f64()),
        ))?;
        self.track_metrics(self.metrics(
            MetricsKind::ResponseSize,
            ApiId::GetEvaluations,
            Some(size_bytes as f64),
        ))?;
        Ok(())
    }

    pub fn track_api_error(&self, api_id: ApiId, error: &FlagKitError) -> Result<()> {
        let kind = MetricsKind::for_error(error.code);
        self.track_metrics(self.metrics(kind, api_id, None))?;
        Ok(())
    }

    /// Whether the queue reached the flush threshold.
    pub fn should_flush(&self) -> Result<bool> {
        Ok(self.store.count()? >= self.config.flush_threshold)
    }

    /// Send the oldest batch of queued events.
    ///
    /// Without `force`, nothing is sent until the queue reaches the flush
    /// threshold. A transport failure leaves the queue untouched. Returns
    /// `None` if `generation` was superseded before an attempt ran.
    pub async fn send_events(&self, force: bool, generation: Generation) -> Option<SendOutcome> {
        let events = match self.store.get_all() {
            Ok(events) => events,
            Err(error) => return Some(SendOutcome::Failure { error }),
        };

        if events.is_empty() {
            return Some(SendOutcome::Success { sent: false });
        }
        if !force && events.len() < self.config.flush_threshold {
            tracing::debug!(
                "{} queued events below flush threshold {}",
                events.len(),
                self.config.flush_threshold
            );
            return Some(SendOutcome::Success { sent: false });
        }

        let batch: Vec<Event> = events
            .into_iter()
            .take(self.config.max_batch_size)
            .collect();
        let request = RegisterEventsRequest::new(batch.clone());

        let outcome = with_retry(
            || self.api.register_events(request.clone(), self.timeout),
            &self.retry,
            &self.coordinator,
            generation,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Superseded => {
                tracing::debug!("Event send superseded");
                return None;
            }
            RetryOutcome::Completed(Err(error)) => {
                tracing::debug!("Failed to send {} events: {}", batch.len(), error);
                return Some(SendOutcome::Failure { error });
            }
            RetryOutcome::Completed(Ok(response)) => response,
        };

        let settled: Vec<String> = batch
            .iter()
            .filter(|event| response.is_settled(&event.id))
            .map(|event| event.id.clone())
            .collect();

        if let Err(error) = self.store.delete(&settled) {
            tracing::warn!("Failed to delete sent events: {}", error);
            return Some(SendOutcome::Failure { error });
        }

        tracing::debug!(
            "Sent {} events, {} kept for retry",
            batch.len(),
            batch.len() - settled.len()
        );
        Some(SendOutcome::Success { sent: true })
    }

    fn append(&self, payload: EventPayload) -> Result<bool> {
        let _guard = self.append_lock.lock();

        if self.store.count()? >= self.config.max_queue_size {
            tracing::warn!(
                "Event queue full ({} events), dropping event",
                self.config.max_queue_size
            );
            return Ok(false);
        }

        self.store.add(&Event::new(payload))?;
        Ok(true)
    }

    fn metrics(&self, kind: MetricsKind, api_id: ApiId, value: Option<f64>) -> MetricsEvent {
        let mut labels = HashMap::new();
        labels.insert(LABEL_TAG.to_string(), self.feature_tag.clone());
        MetricsEvent {
            kind,
            api_id,
            labels,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::http::{
        ApiFuture, GetEvaluationsRequest, GetEvaluationsResponse, RegisterEventError,
        RegisterEventsResponse,
    };
    use crate::storage::MemoryEventStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingApi {
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<String>>>,
        retriable: Mutex<Vec<String>>,
        fail_with: Mutex<Option<ErrorCode>>,
    }

    impl ApiClient for RecordingApi {
        fn get_evaluations(
            &self,
            _request: GetEvaluationsRequest,
            _timeout: Duration,
        ) -> ApiFuture<'_, GetEvaluationsResponse> {
            Box::pin(async { Ok(GetEvaluationsResponse::default()) })
        }

        fn register_events(
            &self,
            request: RegisterEventsRequest,
            _timeout: Duration,
        ) -> ApiFuture<'_, RegisterEventsResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let ids: Vec<String> = request.events.iter().map(|e| e.id.clone()).collect();
            self.batches.lock().push(ids.clone());

            let result = match *self.fail_with.lock() {
                Some(code) => Err(FlagKitError::new(code, "failed")),
                None => {
                    let retriable = self.retriable.lock();
                    let errors = ids
                        .iter()
                        .enumerate()
                        .filter_map(|(i, id)| {
                            // Odd positions fail for good, listed ids fail retriably.
                            if retriable.contains(id) {
                                Some((id.clone(), RegisterEventError { retriable: true, message: String::new() }))
                            } else if i % 2 == 1 {
                                Some((id.clone(), RegisterEventError { retriable: false, message: String::new() }))
                            } else {
                                None
                            }
                        })
                        .collect();
                    Ok(RegisterEventsResponse { errors })
                }
            };
            Box::pin(async move { result })
        }
    }

    fn dispatcher(
        config: EventQueueConfig,
    ) -> (EventDispatcher, Arc<MemoryEventStore>, Arc<RecordingApi>, Arc<CancellationCoordinator>) {
        let store = Arc::new(MemoryEventStore::new());
        let api = Arc::new(RecordingApi::default());
        let coordinator = Arc::new(CancellationCoordinator::new());
        let dispatcher = EventDispatcher::new(
            config,
            store.clone(),
            api.clone(),
            coordinator.clone(),
            RetryConfig::builder().base_delay_ms(1).build(),
            Duration::from_secs(1),
            "android",
        );
        (dispatcher, store, api, coordinator)
    }

    fn user() -> User {
        User::new("user")
    }

    // ==================== Tracking ====================

    #[test]
    fn test_metrics_are_deduplicated() {
        let (dispatcher, store, _, _) = dispatcher(EventQueueConfig::default());
        let error = FlagKitError::new(ErrorCode::Timeout, "timed out");

        dispatcher.track_api_error(ApiId::GetEvaluations, &error).unwrap();
        dispatcher.track_api_error(ApiId::GetEvaluations, &error).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        // Different api id is a different key.
        dispatcher.track_api_error(ApiId::RegisterEvents, &error).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_goal_events_are_not_deduplicated() {
        let (dispatcher, store, _, _) = dispatcher(EventQueueConfig::default());
        dispatcher.track_goal(&user(), "purchase", 1.0).unwrap();
        dispatcher.track_goal(&user(), "purchase", 1.0).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_fetch_success_records_latency_and_size() {
        let (dispatcher, store, _, _) = dispatcher(EventQueueConfig::default());
        dispatcher
            .track_fetch_success(Duration::from_millis(250), 1024)
            .unwrap();

        let kinds: Vec<_> = store
            .get_all()
            .unwrap()
            .iter()
            .filter_map(Event::metrics_key)
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ApiId::GetEvaluations, MetricsKind::Latency),
                (ApiId::GetEvaluations, MetricsKind::ResponseSize)
            ]
        );
    }

    #[test]
    fn test_default_evaluation_uses_client_reason() {
        let (dispatcher, store, _, _) = dispatcher(EventQueueConfig::default());
        dispatcher.track_default_evaluation(&user(), "f1").unwrap();

        match &store.get_all().unwrap()[0].payload {
            EventPayload::Evaluation(event) => {
                assert_eq!(event.feature_id, "f1");
                assert_eq!(event.reason.reason_type, ReasonType::Client);
                assert_eq!(event.tag, "android");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_full_queue_drops_goal_events() {
        let (dispatcher, store, _, _) =
            dispatcher(EventQueueConfig::builder().max_queue_size(2).build());
        assert!(dispatcher.track_goal(&user(), "a", 1.0).unwrap());
        assert!(dispatcher.track_goal(&user(), "b", 1.0).unwrap());
        assert!(!dispatcher.track_goal(&user(), "c", 1.0).unwrap());
        assert_eq!(store.count().unwrap(), 2);
    }

    // ==================== Sending ====================

    #[tokio::test]
    async fn test_empty_queue_sends_nothing() {
        let (dispatcher, _, api, coordinator) = dispatcher(EventQueueConfig::default());
        let outcome = dispatcher.send_events(true, coordinator.advance()).await;
        assert!(matches!(outcome, Some(SendOutcome::Success { sent: false })));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_without_force_sends_nothing() {
        let (dispatcher, store, api, coordinator) =
            dispatcher(EventQueueConfig::builder().flush_threshold(3).build());
        dispatcher.track_goal(&user(), "a", 1.0).unwrap();
        dispatcher.track_goal(&user(), "b", 1.0).unwrap();

        let outcome = dispatcher.send_events(false, coordinator.advance()).await;

        assert!(matches!(outcome, Some(SendOutcome::Success { sent: false })));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.count().unwrap(), 2);
        assert!(!dispatcher.should_flush().unwrap());
    }

    #[tokio::test]
    async fn test_retriable_events_stay_queued() {
        let (dispatcher, store, api, coordinator) = dispatcher(EventQueueConfig::default());
        dispatcher.track_goal(&user(), "x", 1.0).unwrap();
        dispatcher.track_goal(&user(), "y", 1.0).unwrap();
        dispatcher.track_goal(&user(), "z", 1.0).unwrap();
        let ids: Vec<String> = store.get_all().unwrap().into_iter().map(|e| e.id).collect();
        // x accepted, y non-retriable (odd position), z retriable.
        api.retriable.lock().push(ids[2].clone());

        let outcome = dispatcher.send_events(true, coordinator.advance()).await;

        assert!(matches!(outcome, Some(SendOutcome::Success { sent: true })));
        let remaining: Vec<String> = store.get_all().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(remaining, vec![ids[2].clone()]);
    }

    #[tokio::test]
    async fn test_batch_is_capped_at_max_batch_size() {
        let (dispatcher, store, api, coordinator) =
            dispatcher(EventQueueConfig::builder().max_batch_size(2).build());
        for goal in ["a", "b", "c"] {
            dispatcher.track_goal(&user(), goal, 1.0).unwrap();
        }
        let oldest: Vec<String> = store
            .get_all()
            .unwrap()
            .into_iter()
            .take(2)
            .map(|e| e.id)
            .collect();

        dispatcher.send_events(true, coordinator.advance()).await;

        assert_eq!(api.batches.lock()[0], oldest);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_queue_untouched() {
        let (dispatcher, store, api, coordinator) = dispatcher(EventQueueConfig::default());
        dispatcher.track_goal(&user(), "a", 1.0).unwrap();
        *api.fail_with.lock() = Some(ErrorCode::ServerError);

        let outcome = dispatcher.send_events(true, coordinator.advance()).await;

        match outcome {
            Some(SendOutcome::Failure { error }) => assert_eq!(error.code, ErrorCode::ServerError),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_superseded_send_returns_none() {
        let (dispatcher, store, api, coordinator) = dispatcher(EventQueueConfig::default());
        dispatcher.track_goal(&user(), "a", 1.0).unwrap();
        let stale = coordinator.current();
        coordinator.advance();

        assert!(dispatcher.send_events(true, stale).await.is_none());
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.count().unwrap(), 1);
    }
}
