use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::core::{
    AlarmCallback, BackgroundAlarm, ChannelExecutor, Completion, EvaluationCache,
    EvaluationSyncEngine, EvaluationUpdateListener, EventDispatcher, EventQueueConfig,
    FetchOutcome, FlagKitOptions, MainExecutor, PollCallback, PollingConfig, PollingTask,
    SendOutcome, TaskScheduler, TaskState, TokioAlarm, UpdateListeners, UserHolder, Worker,
};
use crate::error::{ErrorCode, FlagKitError, Result};
use crate::http::{ApiClient, CancellationCoordinator, Generation, HttpClient};
use crate::storage::{
    EvaluationStore, EventStore, KeyValueStore, MemoryEvaluationStore, MemoryEventStore,
    MemoryKeyValueStore, SyncState,
};
use crate::types::{ApiId, Evaluation, User};

const EVALUATIONS_TASK: &str = "evaluations";
const EVENTS_TASK: &str = "events";

type JobResult = Option<Result<()>>;

/// Handle to one client instance.
///
/// Cloning is cheap and every clone drives the same instance. Teardown is
/// explicit through [`destroy`](Self::destroy).
#[derive(Clone)]
pub struct FlagKitClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: FlagKitOptions,
    user: UserHolder,
    cache: Arc<EvaluationCache>,
    sync_state: Arc<SyncState>,
    sync_engine: EvaluationSyncEngine,
    dispatcher: EventDispatcher,
    listeners: Arc<UpdateListeners>,
    /// Generations of evaluation fetches.
    fetches: Arc<CancellationCoordinator>,
    /// Generations of event flushes.
    flushes: Arc<CancellationCoordinator>,
    worker: Worker,
    scheduler: TaskScheduler,
    backgrounded: AtomicBool,
    destroyed: AtomicBool,
}

impl FlagKitClient {
    pub fn builder(options: FlagKitOptions, user: User) -> FlagKitClientBuilder {
        FlagKitClientBuilder::new(options, user)
    }

    pub fn options(&self) -> &FlagKitOptions {
        &self.inner.options
    }

    pub fn user(&self) -> User {
        self.inner.user.user()
    }

    /// Fetch evaluations for the first time and start the foreground tasks.
    pub fn initialize(&self, timeout: Duration) -> Completion {
        let completion = self.fetch_evaluations(Some(timeout));
        if !self.inner.is_destroyed() {
            self.inner.scheduler.on_foreground();
        }
        completion
    }

    /// Fetch evaluations now, superseding any older fetch still waiting or
    /// retrying. Event flushes are not affected.
    pub fn fetch_evaluations(&self, timeout: Option<Duration>) -> Completion {
        let timeout = timeout.unwrap_or(self.inner.options.timeout);
        let generation = self.inner.fetches.advance();
        self.inner.completion(self.inner.submit_fetch(timeout, generation))
    }

    /// Send every queued event up to the batch size, regardless of threshold.
    /// Supersedes any older flush; evaluation fetches are not affected.
    pub fn flush(&self) -> Completion {
        let generation = self.inner.flushes.advance();
        self.inner.completion(self.inner.submit_flush(true, generation))
    }

    /// Queue a goal event for the current user.
    pub fn track(&self, goal_id: &str, value: f64) {
        let user = self.inner.user.user();
        let goal_id = goal_id.to_string();
        self.inner.submit_tracking(move |dispatcher| dispatcher.track_goal(&user, &goal_id, value));
    }

    pub fn bool_variation(&self, feature_id: &str, default: bool) -> bool {
        self.variation(feature_id, default, |value| value.parse().ok())
    }

    pub fn int_variation(&self, feature_id: &str, default: i64) -> i64 {
        self.variation(feature_id, default, |value| value.parse().ok())
    }

    pub fn double_variation(&self, feature_id: &str, default: f64) -> f64 {
        self.variation(feature_id, default, |value| value.parse().ok())
    }

    pub fn string_variation(&self, feature_id: &str, default: &str) -> String {
        self.variation(feature_id, default.to_string(), |value| Some(value.to_string()))
    }

    pub fn json_variation(&self, feature_id: &str, default: serde_json::Value) -> serde_json::Value {
        self.variation(feature_id, default, |value| serde_json::from_str(value).ok())
    }

    /// Cached evaluation of `feature_id` for the current user.
    pub fn evaluation_details(&self, feature_id: &str) -> Option<Evaluation> {
        let user_id = self.inner.user.user_id();
        self.inner.cache.get_latest(&user_id, feature_id)
    }

    pub fn get_latest(&self, user_id: &str, feature_id: &str) -> Option<Evaluation> {
        self.inner.cache.get_latest(user_id, feature_id)
    }

    /// Replace the user's attributes. The next fetch tells the server they changed.
    pub fn update_user_attributes(&self, attributes: HashMap<String, String>) -> Result<()> {
        let version = self
            .inner
            .sync_state
            .record_user_attributes_update(|| self.inner.user.update_attributes(attributes))?;
        tracing::debug!("User attributes updated (version {})", version);
        Ok(())
    }

    pub fn add_evaluation_update_listener(
        &self,
        listener: Arc<dyn EvaluationUpdateListener>,
    ) -> String {
        self.inner.listeners.add(listener)
    }

    pub fn remove_evaluation_update_listener(&self, key: &str) -> bool {
        self.inner.listeners.remove(key)
    }

    pub fn clear_evaluation_update_listeners(&self) {
        self.inner.listeners.clear();
    }

    /// Host came to the foreground: cancel the alarm and resume polling.
    ///
    /// Coming back from the background also fetches right away, superseding
    /// background fetches still waiting or retrying.
    pub fn on_foreground(&self) {
        if self.inner.is_destroyed() {
            return;
        }
        tracing::debug!("Switching to foreground scheduling");
        self.inner.scheduler.on_foreground();

        if !self.inner.backgrounded.swap(false, Ordering::SeqCst) {
            return;
        }
        let generation = self.inner.fetches.advance();
        if let Err(e) = self.inner.submit_fetch(self.inner.options.timeout, generation) {
            tracing::debug!("Foreground fetch not submitted: {}", e);
        }
    }

    /// Host went to the background: flush events, then arm the alarm.
    pub fn on_background(&self) {
        if self.inner.is_destroyed() {
            return;
        }
        tracing::debug!("Switching to background scheduling");
        let generation = self.inner.flushes.current();
        if let Err(e) = self.inner.submit_flush(true, generation) {
            tracing::warn!("Failed to flush events before backgrounding: {}", e);
        }
        self.inner.scheduler.on_background();
        self.inner.backgrounded.store(true, Ordering::SeqCst);
    }

    pub fn task_state(&self, name: &str) -> Option<TaskState> {
        self.inner.scheduler.task_state(name)
    }

    /// Stop every task and the worker. Later calls fail with `IllegalState`.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.scheduler.stop();
        self.inner.fetches.advance();
        self.inner.flushes.advance();
        self.inner.listeners.clear();
        self.inner.worker.shutdown();
        tracing::debug!("Client destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    fn variation<T, F>(&self, feature_id: &str, default: T, parse: F) -> T
    where
        F: FnOnce(&str) -> Option<T>,
    {
        let user = self.inner.user.user();
        let evaluation = self.inner.cache.get_latest(&user.id, feature_id);

        match evaluation.and_then(|e| parse(&e.variation_value).map(|value| (e, value))) {
            Some((evaluation, value)) => {
                self.inner.submit_tracking(move |dispatcher| {
                    dispatcher.track_evaluation(&user, &evaluation)
                });
                value
            }
            None => {
                tracing::debug!("Serving default value for feature {}", feature_id);
                let feature_id = feature_id.to_string();
                self.inner.submit_tracking(move |dispatcher| {
                    dispatcher.track_default_evaluation(&user, &feature_id)
                });
                default
            }
        }
    }
}

impl ClientInner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn completion(&self, submitted: Result<oneshot::Receiver<JobResult>>) -> Completion {
        match submitted {
            Ok(rx) => Completion::new(rx),
            Err(e) => Completion::ready(Some(Err(e))),
        }
    }

    fn submit_fetch(
        self: &Arc<Self>,
        timeout: Duration,
        generation: Generation,
    ) -> Result<oneshot::Receiver<JobResult>> {
        let inner = Arc::clone(self);
        self.worker
            .submit(async move { inner.run_fetch(timeout, generation).await })
    }

    fn submit_flush(
        self: &Arc<Self>,
        force: bool,
        generation: Generation,
    ) -> Result<oneshot::Receiver<JobResult>> {
        let inner = Arc::clone(self);
        self.worker
            .submit(async move { inner.run_flush(force, generation).await })
    }

    /// Append an event on the worker, then send if the threshold is reached.
    fn submit_tracking<F>(self: &Arc<Self>, track: F)
    where
        F: FnOnce(&EventDispatcher) -> Result<bool> + Send + 'static,
    {
        let inner = Arc::clone(self);
        let submitted = self.worker.submit(async move {
            if let Err(e) = track(&inner.dispatcher) {
                tracing::warn!("Failed to queue event: {}", e);
                return;
            }
            match inner.dispatcher.should_flush() {
                Ok(true) => {
                    let generation = inner.flushes.current();
                    if let Err(e) = inner.submit_flush(false, generation) {
                        tracing::debug!("Skipping automatic flush: {}", e);
                    }
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to read event queue size: {}", e),
            }
        });
        if let Err(e) = submitted {
            tracing::debug!("Event not queued: {}", e);
        }
    }

    async fn run_fetch(&self, timeout: Duration, generation: Generation) -> JobResult {
        let outcome = self.sync_engine.fetch(&self.user, timeout, generation).await?;

        let tracked = match &outcome {
            FetchOutcome::Success {
                latency,
                size_bytes,
                ..
            } => self.dispatcher.track_fetch_success(*latency, *size_bytes),
            FetchOutcome::Failure { error, .. } => {
                self.dispatcher.track_api_error(ApiId::GetEvaluations, error)
            }
        };
        if let Err(e) = tracked {
            tracing::warn!("Failed to record fetch metrics: {}", e);
        }

        Some(outcome.into_result())
    }

    async fn run_flush(&self, force: bool, generation: Generation) -> JobResult {
        let outcome = self.dispatcher.send_events(force, generation).await?;

        if let SendOutcome::Failure { error } = &outcome {
            if let Err(e) = self.dispatcher.track_api_error(ApiId::RegisterEvents, error) {
                tracing::warn!("Failed to record event send metrics: {}", e);
            }
        }

        Some(outcome.into_result())
    }
}

/// Foreground evaluation polling. Each run supersedes older fetches.
fn evaluation_poll(inner: Weak<ClientInner>, timeout: Duration) -> PollCallback {
    Arc::new(move || {
        let inner = inner.clone();
        Box::pin(async move {
            let rx = {
                let inner = inner.upgrade().ok_or(())?;
                let generation = inner.fetches.advance();
                inner.submit_fetch(timeout, generation).map_err(|_| ())?
            };
            wait_for_job(rx).await
        })
    })
}

/// Foreground event flushing. Each run supersedes older flushes.
fn events_poll(inner: Weak<ClientInner>) -> PollCallback {
    Arc::new(move || {
        let inner = inner.clone();
        Box::pin(async move {
            let rx = {
                let inner = inner.upgrade().ok_or(())?;
                let generation = inner.flushes.advance();
                inner.submit_flush(true, generation).map_err(|_| ())?
            };
            wait_for_job(rx).await
        })
    })
}

/// Background fetch and flush. Each runs with the current generation of its
/// kind, so a foreground fetch or flush started meanwhile supersedes it.
fn background_run(inner: Weak<ClientInner>, timeout: Duration) -> AlarmCallback {
    Arc::new(move || {
        let Some(inner) = inner.upgrade() else {
            tracing::warn!("Background alarm fired with no client, ignoring");
            return;
        };
        if inner.is_destroyed() {
            tracing::warn!("Background alarm fired after destroy, ignoring");
            return;
        }

        if let Err(e) = inner.submit_fetch(timeout, inner.fetches.current()) {
            tracing::debug!("Background fetch not submitted: {}", e);
        }
        if let Err(e) = inner.submit_flush(true, inner.flushes.current()) {
            tracing::debug!("Background flush not submitted: {}", e);
        }
    })
}

async fn wait_for_job(rx: oneshot::Receiver<JobResult>) -> std::result::Result<(), ()> {
    match rx.await {
        // Superseded runs do not change the cadence.
        Ok(None) | Ok(Some(Ok(()))) => Ok(()),
        Ok(Some(Err(_))) | Err(_) => Err(()),
    }
}

pub struct FlagKitClientBuilder {
    options: FlagKitOptions,
    user: User,
    api: Option<Arc<dyn ApiClient>>,
    evaluation_store: Option<Arc<dyn EvaluationStore>>,
    event_store: Option<Arc<dyn EventStore>>,
    preferences: Option<Arc<dyn KeyValueStore>>,
    main_executor: Option<Arc<dyn MainExecutor>>,
    background_alarm: Option<Arc<dyn BackgroundAlarm>>,
    runtime: Option<Handle>,
}

impl FlagKitClientBuilder {
    pub fn new(options: FlagKitOptions, user: User) -> Self {
        Self {
            options,
            user,
            api: None,
            evaluation_store: None,
            event_store: None,
            preferences: None,
            main_executor: None,
            background_alarm: None,
            runtime: None,
        }
    }

    pub fn api(mut self, api: Arc<dyn ApiClient>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn evaluation_store(mut self, store: Arc<dyn EvaluationStore>) -> Self {
        self.evaluation_store = Some(store);
        self
    }

    pub fn event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    pub fn preferences(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.preferences = Some(store);
        self
    }

    pub fn main_executor(mut self, executor: Arc<dyn MainExecutor>) -> Self {
        self.main_executor = Some(executor);
        self
    }

    pub fn background_alarm(mut self, alarm: Arc<dyn BackgroundAlarm>) -> Self {
        self.background_alarm = Some(alarm);
        self
    }

    /// Runtime for the worker and timers. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<FlagKitClient> {
        let options = self.options;
        options.validate()?;
        if self.user.id.is_empty() {
            return Err(FlagKitError::config_error("User id is required"));
        }

        let handle = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                FlagKitError::with_source(
                    ErrorCode::IllegalState,
                    "A tokio runtime is required to build the client",
                    e,
                )
            })?,
        };

        let api: Arc<dyn ApiClient> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpClient::new(&options)?),
        };
        let evaluation_store = self
            .evaluation_store
            .unwrap_or_else(|| Arc::new(MemoryEvaluationStore::new()));
        let event_store = self
            .event_store
            .unwrap_or_else(|| Arc::new(MemoryEventStore::new()));
        let preferences = self
            .preferences
            .unwrap_or_else(|| Arc::new(MemoryKeyValueStore::new()));
        let main_executor: Arc<dyn MainExecutor> = match self.main_executor {
            Some(executor) => executor,
            None => Arc::new(ChannelExecutor::new()?),
        };
        let alarm = self
            .background_alarm
            .unwrap_or_else(|| Arc::new(TokioAlarm::new(handle.clone())));

        let fetches = Arc::new(CancellationCoordinator::new());
        let flushes = Arc::new(CancellationCoordinator::new());
        let sync_state = Arc::new(SyncState::new(preferences));
        let cache = Arc::new(EvaluationCache::new(Arc::clone(&evaluation_store)));
        let listeners = Arc::new(UpdateListeners::new(main_executor));

        let sync_engine = EvaluationSyncEngine::new(
            Arc::clone(&api),
            evaluation_store,
            Arc::clone(&sync_state),
            Arc::clone(&cache),
            Arc::clone(&listeners),
            Arc::clone(&fetches),
            options.retry.clone(),
            options.feature_tag.clone(),
        )
        .with_app_version(options.app_version.clone());
        let dispatcher = EventDispatcher::new(
            EventQueueConfig::from_options(&options),
            event_store,
            api,
            Arc::clone(&flushes),
            options.retry.clone(),
            options.timeout,
            options.feature_tag.clone(),
        );

        sync_engine.apply_feature_tag()?;
        cache.refresh(&self.user.id)?;

        let worker = Worker::with_handle(handle.clone());
        let user = UserHolder::new(self.user);

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let evaluations_config = PollingConfig {
                interval: options.polling_interval,
                retry_interval: options.retry_interval,
                max_retry_count: options.max_retry_count,
            };
            let events_config = PollingConfig {
                interval: options.events_flush_interval,
                ..evaluations_config.clone()
            };

            let scheduler = TaskScheduler::new(
                alarm,
                options.background_polling_interval,
                background_run(weak.clone(), options.timeout),
            )
            .with_task(
                PollingTask::new(EVALUATIONS_TASK, evaluations_config, handle.clone()),
                evaluation_poll(weak.clone(), options.timeout),
            )
            .with_task(
                PollingTask::new(EVENTS_TASK, events_config, handle.clone()),
                events_poll(weak.clone()),
            );

            ClientInner {
                options,
                user,
                cache,
                sync_state,
                sync_engine,
                dispatcher,
                listeners,
                fetches,
                flushes,
                worker,
                scheduler,
                backgrounded: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }
        });

        Ok(FlagKitClient { inner })
    }
}
