#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flagkit_mobile::core::AlarmCallback;
use flagkit_mobile::http::{
    ApiFuture, GetEvaluationsRequest, GetEvaluationsResponse, RegisterEventError,
    RegisterEventsRequest, RegisterEventsResponse, UserEvaluations,
};
use flagkit_mobile::{
    ApiClient, BackgroundAlarm, ErrorCode, Evaluation, EventPayload, FlagKitClient,
    FlagKitClientBuilder, FlagKitError, FlagKitOptions, FlagKitOptionsBuilder,
    MemoryEvaluationStore, MemoryEventStore, MemoryKeyValueStore, Reason, ReasonType, Result,
    User,
};

pub const USER_ID: &str = "user";

/// Remote collaborator answering from a script.
#[derive(Default)]
pub struct FakeApi {
    responses: Mutex<VecDeque<Result<GetEvaluationsResponse>>>,
    pub evaluation_requests: Mutex<Vec<GetEvaluationsRequest>>,
    pub event_batches: Mutex<Vec<Vec<String>>>,
    pub register_calls: AtomicUsize,
    /// Goal ids rejected for good.
    pub rejected_goals: Mutex<HashSet<String>>,
    /// Goal ids failing with a retriable error.
    pub retriable_goals: Mutex<HashSet<String>>,
    pub register_failure: Mutex<Option<ErrorCode>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, response: GetEvaluationsResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    pub fn fail(&self, code: ErrorCode) {
        self.responses
            .lock()
            .push_back(Err(FlagKitError::new(code, "scripted failure")));
    }

    pub fn fetch_count(&self) -> usize {
        self.evaluation_requests.lock().len()
    }
}

impl ApiClient for FakeApi {
    fn get_evaluations(
        &self,
        request: GetEvaluationsRequest,
        _timeout: Duration,
    ) -> ApiFuture<'_, GetEvaluationsResponse> {
        self.evaluation_requests.lock().push(request);
        let response = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(FlagKitError::new(ErrorCode::Network, "no scripted response")));
        Box::pin(async move { response })
    }

    fn register_events(
        &self,
        request: RegisterEventsRequest,
        _timeout: Duration,
    ) -> ApiFuture<'_, RegisterEventsResponse> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.event_batches
            .lock()
            .push(request.events.iter().map(|e| e.id.clone()).collect());

        if let Some(code) = *self.register_failure.lock() {
            return Box::pin(async move { Err(FlagKitError::new(code, "scripted failure")) });
        }

        let rejected = self.rejected_goals.lock();
        let retriable = self.retriable_goals.lock();
        let mut errors = HashMap::new();
        for event in &request.events {
            if let EventPayload::Goal(goal) = &event.payload {
                let retriable_error = if retriable.contains(&goal.goal_id) {
                    Some(true)
                } else if rejected.contains(&goal.goal_id) {
                    Some(false)
                } else {
                    None
                };
                if let Some(retriable) = retriable_error {
                    errors.insert(
                        event.id.clone(),
                        RegisterEventError {
                            retriable,
                            message: "scripted".to_string(),
                        },
                    );
                }
            }
        }
        Box::pin(async move { Ok(RegisterEventsResponse { errors }) })
    }
}

/// Alarm that only fires when told to.
#[derive(Default)]
pub struct ManualAlarm {
    callback: Mutex<Option<AlarmCallback>>,
    pub scheduled_interval: Mutex<Option<Duration>>,
}

impl ManualAlarm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_armed(&self) -> bool {
        self.callback.lock().is_some()
    }

    pub fn callback(&self) -> Option<AlarmCallback> {
        self.callback.lock().clone()
    }
}

impl BackgroundAlarm for ManualAlarm {
    fn schedule(&self, interval: Duration, callback: AlarmCallback) {
        *self.scheduled_interval.lock() = Some(interval);
        *self.callback.lock() = Some(callback);
    }

    fn cancel(&self) {
        self.callback.lock().take();
        self.scheduled_interval.lock().take();
    }
}

pub fn evaluation(feature_id: &str, version: i32, value: &str) -> Evaluation {
    Evaluation {
        id: Evaluation::make_id(feature_id, version, USER_ID),
        feature_id: feature_id.to_string(),
        feature_version: version,
        user_id: USER_ID.to_string(),
        variation_id: format!("{}-{}", feature_id, value),
        variation_name: value.to_string(),
        variation_value: value.to_string(),
        reason: Reason::new(ReasonType::Rule),
    }
}

pub fn full_response(cursor: &str, evaluations: Vec<Evaluation>) -> GetEvaluationsResponse {
    response(cursor, true, evaluations, &[])
}

pub fn delta_response(
    cursor: &str,
    evaluations: Vec<Evaluation>,
    archived: &[&str],
) -> GetEvaluationsResponse {
    response(cursor, false, evaluations, archived)
}

fn response(
    cursor: &str,
    force_update: bool,
    evaluations: Vec<Evaluation>,
    archived: &[&str],
) -> GetEvaluationsResponse {
    GetEvaluationsResponse {
        evaluations: UserEvaluations {
            id: format!("evaluations-{}", cursor),
            evaluations,
            created_at: format!("1700000000-{}", cursor),
            force_update,
            archived_feature_ids: archived.iter().map(|id| id.to_string()).collect(),
        },
        user_evaluations_id: cursor.to_string(),
        size_bytes: 256,
    }
}

/// Options with every timer far enough away not to fire during a test.
pub fn options_builder(feature_tag: &str) -> FlagKitOptionsBuilder {
    FlagKitOptions::builder("api-key", "https://api.example.com", feature_tag)
        .allow_short_intervals(true)
        .polling_interval(Duration::from_secs(3600))
        .events_flush_interval(Duration::from_secs(3600))
}

pub fn options(feature_tag: &str) -> FlagKitOptions {
    options_builder(feature_tag).build()
}

/// Collaborators of one test client, kept so tests can inspect them.
pub struct Harness {
    pub api: Arc<FakeApi>,
    pub evaluations: Arc<MemoryEvaluationStore>,
    pub events: Arc<MemoryEventStore>,
    pub preferences: Arc<MemoryKeyValueStore>,
    pub alarm: Arc<ManualAlarm>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            api: FakeApi::new(),
            evaluations: Arc::new(MemoryEvaluationStore::new()),
            events: Arc::new(MemoryEventStore::new()),
            preferences: Arc::new(MemoryKeyValueStore::new()),
            alarm: ManualAlarm::new(),
        }
    }

    pub fn builder(&self, options: FlagKitOptions) -> FlagKitClientBuilder {
        FlagKitClient::builder(options, User::new(USER_ID))
            .api(self.api.clone())
            .evaluation_store(self.evaluations.clone())
            .event_store(self.events.clone())
            .preferences(self.preferences.clone())
            .background_alarm(self.alarm.clone())
    }

    pub fn client(&self) -> FlagKitClient {
        self.builder(options("android"))
            .build()
            .expect("client builds")
    }
}

/// Wait until `condition` holds, yielding to the runtime in between.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
