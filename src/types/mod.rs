use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ErrorCode;

/// SDK version reported to the server.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source identifier reported with every request and event.
pub const SOURCE_ID: &str = "rust-mobile";

/// A user whose flags are evaluated server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonType {
    Target,
    Rule,
    Default,
    Client,
    OffVariation,
    Prerequisite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reason {
    #[serde(rename = "type")]
    pub reason_type: ReasonType,
    #[serde(default)]
    pub rule_id: String,
}

impl Reason {
    pub fn new(reason_type: ReasonType) -> Self {
        Self {
            reason_type,
            rule_id: String::new(),
        }
    }
}

/// The computed variation of one feature flag for one user.
///
/// Stored keyed by `(user_id, feature_id)`; there is at most one row per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: String,
    pub feature_id: String,
    pub feature_version: i32,
    pub user_id: String,
    pub variation_id: String,
    #[serde(default)]
    pub variation_name: String,
    pub variation_value: String,
    pub reason: Reason,
}

impl Evaluation {
    /// Evaluation id as the server formats it.
    pub fn make_id(feature_id: &str, feature_version: i32, user_id: &str) -> String {
        format!("{}:{}:{}", feature_id, feature_version, user_id)
    }
}

/// Server API an event or metric refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiId {
    GetEvaluations,
    RegisterEvents,
}

/// Kind of a metrics event. Together with [`ApiId`] it forms the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricsKind {
    Latency,
    ResponseSize,
    TimeoutError,
    NetworkError,
    RedirectError,
    BadRequestError,
    UnauthorizedError,
    ForbiddenError,
    NotFoundError,
    MethodNotAllowedError,
    PayloadTooLargeError,
    ClientClosedError,
    ServerError,
    InternalSdkError,
    UnknownError,
}

impl MetricsKind {
    pub fn for_error(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Timeout => MetricsKind::TimeoutError,
            ErrorCode::Network => MetricsKind::NetworkError,
            ErrorCode::Redirect => MetricsKind::RedirectError,
            ErrorCode::BadRequest => MetricsKind::BadRequestError,
            ErrorCode::Unauthorized => MetricsKind::UnauthorizedError,
            ErrorCode::Forbidden => MetricsKind::ForbiddenError,
            ErrorCode::NotFound => MetricsKind::NotFoundError,
            ErrorCode::MethodNotAllowed => MetricsKind::MethodNotAllowedError,
            ErrorCode::PayloadTooLarge => MetricsKind::PayloadTooLargeError,
            ErrorCode::ClientClosed => MetricsKind::ClientClosedError,
            ErrorCode::ServerError => MetricsKind::ServerError,
            ErrorCode::IllegalArgument | ErrorCode::IllegalState => MetricsKind::InternalSdkError,
            ErrorCode::Unknown => MetricsKind::UnknownError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalEvent {
    pub goal_id: String,
    pub user_id: String,
    pub value: f64,
    pub user: User,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationEvent {
    pub feature_id: String,
    pub feature_version: i32,
    pub user_id: String,
    pub variation_id: String,
    pub user: User,
    pub reason: Reason,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEvent {
    pub kind: MetricsKind,
    pub api_id: ApiId,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Latency in seconds or size in bytes; absent for error counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricsEvent {
    pub fn dedup_key(&self) -> (ApiId, MetricsKind) {
        (self.api_id, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    Goal(GoalEvent),
    Evaluation(EvaluationEvent),
    Metrics(MetricsEvent),
}

/// A telemetry event waiting in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub source_id: String,
    pub sdk_version: String,
    #[serde(rename = "event")]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            source_id: SOURCE_ID.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            payload,
        }
    }

    pub fn metrics_key(&self) -> Option<(ApiId, MetricsKind)> {
        match &self.payload {
            EventPayload::Metrics(metrics) => Some(metrics.dedup_key()),
            _ => None,
        }
    }
}
