//! Remote collaborator contract and wire types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Evaluation, Event, User, SDK_VERSION, SOURCE_ID};

/// Boxed future returned by [`ApiClient`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Remote evaluation and event endpoints.
///
/// Implementations enforce the per-call `timeout` and surface it as
/// [`ErrorCode::Timeout`](crate::error::ErrorCode::Timeout).
pub trait ApiClient: Send + Sync {
    fn get_evaluations(
        &self,
        request: GetEvaluationsRequest,
        timeout: Duration,
    ) -> ApiFuture<'_, GetEvaluationsResponse>;

    fn register_events(
        &self,
        request: RegisterEventsRequest,
        timeout: Duration,
    ) -> ApiFuture<'_, RegisterEventsResponse>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvaluationCondition {
    pub evaluated_at: String,
    pub user_attributes_updated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEvaluationsRequest {
    pub tag: String,
    pub user: User,
    pub user_evaluations_id: String,
    pub user_evaluation_condition: UserEvaluationCondition,
    pub source_id: String,
    pub sdk_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_version: String,
}

impl GetEvaluationsRequest {
    pub fn new(
        tag: impl Into<String>,
        user: User,
        user_evaluations_id: impl Into<String>,
        condition: UserEvaluationCondition,
    ) -> Self {
        Self {
            tag: tag.into(),
            user,
            user_evaluations_id: user_evaluations_id.into(),
            user_evaluation_condition: condition,
            source_id: SOURCE_ID.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            app_version: String::new(),
        }
    }

    pub fn with_app_version(mut self, app_version: impl Into<String>) -> Self {
        self.app_version = app_version.into();
        self
    }
}

/// Evaluation snapshot or delta returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvaluations {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,
    /// Watermark, persisted as `evaluated_at`.
    #[serde(default)]
    pub created_at: String,
    /// `true`: `evaluations` replaces everything. `false`: it is a delta.
    #[serde(default)]
    pub force_update: bool,
    #[serde(default)]
    pub archived_feature_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEvaluationsResponse {
    pub evaluations: UserEvaluations,
    /// New sync cursor. Equal to the one sent means nothing changed.
    pub user_evaluations_id: String,
    /// Size of the response body, filled in by the transport.
    #[serde(skip)]
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEventsRequest {
    pub events: Vec<Event>,
    pub source_id: String,
    pub sdk_version: String,
}

impl RegisterEventsRequest {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            source_id: SOURCE_ID.to_string(),
            sdk_version: SDK_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEventError {
    pub retriable: bool,
    #[serde(default)]
    pub message: String,
}

/// Per-event outcome of a batch registration, keyed by event id.
///
/// Events missing from `errors` were accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEventsResponse {
    #[serde(default)]
    pub errors: HashMap<String, RegisterEventError>,
}

impl RegisterEventsResponse {
    /// Whether an event should be removed from the queue after this response.
    pub fn is_settled(&self, event_id: &str) -> bool {
        self.errors.get(event_id).map_or(true, |error| !error.retriable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "evaluations": {
                "id": "snapshot",
                "evaluations": [{
                    "id": "f1:1:user",
                    "featureId": "f1",
                    "featureVersion": 1,
                    "userId": "user",
                    "variationId": "v1",
                    "variationName": "on",
                    "variationValue": "true",
                    "reason": {"type": "DEFAULT"}
                }],
                "createdAt": "1700000000",
                "forceUpdate": true
            },
            "userEvaluationsId": "c1"
        }"#;

        let response: GetEvaluationsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.user_evaluations_id, "c1");
        assert!(response.evaluations.force_update);
        assert!(response.evaluations.archived_feature_ids.is_empty());
        assert_eq!(response.evaluations.evaluations[0].variation_value, "true");
    }

    #[test]
    fn test_request_serialization() {
        let request = GetEvaluationsRequest::new(
            "android",
            User::new("user"),
            "c0",
            UserEvaluationCondition {
                evaluated_at: "0".to_string(),
                user_attributes_updated: true,
            },
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["userEvaluationsId"], "c0");
        assert_eq!(json["userEvaluationCondition"]["userAttributesUpdated"], true);
        assert_eq!(json["sourceId"], SOURCE_ID);
        assert!(json.get("appVersion").is_none());

        let json = serde_json::to_value(request.with_app_version("2.4.0")).unwrap();
        assert_eq!(json["appVersion"], "2.4.0");
    }

    #[test]
    fn test_is_settled() {
        let json = r#"{"errors": {
            "a": {"retriable": false, "message": "invalid"},
            "b": {"retriable": true}
        }}"#;
        let response: RegisterEventsResponse = serde_json::from_str(json).unwrap();
        assert!(response.is_settled("a"));
        assert!(!response.is_settled("b"));
        assert!(response.is_settled("c"));
    }
}
