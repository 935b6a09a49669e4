mod api;
pub mod cancellation;
mod client;
pub mod retry;

pub use api::{
    ApiClient, ApiFuture, GetEvaluationsRequest, GetEvaluationsResponse, RegisterEventError,
    RegisterEventsRequest, RegisterEventsResponse, UserEvaluationCondition, UserEvaluations,
};
pub use cancellation::{CancellationCoordinator, Generation};
pub use client::{parse_base_url, HttpClient};
pub use retry::{
    is_retryable, with_retry, with_retry_predicate, RetryConfig, RetryConfigBuilder, RetryOutcome,
};
