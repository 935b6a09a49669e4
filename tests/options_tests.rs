mod common;

use common::*;
use std::time::Duration;

use flagkit_mobile::core::{
    DEFAULT_EVENTS_FLUSH_INTERVAL, DEFAULT_EVENTS_FLUSH_THRESHOLD, DEFAULT_POLLING_INTERVAL,
    MIN_BACKGROUND_POLLING_INTERVAL, MIN_EVENTS_FLUSH_INTERVAL, MIN_POLLING_INTERVAL,
};
use flagkit_mobile::{ErrorCode, FlagKitClient, FlagKitOptions, RetryConfig, User};

#[test]
fn test_default_values() {
    let options = FlagKitOptions::builder("sdk_key", "https://api.example.com", "ios").build();

    assert_eq!(options.api_key, "sdk_key");
    assert_eq!(options.feature_tag, "ios");
    assert_eq!(options.app_version, "");
    assert_eq!(options.polling_interval, DEFAULT_POLLING_INTERVAL);
    assert_eq!(options.events_flush_interval, DEFAULT_EVENTS_FLUSH_INTERVAL);
    assert_eq!(options.events_flush_threshold, DEFAULT_EVENTS_FLUSH_THRESHOLD);
    assert_eq!(options.retry.max_attempts, 4);
    assert_eq!(options.retry.base_delay_ms, 1000);
}

#[test]
fn test_builder_custom_values() {
    let options = FlagKitOptions::builder("sdk_key", "https://api.example.com", "ios")
        .app_version("2.4.0")
        .polling_interval(Duration::from_secs(120))
        .retry_interval(Duration::from_secs(90))
        .max_retry_count(5)
        .background_polling_interval(Duration::from_secs(1800))
        .events_flush_interval(Duration::from_secs(300))
        .events_flush_threshold(20)
        .events_max_batch_size(25)
        .max_queue_size(500)
        .timeout(Duration::from_secs(10))
        .retry(RetryConfig::builder().max_attempts(2).base_delay_ms(50).build())
        .build();

    assert_eq!(options.app_version, "2.4.0");
    assert_eq!(options.polling_interval, Duration::from_secs(120));
    assert_eq!(options.retry_interval, Duration::from_secs(90));
    assert_eq!(options.max_retry_count, 5);
    assert_eq!(options.background_polling_interval, Duration::from_secs(1800));
    assert_eq!(options.events_flush_interval, Duration::from_secs(300));
    assert_eq!(options.events_flush_threshold, 20);
    assert_eq!(options.events_max_batch_size, 25);
    assert_eq!(options.max_queue_size, 500);
    assert_eq!(options.timeout, Duration::from_secs(10));
    assert_eq!(options.retry.max_attempts, 2);
    assert_eq!(options.retry.base_delay_ms, 50);
    assert!(options.validate().is_ok());
}

#[test]
fn test_minimum_intervals_applied() {
    let options = FlagKitOptions::builder("sdk_key", "https://api.example.com", "ios")
        .polling_interval(Duration::from_secs(1))
        .background_polling_interval(Duration::from_secs(1))
        .events_flush_interval(Duration::from_secs(1))
        .build();

    assert_eq!(options.polling_interval, MIN_POLLING_INTERVAL);
    assert_eq!(options.background_polling_interval, MIN_BACKGROUND_POLLING_INTERVAL);
    assert_eq!(options.events_flush_interval, MIN_EVENTS_FLUSH_INTERVAL);
}

#[test]
fn test_endpoint_must_be_http() {
    for endpoint in ["ftp://api.example.com", "not a url"] {
        let error = FlagKitOptions::builder("sdk_key", endpoint, "ios")
            .build()
            .validate()
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::IllegalArgument);
    }
    assert!(FlagKitOptions::builder("sdk_key", "http://localhost:9000/api", "ios")
        .build()
        .validate()
        .is_ok());
}

#[tokio::test]
async fn test_client_build_validates_options() {
    let harness = Harness::new();
    let options = options_builder("android").events_flush_threshold(0).build();

    let result = harness.builder(options).build();
    assert_eq!(result.err().map(|e| e.code), Some(ErrorCode::IllegalArgument));
}

#[tokio::test]
async fn test_client_exposes_options_and_user() {
    let harness = Harness::new();
    let client = FlagKitClient::builder(
        options("android"),
        User::new(USER_ID).with_attribute("country", "jp"),
    )
    .api(harness.api.clone())
    .background_alarm(harness.alarm.clone())
    .build()
    .unwrap();

    assert_eq!(client.options().feature_tag, "android");
    assert_eq!(client.user().id, USER_ID);
    assert_eq!(
        client.user().attributes().get("country").map(String::as_str),
        Some("jp")
    );
}

#[tokio::test]
async fn test_closed_requests_retried_per_retry_config() {
    let harness = Harness::new();
    let options = options_builder("android")
        .retry(RetryConfig::builder().max_attempts(3).base_delay_ms(1).build())
        .build();
    let client = harness.builder(options).build().unwrap();

    harness.api.fail(ErrorCode::ClientClosed);
    harness.api.fail(ErrorCode::ClientClosed);
    harness.api.respond(full_response("c1", vec![]));
    assert!(matches!(client.fetch_evaluations(None).wait().await, Some(Ok(()))));
    assert_eq!(harness.api.fetch_count(), 3);

    // Attempts exhausted
    for _ in 0..3 {
        harness.api.fail(ErrorCode::ClientClosed);
    }
    match client.fetch_evaluations(None).wait().await {
        Some(Err(e)) => assert_eq!(e.code, ErrorCode::ClientClosed),
        other => panic!("unexpected result: {:?}", other.map(|r| r.is_ok())),
    }
    assert_eq!(harness.api.fetch_count(), 6);
}

#[tokio::test]
async fn test_other_errors_not_retried() {
    let harness = Harness::new();
    let client = harness.client();

    harness.api.fail(ErrorCode::Unauthorized);
    match client.fetch_evaluations(None).wait().await {
        Some(Err(e)) => assert_eq!(e.code, ErrorCode::Unauthorized),
        other => panic!("unexpected result: {:?}", other.map(|r| r.is_ok())),
    }
    assert_eq!(harness.api.fetch_count(), 1);
}
