use std::time::Duration;

use crate::error::{FlagKitError, Result};
use crate::http::{parse_base_url, RetryConfig};

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;
pub const DEFAULT_BACKGROUND_POLLING_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_EVENTS_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_EVENTS_FLUSH_THRESHOLD: usize = 50;
pub const DEFAULT_EVENTS_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_BACKGROUND_POLLING_INTERVAL: Duration = Duration::from_secs(20 * 60);
pub const MIN_EVENTS_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct FlagKitOptions {
    pub api_key: String,
    pub api_endpoint: String,
    pub feature_tag: String,
    pub app_version: String,
    pub polling_interval: Duration,
    pub retry_interval: Duration,
    pub max_retry_count: u32,
    pub background_polling_interval: Duration,
    pub events_flush_interval: Duration,
    pub events_flush_threshold: usize,
    pub events_max_batch_size: usize,
    pub max_queue_size: usize,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl FlagKitOptions {
    pub fn builder(
        api_key: impl Into<String>,
        api_endpoint: impl Into<String>,
        feature_tag: impl Into<String>,
    ) -> FlagKitOptionsBuilder {
        FlagKitOptionsBuilder::new(api_key, api_endpoint, feature_tag)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(FlagKitError::config_error("API key is required"));
        }

        if self.api_endpoint.is_empty() {
            return Err(FlagKitError::config_error("API endpoint is required"));
        }
        parse_base_url(&self.api_endpoint)?;

        if self.feature_tag.is_empty() {
            return Err(FlagKitError::config_error("Feature tag is required"));
        }

        let intervals = [
            ("Polling interval", self.polling_interval),
            ("Retry interval", self.retry_interval),
            ("Background polling interval", self.background_polling_interval),
            ("Events flush interval", self.events_flush_interval),
            ("Timeout", self.timeout),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(FlagKitError::config_error(format!(
                "{} must be positive",
                name
            )));
        }

        if self.events_flush_threshold == 0 || self.events_max_batch_size == 0 {
            return Err(FlagKitError::config_error(
                "Event flush threshold and batch size must be positive",
            ));
        }

        Ok(())
    }
}

pub struct FlagKitOptionsBuilder {
    api_key: String,
    api_endpoint: String,
    feature_tag: String,
    app_version: String,
    polling_interval: Duration,
    retry_interval: Duration,
    max_retry_count: u32,
    background_polling_interval: Duration,
    events_flush_interval: Duration,
    events_flush_threshold: usize,
    events_max_batch_size: usize,
    max_queue_size: usize,
    timeout: Duration,
    retry: RetryConfig,
    allow_short_intervals: bool,
}

impl FlagKitOptionsBuilder {
    pub fn new(
        api_key: impl Into<String>,
        api_endpoint: impl Into<String>,
        feature_tag: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_endpoint: api_endpoint.into(),
            feature_tag: feature_tag.into(),
            app_version: String::new(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            background_polling_interval: DEFAULT_BACKGROUND_POLLING_INTERVAL,
            events_flush_interval: DEFAULT_EVENTS_FLUSH_INTERVAL,
            events_flush_threshold: DEFAULT_EVENTS_FLUSH_THRESHOLD,
            events_max_batch_size: DEFAULT_EVENTS_MAX_BATCH_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
            allow_short_intervals: false,
        }
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = count;
        self
    }

    pub fn background_polling_interval(mut self, interval: Duration) -> Self {
        self.background_polling_interval = interval;
        self
    }

    pub fn events_flush_interval(mut self, interval: Duration) -> Self {
        self.events_flush_interval = interval;
        self
    }

    pub fn events_flush_threshold(mut self, threshold: usize) -> Self {
        self.events_flush_threshold = threshold;
        self
    }

    pub fn events_max_batch_size(mut self, size: usize) -> Self {
        self.events_max_batch_size = size;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Skip the minimum interval clamping. Meant for tests.
    pub fn allow_short_intervals(mut self, allow: bool) -> Self {
        self.allow_short_intervals = allow;
        self
    }

    pub fn build(self) -> FlagKitOptions {
        let allow_short = self.allow_short_intervals;
        let clamp = |name: &str, value: Duration, min: Duration| {
            if allow_short || value.is_zero() || value >= min {
                value
            } else {
                tracing::warn!("{} {:?} is below the minimum, using {:?}", name, value, min);
                min
            }
        };

        FlagKitOptions {
            polling_interval: clamp("Polling interval", self.polling_interval, MIN_POLLING_INTERVAL),
            background_polling_interval: clamp(
                "Background polling interval",
                self.background_polling_interval,
                MIN_BACKGROUND_POLLING_INTERVAL,
            ),
            events_flush_interval: clamp(
                "Events flush interval",
                self.events_flush_interval,
                MIN_EVENTS_FLUSH_INTERVAL,
            ),
            api_key: self.api_key,
            api_endpoint: self.api_endpoint,
            feature_tag: self.feature_tag,
            app_version: self.app_version,
            retry_interval: self.retry_interval,
            max_retry_count: self.max_retry_count,
            events_flush_threshold: self.events_flush_threshold,
            events_max_batch_size: self.events_max_batch_size,
            max_queue_size: self.max_queue_size,
            timeout: self.timeout,
            retry: self.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn builder() -> FlagKitOptionsBuilder {
        FlagKitOptions::builder("api-key", "https://api.example.com", "android")
    }

    #[test]
    fn test_defaults() {
        let options = builder().build();
        assert_eq!(options.polling_interval, Duration::from_secs(600));
        assert_eq!(options.retry_interval, Duration::from_secs(60));
        assert_eq!(options.max_retry_count, 3);
        assert_eq!(options.background_polling_interval, Duration::from_secs(3600));
        assert_eq!(options.events_flush_interval, Duration::from_secs(60));
        assert_eq!(options.events_flush_threshold, 50);
        assert_eq!(options.events_max_batch_size, 50);
        assert_eq!(options.max_queue_size, 10_000);
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_short_intervals_are_clamped() {
        let options = builder()
            .polling_interval(Duration::from_secs(5))
            .background_polling_interval(Duration::from_secs(60))
            .build();
        assert_eq!(options.polling_interval, MIN_POLLING_INTERVAL);
        assert_eq!(options.background_polling_interval, MIN_BACKGROUND_POLLING_INTERVAL);
    }

    #[test]
    fn test_default_intervals_are_not_below_minimums() {
        assert!(DEFAULT_POLLING_INTERVAL >= MIN_POLLING_INTERVAL);
        assert!(DEFAULT_BACKGROUND_POLLING_INTERVAL >= MIN_BACKGROUND_POLLING_INTERVAL);
        assert!(DEFAULT_EVENTS_FLUSH_INTERVAL >= MIN_EVENTS_FLUSH_INTERVAL);
    }

    #[test]
    fn test_allow_short_intervals() {
        let options = builder()
            .allow_short_intervals(true)
            .polling_interval(Duration::from_millis(50))
            .events_flush_interval(Duration::from_secs(30))
            .build();
        assert_eq!(options.polling_interval, Duration::from_millis(50));
        assert_eq!(options.events_flush_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let error = FlagKitOptions::builder("", "https://api.example.com", "android")
            .build()
            .validate()
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::IllegalArgument);

        assert!(FlagKitOptions::builder("key", "", "android").build().validate().is_err());
        assert!(FlagKitOptions::builder("key", "https://api.example.com", "")
            .build()
            .validate()
            .is_err());
        assert!(FlagKitOptions::builder("key", "::bad::", "android")
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(builder().timeout(Duration::ZERO).build().validate().is_err());
        assert!(builder().retry_interval(Duration::ZERO).build().validate().is_err());
        assert!(builder().events_max_batch_size(0).build().validate().is_err());
    }
}
