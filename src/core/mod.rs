mod cache;
mod config;
mod evaluation_sync;
mod event_queue;
mod executor;
mod listeners;
mod scheduler;
mod user_holder;
mod worker;

pub use cache::EvaluationCache;
pub use config::{
    FlagKitOptions, FlagKitOptionsBuilder, DEFAULT_BACKGROUND_POLLING_INTERVAL,
    DEFAULT_EVENTS_FLUSH_INTERVAL, DEFAULT_EVENTS_FLUSH_THRESHOLD, DEFAULT_EVENTS_MAX_BATCH_SIZE,
    DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRY_COUNT, DEFAULT_POLLING_INTERVAL,
    DEFAULT_RETRY_INTERVAL, DEFAULT_TIMEOUT, MIN_BACKGROUND_POLLING_INTERVAL,
    MIN_EVENTS_FLUSH_INTERVAL, MIN_POLLING_INTERVAL,
};
pub use evaluation_sync::{EvaluationSyncEngine, FetchOutcome};
pub use event_queue::{EventDispatcher, EventQueueConfig, EventQueueConfigBuilder, SendOutcome};
pub use executor::{ChannelExecutor, MainExecutor, MainTask};
pub use listeners::{EvaluationUpdateListener, UpdateListeners};
pub use scheduler::{
    AlarmCallback, BackgroundAlarm, PollCallback, PollingConfig, PollingConfigBuilder,
    PollingTask, RetryCadence, TaskScheduler, TaskState, TokioAlarm,
};
pub use user_holder::UserHolder;
pub use worker::{Completion, Worker};
