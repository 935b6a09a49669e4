//! FlagKit mobile client
//!
//! Client-side evaluation cache and sync engine for FlagKit feature flags.
//! Evaluations are computed server-side, synced differentially into a
//! durable local store and served synchronously from memory. Goal,
//! evaluation and metrics events are queued durably and sent in batches.
//!
//! # Quick Start
//!
//! ```no_run
//! use flagkit_mobile::{FlagKitClient, FlagKitOptions, SqliteStore, User};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> flagkit_mobile::Result<()> {
//!     let options =
//!         FlagKitOptions::builder("api-key", "https://api.example.com", "android").build();
//!     let store = Arc::new(SqliteStore::open("flagkit.db")?);
//!
//!     let client = FlagKitClient::builder(options, User::new("user-123"))
//!         .evaluation_store(store.clone())
//!         .event_store(store)
//!         .build()?;
//!
//!     // Initial fetch; starts foreground polling
//!     if let Some(Err(e)) = client.initialize(Duration::from_secs(5)).wait().await {
//!         eprintln!("initial fetch failed: {}", e);
//!     }
//!
//!     let dark_mode = client.bool_variation("dark-mode", false);
//!     client.track("checkout", 1.0);
//!
//!     // Lifecycle signals from the host
//!     client.on_background();
//!     client.on_foreground();
//!
//!     client.destroy();
//!     let _ = dark_mode;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod error;
pub mod http;
pub mod storage;
pub mod types;
mod client;

// Re-exports from types module
pub use types::{
    ApiId, Evaluation, EvaluationEvent, Event, EventPayload, GoalEvent, MetricsEvent,
    MetricsKind, Reason, ReasonType, User, SDK_VERSION, SOURCE_ID,
};

// Re-exports from error module
pub use error::{ErrorCode, FlagKitError, Result};

// Re-exports from core module
pub use core::{
    BackgroundAlarm, ChannelExecutor, Completion, EvaluationUpdateListener, FlagKitOptions,
    FlagKitOptionsBuilder, MainExecutor, TaskState, TokioAlarm,
};

// Re-exports from http module
pub use http::{ApiClient, HttpClient, RetryConfig};

// Re-exports from storage module
pub use storage::{
    EvaluationStore, EventStore, FilePreferences, KeyValueStore, MemoryEvaluationStore,
    MemoryEventStore, MemoryKeyValueStore, SqliteStore,
};

// Re-exports from client module
pub use client::{FlagKitClient, FlagKitClientBuilder};
