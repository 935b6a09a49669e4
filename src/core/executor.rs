//! Host main-context executor.
//!
//! Listener callbacks never run on the worker. They are posted to a
//! [`MainExecutor`], which on a mobile host wraps the UI thread. The
//! default [`ChannelExecutor`] runs them one by one on a dedicated thread.

use std::thread;
use tokio::sync::mpsc;

use crate::error::{ErrorCode, FlagKitError, Result};

pub type MainTask = Box<dyn FnOnce() + Send + 'static>;

pub trait MainExecutor: Send + Sync {
    fn post(&self, task: MainTask);
}

/// Runs posted tasks sequentially on a thread named `flagkit-main`.
///
/// The thread exits once the executor is dropped and the queue is drained.
pub struct ChannelExecutor {
    tx: mpsc::UnboundedSender<MainTask>,
}

impl ChannelExecutor {
    pub fn new() -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<MainTask>();

        thread::Builder::new()
            .name("flagkit-main".to_string())
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    task();
                }
                tracing::debug!("Main executor stopped");
            })
            .map_err(|e| {
                FlagKitError::with_source(
                    ErrorCode::IllegalState,
                    "Failed to start main executor thread",
                    e,
                )
            })?;

        Ok(Self { tx })
    }
}

impl MainExecutor for ChannelExecutor {
    fn post(&self, task: MainTask) {
        if self.tx.send(task).is_err() {
            tracing::warn!("Main executor is gone, dropping task");
        }
    }
}
