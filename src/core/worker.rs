//! Serialized worker.
//!
//! Every store mutation (fetch reconciliation, event append and delete,
//! sync-state writes) runs as a job on one tokio task, one job at a time.
//! Timers and public API calls only submit jobs here.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::error::{FlagKitError, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct Worker {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl Worker {
    /// Start a worker task on `handle`.
    pub fn with_handle(handle: Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            tracing::debug!("Worker stopped");
        });

        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Queue `job` behind every previously submitted job.
    ///
    /// A job must not wait on another job it submits, or the worker stalls.
    pub fn submit<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let _ = result_tx.send(job.await);
        });

        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| FlagKitError::illegal_state("Worker is shut down"))?;
        tx.send(wrapped)
            .map_err(|_| FlagKitError::illegal_state("Worker is shut down"))?;
        Ok(result_rx)
    }

    /// Stop accepting jobs. Jobs already queued still run.
    pub fn shutdown(&self) {
        if self.tx.lock().take().is_some() {
            tracing::debug!("Worker shutting down");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().as_ref().map_or(false, |tx| !tx.is_closed())
    }
}

/// Handle to the result of a fetch or flush.
///
/// Resolves to `None` when the operation was superseded by a newer one
/// before it could run; superseded operations never report a result.
pub struct Completion {
    rx: oneshot::Receiver<Option<Result<()>>>,
}

impl Completion {
    pub(crate) fn new(rx: oneshot::Receiver<Option<Result<()>>>) -> Self {
        Self { rx }
    }

    /// A completion that is already resolved.
    pub(crate) fn ready(result: Option<Result<()>>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    pub async fn wait(self) -> Option<Result<()>> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Some(Err(FlagKitError::illegal_state(
                "Worker stopped before the operation completed",
            ))),
        }
    }
}
