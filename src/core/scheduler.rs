//! Adaptive foreground/background scheduling.
//!
//! Each foreground task polls at its normal interval. After a failure it
//! switches to the shorter retry interval for up to `max_retry_count`
//! attempts, then falls back to the normal cadence. When the host goes to
//! the background every task is suspended and a [`BackgroundAlarm`] takes
//! over at the background interval; foregrounding reverses this.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::{DEFAULT_MAX_RETRY_COUNT, DEFAULT_POLLING_INTERVAL, DEFAULT_RETRY_INTERVAL};

/// Callback type for poll operations.
///
/// Resolves to `Ok(())` on success and `Err(())` on any failure.
pub type PollCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), ()>> + Send>> + Send + Sync>;

/// Callback fired by a [`BackgroundAlarm`].
pub type AlarmCallback = Arc<dyn Fn() + Send + Sync>;

/// Configuration for one polling task.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Normal polling interval. Default: 10 minutes
    pub interval: Duration,

    /// Interval while retrying after a failure. Default: 1 minute
    pub retry_interval: Duration,

    /// Retries at the short interval before falling back. Default: 3
    pub max_retry_count: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLLING_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
        }
    }
}

impl PollingConfig {
    pub fn builder() -> PollingConfigBuilder {
        PollingConfigBuilder::default()
    }
}

/// Builder for PollingConfig.
#[derive(Debug, Default)]
pub struct PollingConfigBuilder {
    interval: Option<Duration>,
    retry_interval: Option<Duration>,
    max_retry_count: Option<u32>,
}

impl PollingConfigBuilder {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = Some(count);
        self
    }

    pub fn build(self) -> PollingConfig {
        PollingConfig {
            interval: self.interval.unwrap_or(DEFAULT_POLLING_INTERVAL),
            retry_interval: self.retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL),
            max_retry_count: self.max_retry_count.unwrap_or(DEFAULT_MAX_RETRY_COUNT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Normal,
    Retrying { retry_count: u32 },
    Suspended,
}

/// Interval state machine of one polling task.
#[derive(Debug, Clone)]
pub struct RetryCadence {
    config: PollingConfig,
    state: TaskState,
}

impl RetryCadence {
    pub fn new(config: PollingConfig) -> Self {
        Self {
            config,
            state: TaskState::Normal,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Delay until the next run in the current state.
    pub fn current_interval(&self) -> Duration {
        match self.state {
            TaskState::Retrying { .. } => self.config.retry_interval,
            TaskState::Normal | TaskState::Suspended => self.config.interval,
        }
    }

    /// Record the result of a run and return the delay until the next one.
    pub fn on_result(&mut self, success: bool) -> Duration {
        self.state = match (self.state, success) {
            (TaskState::Suspended, _) => TaskState::Suspended,
            (_, true) => TaskState::Normal,
            (TaskState::Normal, false) => {
                if self.config.retry_interval < self.config.interval
                    && self.config.max_retry_count > 0
                {
                    TaskState::Retrying { retry_count: 1 }
                } else {
                    TaskState::Normal
                }
            }
            (TaskState::Retrying { retry_count }, false) => {
                if retry_count < self.config.max_retry_count {
                    TaskState::Retrying {
                        retry_count: retry_count + 1,
                    }
                } else {
                    TaskState::Normal
                }
            }
        };
        self.current_interval()
    }

    pub fn suspend(&mut self) {
        self.state = TaskState::Suspended;
    }

    pub fn resume(&mut self) {
        self.state = TaskState::Normal;
    }
}

/// A foreground polling task driven by a tokio timer.
///
/// The callback is expected to hand its work to the worker and wait for
/// the result; the timer itself never touches the stores.
pub struct PollingTask {
    name: &'static str,
    cadence: Arc<Mutex<RetryCadence>>,
    handle: Handle,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    is_running: Arc<AtomicBool>,
    run_id: Arc<AtomicU64>,
}

impl PollingTask {
    pub fn new(name: &'static str, config: PollingConfig, handle: Handle) -> Self {
        let mut cadence = RetryCadence::new(config);
        cadence.suspend();
        Self {
            name,
            cadence: Arc::new(Mutex::new(cadence)),
            handle,
            shutdown_tx: Mutex::new(None),
            is_running: Arc::new(AtomicBool::new(false)),
            run_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start polling in the Normal state. No-op if already running.
    pub fn start(&self, on_poll: PollCallback) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        self.cadence.lock().resume();

        let run = self.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let run_id = Arc::clone(&self.run_id);
        let cadence = Arc::clone(&self.cadence);
        let name = self.name;

        self.handle.spawn(async move {
            loop {
                let delay = cadence.lock().current_interval();

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("{} task shutting down", name);
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        let success = on_poll().await.is_ok();

                        // A stop/start pair may have replaced this run meanwhile.
                        if run_id.load(Ordering::SeqCst) != run {
                            break;
                        }
                        let mut guard = cadence.lock();
                        let next = guard.on_result(success);
                        tracing::debug!(
                            "{} task {} (state: {:?}), next run in {:?}",
                            name,
                            if success { "succeeded" } else { "failed" },
                            guard.state(),
                            next
                        );
                    }
                }
            }
        });

        tracing::debug!("{} task started", self.name);
    }

    /// Stop polling and move to Suspended.
    pub fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.run_id.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender wakes the loop's shutdown branch.
        self.shutdown_tx.lock().take();
        self.cadence.lock().suspend();
        tracing::debug!("{} task stopped", self.name);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TaskState {
        self.cadence.lock().state()
    }

    pub fn current_interval(&self) -> Duration {
        self.cadence.lock().current_interval()
    }
}

impl Drop for PollingTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Platform alarm used while the host is in the background.
pub trait BackgroundAlarm: Send + Sync {
    /// Fire `callback` every `interval` until cancelled. Replaces any
    /// previous schedule.
    fn schedule(&self, interval: Duration, callback: AlarmCallback);

    fn cancel(&self);
}

/// Repeating alarm backed by a tokio task.
pub struct TokioAlarm {
    handle: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TokioAlarm {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            task: Mutex::new(None),
        }
    }
}

impl BackgroundAlarm for TokioAlarm {
    fn schedule(&self, interval: Duration, callback: AlarmCallback) {
        let task = self.handle.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                callback();
            }
        });
        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    fn cancel(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for TokioAlarm {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Foreground tasks plus the background alarm, switched by lifecycle signals.
pub struct TaskScheduler {
    tasks: Vec<(PollingTask, PollCallback)>,
    alarm: Arc<dyn BackgroundAlarm>,
    background_interval: Duration,
    background_callback: AlarmCallback,
}

impl TaskScheduler {
    pub fn new(
        alarm: Arc<dyn BackgroundAlarm>,
        background_interval: Duration,
        background_callback: AlarmCallback,
    ) -> Self {
        Self {
            tasks: Vec::new(),
            alarm,
            background_interval,
            background_callback,
        }
    }

    pub fn with_task(mut self, task: PollingTask, callback: PollCallback) -> Self {
        self.tasks.push((task, callback));
        self
    }

    /// Cancel the background alarm and (re)start every task in Normal.
    pub fn on_foreground(&self) {
        self.alarm.cancel();
        for (task, callback) in &self.tasks {
            task.start(Arc::clone(callback));
        }
    }

    /// Suspend every task and arm the background alarm.
    pub fn on_background(&self) {
        for (task, _) in &self.tasks {
            task.stop();
        }
        self.alarm
            .schedule(self.background_interval, Arc::clone(&self.background_callback));
    }

    /// Stop everything, alarm included.
    pub fn stop(&self) {
        for (task, _) in &self.tasks {
            task.stop();
        }
        self.alarm.cancel();
    }

    pub fn task_state(&self, name: &str) -> Option<TaskState> {
        self.tasks
            .iter()
            .find(|(task, _)| task.name == name)
            .map(|(task, _)| task.state())
    }
}
