//! Task status poller.
//!
//! One poller per screen. `start` fetches the task immediately and then on a
//! fixed interval until a terminal status is observed, publishing every
//! observation through a `watch` channel. Every loop carries a generation
//! number; a publish from a loop whose generation is no longer current is
//! dropped under the channel lock, so nothing lands after `cancel` or a
//! restart returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::model::{Task, TaskId};
use crate::{AppError, AppResult, ErrorKind, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};

/// Where the poller reads task status from. Implemented by
/// [`crate::api::ApiClient`] against `GET /tasks/{id}`.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn fetch_status(&self, task_id: &TaskId) -> AppResult<Task>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_duration: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: None,
        }
    }
}

impl From<&ClientConfig> for PollerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_duration: config.poll_max_duration(),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.interval < MIN_POLL_INTERVAL {
            return Err(AppError::new(
                ErrorKind::Configuration,
                format!("poll interval must be at least {MIN_POLL_INTERVAL:?}"),
            ));
        }
        if matches!(self.max_duration, Some(max) if max.is_zero()) {
            return Err(AppError::new(
                ErrorKind::Configuration,
                "max poll duration cannot be zero",
            ));
        }
        Ok(())
    }
}

/// What the screen sees of the task being polled.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PollSnapshot {
    pub task_id: Option<TaskId>,
    /// Latest observation; replaced wholesale on every successful fetch.
    pub task: Option<Task>,
    pub is_polling: bool,
    /// Most recent fetch failure. Cleared by the next successful fetch.
    pub last_error: Option<AppError>,
    pub attempts: u32,
}

impl PollSnapshot {
    fn started(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            is_polling: true,
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.task.as_ref().is_some_and(Task::is_terminal)
    }
}

struct Shared {
    tx: watch::Sender<PollSnapshot>,
    generation: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Applies `f` only if `generation` is still current. The check runs
    /// under the channel lock, which `cancel` and `start` also take.
    fn publish<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut PollSnapshot),
    {
        let mut applied = false;
        self.tx.send_if_modified(|snapshot| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            f(snapshot);
            applied = true;
            true
        });
        applied
    }
}

pub struct TaskPoller {
    source: Arc<dyn TaskStatusSource>,
    config: PollerConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPoller")
            .field("config", &self.config)
            .field("snapshot", &*self.shared.tx.borrow())
            .finish_non_exhaustive()
    }
}

impl TaskPoller {
    pub fn new(source: Arc<dyn TaskStatusSource>, config: PollerConfig) -> Self {
        let (tx, _rx) = watch::channel(PollSnapshot::default());
        Self {
            source,
            config,
            shared: Arc::new(Shared {
                tx,
                generation: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Starts polling `task_id`, replacing any loop already running on this
    /// poller. Must be called from within a tokio runtime.
    pub fn start(&self, task_id: TaskId) -> AppResult<()> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AppError::new(ErrorKind::InvalidState, "task poller needs an async runtime")
                .with_internal(e.to_string())
        })?;

        let mut generation = 0;
        self.shared.tx.send_modify(|snapshot| {
            generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *snapshot = PollSnapshot::started(task_id.clone());
        });

        let handle = runtime.spawn(run(
            Arc::clone(&self.source),
            Arc::clone(&self.shared),
            self.config,
            task_id,
            generation,
        ));

        if let Some(previous) = self.lock_worker().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stops polling. Once this returns the snapshot no longer changes, even
    /// if a request that was already in flight completes. A failed tick
    /// before the cancel is forgotten, since the caller chose to stop.
    pub fn cancel(&self) {
        self.shared.tx.send_if_modified(|snapshot| {
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            let was_polling = snapshot.is_polling;
            if was_polling {
                snapshot.is_polling = false;
                snapshot.last_error = None;
            }
            was_polling
        });
        if let Some(worker) = self.lock_worker().take() {
            worker.abort();
            debug!(task_id = ?self.shared.tx.borrow().task_id, "Polling cancelled");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.shared.tx.borrow().clone()
    }

    pub fn is_polling(&self) -> bool {
        self.shared.tx.borrow().is_polling
    }

    /// Resolves once polling stops: the terminal task, or `None` when the
    /// loop was cancelled, timed out, or never started.
    pub async fn wait_terminal(&self) -> Option<Task> {
        let mut rx = self.subscribe();
        let snapshot = rx.wait_for(|s| !s.is_polling).await.ok()?.clone();
        snapshot.task.filter(Task::is_terminal)
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for TaskPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[instrument(skip(source, shared, config), fields(task_id = %task_id))]
async fn run(
    source: Arc<dyn TaskStatusSource>,
    shared: Arc<Shared>,
    config: PollerConfig,
    task_id: TaskId,
    generation: u64,
) {
    let polling = poll_until_terminal(source.as_ref(), &shared, config.interval, &task_id, generation);

    let Some(max) = config.max_duration else {
        polling.await;
        return;
    };

    if time::timeout(max, polling).await.is_err() {
        warn!(max_duration = ?max, "Task polling timed out");
        let err = AppError::new(ErrorKind::Timeout, "The task is taking longer than expected.")
            .with_context("task_id", task_id.as_str());
        shared.publish(generation, |s| {
            s.is_polling = false;
            s.last_error = Some(err);
        });
    }
}

async fn poll_until_terminal(
    source: &dyn TaskStatusSource,
    shared: &Shared,
    interval: Duration,
    task_id: &TaskId,
    generation: u64,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !shared.is_current(generation) {
            return;
        }

        let result = source.fetch_status(task_id).await;
        let mut terminal = false;

        let applied = shared.publish(generation, |s| {
            s.attempts = s.attempts.saturating_add(1);
            match result {
                Ok(task) => {
                    debug!(status = %task.status, attempt = s.attempts, "Task observed");
                    terminal = task.is_terminal();
                    if terminal {
                        s.is_polling = false;
                    }
                    s.task = Some(task);
                    s.last_error = None;
                }
                Err(err) => {
                    warn!(error = %err, attempt = s.attempts, "Task status fetch failed, will retry");
                    s.last_error = Some(err);
                }
            }
        });

        if !applied {
            debug!("Stale poll result dropped");
            return;
        }
        if terminal {
            info!("Task reached terminal status");
            return;
        }
    }
}
