//! Fan-out of per-project sweeps through a task queue.
//!
//! One fan-out lists the distinct projects in the store, enqueues a sweep
//! per project and re-enqueues itself after a fixed delay. Driven
//! repeatedly, that is the continuous polling loop.

use async_trait::async_trait;
use runwatch_store::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, Result};
use crate::reconciler::Reconciler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    SweepProject(String),
    FanOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub task: Task,
    pub delay: Duration,
}

impl ScheduledTask {
    pub fn now(task: Task) -> Self {
        Self {
            task,
            delay: Duration::ZERO,
        }
    }

    pub fn after(task: Task, delay: Duration) -> Self {
        Self { task, delay }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue every task or fail as a whole.
    async fn enqueue_multi(&self, tasks: Vec<ScheduledTask>) -> Result<()>;
}

/// Enqueue one sweep per known project plus a delayed fan-out.
///
/// Returns the number of sweeps enqueued. Projects with empty ids are skipped.
/// The delayed fan-out is enqueued even when listing projects fails, so the
/// polling loop outlives a transient store error; the error is still returned.
pub async fn fan_out(store: &StateStore, queue: &dyn TaskQueue, interval: Duration) -> Result<usize> {
    let reschedule = ScheduledTask::after(Task::FanOut, interval);
    let projects = match store.jobs().distinct_projects().await {
        Ok(projects) => projects,
        Err(err) => {
            warn!(error = %err, "Listing projects failed, rescheduling fan-out only");
            queue.enqueue_multi(vec![reschedule]).await?;
            return Err(err.into());
        }
    };

    let mut tasks: Vec<ScheduledTask> = projects
        .into_iter()
        .filter(|project| !project.is_empty())
        .map(|project| ScheduledTask::now(Task::SweepProject(project)))
        .collect();
    let sweeps = tasks.len();
    tasks.push(reschedule);

    queue.enqueue_multi(tasks).await?;
    debug!(sweeps, "Fan-out enqueued");
    Ok(sweeps)
}

// ============================================================================
// In-process queue
// ============================================================================

/// [`TaskQueue`] over a tokio channel, drained by [`TaskRunner`].
#[derive(Clone)]
pub struct LocalTaskQueue {
    tx: mpsc::UnboundedSender<ScheduledTask>,
}

impl LocalTaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue_multi(&self, tasks: Vec<ScheduledTask>) -> Result<()> {
        for task in tasks {
            self.tx
                .send(task)
                .map_err(|_| ReconcileError::TaskQueue("task runner stopped".to_string()))?;
        }
        Ok(())
    }
}

/// Executes queued tasks, each on its own tokio task after its delay.
pub struct TaskRunner {
    reconciler: Arc<Reconciler>,
    queue: Arc<dyn TaskQueue>,
    interval: Duration,
}

impl TaskRunner {
    pub fn new(reconciler: Arc<Reconciler>, queue: Arc<dyn TaskQueue>, interval: Duration) -> Self {
        Self {
            reconciler,
            queue,
            interval,
        }
    }

    /// Run until `shutdown` flips to `true` or every sender is dropped.
    pub async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<ScheduledTask>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_secs = self.interval.as_secs(), "Task runner started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = rx.recv() => {
                    let Some(scheduled) = next else { break };
                    let reconciler = Arc::clone(&self.reconciler);
                    let queue = Arc::clone(&self.queue);
                    let interval = self.interval;
                    tokio::spawn(async move {
                        if !scheduled.delay.is_zero() {
                            tokio::time::sleep(scheduled.delay).await;
                        }
                        execute(&reconciler, queue.as_ref(), interval, scheduled.task).await;
                    });
                }
            }
        }
        info!("Task runner stopped");
    }
}

async fn execute(reconciler: &Reconciler, queue: &dyn TaskQueue, interval: Duration, task: Task) {
    match task {
        Task::SweepProject(project_id) => {
            if let Err(err) = reconciler.reconcile_project(&project_id).await {
                warn!(project_id = %project_id, error = %err, "Sweep failed");
            }
        }
        Task::FanOut => {
            if let Err(err) = fan_out(reconciler.store(), queue, interval).await {
                warn!(error = %err, "Fan-out failed");
            }
        }
    }
}
