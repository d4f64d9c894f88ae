//! Polls submitted export tasks until none is active.
//!
//! The wait between rounds grows geometrically up to a ceiling, and can be
//! bounded by a timeout or ended through a [`CancellationToken`]. Ending the
//! wait never touches the remote jobs.
use crate::client::EarthEngine;
use crate::error::{config_error, Result};
use crate::export::{ExportTask, TaskState, TaskStatus};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub max_interval_secs: u64,
    pub backoff_factor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_interval_secs: 300,
            backoff_factor: 1.5,
            timeout_secs: None,
        }
    }
}

impl MonitorSettings {
    pub fn validate(self: &Self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(config_error("poll_interval_secs must be at least 1"));
        }
        if self.max_interval_secs < self.poll_interval_secs {
            return Err(config_error(
                "max_interval_secs must not be below poll_interval_secs",
            ));
        }
        if !(self.backoff_factor >= 1.0) || !self.backoff_factor.is_finite() {
            return Err(config_error(format!(
                "backoff_factor must be finite and >= 1, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    pub fn poll_interval(self: &Self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(self: &Self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Interval following `current`, capped at `max_interval_secs`.
    pub fn next_interval(self: &Self, current: Duration) -> Duration {
        let max = Duration::from_secs(self.max_interval_secs);
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .map_or(max, |next| next.min(max))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Every task reached a terminal state.
    Finished,
    TimedOut,
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct TaskProgress {
    pub task: ExportTask,
    pub status: TaskStatus,
    pub polls: usize,
}

#[derive(Clone, Debug)]
pub struct MonitorSummary {
    pub outcome: MonitorOutcome,
    pub tasks: Vec<TaskProgress>,
    pub rounds: usize,
}

impl MonitorSummary {
    pub fn count(self: &Self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.status.state == state).count()
    }

    pub fn active(self: &Self) -> usize {
        self.tasks.iter().filter(|t| t.status.state.is_active()).count()
    }

    /// Tasks that ended in FAILED or CANCELLED.
    pub fn unsuccessful(self: &Self) -> Vec<&TaskProgress> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status.state, TaskState::Failed | TaskState::Cancelled))
            .collect()
    }

    pub fn log_summary(self: &Self) {
        match self.outcome {
            MonitorOutcome::Finished => info!("all tasks finished"),
            MonitorOutcome::TimedOut => {
                warn!("timed out with {} task(s) still active", self.active())
            }
            MonitorOutcome::Cancelled => {
                warn!("cancelled with {} task(s) still active", self.active())
            }
        }
        info!(
            "{} completed, {} failed, {} cancelled",
            self.count(TaskState::Completed),
            self.count(TaskState::Failed),
            self.count(TaskState::Cancelled)
        );
        for t in self.unsuccessful() {
            warn!(
                "task {} ({}) {}: {}",
                t.task.id,
                t.task.description,
                t.status.state,
                t.status.error_message.as_deref().unwrap_or("no error message")
            );
        }
    }
}

/// Polls every still-active task once.
async fn poll_round(engine: &impl EarthEngine, progress: &mut [TaskProgress]) {
    let active: Vec<&mut TaskProgress> = progress
        .iter_mut()
        .filter(|p| p.status.state.is_active())
        .collect();

    let statuses = join_all(active.iter().map(|p| engine.task_status(&p.task))).await;

    for (p, status) in active.into_iter().zip(statuses) {
        p.polls += 1;
        match status {
            Ok(status) => {
                info!("task {}: {}", p.task.id, status.state);
                p.status = status;
            }
            Err(e) => warn!("status of task {} unavailable: {}", p.task.id, e),
        }
    }
}

/// Waits until no task is active, the timeout elapses, or `cancel` fires.
pub async fn monitor(
    engine: &impl EarthEngine,
    tasks: &[ExportTask],
    settings: &MonitorSettings,
    cancel: &CancellationToken,
) -> MonitorSummary {
    let mut progress: Vec<TaskProgress> = tasks
        .iter()
        .map(|task| TaskProgress {
            task: task.clone(),
            status: TaskStatus::new(TaskState::Ready),
            polls: 0,
        })
        .collect();

    // A timeout too large to represent means no deadline.
    let deadline = settings.timeout().and_then(|t| Instant::now().checked_add(t));
    let mut interval = settings.poll_interval();
    let mut rounds = 0;

    let outcome = loop {
        if cancel.is_cancelled() {
            break MonitorOutcome::Cancelled;
        }
        poll_round(engine, &mut progress).await;
        rounds += 1;

        let active = progress.iter().filter(|p| p.status.state.is_active()).count();
        if active == 0 {
            break MonitorOutcome::Finished;
        }

        let mut wait = interval;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                break MonitorOutcome::TimedOut;
            }
            wait = wait.min(deadline - now);
        }
        info!("waiting for {} task(s), next check in {:?}", active, wait);

        tokio::select! {
            _ = cancel.cancelled() => break MonitorOutcome::Cancelled,
            _ = sleep(wait) => {}
        }
        interval = settings.next_interval(interval);
    };

    MonitorSummary {
        outcome,
        tasks: progress,
        rounds,
    }
}
