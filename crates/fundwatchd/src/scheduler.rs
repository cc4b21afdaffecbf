use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::pipeline::{Pipeline, RunResult, Trigger};

pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running {
        trigger: Trigger,
        #[serde(rename = "startedAt")]
        started_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    pub state: RunState,
    pub last_result: Option<RunResult>,
}

impl SchedulerState {
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running { .. })
    }
}

pub type SharedState = Arc<RwLock<SchedulerState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub trigger: Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("run queue is full")]
    QueueFull,
    #[error("run worker has stopped")]
    Closed,
}

/// Sending half of the run queue. Every trigger path goes through here.
#[derive(Debug, Clone)]
pub struct RunQueue {
    sender: mpsc::Sender<RunRequest>,
}

pub fn run_queue(capacity: usize) -> (RunQueue, mpsc::Receiver<RunRequest>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (RunQueue { sender }, receiver)
}

impl RunQueue {
    pub fn submit(&self, trigger: Trigger) -> Result<(), SubmitError> {
        self.sender
            .try_send(RunRequest { trigger })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
            })?;
        tracing::info!(trigger = trigger.as_str(), "run queued");
        Ok(())
    }
}

/// Drains the queue one run at a time until every sender is dropped.
pub fn spawn_worker(
    pipeline: Arc<Pipeline>,
    mut receiver: mpsc::Receiver<RunRequest>,
    state: SharedState,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = receiver.recv().await {
            state.write().await.state = RunState::Running {
                trigger: request.trigger,
                started_at: Utc::now(),
            };

            let result = pipeline.run(request.trigger).await;

            let mut guard = state.write().await;
            guard.state = RunState::Idle;
            guard.last_result = Some(result);
        }
        tracing::debug!("run worker stopped");
    })
}

/// Accepts both 5-field and 6-field (leading seconds) cron expressions.
pub fn normalize_cron(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

pub async fn start_cron(queue: RunQueue, expression: &str) -> anyhow::Result<JobScheduler> {
    let cron = normalize_cron(expression);
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let queue = queue.clone();
        Box::pin(async move {
            if let Err(err) = queue.submit(Trigger::Schedule) {
                tracing::warn!(error = %err, "scheduled run skipped");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    sched.start().await.context("starting scheduler")?;

    tracing::info!(cron = %cron, "update schedule active");
    Ok(sched)
}
