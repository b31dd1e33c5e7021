//! Cron scheduling of backup firings.
//!
//! Jobs move Registered -> Armed on `start`, Armed -> Running while a firing
//! is in progress, and back to Armed when it completes. A firing that comes
//! due while the previous one of the same job still runs is skipped. `stop`
//! halts the clock without cancelling firings in progress; those end in
//! Stopped. A stopped scheduler cannot be started again.

use crate::utils::errors::{KeeperError, Result};
use chrono::Local;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of one scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Registered,
    Armed,
    Running,
    Stopped,
}

/// Body of a job, invoked once per firing.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
struct JobStatus {
    name: String,
    state: JobState,
}

pub struct TaskScheduler {
    scheduler: Mutex<JobScheduler>,
    jobs: Arc<DashMap<Uuid, JobStatus>>,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
}

/// Accept classic five-field crontab lines by prepending a seconds field.
pub fn normalize_cron(expression: &str) -> Result<String> {
    let expression = expression.trim();
    if expression.starts_with('@') {
        return Ok(expression.to_string());
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(KeeperError::Scheduler(format!(
            "cron expression '{}' has {} fields, expected 5 to 7",
            expression, n
        ))),
    }
}

impl TaskScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| KeeperError::Scheduler(e.to_string()))?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            jobs: Arc::new(DashMap::new()),
            started: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Add a job firing on `cron` (local time). Firings of one job may
    /// overlap with firings of any other job.
    pub async fn register(&self, name: &str, cron: &str, run: JobFn) -> Result<Uuid> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(KeeperError::Scheduler(
                "scheduler was stopped; build a new one to register jobs".into(),
            ));
        }
        let expression = normalize_cron(cron)?;

        let jobs = self.jobs.clone();
        let stopped = self.stopped.clone();
        let job_name = Arc::new(name.to_string());
        let job = Job::new_async_tz(expression.as_str(), Local, move |id, _lock| {
            let jobs = jobs.clone();
            let stopped = stopped.clone();
            let run = run.clone();
            let job_name = job_name.clone();
            Box::pin(async move {
                {
                    let Some(mut status) = jobs.get_mut(&id) else {
                        return;
                    };
                    if status.state == JobState::Running {
                        warn!(job = %status.name, "Skipping firing: previous one still running");
                        return;
                    }
                    if stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    status.state = JobState::Running;
                }
                if AssertUnwindSafe(run()).catch_unwind().await.is_err() {
                    error!(job = %job_name, "Firing panicked");
                }
                if let Some(mut status) = jobs.get_mut(&id) {
                    status.state = if stopped.load(Ordering::SeqCst) {
                        JobState::Stopped
                    } else {
                        JobState::Armed
                    };
                }
            })
        })
        .map_err(|e| KeeperError::Scheduler(format!("job '{}' ({}): {}", name, expression, e)))?;

        let id = job.guid();
        let state = if self.started.load(Ordering::SeqCst) {
            JobState::Armed
        } else {
            JobState::Registered
        };
        self.jobs.insert(
            id,
            JobStatus {
                name: name.to_string(),
                state,
            },
        );

        if let Err(e) = self.scheduler.lock().await.add(job).await {
            self.jobs.remove(&id);
            return Err(KeeperError::Scheduler(format!("job '{}': {}", name, e)));
        }
        info!(job = %name, cron = %expression, "Job scheduled");
        Ok(id)
    }

    /// Arm every registered job and start the clock.
    pub async fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(KeeperError::Scheduler("a stopped scheduler cannot be restarted".into()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for mut status in self.jobs.iter_mut() {
            if status.state == JobState::Registered {
                status.state = JobState::Armed;
            }
        }
        self.scheduler
            .lock()
            .await
            .start()
            .await
            .map_err(|e| KeeperError::Scheduler(e.to_string()))?;
        info!(jobs = self.jobs.len(), "Scheduler started");
        Ok(())
    }

    /// Stop the clock. Firings in progress run to completion.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for mut status in self.jobs.iter_mut() {
            if status.state != JobState::Running {
                status.state = JobState::Stopped;
            }
        }
        self.scheduler
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| KeeperError::Scheduler(e.to_string()))?;
        info!("Scheduler stopped");
        Ok(())
    }

    pub fn state(&self, id: &Uuid) -> Option<JobState> {
        self.jobs.get(id).map(|status| status.state)
    }

    /// Names of jobs with a firing in progress.
    pub fn running(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|status| status.state == JobState::Running)
            .map(|status| status.name.clone())
            .collect()
    }

    /// Wait until no firing is in progress.
    pub async fn wait_idle(&self) {
        loop {
            let running = self.running();
            if running.is_empty() {
                return;
            }
            debug!("Waiting for running jobs: {}", running.join(", "));
            tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
        }
    }
}
