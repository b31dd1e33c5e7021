//! The backup daemon: one scheduled job per configured unit.

pub mod shutdown;

use crate::config::{BackupUnit, Config};
use crate::executor::report::BackupReport;
use crate::executor::upload::UploadOrchestrator;
use crate::executor::BackupExecutor;
use crate::notify::{self, Notifier};
use crate::scheduler::{JobFn, TaskScheduler};
use crate::utils::errors::{KeeperError, Result};
use futures_util::FutureExt;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct KeeperDaemon {
    config: Config,
    executor: Arc<BackupExecutor>,
    notifier: Option<Arc<dyn Notifier>>,
    scheduler: TaskScheduler,
}

impl KeeperDaemon {
    pub async fn new(config: Config) -> Result<Self> {
        let orchestrator = UploadOrchestrator::from_storages(&config.storage);
        let notifier = notify::from_config(config.telegram.as_ref());
        Self::with_parts(config, orchestrator, notifier).await
    }

    pub async fn with_parts(
        config: Config,
        orchestrator: UploadOrchestrator,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            executor: Arc::new(BackupExecutor::new(Arc::new(orchestrator))),
            notifier,
            scheduler: TaskScheduler::new().await?,
        })
    }

    /// Register every unit and start the clock. Returns the number of
    /// scheduled units.
    pub async fn start(&self) -> Result<usize> {
        info!("KronosKeeper daemon v{} starting", env!("CARGO_PKG_VERSION"));

        if self.config.units.is_empty() {
            warn!("No backup units configured");
        }

        for unit in &self.config.units {
            if unit.retention > 0 {
                info!(unit = %unit.name, "Retention of {} days is declared but not enforced", unit.retention);
            }
            let job = self.job_for(unit);
            if let Err(e) = self.scheduler.register(&unit.name, &unit.crontab_task, job).await {
                self.log_and_notify_error(&format!(
                    "Cannot schedule backup unit '{}': {}",
                    unit.name, e
                ))
                .await;
                return Err(e);
            }
        }

        self.scheduler.start().await?;
        self.log_and_notify(&format!(
            "Scheduled backups started for {} unit(s)",
            self.config.units.len()
        ))
        .await;
        Ok(self.config.units.len())
    }

    /// Stop the clock and wait for firings in progress.
    pub async fn stop(&self) -> Result<()> {
        self.scheduler.stop().await?;
        let running = self.scheduler.running();
        if !running.is_empty() {
            info!("Waiting for running backups: {}", running.join(", "));
        }
        self.scheduler.wait_idle().await;
        info!("KronosKeeper daemon stopped");
        Ok(())
    }

    /// Run one unit immediately, outside its schedule.
    pub async fn run_unit(&self, name: &str) -> Result<BackupReport> {
        let unit = self
            .config
            .unit(name)
            .ok_or_else(|| KeeperError::Config(format!("unknown backup unit '{}'", name)))?;
        self.executor.create_backup(unit).await
    }

    fn job_for(&self, unit: &BackupUnit) -> JobFn {
        let executor = self.executor.clone();
        let notifier = self.notifier.clone();
        let unit = Arc::new(unit.clone());
        Arc::new(move || {
            let executor = executor.clone();
            let notifier = notifier.clone();
            let unit = unit.clone();
            async move { fire(&executor, notifier.as_ref(), &unit).await }.boxed()
        })
    }

    async fn log_and_notify(&self, message: &str) {
        info!("{}", message);
        notify::notify_best_effort(self.notifier.as_ref(), message).await;
    }

    async fn log_and_notify_error(&self, message: &str) {
        error!("{}", message);
        notify::notify_best_effort(self.notifier.as_ref(), message).await;
    }
}

/// One firing: build, upload, report.
async fn fire(executor: &BackupExecutor, notifier: Option<&Arc<dyn Notifier>>, unit: &BackupUnit) {
    info!(unit = %unit.name, "Backup started");

    let message = match executor.create_backup(unit).await {
        Ok(report) => {
            let summary = report.summary(&unit.name);
            match report.combined_error() {
                Some(e) => error!(unit = %unit.name, "Backup finished with errors: {}", e),
                None => info!(unit = %unit.name, "Backup finished"),
            }
            summary
        }
        Err(e) => {
            error!(unit = %unit.name, "Backup failed: {}", e);
            format!("Backup '{}' failed: {}", unit.name, e)
        }
    };

    notify::notify_best_effort(notifier, &message).await;
}
