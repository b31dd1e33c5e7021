//! Backup executor - runs one firing of a unit.
//!
//! A firing builds the archive, then uploads it to the unit's backends,
//! strictly in that order. An archive failure ends the firing before any
//! upload; upload failures are isolated per backend and land in the report.

pub mod report;
pub mod upload;

use crate::archive::ArchiveBuilder;
use crate::config::BackupUnit;
use crate::utils::errors::{KeeperError, Result};
use chrono::Local;
use report::BackupReport;
use std::sync::Arc;
use tracing::info;
use upload::UploadOrchestrator;

pub struct BackupExecutor {
    orchestrator: Arc<UploadOrchestrator>,
}

impl BackupExecutor {
    pub fn new(orchestrator: Arc<UploadOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run one firing of `unit`. Returns the archive error when no archive
    /// could be built; otherwise the report with every upload outcome.
    pub async fn create_backup(&self, unit: &BackupUnit) -> Result<BackupReport> {
        let now = Local::now();
        let mut report = BackupReport::new(now);
        let start_time = std::time::Instant::now();

        let builder = ArchiveBuilder::from_unit(unit);
        let format = unit.compress_format.clone();
        let archive = tokio::task::spawn_blocking(move || builder.build_at(&format, now))
            .await
            .map_err(|e| KeeperError::Io(std::io::Error::other(e)))??;
        info!(
            unit = %unit.name,
            "Archive {} ready in {:.1}s",
            archive.full_path().display(),
            start_time.elapsed().as_secs_f64()
        );

        if !unit.upload_to.is_empty() {
            report.remote = Some(self.orchestrator.upload(&archive, unit).await);
        }
        report.local = Some(archive);

        Ok(report)
    }
}
