//! Fan-out of one archive to the backends a unit targets.

use crate::archive::Archive;
use crate::config::{BackupUnit, RemoteStorages};
use crate::remote::{build_backends, Backend};
use crate::utils::errors::{KeeperError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one backend upload attempt
#[derive(Debug)]
pub enum UploadOutcome {
    Success { file_id: String },
    Failed { error: KeeperError },
}

impl UploadOutcome {
    pub fn status(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }

    pub fn error(&self) -> Option<&KeeperError> {
        match self {
            UploadOutcome::Success { .. } => None,
            UploadOutcome::Failed { error } => Some(error),
        }
    }
}

impl From<Result<String>> for UploadOutcome {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(file_id) => UploadOutcome::Success { file_id },
            Err(error) => UploadOutcome::Failed { error },
        }
    }
}

/// Configured backends, keyed by the names units refer to.
pub struct UploadOrchestrator {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl UploadOrchestrator {
    pub fn new(backends: HashMap<String, Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    pub fn from_storages(storages: &RemoteStorages) -> Self {
        Self::new(build_backends(storages))
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.get(name)
    }

    pub fn backend_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Upload `archive` to every backend in `unit.upload_to`, in order.
    /// Each attempt is independent of the others. Names without a
    /// configured backend are skipped and get no outcome.
    pub async fn upload(&self, archive: &Archive, unit: &BackupUnit) -> BTreeMap<String, UploadOutcome> {
        let local_path = archive.full_path();
        let remote_path = unit.remote_dir(&archive.year_month);
        let mut attempted = HashSet::new();
        let mut outcomes = BTreeMap::new();

        for name in &unit.upload_to {
            if !attempted.insert(name.as_str()) {
                continue;
            }
            let Some(backend) = self.backends.get(name) else {
                warn!(unit = %unit.name, backend = %name, "Skipping unknown backend");
                continue;
            };

            let outcome = UploadOutcome::from(upload_one(backend.as_ref(), &local_path, &remote_path).await);
            match &outcome {
                UploadOutcome::Success { file_id } => {
                    info!(unit = %unit.name, backend = %name, "Uploaded {} as {}", archive.archive_name, file_id)
                }
                UploadOutcome::Failed { error } => {
                    warn!(unit = %unit.name, backend = %name, "Upload failed: {}", error)
                }
            }
            outcomes.insert(name.clone(), outcome);
        }

        outcomes
    }
}

async fn upload_one(backend: &dyn Backend, local_path: &Path, remote_path: &str) -> Result<String> {
    let session = backend.connect().await?;
    session.upload(local_path, remote_path).await
}
