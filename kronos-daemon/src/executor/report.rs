//! Per-firing backup report.

use super::upload::UploadOutcome;
use crate::archive::Archive;
use crate::utils::errors::KeeperError;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;

/// Outcome of one firing of a unit
#[derive(Debug)]
pub struct BackupReport {
    pub current_time: DateTime<Local>,

    /// Archive built by this firing
    pub local: Option<Archive>,

    /// One outcome per attempted backend; `None` when the unit targets none
    pub remote: Option<BTreeMap<String, UploadOutcome>>,
}

impl BackupReport {
    pub fn new(current_time: DateTime<Local>) -> Self {
        Self {
            current_time,
            local: None,
            remote: None,
        }
    }

    /// Backends whose upload failed, with their messages, in name order.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.remote
            .iter()
            .flatten()
            .filter_map(|(name, outcome)| outcome.error().map(|e| (name.clone(), e.to_string())))
            .collect()
    }

    /// Every backend failure folded into one error.
    pub fn combined_error(&self) -> Option<KeeperError> {
        let failures = self.failures();
        if failures.is_empty() {
            None
        } else {
            Some(KeeperError::UploadFailed(failures))
        }
    }

    /// One-line description for logs and notifications.
    pub fn summary(&self, unit: &str) -> String {
        let Some(local) = &self.local else {
            return format!("Backup '{}' produced no archive", unit);
        };

        let mut summary = format!(
            "Backup '{}' created {}",
            unit,
            local.full_path().display()
        );
        if let Some(remote) = &self.remote {
            let uploaded: Vec<&str> = remote
                .iter()
                .filter(|(_, outcome)| outcome.status())
                .map(|(name, _)| name.as_str())
                .collect();
            if !uploaded.is_empty() {
                summary.push_str(&format!(", uploaded to {}", uploaded.join(", ")));
            }
        }
        if let Some(error) = self.combined_error() {
            summary.push_str(&format!("; {}", error));
        }
        summary
    }
}
