//! Operator commands: listing units, browsing uploaded backups, restoring a file.

use anyhow::{anyhow, Context, Result};
use kronos_daemon::config::Config;
use kronos_daemon::remote::browse::{browse, render};
use kronos_daemon::remote::Backend;
use kronos_daemon::KeeperError;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

pub type Backends = HashMap<String, Arc<dyn Backend>>;

/// One line per configured unit: name, schedule, targets.
pub fn list_units(config: &Config) -> String {
    if config.units.is_empty() {
        return "No backup units configured".to_string();
    }

    let mut out = String::new();
    for unit in &config.units {
        let targets = if unit.upload_to.is_empty() {
            "local only".to_string()
        } else {
            unit.upload_to.join(", ")
        };
        let _ = writeln!(
            out,
            "{:<16} {:<20} {:<5} -> {}",
            unit.name, unit.crontab_task, unit.compress_format, targets
        );
    }
    out.trim_end().to_string()
}

/// Tree of everything uploaded for `unit_name`, one section per target
/// backend. `only` restricts the output to a single backend.
pub async fn list_backups(
    config: &Config,
    backends: &Backends,
    unit_name: &str,
    only: Option<&str>,
) -> Result<String> {
    let unit = config
        .unit(unit_name)
        .ok_or_else(|| anyhow!("unknown backup unit '{}'", unit_name))?;
    // An empty year-month drops out of the joined path, leaving `<remote_path>/<name>`.
    let root = unit.remote_dir("");

    let mut targets: Vec<&str> = Vec::new();
    for name in &unit.upload_to {
        if only.map_or(true, |wanted| wanted == name.as_str()) && !targets.contains(&name.as_str()) {
            targets.push(name);
        }
    }
    if targets.is_empty() {
        return Ok(format!("Unit '{}' has no matching remote targets", unit.name));
    }

    let mut out = String::new();
    for name in targets {
        let _ = writeln!(out, "== {}:{} ==", name, root);
        let Some(backend) = backends.get(name) else {
            let _ = writeln!(out, "(backend not configured)");
            continue;
        };

        let session = backend
            .connect()
            .await
            .with_context(|| format!("connecting to {}", name))?;
        match browse(session.as_ref(), &root).await {
            Ok(entries) if entries.is_empty() => {
                let _ = writeln!(out, "(empty)");
            }
            Ok(entries) => {
                let _ = writeln!(out, "{}", render(&entries));
            }
            Err(KeeperError::NotFound(_)) => {
                let _ = writeln!(out, "(no backups yet)");
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("listing {} on {}", root, name))),
        }
    }
    Ok(out.trim_end().to_string())
}

/// Restore one remote entry into `output`.
pub async fn download(backends: &Backends, backend_name: &str, file_id: &str, output: &Path) -> Result<()> {
    let backend = backends
        .get(backend_name)
        .ok_or_else(|| anyhow!("backend '{}' is not configured", backend_name))?;
    let session = backend
        .connect()
        .await
        .with_context(|| format!("connecting to {}", backend_name))?;
    session
        .download(file_id, output)
        .await
        .with_context(|| format!("downloading {} from {}", file_id, backend_name))?;
    Ok(())
}
