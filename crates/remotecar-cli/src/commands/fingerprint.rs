//! Fingerprint command - save anonymized API responses of all vehicles

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use remotecar_client::{Account, AnonymizedResponse};
use tokio_util::sync::CancellationToken;

use crate::output::OutputContext;

const FINGERPRINT_DIR: &str = "vehicle_fingerprint";

/// Fetch every vehicle and write the recorded responses to a timestamped
/// directory below `dir` (default: `~/vehicle_fingerprint`).
///
/// The account must be built with response logging enabled.
pub async fn fingerprint(
    account: &Account,
    dir: Option<&Path>,
    cancel: &CancellationToken,
    ctx: &OutputContext,
) -> Result<()> {
    let vehicles = account.get_vehicles(true, cancel).await?;

    let base = match dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::home_dir()
            .context("Could not determine home directory")?
            .join(FINGERPRINT_DIR),
    };
    let target = base.join(Local::now().format("%Y-%m-%d_%H-%M-%S").to_string());
    let written = write_responses(&account.stored_responses(), &target)?;
    tracing::debug!(files = written.len(), "Fingerprint written");

    ctx.success(&format!(
        "Fingerprint of {} vehicle(s) written to {}",
        vehicles.len(),
        target.display()
    ));
    Ok(())
}

/// Write each response as pretty JSON (or plain text) into `dir`
pub fn write_responses(responses: &[AnonymizedResponse], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    responses
        .iter()
        .map(|response| -> Result<PathBuf> {
            let path = dir.join(&response.filename);
            let content = match &response.content {
                serde_json::Value::String(text) => text.clone(),
                json => serde_json::to_string_pretty(json)?,
            };
            fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(path)
        })
        .collect()
}
