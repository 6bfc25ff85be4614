//! Version probing and the `current_version` file.

use std::io;
use std::path::Path;

use anyhow::{Context, Result, bail};
use semver::Version;
use tokio::process::Command;
use tracing::{debug, warn};

/// Read `current_version`: single-line UTF-8 semver, whitespace-trimmed.
/// Absent or unparseable file means "bundled is current".
pub async fn read_current_version_file(path: &Path) -> Option<Version> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to read current_version");
            }
            return None;
        }
    };
    match Version::parse(content.trim()) {
        Ok(version) => Some(version),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "current_version is not a semver");
            None
        }
    }
}

/// Overwrite `current_version` atomically (temp file + rename).
pub async fn write_current_version_file(path: &Path, version: &Version) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, version.to_string()).await?;
    tokio::fs::rename(&temp_path, path).await
}

/// Remove `current_version`, reverting to the bundled binary. Idempotent.
pub async fn delete_current_version_file(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Run `<binary> version` and return its stdout. Errors when the process
/// cannot be spawned or exits non-zero.
pub async fn binary_version_output(binary: &Path) -> Result<String> {
    let output = Command::new(binary)
        .arg("version")
        .output()
        .await
        .with_context(|| format!("failed to run {}", binary.display()))?;
    if !output.status.success() {
        bail!(
            "{} version exited with {}",
            binary.display(),
            output.status
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Probe a binary's version: first whitespace-trimmed stdout line parsed as
/// semver. `None` on spawn failure, non-zero exit, or unparseable output.
pub async fn probe_binary_version(binary: &Path) -> Option<Version> {
    let output = match binary_version_output(binary).await {
        Ok(output) => output,
        Err(e) => {
            warn!(binary = %binary.display(), error = %e, "version probe failed");
            return None;
        }
    };
    let first_line = output.lines().next().unwrap_or("").trim();
    match Version::parse(first_line) {
        Ok(version) => {
            debug!(binary = %binary.display(), %version, "probed binary version");
            Some(version)
        }
        Err(e) => {
            warn!(binary = %binary.display(), output = %first_line, error = %e, "could not parse probed version");
            None
        }
    }
}
