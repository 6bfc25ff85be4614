//! ZIP package extraction with clean-on-failure semantics.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use zip::ZipArchive;

/// Extract a ZIP archive into `dest_dir`.
///
/// The destination is created if missing. On any failure the partially
/// extracted destination is removed again, so the directory either holds the
/// complete archive contents or does not exist. Entry paths are validated;
/// entries escaping the destination are rejected.
pub fn extract_archive(zip_path: &Path, dest_dir: &Path) -> Result<()> {
    if let Err(e) = try_extract(zip_path, dest_dir) {
        if let Err(cleanup) = remove_dir_if_present(dest_dir) {
            warn!(path = %dest_dir.display(), error = %cleanup, "failed to clean partial extraction");
        }
        return Err(e);
    }
    info!(archive = %zip_path.display(), dest = %dest_dir.display(), "extracted archive");
    Ok(())
}

fn try_extract(zip_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(zip_path)
        .with_context(|| format!("failed to open archive {}", zip_path.display()))?;
    let mut archive = ZipArchive::new(file).context("failed to read zip archive")?;

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("failed to read archive entry")?;

        let Some(relative) = entry.enclosed_name() else {
            bail!("archive entry {:?} escapes the destination", entry.name());
        };
        let dest_path = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path)
                .with_context(|| format!("failed to create {}", dest_path.display()))?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut dest_file = File::create(&dest_path)
            .with_context(|| format!("failed to create {}", dest_path.display()))?;
        io::copy(&mut entry, &mut dest_file)
            .with_context(|| format!("failed to extract {}", dest_path.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode));
        }
    }

    Ok(())
}

/// Recursively remove a directory, treating absence as success.
pub fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
