//! Atomic replacement of the published dataset by a finished staging file.
//!
//! The sync writes `<db>.new`. Publishing moves any existing `<db>` to
//! `<db>~` and then renames `<db>.new` to `<db>`. If the second rename fails
//! the backup is moved back, so the prior dataset stays at its original path.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use taxa_core::error::AppError;

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `<db>.new`
pub fn staging_path(published: &Path) -> PathBuf {
    with_suffix(published, ".new")
}

/// `<db>~`
pub fn backup_path(published: &Path) -> PathBuf {
    with_suffix(published, "~")
}

/// Removes a staging file and its rollback journal, if present.
pub async fn remove_staging(staging: &Path) -> Result<(), AppError> {
    for path in [staging.to_path_buf(), with_suffix(staging, "-journal")] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::Io(e)),
        }
    }
    Ok(())
}

/// Swaps `staging` into place at `published`.
///
/// The staging pool must already be closed. Returns the backup path when a
/// previous dataset was moved aside.
///
/// # Errors
///
/// Returns `AppError::PublishError` if either rename fails. The staging file
/// is removed in both cases.
pub async fn publish_dataset(
    staging: &Path,
    published: &Path,
) -> Result<Option<PathBuf>, AppError> {
    let outcome = publish_with(staging, published, |from, to| std::fs::rename(from, to));
    if outcome.is_err() {
        remove_staging(staging).await?;
    }
    outcome
}

fn publish_with<F>(
    staging: &Path,
    published: &Path,
    mut rename: F,
) -> Result<Option<PathBuf>, AppError>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let backup = if published.exists() {
        let backup = backup_path(published);
        rename(published, &backup).map_err(|e| {
            AppError::PublishError(format!(
                "could not move {} to {}: {}",
                published.display(),
                backup.display(),
                e
            ))
        })?;
        tracing::info!(backup = %backup.display(), "Backed up previous database");
        Some(backup)
    } else {
        None
    };

    if let Err(e) = rename(staging, published) {
        let mut message = format!(
            "could not move {} to {}: {}",
            staging.display(),
            published.display(),
            e
        );

        if let Some(backup) = &backup {
            match rename(backup, published) {
                Ok(()) => {
                    tracing::warn!(path = %published.display(), "Restored previous database");
                }
                Err(restore) => {
                    message.push_str(&format!(
                        "; previous database left at {} ({})",
                        backup.display(),
                        restore
                    ));
                }
            }
        }

        return Err(AppError::PublishError(message));
    }

    Ok(backup)
}
