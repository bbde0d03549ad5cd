use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, TimeZone};
use tracing::info;

use socketsync_common::READABLE_TIME_FORMAT;

pub async fn ensure_dir(dir: &Path) -> anyhow::Result<()> {
    if tokio::fs::metadata(dir).await.is_err() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        info!("created folder {}", dir.display());
    }
    Ok(())
}

pub fn archive_name<Tz>(log_file: &Path, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let name = log_file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{} {name}", now.format(READABLE_TIME_FORMAT))
}

/// Moves the log file into `archive_dir`, prefixed with the current time.
pub async fn archive_log<Tz>(
    log_file: &Path,
    archive_dir: &Path,
    now: &DateTime<Tz>,
) -> anyhow::Result<PathBuf>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    ensure_dir(archive_dir).await?;
    let target = archive_dir.join(archive_name(log_file, now));
    tokio::fs::rename(log_file, &target)
        .await
        .with_context(|| {
            format!(
                "failed to archive {} to {}",
                log_file.display(),
                target.display()
            )
        })?;
    Ok(target)
}
