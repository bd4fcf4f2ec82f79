use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::sync::broadcast;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub interval: Duration,
    pub max_age: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// Runs a sweep every `settings.interval` until shutdown is signalled.
///
/// Shutdown is only observed between sweeps, so a sweep that has started
/// always runs to the end.
pub async fn cleanup_loop(
    state: Arc<AppState>,
    settings: SweepSettings,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(settings.interval) => {}
            _ = shutdown.recv() => {
                tracing::info!("retention sweeper stopped");
                return;
            }
        }

        let root = state.store.root();
        match sweep_expired(root, SystemTime::now(), settings.max_age).await {
            Ok(report) if report.removed > 0 || report.failed > 0 => {
                tracing::info!(
                    removed = report.removed,
                    failed = report.failed,
                    "retention sweep finished"
                );
            }
            Ok(_) => tracing::debug!("retention sweep found nothing to remove"),
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "failed to read upload root");
            }
        }
    }
}

/// Deletes every file in every bucket whose modification time is more than
/// `max_age` before `now`. Per-file failures are logged and counted.
pub async fn sweep_expired(
    root: &Path,
    now: SystemTime,
    max_age: Duration,
) -> io::Result<SweepReport> {
    sweep_with(root, now, max_age, |path| async move { fs::remove_file(path).await }).await
}

async fn sweep_with<F, Fut>(
    root: &Path,
    now: SystemTime,
    max_age: Duration,
    remove: F,
) -> io::Result<SweepReport>
where
    F: Fn(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let mut report = SweepReport::default();
    let mut buckets = fs::read_dir(root).await?;

    while let Some(bucket) = buckets.next_entry().await? {
        if !bucket.file_type().await.is_ok_and(|kind| kind.is_dir()) {
            continue;
        }

        let mut files = match fs::read_dir(bucket.path()).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(path = %bucket.path().display(), error = %e, "failed to read bucket");
                continue;
            }
        };

        loop {
            let file = match files.next_entry().await {
                Ok(Some(file)) => file,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(path = %bucket.path().display(), error = %e, "failed to read bucket entry");
                    break;
                }
            };
            let path = file.path();
            let metadata = match file.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to stat photo");
                    continue;
                }
            };

            let expired = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age);

            if expired {
                match remove(path.clone()).await {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), "removed expired photo");
                        report.removed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove expired photo");
                        report.failed += 1;
                    }
                }
            }

            tokio::task::yield_now().await;
        }
    }

    Ok(report)
}
