//! Date-bucketed photo storage on the local filesystem.
//!
//! Layout: `{root}/{year}-{month}-{day}/{field}-{unix_millis}-{random}{.ext}`,
//! month and day not zero-padded. The filesystem is the only store; nothing
//! is cached in memory, so listings always reflect what is on disk.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, TimeZone};
use rand::Rng;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};

/// Public URL prefix under which the upload root is served.
pub const PUBLIC_PREFIX: &str = "/uploads";

const MAX_EXTENSION_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to create file {}: {source}", .path.display())]
    CreateFile { path: PathBuf, source: io::Error },

    #[error("failed to write file {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Location of a stored photo inside its bucket.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub bucket: String,
    pub filename: String,
    pub path: PathBuf,
}

impl NewPhoto {
    pub fn url_path(&self) -> String {
        format!("{}/{}/{}", PUBLIC_PREFIX, self.bucket, self.filename)
    }
}

/// An upload being written. The file is removed when this is dropped
/// without [`PendingPhoto::commit`], including when the request future is
/// cancelled mid-stream.
#[derive(Debug)]
pub struct PendingPhoto {
    photo: NewPhoto,
    committed: bool,
}

impl PendingPhoto {
    pub fn photo(&self) -> &NewPhoto {
        &self.photo
    }

    /// Keeps the file on disk.
    pub fn commit(mut self) -> NewPhoto {
        self.committed = true;
        self.photo.clone()
    }
}

impl Drop for PendingPhoto {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.photo.path) {
            Ok(()) => {
                tracing::debug!(path = %self.photo.path.display(), "removed incomplete upload");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.photo.path.display(), error = %e, "failed to remove incomplete upload");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Opens the store, creating the upload root if it is missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        create_dir(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the bucket directory for `now`, creating it when needed.
    ///
    /// Concurrent callers racing on the same date all succeed.
    pub async fn resolve_bucket_path<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<PathBuf, StorageError> {
        let path = self.root.join(bucket_name(now));
        create_dir(&path).await?;
        Ok(path)
    }

    /// Reserves a uniquely named file for an upload received at `now`.
    pub async fn allocate<Tz: TimeZone>(
        &self,
        field_name: &str,
        original_name: &str,
        now: &DateTime<Tz>,
    ) -> Result<(PendingPhoto, File), StorageError> {
        let bucket_path = self.resolve_bucket_path(now).await?;
        let suffix = rand::thread_rng().gen_range(0..1_000_000_000u32);
        let filename = photo_file_name(field_name, now.timestamp_millis(), suffix, original_name);
        let path = bucket_path.join(&filename);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| StorageError::CreateFile {
                path: path.clone(),
                source,
            })?;

        let pending = PendingPhoto {
            photo: NewPhoto {
                bucket: bucket_name(now),
                filename,
                path,
            },
            committed: false,
        };
        Ok((pending, file))
    }

    /// Relative URLs of every file inside every bucket, in directory order.
    ///
    /// Only a failure to read the root itself is an error; unreadable
    /// entries below it are logged and skipped.
    pub async fn list_photos(&self) -> io::Result<Vec<String>> {
        let mut photos = Vec::new();
        let mut buckets = fs::read_dir(&self.root).await?;

        while let Some(bucket) = buckets.next_entry().await? {
            match bucket.file_type().await {
                Ok(kind) if kind.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %bucket.path().display(), error = %e, "failed to stat entry");
                    continue;
                }
            }

            let bucket_name = bucket.file_name().to_string_lossy().into_owned();
            let mut files = match fs::read_dir(bucket.path()).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(bucket = %bucket_name, error = %e, "failed to read bucket");
                    continue;
                }
            };

            loop {
                let file = match files.next_entry().await {
                    Ok(Some(file)) => file,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(bucket = %bucket_name, error = %e, "failed to read bucket entry");
                        break;
                    }
                };
                if !file.file_type().await.is_ok_and(|kind| kind.is_file()) {
                    continue;
                }

                let filename = file.file_name().to_string_lossy().into_owned();
                tracing::debug!(bucket = %bucket_name, file = %filename, "found photo");
                photos.push(format!("{}/{}/{}", PUBLIC_PREFIX, bucket_name, filename));
            }
        }

        if photos.is_empty() {
            tracing::info!("no photos found");
        }

        Ok(photos)
    }
}

async fn create_dir(path: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| StorageError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

pub fn bucket_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    format!("{}-{}-{}", now.year(), now.month(), now.day())
}

pub fn photo_file_name(field_name: &str, unix_millis: i64, suffix: u32, original_name: &str) -> String {
    format!(
        "{}-{}-{}{}",
        field_name,
        unix_millis,
        suffix,
        sanitized_extension(original_name)
    )
}

/// The original extension with its leading dot, or an empty string when it
/// is missing or contains anything but ASCII letters and digits.
fn sanitized_extension(original_name: &str) -> String {
    let ext = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return String::new();
    }

    format!(".{ext}")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;

    fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn bucket_name_is_not_zero_padded() {
        assert_eq!(bucket_name(&at(2024, 3, 7, 12)), "2024-3-7");
        assert_eq!(bucket_name(&at(2024, 12, 25, 0)), "2024-12-25");
    }

    #[test]
    fn file_name_keeps_original_extension() {
        assert_eq!(
            photo_file_name("photo", 1_700_000_000_000, 42, "cat.jpg"),
            "photo-1700000000000-42.jpg"
        );
        assert_eq!(photo_file_name("photo", 1, 2, "archive.tar.GZ"), "photo-1-2.GZ");
    }

    #[test]
    fn suspicious_extensions_are_dropped() {
        assert_eq!(sanitized_extension("noext"), "");
        assert_eq!(sanitized_extension("x.jp/g"), "");
        assert_eq!(sanitized_extension("x.j p g"), "");
        assert_eq!(sanitized_extension("../../etc/passwd"), "");
        assert_eq!(sanitized_extension(".hidden"), "");
        assert_eq!(sanitized_extension("x.aaaaaaaaaaaaaaaaaaaaa"), "");
        assert_eq!(sanitized_extension("evil/../cat.png"), ".png");
    }

    #[tokio::test]
    async fn open_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("uploads");

        let store = UploadStore::open(&root).await.unwrap();

        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn resolving_the_same_day_twice_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();

        let morning = store.resolve_bucket_path(&at(2024, 3, 7, 8)).await.unwrap();
        let evening = store.resolve_bucket_path(&at(2024, 3, 7, 20)).await.unwrap();

        assert_eq!(morning, evening);
        assert_eq!(morning, dir.path().join("2024-3-7"));
        assert!(morning.is_dir());
    }

    #[tokio::test]
    async fn concurrent_bucket_creation_succeeds() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let now = at(2024, 1, 1, 9);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.resolve_bucket_path(&now).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn bucket_creation_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("uploads");
        let store = UploadStore::open(&root).await.unwrap();
        std::fs::remove_dir(&root).unwrap();
        std::fs::write(&root, b"not a directory").unwrap();

        let err = store.resolve_bucket_path(&at(2024, 3, 7, 12)).await.unwrap_err();

        assert!(matches!(err, StorageError::CreateDir { .. }));
    }

    #[tokio::test]
    async fn allocate_creates_empty_file_in_bucket() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let now = at(2024, 3, 7, 12);

        let (pending, _file) = store.allocate("photo", "cat.jpg", &now).await.unwrap();
        let photo = pending.photo();

        assert_eq!(photo.bucket, "2024-3-7");
        assert!(photo.filename.starts_with(&format!("photo-{}-", now.timestamp_millis())));
        assert!(photo.filename.ends_with(".jpg"));
        assert_eq!(photo.url_path(), format!("/uploads/2024-3-7/{}", photo.filename));
        assert!(photo.path.is_file());
    }

    #[tokio::test]
    async fn uncommitted_upload_is_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();

        let (pending, file) = store.allocate("photo", "cat.jpg", &at(2024, 3, 7, 12)).await.unwrap();
        let path = pending.photo().path.clone();
        drop(file);
        drop(pending);

        assert!(!path.exists());
        assert!(dir.path().join("2024-3-7").is_dir());
    }

    #[tokio::test]
    async fn committed_upload_stays_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();

        let (pending, file) = store.allocate("photo", "cat.jpg", &at(2024, 3, 7, 12)).await.unwrap();
        drop(file);
        let photo = pending.commit();

        assert!(photo.path.is_file());
    }

    #[tokio::test]
    async fn listing_walks_buckets_and_skips_loose_entries() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("2024-3-7")).unwrap();
        std::fs::create_dir_all(dir.path().join("2024-3-8/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("2024-3-9")).unwrap();
        std::fs::write(dir.path().join("2024-3-7/a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("2024-3-8/b.png"), b"b").unwrap();
        std::fs::write(dir.path().join("loose.jpg"), b"flat").unwrap();

        let mut photos = store.list_photos().await.unwrap();
        photos.sort();

        assert_eq!(photos, vec!["/uploads/2024-3-7/a.jpg", "/uploads/2024-3-8/b.png"]);
    }

    #[tokio::test]
    async fn listing_a_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("uploads");
        let store = UploadStore::open(&root).await.unwrap();
        std::fs::remove_dir(&root).unwrap();

        assert!(store.list_photos().await.is_err());
    }
}
