//! Filesystem storage for post images served under the media prefix.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

/// Directory, relative to the media root, that post images land in.
pub const POST_IMAGE_DIR: &str = "posts";

const CHECKSUM_PREFIX_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum UploadStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("uploaded file is empty")]
    EmptyPayload,
}

/// Result of storing an upload payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// Path relative to the media root, e.g. `posts/3f1c...-small.gif`.
    pub stored_path: String,
    /// False when an identical payload was already on disk.
    pub newly_stored: bool,
}

#[derive(Debug)]
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store an image payload under [`POST_IMAGE_DIR`].
    ///
    /// Names are derived from the content checksum, so storing the same bytes
    /// twice yields the same path and leaves the existing file alone.
    pub async fn store_image(
        &self,
        original_name: &str,
        data: &Bytes,
    ) -> Result<StoredUpload, UploadStorageError> {
        if data.is_empty() {
            return Err(UploadStorageError::EmptyPayload);
        }

        let checksum = hex::encode(Sha256::digest(data));
        let stored_path = build_stored_path(&checksum, original_name);
        let absolute = self.resolve(&stored_path)?;

        if fs::try_exists(&absolute).await? {
            return Ok(StoredUpload {
                stored_path,
                newly_stored: false,
            });
        }

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        if let Err(err) = file.write_all(data).await {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(err.into());
        }
        file.flush().await?;

        tracing::debug!(
            target = "yatube::infra::uploads",
            stored_path = %stored_path,
            size_bytes = data.len(),
            "stored post image"
        );

        Ok(StoredUpload {
            stored_path,
            newly_stored: true,
        })
    }

    pub async fn read(&self, stored_path: &str) -> Result<Bytes, UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Remove the stored payload. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UploadStorageError::Io(err)),
        }
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, UploadStorageError> {
        let relative = Path::new(stored_path);
        if stored_path.is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(UploadStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

fn build_stored_path(checksum: &str, original_name: &str) -> String {
    let prefix = &checksum[..CHECKSUM_PREFIX_LEN.min(checksum.len())];
    let filename = sanitize_filename(original_name);
    format!("{POST_IMAGE_DIR}/{prefix}-{filename}")
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("image");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "image".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}
