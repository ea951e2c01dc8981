use async_trait::async_trait;
use log::{error, info};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;

use crate::models::ImageRef;

pub const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp", "image/bmp"];

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores the bytes under `hash`. Returns `false` when the content was already present.
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<bool, ImageStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Upload a valid image. The file you uploaded was either not an image or a corrupted image.")]
    NotAnImage,
    #[error("The image is larger than 10 MB.")]
    TooLarge,
}

/// Hex SHA-256 of the content; the storage key.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Sniffs the upload and returns its storage reference when it is an accepted image.
pub fn inspect_upload(bytes: &[u8]) -> Result<ImageRef, UploadError> {
    if bytes.len() > IMAGE_SIZE_LIMIT {
        return Err(UploadError::TooLarge);
    }
    let mime = infer::get(bytes).map(|t| t.mime_type()).ok_or(UploadError::NotAnImage)?;
    if !ALLOWED_MIME.contains(&mime) {
        return Err(UploadError::NotAnImage);
    }
    Ok(ImageRef { hash: content_hash(bytes), mime: mime.to_string() })
}

/// Content-addressed files under `<root>/posts/<hash[0..2]>/<hash>`.
#[derive(Clone, Debug)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!("media store rooted at '{}'", root.display());
        Self { root }
    }

    fn path_for(&self, hash: &str) -> Result<PathBuf, ImageStoreError> {
        if !is_valid_hash(hash) {
            return Err(ImageStoreError::NotFound);
        }
        Ok(self.root.join("posts").join(&hash[0..2]).join(hash))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, hash: &str, _mime: &str, bytes: &[u8]) -> Result<bool, ImageStoreError> {
        let path = self.path_for(hash).map_err(|_| ImageStoreError::Other(format!("invalid hash '{hash}'")))?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(false);
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                error!("create_dir_all failed dir={} err={e}", dir.display());
                ImageStoreError::Other(e.to_string())
            })?;
        }
        // write then rename so readers never observe a partial file; the temp name is per call
        let tmp = path.with_extension(format!("{:016x}.part", rand::random::<u64>()));
        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            error!("write failed hash={hash} path={} err={e}", tmp.display());
            ImageStoreError::Other(e.to_string())
        })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            // a concurrent upload of the same content got there first
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(false);
            }
            error!("rename failed hash={hash} err={e}");
            return Err(ImageStoreError::Other(e.to_string()));
        }
        Ok(true)
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(hash)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ImageStoreError::NotFound),
            Err(e) => return Err(ImageStoreError::Other(e.to_string())),
        };
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// 1x1 transparent PNG.
    pub fn sample_png() -> Vec<u8> {
        vec![
            0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
            0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
            0x89, 0x00, 0x00, 0x00, 0x0A, b'I', b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
            0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE,
            0x42, 0x60, 0x82,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample_png;
    use super::*;

    #[test]
    fn png_accepted_text_rejected() {
        let img = inspect_upload(&sample_png()).unwrap();
        assert_eq!(img.mime, "image/png");
        assert!(is_valid_hash(&img.hash));
        assert_eq!(inspect_upload(b"hello world").unwrap_err(), UploadError::NotAnImage);
        // recognisable but not an image
        assert_eq!(inspect_upload(b"%PDF-1.4\n%%EOF").unwrap_err(), UploadError::NotAnImage);
    }

    #[test]
    fn hash_shape_is_checked() {
        assert!(!is_valid_hash("../../etc/passwd"));
        assert!(!is_valid_hash(&"A".repeat(64)));
        assert!(is_valid_hash(&content_hash(b"x")));
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        let png = sample_png();
        let img = inspect_upload(&png).unwrap();
        assert!(store.save(&img.hash, &img.mime, &png).await.unwrap());
        assert!(!store.save(&img.hash, &img.mime, &png).await.unwrap());
        let (bytes, mime) = store.load(&img.hash).await.unwrap();
        assert_eq!(bytes, png);
        assert_eq!(mime, "image/png");
        assert!(dir.path().join("posts").join(&img.hash[0..2]).join(&img.hash).exists());
        assert!(matches!(store.load(&content_hash(b"missing")).await, Err(ImageStoreError::NotFound)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_of_one_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        let png = sample_png();
        let img = inspect_upload(&png).unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (store, png, hash) = (store.clone(), png.clone(), img.hash.clone());
                tokio::spawn(async move { store.save(&hash, "image/png", &png).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(store.load(&img.hash).await.unwrap().0, png);
        // no temp files left behind
        let shard = dir.path().join("posts").join(&img.hash[0..2]);
        assert_eq!(std::fs::read_dir(shard).unwrap().count(), 1);
    }
}
