//! Blob storage for transcript text.
//!
//! Transcripts live in a private on-disk container at
//! `<data_dir>/transcripts/<video_external_id>/transcript.txt`. Blobs are
//! immutable once written except for full overwrites by the video pipeline.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Maximum size of a single transcript blob.
const MAX_BLOB_BYTES: usize = 10 * 1024 * 1024;

/// Filename of the transcript blob inside a video's directory.
const TRANSCRIPT_FILENAME: &str = "transcript.txt";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob exceeds size cap: {size} > {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("invalid blob path component: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Transcript blob container.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a handle on the container rooted at `root`. The directory is
    /// created lazily on first write.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Relative blob path for a video: `<video_external_id>/transcript.txt`.
    pub fn transcript_path(video_external_id: &str) -> String {
        format!("{}/{}", video_external_id, TRANSCRIPT_FILENAME)
    }

    fn absolute_path(&self, video_external_id: &str) -> Result<PathBuf, BlobError> {
        // Provider video ids are opaque but must stay inside the container.
        if video_external_id.is_empty()
            || video_external_id.contains('/')
            || video_external_id.contains("..")
        {
            return Err(BlobError::InvalidPath(video_external_id.to_string()));
        }
        Ok(self.root.join(video_external_id).join(TRANSCRIPT_FILENAME))
    }

    /// Write (overwrite) a video's transcript blob.
    ///
    /// If the container directory does not exist yet it is created and the
    /// write is retried once. Returns the relative blob path.
    pub async fn write_transcript(
        &self,
        video_external_id: &str,
        content: &str,
    ) -> Result<String, BlobError> {
        if content.len() > MAX_BLOB_BYTES {
            return Err(BlobError::TooLarge {
                size: content.len(),
                max: MAX_BLOB_BYTES,
            });
        }

        let path = self.absolute_path(video_external_id)?;
        match tokio::fs::write(&path, content).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, content).await?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self::transcript_path(video_external_id))
    }

    /// Read a video's transcript blob.
    pub async fn read_transcript(&self, video_external_id: &str) -> Result<String, BlobError> {
        let path = self.absolute_path(video_external_id)?;
        Ok(tokio::fs::read_to_string(&path).await?)
    }

    pub async fn exists(&self, video_external_id: &str) -> bool {
        match self.absolute_path(video_external_id) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Container root on disk.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_creates_container_and_reads_back() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("transcripts"));

        let rel = store
            .write_transcript("abc123", "[00:00] hello\n[00:05] world\n")
            .await
            .unwrap();
        assert_eq!(rel, "abc123/transcript.txt");
        assert!(store.exists("abc123").await);
        assert_eq!(
            store.read_transcript("abc123").await.unwrap(),
            "[00:00] hello\n[00:05] world\n"
        );
    }

    #[tokio::test]
    async fn test_write_overwrites_existing_blob() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("transcripts"));

        store.write_transcript("vid", "old\n").await.unwrap();
        store.write_transcript("vid", "new\n").await.unwrap();
        assert_eq!(store.read_transcript("vid").await.unwrap(), "new\n");
    }

    #[tokio::test]
    async fn test_size_cap_is_enforced() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("transcripts"));
        let huge = "x".repeat(MAX_BLOB_BYTES + 1);

        let err = store.write_transcript("vid", &huge).await.unwrap_err();
        assert!(matches!(err, BlobError::TooLarge { .. }));
        assert!(!store.exists("vid").await);
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("transcripts"));

        assert!(store.write_transcript("../evil", "x").await.is_err());
        assert!(store.write_transcript("a/b", "x").await.is_err());
        assert!(store.write_transcript("", "x").await.is_err());
    }
}
