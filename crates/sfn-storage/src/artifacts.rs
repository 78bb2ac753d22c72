use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Downloaded bytes parked on disk before they become a permanent asset.
///
/// The temp file is removed when the value is dropped, whether or not it was
/// persisted first.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    content_hash: String,
    byte_size: usize,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Content-addressed blob storage for downloaded images.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn artifact_relative_path(&self, content_hash: &str, extension: &str) -> PathBuf {
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        let shard = content_hash.get(..2).unwrap_or("00");
        PathBuf::from(shard).join(format!("{content_hash}.{ext}"))
    }

    pub fn absolute_path(&self, relative_path: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative_path)
    }

    /// Write bytes to a fresh temp file under the staging directory.
    pub async fn stage(&self, bytes: &[u8]) -> anyhow::Result<StagedFile> {
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("creating staging directory {}", staging.display()))?;

        let path = staging.join(format!("{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let staged = StagedFile {
            path,
            content_hash: Self::sha256_hex(bytes),
            byte_size: bytes.len(),
        };

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&staged.path)
            .await
            .with_context(|| format!("opening staged file {}", staged.path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing staged file {}", staged.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing staged file {}", staged.path.display()))?;
        drop(file);

        Ok(staged)
    }

    /// Move a staged file to its hash-addressed path with an atomic rename.
    pub async fn persist(&self, staged: &StagedFile, extension: &str) -> anyhow::Result<StoredArtifact> {
        let relative_path = self.artifact_relative_path(&staged.content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let stored = |deduplicated| StoredArtifact {
            content_hash: staged.content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: staged.byte_size,
            deduplicated,
        };

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating artifact directory {}", parent.display()))?;
        }

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(stored(true));
        }

        match fs::rename(&staged.path, &absolute_path).await {
            Ok(()) => Ok(stored(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(stored(true)),
            Err(err) => Err(err).with_context(|| {
                format!(
                    "atomically renaming staged file {} -> {}",
                    staged.path.display(),
                    absolute_path.display()
                )
            }),
        }
    }

    pub async fn read(&self, relative_path: impl AsRef<Path>) -> anyhow::Result<Vec<u8>> {
        let path = self.root.join(relative_path);
        fs::read(&path)
            .await
            .with_context(|| format!("reading artifact {}", path.display()))
    }
}
