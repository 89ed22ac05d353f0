use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::create_dir_all;
use tracing::{debug, info};

/// Directory of synthesized audio files, keyed by a hash of the message text.
#[derive(Debug, Clone)]
pub struct AudioCache {
    cache_dir: PathBuf,
}

impl AudioCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub async fn ensure_cache_dir(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.cache_dir).await? {
            debug!("Creating cache directory: {:?}", self.cache_dir);
            create_dir_all(&self.cache_dir).await?;
        }
        Ok(())
    }

    pub fn generate_cache_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get_cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("tts_{}", key))
            .with_extension("wav")
    }

    pub async fn is_cached(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.get_cache_path(key)).await?)
    }

    /// Write through a temporary file so readers never see a partial wav.
    pub async fn store_in_cache(&self, key: &str, data: &[u8]) -> Result<PathBuf> {
        self.ensure_cache_dir().await?;
        let path = self.get_cache_path(key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        info!("cache: Stored {} -> {} bytes", key, data.len());
        Ok(path)
    }

    pub async fn delete_from_cache(&self, key: &str) -> Result<()> {
        let path = self.get_cache_path(key);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(path).await?;
            debug!("Deleted file from cache with key: {}", key);
        }
        Ok(())
    }
}
