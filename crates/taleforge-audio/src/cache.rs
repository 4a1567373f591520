//! Content-addressed on-disk cache for generated ambient/sfx clips.
//!
//! Keyed on `sha256(description)[:16]`. Writes go to a `.tmp` file then
//! `rename()` into place so a crash mid-write never leaves a corrupt file
//! visible under the real name. A corrupt or zero-byte file on read is
//! treated as a cache miss, not an error.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, prefix: &str, description: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(description.as_bytes());
        let digest = hex::encode(hasher.finalize());
        let short = &digest[..16];
        self.dir.join(format!("{prefix}_{short}.mp3"))
    }

    /// Read a cached clip, if present and non-empty. A zero-byte or missing
    /// file is a miss; a read error other than "not found" is logged and
    /// also treated as a miss so a flaky filesystem never fails the turn.
    pub async fn get(&self, prefix: &str, description: &str) -> Option<Vec<u8>> {
        let path = self.path_for(prefix, description);
        match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                debug!(%prefix, path = %path.display(), "audio cache hit");
                Some(bytes)
            }
            Ok(_) => {
                warn!(path = %path.display(), "audio cache entry is empty, treating as miss");
                None
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "audio cache read failed, treating as miss");
                None
            }
        }
    }

    /// Atomically write a clip into the cache. Cleans up the `.tmp` staging
    /// file if either the write or the rename fails.
    pub async fn put(&self, prefix: &str, description: &str, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(prefix, description);
        let tmp = path.with_extension("mp3.tmp");
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e);
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "taleforge-audio-cache-test-{:?}",
            std::thread::current().id()
        ));
        dir
    }

    #[tokio::test]
    async fn miss_then_hit_round_trips() {
        let dir = tempdir();
        let cache = ArtifactCache::new(&dir);
        assert!(cache.get("ambient", "a windswept ridge").await.is_none());

        cache
            .put("ambient", "a windswept ridge", b"fake-mp3-bytes")
            .await
            .unwrap();

        let hit = cache.get("ambient", "a windswept ridge").await.unwrap();
        assert_eq!(hit, b"fake-mp3-bytes");
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn zero_byte_file_is_a_miss() {
        let dir = tempdir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let cache = ArtifactCache::new(&dir);
        let path = cache.path_for("sfx", "a creaking door");
        tokio::fs::write(&path, b"").await.unwrap();

        assert!(cache.get("sfx", "a creaking door").await.is_none());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn different_descriptions_get_different_keys() {
        let dir = tempdir();
        let cache = ArtifactCache::new(&dir);
        assert_ne!(
            cache.path_for("ambient", "a forest"),
            cache.path_for("ambient", "a dungeon")
        );
        let _ = dir;
    }
}
