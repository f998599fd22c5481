//! Staging directory for locally held media files.
//!
//! Generated thumbnails (and uploaded covers, when the surrounding UI is in
//! use) live in one directory. Staged files recorded on a session are
//! removed on stop or failed start; the clear operation wipes and recreates
//! the whole directory.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Manages the staging directory.
#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the staging directory if it does not exist.
    pub async fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Path for a generated thumbnail belonging to a session.
    pub fn thumbnail_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("thumb-{}.jpg", session_id))
    }

    /// Remove a staged file. A file that is already gone is not an error.
    pub async fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed staged file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove every staged file and recreate the empty directory.
    pub async fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&self.dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_ensure_creates_directory() {
        let root = tempdir().unwrap();
        let staging = Staging::new(root.path().join("uploads"));

        staging.ensure().await.unwrap();
        assert!(staging.dir().is_dir());

        // Idempotent
        staging.ensure().await.unwrap();
    }

    #[tokio::test]
    async fn test_thumbnail_path_is_per_session() {
        let staging = Staging::new("/var/lib/loopcast/uploads");
        let path = staging.thumbnail_path("abc-123");
        assert_eq!(
            path,
            PathBuf::from("/var/lib/loopcast/uploads/thumb-abc-123.jpg")
        );
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let root = tempdir().unwrap();
        let staging = Staging::new(root.path());
        staging
            .remove(&root.path().join("never-created.jpg"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_empties_and_recreates() {
        let root = tempdir().unwrap();
        let staging = Staging::new(root.path().join("uploads"));
        staging.ensure().await.unwrap();

        let staged = staging.thumbnail_path("s1");
        tokio::fs::write(&staged, b"jpeg bytes").await.unwrap();
        assert!(staged.exists());

        staging.clear().await.unwrap();
        assert!(staging.dir().is_dir());
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_clear_when_directory_missing() {
        let root = tempdir().unwrap();
        let staging = Staging::new(root.path().join("never-made"));
        staging.clear().await.unwrap();
        assert!(staging.dir().is_dir());
    }
}
