use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use vg::basic_models::ImageFile;

use super::{check_version, BlobStore, ImageSource, StoreResult, VersionedBlob};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// A plain directory standing in for the drive folder, for development.
///
/// Versions live next to each blob in a hidden `.<name>.version` file.
#[derive(Clone)]
pub struct LocalFolder {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl LocalFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Default::default(),
        }
    }

    /// Resolve a file name inside the folder, refusing anything that could escape it.
    fn path_of(&self, name: &str) -> Result<PathBuf> {
        ensure!(
            !name.is_empty()
                && !name.contains(['/', '\\'])
                && name != ".."
                && !name.starts_with('.'),
            "Invalid file name: {:?}",
            name
        );
        Ok(self.root.join(name))
    }

    fn version_path(&self, name: &str) -> Result<PathBuf> {
        self.path_of(name)?;
        Ok(self.root.join(format!(".{}.version", name)))
    }

    async fn read_version(&self, name: &str) -> Result<Option<String>> {
        if !tokio::fs::try_exists(self.path_of(name)?).await? {
            return Ok(None);
        }
        let version = tokio::fs::read_to_string(self.version_path(name)?)
            .await
            .unwrap_or_else(|_| "0".into());
        Ok(Some(version.trim().to_string()))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl ImageSource for LocalFolder {
    async fn list_images(&self) -> Result<Vec<ImageFile>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Listing {}", self.root.display()))?;
        let mut files = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !is_image(&path) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(ImageFile {
                id: name.clone(),
                name,
                thumbnail_link: None,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let path = self.path_of(file_id)?;
        ensure!(is_image(&path), "Not an image: {}", file_id);
        Ok(tokio::fs::read(&path)
            .await
            .with_context(|| format!("Reading {}", path.display()))?)
    }
}

#[async_trait]
impl BlobStore for LocalFolder {
    async fn read(&self, name: &str) -> StoreResult<Option<VersionedBlob>> {
        let Some(version) = self.read_version(name).await? else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(self.path_of(name)?).await?;
        Ok(Some(VersionedBlob { bytes, version }))
    }

    async fn write(
        &self,
        name: &str,
        bytes: Vec<u8>,
        expected_version: Option<&str>,
    ) -> StoreResult<String> {
        let _guard = self.write_lock.lock().await;
        let found = self.read_version(name).await?;
        check_version(name, expected_version, found.as_deref())?;
        let next = found
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v + 1)
            .unwrap_or(1)
            .to_string();
        // Write to a temporary file first so a crash never leaves half a document behind.
        let path = self.path_of(name)?;
        let tmp = self.root.join(format!(".{}.tmp", name));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tokio::fs::write(self.version_path(name)?, &next).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreError;

    #[tokio::test]
    async fn lists_only_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.PNG"), b"png").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpg").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"text").unwrap();
        let folder = LocalFolder::new(dir.path());

        let names = folder
            .list_images()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.jpg", "b.PNG"]);
        assert_eq!(folder.download("a.jpg").await.unwrap(), b"jpg");
    }

    #[tokio::test]
    async fn refuses_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let folder = LocalFolder::new(dir.path());
        assert!(folder.download("../etc/passwd.jpg").await.is_err());
        assert!(folder.download("notes.txt").await.is_err());
        assert!(folder.read(".hidden").await.is_err());
    }

    #[tokio::test]
    async fn versions_guard_writes() {
        let dir = tempfile::tempdir().unwrap();
        let folder = LocalFolder::new(dir.path());
        assert!(folder.read("db.json").await.unwrap().is_none());

        let v1 = folder.write("db.json", b"{}".to_vec(), None).await.unwrap();
        assert_eq!(v1, "1");
        let blob = folder.read("db.json").await.unwrap().unwrap();
        assert_eq!(blob.version, "1");
        assert_eq!(blob.bytes, b"{}");

        let v2 = folder
            .write("db.json", b"{\"a\":1}".to_vec(), Some("1"))
            .await
            .unwrap();
        assert_eq!(v2, "2");

        // A writer still holding version 1 must not clobber version 2
        let stale = folder.write("db.json", b"{}".to_vec(), Some("1")).await;
        assert!(matches!(stale, Err(StoreError::Conflict { .. })));
        // Neither may a writer who thought the file was missing
        let stale = folder.write("db.json", b"{}".to_vec(), None).await;
        assert!(matches!(stale, Err(StoreError::Conflict { .. })));
    }
}
