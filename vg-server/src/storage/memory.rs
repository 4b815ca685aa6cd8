use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use vg::basic_models::ImageFile;

use super::{check_version, BlobStore, ImageSource, StoreResult, VersionedBlob};

/// Everything in memory. Used by tests and for trying the server without credentials.
#[derive(Clone, Default)]
pub struct MemoryStore {
    images: Arc<Vec<(ImageFile, Vec<u8>)>>,
    blobs: Arc<Mutex<HashMap<String, VersionedBlob>>>,
}

impl MemoryStore {
    pub fn with_images(images: Vec<(ImageFile, Vec<u8>)>) -> Self {
        Self {
            images: Arc::new(images),
            blobs: Default::default(),
        }
    }
}

#[async_trait]
impl ImageSource for MemoryStore {
    async fn list_images(&self) -> Result<Vec<ImageFile>> {
        Ok(self.images.iter().map(|(f, _)| f.clone()).collect())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        self.images
            .iter()
            .find(|(f, _)| f.id == file_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| anyhow!("No such image: {}", file_id))
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn read(&self, name: &str) -> StoreResult<Option<VersionedBlob>> {
        Ok(self.blobs.lock().await.get(name).cloned())
    }

    async fn write(
        &self,
        name: &str,
        bytes: Vec<u8>,
        expected_version: Option<&str>,
    ) -> StoreResult<String> {
        let mut blobs = self.blobs.lock().await;
        let found = blobs.get(name).map(|b| b.version.clone());
        check_version(name, expected_version, found.as_deref())?;
        let next = found
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v + 1)
            .unwrap_or(1)
            .to_string();
        blobs.insert(
            name.into(),
            VersionedBlob {
                bytes,
                version: next.clone(),
            },
        );
        Ok(next)
    }
}
