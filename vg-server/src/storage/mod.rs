use anyhow::Result;
use async_trait::async_trait;
use vg::basic_models::ImageFile;

pub mod drive;
pub mod local;
pub mod memory;

pub use drive::DriveClient;
pub use local::LocalFolder;
pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{name} was changed by another writer (expected version {expected:?}, found {found:?})")]
    Conflict {
        name: String,
        expected: Option<String>,
        found: Option<String>,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Other(e.into())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Other(e.into())
    }
}

/// A file's content along with the version it had when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBlob {
    pub bytes: Vec<u8>,
    pub version: String,
}

/// Somewhere the gallery's pictures come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn list_images(&self) -> Result<Vec<ImageFile>>;
    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;
}

/// Named blobs with a version token, used to hold the JSON database.
///
/// `expected_version` is the version seen by the last read, or `None` if the
/// blob did not exist then. Writing over anything else is a `Conflict`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, name: &str) -> StoreResult<Option<VersionedBlob>>;
    async fn write(
        &self,
        name: &str,
        bytes: Vec<u8>,
        expected_version: Option<&str>,
    ) -> StoreResult<String>;
}

/// Compare the version found in storage with the version a writer expects.
pub(crate) fn check_version(
    name: &str,
    expected: Option<&str>,
    found: Option<&str>,
) -> StoreResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            name: name.into(),
            expected: expected.map(Into::into),
            found: found.map(Into::into),
        })
    }
}

/// Drive hands out 220px thumbnails; the grid looks better with larger ones.
pub fn upgrade_thumbnail(link: &str) -> String {
    link.replace("=s220", "=s600")
}
