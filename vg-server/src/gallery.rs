use std::sync::Arc;

use anyhow::Result;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use vg::basic_models::{GalleryEntry, ImageFile, LeaderboardEntry};

use crate::cache::{CacheQuery, CacheValue, VGCache};
use crate::database::GalleryDocument;
use crate::storage::{upgrade_thumbnail, ImageSource};

/// The folder listing is refetched at most this often
const LISTING_TTL_MINUTES: i64 = 60;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum GalleryFilter {
    #[default]
    All,
    Favorites,
    MostVoted,
}

/// Narrow or reorder the listing for the grid.
pub fn filter_images(
    files: &[ImageFile],
    filter: GalleryFilter,
    doc: &GalleryDocument,
    favorites: &[String],
) -> Vec<ImageFile> {
    match filter {
        GalleryFilter::All => files.to_vec(),
        GalleryFilter::Favorites => files
            .iter()
            .filter(|f| favorites.contains(&f.id))
            .cloned()
            .collect(),
        GalleryFilter::MostVoted => {
            let mut sorted = files.to_vec();
            // sort_by_key is stable, so equal scores keep the drive's order
            sorted.sort_by_key(|f| std::cmp::Reverse(doc.votes_for(&f.id)));
            sorted
        }
    }
}

/// Attach the database's counters to each file, for cards and the JSON API.
pub fn entries(files: &[ImageFile], doc: &GalleryDocument) -> Vec<GalleryEntry> {
    files
        .iter()
        .map(|f| GalleryEntry {
            image: ImageFile {
                thumbnail_link: f.thumbnail_link.as_deref().map(upgrade_thumbnail),
                ..f.clone()
            },
            votes: doc.votes_for(&f.id),
            roasts: doc.roasts.get(&f.id).map(Vec::len).unwrap_or_default(),
            comments: doc.comments.get(&f.id).map(Vec::len).unwrap_or_default(),
        })
        .collect()
}

/// The best scoring images, named after the files still in the folder.
pub fn leaderboard(files: &[ImageFile], doc: &GalleryDocument, n: usize) -> Vec<LeaderboardEntry> {
    doc.top_voted(n)
        .into_iter()
        .map(|(file_id, score)| LeaderboardEntry {
            name: files
                .iter()
                .find(|f| f.id == file_id)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| "Unknown".into()),
            file_id,
            score,
        })
        .collect()
}

pub fn random_pick(files: &[ImageFile]) -> Option<&ImageFile> {
    files.choose(&mut rand::thread_rng())
}

/// The image source with caching in front of it
#[derive(Clone)]
pub struct Gallery {
    source: Arc<dyn ImageSource>,
    cache: VGCache,
}

impl Gallery {
    pub fn new(source: Arc<dyn ImageSource>, cache: VGCache) -> Self {
        Self { source, cache }
    }

    pub async fn files(&self) -> Result<Arc<Vec<ImageFile>>> {
        if let Some(CacheValue::FileList { files, fetched }) = self.cache.get(&CacheQuery::FileList)
        {
            if chrono::Utc::now() - fetched < chrono::Duration::minutes(LISTING_TTL_MINUTES) {
                return Ok(files);
            }
        }
        tracing::info!("Refreshing image listing");
        let files = Arc::new(self.source.list_images().await?);
        self.cache.insert(
            CacheQuery::FileList,
            CacheValue::FileList {
                files: files.clone(),
                fetched: chrono::Utc::now(),
            },
        );
        Ok(files)
    }

    pub async fn find(&self, file_id: &str) -> Result<Option<ImageFile>> {
        Ok(self.files().await?.iter().find(|f| f.id == file_id).cloned())
    }

    pub async fn image_bytes(&self, file_id: &str) -> Result<Arc<Vec<u8>>> {
        let key = CacheQuery::Image {
            file_id: file_id.into(),
        };
        if let Some(CacheValue::Image { image }) = self.cache.get(&key) {
            return Ok(image);
        }
        let image = Arc::new(self.source.download(file_id).await?);
        self.cache.insert(
            key,
            CacheValue::Image {
                image: image.clone(),
            },
        );
        Ok(image)
    }
}
