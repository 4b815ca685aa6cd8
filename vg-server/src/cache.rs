use quick_cache::sync::Cache;
use quick_cache::Weighter;
use std::sync::Arc;
use vg::basic_models::ImageFile;

pub type VGCache = Arc<Cache<CacheQuery, CacheValue, ValueWeighter>>;

pub fn new_cache() -> VGCache {
    Arc::new(Cache::with_weighter(64, 50 << 20, ValueWeighter))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheQuery {
    Image { file_id: String },
    FileList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Image {
        image: Arc<Vec<u8>>,
    },
    FileList {
        files: Arc<Vec<ImageFile>>,
        fetched: chrono::DateTime<chrono::Utc>,
    },
}

#[derive(Clone)]
pub struct ValueWeighter;

impl Weighter<CacheQuery, CacheValue> for ValueWeighter {
    fn weight(&self, _key: &CacheQuery, val: &CacheValue) -> u64 {
        match val {
            CacheValue::Image { image } => {
                tracing::debug!("Image length: {}", image.len());
                image.len().max(1) as u64
            }
            CacheValue::FileList { files, .. } => files
                .iter()
                .map(|f| f.id.len() + f.name.len() + 200)
                .sum::<usize>()
                .max(1) as u64,
        }
    }
}
