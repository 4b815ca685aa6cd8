use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use vg::basic_models::{Comment, RoastRecord};

use crate::storage::{BlobStore, StoreError};

/// How many times a mutation is replayed when another process wrote first
const MAX_ATTEMPTS: usize = 3;
pub const MAX_COMMENT_CHARS: usize = 500;

pub fn current_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub roasts: u64,
    pub voice_generations: u64,
}

/// The whole database. It is small enough to be read and rewritten in one piece.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryDocument {
    pub votes: BTreeMap<String, i64>,
    pub comments: BTreeMap<String, Vec<Comment>>,
    pub roasts: BTreeMap<String, Vec<RoastRecord>>,
    pub stats: Stats,
}

impl GalleryDocument {
    pub fn votes_for(&self, file_id: &str) -> i64 {
        self.votes.get(file_id).copied().unwrap_or_default()
    }

    /// Images ordered by score, best first. Ties are broken by id so the order is stable.
    pub fn top_voted(&self, n: usize) -> Vec<(String, i64)> {
        let mut scores = self
            .votes
            .iter()
            .map(|(id, score)| (id.clone(), *score))
            .collect::<Vec<_>>();
        scores.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scores.truncate(n);
        scores
    }
}

/// A JSON document kept in a `BlobStore` and used as a key-value database.
///
/// Writers in this process take turns on a mutex. Writers in other processes are
/// detected through the blob version, and the mutation is replayed on their data.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn BlobStore>,
    name: String,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    pub fn new(store: Arc<dyn BlobStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            write_lock: Default::default(),
        }
    }

    async fn load_versioned(&self) -> Result<(GalleryDocument, Option<String>)> {
        match self.store.read(&self.name).await? {
            None => Ok((GalleryDocument::default(), None)),
            Some(blob) if blob.bytes.iter().all(u8::is_ascii_whitespace) => {
                Ok((GalleryDocument::default(), Some(blob.version)))
            }
            Some(blob) => {
                let doc = serde_json::from_slice(&blob.bytes)
                    .with_context(|| format!("Parsing {}", self.name))?;
                Ok((doc, Some(blob.version)))
            }
        }
    }

    /// Read the current document. A missing file is an empty gallery.
    pub async fn load(&self) -> Result<GalleryDocument> {
        Ok(self.load_versioned().await?.0)
    }

    /// Apply `mutate` to a fresh copy of the document and write it back.
    ///
    /// `mutate` may run more than once, so it must not have side effects of its own.
    pub async fn update<T, F>(&self, mut mutate: F) -> Result<T>
    where
        F: FnMut(&mut GalleryDocument) -> Result<T>,
    {
        let _guard = self.write_lock.lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (mut doc, version) = self.load_versioned().await?;
            let out = mutate(&mut doc)?;
            let bytes = serde_json::to_vec_pretty(&doc)?;
            match self.store.write(&self.name, bytes, version.as_deref()).await {
                Ok(new_version) => {
                    tracing::debug!("Saved {} at version {}", self.name, new_version);
                    return Ok(out);
                }
                Err(e @ StoreError::Conflict { .. }) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!("{}, retrying (attempt {})", e, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Add a star rating to an image and return its new total.
    pub async fn vote(&self, file_id: &str, stars: u8) -> Result<i64> {
        ensure!((1..=5).contains(&stars), "Votes are 1 to 5 stars");
        self.update(|doc| {
            let total = doc.votes.entry(file_id.to_string()).or_insert(0);
            *total += i64::from(stars);
            Ok(*total)
        })
        .await
    }

    pub async fn add_comment(&self, file_id: &str, author: &str, text: &str) -> Result<Comment> {
        let text = text.trim();
        ensure!(!text.is_empty(), "Comments cannot be empty");
        ensure!(
            text.chars().count() <= MAX_COMMENT_CHARS,
            "Comments are limited to {} characters",
            MAX_COMMENT_CHARS
        );
        let author = match author.trim() {
            "" => "Anonymous",
            a => a,
        };
        let comment = Comment {
            author: author.into(),
            text: text.into(),
            created_on: current_timestamp(),
        };
        self.update(|doc| {
            doc.comments
                .entry(file_id.to_string())
                .or_default()
                .push(comment.clone());
            Ok(comment.clone())
        })
        .await
    }

    pub async fn append_roast(&self, file_id: &str, record: RoastRecord) -> Result<()> {
        self.update(|doc| {
            doc.stats.roasts += 1;
            if record.voiced {
                doc.stats.voice_generations += 1;
            }
            doc.roasts
                .entry(file_id.to_string())
                .or_default()
                .push(record.clone());
            Ok(())
        })
        .await
    }

    pub async fn roast_history(&self, file_id: &str) -> Result<Vec<RoastRecord>> {
        Ok(self
            .load()
            .await?
            .roasts
            .remove(file_id)
            .unwrap_or_default())
    }

    pub async fn comments(&self, file_id: &str) -> Result<Vec<Comment>> {
        Ok(self
            .load()
            .await?
            .comments
            .remove(file_id)
            .unwrap_or_default())
    }

    pub async fn top_voted(&self, n: usize) -> Result<Vec<(String, i64)>> {
        Ok(self.load().await?.top_voted(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, VersionedBlob};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_db() -> (MemoryStore, Database) {
        let store = MemoryStore::default();
        let db = Database::new(Arc::new(store.clone()), "db.json");
        (store, db)
    }

    fn roast(text: &str, voiced: bool) -> RoastRecord {
        RoastRecord {
            text: text.into(),
            level: 1,
            description: None,
            voiced,
            created_on: current_timestamp(),
        }
    }

    #[tokio::test]
    async fn votes_accumulate() {
        let (_, db) = memory_db();
        assert_eq!(db.vote("a", 3).await.unwrap(), 3);
        assert_eq!(db.vote("a", 5).await.unwrap(), 8);
        assert_eq!(db.vote("b", 1).await.unwrap(), 1);
        assert!(db.vote("a", 0).await.is_err());
        assert!(db.vote("a", 6).await.is_err());
        assert_eq!(db.load().await.unwrap().votes_for("a"), 8);
    }

    #[tokio::test]
    async fn top_voted_breaks_ties_by_id() {
        let (_, db) = memory_db();
        db.vote("c", 2).await.unwrap();
        db.vote("b", 4).await.unwrap();
        db.vote("a", 2).await.unwrap();
        assert_eq!(
            db.top_voted(2).await.unwrap(),
            vec![("b".to_string(), 4), ("a".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn comments_are_validated() {
        let (_, db) = memory_db();
        let c = db.add_comment("a", "  ", "  nice hat ").await.unwrap();
        assert_eq!(c.author, "Anonymous");
        assert_eq!(c.text, "nice hat");
        assert!(db.add_comment("a", "me", "   ").await.is_err());
        assert!(db
            .add_comment("a", "me", &"x".repeat(MAX_COMMENT_CHARS + 1))
            .await
            .is_err());
        // Exactly at the limit is fine, and it counts characters rather than bytes
        let longest = "é".repeat(MAX_COMMENT_CHARS);
        let c = db.add_comment("a", "Sam", &longest).await.unwrap();
        assert_eq!(c.text, longest);
        let all = db.comments("a").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].author, "Sam");
    }

    #[tokio::test]
    async fn roasts_update_stats() {
        let (_, db) = memory_db();
        db.append_roast("a", roast("first", false)).await.unwrap();
        db.append_roast("a", roast("second", true)).await.unwrap();
        let doc = db.load().await.unwrap();
        assert_eq!(doc.stats.roasts, 2);
        assert_eq!(doc.stats.voice_generations, 1);
        let history = db.roast_history("a").await.unwrap();
        assert_eq!(history[0].text, "first");
        assert_eq!(history[1].text, "second");
        assert!(db.roast_history("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn loads_older_documents() {
        let (store, db) = memory_db();
        store
            .write("db.json", br#"{"votes": {"a": 7}}"#.to_vec(), None)
            .await
            .unwrap();
        let doc = db.load().await.unwrap();
        assert_eq!(doc.votes_for("a"), 7);
        assert_eq!(doc.stats, Stats::default());
        assert_eq!(db.vote("a", 1).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn two_databases_do_not_clobber_each_other() {
        let store = MemoryStore::default();
        let one = Database::new(Arc::new(store.clone()), "db.json");
        let two = Database::new(Arc::new(store.clone()), "db.json");
        let (a, b) = tokio::join!(one.vote("x", 2), two.vote("x", 3));
        a.unwrap();
        b.unwrap();
        assert_eq!(one.load().await.unwrap().votes_for("x"), 5);
    }

    /// A store where someone else sneaks in a write before each of ours
    struct Meddler {
        inner: MemoryStore,
        meddles: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for Meddler {
        async fn read(&self, name: &str) -> crate::storage::StoreResult<Option<VersionedBlob>> {
            self.inner.read(name).await
        }

        async fn write(
            &self,
            name: &str,
            bytes: Vec<u8>,
            expected_version: Option<&str>,
        ) -> crate::storage::StoreResult<String> {
            if self.meddles.load(Ordering::SeqCst) > 0 {
                self.meddles.fetch_sub(1, Ordering::SeqCst);
                let current = self.inner.read(name).await?;
                let version = current.as_ref().map(|b| b.version.clone());
                let mut doc: GalleryDocument = current
                    .map(|b| serde_json::from_slice(&b.bytes).unwrap())
                    .unwrap_or_default();
                *doc.votes.entry("meddled".into()).or_insert(0) += 1;
                self.inner
                    .write(name, serde_json::to_vec(&doc).unwrap(), version.as_deref())
                    .await?;
            }
            self.inner.write(name, bytes, expected_version).await
        }
    }

    #[tokio::test]
    async fn conflicting_writes_are_replayed() {
        let meddler = Meddler {
            inner: MemoryStore::default(),
            meddles: AtomicUsize::new(1),
        };
        let db = Database::new(Arc::new(meddler), "db.json");
        assert_eq!(db.vote("x", 4).await.unwrap(), 4);
        let doc = db.load().await.unwrap();
        assert_eq!(doc.votes_for("x"), 4);
        assert_eq!(doc.votes_for("meddled"), 1);
    }

    #[tokio::test]
    async fn gives_up_after_repeated_conflicts() {
        let meddler = Meddler {
            inner: MemoryStore::default(),
            meddles: AtomicUsize::new(MAX_ATTEMPTS),
        };
        let db = Database::new(Arc::new(meddler), "db.json");
        assert!(db.vote("x", 4).await.is_err());
    }
}
