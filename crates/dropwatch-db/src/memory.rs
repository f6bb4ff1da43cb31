//! In-memory update store for tests and dry runs.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Similarity search is
//! brute-force cosine similarity over every stored embedding. The
//! `(source_message_link, update_key)` uniqueness rule matches the table
//! constraint, so idempotency behaves as it does against Postgres.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use uuid::Uuid;

use dropwatch_core::{
    defaults, Error, NewUpdate, Result, SaveOutcome, SimilarUpdate, SimilaritySearch,
    StoredUpdate, UpdateRepository,
};

/// A row held by [`MemoryUpdateStore`].
#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub id: Uuid,
    pub update: NewUpdate,
    pub processed_at: DateTime<Utc>,
}

impl MemoryRow {
    fn to_stored(&self) -> StoredUpdate {
        StoredUpdate {
            id: self.id,
            project_name: self.update.project_name.clone(),
            activity_type: self.update.activity_type.clone(),
            summary: self.update.summary.clone(),
            key_links: self.update.key_links.clone(),
            source_message_link: self.update.source_message_link.clone(),
            message_timestamp: self.update.message_timestamp,
            processed_at: self.processed_at,
            embedding: self.update.embedding.clone(),
        }
    }
}

/// In-memory implementation of the update repository and similarity search.
#[derive(Default)]
pub struct MemoryUpdateStore {
    rows: RwLock<Vec<MemoryRow>>,
    fail_saves: AtomicBool,
    fail_search: AtomicBool,
}

impl MemoryUpdateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail with a database error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `find_similar` fail.
    pub fn set_fail_search(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all rows in insertion order.
    pub fn rows(&self) -> Vec<MemoryRow> {
        self.rows.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a row with an explicit processing time.
    pub fn insert_at(&self, update: NewUpdate, processed_at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::now_v7();
        self.write()?.push(MemoryRow {
            id,
            update,
            processed_at,
        });
        Ok(id)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<MemoryRow>>> {
        self.rows
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<MemoryRow>>> {
        self.rows
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }
}

/// Cosine similarity computed in f64.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if mag_a < f64::EPSILON || mag_b < f64::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl UpdateRepository for MemoryUpdateStore {
    async fn save(&self, update: &NewUpdate) -> Result<SaveOutcome> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        let mut rows = self.write()?;
        let exists = rows.iter().any(|r| {
            r.update.source_message_link == update.source_message_link
                && r.update.update_key == update.update_key
        });
        if exists {
            return Ok(SaveOutcome::AlreadyExists);
        }
        let id = Uuid::now_v7();
        rows.push(MemoryRow {
            id,
            update: update.clone(),
            processed_at: Utc::now(),
        });
        Ok(SaveOutcome::Saved(id))
    }

    async fn count_for_link(&self, link: &str) -> Result<i64> {
        let rows = self.read()?;
        Ok(rows
            .iter()
            .filter(|r| r.update.source_message_link == link)
            .count() as i64)
    }

    async fn list_missing_embeddings(
        &self,
        project_name: Option<&str>,
        after_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<StoredUpdate>> {
        let rows = self.read()?;
        let mut matching: Vec<StoredUpdate> = rows
            .iter()
            .filter(|r| r.update.embedding.is_none())
            .filter(|r| project_name.map_or(true, |p| r.update.project_name.as_deref() == Some(p)))
            .filter(|r| after_id.map_or(true, |after| r.id > after))
            .map(MemoryRow::to_stored)
            .collect();
        matching.sort_by_key(|s| s.id);
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn set_embedding(&self, id: Uuid, embedding: &Vector) -> Result<()> {
        let mut rows = self.write()?;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(format!("update {}", id)))?;
        row.update.embedding = Some(embedding.clone());
        Ok(())
    }

    async fn list_with_embeddings(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredUpdate>> {
        let rows = self.read()?;
        let mut matching: Vec<&MemoryRow> = rows
            .iter()
            .filter(|r| r.update.embedding.is_some())
            .filter(|r| since.map_or(true, |s| r.processed_at >= s))
            .collect();
        matching.sort_by(|a, b| {
            b.processed_at
                .cmp(&a.processed_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(MemoryRow::to_stored)
            .collect())
    }
}

#[async_trait]
impl SimilaritySearch for MemoryUpdateStore {
    async fn find_similar(
        &self,
        query: &Vector,
        threshold: f64,
        limit: i64,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<SimilarUpdate>> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        let rows = self.read()?;
        let query = query.as_slice();
        let mut matches: Vec<SimilarUpdate> = rows
            .iter()
            .filter(|r| Some(r.id) != exclude_id)
            .filter_map(|r| {
                let stored = r.update.embedding.as_ref()?;
                let similarity = cosine_similarity(query, stored.as_slice());
                (similarity + defaults::SIMILARITY_EPSILON >= threshold).then(|| SimilarUpdate {
                    id: r.id,
                    similarity,
                    project_name: r.update.project_name.clone(),
                    activity_type: r.update.activity_type.clone(),
                    summary: r.update.summary.clone(),
                    source_message_link: r.update.source_message_link.clone(),
                })
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }
}
