//! In-memory [`VectorStore`] for local runs and tests.
//!
//! Collections live in a `HashMap` behind a `parking_lot::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::{check_parallel, CollectionLookup, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{ChunkRecord, CollectionHandle, ScoredChunk};

struct StoredRecord {
    record: ChunkRecord,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Collection {
    records: Vec<StoredRecord>,
    ids: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn missing(collection: &CollectionHandle) -> RagError {
    RagError::storage(format!("collection '{}' does not exist", collection.name))
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn create_if_absent(&self, name: &str) -> Result<CollectionLookup> {
        let handle = CollectionHandle {
            name: name.to_string(),
            id: name.to_string(),
        };
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Ok(CollectionLookup::Found(handle));
        }
        collections.insert(name.to_string(), Collection::default());
        Ok(CollectionLookup::Created(handle))
    }

    async fn lookup(&self, name: &str) -> Result<Option<CollectionHandle>> {
        Ok(self
            .collections
            .read()
            .contains_key(name)
            .then(|| CollectionHandle {
                name: name.to_string(),
                id: name.to_string(),
            }))
    }

    async fn add(
        &self,
        collection: &CollectionHandle,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        check_parallel(records, embeddings)?;

        let mut collections = self.collections.write();
        let stored = collections
            .get_mut(&collection.name)
            .ok_or_else(|| missing(collection))?;

        // Reject the whole batch before writing any of it.
        let mut batch_ids = HashSet::new();
        for record in records {
            if stored.ids.contains(&record.id) || !batch_ids.insert(record.id.as_str()) {
                return Err(RagError::storage(format!(
                    "duplicate record id '{}' in collection '{}'",
                    record.id, collection.name
                )));
            }
        }

        for (record, vector) in records.iter().zip(embeddings) {
            stored.ids.insert(record.id.clone());
            stored.records.push(StoredRecord {
                record: record.clone(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn remove(&self, collection: &CollectionHandle, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write();
        let stored = collections
            .get_mut(&collection.name)
            .ok_or_else(|| missing(collection))?;
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        stored
            .records
            .retain(|r| !doomed.contains(r.record.id.as_str()));
        for id in ids {
            stored.ids.remove(id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let collections = self.collections.read();
        let stored = collections
            .get(&collection.name)
            .ok_or_else(|| missing(collection))?;

        let mut scored: Vec<ScoredChunk> = stored
            .records
            .iter()
            .map(|r| ScoredChunk {
                id: r.record.id.clone(),
                text: r.record.chunk.text.clone(),
                similarity: cosine_similarity(vector, &r.vector),
                metadata: Some(r.record.chunk.metadata.clone()),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        self.collections
            .read()
            .get(&collection.name)
            .map(|c| c.records.len())
            .ok_or_else(|| missing(collection))
    }

    async fn get_all(&self, collection: &CollectionHandle) -> Result<Vec<ChunkRecord>> {
        let collections = self.collections.read();
        let stored = collections
            .get(&collection.name)
            .ok_or_else(|| missing(collection))?;

        let mut records: Vec<ChunkRecord> =
            stored.records.iter().map(|r| r.record.clone()).collect();
        records.sort_by_key(|r| r.chunk.metadata.sequence);
        Ok(records)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.collections.write().remove(name);
        Ok(())
    }
}
