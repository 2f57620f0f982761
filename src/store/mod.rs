//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers everything the pipeline needs from a
//! backend: explicit create-if-absent, batched writes and their rollback,
//! similarity queries, counting, full reads, and deletion. Two backends ship:
//!
//! - [`memory::MemoryStore`]: in-process, brute-force cosine similarity.
//! - [`chroma::ChromaStore`]: Chroma's v2 REST API.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod chroma;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::{RagError, Result};
use crate::models::{ChunkRecord, CollectionHandle, ScoredChunk};

/// Outcome of [`VectorStore::create_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionLookup {
    /// The name was already taken; nothing was created.
    Found(CollectionHandle),
    Created(CollectionHandle),
}

impl CollectionLookup {
    pub fn handle(&self) -> &CollectionHandle {
        match self {
            CollectionLookup::Found(h) | CollectionLookup::Created(h) => h,
        }
    }

    pub fn into_handle(self) -> CollectionHandle {
        match self {
            CollectionLookup::Found(h) | CollectionLookup::Created(h) => h,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CollectionLookup::Created(_))
    }
}

/// Abstract vector store backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_if_absent`](VectorStore::create_if_absent) | Create a collection unless the name exists |
/// | [`lookup`](VectorStore::lookup) | Resolve a collection by name |
/// | [`add`](VectorStore::add) | Write records with their embeddings |
/// | [`remove`](VectorStore::remove) | Delete records by id |
/// | [`query`](VectorStore::query) | Nearest neighbours, most similar first |
/// | [`count`](VectorStore::count) | Number of stored records |
/// | [`get_all`](VectorStore::get_all) | Every record, ordered by sequence |
/// | [`delete`](VectorStore::delete) | Drop a collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_if_absent(&self, name: &str) -> Result<CollectionLookup>;

    async fn lookup(&self, name: &str) -> Result<Option<CollectionHandle>>;

    /// `records` and `embeddings` are parallel slices.
    async fn add(
        &self,
        collection: &CollectionHandle,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<()>;

    /// Delete the records with the given ids. Unknown ids are ignored.
    async fn remove(&self, collection: &CollectionHandle, ids: &[String]) -> Result<()>;

    /// Up to `k` results sorted by descending similarity.
    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    async fn count(&self, collection: &CollectionHandle) -> Result<usize>;

    async fn get_all(&self, collection: &CollectionHandle) -> Result<Vec<ChunkRecord>>;

    /// Deleting a missing collection is not an error.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Instantiate the backend named by `config.provider`.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryStore::new())),
        "chroma" => Ok(Arc::new(chroma::ChromaStore::new(config)?)),
        other => Err(RagError::Config(format!("unknown store provider: {}", other))),
    }
}

pub(crate) fn check_parallel(records: &[ChunkRecord], embeddings: &[Vec<f32>]) -> Result<()> {
    if records.len() != embeddings.len() {
        return Err(RagError::storage(format!(
            "{} records but {} embeddings",
            records.len(),
            embeddings.len()
        )));
    }
    Ok(())
}
