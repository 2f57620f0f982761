//! Core data models used throughout docqa.
//!
//! These types represent the documents, pages, chunks, and collection handles
//! that flow through the ingestion and query pipelines.

use serde::{Deserialize, Serialize};

/// An uploaded document. Lives only for the duration of one ingestion call.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// One page of extracted text. `number` is 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

/// Metadata carried by every chunk into the vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Identifier of the ingestion run (one per uploaded document).
    pub document_id: String,
    pub filename: String,
    pub page_number: u32,
    /// Position within the document; monotonic across pages, never reused.
    pub sequence: u64,
    /// SHA-256 of the chunk text.
    pub hash: String,
}

/// An immutable span of cleaned text; the unit actually indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk plus its store-assigned identifier.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub chunk: Chunk,
}

/// Store-level identity of a collection.
///
/// Returned by ingestion and accepted by queries, so callers can address a
/// collection explicitly instead of relying on the session's active pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionHandle {
    pub name: String,
    /// Backend identifier (Chroma's collection UUID; equal to `name` in memory).
    pub id: String,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    /// Higher is more similar.
    pub similarity: f32,
    pub metadata: Option<ChunkMetadata>,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub documents_processed: usize,
    pub collection_id: String,
    pub filename: String,
    pub pages: usize,
    /// All chunk texts joined with single spaces.
    pub document: String,
}

/// Sentences extracted from a document without persisting them.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractPreview {
    pub success: bool,
    pub sentences: Vec<String>,
    pub sentence_count: usize,
}
