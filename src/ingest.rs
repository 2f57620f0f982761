//! Ingestion pipeline orchestration.
//!
//! Coordinates one upload end to end: validation → page extraction →
//! cleaning → chunking → collection allocation → batched embed-and-write →
//! activation. CPU-bound stages run on the blocking pool. The session's
//! active pointer only moves after every batch is written; a failure after
//! allocating a fresh collection discards it.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::{make_chunk, Chunker};
use crate::clean::Cleaner;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::{extract_pages, DocumentFormat};
use crate::models::{Chunk, ChunkRecord, CollectionHandle, Document, ExtractPreview, IngestSummary};
use crate::registry::CollectionRegistry;
use crate::store::CollectionLookup;

/// Longest accepted `file_id`.
const MAX_FILE_ID_LEN: usize = 40;

/// Where the chunks of an upload go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Always allocate a new collection.
    #[default]
    Fresh,
    /// Add to the session's active collection, allocating one if needed.
    Append,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub session: String,
    pub file_id: Option<String>,
    pub mode: IngestMode,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            session: crate::registry::DEFAULT_SESSION.to_string(),
            file_id: None,
            mode: IngestMode::Fresh,
        }
    }
}

/// Cleaned, chunked pages of one document, not yet stored.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub pages: usize,
    /// Sequence numbers start at 0.
    pub chunks: Vec<Chunk>,
}

pub struct Ingestor {
    cleaner: Arc<Cleaner>,
    chunker: Chunker,
    registry: Arc<CollectionRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_upload_bytes: usize,
    allowed_extensions: Vec<String>,
    base_name: String,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        registry: Arc<CollectionRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let cleaner = Cleaner::new(&config.cleaning)
            .map_err(|e| RagError::Config(format!("invalid boilerplate pattern: {}", e)))?;
        let chunker =
            Chunker::from_config(&config.chunking).map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            cleaner: Arc::new(cleaner),
            chunker,
            registry,
            embedder,
            max_upload_bytes: config.server.max_upload_bytes,
            allowed_extensions: config
                .server
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            base_name: config.store.base_name.clone(),
            batch_size: config.store.batch_size.max(1),
        })
    }

    /// Check name, extension, and size; returns the parsed format.
    pub fn validate(&self, doc: &Document) -> Result<DocumentFormat> {
        if doc.filename.trim().is_empty() {
            return Err(RagError::validation("No file selected"));
        }

        let extension = DocumentFormat::extension(&doc.filename).unwrap_or_default();
        if !self.allowed_extensions.contains(&extension) {
            return Err(RagError::validation(format!(
                "File type not allowed. Allowed types: {}",
                self.allowed_extensions.join(", ")
            )));
        }
        let format = DocumentFormat::from_filename(&doc.filename).ok_or_else(|| {
            RagError::validation(format!("Unsupported file type: {}", extension))
        })?;

        if doc.bytes.is_empty() {
            return Err(RagError::validation("Uploaded file is empty"));
        }
        if doc.bytes.len() > self.max_upload_bytes {
            return Err(RagError::validation(format!(
                "File too large: {} bytes (limit {})",
                doc.bytes.len(),
                self.max_upload_bytes
            )));
        }

        Ok(format)
    }

    /// Extract, clean, and chunk on the blocking pool.
    pub async fn prepare(&self, doc: Document, format: DocumentFormat) -> Result<PreparedDocument> {
        let cleaner = self.cleaner.clone();
        let chunker = self.chunker.clone();
        let document_id = Uuid::new_v4().to_string();

        tokio::task::spawn_blocking(move || {
            prepare_document(&doc, format, &cleaner, &chunker, &document_id)
        })
        .await?
    }

    /// Run the full pipeline for one upload.
    pub async fn ingest(&self, doc: Document, options: &IngestOptions) -> Result<IngestSummary> {
        let format = self.validate(&doc)?;
        let base = self.base_name_for(options.file_id.as_deref())?;
        let filename = doc.filename.clone();

        let prepared = self.prepare(doc, format).await?;
        if prepared.chunks.is_empty() {
            warn!(filename = %filename, "no text survived cleaning");
            return Err(RagError::EmptyDocument(filename));
        }

        let (collection, created) = match options.mode {
            IngestMode::Fresh => (self.registry.create_collection(&base).await?, true),
            IngestMode::Append => {
                match self
                    .registry
                    .get_or_create_active(&options.session, &base)
                    .await?
                {
                    CollectionLookup::Found(h) => (h, false),
                    CollectionLookup::Created(h) => (h, true),
                }
            }
        };

        // Held until the pointer moves, so appenders see each other's counts.
        let _writes = self.registry.lock_writes(&collection).await;
        let store = self.registry.store();
        let offset = if created {
            0
        } else {
            store.count(&collection).await? as u64
        };

        let mut written = Vec::new();
        let result = self
            .persist(&collection, &prepared.chunks, offset, &mut written)
            .await;
        if let Err(e) = result {
            if created {
                warn!(collection = %collection.name, error = %e, "ingestion failed, discarding collection");
                self.registry.discard(&collection).await;
            } else if !written.is_empty() {
                warn!(
                    collection = %collection.name,
                    records = written.len(),
                    error = %e,
                    "append failed, removing partial batches"
                );
                if let Err(rollback) = store.remove(&collection, &written).await {
                    warn!(collection = %collection.name, error = %rollback, "failed to remove partial batches");
                }
            }
            return Err(e);
        }

        let previous = self
            .registry
            .set_active(&options.session, collection.clone());
        info!(
            filename = %filename,
            collection = %collection.name,
            session = %options.session,
            pages = prepared.pages,
            chunks = prepared.chunks.len(),
            replaced = previous.is_some(),
            "document ingested"
        );

        Ok(IngestSummary {
            documents_processed: prepared.chunks.len(),
            collection_id: collection.name,
            filename,
            pages: prepared.pages,
            document: prepared
                .chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        })
    }

    /// Sentences of a document, without touching the registry or the store.
    pub async fn preview(&self, doc: Document) -> Result<ExtractPreview> {
        let format = self.validate(&doc)?;
        let prepared = self.prepare(doc, format).await?;
        let sentences: Vec<String> = prepared.chunks.into_iter().map(|c| c.text).collect();

        Ok(ExtractPreview {
            success: true,
            sentence_count: sentences.len(),
            sentences,
        })
    }

    fn base_name_for(&self, file_id: Option<&str>) -> Result<String> {
        let Some(id) = file_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return Ok(self.base_name.clone());
        };
        let valid = id.len() <= MAX_FILE_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RagError::validation(format!(
                "Invalid file_id '{}': use up to {} letters, digits, '-' or '_'",
                id, MAX_FILE_ID_LEN
            )));
        }
        Ok(format!("doc_{}", id))
    }

    /// Embed and write chunks in batches, numbering them from `offset`. Ids of
    /// every record the store accepted are pushed to `written`.
    async fn persist(
        &self,
        collection: &CollectionHandle,
        chunks: &[Chunk],
        offset: u64,
        written: &mut Vec<String>,
    ) -> Result<()> {
        let store = self.registry.store();
        for batch in chunks.chunks(self.batch_size) {
            let records: Vec<ChunkRecord> = batch
                .iter()
                .map(|chunk| {
                    let mut chunk = chunk.clone();
                    chunk.metadata.sequence += offset;
                    ChunkRecord {
                        id: Uuid::new_v4().to_string(),
                        chunk,
                    }
                })
                .collect();

            let texts: Vec<String> = records.iter().map(|r| r.chunk.text.clone()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            if embeddings.len() != records.len() {
                return Err(RagError::embedding(format!(
                    "expected {} embeddings, got {}",
                    records.len(),
                    embeddings.len()
                )));
            }

            store.add(collection, &records, &embeddings).await?;
            written.extend(records.into_iter().map(|r| r.id));
        }

        Ok(())
    }
}

/// Extract pages, then clean and chunk each page. Pages that clean to
/// nothing are skipped; sequence numbers run across pages.
pub fn prepare_document(
    doc: &Document,
    format: DocumentFormat,
    cleaner: &Cleaner,
    chunker: &Chunker,
    document_id: &str,
) -> Result<PreparedDocument> {
    let pages = extract_pages(&doc.bytes, format)?;

    let mut chunks = Vec::new();
    let mut sequence = 0u64;
    for page in &pages {
        let cleaned = cleaner.clean(&page.text);
        for sentence in chunker.split(&cleaned) {
            chunks.push(make_chunk(
                document_id,
                &doc.filename,
                page.number,
                sequence,
                &sentence,
            ));
            sequence += 1;
        }
    }

    Ok(PreparedDocument {
        pages: pages.len(),
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedProvider;
    use crate::store::memory::MemoryStore;
    use crate::store::VectorStore;

    fn ingestor(config: &Config) -> (Ingestor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(CollectionRegistry::new(store.clone(), 5, 16));
        let ingestor = Ingestor::new(config, registry, Arc::new(HashedProvider::new(64))).unwrap();
        (ingestor, store)
    }

    #[test]
    fn prepare_numbers_pages_and_sequences() {
        let config = Config::default();
        let cleaner = Cleaner::new(&config.cleaning).unwrap();
        let chunker = Chunker::from_config(&config.chunking).unwrap();
        let doc = Document::new("a.txt", "One. Two.\x0cThree.");

        let prepared =
            prepare_document(&doc, DocumentFormat::PlainText, &cleaner, &chunker, "d").unwrap();
        assert_eq!(prepared.pages, 2);
        let seen: Vec<(u32, u64, &str)> = prepared
            .chunks
            .iter()
            .map(|c| (c.metadata.page_number, c.metadata.sequence, c.text.as_str()))
            .collect();
        assert_eq!(seen, vec![(1, 0, "one."), (1, 1, "two."), (2, 2, "three.")]);
    }

    #[test]
    fn validation_rejects_bad_uploads() {
        let (ingestor, _) = ingestor(&Config::default());
        let cases = [
            Document::new("", "x"),
            Document::new("setup.exe", "x"),
            Document::new("notes", "x"),
            Document::new("notes.txt", Vec::new()),
        ];
        for doc in cases {
            assert!(matches!(ingestor.validate(&doc), Err(RagError::Validation(_))));
        }
    }

    #[test]
    fn validation_enforces_size_limit() {
        let mut config = Config::default();
        config.server.max_upload_bytes = 4;
        let (ingestor, _) = ingestor(&config);
        assert!(ingestor.validate(&Document::new("a.txt", "abcd")).is_ok());
        assert!(matches!(
            ingestor.validate(&Document::new("a.txt", "abcde")),
            Err(RagError::Validation(_))
        ));
    }

    #[test]
    fn file_id_builds_base_name() {
        let (ingestor, _) = ingestor(&Config::default());
        assert_eq!(ingestor.base_name_for(None).unwrap(), "documents");
        assert_eq!(ingestor.base_name_for(Some("42")).unwrap(), "doc_42");
        assert!(ingestor.base_name_for(Some("../etc")).is_err());
    }

    #[tokio::test]
    async fn empty_document_creates_nothing() {
        let (ingestor, store) = ingestor(&Config::default());
        let err = ingestor
            .ingest(Document::new("blank.txt", "$$$ ###"), &IngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyDocument(_)));
        assert!(store.collection_names().is_empty());
    }

    #[tokio::test]
    async fn small_batches_write_everything() {
        let mut config = Config::default();
        config.store.batch_size = 2;
        let (ingestor, store) = ingestor(&config);
        let summary = ingestor
            .ingest(
                Document::new("a.txt", "One. Two. Three. Four. Five."),
                &IngestOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.documents_processed, 5);
        let handle = CollectionHandle {
            name: summary.collection_id.clone(),
            id: summary.collection_id,
        };
        assert_eq!(store.count(&handle).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn append_continues_sequences() {
        let (ingestor, store) = ingestor(&Config::default());
        let options = IngestOptions {
            mode: IngestMode::Append,
            ..IngestOptions::default()
        };
        let first = ingestor
            .ingest(Document::new("a.txt", "One. Two."), &options)
            .await
            .unwrap();
        let second = ingestor
            .ingest(Document::new("b.txt", "Three."), &options)
            .await
            .unwrap();
        assert_eq!(first.collection_id, second.collection_id);

        let handle = CollectionHandle {
            name: first.collection_id.clone(),
            id: first.collection_id,
        };
        let all = store.get_all(&handle).await.unwrap();
        let seqs: Vec<u64> = all.iter().map(|r| r.chunk.metadata.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(all[2].chunk.metadata.filename, "b.txt");
    }

    #[tokio::test]
    async fn preview_stores_nothing() {
        let (ingestor, store) = ingestor(&Config::default());
        let preview = ingestor
            .preview(Document::new("a.txt", "One. Two."))
            .await
            .unwrap();
        assert!(preview.success);
        assert_eq!(preview.sentences, vec!["one.", "two."]);
        assert_eq!(preview.sentence_count, 2);
        assert!(store.collection_names().is_empty());
    }
}
