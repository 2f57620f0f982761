//! The document Q&A service: one value wiring every pipeline stage together.
//!
//! Both the HTTP server and the CLI drive the pipeline through [`RagService`].

use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::extract::DocumentFormat;
use crate::generate::{create_synthesizer, AnswerRequest, Synthesizer};
use crate::ingest::{IngestOptions, Ingestor};
use crate::models::{Document, ExtractPreview, IngestSummary, ScoredChunk};
use crate::registry::CollectionRegistry;
use crate::retrieve::ContextAssembler;
use crate::store::{create_store, VectorStore};

/// Result of answering one question.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub collection_id: String,
    pub sources: Vec<ScoredChunk>,
}

pub struct RagService {
    registry: Arc<CollectionRegistry>,
    ingestor: Ingestor,
    assembler: ContextAssembler,
    synthesizer: Arc<dyn Synthesizer>,
}

impl RagService {
    /// Build every component from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = create_store(&config.store)?;
        let embedder = create_provider(&config.embedding)?;
        let synthesizer = create_synthesizer(&config.generation, &config.retrieval)?;
        Self::with_components(config, store, embedder, synthesizer)
    }

    /// Build with explicit backends; configuration supplies everything else.
    pub fn with_components(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Result<Self> {
        let registry = Arc::new(CollectionRegistry::new(
            store.clone(),
            config.store.max_name_attempts,
            config.server.max_sessions,
        ));
        let ingestor = Ingestor::new(config, registry.clone(), embedder.clone())?;
        let assembler = ContextAssembler::new(&config.retrieval, store, embedder.clone());

        info!(
            store = %config.store.provider,
            embedder = embedder.model_name(),
            synthesizer = synthesizer.name(),
            "service ready"
        );

        Ok(Self {
            registry,
            ingestor,
            assembler,
            synthesizer,
        })
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub async fn ingest(&self, doc: Document, options: &IngestOptions) -> Result<IngestSummary> {
        self.ingestor.ingest(doc, options).await
    }

    /// Answer `text` against an explicit collection, or the session's active one.
    pub async fn query(
        &self,
        text: &str,
        collection_id: Option<&str>,
        session: &str,
    ) -> Result<Answer> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::validation("Missing user input"));
        }

        let collection = match collection_id.map(str::trim).filter(|c| !c.is_empty()) {
            Some(name) => self.registry.resolve(name).await?,
            None => self.registry.get_active(session)?,
        };

        let retrieved = self.assembler.retrieve(&collection, text).await?;
        let answer = self
            .synthesizer
            .answer(AnswerRequest {
                query: text,
                context: &retrieved.context,
                document: retrieved.document.as_deref(),
            })
            .await?;

        info!(
            collection = %collection.name,
            session,
            matches = retrieved.chunks.len(),
            "query answered"
        );

        Ok(Answer {
            text: answer,
            collection_id: collection.name,
            sources: retrieved.chunks,
        })
    }

    /// Sentence preview of a PDF; never touches the registry.
    pub async fn extract_only(&self, doc: Document) -> Result<ExtractPreview> {
        if DocumentFormat::from_filename(&doc.filename) != Some(DocumentFormat::Pdf) {
            return Err(RagError::validation("Only PDF files are supported"));
        }
        self.ingestor.preview(doc).await
    }

    /// Sentence preview of any supported document.
    pub async fn preview(&self, doc: Document) -> Result<ExtractPreview> {
        self.ingestor.preview(doc).await
    }
}
