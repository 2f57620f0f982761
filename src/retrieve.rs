//! Top-K retrieval and context assembly.
//!
//! Embeds the query, asks the store for the `k = min(top_k, count)` nearest
//! chunks, and joins their texts (most similar first) into one context string
//! bounded to `max_context_chars`. An empty collection short-circuits to an
//! empty context without calling the embedder.

use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::Result;
use crate::models::{CollectionHandle, ScoredChunk};
use crate::store::VectorStore;

#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// Matches in descending similarity.
    pub chunks: Vec<ScoredChunk>,
    pub context: String,
    /// Whole-collection text, when enabled.
    pub document: Option<String>,
}

impl RetrievedContext {
    fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            context: String::new(),
            document: None,
        }
    }
}

pub struct ContextAssembler {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
    separator: String,
    max_context_chars: usize,
    include_document: bool,
}

impl ContextAssembler {
    pub fn new(
        config: &RetrievalConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            embedder,
            top_k: config.top_k.max(1),
            separator: config.separator.clone(),
            max_context_chars: config.max_context_chars,
            include_document: config.include_document,
        }
    }

    pub async fn retrieve(
        &self,
        collection: &CollectionHandle,
        query: &str,
    ) -> Result<RetrievedContext> {
        let count = self.store.count(collection).await?;
        if count == 0 {
            debug!(collection = %collection.name, "empty collection, no context");
            return Ok(RetrievedContext::empty());
        }

        let k = self.top_k.min(count);
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let mut chunks = self.store.query(collection, &vector, k).await?;
        chunks.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        chunks.truncate(k);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let context = join_bounded(&texts, &self.separator, self.max_context_chars);

        let document = if self.include_document {
            let records = self.store.get_all(collection).await?;
            Some(
                records
                    .iter()
                    .map(|r| r.chunk.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        } else {
            None
        };

        debug!(
            collection = %collection.name,
            k,
            context_chars = context.chars().count(),
            "context assembled"
        );

        Ok(RetrievedContext {
            chunks,
            context,
            document,
        })
    }
}

/// Join `texts` with `separator`, stopping before the first text that would
/// push the result past `max_chars` characters. The first text is always
/// kept, truncated on a char boundary if it alone is too long.
pub fn join_bounded(texts: &[&str], separator: &str, max_chars: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    let sep_chars = separator.chars().count();

    for (i, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        if i == 0 {
            if len > max_chars {
                return truncate_chars(text, max_chars).to_string();
            }
            out.push_str(text);
            used = len;
            continue;
        }
        if used + sep_chars + len > max_chars {
            break;
        }
        out.push_str(separator);
        out.push_str(text);
        used += sep_chars + len;
    }

    out
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
