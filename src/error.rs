//! Error taxonomy for the ingestion and query pipelines.
//!
//! Every pipeline stage reports failures as a [`RagError`] variant. The HTTP
//! layer maps variants onto status codes via [`RagError::status_code`] and
//! [`RagError::code`]; nothing below the boundary knows about HTTP.

use thiserror::Error;

/// Result alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// Empty, oversized, or disallowed upload.
    #[error("{0}")]
    Validation(String),

    /// The bytes could not be parsed as the declared format, or yielded no pages.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Extraction worked but produced no chunks.
    #[error("no valid text content could be extracted from '{0}'")]
    EmptyDocument(String),

    /// Collection create, write, or read failure in the vector store.
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Query issued before any successful ingestion, or against an unknown collection.
    #[error("{0}")]
    NoActiveCollection(String),

    /// Generation endpoint failure (including timeouts).
    #[error("generation failed: {0}")]
    RemoteGeneration(String),

    /// Invalid settings detected while wiring the pipeline.
    #[error("configuration error: {0}")]
    Config(String),

    /// A blocking worker task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::RemoteGeneration(message.into())
    }

    /// Machine-readable error code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "validation_error",
            RagError::Extraction(_) => "extraction_error",
            RagError::EmptyDocument(_) => "empty_document",
            RagError::Storage(_) => "storage_error",
            RagError::Embedding(_) => "embedding_error",
            RagError::NoActiveCollection(_) => "no_active_collection",
            RagError::RemoteGeneration(_) => "generation_error",
            RagError::Config(_) => "config_error",
            RagError::Internal(_) => "internal",
        }
    }

    /// HTTP status code for this failure.
    ///
    /// Client-side problems (bad upload, unreadable document, nothing indexed yet)
    /// are 4xx; store and model failures are 5xx.
    pub fn status_code(&self) -> u16 {
        match self {
            RagError::Validation(_)
            | RagError::Extraction(_)
            | RagError::EmptyDocument(_)
            | RagError::NoActiveCollection(_) => 400,
            RagError::Embedding(_) | RagError::RemoteGeneration(_) => 502,
            RagError::Storage(_) | RagError::Config(_) | RagError::Internal(_) => 500,
        }
    }

    /// True when the failure is attributable to the client's input.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<tokio::task::JoinError> for RagError {
    fn from(err: tokio::task::JoinError) -> Self {
        RagError::Internal(format!("worker task failed: {}", err))
    }
}
