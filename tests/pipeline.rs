//! End-to-end pipeline scenarios run in process against the in-memory store,
//! the hashed embedder, and the extractive synthesizer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use docqa::config::Config;
use docqa::embedding::HashedProvider;
use docqa::error::{RagError, Result};
use docqa::generate::{ExtractiveSynthesizer, NO_CONTEXT_ANSWER};
use docqa::ingest::{IngestMode, IngestOptions};
use docqa::models::{ChunkRecord, CollectionHandle, Document, ScoredChunk};
use docqa::registry::DEFAULT_SESSION;
use docqa::service::RagService;
use docqa::store::memory::MemoryStore;
use docqa::store::{CollectionLookup, VectorStore};

fn service_with(store: Arc<dyn VectorStore>) -> RagService {
    RagService::with_components(
        &Config::default(),
        store,
        Arc::new(HashedProvider::new(1024)),
        Arc::new(ExtractiveSynthesizer),
    )
    .unwrap()
}

fn service_with_batches(store: Arc<dyn VectorStore>, batch_size: usize) -> RagService {
    let mut config = Config::default();
    config.store.batch_size = batch_size;
    RagService::with_components(
        &config,
        store,
        Arc::new(HashedProvider::new(1024)),
        Arc::new(ExtractiveSynthesizer),
    )
    .unwrap()
}

fn append() -> IngestOptions {
    IngestOptions {
        mode: IngestMode::Append,
        ..IngestOptions::default()
    }
}

fn txt(name: &str, body: &str) -> Document {
    Document::new(name, body.as_bytes().to_vec())
}

fn session(name: &str) -> IngestOptions {
    IngestOptions {
        session: name.to_string(),
        ..IngestOptions::default()
    }
}

#[tokio::test]
async fn upload_then_ask_returns_matching_sentence_first() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone());

    let summary = service
        .ingest(
            txt("facts.txt", "The sky is blue. Water boils at 100 degrees."),
            &IngestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(summary.documents_processed, 2);
    assert_eq!(summary.filename, "facts.txt");
    assert_eq!(summary.pages, 1);
    assert_eq!(
        summary.document,
        "the sky is blue. water boils at 100 degrees."
    );
    assert!(summary.collection_id.starts_with("documents_"));
    assert_eq!(store.collection_names(), vec![summary.collection_id.clone()]);

    let answer = service
        .query("boiling point", None, DEFAULT_SESSION)
        .await
        .unwrap();
    assert_eq!(answer.collection_id, summary.collection_id);
    assert_eq!(answer.sources[0].text, "water boils at 100 degrees.");
    assert!(answer.text.starts_with("water boils at 100 degrees."));
}

#[tokio::test]
async fn disallowed_extension_creates_nothing() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone());

    let err = service
        .ingest(txt("tool.exe", "MZ binary"), &IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert!(err.to_string().starts_with("File type not allowed"));
    assert!(store.collection_names().is_empty());
    assert!(service.registry().get_active(DEFAULT_SESSION).is_err());
}

#[tokio::test]
async fn query_before_upload_is_rejected() {
    let service = service_with(Arc::new(MemoryStore::new()));
    let err = service
        .query("anything?", None, DEFAULT_SESSION)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::NoActiveCollection(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(
        err.to_string(),
        "No documents available. Please upload a file first."
    );
}

#[tokio::test]
async fn blank_query_is_validation_error() {
    let service = service_with(Arc::new(MemoryStore::new()));
    service
        .ingest(txt("a.txt", "Some text here."), &IngestOptions::default())
        .await
        .unwrap();
    let err = service.query("   ", None, DEFAULT_SESSION).await.unwrap_err();
    assert_eq!(err.to_string(), "Missing user input");
}

#[tokio::test]
async fn document_without_text_is_empty_document_error() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone());
    let err = service
        .ingest(txt("blank.txt", "@@@ ### \n\t ~~~"), &IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::EmptyDocument(_)));
    assert!(store.collection_names().is_empty());
}

#[tokio::test]
async fn empty_active_collection_answers_without_context() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone());

    let handle = service
        .registry()
        .create_collection("documents")
        .await
        .unwrap();
    service.registry().set_active(DEFAULT_SESSION, handle);

    let answer = service
        .query("is there anything?", None, DEFAULT_SESSION)
        .await
        .unwrap();
    assert!(answer.sources.is_empty());
    assert_eq!(answer.text, NO_CONTEXT_ANSWER);
}

#[tokio::test]
async fn second_upload_replaces_active_collection() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone());

    let first = service
        .ingest(txt("one.txt", "Cats purr softly."), &IngestOptions::default())
        .await
        .unwrap();
    let second = service
        .ingest(txt("two.txt", "Rockets burn fuel."), &IngestOptions::default())
        .await
        .unwrap();
    assert_ne!(first.collection_id, second.collection_id);
    assert_eq!(store.collection_names().len(), 2);

    let answer = service.query("cats", None, DEFAULT_SESSION).await.unwrap();
    assert_eq!(answer.collection_id, second.collection_id);
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].text, "rockets burn fuel.");

    // The first collection stays addressable by name.
    let answer = service
        .query("cats", Some(&first.collection_id), DEFAULT_SESSION)
        .await
        .unwrap();
    assert_eq!(answer.sources[0].text, "cats purr softly.");
}

#[tokio::test]
async fn unknown_collection_name_is_rejected() {
    let service = service_with(Arc::new(MemoryStore::new()));
    let err = service
        .query("cats", Some("documents_0_deadbeef"), DEFAULT_SESSION)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::NoActiveCollection(_)));
}

#[tokio::test]
async fn append_mode_accumulates_into_one_collection() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone());
    let append = append();

    let first = service
        .ingest(txt("one.txt", "Cats purr softly."), &append)
        .await
        .unwrap();
    let second = service
        .ingest(txt("two.txt", "Rockets burn fuel."), &append)
        .await
        .unwrap();
    assert_eq!(first.collection_id, second.collection_id);

    let handle = service.registry().get_active(DEFAULT_SESSION).unwrap();
    let records = store.get_all(&handle).await.unwrap();
    let sequences: Vec<u64> = records.iter().map(|r| r.chunk.metadata.sequence).collect();
    assert_eq!(sequences, vec![0, 1]);
}

#[tokio::test]
async fn sessions_do_not_share_active_collections() {
    let service = service_with(Arc::new(MemoryStore::new()));

    let alice = service
        .ingest(txt("a.txt", "Alice likes tea."), &session("alice"))
        .await
        .unwrap();
    let bob = service
        .ingest(txt("b.txt", "Bob likes coffee."), &session("bob"))
        .await
        .unwrap();

    let answer = service.query("likes", None, "alice").await.unwrap();
    assert_eq!(answer.collection_id, alice.collection_id);
    let answer = service.query("likes", None, "bob").await.unwrap();
    assert_eq!(answer.collection_id, bob.collection_id);
    assert!(service.query("likes", None, "carol").await.is_err());
}

#[tokio::test]
async fn file_id_names_the_collection() {
    let service = service_with(Arc::new(MemoryStore::new()));
    let options = IngestOptions {
        file_id: Some("report-7".to_string()),
        ..IngestOptions::default()
    };
    let summary = service
        .ingest(txt("r.txt", "Quarterly numbers rose."), &options)
        .await
        .unwrap();
    assert!(summary.collection_id.starts_with("doc_report-7_"));
}

#[tokio::test]
async fn extract_only_accepts_pdf_names_only() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(store.clone());

    let err = service
        .extract_only(txt("notes.txt", "Plain text."))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));

    let preview = service
        .preview(txt("notes.txt", "First one. Second one!"))
        .await
        .unwrap();
    assert!(preview.success);
    assert_eq!(preview.sentences, vec!["first one.", "second one!"]);
    assert_eq!(preview.sentence_count, 2);
    assert!(store.collection_names().is_empty());
}

/// Memory store whose writes fail after a given number of successful batches.
/// Counts and writes yield to the scheduler first so concurrent ingestions
/// interleave.
struct FailingWrites {
    inner: MemoryStore,
    allowed: usize,
    adds: AtomicUsize,
    removes: AtomicUsize,
    deletes: AtomicUsize,
}

impl FailingWrites {
    fn new(allowed: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            allowed,
            adds: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FailingWrites {
    async fn create_if_absent(&self, name: &str) -> Result<CollectionLookup> {
        self.inner.create_if_absent(name).await
    }
    async fn lookup(&self, name: &str) -> Result<Option<CollectionHandle>> {
        self.inner.lookup(name).await
    }
    async fn add(
        &self,
        collection: &CollectionHandle,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        tokio::task::yield_now().await;
        if self.adds.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(RagError::storage("disk full"));
        }
        self.inner.add(collection, records, embeddings).await
    }
    async fn remove(&self, collection: &CollectionHandle, ids: &[String]) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(collection, ids).await
    }
    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.inner.query(collection, vector, k).await
    }
    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        tokio::task::yield_now().await;
        self.inner.count(collection).await
    }
    async fn get_all(&self, collection: &CollectionHandle) -> Result<Vec<ChunkRecord>> {
        self.inner.get_all(collection).await
    }
    async fn delete(&self, name: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(name).await
    }
}

#[tokio::test]
async fn failed_write_discards_collection_and_keeps_pointer() {
    let store = Arc::new(FailingWrites::new(1));
    let service = service_with(store.clone());

    let first = service
        .ingest(txt("ok.txt", "This upload succeeds."), &IngestOptions::default())
        .await
        .unwrap();

    let err = service
        .ingest(txt("bad.txt", "This upload fails."), &IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Storage(_)));
    assert_eq!(err.status_code(), 500);
    assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(store.inner.collection_names(), vec![first.collection_id.clone()]);

    let active = service.registry().get_active(DEFAULT_SESSION).unwrap();
    assert_eq!(active.name, first.collection_id);
}

#[tokio::test]
async fn failed_append_removes_its_partial_batches() {
    let store = Arc::new(FailingWrites::new(2));
    let service = service_with_batches(store.clone(), 1);

    let first = service
        .ingest(txt("one.txt", "Cats purr softly."), &append())
        .await
        .unwrap();

    // The first sentence lands, the second batch fails.
    let err = service
        .ingest(txt("two.txt", "Rockets burn fuel. Engines roar."), &append())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Storage(_)));
    assert_eq!(store.removes.load(Ordering::SeqCst), 1);
    assert_eq!(store.deletes.load(Ordering::SeqCst), 0);

    let active = service.registry().get_active(DEFAULT_SESSION).unwrap();
    assert_eq!(active.name, first.collection_id);
    let texts: Vec<String> = store
        .get_all(&active)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.chunk.text)
        .collect();
    assert_eq!(texts, vec!["cats purr softly."]);

    let answer = service.query("rockets", None, DEFAULT_SESSION).await.unwrap();
    assert!(answer.sources.iter().all(|s| s.text == "cats purr softly."));
}

#[tokio::test]
async fn concurrent_appends_get_distinct_sequences() {
    let store = Arc::new(FailingWrites::new(usize::MAX));
    let service = service_with_batches(store.clone(), 1);

    service
        .ingest(txt("one.txt", "Cats purr softly."), &append())
        .await
        .unwrap();

    let options = append();
    let (birds, rockets) = tokio::join!(
        service.ingest(txt("two.txt", "Birds sing. Fish swim."), &options),
        service.ingest(txt("three.txt", "Rockets burn fuel. Engines roar."), &options),
    );
    assert_eq!(birds.unwrap().collection_id, rockets.unwrap().collection_id);

    let active = service.registry().get_active(DEFAULT_SESSION).unwrap();
    let mut sequences: Vec<u64> = store
        .get_all(&active)
        .await
        .unwrap()
        .iter()
        .map(|r| r.chunk.metadata.sequence)
        .collect();
    sequences.sort_unstable();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
}
