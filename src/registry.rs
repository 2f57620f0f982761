//! Collection naming and per-session active collection pointers.
//!
//! Every ingestion gets a freshly generated collection name of the form
//! `{base}_{unix_seconds}_{8 hex chars}`. The registry remembers the names it
//! has recently issued and uses the store's create-if-absent primitive, so a
//! collision is detected rather than silently reusing someone else's
//! collection.
//!
//! Sessions are opaque strings. Each maps to at most one active
//! [`CollectionHandle`]; the pointer only moves via [`CollectionRegistry::set_active`],
//! which the ingestion orchestrator calls after a fully successful run. The
//! session map is bounded: once full, the least recently used session loses
//! its pointer (its collection stays in the store).
//!
//! Writers appending to an existing collection serialize on
//! [`CollectionRegistry::lock_writes`], so sequence numbers are read and
//! assigned by one ingestion at a time.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::error::{RagError, Result};
use crate::models::CollectionHandle;
use crate::store::{CollectionLookup, VectorStore};

/// Session used when the caller supplies none.
pub const DEFAULT_SESSION: &str = "default";

/// Issued names remembered for in-process collision checks. Older names carry
/// an older timestamp and cannot be generated again.
const ISSUED_NAME_MEMORY: usize = 4096;

/// Bounded FIFO set of issued collection names.
struct IssuedNames {
    names: HashSet<String>,
    order: VecDeque<String>,
}

impl IssuedNames {
    fn new() -> Self {
        Self {
            names: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// False if `name` was already issued.
    fn insert(&mut self, name: &str) -> bool {
        if !self.names.insert(name.to_string()) {
            return false;
        }
        self.order.push_back(name.to_string());
        while self.order.len() > ISSUED_NAME_MEMORY {
            if let Some(old) = self.order.pop_front() {
                self.names.remove(&old);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

struct ActiveEntry {
    handle: CollectionHandle,
    last_used: AtomicU64,
}

pub struct CollectionRegistry {
    store: Arc<dyn VectorStore>,
    max_name_attempts: u32,
    max_sessions: usize,
    issued: Mutex<IssuedNames>,
    active: RwLock<HashMap<String, ActiveEntry>>,
    clock: AtomicU64,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CollectionRegistry {
    pub fn new(store: Arc<dyn VectorStore>, max_name_attempts: u32, max_sessions: usize) -> Self {
        Self {
            store,
            max_name_attempts: max_name_attempts.max(1),
            max_sessions: max_sessions.max(1),
            issued: Mutex::new(IssuedNames::new()),
            active: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Create a collection under a never-before-issued name.
    pub async fn create_collection(&self, base: &str) -> Result<CollectionHandle> {
        for attempt in 1..=self.max_name_attempts {
            let name = generate_name(base);

            // Reserve the name before the store call so concurrent ingestions
            // cannot race for it.
            if !self.issued.lock().insert(&name) {
                debug!(name = %name, attempt, "generated name already issued");
                continue;
            }

            match self.store.create_if_absent(&name).await? {
                CollectionLookup::Created(handle) => return Ok(handle),
                CollectionLookup::Found(_) => {
                    warn!(name = %name, attempt, "collection name collision in store");
                }
            }
        }

        Err(RagError::storage(format!(
            "could not allocate a unique collection name for '{}' after {} attempts",
            base, self.max_name_attempts
        )))
    }

    /// The session's active collection if it still exists, else a new one.
    ///
    /// A `Created` result is not activated; the caller activates it once the
    /// data it writes is complete.
    pub async fn get_or_create_active(&self, session: &str, base: &str) -> Result<CollectionLookup> {
        let current = self.active.read().get(session).map(|e| e.handle.clone());
        if let Some(handle) = current {
            if self.store.lookup(&handle.name).await?.is_some() {
                return Ok(CollectionLookup::Found(handle));
            }
            warn!(session, collection = %handle.name, "active collection vanished from store");
        }
        Ok(CollectionLookup::Created(self.create_collection(base).await?))
    }

    pub fn get_active(&self, session: &str) -> Result<CollectionHandle> {
        let active = self.active.read();
        let entry = active.get(session).ok_or_else(|| {
            RagError::NoActiveCollection(
                "No documents available. Please upload a file first.".to_string(),
            )
        })?;
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Ok(entry.handle.clone())
    }

    /// Atomically replace the session's pointer, returning the previous handle.
    /// The previous collection's data is left in place.
    pub fn set_active(&self, session: &str, handle: CollectionHandle) -> Option<CollectionHandle> {
        let entry = ActiveEntry {
            handle,
            last_used: AtomicU64::new(self.tick()),
        };
        let mut active = self.active.write();
        if !active.contains_key(session) && active.len() >= self.max_sessions {
            let oldest = active
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                active.remove(&oldest);
                debug!(session = %oldest, "evicted least recently used session");
            }
        }
        active.insert(session.to_string(), entry).map(|e| e.handle)
    }

    /// Number of sessions holding an active pointer.
    pub fn session_count(&self) -> usize {
        self.active.read().len()
    }

    /// Resolve a collection by name for callers that kept the ingestion handle.
    pub async fn resolve(&self, name: &str) -> Result<CollectionHandle> {
        self.store
            .lookup(name)
            .await?
            .ok_or_else(|| RagError::NoActiveCollection(format!("unknown collection '{}'", name)))
    }

    /// Exclusive write access to `collection` until the guard drops.
    ///
    /// Locks nobody holds or waits for are pruned on every call, so the table
    /// only tracks collections with writes in flight.
    pub async fn lock_writes(&self, collection: &CollectionHandle) -> OwnedMutexGuard<()> {
        let lock = {
            let mut writers = self.writers.lock();
            writers.retain(|_, lock| Arc::strong_count(lock) > 1);
            writers.entry(collection.name.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Best-effort removal of a collection that never became active.
    pub async fn discard(&self, handle: &CollectionHandle) {
        if let Err(e) = self.store.delete(&handle.name).await {
            warn!(collection = %handle.name, error = %e, "failed to discard collection");
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

/// `{base}_{unix_seconds}_{first 8 hex chars of a v4 uuid}`.
pub fn generate_name(base: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", base, chrono::Utc::now().timestamp(), &uuid[..8])
}
