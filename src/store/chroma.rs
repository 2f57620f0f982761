//! [`VectorStore`] backed by a Chroma server (v2 REST API).
//!
//! All paths are scoped to `/api/v2/tenants/{tenant}/databases/{database}`.
//! Collections are created with cosine distance, and distances are converted
//! back to similarities (`1 - distance`). When `store.api_key_env` names a set
//! environment variable its value is sent as `x-chroma-token`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{check_parallel, CollectionLookup, VectorStore};
use crate::config::StoreConfig;
use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkMetadata, ChunkRecord, CollectionHandle, ScoredChunk};
use crate::remote::{self, RemoteError};

/// Records fetched per `get` call when reading a whole collection.
const PAGE_SIZE: usize = 500;

pub struct ChromaStore {
    base: String,
    token: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChromaStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = remote::build_client(config.timeout_secs)
            .map_err(|e| RagError::Config(e.to_string()))?;
        let token = config
            .api_key_env
            .as_deref()
            .and_then(|var| remote::api_key_from_env(Some(var), var));

        Ok(Self {
            base: format!(
                "{}/api/v2/tenants/{}/databases/{}/collections",
                config.url.trim_end_matches('/'),
                config.tenant,
                config.database
            ),
            token,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = if path.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{}", self.base, path)
        };
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header("x-chroma-token", token),
            None => builder,
        }
    }

    async fn call(
        &self,
        label: &str,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> std::result::Result<Value, RemoteError> {
        remote::send_json(label, self.max_retries, || {
            let builder = self.request(method.clone(), path);
            match body {
                Some(b) => builder.json(b),
                None => builder,
            }
        })
        .await
    }
}

fn storage_err(op: &str, err: RemoteError) -> RagError {
    RagError::storage(format!("chroma {}: {}", op, err))
}

fn is_not_found(err: &RemoteError) -> bool {
    match err {
        RemoteError::Status { status: 404, .. } => true,
        RemoteError::Status { body, .. } => body.contains("does not exist"),
        _ => false,
    }
}

fn handle_from(json: &Value, name: &str) -> Result<CollectionHandle> {
    let id = json
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RagError::storage("chroma response missing collection id"))?;
    Ok(CollectionHandle {
        name: name.to_string(),
        id: id.to_string(),
    })
}

fn metadata_from(value: Option<&Value>) -> Option<ChunkMetadata> {
    value
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn str_at(values: Option<&Vec<Value>>, i: usize) -> String {
    values
        .and_then(|v| v.get(i))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Parse the column-oriented `query` response (one row per query embedding).
fn parse_query(json: &Value) -> Vec<ScoredChunk> {
    let first_row = |key: &str| {
        json.get(key)
            .and_then(|v| v.as_array())
            .and_then(|rows| rows.first())
            .and_then(|row| row.as_array())
    };
    let Some(ids) = first_row("ids") else {
        return Vec::new();
    };
    let documents = first_row("documents");
    let metadatas = first_row("metadatas");
    let distances = first_row("distances");

    let mut results: Vec<ScoredChunk> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let distance = distances
                .and_then(|d| d.get(i))
                .and_then(|d| d.as_f64())
                .unwrap_or(1.0) as f32;
            ScoredChunk {
                id: id.as_str().unwrap_or_default().to_string(),
                text: str_at(documents, i),
                similarity: 1.0 - distance,
                metadata: metadata_from(metadatas.and_then(|m| m.get(i))),
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

/// Parse the flat `get` response into records.
fn parse_get(json: &Value) -> Vec<ChunkRecord> {
    let column = |key: &str| json.get(key).and_then(|v| v.as_array());
    let Some(ids) = column("ids") else {
        return Vec::new();
    };
    let documents = column("documents");
    let metadatas = column("metadatas");

    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let metadata = metadata_from(metadatas.and_then(|m| m.get(i))).unwrap_or(ChunkMetadata {
                document_id: String::new(),
                filename: String::new(),
                page_number: 0,
                sequence: i as u64,
                hash: String::new(),
            });
            ChunkRecord {
                id: id.as_str().unwrap_or_default().to_string(),
                chunk: Chunk {
                    text: str_at(documents, i),
                    metadata,
                },
            }
        })
        .collect()
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn create_if_absent(&self, name: &str) -> Result<CollectionLookup> {
        let body = json!({
            "name": name,
            "get_or_create": false,
            "metadata": {"hnsw:space": "cosine"},
        });
        match self
            .call("chroma create", reqwest::Method::POST, "", Some(&body))
            .await
        {
            Ok(json) => Ok(CollectionLookup::Created(handle_from(&json, name)?)),
            Err(err) if err.status() == Some(409) => {
                let existing = self
                    .lookup(name)
                    .await?
                    .ok_or_else(|| RagError::storage(format!("collection '{}' conflicted but cannot be found", name)))?;
                Ok(CollectionLookup::Found(existing))
            }
            Err(err) => Err(storage_err("create", err)),
        }
    }

    async fn lookup(&self, name: &str) -> Result<Option<CollectionHandle>> {
        match self
            .call("chroma lookup", reqwest::Method::GET, name, None)
            .await
        {
            Ok(json) => Ok(Some(handle_from(&json, name)?)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(storage_err("lookup", err)),
        }
    }

    async fn add(
        &self,
        collection: &CollectionHandle,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        check_parallel(records, embeddings)?;
        if records.is_empty() {
            return Ok(());
        }

        let metadatas = records
            .iter()
            .map(|r| serde_json::to_value(&r.chunk.metadata))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RagError::storage(e.to_string()))?;
        let body = json!({
            "ids": records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            "documents": records.iter().map(|r| r.chunk.text.as_str()).collect::<Vec<_>>(),
            "metadatas": metadatas,
            "embeddings": embeddings,
        });

        self.call(
            "chroma add",
            reqwest::Method::POST,
            &format!("{}/add", collection.id),
            Some(&body),
        )
        .await
        .map_err(|e| storage_err("add", e))?;
        Ok(())
    }

    async fn remove(&self, collection: &CollectionHandle, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "ids": ids });
        self.call(
            "chroma remove",
            reqwest::Method::POST,
            &format!("{}/delete", collection.id),
            Some(&body),
        )
        .await
        .map_err(|e| storage_err("remove", e))?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let body = json!({
            "query_embeddings": [vector],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });
        let json = self
            .call(
                "chroma query",
                reqwest::Method::POST,
                &format!("{}/query", collection.id),
                Some(&body),
            )
            .await
            .map_err(|e| storage_err("query", e))?;

        let mut results = parse_query(&json);
        results.truncate(k);
        Ok(results)
    }

    async fn count(&self, collection: &CollectionHandle) -> Result<usize> {
        let json = self
            .call(
                "chroma count",
                reqwest::Method::GET,
                &format!("{}/count", collection.id),
                None,
            )
            .await
            .map_err(|e| storage_err("count", e))?;
        json.as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| RagError::storage(format!("chroma count: unexpected response {}", json)))
    }

    async fn get_all(&self, collection: &CollectionHandle) -> Result<Vec<ChunkRecord>> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let body = json!({
                "include": ["documents", "metadatas"],
                "limit": PAGE_SIZE,
                "offset": offset,
            });
            let json = self
                .call(
                    "chroma get",
                    reqwest::Method::POST,
                    &format!("{}/get", collection.id),
                    Some(&body),
                )
                .await
                .map_err(|e| storage_err("get", e))?;

            let page = parse_get(&json);
            let fetched = page.len();
            records.extend(page);
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        records.sort_by_key(|r| r.chunk.metadata.sequence);
        Ok(records)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self
            .call("chroma delete", reqwest::Method::DELETE, name, None)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(storage_err("delete", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };

    const PREFIX: &str = "/api/v2/tenants/default_tenant/databases/default_database/collections";

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn store_for(url: String) -> ChromaStore {
        let config = StoreConfig {
            provider: "chroma".to_string(),
            url,
            max_retries: 0,
            ..StoreConfig::default()
        };
        ChromaStore::new(&config).unwrap()
    }

    #[tokio::test]
    async fn conflict_on_create_is_found() {
        let router = Router::new()
            .route(
                PREFIX,
                post(|| async { (StatusCode::CONFLICT, "UniqueConstraintError") }),
            )
            .route(
                &format!("{}/{{name}}", PREFIX),
                get(|Path(name): Path<String>| async move {
                    Json(json!({"id": "uuid-1", "name": name}))
                }),
            );
        let store = store_for(spawn(router).await);

        let lookup = store.create_if_absent("docs").await.unwrap();
        assert_eq!(
            lookup,
            CollectionLookup::Found(CollectionHandle {
                name: "docs".to_string(),
                id: "uuid-1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn missing_collection_lookup_is_none() {
        let router = Router::new().route(
            &format!("{}/{{name}}", PREFIX),
            get(|| async { (StatusCode::NOT_FOUND, "Collection does not exist") }),
        );
        let store = store_for(spawn(router).await);
        assert!(store.lookup("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_failure_is_storage_error() {
        let router = Router::new().route(
            PREFIX,
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let store = store_for(spawn(router).await);
        let err = store.create_if_absent("docs").await.unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));
    }

    #[tokio::test]
    async fn remove_posts_ids_to_delete_endpoint() {
        let router = Router::new().route(
            &format!("{}/{{id}}/delete", PREFIX),
            post(
                |Path(id): Path<String>, Json(body): Json<Value>| async move {
                    assert_eq!(id, "uuid-1");
                    assert_eq!(body["ids"], json!(["a", "b"]));
                    Json(json!([]))
                },
            ),
        );
        let store = store_for(spawn(router).await);
        let handle = CollectionHandle {
            name: "docs".to_string(),
            id: "uuid-1".to_string(),
        };
        store
            .remove(&handle, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        store.remove(&handle, &[]).await.unwrap();
    }

    #[test]
    fn query_response_converted_to_similarity() {
        let json = json!({
            "ids": [["a", "b"]],
            "documents": [["far", "near"]],
            "metadatas": [[null, {"document_id": "d", "filename": "f.txt", "page_number": 1, "sequence": 3, "hash": "h"}]],
            "distances": [[0.9, 0.1]],
        });
        let results = parse_query(&json);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "near");
        assert!((results[0].similarity - 0.9).abs() < 1e-6);
        assert_eq!(results[0].metadata.as_ref().map(|m| m.sequence), Some(3));
        assert!(results[1].metadata.is_none());
    }

    #[test]
    fn get_response_parsed() {
        let json = json!({
            "ids": ["a"],
            "documents": ["hello."],
            "metadatas": [{"document_id": "d", "filename": "f.txt", "page_number": 2, "sequence": 0, "hash": "h"}],
        });
        let records = parse_get(&json);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chunk.metadata.page_number, 2);
    }
}
