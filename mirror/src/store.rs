//! Document store abstraction.
//!
//! Collections hold JSON object documents keyed by a store-generated id. Every
//! write bumps a per-document revision; [`DocumentStore::update`] only applies
//! when the caller's revision is current, which is how concurrent writers
//! (a user action and the renewal monitor, say) avoid overwriting each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{MirrorError, Result, StoreError};
use crate::model::Stored;

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct RawDoc {
    pub id: String,
    pub revision: u64,
    pub fields: Document,
}

/// Equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        doc.get(&self.field) == Some(&self.value)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> std::result::Result<Option<RawDoc>, StoreError>;

    /// Insert under a generated id.
    async fn insert(&self, collection: &str, fields: Document) -> std::result::Result<RawDoc, StoreError>;

    /// Write at `id` only if no document is there yet; otherwise
    /// [`StoreError::AlreadyExists`]. Atomic with respect to other writers.
    async fn create(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> std::result::Result<RawDoc, StoreError>;

    /// Create or merge top-level fields into the document at `id`.
    async fn set_merge(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> std::result::Result<RawDoc, StoreError>;

    /// Replace the document if its revision is still `expected_revision`.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        expected_revision: u64,
        fields: Document,
    ) -> std::result::Result<RawDoc, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> std::result::Result<(), StoreError>;

    async fn query(&self, collection: &str, filters: &[Filter]) -> std::result::Result<Vec<RawDoc>, StoreError>;
}

fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(MirrorError::Serialization(serde::ser::Error::custom(format!(
            "document must serialize to an object, got {other}"
        )))),
    }
}

fn from_raw<T: DeserializeOwned>(raw: RawDoc) -> Result<Stored<T>> {
    let data = serde_json::from_value(Value::Object(raw.fields))?;
    Ok(Stored {
        id: raw.id,
        revision: raw.revision,
        data,
    })
}

pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<Stored<T>>> {
    match store.get(collection, id).await? {
        Some(raw) => Ok(Some(from_raw(raw)?)),
        None => Ok(None),
    }
}

/// Like [`get_typed`] but a missing document is an error.
pub async fn require_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Stored<T>> {
    get_typed(store, collection, id)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }
            .into()
        })
}

pub async fn insert_typed<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    data: T,
) -> Result<Stored<T>> {
    let raw = store.insert(collection, to_document(&data)?).await?;
    Ok(Stored {
        id: raw.id,
        revision: raw.revision,
        data,
    })
}

pub async fn create_typed<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    data: T,
) -> Result<Stored<T>> {
    let raw = store.create(collection, id, to_document(&data)?).await?;
    Ok(Stored {
        id: raw.id,
        revision: raw.revision,
        data,
    })
}

pub async fn set_merge_typed<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    data: &T,
) -> Result<u64> {
    let raw = store.set_merge(collection, id, to_document(data)?).await?;
    Ok(raw.revision)
}

/// Write `stored.data` back, guarded by `stored.revision`. On success the
/// revision is advanced in place.
pub async fn update_typed<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    stored: &mut Stored<T>,
) -> Result<()> {
    let raw = store
        .update(collection, &stored.id, stored.revision, to_document(&stored.data)?)
        .await?;
    stored.revision = raw.revision;
    Ok(())
}

pub async fn query_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    filters: &[Filter],
) -> Result<Vec<Stored<T>>> {
    store
        .query(collection, filters)
        .await?
        .into_iter()
        .map(from_raw)
        .collect()
}

/// In-process store. Queries return documents in id order.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, (u64, Document)>>>,
    next_id: AtomicU64,
    /// Collection the injected failures apply to (`None` for any) and how many are left.
    failing_writes: Mutex<(Option<String>, u32)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, n: u32) {
        self.inject(None, n);
    }

    /// Like [`fail_next_writes`](Self::fail_next_writes), counting only writes to `collection`.
    pub fn fail_next_writes_in(&self, collection: &str, n: u32) {
        self.inject(Some(collection.to_string()), n);
    }

    fn inject(&self, collection: Option<String>, n: u32) {
        let mut failing = self.failing_writes.lock().unwrap_or_else(|e| e.into_inner());
        *failing = (collection, n);
    }

    fn check_write(&self, collection: &str) -> std::result::Result<(), StoreError> {
        let mut failing = self.failing_writes.lock().unwrap_or_else(|e| e.into_inner());
        let (scope, remaining) = &mut *failing;
        let applies = scope.as_deref().map_or(true, |c| c == collection);
        if *remaining > 0 && applies {
            *remaining -= 1;
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn generate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("doc-{n:08}")
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> std::result::Result<Option<RawDoc>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(revision, fields)| RawDoc {
                id: id.to_string(),
                revision: *revision,
                fields: fields.clone(),
            }))
    }

    async fn insert(&self, collection: &str, fields: Document) -> std::result::Result<RawDoc, StoreError> {
        self.check_write(collection)?;
        let id = self.generate_id();
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), (1, fields.clone()));
        debug!(collection, id = %id, "document inserted");
        Ok(RawDoc {
            id,
            revision: 1,
            fields,
        })
    }

    async fn create(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> std::result::Result<RawDoc, StoreError> {
        self.check_write(collection)?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.insert(id.to_string(), (1, fields.clone()));
        Ok(RawDoc {
            id: id.to_string(),
            revision: 1,
            fields,
        })
    }

    async fn set_merge(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> std::result::Result<RawDoc, StoreError> {
        self.check_write(collection)?;
        let mut collections = self.collections.write().await;
        let entry = collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| (0, Document::new()));
        entry.0 += 1;
        entry.1.extend(fields);
        Ok(RawDoc {
            id: id.to_string(),
            revision: entry.0,
            fields: entry.1.clone(),
        })
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        expected_revision: u64,
        fields: Document,
    ) -> std::result::Result<RawDoc, StoreError> {
        self.check_write(collection)?;
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        if entry.0 != expected_revision {
            return Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
                expected: expected_revision,
                found: entry.0,
            });
        }
        entry.0 += 1;
        entry.1 = fields;
        Ok(RawDoc {
            id: id.to_string(),
            revision: entry.0,
            fields: entry.1.clone(),
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> std::result::Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> std::result::Result<Vec<RawDoc>, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, (_, fields))| filters.iter().all(|f| f.matches(fields)))
            .map(|(id, (revision, fields))| RawDoc {
                id: id.clone(),
                revision: *revision,
                fields: fields.clone(),
            })
            .collect())
    }
}
