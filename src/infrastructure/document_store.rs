// Document Store Interface - generic CRUD and transaction primitives over the
// `users`, `posts` and `comments` collections. No foreign keys, no cascades:
// every cross-document link is maintained by the services layer.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::core::DocumentId;
use crate::models::{fields, Collection, DocumentModel};

/// A stored document: a JSON object carrying its own numeric `id`.
pub type Document = Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Backend(String),
    Serialization(String),
    InvalidDocument(String),
    /// Failure injected by a test fault plan.
    Injected(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "store backend error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            StoreError::InvalidDocument(msg) => write!(f, "invalid document: {}", msg),
            StoreError::Injected(msg) => write!(f, "injected fault: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which top-level fields a read returns. `id` is always included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    All,
    Fields(&'static [&'static str]),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    FieldEq(&'static str, Value),
    IdIn(Vec<DocumentId>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    /// Append an id to an id sequence.
    Push(DocumentId),
    /// Remove every occurrence of an id from an id sequence.
    Pull(DocumentId),
}

/// Field-level partial update applied atomically to a single document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    ops: Vec<(&'static str, FieldOp)>,
}

/// Stored field names are plain identifiers, so they can be spliced into
/// JSON paths as literals.
pub fn is_field_name(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &'static str, value: Value) -> Self {
        self.ops.push((field, FieldOp::Set(value)));
        self
    }

    pub fn push(mut self, field: &'static str, id: DocumentId) -> Self {
        self.ops.push((field, FieldOp::Push(id)));
        self
    }

    pub fn pull(mut self, field: &'static str, id: DocumentId) -> Self {
        self.ops.push((field, FieldOp::Pull(id)));
        self
    }

    pub fn ops(&self) -> &[(&'static str, FieldOp)] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Rejects patches touching immutable fields, naming a field twice, or
    /// using field names that are not plain identifiers.
    pub fn validate(&self) -> StoreResult<()> {
        let mut seen = HashSet::new();
        for (field, _) in &self.ops {
            if fields::IMMUTABLE.contains(field) {
                return Err(StoreError::InvalidDocument(format!(
                    "field '{}' is immutable",
                    field
                )));
            }
            if !is_field_name(field) {
                return Err(StoreError::InvalidDocument(format!(
                    "invalid field name '{}'",
                    field
                )));
            }
            if !seen.insert(*field) {
                return Err(StoreError::InvalidDocument(format!(
                    "field '{}' patched twice",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Document store interface consumed by the consistency engine.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(
        &self,
        collection: Collection,
        id: DocumentId,
        projection: Projection,
    ) -> StoreResult<Option<Document>>;

    /// Results are ordered by id.
    async fn find_many(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<Document>>;

    async fn insert(&self, collection: Collection, document: Document) -> StoreResult<()>;

    /// Returns whether a document matched.
    async fn update_fields(
        &self,
        collection: Collection,
        id: DocumentId,
        patch: &Patch,
    ) -> StoreResult<bool>;

    /// Returns whether a document was deleted.
    async fn delete_by_id(&self, collection: Collection, id: DocumentId) -> StoreResult<bool>;

    async fn begin_transaction(&self) -> StoreResult<Box<dyn DocumentTransaction>>;

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Multi-document transaction. Dropping it without `commit` rolls back.
/// Reads are not offered inside a transaction; callers read first.
#[async_trait]
pub trait DocumentTransaction: Send {
    async fn insert(&mut self, collection: Collection, document: Document) -> StoreResult<()>;

    async fn update_fields(
        &mut self,
        collection: Collection,
        id: DocumentId,
        patch: &Patch,
    ) -> StoreResult<bool>;

    async fn delete_by_id(&mut self, collection: Collection, id: DocumentId) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Fetch one document decoded as `T` with `T`'s projection.
pub async fn fetch<T: DocumentModel>(
    store: &dyn DocumentStore,
    id: DocumentId,
) -> StoreResult<Option<T>> {
    match store.find_by_id(T::COLLECTION, id, T::PROJECTION).await? {
        Some(doc) => decode::<T>(project(doc, T::PROJECTION)).map(Some),
        None => Ok(None),
    }
}

/// Fetch every document matching `filter`, decoded as `T`.
pub async fn fetch_many<T: DocumentModel>(
    store: &dyn DocumentStore,
    filter: &Filter,
) -> StoreResult<Vec<T>> {
    store
        .find_many(T::COLLECTION, filter)
        .await?
        .into_iter()
        .map(|doc| decode::<T>(project(doc, T::PROJECTION)))
        .collect()
}

pub fn decode<T: DocumentModel>(doc: Document) -> StoreResult<T> {
    serde_json::from_value(doc).map_err(|e| {
        StoreError::Serialization(format!("malformed {} document: {}", T::COLLECTION.as_str(), e))
    })
}

pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    let doc = serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    document_id(&doc)?;
    Ok(doc)
}

/// Extract the `id` every stored document must carry.
pub fn document_id(doc: &Document) -> StoreResult<DocumentId> {
    doc.get(fields::ID)
        .and_then(Value::as_i64)
        .map(DocumentId)
        .ok_or_else(|| StoreError::InvalidDocument("document has no numeric id".to_string()))
}

/// Keep only the projected top-level fields (plus `id`).
pub fn project(doc: Document, projection: Projection) -> Document {
    match (projection, doc) {
        (Projection::All, doc) => doc,
        (Projection::Fields(wanted), Value::Object(map)) => {
            let kept: Map<String, Value> = map
                .into_iter()
                .filter(|(key, _)| key == fields::ID || wanted.contains(&key.as_str()))
                .collect();
            Value::Object(kept)
        }
        (_, other) => other,
    }
}

/// Whether a document satisfies a filter.
pub fn matches(doc: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::All => true,
        Filter::FieldEq(field, value) => doc.get(*field) == Some(value),
        Filter::IdIn(ids) => document_id(doc).map(|id| ids.contains(&id)).unwrap_or(false),
    }
}

/// Apply a patch to an in-memory document.
pub fn apply_patch(doc: &mut Document, patch: &Patch) -> StoreResult<()> {
    let map = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidDocument("document is not an object".to_string()))?;

    for (field, op) in patch.ops() {
        match op {
            FieldOp::Set(value) => {
                map.insert(field.to_string(), value.clone());
            }
            FieldOp::Push(id) => {
                let entry = map
                    .entry(field.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                let list = entry.as_array_mut().ok_or_else(|| {
                    StoreError::InvalidDocument(format!("field '{}' is not a sequence", field))
                })?;
                list.push(Value::from(id.value()));
            }
            FieldOp::Pull(id) => {
                if let Some(entry) = map.get_mut(*field) {
                    let list = entry.as_array_mut().ok_or_else(|| {
                        StoreError::InvalidDocument(format!("field '{}' is not a sequence", field))
                    })?;
                    list.retain(|v| v.as_i64() != Some(id.value()));
                }
            }
        }
    }
    Ok(())
}
