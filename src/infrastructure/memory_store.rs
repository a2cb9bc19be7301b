// In-memory document store.
// A transaction takes the writer lock, works on a copy of the state and swaps
// the copy in on commit. A fault plan can fail chosen calls, and every write
// call is counted.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::document_store::{
    apply_patch, document_id, matches, project, Document, DocumentStore, DocumentTransaction,
    Filter, Patch, Projection, StoreError, StoreResult,
};
use crate::core::DocumentId;
use crate::models::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FindById,
    FindMany,
    Insert,
    UpdateFields,
    DeleteById,
    BeginTransaction,
    Commit,
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    collection: Option<Collection>,
    /// Matching calls to let through before failing.
    skip: usize,
}

#[derive(Debug, Default)]
struct FaultPlan {
    faults: Mutex<Vec<Fault>>,
}

impl FaultPlan {
    fn check(&self, op: StoreOp, collection: Option<Collection>) -> StoreResult<()> {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        let position = faults
            .iter()
            .position(|f| f.op == op && (f.collection.is_none() || f.collection == collection));

        if let Some(index) = position {
            if faults[index].skip == 0 {
                faults.remove(index);
                return Err(StoreError::Injected(format!(
                    "{:?} on {}",
                    op,
                    collection.map(|c| c.as_str()).unwrap_or("store")
                )));
            }
            faults[index].skip -= 1;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: HashMap<Collection, BTreeMap<DocumentId, Document>>,
}

impl MemoryState {
    fn collection(&self, collection: Collection) -> Option<&BTreeMap<DocumentId, Document>> {
        self.collections.get(&collection)
    }

    fn collection_mut(&mut self, collection: Collection) -> &mut BTreeMap<DocumentId, Document> {
        self.collections.entry(collection).or_default()
    }

    fn insert(&mut self, collection: Collection, document: Document) -> StoreResult<()> {
        let id = document_id(&document)?;
        let docs = self.collection_mut(collection);
        if docs.contains_key(&id) {
            return Err(StoreError::Backend(format!(
                "duplicate id {} in {}",
                id,
                collection.as_str()
            )));
        }
        docs.insert(id, document);
        Ok(())
    }

    fn update_fields(
        &mut self,
        collection: Collection,
        id: DocumentId,
        patch: &Patch,
    ) -> StoreResult<bool> {
        patch.validate()?;
        match self.collection_mut(collection).get_mut(&id) {
            Some(doc) => {
                // Apply to a copy so a failing op leaves the document untouched
                let mut updated = doc.clone();
                apply_patch(&mut updated, patch)?;
                *doc = updated;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_by_id(&mut self, collection: Collection, id: DocumentId) -> bool {
        self.collection_mut(collection).remove(&id).is_some()
    }
}

/// In-memory implementation of the document store interface
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    state: Arc<RwLock<MemoryState>>,
    faults: Arc<FaultPlan>,
    writes: Arc<AtomicU64>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `op` on `collection`.
    pub fn fail_next(&self, op: StoreOp, collection: Collection) {
        self.fail_nth(op, Some(collection), 0);
    }

    /// Let `skip` matching calls through, then fail the next one.
    /// `None` matches calls on any collection.
    pub fn fail_nth(&self, op: StoreOp, collection: Option<Collection>, skip: usize) {
        self.faults
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Fault { op, collection, skip });
    }

    pub fn clear_faults(&self) {
        self.faults.faults.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Number of write calls issued (insert, update, delete), committed or not.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn count(&self, collection: Collection) -> usize {
        self.state
            .read()
            .await
            .collection(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_by_id(
        &self,
        collection: Collection,
        id: DocumentId,
        projection: Projection,
    ) -> StoreResult<Option<Document>> {
        self.faults.check(StoreOp::FindById, Some(collection))?;
        let state = self.state.read().await;
        Ok(state
            .collection(collection)
            .and_then(|docs| docs.get(&id))
            .cloned()
            .map(|doc| project(doc, projection)))
    }

    async fn find_many(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<Document>> {
        self.faults.check(StoreOp::FindMany, Some(collection))?;
        let state = self.state.read().await;
        Ok(state
            .collection(collection)
            .map(|docs| docs.values().filter(|doc| matches(doc, filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: Collection, document: Document) -> StoreResult<()> {
        self.record_write();
        self.faults.check(StoreOp::Insert, Some(collection))?;
        self.state.write().await.insert(collection, document)
    }

    async fn update_fields(
        &self,
        collection: Collection,
        id: DocumentId,
        patch: &Patch,
    ) -> StoreResult<bool> {
        self.record_write();
        self.faults.check(StoreOp::UpdateFields, Some(collection))?;
        self.state.write().await.update_fields(collection, id, patch)
    }

    async fn delete_by_id(&self, collection: Collection, id: DocumentId) -> StoreResult<bool> {
        self.record_write();
        self.faults.check(StoreOp::DeleteById, Some(collection))?;
        Ok(self.state.write().await.delete_by_id(collection, id))
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn DocumentTransaction>> {
        self.faults.check(StoreOp::BeginTransaction, None)?;
        let guard = self.state.clone().write_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            store: self.clone(),
        }))
    }
}

/// Holds the writer lock for its whole lifetime.
pub struct MemoryTransaction {
    guard: OwnedRwLockWriteGuard<MemoryState>,
    working: MemoryState,
    store: MemoryDocumentStore,
}

#[async_trait]
impl DocumentTransaction for MemoryTransaction {
    async fn insert(&mut self, collection: Collection, document: Document) -> StoreResult<()> {
        self.store.record_write();
        self.store.faults.check(StoreOp::Insert, Some(collection))?;
        self.working.insert(collection, document)
    }

    async fn update_fields(
        &mut self,
        collection: Collection,
        id: DocumentId,
        patch: &Patch,
    ) -> StoreResult<bool> {
        self.store.record_write();
        self.store.faults.check(StoreOp::UpdateFields, Some(collection))?;
        self.working.update_fields(collection, id, patch)
    }

    async fn delete_by_id(&mut self, collection: Collection, id: DocumentId) -> StoreResult<bool> {
        self.store.record_write();
        self.store.faults.check(StoreOp::DeleteById, Some(collection))?;
        Ok(self.working.delete_by_id(collection, id))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            mut guard,
            working,
            store,
        } = *self;
        store.faults.check(StoreOp::Commit, None)?;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud_round() {
        let store = MemoryDocumentStore::new();
        store
            .insert(Collection::Users, json!({"id": 1, "username": "ana", "posts": []}))
            .await
            .unwrap();

        let patch = Patch::new().push("posts", DocumentId(10));
        assert!(store.update_fields(Collection::Users, DocumentId(1), &patch).await.unwrap());
        assert!(!store.update_fields(Collection::Users, DocumentId(2), &patch).await.unwrap());

        let doc = store
            .find_by_id(Collection::Users, DocumentId(1), Projection::Fields(&["posts"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"id": 1, "posts": [10]}));

        assert!(store.delete_by_id(Collection::Users, DocumentId(1)).await.unwrap());
        assert!(!store.delete_by_id(Collection::Users, DocumentId(1)).await.unwrap());
        assert_eq!(store.write_count(), 5);
    }

    #[tokio::test]
    async fn test_transaction_is_invisible_until_commit() {
        let store = MemoryDocumentStore::new();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert(Collection::Posts, json!({"id": 5})).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.count(Collection::Posts).await, 0);

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert(Collection::Posts, json!({"id": 5})).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.count(Collection::Posts).await, 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryDocumentStore::new();
        {
            let mut tx = store.begin_transaction().await.unwrap();
            tx.insert(Collection::Comments, json!({"id": 8})).await.unwrap();
        }
        assert_eq!(store.count(Collection::Comments).await, 0);
    }

    #[tokio::test]
    async fn test_fault_plan_skips_then_fails_once() {
        let store = MemoryDocumentStore::new();
        store.fail_nth(StoreOp::Insert, Some(Collection::Posts), 1);

        store.insert(Collection::Posts, json!({"id": 1})).await.unwrap();
        let err = store.insert(Collection::Posts, json!({"id": 2})).await.unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));
        store.insert(Collection::Posts, json!({"id": 3})).await.unwrap();

        assert_eq!(store.count(Collection::Posts).await, 2);
    }
}
