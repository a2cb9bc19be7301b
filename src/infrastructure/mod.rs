// Infrastructure - document store adapters and request identity plumbing

pub mod document_store;        // Store interface, patches, filters, projections
pub mod memory_store;          // In-process store with fault injection
pub mod sqlite_store;          // SQLite-backed store
pub mod viewer;                // Viewer context
pub mod middleware;            // Viewer context middleware and extractor

pub use document_store::{
    DocumentStore, DocumentTransaction, Filter, Patch, Projection, StoreError, StoreResult,
};
pub use memory_store::{MemoryDocumentStore, StoreOp};
pub use sqlite_store::SqliteDocumentStore;
pub use viewer::ViewerContext;
