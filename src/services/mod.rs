// Services - the consistency engine over the document store.
// Every mutation of the reference graph goes through these services; nothing
// else writes to the store.

pub mod comment_service;
pub mod integrity_service;
pub mod post_service;
pub mod projection;
pub mod user_service;

pub use comment_service::CommentService;
pub use integrity_service::{AuditReport, IntegrityService, RepairReport, Violation};
pub use post_service::PostService;
pub use projection::PostProjector;
pub use user_service::UserService;

use std::sync::Arc;
use tracing::warn;

use crate::config::CascadeMode;
use crate::core::DocumentIdGenerator;
use crate::error::{AppError, AppResult};
use crate::infrastructure::document_store::{DocumentStore, DocumentTransaction};

/// Dependencies shared by every service.
#[derive(Clone)]
pub struct GraphContext {
    pub store: Arc<dyn DocumentStore>,
    pub ids: Arc<DocumentIdGenerator>,
    pub cascade_mode: CascadeMode,
}

impl GraphContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ids: DocumentIdGenerator,
        cascade_mode: CascadeMode,
    ) -> Self {
        Self {
            store,
            ids: Arc::new(ids),
            cascade_mode,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub async fn begin(&self) -> AppResult<Box<dyn DocumentTransaction>> {
        self.store
            .begin_transaction()
            .await
            .map_err(|e| AppError::write("begin transaction", e))
    }
}

/// Commit on success, roll back on failure. The commit is awaited before
/// returning; a failed rollback is logged and the original error returned.
pub(crate) async fn finish_transaction<T>(
    tx: Box<dyn DocumentTransaction>,
    outcome: AppResult<T>,
) -> AppResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| AppError::write("commit transaction", e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed after {}", err.kind());
            }
            Err(err)
        }
    }
}
