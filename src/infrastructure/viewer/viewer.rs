use crate::core::DocumentId;
use crate::error::{AppError, AppResult};

/// Request-scoped caller identity. The user id is resolved upstream and
/// trusted as-is; no credentials are checked here.
#[derive(Debug, Clone)]
pub struct ViewerContext {
    pub user_id: Option<DocumentId>,
    pub request_id: String,
}

impl ViewerContext {
    pub fn new(user_id: Option<DocumentId>, request_id: impl Into<String>) -> Self {
        ViewerContext {
            user_id,
            request_id: request_id.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// The caller's user id, or `Unauthorized` for anonymous requests.
    pub fn require_user(&self) -> AppResult<DocumentId> {
        self.user_id.ok_or_else(|| {
            AppError::Unauthorized(format!("request {} has no resolved identity", self.request_id))
        })
    }
}
