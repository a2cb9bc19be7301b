use tracing::{info, instrument};

use super::GraphContext;
use crate::core::DocumentId;
use crate::error::{AppError, AppResult};
use crate::infrastructure::document_store::{fetch, to_document};
use crate::models::{Collection, User};

#[derive(Clone)]
pub struct UserService {
    ctx: GraphContext,
}

impl UserService {
    pub fn new(ctx: GraphContext) -> Self {
        Self { ctx }
    }

    /// New users start with empty `posts` and `comments`.
    #[instrument(skip(self))]
    pub async fn create_user(&self, username: &str) -> AppResult<User> {
        let user = User::new(self.ctx.ids.next_id(), username);
        let document = to_document(&user).map_err(|e| AppError::write("encode user", e))?;

        self.ctx
            .store()
            .insert(Collection::Users, document)
            .await
            .map_err(|e| AppError::write(format!("insert user {}", user.id), e))?;

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_user(&self, user_id: DocumentId) -> AppResult<User> {
        fetch::<User>(self.ctx.store(), user_id)
            .await
            .map_err(|e| AppError::read(format!("user {}", user_id), e))?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CascadeMode;
    use crate::core::DocumentIdGenerator;
    use crate::infrastructure::MemoryDocumentStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_then_get_user() {
        let ctx = GraphContext::new(
            Arc::new(MemoryDocumentStore::new()),
            DocumentIdGenerator::new(3).unwrap(),
            CascadeMode::Transactional,
        );
        let users = UserService::new(ctx);

        let created = users.create_user("maria").await.unwrap();
        let loaded = users.get_user(created.id).await.unwrap();
        assert_eq!(loaded, created);
        assert!(loaded.posts.is_empty() && loaded.comments.is_empty());

        let err = users.get_user(DocumentId(1)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
