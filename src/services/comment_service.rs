use serde_json::Value;
use tracing::{info, instrument};

use super::{finish_transaction, GraphContext};
use crate::core::DocumentId;
use crate::error::{AppError, AppResult};
use crate::infrastructure::document_store::{fetch, to_document, Patch};
use crate::models::{fields, Collection, Comment, CommentLinks};

/// Comment lifecycle. Each mutation keeps `Post.comments` and
/// `User.comments` in the same transaction as the comment itself.
#[derive(Clone)]
pub struct CommentService {
    ctx: GraphContext,
}

impl CommentService {
    pub fn new(ctx: GraphContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, content), fields(post_id = %post_id, author_id = %author_id))]
    pub async fn create_comment(
        &self,
        post_id: DocumentId,
        author_id: DocumentId,
        content: &str,
    ) -> AppResult<Comment> {
        let comment = Comment::new(self.ctx.ids.next_id(), author_id, post_id, content);
        let document = to_document(&comment).map_err(|e| AppError::write("encode comment", e))?;

        let mut tx = self.ctx.begin().await?;
        let outcome = async {
            tx.insert(Collection::Comments, document)
                .await
                .map_err(|e| AppError::write(format!("insert comment {}", comment.id), e))?;

            let on_post = tx
                .update_fields(
                    Collection::Posts,
                    post_id,
                    &Patch::new().push(fields::COMMENTS, comment.id),
                )
                .await
                .map_err(|e| AppError::write(format!("link comment {} to post", comment.id), e))?;
            if !on_post {
                return Err(AppError::NotFound(format!("post {}", post_id)));
            }

            let on_author = tx
                .update_fields(
                    Collection::Users,
                    author_id,
                    &Patch::new().push(fields::COMMENTS, comment.id),
                )
                .await
                .map_err(|e| AppError::write(format!("link comment {} to author", comment.id), e))?;
            if !on_author {
                return Err(AppError::WriteFailure(format!(
                    "author {} does not exist",
                    author_id
                )));
            }
            Ok(())
        }
        .await;
        finish_transaction(tx, outcome).await?;

        info!(comment_id = %comment.id, "comment created");
        Ok(comment)
    }

    #[instrument(skip(self, content), fields(comment_id = %comment_id))]
    pub async fn update_comment(&self, comment_id: DocumentId, content: &str) -> AppResult<Comment> {
        let patch = Patch::new().set(fields::CONTENT, Value::String(content.to_string()));
        let matched = self
            .ctx
            .store()
            .update_fields(Collection::Comments, comment_id, &patch)
            .await
            .map_err(|e| AppError::write(format!("update comment {}", comment_id), e))?;
        if !matched {
            return Err(AppError::NotFound(format!("comment {}", comment_id)));
        }

        fetch::<Comment>(self.ctx.store(), comment_id)
            .await
            .map_err(|e| AppError::read(format!("comment {}", comment_id), e))?
            .ok_or_else(|| AppError::NotFound(format!("comment {}", comment_id)))
    }

    /// Delete one comment and pull it from its post and its author.
    #[instrument(skip(self), fields(comment_id = %comment_id))]
    pub async fn delete_comment(&self, comment_id: DocumentId) -> AppResult<()> {
        let links = fetch::<CommentLinks>(self.ctx.store(), comment_id)
            .await
            .map_err(|e| AppError::read(format!("comment {}", comment_id), e))?
            .ok_or_else(|| AppError::NotFound(format!("comment {}", comment_id)))?;

        let mut tx = self.ctx.begin().await?;
        let outcome = async {
            let deleted = tx
                .delete_by_id(Collection::Comments, comment_id)
                .await
                .map_err(|e| AppError::write(format!("delete comment {}", comment_id), e))?;
            if !deleted {
                return Err(AppError::NotFound(format!("comment {}", comment_id)));
            }

            let unlink = Patch::new().pull(fields::COMMENTS, comment_id);
            if let Some(post_id) = links.post {
                tx.update_fields(Collection::Posts, post_id, &unlink)
                    .await
                    .map_err(|e| AppError::write(format!("unlink comment from post {}", post_id), e))?;
            }
            tx.update_fields(Collection::Users, links.author, &unlink)
                .await
                .map_err(|e| {
                    AppError::write(format!("unlink comment from author {}", links.author), e)
                })?;
            Ok(())
        }
        .await;
        finish_transaction(tx, outcome).await?;

        info!("comment deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CascadeMode;
    use crate::core::DocumentIdGenerator;
    use crate::infrastructure::{DocumentStore, MemoryDocumentStore, StoreOp};
    use crate::models::{Post, User};
    use std::sync::Arc;

    async fn setup() -> (MemoryDocumentStore, CommentService, Post) {
        let store = MemoryDocumentStore::new();
        let mut ana = User::new(DocumentId(1), "ana");
        let post = Post::new(DocumentId(10), ana.id, "arta", "salut");
        ana.posts.push(post.id);
        store.insert(Collection::Users, to_document(&ana).unwrap()).await.unwrap();
        store.insert(Collection::Posts, to_document(&post).unwrap()).await.unwrap();

        let ctx = GraphContext::new(
            Arc::new(store.clone()),
            DocumentIdGenerator::new(2).unwrap(),
            CascadeMode::Transactional,
        );
        (store, CommentService::new(ctx), post)
    }

    #[tokio::test]
    async fn test_create_and_delete_keep_both_back_links() {
        let (store, comments, post) = setup().await;
        let comment = comments.create_comment(post.id, DocumentId(1), "bravo").await.unwrap();

        let stored_post = fetch::<Post>(&store, post.id).await.unwrap().unwrap();
        let ana = fetch::<User>(&store, DocumentId(1)).await.unwrap().unwrap();
        assert_eq!(stored_post.comments, vec![comment.id]);
        assert_eq!(ana.comments, vec![comment.id]);

        comments.delete_comment(comment.id).await.unwrap();

        let stored_post = fetch::<Post>(&store, post.id).await.unwrap().unwrap();
        let ana = fetch::<User>(&store, DocumentId(1)).await.unwrap().unwrap();
        assert!(stored_post.comments.is_empty());
        assert!(ana.comments.is_empty());
        assert_eq!(store.count(Collection::Comments).await, 0);
    }

    #[tokio::test]
    async fn test_comment_on_missing_post_is_not_found() {
        let (store, comments, _) = setup().await;
        let err = comments
            .create_comment(DocumentId(77), DocumentId(1), "bravo")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(store.count(Collection::Comments).await, 0);
    }

    #[tokio::test]
    async fn test_failed_author_link_rolls_back_comment() {
        let (store, comments, post) = setup().await;
        store.fail_next(StoreOp::UpdateFields, Collection::Users);

        let err = comments
            .create_comment(post.id, DocumentId(1), "bravo")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::WriteFailure(_)));

        let stored_post = fetch::<Post>(&store, post.id).await.unwrap().unwrap();
        assert!(stored_post.comments.is_empty());
        assert_eq!(store.count(Collection::Comments).await, 0);
    }

    #[tokio::test]
    async fn test_update_comment_changes_content_only() {
        let (_, comments, post) = setup().await;
        let comment = comments.create_comment(post.id, DocumentId(1), "bravo").await.unwrap();

        let updated = comments.update_comment(comment.id, "foarte bine").await.unwrap();
        assert_eq!(updated.content, "foarte bine");
        assert_eq!(updated.created_at, comment.created_at);
        assert_eq!(updated.post, Some(post.id));
    }
}
