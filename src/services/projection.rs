// Read Projection Layer - assembles a post with its comments and comment authors inlined

use futures::future::try_join_all;
use std::sync::Arc;

use crate::core::DocumentId;
use crate::error::{AppError, AppResult, DataIntegrityWarning};
use crate::infrastructure::document_store::{fetch, DocumentStore};
use crate::models::{AuthorSummary, Comment, CommentView, Post, PostView};

#[derive(Clone)]
pub struct PostProjector {
    store: Arc<dyn DocumentStore>,
}

impl PostProjector {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn post_view(&self, post: Post) -> AppResult<PostView> {
        let comments = self.resolve_comments(post.id, &post.comments).await?;
        Ok(PostView {
            id: post.id,
            content: post.content,
            created_at: post.created_at,
            author: post.author,
            for_page: post.for_page,
            comments,
        })
    }

    /// Resolve comments concurrently, keeping the post's comment order.
    /// Comments that no longer resolve are logged and left out.
    pub async fn resolve_comments(
        &self,
        post_id: DocumentId,
        comment_ids: &[DocumentId],
    ) -> AppResult<Vec<CommentView>> {
        let lookups = comment_ids
            .iter()
            .map(|&comment_id| self.resolve_comment(post_id, comment_id));
        let resolved = try_join_all(lookups).await?;
        Ok(resolved.into_iter().flatten().collect())
    }

    async fn resolve_comment(
        &self,
        post_id: DocumentId,
        comment_id: DocumentId,
    ) -> AppResult<Option<CommentView>> {
        let comment = fetch::<Comment>(self.store.as_ref(), comment_id)
            .await
            .map_err(|e| AppError::read(format!("comment {}", comment_id), e))?;

        let Some(comment) = comment else {
            DataIntegrityWarning::DanglingComment { post_id, comment_id }.log();
            return Ok(None);
        };

        let author = fetch::<AuthorSummary>(self.store.as_ref(), comment.author)
            .await
            .map_err(|e| AppError::read(format!("author {}", comment.author), e))?;

        if author.is_none() {
            DataIntegrityWarning::MissingCommentAuthor {
                comment_id,
                author_id: comment.author,
            }
            .log();
        }

        Ok(Some(CommentView {
            id: comment.id,
            content: comment.content,
            created_at: comment.created_at,
            author,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::document_store::to_document;
    use crate::infrastructure::{MemoryDocumentStore, StoreOp};
    use crate::models::{Collection, User};

    async fn seed(store: &MemoryDocumentStore) -> Post {
        let ana = User::new(DocumentId(1), "ana");
        store.insert(Collection::Users, to_document(&ana).unwrap()).await.unwrap();

        let mut post = Post::new(DocumentId(10), ana.id, "arta", "salut");
        for (id, text) in [(21, "primul"), (22, "al doilea")] {
            let comment = Comment::new(DocumentId(id), ana.id, post.id, text);
            store
                .insert(Collection::Comments, to_document(&comment).unwrap())
                .await
                .unwrap();
            post.comments.push(comment.id);
        }
        post
    }

    #[tokio::test]
    async fn test_dangling_comment_is_omitted() {
        let store = MemoryDocumentStore::new();
        let mut post = seed(&store).await;
        post.comments.insert(1, DocumentId(99));

        let projector = PostProjector::new(Arc::new(store));
        let view = projector.post_view(post).await.unwrap();

        let ids: Vec<DocumentId> = view.comments.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![DocumentId(21), DocumentId(22)]);
        assert_eq!(
            view.comments[0].author,
            Some(AuthorSummary { id: DocumentId(1), username: "ana".into() })
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_a_read_failure() {
        let store = MemoryDocumentStore::new();
        let post = seed(&store).await;
        store.fail_next(StoreOp::FindById, Collection::Comments);

        let projector = PostProjector::new(Arc::new(store));
        let err = projector.post_view(post).await.unwrap_err();
        assert!(matches!(err, AppError::ReadFailure(_)));
    }
}
