// Post consistency engine - creates, updates and deletes posts while keeping
// author back-references and owned comments in step.

use futures::future::try_join_all;
use serde_json::Value;
use tracing::{error, info, instrument};

use super::{finish_transaction, GraphContext, PostProjector};
use crate::config::CascadeMode;
use crate::core::DocumentId;
use crate::error::{
    AppError, AppResult, CascadeReport, CascadeStep, DataIntegrityWarning, FailedCascadeStep,
};
use crate::infrastructure::document_store::{
    fetch, fetch_many, to_document, DocumentTransaction, Filter, Patch,
};
use crate::models::{
    fields, Collection, CommentLinks, Post, PostLinks, PostSummary, PostView, UserCommentLinks,
    UserPostLinks,
};

/// Everything a post delete has to touch, resolved before the first write.
#[derive(Debug, Clone, PartialEq)]
struct CascadePlan {
    post_id: DocumentId,
    /// `None` when the post's author no longer resolves.
    author_id: Option<DocumentId>,
    comments: Vec<CommentCascade>,
}

#[derive(Debug, Clone, PartialEq)]
struct CommentCascade {
    comment_id: DocumentId,
    exists: bool,
    author_id: Option<DocumentId>,
}

#[derive(Clone)]
pub struct PostService {
    ctx: GraphContext,
    projector: PostProjector,
}

impl PostService {
    pub fn new(ctx: GraphContext) -> Self {
        let projector = PostProjector::new(ctx.store.clone());
        Self { ctx, projector }
    }

    /// Insert a post and append it to its author's `posts` in one transaction.
    #[instrument(skip(self, content), fields(author_id = %author_id, page = %page))]
    pub async fn create_post(
        &self,
        author_id: DocumentId,
        page: &str,
        content: &str,
    ) -> AppResult<Post> {
        let post = Post::new(self.ctx.ids.next_id(), author_id, page, content);
        let document = to_document(&post).map_err(|e| AppError::write("encode post", e))?;

        let mut tx = self.ctx.begin().await?;
        let outcome = async {
            tx.insert(Collection::Posts, document)
                .await
                .map_err(|e| AppError::write(format!("insert post {}", post.id), e))?;

            let linked = tx
                .update_fields(
                    Collection::Users,
                    author_id,
                    &Patch::new().push(fields::POSTS, post.id),
                )
                .await
                .map_err(|e| AppError::write(format!("link post {} to author", post.id), e))?;
            if !linked {
                return Err(AppError::WriteFailure(format!(
                    "author {} does not exist",
                    author_id
                )));
            }
            Ok(())
        }
        .await;
        finish_transaction(tx, outcome).await?;

        info!(post_id = %post.id, "post created");
        Ok(post)
    }

    #[instrument(skip(self), fields(post_id = %post_id))]
    pub async fn get_post(&self, post_id: DocumentId) -> AppResult<PostView> {
        let post = self.load_post(post_id).await?;
        self.projector.post_view(post).await
    }

    /// Posts of a page in creation order.
    #[instrument(skip(self))]
    pub async fn get_posts_by_page(&self, page: &str) -> AppResult<Vec<PostSummary>> {
        let filter = Filter::FieldEq(fields::FOR_PAGE, Value::String(page.to_string()));
        fetch_many::<PostSummary>(self.ctx.store(), &filter)
            .await
            .map_err(|e| AppError::read(format!("posts of page {}", page), e))
    }

    /// Replace the content only, then return the refreshed view.
    #[instrument(skip(self, content), fields(post_id = %post_id))]
    pub async fn update_post(&self, post_id: DocumentId, content: &str) -> AppResult<PostView> {
        let patch = Patch::new().set(fields::CONTENT, Value::String(content.to_string()));
        let matched = self
            .ctx
            .store()
            .update_fields(Collection::Posts, post_id, &patch)
            .await
            .map_err(|e| AppError::write(format!("update post {}", post_id), e))?;
        if !matched {
            return Err(AppError::NotFound(format!("post {}", post_id)));
        }

        let post = self.load_post(post_id).await?;
        self.projector.post_view(post).await
    }

    /// Delete a post, its comments, and every back-reference to them.
    #[instrument(skip(self), fields(post_id = %post_id, mode = %self.ctx.cascade_mode))]
    pub async fn delete_post(&self, post_id: DocumentId) -> AppResult<()> {
        let links = fetch::<PostLinks>(self.ctx.store(), post_id)
            .await
            .map_err(|e| AppError::read(format!("post {}", post_id), e))?
            .ok_or_else(|| AppError::NotFound(format!("post {}", post_id)))?;

        let plan = self.plan_cascade(links).await?;

        match self.ctx.cascade_mode {
            CascadeMode::Staged => self.cascade_staged(&plan).await?,
            CascadeMode::Transactional => self.cascade_transactional(&plan).await?,
        }

        info!(comments = plan.comments.len(), "post deleted");
        Ok(())
    }

    async fn load_post(&self, post_id: DocumentId) -> AppResult<Post> {
        fetch::<Post>(self.ctx.store(), post_id)
            .await
            .map_err(|e| AppError::read(format!("post {}", post_id), e))?
            .ok_or_else(|| AppError::NotFound(format!("post {}", post_id)))
    }

    /// Resolve the author and every comment's author. Reads only.
    async fn plan_cascade(&self, links: PostLinks) -> AppResult<CascadePlan> {
        let store = self.ctx.store();
        let post_id = links.id;

        let author = fetch::<UserPostLinks>(store, links.author)
            .await
            .map_err(|e| AppError::read(format!("author {}", links.author), e))?;
        if author.is_none() {
            DataIntegrityWarning::MissingPostAuthor {
                post_id,
                author_id: links.author,
            }
            .log();
        }

        let comments = try_join_all(links.comments.iter().map(|&comment_id| async move {
            let comment = fetch::<CommentLinks>(store, comment_id)
                .await
                .map_err(|e| AppError::read(format!("comment {}", comment_id), e))?;

            let Some(comment) = comment else {
                DataIntegrityWarning::DanglingComment {
                    post_id,
                    comment_id,
                }
                .log();
                return Ok::<_, AppError>(CommentCascade {
                    comment_id,
                    exists: false,
                    author_id: None,
                });
            };

            let commenter = fetch::<UserCommentLinks>(store, comment.author)
                .await
                .map_err(|e| AppError::read(format!("author {}", comment.author), e))?;
            if commenter.is_none() {
                DataIntegrityWarning::MissingCommentAuthor {
                    comment_id,
                    author_id: comment.author,
                }
                .log();
            }

            Ok(CommentCascade {
                comment_id,
                exists: true,
                author_id: commenter.map(|user| user.id),
            })
        }))
        .await?;

        Ok(CascadePlan {
            post_id,
            author_id: author.map(|user| user.id),
            comments,
        })
    }

    /// Post first, then each back-link and comment in sequence order. Steps
    /// after the post delete are all attempted; failures are collected.
    async fn cascade_staged(&self, plan: &CascadePlan) -> AppResult<()> {
        let store = self.ctx.store();
        let post_id = plan.post_id;

        let deleted = store
            .delete_by_id(Collection::Posts, post_id)
            .await
            .map_err(|e| AppError::write(format!("delete post {}", post_id), e))?;
        if !deleted {
            info!("post already deleted by a concurrent request");
            return Err(AppError::NotFound(format!("post {}", post_id)));
        }

        let mut failed_steps = Vec::new();

        if let Some(author_id) = plan.author_id {
            let unlink = Patch::new().pull(fields::POSTS, post_id);
            if let Err(e) = store.update_fields(Collection::Users, author_id, &unlink).await {
                failed_steps.push(FailedCascadeStep {
                    step: CascadeStep::UnlinkPostFromAuthor { author_id },
                    reason: e.to_string(),
                });
            }
        }

        for comment in &plan.comments {
            if let Some(author_id) = comment.author_id {
                let unlink = Patch::new().pull(fields::COMMENTS, comment.comment_id);
                if let Err(e) = store.update_fields(Collection::Users, author_id, &unlink).await {
                    failed_steps.push(FailedCascadeStep {
                        step: CascadeStep::UnlinkCommentFromAuthor {
                            comment_id: comment.comment_id,
                            author_id,
                        },
                        reason: e.to_string(),
                    });
                }
            }

            if comment.exists {
                if let Err(e) = store.delete_by_id(Collection::Comments, comment.comment_id).await {
                    failed_steps.push(FailedCascadeStep {
                        step: CascadeStep::DeleteComment {
                            comment_id: comment.comment_id,
                        },
                        reason: e.to_string(),
                    });
                }
            }
        }

        if failed_steps.is_empty() {
            return Ok(());
        }

        error!(
            kind = "partial_cascade",
            failed = failed_steps.len(),
            "post deleted but cascade incomplete; run repair"
        );
        Err(AppError::PartialCascadeFailure(CascadeReport {
            post_id,
            failed_steps,
        }))
    }

    /// The post delete and the full cascade in one transaction.
    async fn cascade_transactional(&self, plan: &CascadePlan) -> AppResult<()> {
        let mut tx = self.ctx.begin().await?;
        let outcome = apply_cascade(tx.as_mut(), plan).await;
        finish_transaction(tx, outcome).await
    }
}

async fn apply_cascade(tx: &mut dyn DocumentTransaction, plan: &CascadePlan) -> AppResult<()> {
    let post_id = plan.post_id;

    let deleted = tx
        .delete_by_id(Collection::Posts, post_id)
        .await
        .map_err(|e| AppError::write(format!("delete post {}", post_id), e))?;
    if !deleted {
        info!("post already deleted by a concurrent request");
        return Err(AppError::NotFound(format!("post {}", post_id)));
    }

    if let Some(author_id) = plan.author_id {
        tx.update_fields(
            Collection::Users,
            author_id,
            &Patch::new().pull(fields::POSTS, post_id),
        )
        .await
        .map_err(|e| AppError::write(format!("unlink post from author {}", author_id), e))?;
    }

    for comment in &plan.comments {
        if let Some(author_id) = comment.author_id {
            tx.update_fields(
                Collection::Users,
                author_id,
                &Patch::new().pull(fields::COMMENTS, comment.comment_id),
            )
            .await
            .map_err(|e| {
                AppError::write(
                    format!("unlink comment {} from author {}", comment.comment_id, author_id),
                    e,
                )
            })?;
        }

        if comment.exists {
            tx.delete_by_id(Collection::Comments, comment.comment_id)
                .await
                .map_err(|e| AppError::write(format!("delete comment {}", comment.comment_id), e))?;
        }
    }

    Ok(())
}
