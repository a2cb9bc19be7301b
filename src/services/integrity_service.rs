// Integrity audit and repair.
// Scans every collection, reports broken back-references and fixes the ones
// that have an unambiguous fix. Meant to run while writes are quiet, e.g.
// after a partial cascade.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};

use super::GraphContext;
use crate::core::DocumentId;
use crate::error::{AppError, AppResult};
use crate::infrastructure::document_store::{fetch_many, Filter, Patch};
use crate::models::{fields, Collection, Comment, Post, User};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// Post's author exists but does not list the post.
    MissingPostBacklink { post_id: DocumentId, author_id: DocumentId },
    PostAuthorMissing { post_id: DocumentId, author_id: DocumentId },
    /// `User.posts` names a post that is gone or belongs to someone else.
    StalePostBacklink { user_id: DocumentId, post_id: DocumentId },
    DanglingCommentRef { post_id: DocumentId, comment_id: DocumentId },
    MissingCommentBacklink { comment_id: DocumentId, author_id: DocumentId },
    CommentAuthorMissing { comment_id: DocumentId, author_id: DocumentId },
    StaleCommentBacklink { user_id: DocumentId, comment_id: DocumentId },
    /// A comment no post owns. `author_id` is set when the author still exists.
    OrphanedComment { comment_id: DocumentId, author_id: Option<DocumentId> },
    /// Several posts list the same comment; `keep` is the owner that stays.
    SharedComment { comment_id: DocumentId, keep: DocumentId, others: Vec<DocumentId> },
}

impl Violation {
    /// Violations repair cannot fix without inventing data.
    pub fn is_repairable(&self) -> bool {
        !matches!(
            self,
            Violation::PostAuthorMissing { .. } | Violation::CommentAuthorMissing { .. }
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub users: usize,
    pub posts: usize,
    pub comments: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub violations_found: usize,
    pub repaired: usize,
    pub unresolved: usize,
    pub failed: usize,
}

struct Snapshot {
    users: BTreeMap<DocumentId, User>,
    posts: BTreeMap<DocumentId, Post>,
    comments: BTreeMap<DocumentId, Comment>,
}

#[derive(Clone)]
pub struct IntegrityService {
    ctx: GraphContext,
}

impl IntegrityService {
    pub fn new(ctx: GraphContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn audit(&self) -> AppResult<AuditReport> {
        let snapshot = self.snapshot().await?;
        let violations = find_violations(&snapshot);

        if violations.is_empty() {
            info!("reference graph is consistent");
        } else {
            warn!(kind = "data_integrity", violations = violations.len(), "audit found violations");
        }

        Ok(AuditReport {
            users: snapshot.users.len(),
            posts: snapshot.posts.len(),
            comments: snapshot.comments.len(),
            violations,
        })
    }

    /// Audit, then apply one fix per repairable violation. Each fix is a single
    /// idempotent write, so a failed run can simply be repeated.
    #[instrument(skip(self))]
    pub async fn repair(&self) -> AppResult<RepairReport> {
        let audit = self.audit().await?;
        let mut report = RepairReport {
            violations_found: audit.violations.len(),
            ..RepairReport::default()
        };

        for violation in &audit.violations {
            if !violation.is_repairable() {
                report.unresolved += 1;
                continue;
            }
            match self.fix(violation).await {
                Ok(()) => report.repaired += 1,
                Err(e) => {
                    warn!(error = %e, ?violation, "repair step failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            repaired = report.repaired,
            unresolved = report.unresolved,
            failed = report.failed,
            "repair finished"
        );
        Ok(report)
    }

    async fn snapshot(&self) -> AppResult<Snapshot> {
        let store = self.ctx.store();
        let users = fetch_many::<User>(store, &Filter::All)
            .await
            .map_err(|e| AppError::read("scan users", e))?;
        let posts = fetch_many::<Post>(store, &Filter::All)
            .await
            .map_err(|e| AppError::read("scan posts", e))?;
        let comments = fetch_many::<Comment>(store, &Filter::All)
            .await
            .map_err(|e| AppError::read("scan comments", e))?;

        Ok(Snapshot {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            posts: posts.into_iter().map(|p| (p.id, p)).collect(),
            comments: comments.into_iter().map(|c| (c.id, c)).collect(),
        })
    }

    async fn fix(&self, violation: &Violation) -> AppResult<()> {
        match violation {
            Violation::MissingPostBacklink { post_id, author_id } => {
                self.patch(Collection::Users, *author_id, Patch::new().push(fields::POSTS, *post_id))
                    .await
            }
            Violation::StalePostBacklink { user_id, post_id } => {
                self.patch(Collection::Users, *user_id, Patch::new().pull(fields::POSTS, *post_id))
                    .await
            }
            Violation::DanglingCommentRef { post_id, comment_id } => {
                self.patch(
                    Collection::Posts,
                    *post_id,
                    Patch::new().pull(fields::COMMENTS, *comment_id),
                )
                .await
            }
            Violation::MissingCommentBacklink { comment_id, author_id } => {
                self.patch(
                    Collection::Users,
                    *author_id,
                    Patch::new().push(fields::COMMENTS, *comment_id),
                )
                .await
            }
            Violation::StaleCommentBacklink { user_id, comment_id } => {
                self.patch(
                    Collection::Users,
                    *user_id,
                    Patch::new().pull(fields::COMMENTS, *comment_id),
                )
                .await
            }
            Violation::OrphanedComment { comment_id, author_id } => {
                if let Some(author_id) = author_id {
                    self.patch(
                        Collection::Users,
                        *author_id,
                        Patch::new().pull(fields::COMMENTS, *comment_id),
                    )
                    .await?;
                }
                self.ctx
                    .store()
                    .delete_by_id(Collection::Comments, *comment_id)
                    .await
                    .map_err(|e| AppError::write(format!("delete orphan {}", comment_id), e))?;
                Ok(())
            }
            Violation::SharedComment { comment_id, others, .. } => {
                for post_id in others {
                    self.patch(
                        Collection::Posts,
                        *post_id,
                        Patch::new().pull(fields::COMMENTS, *comment_id),
                    )
                    .await?;
                }
                Ok(())
            }
            Violation::PostAuthorMissing { .. } | Violation::CommentAuthorMissing { .. } => Ok(()),
        }
    }

    async fn patch(&self, collection: Collection, id: DocumentId, patch: Patch) -> AppResult<()> {
        // A target that vanished since the audit needs no fix
        self.ctx
            .store()
            .update_fields(collection, id, &patch)
            .await
            .map_err(|e| AppError::write(format!("repair {} {}", collection.as_str(), id), e))?;
        Ok(())
    }
}

fn find_violations(snapshot: &Snapshot) -> Vec<Violation> {
    let mut violations = Vec::new();

    // Posts and their authors
    for post in snapshot.posts.values() {
        match snapshot.users.get(&post.author) {
            None => violations.push(Violation::PostAuthorMissing {
                post_id: post.id,
                author_id: post.author,
            }),
            Some(author) if !author.posts.contains(&post.id) => {
                violations.push(Violation::MissingPostBacklink {
                    post_id: post.id,
                    author_id: author.id,
                })
            }
            Some(_) => {}
        }
    }

    for user in snapshot.users.values() {
        for post_id in &user.posts {
            let owned = snapshot
                .posts
                .get(post_id)
                .is_some_and(|post| post.author == user.id);
            if !owned {
                violations.push(Violation::StalePostBacklink {
                    user_id: user.id,
                    post_id: *post_id,
                });
            }
        }
    }

    // Comment ownership, in post id order so the oldest owner is kept
    let mut owners: HashMap<DocumentId, Vec<DocumentId>> = HashMap::new();
    for post in snapshot.posts.values() {
        for comment_id in &post.comments {
            if snapshot.comments.contains_key(comment_id) {
                let posts = owners.entry(*comment_id).or_default();
                if !posts.contains(&post.id) {
                    posts.push(post.id);
                }
            } else {
                violations.push(Violation::DanglingCommentRef {
                    post_id: post.id,
                    comment_id: *comment_id,
                });
            }
        }
    }

    for comment in snapshot.comments.values() {
        let author = snapshot.users.get(&comment.author);

        let Some(posts) = owners.get(&comment.id) else {
            violations.push(Violation::OrphanedComment {
                comment_id: comment.id,
                author_id: author.map(|a| a.id),
            });
            continue;
        };

        if posts.len() > 1 {
            let keep = comment
                .post
                .filter(|p| posts.contains(p))
                .unwrap_or(posts[0]);
            violations.push(Violation::SharedComment {
                comment_id: comment.id,
                keep,
                others: posts.iter().copied().filter(|p| *p != keep).collect(),
            });
        }

        match author {
            None => violations.push(Violation::CommentAuthorMissing {
                comment_id: comment.id,
                author_id: comment.author,
            }),
            Some(author) if !author.comments.contains(&comment.id) => {
                violations.push(Violation::MissingCommentBacklink {
                    comment_id: comment.id,
                    author_id: author.id,
                })
            }
            Some(_) => {}
        }
    }

    for user in snapshot.users.values() {
        for comment_id in &user.comments {
            let owned = snapshot
                .comments
                .get(comment_id)
                .is_some_and(|comment| comment.author == user.id);
            if !owned {
                violations.push(Violation::StaleCommentBacklink {
                    user_id: user.id,
                    comment_id: *comment_id,
                });
            }
        }
    }

    violations
}
