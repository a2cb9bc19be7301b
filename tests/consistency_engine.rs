use std::sync::Arc;

use post_graph::{
    config::CascadeMode,
    core::{DocumentId, DocumentIdGenerator},
    error::{AppError, CascadeStep},
    infrastructure::{document_store::fetch, DocumentStore, MemoryDocumentStore, StoreOp},
    models::{Collection, Comment, Post, User},
    services::{
        CommentService, GraphContext, IntegrityService, PostService, UserService, Violation,
    },
};

struct Graph {
    store: MemoryDocumentStore,
    posts: PostService,
    comments: CommentService,
    users: UserService,
    integrity: IntegrityService,
}

fn graph(mode: CascadeMode) -> Graph {
    let store = MemoryDocumentStore::new();
    let ctx = GraphContext::new(
        Arc::new(store.clone()),
        DocumentIdGenerator::new(7).unwrap(),
        mode,
    );
    Graph {
        store,
        posts: PostService::new(ctx.clone()),
        comments: CommentService::new(ctx.clone()),
        users: UserService::new(ctx.clone()),
        integrity: IntegrityService::new(ctx),
    }
}

async fn user(g: &Graph, id: DocumentId) -> User {
    fetch::<User>(&g.store, id).await.unwrap().unwrap()
}

async fn exists<T: post_graph::models::DocumentModel>(g: &Graph, id: DocumentId) -> bool {
    fetch::<T>(&g.store, id).await.unwrap().is_some()
}

#[tokio::test]
async fn test_create_post_links_author() {
    let g = graph(CascadeMode::Transactional);
    let ana = g.users.create_user("ana").await.unwrap();

    let post = g.posts.create_post(ana.id, "arta", "primul articol").await.unwrap();

    assert!(exists::<Post>(&g, post.id).await);
    assert_eq!(user(&g, ana.id).await.posts, vec![post.id]);
    assert!(post.comments.is_empty());
}

#[tokio::test]
async fn test_create_post_is_atomic_when_author_link_fails() {
    let g = graph(CascadeMode::Transactional);
    let ana = g.users.create_user("ana").await.unwrap();
    g.store.fail_next(StoreOp::UpdateFields, Collection::Users);

    let err = g.posts.create_post(ana.id, "arta", "text").await.unwrap_err();

    assert!(matches!(err, AppError::WriteFailure(_)));
    assert_eq!(g.store.count(Collection::Posts).await, 0);
    assert!(user(&g, ana.id).await.posts.is_empty());
}

#[tokio::test]
async fn test_failed_commit_leaves_no_post() {
    let g = graph(CascadeMode::Transactional);
    let ana = g.users.create_user("ana").await.unwrap();
    g.store.fail_nth(StoreOp::Commit, None, 0);

    let err = g.posts.create_post(ana.id, "arta", "text").await.unwrap_err();

    assert!(matches!(err, AppError::WriteFailure(_)));
    assert_eq!(g.store.count(Collection::Posts).await, 0);
}

async fn post_with_comments(g: &Graph) -> (Post, Vec<(User, Comment)>) {
    let author = g.users.create_user("autor").await.unwrap();
    let post = g.posts.create_post(author.id, "istorie", "despre daci").await.unwrap();

    let mut commented = Vec::new();
    for name in ["ion", "maria", "radu"] {
        let commenter = g.users.create_user(name).await.unwrap();
        let comment = g
            .comments
            .create_comment(post.id, commenter.id, &format!("parerea lui {}", name))
            .await
            .unwrap();
        commented.push((commenter, comment));
    }
    (post, commented)
}

async fn assert_cascade_complete(g: &Graph, post: &Post, commented: &[(User, Comment)]) {
    assert!(!exists::<Post>(g, post.id).await);
    assert!(!user(g, post.author).await.posts.contains(&post.id));
    for (commenter, comment) in commented {
        assert!(!exists::<Comment>(g, comment.id).await);
        assert!(!user(g, commenter.id).await.comments.contains(&comment.id));
    }
}

#[tokio::test]
async fn test_delete_cascade_is_complete_in_both_modes() {
    for mode in [CascadeMode::Staged, CascadeMode::Transactional] {
        let g = graph(mode);
        let (post, commented) = post_with_comments(&g).await;

        g.posts.delete_post(post.id).await.unwrap();

        assert_cascade_complete(&g, &post, &commented).await;
        assert!(g.integrity.audit().await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn test_delete_missing_post_is_not_found_without_writes() {
    for mode in [CascadeMode::Staged, CascadeMode::Transactional] {
        let g = graph(mode);
        let before = g.store.write_count();

        let err = g.posts.delete_post(DocumentId(12345)).await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(g.store.write_count(), before);
    }
}

#[tokio::test]
async fn test_get_post_projects_comments_in_order() {
    let g = graph(CascadeMode::Transactional);
    let (post, commented) = post_with_comments(&g).await;

    let view = g.posts.get_post(post.id).await.unwrap();

    let ids: Vec<DocumentId> = view.comments.iter().map(|c| c.id).collect();
    let expected: Vec<DocumentId> = commented.iter().map(|(_, c)| c.id).collect();
    assert_eq!(ids, expected);

    for (view, (commenter, _)) in view.comments.iter().zip(&commented) {
        let author = view.author.as_ref().unwrap();
        assert_eq!(author.id, commenter.id);
        assert_eq!(author.username, commenter.username);
    }

    // Only {id, username} of the comment author is exposed
    let json = serde_json::to_value(&view).unwrap();
    let author = json["comments"][0]["author"].as_object().unwrap();
    let mut keys: Vec<&str> = author.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["id", "username"]);
}

#[tokio::test]
async fn test_update_post_preserves_comments() {
    let g = graph(CascadeMode::Transactional);
    let (post, _) = post_with_comments(&g).await;
    let before = g.posts.get_post(post.id).await.unwrap();

    let after = g.posts.update_post(post.id, "text nou").await.unwrap();

    assert_eq!(after.content, "text nou");
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(after.author, before.author);
    assert_eq!(after.comments, before.comments);
}

#[tokio::test]
async fn test_failed_update_keeps_original_content() {
    let g = graph(CascadeMode::Transactional);
    let ana = g.users.create_user("ana").await.unwrap();
    let post = g.posts.create_post(ana.id, "arta", "original").await.unwrap();
    g.store.fail_next(StoreOp::UpdateFields, Collection::Posts);

    let err = g.posts.update_post(post.id, "nou").await.unwrap_err();

    assert!(matches!(err, AppError::WriteFailure(_)));
    assert_eq!(g.posts.get_post(post.id).await.unwrap().content, "original");
}

#[tokio::test]
async fn test_concurrent_double_delete_has_one_winner() {
    for mode in [CascadeMode::Staged, CascadeMode::Transactional] {
        let g = graph(mode);
        let (post, commented) = post_with_comments(&g).await;

        let (first, second) = tokio::join!(g.posts.delete_post(post.id), g.posts.delete_post(post.id));

        let outcomes = [first, second];
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        let not_found = outcomes
            .iter()
            .filter(|r| matches!(r, Err(AppError::NotFound(_))))
            .count();
        assert_eq!((successes, not_found), (1, 1), "mode {}", mode);

        assert_cascade_complete(&g, &post, &commented).await;
    }
}

#[tokio::test]
async fn test_staged_delete_reports_partial_cascade_and_repair_fixes_it() {
    let g = graph(CascadeMode::Staged);
    let (post, commented) = post_with_comments(&g).await;

    // Second comment delete fails after the post is already gone
    g.store.fail_nth(StoreOp::DeleteById, Some(Collection::Comments), 1);

    let err = g.posts.delete_post(post.id).await.unwrap_err();
    let AppError::PartialCascadeFailure(report) = err else {
        panic!("expected a partial cascade, got {:?}", err);
    };
    assert_eq!(report.post_id, post.id);
    assert_eq!(
        report.failed_steps.iter().map(|f| f.step.clone()).collect::<Vec<_>>(),
        vec![CascadeStep::DeleteComment {
            comment_id: commented[1].1.id
        }]
    );

    // Everything else was still attempted
    assert!(!exists::<Post>(&g, post.id).await);
    assert!(!exists::<Comment>(&g, commented[2].1.id).await);
    assert!(exists::<Comment>(&g, commented[1].1.id).await);
    assert!(!g.integrity.audit().await.unwrap().is_consistent());

    let repair = g.integrity.repair().await.unwrap();
    assert_eq!(repair.failed, 0);
    assert_cascade_complete(&g, &post, &commented).await;
    assert!(g.integrity.audit().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_staged_delete_reports_failed_author_unlink() {
    let g = graph(CascadeMode::Staged);
    let (post, commented) = post_with_comments(&g).await;

    // The first user update is the post author's unlink
    g.store.fail_nth(StoreOp::UpdateFields, Some(Collection::Users), 0);

    let err = g.posts.delete_post(post.id).await.unwrap_err();
    let AppError::PartialCascadeFailure(report) = err else {
        panic!("expected a partial cascade, got {:?}", err);
    };
    assert_eq!(
        report.failed_steps.iter().map(|f| f.step.clone()).collect::<Vec<_>>(),
        vec![CascadeStep::UnlinkPostFromAuthor {
            author_id: post.author
        }]
    );

    // Comment steps still ran
    assert!(!exists::<Post>(&g, post.id).await);
    for (commenter, comment) in &commented {
        assert!(!exists::<Comment>(&g, comment.id).await);
        assert!(!user(&g, commenter.id).await.comments.contains(&comment.id));
    }
    assert!(user(&g, post.author).await.posts.contains(&post.id));

    let audit = g.integrity.audit().await.unwrap();
    assert_eq!(
        audit.violations,
        vec![Violation::StalePostBacklink {
            user_id: post.author,
            post_id: post.id
        }]
    );

    let repair = g.integrity.repair().await.unwrap();
    assert_eq!(repair.failed, 0);
    assert_cascade_complete(&g, &post, &commented).await;
    assert!(g.integrity.audit().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_staged_delete_reports_failed_comment_author_unlink() {
    let g = graph(CascadeMode::Staged);
    let (post, commented) = post_with_comments(&g).await;
    let (first_commenter, first_comment) = &commented[0];

    g.store.fail_nth(StoreOp::UpdateFields, Some(Collection::Users), 1);

    let err = g.posts.delete_post(post.id).await.unwrap_err();
    let AppError::PartialCascadeFailure(report) = err else {
        panic!("expected a partial cascade, got {:?}", err);
    };
    assert_eq!(
        report.failed_steps.iter().map(|f| f.step.clone()).collect::<Vec<_>>(),
        vec![CascadeStep::UnlinkCommentFromAuthor {
            comment_id: first_comment.id,
            author_id: first_commenter.id
        }]
    );

    // The comment itself and every later step went through
    assert!(!exists::<Post>(&g, post.id).await);
    assert!(!user(&g, post.author).await.posts.contains(&post.id));
    assert!(!exists::<Comment>(&g, first_comment.id).await);
    assert!(user(&g, first_commenter.id).await.comments.contains(&first_comment.id));
    assert_cascade_complete(&g, &post, &commented[1..]).await;

    let audit = g.integrity.audit().await.unwrap();
    assert_eq!(
        audit.violations,
        vec![Violation::StaleCommentBacklink {
            user_id: first_commenter.id,
            comment_id: first_comment.id
        }]
    );

    let repair = g.integrity.repair().await.unwrap();
    assert_eq!(repair.failed, 0);
    assert_cascade_complete(&g, &post, &commented).await;
    assert!(g.integrity.audit().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_transactional_delete_rolls_back_on_failure() {
    let g = graph(CascadeMode::Transactional);
    let (post, commented) = post_with_comments(&g).await;
    g.store.fail_nth(StoreOp::DeleteById, Some(Collection::Comments), 1);

    let err = g.posts.delete_post(post.id).await.unwrap_err();

    assert!(matches!(err, AppError::WriteFailure(_)));
    let view = g.posts.get_post(post.id).await.unwrap();
    assert_eq!(view.comments.len(), commented.len());
    assert!(user(&g, post.author).await.posts.contains(&post.id));
    assert!(g.integrity.audit().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_delete_skips_dangling_comment_refs() {
    let g = graph(CascadeMode::Transactional);
    let (post, commented) = post_with_comments(&g).await;

    // Remove one comment behind the engine's back
    g.store
        .delete_by_id(Collection::Comments, commented[0].1.id)
        .await
        .unwrap();

    let view = g.posts.get_post(post.id).await.unwrap();
    assert_eq!(view.comments.len(), 2);

    g.posts.delete_post(post.id).await.unwrap();
    assert_cascade_complete(&g, &post, &commented[1..]).await;

    // The vanished comment's author link is left for repair
    let report = g.integrity.audit().await.unwrap();
    assert_eq!(report.violations.len(), 1);
    g.integrity.repair().await.unwrap();
    assert!(g.integrity.audit().await.unwrap().is_consistent());
}
