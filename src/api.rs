// HTTP surface - thin axum handlers over the post graph services

use axum::{
    extract::{FromRequestParts, Path as AxumPath, State},
    http::{request::Parts, StatusCode},
    middleware,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    app_state::AppState,
    core::DocumentId,
    error::{AppError, AppResult},
    infrastructure::middleware::{viewer_context_middleware, Vc},
    models::PostSummary,
};

#[derive(Debug, Deserialize)]
pub struct ContentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

/// `{id}` path segment as a document id. A malformed id is answered with
/// the regular JSON error body instead of axum's plain-text rejection.
#[derive(Debug, Clone, Copy)]
pub struct IdPath(pub DocumentId);

impl<S> FromRequestParts<S> for IdPath
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AxumPath(id) = AxumPath::<i64>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        Ok(IdPath(DocumentId(id)))
    }
}

fn non_empty<'a>(field: &str, value: &'a str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(trimmed)
}

fn created(id: DocumentId) -> (StatusCode, Json<Value>) {
    (
        StatusCode::CREATED,
        Json(json!({"message": "Successfully created.", "id": id})),
    )
}

// Posts

pub async fn get_posts_by_page_handler(
    State(state): State<AppState>,
    AxumPath(page): AxumPath<String>,
) -> AppResult<Json<Vec<PostSummary>>> {
    let posts = state.posts.get_posts_by_page(&page).await?;
    Ok(Json(posts))
}

pub async fn create_post_handler(
    State(state): State<AppState>,
    vc: Vc,
    AxumPath(page): AxumPath<String>,
    Json(req): Json<ContentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let author_id = vc.require_user()?;
    let content = non_empty("content", &req.content)?;
    let post = state.posts.create_post(author_id, &page, content).await?;
    Ok(created(post.id))
}

pub async fn get_post_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    let post = state.posts.get_post(id).await?;
    Ok(Json(json!({ "post": post })))
}

pub async fn update_post_handler(
    State(state): State<AppState>,
    vc: Vc,
    IdPath(id): IdPath,
    Json(req): Json<ContentRequest>,
) -> AppResult<Json<Value>> {
    vc.require_user()?;
    let content = non_empty("content", &req.content)?;
    let post = state.posts.update_post(id, content).await?;
    Ok(Json(json!({ "post": post })))
}

pub async fn delete_post_handler(
    State(state): State<AppState>,
    vc: Vc,
    IdPath(id): IdPath,
) -> AppResult<StatusCode> {
    vc.require_user()?;
    state.posts.delete_post(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Comments

pub async fn create_comment_handler(
    State(state): State<AppState>,
    vc: Vc,
    IdPath(post_id): IdPath,
    Json(req): Json<ContentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let author_id = vc.require_user()?;
    let content = non_empty("content", &req.content)?;
    let comment = state
        .comments
        .create_comment(post_id, author_id, content)
        .await?;
    Ok(created(comment.id))
}

pub async fn update_comment_handler(
    State(state): State<AppState>,
    vc: Vc,
    IdPath(id): IdPath,
    Json(req): Json<ContentRequest>,
) -> AppResult<Json<Value>> {
    vc.require_user()?;
    let content = non_empty("content", &req.content)?;
    let comment = state.comments.update_comment(id, content).await?;
    Ok(Json(json!({ "comment": comment })))
}

pub async fn delete_comment_handler(
    State(state): State<AppState>,
    vc: Vc,
    IdPath(id): IdPath,
) -> AppResult<StatusCode> {
    vc.require_user()?;
    state.comments.delete_comment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Users

/// Registration happens before the caller has an identity, so no viewer is required.
pub async fn create_user_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let username = non_empty("username", &req.username)?;
    let user = state.users.create_user(username).await?;
    Ok(created(user.id))
}

pub async fn get_user_handler(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> AppResult<Json<Value>> {
    let user = state.users.get_user(id).await?;
    Ok(Json(json!({ "user": user })))
}

pub async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state
        .store
        .health_check()
        .await
        .map_err(|e| AppError::read("health check", e))?;
    Ok(Json(json!({"status": "ok"})))
}

/// Every route under `/api`, with the viewer context middleware installed.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/posts/page/{page}",
            get(get_posts_by_page_handler).post(create_post_handler),
        )
        .route(
            "/posts/{id}",
            get(get_post_handler)
                .patch(update_post_handler)
                .delete(delete_post_handler),
        )
        .route("/posts/{id}/comments", post(create_comment_handler))
        .route(
            "/comments/{id}",
            patch(update_comment_handler).delete(delete_comment_handler),
        )
        .route("/users", post(create_user_handler))
        .route("/users/{id}", get(get_user_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(viewer_context_middleware))
        .with_state(state);

    Router::new().nest("/api", api)
}
