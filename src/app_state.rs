use std::sync::Arc;

use crate::{
    config::Config,
    core::DocumentIdGenerator,
    error::AppError,
    infrastructure::{DocumentStore, SqliteDocumentStore},
    services::{CommentService, GraphContext, PostService, UserService},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub posts: PostService,
    pub comments: CommentService,
    pub users: UserService,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store =
            SqliteDocumentStore::connect(&config.database.url, config.database.max_connections)
                .await?;
        let store: Arc<dyn DocumentStore> = Arc::new(store);

        let ids = DocumentIdGenerator::new(config.graph.id_node)
            .ok_or_else(|| {
                AppError::ConfigurationError(format!("invalid id node {}", config.graph.id_node))
            })?;

        let ctx = GraphContext::new(store, ids, config.graph.cascade_mode);
        Ok(Self::from_context(ctx, config))
    }

    /// Build the services over an already opened store.
    pub fn from_context(ctx: GraphContext, config: Config) -> Self {
        Self {
            store: ctx.store.clone(),
            posts: PostService::new(ctx.clone()),
            comments: CommentService::new(ctx.clone()),
            users: UserService::new(ctx),
            config,
        }
    }
}
