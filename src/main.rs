// Post Graph Server

use axum::http::{header, HeaderName, HeaderValue, Method};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use post_graph::{api::create_router, app_state::AppState, config::Config};

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let Some(origin) = config.server.frontend_origin.as_deref() else {
        return Ok(CorsLayer::permissive());
    };

    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-request-id"),
        ]))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let app_state = AppState::new(config.clone()).await?;

    let app = create_router(app_state)
        .layer(cors_layer(&config)?)
        .layer(TraceLayer::new_for_http());

    let addr = config.server_address();
    info!(%addr, cascade_mode = %config.graph.cascade_mode, "post graph server starting");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
