// Reference graph audit and repair
//
// Usage: repair_graph [--dry-run]
// Prints the audit (and, unless --dry-run, the repair report) as JSON.

use std::sync::Arc;

use serde_json::json;
use tracing_subscriber::EnvFilter;

use post_graph::{
    config::Config,
    core::DocumentIdGenerator,
    error::AppError,
    infrastructure::SqliteDocumentStore,
    services::{GraphContext, IntegrityService},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let dry_run = std::env::args().skip(1).any(|arg| arg == "--dry-run");
    let config = Config::from_env()?;

    let store =
        SqliteDocumentStore::connect(&config.database.url, config.database.max_connections).await?;
    let ids = DocumentIdGenerator::new(config.graph.id_node)
        .ok_or_else(|| {
            AppError::ConfigurationError(format!("invalid id node {}", config.graph.id_node))
        })?;
    let integrity = IntegrityService::new(GraphContext::new(
        Arc::new(store),
        ids,
        config.graph.cascade_mode,
    ));

    let output = if dry_run {
        let audit = integrity.audit().await?;
        json!({ "dry_run": true, "audit": audit })
    } else {
        let repair = integrity.repair().await?;
        let after = integrity.audit().await?;
        json!({
            "dry_run": false,
            "repair": repair,
            "consistent_after_repair": after.is_consistent(),
            "remaining": after.violations,
        })
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
