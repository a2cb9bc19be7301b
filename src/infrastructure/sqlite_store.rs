use async_trait::async_trait;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions,
};
use sqlx::{QueryBuilder, Row, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::document_store::{
    document_id, is_field_name, project, Document, DocumentStore, DocumentTransaction, FieldOp,
    Filter, Patch, Projection, StoreError, StoreResult,
};
use crate::core::DocumentId;
use crate::models::Collection;

/// SQLite implementation of the document store. One table per collection,
/// each row holding the JSON body of one document.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

/// Positional bind value for generated SQL.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Text(String),
    Int(i64),
}

impl SqliteDocumentStore {
    /// Connect and create the collection tables if needed.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let in_memory = database_url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Backend(format!("Invalid database url {}: {}", database_url, e)))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        if !in_memory {
            if let Some(parent) = std::path::Path::new(database_file(database_url)).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        StoreError::Backend(format!("Failed to create data directory: {}", e))
                    })?;
                }
            }
        }

        // Every in-memory connection is a separate database
        let max_connections = if in_memory { 1 } else { max_connections.max(1) };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to SQLite: {}", e)))?;

        let store = Self { pool };
        store.initialize().await?;
        info!(url = database_url, max_connections, "document store ready");
        Ok(store)
    }

    pub async fn new_in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Create the collection tables
    pub async fn initialize(&self) -> StoreResult<()> {
        for collection in Collection::ALL {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, body TEXT NOT NULL)",
                collection.as_str()
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::Backend(format!(
                    "Failed to create {} table: {}",
                    collection.as_str(),
                    e
                ))
            })?;
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_for_page ON posts(json_extract(body, '$.forPage'))",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("Failed to create posts page index: {}", e)))?;

        Ok(())
    }
}

/// File path part of a `sqlite:` url.
fn database_file(database_url: &str) -> &str {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    path.split('?').next().unwrap_or(path)
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Text(text) => query.bind(text.clone()),
            SqlValue::Int(int) => query.bind(*int),
        };
    }
    query
}

fn insert_sql(collection: Collection, document: &Document) -> StoreResult<(String, Vec<SqlValue>)> {
    let id = document_id(document)?;
    Ok((
        format!("INSERT INTO {} (id, body) VALUES (?, ?)", collection.as_str()),
        vec![SqlValue::Int(id.value()), SqlValue::Text(document.to_string())],
    ))
}

/// Translate a patch into one UPDATE built from nested SQLite JSON functions,
/// so the whole patch lands atomically.
fn update_sql(
    collection: Collection,
    id: DocumentId,
    patch: &Patch,
) -> StoreResult<(String, Vec<SqlValue>)> {
    patch.validate()?;

    let mut expr = "body".to_string();
    let mut binds = Vec::new();

    for (field, op) in patch.ops() {
        let path = format!("$.{}", field);
        match op {
            FieldOp::Set(value) => {
                expr = format!("json_set({}, ?, json(?))", expr);
                binds.push(SqlValue::Text(path));
                binds.push(SqlValue::Text(value.to_string()));
            }
            // A missing list starts out empty
            FieldOp::Push(item) => {
                expr = format!(
                    "json_set({}, ?, json(json_insert(coalesce(json_extract(body, ?), '[]'), '$[#]', ?)))",
                    expr
                );
                binds.push(SqlValue::Text(path.clone()));
                binds.push(SqlValue::Text(path));
                binds.push(SqlValue::Int(item.value()));
            }
            FieldOp::Pull(item) => {
                expr = format!(
                    "json_set({}, ?, json((SELECT coalesce(json_group_array(value), '[]') \
                     FROM json_each(body, ?) WHERE value <> ?)))",
                    expr
                );
                binds.push(SqlValue::Text(path.clone()));
                binds.push(SqlValue::Text(path));
                binds.push(SqlValue::Int(item.value()));
            }
        }
    }

    binds.push(SqlValue::Int(id.value()));
    Ok((
        format!("UPDATE {} SET body = {} WHERE id = ?", collection.as_str(), expr),
        binds,
    ))
}

fn delete_sql(collection: Collection, id: DocumentId) -> (String, Vec<SqlValue>) {
    (
        format!("DELETE FROM {} WHERE id = ?", collection.as_str()),
        vec![SqlValue::Int(id.value())],
    )
}

/// `WHERE` clause for a field match. The path is a literal so that
/// expression indexes such as `idx_posts_for_page` can serve the query.
fn field_eq_sql(field: &str) -> StoreResult<String> {
    if !is_field_name(field) {
        return Err(StoreError::InvalidDocument(format!(
            "invalid field name '{}'",
            field
        )));
    }
    Ok(format!(" WHERE json_extract(body, '$.{}') = ", field))
}

fn filter_value(value: &Value) -> StoreResult<SqlValue> {
    match value {
        Value::String(text) => Ok(SqlValue::Text(text.clone())),
        Value::Bool(flag) => Ok(SqlValue::Int(*flag as i64)),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::Int)
            .ok_or_else(|| StoreError::InvalidDocument(format!("unsupported filter number {}", number))),
        other => Err(StoreError::InvalidDocument(format!(
            "unsupported filter value {}",
            other
        ))),
    }
}

fn parse_body(body: &str) -> StoreResult<Document> {
    serde_json::from_str(body).map_err(|e| StoreError::Serialization(format!("Corrupt document body: {}", e)))
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_by_id(
        &self,
        collection: Collection,
        id: DocumentId,
        projection: Projection,
    ) -> StoreResult<Option<Document>> {
        let row = sqlx::query(&format!("SELECT body FROM {} WHERE id = ?", collection.as_str()))
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                StoreError::Backend(format!("Failed to get {} {}: {}", collection.as_str(), id, e))
            })?;

        match row {
            Some(row) => {
                let body: String = row
                    .try_get("body")
                    .map_err(|e| StoreError::Backend(format!("Failed to read body: {}", e)))?;
                Ok(Some(project(parse_body(&body)?, projection)))
            }
            None => Ok(None),
        }
    }

    async fn find_many(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<Document>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT body FROM {}", collection.as_str()));

        match filter {
            Filter::All => {}
            Filter::FieldEq(field, value) => {
                qb.push(field_eq_sql(field)?);
                match filter_value(value)? {
                    SqlValue::Text(text) => qb.push_bind(text),
                    SqlValue::Int(int) => qb.push_bind(int),
                };
            }
            Filter::IdIn(ids) => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                qb.push(" WHERE id IN (");
                let mut separated = qb.separated(",");
                for id in ids {
                    separated.push_bind(id.value());
                }
                qb.push(")");
            }
        }

        qb.push(" ORDER BY id");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(|e| {
            StoreError::Backend(format!("Failed to query {}: {}", collection.as_str(), e))
        })?;

        rows.into_iter()
            .map(|row| {
                let body: String = row
                    .try_get("body")
                    .map_err(|e| StoreError::Backend(format!("Failed to read body: {}", e)))?;
                parse_body(&body)
            })
            .collect()
    }

    async fn insert(&self, collection: Collection, document: Document) -> StoreResult<()> {
        let (sql, binds) = insert_sql(collection, &document)?;
        bind_values(sqlx::query(&sql), &binds)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::Backend(format!("Failed to insert into {}: {}", collection.as_str(), e))
            })?;
        Ok(())
    }

    async fn update_fields(
        &self,
        collection: Collection,
        id: DocumentId,
        patch: &Patch,
    ) -> StoreResult<bool> {
        let (sql, binds) = update_sql(collection, id, patch)?;
        let result = bind_values(sqlx::query(&sql), &binds)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::Backend(format!("Failed to update {} {}: {}", collection.as_str(), id, e))
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_id(&self, collection: Collection, id: DocumentId) -> StoreResult<bool> {
        let (sql, binds) = delete_sql(collection, id);
        let result = bind_values(sqlx::query(&sql), &binds)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::Backend(format!("Failed to delete {} {}: {}", collection.as_str(), id, e))
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn DocumentTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Database health check failed: {}", e)))?;
        Ok(())
    }
}

/// Transaction wrapper for document operations
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl DocumentTransaction for SqliteTransaction {
    async fn insert(&mut self, collection: Collection, document: Document) -> StoreResult<()> {
        let (sql, binds) = insert_sql(collection, &document)?;
        bind_values(sqlx::query(&sql), &binds)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                StoreError::Backend(format!(
                    "Failed to insert into {} in transaction: {}",
                    collection.as_str(),
                    e
                ))
            })?;
        Ok(())
    }

    async fn update_fields(
        &mut self,
        collection: Collection,
        id: DocumentId,
        patch: &Patch,
    ) -> StoreResult<bool> {
        let (sql, binds) = update_sql(collection, id, patch)?;
        let result = bind_values(sqlx::query(&sql), &binds)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                StoreError::Backend(format!(
                    "Failed to update {} {} in transaction: {}",
                    collection.as_str(),
                    id,
                    e
                ))
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_id(&mut self, collection: Collection, id: DocumentId) -> StoreResult<bool> {
        let (sql, binds) = delete_sql(collection, id);
        let result = bind_values(sqlx::query(&sql), &binds)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                StoreError::Backend(format!(
                    "Failed to delete {} {} in transaction: {}",
                    collection.as_str(),
                    id,
                    e
                ))
            })?;
        Ok(result.rows_affected() > 0)
    }

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to commit transaction: {}", e)))
    }

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to rollback transaction: {}", e)))
    }
}
