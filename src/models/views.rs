// Read views assembled from normalized documents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{fields, Collection, DocumentModel};
use crate::core::DocumentId;
use crate::infrastructure::document_store::Projection;

/// The only author fields a read view ever exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSummary {
    pub id: DocumentId,
    pub username: String,
}

impl DocumentModel for AuthorSummary {
    const COLLECTION: Collection = Collection::Users;
    const PROJECTION: Projection = Projection::Fields(&[fields::USERNAME]);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: DocumentId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// `None` when the comment's author no longer resolves.
    pub author: Option<AuthorSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: DocumentId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: DocumentId,
    pub for_page: String,
    pub comments: Vec<CommentView>,
}

/// Page listing entry: `{id, content, createdAt, author}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub id: DocumentId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: DocumentId,
}

impl DocumentModel for PostSummary {
    const COLLECTION: Collection = Collection::Posts;
    const PROJECTION: Projection =
        Projection::Fields(&[fields::CONTENT, fields::CREATED_AT, fields::AUTHOR]);
}
