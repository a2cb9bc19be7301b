// Reference Graph Model - users, posts and comments with manually maintained back-references
//
// Links between documents:
//   Post.author      -> User   (back-reference: User.posts)
//   Post.comments    -> Comment (owning side, cascades on post delete)
//   Comment.author   -> User   (back-reference: User.comments)
//   Comment.post     -> Post   (informational back-link)

pub mod views;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::core::DocumentId;
use crate::infrastructure::document_store::Projection;

pub use views::{AuthorSummary, CommentView, PostSummary, PostView};

/// The three collections of the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Users,
    Posts,
    Comments,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Users, Collection::Posts, Collection::Comments];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Posts => "posts",
            Collection::Comments => "comments",
        }
    }
}

/// Document field names as stored.
pub mod fields {
    pub const ID: &str = "id";
    pub const USERNAME: &str = "username";
    pub const POSTS: &str = "posts";
    pub const COMMENTS: &str = "comments";
    pub const CONTENT: &str = "content";
    pub const CREATED_AT: &str = "createdAt";
    pub const AUTHOR: &str = "author";
    pub const FOR_PAGE: &str = "forPage";
    pub const POST: &str = "post";

    /// Fields no patch may ever touch.
    pub const IMMUTABLE: [&str; 2] = [ID, CREATED_AT];
}

/// A typed (possibly partial) view of a document in one collection.
pub trait DocumentModel: DeserializeOwned + Send {
    const COLLECTION: Collection;
    const PROJECTION: Projection;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: DocumentId,
    pub username: String,
    #[serde(default)]
    pub posts: Vec<DocumentId>,
    #[serde(default)]
    pub comments: Vec<DocumentId>,
}

impl User {
    pub fn new(id: DocumentId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            posts: Vec::new(),
            comments: Vec::new(),
        }
    }
}

impl DocumentModel for User {
    const COLLECTION: Collection = Collection::Users;
    const PROJECTION: Projection = Projection::All;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: DocumentId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: DocumentId,
    pub for_page: String,
    #[serde(default)]
    pub comments: Vec<DocumentId>,
}

impl Post {
    /// A fresh post always starts without comments.
    pub fn new(
        id: DocumentId,
        author: DocumentId,
        for_page: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            created_at: Utc::now(),
            author,
            for_page: for_page.into(),
            comments: Vec::new(),
        }
    }
}

impl DocumentModel for Post {
    const COLLECTION: Collection = Collection::Posts;
    const PROJECTION: Projection = Projection::All;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: DocumentId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: DocumentId,
    #[serde(default)]
    pub post: Option<DocumentId>,
}

impl Comment {
    pub fn new(
        id: DocumentId,
        author: DocumentId,
        post: DocumentId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            created_at: Utc::now(),
            author,
            post: Some(post),
        }
    }
}

impl DocumentModel for Comment {
    const COLLECTION: Collection = Collection::Comments;
    const PROJECTION: Projection = Projection::All;
}

/// Post projected to its outgoing links only; content is never loaded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostLinks {
    pub id: DocumentId,
    pub author: DocumentId,
    #[serde(default)]
    pub comments: Vec<DocumentId>,
}

impl DocumentModel for PostLinks {
    const COLLECTION: Collection = Collection::Posts;
    const PROJECTION: Projection = Projection::Fields(&[fields::AUTHOR, fields::COMMENTS]);
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommentLinks {
    pub id: DocumentId,
    pub author: DocumentId,
    #[serde(default)]
    pub post: Option<DocumentId>,
}

impl DocumentModel for CommentLinks {
    const COLLECTION: Collection = Collection::Comments;
    const PROJECTION: Projection = Projection::Fields(&[fields::AUTHOR, fields::POST]);
}

/// User projected to `{id, posts}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserPostLinks {
    pub id: DocumentId,
    #[serde(default)]
    pub posts: Vec<DocumentId>,
}

impl DocumentModel for UserPostLinks {
    const COLLECTION: Collection = Collection::Users;
    const PROJECTION: Projection = Projection::Fields(&[fields::POSTS]);
}

/// User projected to `{id, comments}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserCommentLinks {
    pub id: DocumentId,
    #[serde(default)]
    pub comments: Vec<DocumentId>,
}

impl DocumentModel for UserCommentLinks {
    const COLLECTION: Collection = Collection::Users;
    const PROJECTION: Projection = Projection::Fields(&[fields::COMMENTS]);
}
