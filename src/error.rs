use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;

use crate::core::DocumentId;
use crate::infrastructure::document_store::StoreError;

/// Generic user-facing messages. Details only ever go to the log.
const GENERIC_ERROR_MESSAGE: &str = "A intervenit o eroare. Te rog să încerci mai târziu.";
const NOT_FOUND_MESSAGE: &str = "Articolul nu a fost găsit.";
const UNAUTHORIZED_MESSAGE: &str = "Autentificare necesară.";
const BAD_REQUEST_MESSAGE: &str = "Cerere invalidă.";

#[derive(Debug)]
pub enum AppError {
    /// Referenced entity id does not resolve. No side effects were performed.
    NotFound(String),
    /// A document write failed. Writes inside a transaction were rolled back.
    WriteFailure(String),
    ReadFailure(String),
    /// The post is gone but some back-link updates or comment deletions did not complete.
    PartialCascadeFailure(CascadeReport),
    Unauthorized(String),
    BadRequest(String),
    ConfigurationError(String),
    Internal(String),
}

impl AppError {
    /// Stable tag for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::WriteFailure(_) => "write_failure",
            AppError::ReadFailure(_) => "read_failure",
            AppError::PartialCascadeFailure(_) => "partial_cascade",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::BadRequest(_) => "bad_request",
            AppError::ConfigurationError(_) => "configuration",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn read(context: impl fmt::Display, err: StoreError) -> Self {
        AppError::ReadFailure(format!("{}: {}", context, err))
    }

    pub fn write(context: impl fmt::Display, err: StoreError) -> Self {
        AppError::WriteFailure(format!("{}: {}", context, err))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::WriteFailure(msg) => write!(f, "Write failure: {}", msg),
            AppError::ReadFailure(msg) => write!(f, "Read failure: {}", msg),
            AppError::PartialCascadeFailure(report) => write!(f, "Partial cascade failure: {}", report),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, BAD_REQUEST_MESSAGE),
            AppError::PartialCascadeFailure(report) => {
                tracing::error!(
                    kind = self.kind(),
                    post_id = %report.post_id,
                    failed_steps = report.failed_steps.len(),
                    "{}",
                    self
                );
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_MESSAGE)
            }
            AppError::WriteFailure(_)
            | AppError::ReadFailure(_)
            | AppError::ConfigurationError(_)
            | AppError::Internal(_) => {
                tracing::error!(kind = self.kind(), "{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_MESSAGE)
            }
        };

        let body = Json(json!({
            "error": error_message,
            "kind": self.kind(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// A cascade step that did not complete after the post itself was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CascadeStep {
    UnlinkPostFromAuthor { author_id: DocumentId },
    UnlinkCommentFromAuthor { comment_id: DocumentId, author_id: DocumentId },
    DeleteComment { comment_id: DocumentId },
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeStep::UnlinkPostFromAuthor { author_id } => {
                write!(f, "unlink post from author {}", author_id)
            }
            CascadeStep::UnlinkCommentFromAuthor { comment_id, author_id } => {
                write!(f, "unlink comment {} from author {}", comment_id, author_id)
            }
            CascadeStep::DeleteComment { comment_id } => write!(f, "delete comment {}", comment_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedCascadeStep {
    pub step: CascadeStep,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub post_id: DocumentId,
    pub failed_steps: Vec<FailedCascadeStep>,
}

impl fmt::Display for CascadeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "post {} deleted, {} step(s) incomplete", self.post_id, self.failed_steps.len())?;
        for failed in &self.failed_steps {
            write!(f, "; {} ({})", failed.step, failed.reason)?;
        }
        Ok(())
    }
}

/// Non-fatal, read-time only: a reference could not be resolved and was
/// omitted from the assembled view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataIntegrityWarning {
    DanglingComment { post_id: DocumentId, comment_id: DocumentId },
    MissingCommentAuthor { comment_id: DocumentId, author_id: DocumentId },
    MissingPostAuthor { post_id: DocumentId, author_id: DocumentId },
}

impl DataIntegrityWarning {
    pub fn log(&self) {
        tracing::warn!(kind = "data_integrity", "{}", self);
    }
}

impl fmt::Display for DataIntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataIntegrityWarning::DanglingComment { post_id, comment_id } => {
                write!(f, "post {} references missing comment {}", post_id, comment_id)
            }
            DataIntegrityWarning::MissingCommentAuthor { comment_id, author_id } => {
                write!(f, "comment {} references missing author {}", comment_id, author_id)
            }
            DataIntegrityWarning::MissingPostAuthor { post_id, author_id } => {
                write!(f, "post {} references missing author {}", post_id, author_id)
            }
        }
    }
}
