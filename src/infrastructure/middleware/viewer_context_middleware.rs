// ViewerContext Middleware - injects the pre-resolved caller identity into request extensions

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::DocumentId;
use crate::infrastructure::viewer::ViewerContext;

/// Header carrying the caller's user id, set by the upstream auth gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn viewer_context_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let viewer_context = viewer_from_headers(request.headers())?;
    request.extensions_mut().insert(Arc::new(viewer_context));
    Ok(next.run(request).await)
}

fn viewer_from_headers(headers: &HeaderMap) -> Result<ViewerContext, StatusCode> {
    let user_id = match headers.get(USER_ID_HEADER) {
        Some(value) => {
            let raw = value.to_str().map_err(|_| StatusCode::BAD_REQUEST)?;
            Some(raw.parse::<DocumentId>().map_err(|_| StatusCode::BAD_REQUEST)?)
        }
        None => None,
    };

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()));

    Ok(ViewerContext::new(user_id, request_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_from_trusted_header() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc"));

        let vc = viewer_from_headers(&headers).unwrap();
        assert_eq!(vc.user_id, Some(DocumentId(42)));
        assert_eq!(vc.request_id, "abc");
    }

    #[test]
    fn test_missing_header_gives_anonymous_viewer() {
        let vc = viewer_from_headers(&HeaderMap::new()).unwrap();
        assert!(vc.user_id.is_none());
        assert!(vc.request_id.starts_with("req-"));
    }

    #[test]
    fn test_malformed_user_id_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("admin"));
        assert_eq!(viewer_from_headers(&headers).unwrap_err(), StatusCode::BAD_REQUEST);
    }
}
