use axum::http::{Method, StatusCode, Uri};
use axum::response::IntoResponse;

use crate::utils::ApiErrorResponse;

/// An endpoint function that always responds with `404 Not Found`.
pub async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    relay_log::debug!("rejecting {method} request to {}", uri.path());

    (
        StatusCode::NOT_FOUND,
        ApiErrorResponse::with_detail("invalid write endpoint"),
    )
}
