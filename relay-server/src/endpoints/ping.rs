use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;

use crate::constants;

/// Health check of the relay, also used by clients to detect the server version.
pub async fn handle() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(
            HeaderName::from_static(constants::VERSION_HEADER),
            HeaderValue::from_static(constants::SERVER),
        )],
    )
}
