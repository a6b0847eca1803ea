use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// An error response of the write API.
///
/// Serializes to `{"error":"<detail>"}` followed by a newline, the format InfluxDB clients expect.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    error: String,
}

impl ApiErrorResponse {
    /// Creates an error response with a detail message.
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            error: detail.into(),
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let mut body = match serde_json::to_string(&self) {
            Ok(body) => body,
            Err(_) => r#"{"error":"no error details"}"#.to_owned(),
        };
        body.push('\n');

        (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            body,
        )
            .into_response()
    }
}
