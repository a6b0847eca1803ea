//! Responses of time-series backends and the errors of talking to them.
//!
//! A [`BackendResponse`] is fully buffered so that it can be compared against the responses of
//! other backends and written back to the client after all deliveries have been reconciled.

use std::io;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("payload too large")]
    Overflow,
    #[error("could not send request")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed to stream payload")]
    Io(#[from] io::Error),
}

impl HttpError {
    /// Returns `true` if the error indicates a network downtime.
    pub fn is_network_error(&self) -> bool {
        match self {
            Self::Io(_) => true,
            // status codes are never turned into errors, they are part of the response.
            Self::Reqwest(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            Self::Overflow => false,
        }
    }
}

/// A buffered response of a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendResponse {
    pub content_type: Option<HeaderValue>,
    pub content_encoding: Option<HeaderValue>,
    pub status: StatusCode,
    pub body: Bytes,
}

impl BackendResponse {
    /// Creates an empty response with the given status.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            content_type: None,
            content_encoding: None,
            status,
            body: Bytes::new(),
        }
    }

    /// Response reported for a batch that has been accepted for later delivery.
    pub fn accepted() -> Self {
        Self::empty(StatusCode::NO_CONTENT)
    }

    /// Reads the full response from a backend, failing if the body exceeds `limit` bytes.
    pub async fn read(mut response: reqwest::Response, limit: usize) -> Result<Self, HttpError> {
        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let content_encoding = response.headers().get(header::CONTENT_ENCODING).cloned();

        let capacity = response
            .content_length()
            .map_or(0, |len| (len as usize).min(limit));
        let mut body = BytesMut::with_capacity(capacity);

        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(HttpError::Overflow);
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Self {
            content_type,
            content_encoding,
            status,
            body: body.freeze(),
        })
    }

    /// Returns `true` for `2xx` responses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns `true` for `4xx` responses.
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Returns `true` for `5xx` responses.
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }
}

impl IntoResponse for BackendResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        let headers = response.headers_mut();

        headers.remove(header::CONTENT_TYPE);
        if let Some(content_type) = self.content_type {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        if let Some(content_encoding) = self.content_encoding {
            headers.insert(header::CONTENT_ENCODING, content_encoding);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(BackendResponse::accepted().is_success());
        assert!(BackendResponse::empty(StatusCode::BAD_REQUEST).is_client_error());
        assert!(BackendResponse::empty(StatusCode::BAD_GATEWAY).is_server_error());
    }

    #[test]
    fn test_into_response_keeps_headers() {
        let backend = BackendResponse {
            content_type: Some(HeaderValue::from_static("application/json")),
            content_encoding: None,
            status: StatusCode::BAD_REQUEST,
            body: Bytes::from_static(b"{\"error\":\"database not found\"}"),
        };

        let response = backend.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }
}
