use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;

use crate::http::BackendResponse;
use crate::utils::ApiErrorResponse;

/// The single response returned to a client after fanning out a write.
#[derive(Debug, PartialEq)]
pub enum Reconciled {
    /// At least one delivery succeeded.
    Success,
    /// No delivery succeeded and a backend rejected the data.
    ClientError(BackendResponse),
    /// All backends that responded failed with a server error.
    ///
    /// The client receives `503 Service Unavailable` with the body of the last error.
    ServerError(BackendResponse),
    /// No backend returned a response.
    Unavailable,
}

impl IntoResponse for Reconciled {
    fn into_response(self) -> Response {
        match self {
            Self::Success => StatusCode::NO_CONTENT.into_response(),
            Self::ClientError(response) => response.into_response(),
            Self::ServerError(response) => BackendResponse {
                status: StatusCode::SERVICE_UNAVAILABLE,
                ..response
            }
            .into_response(),
            Self::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiErrorResponse::with_detail("unable to write points"),
            )
                .into_response(),
        }
    }
}

/// Waits for backend responses and picks the one returned to the client.
///
/// Returns as soon as the first `2xx` response arrives. Without a success, the first `4xx`
/// response wins over server errors, and the last `5xx` response wins over no response at all.
/// Total failure is always reported as `503`, see [`Reconciled::ServerError`].
/// Deliveries that failed without a response never send into the channel.
///
/// The function returns without waiting for outstanding deliveries once a success is seen. Their
/// senders keep running and their results are discarded when the receiver is dropped.
pub async fn reconcile(mut responses: mpsc::Receiver<BackendResponse>) -> Reconciled {
    let mut client_error = None;
    let mut server_error = None;

    while let Some(response) = responses.recv().await {
        if response.is_success() {
            return Reconciled::Success;
        } else if response.is_client_error() {
            client_error.get_or_insert(response);
        } else {
            server_error = Some(response);
        }
    }

    match (client_error, server_error) {
        (Some(response), _) => Reconciled::ClientError(response),
        (None, Some(response)) => Reconciled::ServerError(response),
        (None, None) => Reconciled::Unavailable,
    }
}
