use std::sync::Arc;

use bytes::Bytes;
use relay_log::LogError;
use relay_metrics::Point;
use tokio::sync::mpsc;

use crate::extractors::SourceType;
use crate::http::BackendResponse;
use crate::services::backend::{Backend, TimeSeriesSender};
use crate::services::poster::{PostError, WriteContext};
use crate::statsd::RelayCounters;

/// A parsed write request, ready to be delivered to all backends.
#[derive(Debug)]
pub struct WriteRequest {
    /// Serialized batches for time-series backends.
    pub batches: Vec<Bytes>,
    /// Parsed points for hierarchy backends.
    pub points: Arc<[Point]>,
    pub context: WriteContext,
    pub machine_id: String,
    pub source_type: SourceType,
}

/// Starts delivery of a request to every backend concurrently.
///
/// Every batch is sent to every time-series backend in its own task. The returned channel yields
/// the responses of these deliveries as they complete and closes when all of them have finished.
/// Hierarchy backends do not produce responses.
pub fn fan_out(
    relay: &Arc<str>,
    backends: &[Backend],
    request: WriteRequest,
) -> mpsc::Receiver<BackendResponse> {
    let time_series = backends
        .iter()
        .filter(|b| matches!(b, Backend::TimeSeries(_)))
        .count();

    let (tx, rx) = mpsc::channel((time_series * request.batches.len()).max(1));
    let context = Arc::new(request.context);

    for backend in backends {
        match backend {
            Backend::TimeSeries(sender) => {
                for batch in &request.batches {
                    tokio::spawn(deliver(
                        relay.clone(),
                        sender.clone(),
                        batch.clone(),
                        context.clone(),
                        tx.clone(),
                    ));
                }
            }
            Backend::Hierarchy(poster) => {
                let relay = relay.clone();
                let poster = poster.clone();
                let points = request.points.clone();
                let machine_id = request.machine_id.clone();
                let source_type = request.source_type;

                tokio::spawn(async move {
                    if let Err(error) = poster.push(&points, &machine_id, source_type).await {
                        log_failure(&relay, poster.name(), &error);
                    }
                });
            }
        }
    }

    rx
}

async fn deliver(
    relay: Arc<str>,
    sender: TimeSeriesSender,
    batch: Bytes,
    context: Arc<WriteContext>,
    tx: mpsc::Sender<BackendResponse>,
) {
    match sender.deliver(batch, &context).await {
        Ok(response) => {
            if response.is_server_error() {
                relay_log::error!(
                    "{} response for relay {relay:?} backend {:?}",
                    response.status,
                    sender.name()
                );
                relay_statsd::metric!(
                    counter(RelayCounters::BackendFailure) += 1,
                    backend = sender.name(),
                    reason = "status",
                );
            }
            // The receiver is gone once the response has been reconciled.
            tx.send(response).await.ok();
        }
        Err(error) => log_failure(&relay, sender.name(), &error),
    }
}

fn log_failure(relay: &str, backend: &str, error: &PostError) {
    relay_log::error!(
        "problem posting to relay {relay:?} backend {backend:?}: {}",
        LogError(error)
    );

    let reason = match error {
        PostError::BufferFull(_) => "buffer_full",
        _ => "network",
    };
    relay_statsd::metric!(
        counter(RelayCounters::BackendFailure) += 1,
        backend = backend,
        reason = reason,
    );
}

/// Drains the responses of an acknowledged request and reports failed deliveries.
pub async fn drain_acknowledged(relay: Arc<str>, mut responses: mpsc::Receiver<BackendResponse>) {
    while let Some(response) = responses.recv().await {
        if !response.is_success() {
            relay_log::warn!(
                "acknowledged write on relay {relay:?} failed with {}",
                response.status
            );
            relay_statsd::metric!(
                counter(RelayCounters::AcknowledgedFailure) += 1,
                relay = &*relay,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use relay_config::BackendConfig;

    use super::*;
    use crate::utils::{Reconciled, reconcile};

    async fn serve_status(status: StatusCode) -> SocketAddr {
        let app = Router::new().route("/write", post(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        addr
    }

    fn backend(addr: SocketAddr) -> Backend {
        let config: BackendConfig = serde_json::from_value(serde_json::json!({
            "location": format!("http://{addr}/write"),
            "type": "influxdb",
        }))
        .unwrap();
        Backend::new(&config).unwrap()
    }

    fn request(batches: &[&'static str]) -> WriteRequest {
        WriteRequest {
            batches: batches.iter().map(|b| Bytes::from_static(b.as_bytes())).collect(),
            points: Arc::from(Vec::new()),
            context: WriteContext {
                query: "db=metrics".to_owned(),
                auth: None,
                org_id: "org".to_owned(),
            },
            machine_id: "m".to_owned(),
            source_type: SourceType::Unix,
        }
    }

    #[tokio::test]
    async fn test_mixed_backends_succeed() {
        let backends = [
            backend(serve_status(StatusCode::SERVICE_UNAVAILABLE).await),
            backend(serve_status(StatusCode::NO_CONTENT).await),
            backend(serve_status(StatusCode::BAD_REQUEST).await),
        ];

        let relay: Arc<str> = Arc::from("test");
        let rx = fan_out(&relay, &backends, request(&["a value=1 1\n", "b value=2 1\n"]));
        assert_eq!(reconcile(rx).await, Reconciled::Success);
    }

    #[tokio::test]
    async fn test_all_backends_fail() {
        let backends = [
            backend(serve_status(StatusCode::SERVICE_UNAVAILABLE).await),
            backend(serve_status(StatusCode::BAD_GATEWAY).await),
        ];

        let relay: Arc<str> = Arc::from("test");
        let rx = fan_out(&relay, &backends, request(&["a value=1 1\n"]));
        assert!(matches!(reconcile(rx).await, Reconciled::ServerError(_)));
    }

    #[tokio::test]
    async fn test_no_batches_closes_channel() {
        let backends = [backend(serve_status(StatusCode::NO_CONTENT).await)];
        let relay: Arc<str> = Arc::from("test");
        let rx = fan_out(&relay, &backends, request(&[]));
        assert_eq!(reconcile(rx).await, Reconciled::Unavailable);
    }
}
