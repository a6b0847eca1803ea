use std::time::Instant;

use axum::RequestExt;
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::statsd::{RelayCounters, RelayTimers};

/// A middleware that records the duration and status of every request.
///
/// Use this with [`axum::middleware::from_fn`].
pub async fn metrics(mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let matched_path = request.extract_parts::<MatchedPath>().await;
    let route = matched_path.as_ref().map_or("unknown", |m| m.as_str());

    let response = next.run(request).await;

    relay_statsd::metric!(
        timer(RelayTimers::RequestsDuration) = start.elapsed(),
        method = method.as_str(),
        route = route,
    );
    relay_statsd::metric!(
        counter(RelayCounters::Requests) += 1,
        method = method.as_str(),
        route = route,
        status_code = response.status().as_str(),
    );

    response
}
