//! Handles write requests in the InfluxDB line protocol.

use std::io::Read;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use flate2::read::GzDecoder;
use futures::StreamExt;
use relay_log::LogError;
use relay_metrics::{ParsePointError, ParsePrecisionError, parse_points};

use crate::extractors::{Identity, WriteQuery};
use crate::service::RelayState;
use crate::services::fanout::{WriteRequest, drain_acknowledged, fan_out};
use crate::services::poster::WriteContext;
use crate::statsd::{RelayCounters, RelayDistributions};
use crate::utils::{ApiErrorResponse, BufferPool, PooledBuffer, reconcile, split_points};

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("problem reading request body")]
    ReadBody(#[source] axum::Error),

    #[error("problem reading request body")]
    BodyTooLarge,

    #[error("unable to decode gzip body")]
    Gzip(#[source] std::io::Error),

    #[error("invalid precision")]
    Precision(#[from] ParsePrecisionError),

    #[error("unable to parse points")]
    Parse(#[from] ParsePointError),

    #[error("cannot find Gocky headers")]
    Unauthorized,

    #[error("missing parameter: db")]
    MissingDb,
}

impl WriteError {
    fn status(&self) -> StatusCode {
        match self {
            Self::ReadBody(_) | Self::BodyTooLarge => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::Gzip(_) | Self::Precision(_) | Self::Parse(_) | Self::MissingDb => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::ReadBody(_) | Self::BodyTooLarge => "body",
            Self::Gzip(_) => "gzip",
            Self::Precision(_) | Self::Parse(_) => "parse",
            Self::Unauthorized => "unauthorized",
            Self::MissingDb => "missing_db",
        }
    }
}

impl IntoResponse for WriteError {
    fn into_response(self) -> Response {
        (self.status(), ApiErrorResponse::with_detail(self.to_string())).into_response()
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as i64)
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"))
}

/// Reads the request body into a pooled buffer, decompressing it if needed.
async fn read_body(
    pool: &BufferPool,
    body: Body,
    gzip: bool,
    limit: usize,
) -> Result<PooledBuffer, WriteError> {
    let mut raw = pool.get();
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(WriteError::ReadBody)?;
        if raw.len() + chunk.len() > limit {
            return Err(WriteError::BodyTooLarge);
        }
        raw.extend_from_slice(&chunk);
    }

    if !gzip {
        return Ok(raw);
    }

    let mut decoded = pool.get();
    GzDecoder::new(raw.as_slice())
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(WriteError::Gzip)?;

    if decoded.len() > limit {
        return Err(WriteError::BodyTooLarge);
    }

    Ok(decoded)
}

async fn write(
    state: &RelayState,
    identity: Identity,
    mut query: WriteQuery,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, WriteError> {
    let config = state.config();

    let body = read_body(state.pool(), body, is_gzip(headers), config.max_body_size).await?;
    relay_statsd::metric!(distribution(RelayDistributions::RequestBodySize) = body.len() as u64);

    let precision = query.precision()?;
    let points = parse_points(&body, now_nanos(), precision)?;
    drop(body);

    let batches = split_points(&points, precision, config.split_request_per_datapoints);

    if identity.machine_id.is_none() && config.drop_unauthorized {
        return Err(WriteError::Unauthorized);
    }

    let max_datapoints = config.max_datapoints_per_request;
    if max_datapoints > 0 && batches.datapoints > max_datapoints {
        relay_log::warn!(
            "payload too large for resource {}, number of datapoints: {}",
            identity.machine(),
            batches.datapoints
        );
        relay_statsd::metric!(
            counter(RelayCounters::RequestsRejected) += 1,
            relay = state.name(),
            reason = "too_large",
        );
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    relay_log::info!(
        "request for resource: {}, number of metrics: {}, number of datapoints: {}",
        identity.machine(),
        batches.series,
        batches.datapoints
    );

    if let Some(metering) = state.metering() {
        metering.record(&identity.org_id, identity.machine(), points.len() as u64);
    }

    if state.has_time_series() && query.db().is_none() {
        return Err(WriteError::MissingDb);
    }

    if batches.batches.is_empty() && !state.has_hierarchy() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    relay_statsd::metric!(
        counter(RelayCounters::DatapointsReceived) += batches.datapoints as i64,
        relay = state.name(),
    );
    relay_statsd::metric!(
        distribution(RelayDistributions::RequestDatapoints) = batches.datapoints as u64,
        relay = state.name(),
    );
    relay_statsd::metric!(
        distribution(RelayDistributions::RequestBatches) = batches.batches.len() as u64,
        relay = state.name(),
    );

    query.default_retention_policy(config.default_retention_policy.as_deref());

    let request = WriteRequest {
        batches: batches.batches,
        points: points.into(),
        context: WriteContext {
            query: query.encode(),
            auth: identity.auth,
            org_id: identity.org_id,
        },
        machine_id: identity.machine_id.unwrap_or_default(),
        source_type: identity.source_type,
    };

    let relay: Arc<str> = Arc::from(state.name());
    let responses = fan_out(&relay, state.backends(), request);

    // Hierarchy stores do not respond, so their deliveries cannot be reconciled.
    if config.assume_success || state.has_hierarchy() {
        tokio::spawn(drain_acknowledged(relay, responses));
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok(reconcile(responses).await.into_response())
}

/// Accepts line protocol and delivers it to all outputs of the relay.
pub async fn handle(
    State(state): State<RelayState>,
    identity: Identity,
    query: WriteQuery,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let error = match write(&state, identity, query, &headers, body).await {
        Ok(response) => return response,
        Err(error) => error,
    };

    relay_statsd::metric!(
        counter(RelayCounters::RequestsRejected) += 1,
        relay = state.name(),
        reason = error.reason(),
    );

    if error.status().is_server_error() {
        relay_log::error!("rejected write on relay {:?}: {}", state.name(), LogError(&error));
        if state.config().assume_success {
            return StatusCode::NO_CONTENT.into_response();
        }
    } else {
        relay_log::debug!("rejected write on relay {:?}: {}", state.name(), LogError(&error));
    }

    error.into_response()
}

fn allow_post() -> [(header::HeaderName, HeaderValue); 1] {
    [(header::ALLOW, HeaderValue::from_static("POST"))]
}

/// Answers preflight requests to the write endpoint.
pub async fn options() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, allow_post())
}

/// Rejects all methods other than `POST` and `OPTIONS`.
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        allow_post(),
        ApiErrorResponse::with_detail("invalid write method"),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_read_plain_body() {
        let pool = BufferPool::new(2);
        let body = read_body(&pool, Body::from("cpu value=1\n"), false, 1024)
            .await
            .unwrap();
        assert_eq!(body.as_slice(), b"cpu value=1\n");
    }

    #[tokio::test]
    async fn test_read_gzip_body() {
        let pool = BufferPool::new(2);
        let body = read_body(&pool, Body::from(gzip(b"cpu value=1\n")), true, 1024)
            .await
            .unwrap();
        assert_eq!(body.as_slice(), b"cpu value=1\n");

        // The compressed buffer went back to the pool.
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_read_invalid_gzip() {
        let pool = BufferPool::new(2);
        let error = read_body(&pool, Body::from("not gzip"), true, 1024)
            .await
            .unwrap_err();
        assert!(matches!(error, WriteError::Gzip(_)));
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let pool = BufferPool::new(2);
        let error = read_body(&pool, Body::from("cpu value=1\n"), false, 4)
            .await
            .unwrap_err();
        assert!(matches!(error, WriteError::BodyTooLarge));

        let compressed = gzip(&[b'a'; 64]);
        let error = read_body(&pool, Body::from(compressed), true, 32)
            .await
            .unwrap_err();
        assert!(matches!(error, WriteError::BodyTooLarge));
    }

    #[test]
    fn test_gzip_header() {
        let mut headers = HeaderMap::new();
        assert!(!is_gzip(&headers));
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("GZIP"));
        assert!(is_gzip(&headers));
    }
}
