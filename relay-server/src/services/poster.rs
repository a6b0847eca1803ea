use std::future::Future;
use std::time::{Duration, Instant};

use axum::http::{HeaderName, HeaderValue, header};
use bytes::Bytes;
use relay_config::BackendConfig;
use reqwest::Url;

use crate::constants;
use crate::http::{BackendResponse, HttpError};
use crate::services::retry_buffer::BufferFull;
use crate::statsd::RelayTimers;

/// Maximum size of a buffered backend response.
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Number of additional attempts of the direct poster after a transport error.
const INLINE_RETRIES: usize = 3;

/// Delay between the inline attempts of the direct poster.
const INLINE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Errors delivering a batch to a backend.
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    /// The location of a backend is not a valid URL.
    #[error("invalid backend location {0:?}")]
    InvalidLocation(String),

    /// The HTTP client could not be created.
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    /// The request failed without a response.
    #[error("request to backend failed")]
    Http(#[from] HttpError),

    /// The retry buffer of the backend is at capacity.
    #[error(transparent)]
    BufferFull(#[from] BufferFull),

    /// The connection to a hierarchy store failed.
    #[error("hierarchy store connection failed")]
    Io(#[from] std::io::Error),
}

impl PostError {
    /// Returns `true` if the backend could not be reached.
    pub fn is_network_error(&self) -> bool {
        match self {
            Self::Http(error) => error.is_network_error(),
            Self::Io(_) => true,
            Self::InvalidLocation(_) | Self::Client(_) | Self::BufferFull(_) => false,
        }
    }
}

/// Everything needed to deliver a batch besides its body.
///
/// The context is stored with buffered batches so that they can be retried later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteContext {
    /// The encoded query string of the original request.
    pub query: String,
    /// The `Authorization` header of the original request.
    pub auth: Option<HeaderValue>,
    /// The organization of the sender.
    pub org_id: String,
}

/// Delivers serialized batches to a single backend.
pub trait Poster: Send + Sync + 'static {
    /// Name of the backend for logs and metrics.
    fn name(&self) -> &str;

    /// Sends one batch and returns the buffered response of the backend.
    ///
    /// Error statuses are returned as responses, only failures to obtain a response are errors.
    fn post(
        &self,
        batch: Bytes,
        context: &WriteContext,
    ) -> impl Future<Output = Result<BackendResponse, PostError>> + Send;
}

/// Posts batches to the write endpoint of a time-series database.
#[derive(Clone, Debug)]
pub struct HttpPoster {
    name: String,
    client: reqwest::Client,
    location: Url,
}

impl HttpPoster {
    pub fn new(config: &BackendConfig) -> Result<Self, PostError> {
        let location = Url::parse(&config.location)
            .map_err(|_| PostError::InvalidLocation(config.location.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.skip_tls_verification)
            .build()
            .map_err(PostError::Client)?;

        Ok(Self {
            name: config.name().to_owned(),
            client,
            location,
        })
    }

    async fn send(
        &self,
        batch: Bytes,
        context: &WriteContext,
    ) -> Result<BackendResponse, PostError> {
        let mut url = self.location.clone();
        url.set_query(Some(&context.query).filter(|q| !q.is_empty()).map(String::as_str));

        let mut request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "text/plain")
            .header(
                HeaderName::from_static(constants::FORWARDED_ORG_ID_HEADER),
                context.org_id.as_str(),
            );

        if let Some(ref auth) = context.auth {
            request = request.header(header::AUTHORIZATION, auth.clone());
        }

        let response = request.body(batch).send().await.map_err(HttpError::from)?;
        Ok(BackendResponse::read(response, MAX_RESPONSE_SIZE).await?)
    }
}

impl Poster for HttpPoster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn post(
        &self,
        batch: Bytes,
        context: &WriteContext,
    ) -> Result<BackendResponse, PostError> {
        let start = Instant::now();
        let result = self.send(batch, context).await;

        let status = match result {
            Ok(ref response) => response.status.as_str().to_owned(),
            Err(_) => "error".to_owned(),
        };
        relay_statsd::metric!(
            timer(RelayTimers::BackendRequestDuration) = start.elapsed(),
            backend = &self.name,
            status_code = &status,
        );

        result
    }
}

/// Posts a batch, retrying transport errors a few times with a fixed delay.
///
/// Responses are never retried, regardless of their status.
pub async fn post_with_retries<P: Poster>(
    poster: &P,
    batch: Bytes,
    context: &WriteContext,
) -> Result<BackendResponse, PostError> {
    let mut result = poster.post(batch.clone(), context).await;

    for _ in 0..INLINE_RETRIES {
        match result {
            Err(ref error) if error.is_network_error() => {
                relay_log::warn!(
                    "retrying to send datapoints to backend {}: {}",
                    poster.name(),
                    relay_log::LogError(error)
                );
                tokio::time::sleep(INLINE_RETRY_DELAY).await;
                result = poster.post(batch.clone(), context).await;
            }
            _ => break,
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::Router;
    use axum::extract::{RawQuery, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use parking_lot::Mutex;
    use relay_config::BackendKind;

    use super::*;

    #[derive(Debug, Default)]
    struct Received {
        query: Option<String>,
        headers: HeaderMap,
        body: Bytes,
    }

    async fn serve_backend(status: StatusCode) -> (SocketAddr, Arc<Mutex<Received>>) {
        let received = Arc::new(Mutex::new(Received::default()));

        async fn write(
            State((status, received)): State<(StatusCode, Arc<Mutex<Received>>)>,
            RawQuery(query): RawQuery,
            headers: HeaderMap,
            body: Bytes,
        ) -> (StatusCode, &'static str) {
            *received.lock() = Received {
                query,
                headers,
                body,
            };
            (status, "{\"error\":\"database not found\"}")
        }

        let app = Router::new()
            .route("/write", post(write))
            .with_state((status, received.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        (addr, received)
    }

    fn backend_config(location: String) -> BackendConfig {
        serde_json::from_value(serde_json::json!({
            "name": "influx1",
            "location": location,
            "type": BackendKind::TimeSeries,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_post_forwards_request() {
        let (addr, received) = serve_backend(StatusCode::NOT_FOUND).await;
        let poster = HttpPoster::new(&backend_config(format!("http://{addr}/write"))).unwrap();

        let context = WriteContext {
            query: "db=metrics&precision=s".to_owned(),
            auth: Some(HeaderValue::from_static("Token secret")),
            org_id: "org-1".to_owned(),
        };
        let response = poster
            .post(Bytes::from_static(b"cpu value=1 1\n"), &context)
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(&response.body[..], b"{\"error\":\"database not found\"}");

        let received = received.lock();
        assert_eq!(received.query.as_deref(), Some("db=metrics&precision=s"));
        assert_eq!(received.headers["x-org-id"], "org-1");
        assert_eq!(received.headers[header::AUTHORIZATION], "Token secret");
        assert_eq!(received.headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(&received.body[..], b"cpu value=1 1\n");
    }

    #[test]
    fn test_invalid_location() {
        let error = HttpPoster::new(&backend_config("not a url".to_owned())).unwrap_err();
        insta::assert_snapshot!(error.to_string(), @r#"invalid backend location "not a url""#);
    }

    struct FlakyPoster {
        failures: Mutex<usize>,
        attempts: Mutex<usize>,
    }

    impl Poster for FlakyPoster {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn post(&self, _: Bytes, _: &WriteContext) -> Result<BackendResponse, PostError> {
            *self.attempts.lock() += 1;
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
            }
            Ok(BackendResponse::accepted())
        }
    }

    fn context() -> WriteContext {
        WriteContext {
            query: String::new(),
            auth: None,
            org_id: "org".to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_retries_recover() {
        let poster = FlakyPoster {
            failures: Mutex::new(2),
            attempts: Mutex::new(0),
        };

        let response = post_with_retries(&poster, Bytes::new(), &context()).await;
        assert!(response.unwrap().is_success());
        assert_eq!(*poster.attempts.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_retries_give_up() {
        let poster = FlakyPoster {
            failures: Mutex::new(10),
            attempts: Mutex::new(0),
        };

        let start = tokio::time::Instant::now();
        let response = post_with_retries(&poster, Bytes::new(), &context()).await;
        assert!(response.is_err());
        assert_eq!(*poster.attempts.lock(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
