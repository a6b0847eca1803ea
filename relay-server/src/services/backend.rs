use std::sync::Arc;

use bytes::Bytes;
use relay_config::{BackendConfig, BackendKind};
use tokio_util::sync::CancellationToken;

use crate::http::BackendResponse;
use crate::services::hierarchy::HierarchyPoster;
use crate::services::poster::{HttpPoster, PostError, Poster, WriteContext, post_with_retries};
use crate::services::retry_buffer::{RetryBuffer, RetryBufferConfig};

/// Delivery path to a time-series backend.
#[derive(Clone, Debug)]
pub enum TimeSeriesSender {
    /// Posts directly, retrying transport errors inline.
    Direct(HttpPoster),
    /// Posts through a retry buffer.
    Buffered(Arc<RetryBuffer<HttpPoster>>),
}

impl TimeSeriesSender {
    pub fn name(&self) -> &str {
        match self {
            Self::Direct(poster) => poster.name(),
            Self::Buffered(buffer) => buffer.name(),
        }
    }

    /// Delivers one batch.
    pub async fn deliver(
        &self,
        batch: Bytes,
        context: &WriteContext,
    ) -> Result<BackendResponse, PostError> {
        match self {
            Self::Direct(poster) => post_with_retries(poster, batch, context).await,
            Self::Buffered(buffer) => buffer.send(batch, context).await,
        }
    }
}

/// A configured output of an HTTP relay.
#[derive(Clone, Debug)]
pub enum Backend {
    /// A time-series database receiving split line protocol batches.
    TimeSeries(TimeSeriesSender),
    /// A hierarchy store receiving translated records.
    Hierarchy(Arc<HierarchyPoster>),
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Result<Self, PostError> {
        let backend = match config.kind {
            BackendKind::TimeSeries => {
                let poster = HttpPoster::new(config)?;
                let sender = match config.buffer_size_bytes() {
                    0 => TimeSeriesSender::Direct(poster),
                    _ => {
                        let buffer_config = RetryBufferConfig::from_backend(config);
                        let buffer = RetryBuffer::new(poster, buffer_config);
                        TimeSeriesSender::Buffered(Arc::new(buffer))
                    }
                };
                Self::TimeSeries(sender)
            }
            BackendKind::Hierarchy => Self::Hierarchy(Arc::new(HierarchyPoster::new(config))),
        };

        relay_log::info!("new backend {} with type {}", backend.name(), backend.kind());
        Ok(backend)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::TimeSeries(sender) => sender.name(),
            Self::Hierarchy(poster) => poster.name(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::TimeSeries(_) => BackendKind::TimeSeries,
            Self::Hierarchy(_) => BackendKind::Hierarchy,
        }
    }

    /// Spawns the background retry of a buffered backend, which runs until `cancel` fires.
    pub fn spawn_retries(&self, cancel: &CancellationToken) {
        if let Self::TimeSeries(TimeSeriesSender::Buffered(buffer)) = self {
            tokio::spawn(buffer.clone().run(cancel.clone()));
        }
    }
}
