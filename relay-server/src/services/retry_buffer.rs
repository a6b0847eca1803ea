use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use relay_common::RetryBackoff;
use relay_config::BackendConfig;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::http::BackendResponse;
use crate::services::poster::{PostError, Poster, WriteContext};
use crate::statsd::{RelayCounters, RelayGauges};

/// A batch could not be buffered because the retry buffer is at capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("retry buffer full")]
pub struct BufferFull;

#[derive(Debug)]
struct PendingBatch {
    body: Vec<u8>,
    context: WriteContext,
}

#[derive(Debug, Default)]
struct Queue {
    batches: VecDeque<PendingBatch>,
    size: usize,
    /// The front batch is being delivered and must not be merged into.
    in_flight: bool,
}

/// Limits of a [`RetryBuffer`].
#[derive(Clone, Copy, Debug)]
pub struct RetryBufferConfig {
    /// Total size of all pending batches in bytes.
    pub capacity: usize,
    /// Size up to which consecutive batches are merged in bytes.
    pub max_batch: usize,
    /// Upper bound of the delay between two delivery attempts.
    pub max_delay: Duration,
}

impl RetryBufferConfig {
    pub fn from_backend(config: &BackendConfig) -> Self {
        Self {
            capacity: config.buffer_size_bytes(),
            max_batch: config.max_batch_bytes(),
            max_delay: config.max_delay_interval(),
        }
    }
}

/// Keeps batches a backend could not accept in memory and delivers them in the background.
///
/// While no batches are pending, [`send`](Self::send) forwards directly to the wrapped poster.
/// When delivery fails with a transport error or a `5xx` response, the batch is queued and a
/// background task delivers the queue in submission order, waiting with exponential backoff
/// between failed attempts. As long as the queue is not empty, new batches are queued behind it
/// without contacting the backend.
///
/// Queued batches are reported to the caller as accepted. Once the total size of the queue would
/// exceed its capacity, new batches are rejected with [`BufferFull`].
#[derive(Debug)]
pub struct RetryBuffer<P> {
    poster: P,
    config: RetryBufferConfig,
    queue: Mutex<Queue>,
    notify: Notify,
}

impl<P: Poster> RetryBuffer<P> {
    pub fn new(poster: P, config: RetryBufferConfig) -> Self {
        Self {
            poster,
            config,
            queue: Mutex::new(Queue::default()),
            notify: Notify::new(),
        }
    }

    /// Returns the name of the wrapped backend.
    pub fn name(&self) -> &str {
        self.poster.name()
    }

    /// Returns the number of pending batches and their total size in bytes.
    #[cfg(test)]
    pub fn pending(&self) -> (usize, usize) {
        let queue = self.queue.lock();
        (queue.batches.len(), queue.size)
    }

    /// Delivers a batch or queues it for later delivery.
    pub async fn send(
        &self,
        batch: Bytes,
        context: &WriteContext,
    ) -> Result<BackendResponse, PostError> {
        if !self.queue.lock().batches.is_empty() {
            self.enqueue(&batch, context)?;
            return Ok(BackendResponse::accepted());
        }

        match self.poster.post(batch.clone(), context).await {
            Ok(response) if !response.is_server_error() => Ok(response),
            Ok(response) => {
                relay_log::warn!(
                    "backend {} responded with {}, buffering batch",
                    self.name(),
                    response.status
                );
                self.enqueue(&batch, context)?;
                Ok(BackendResponse::accepted())
            }
            Err(error) => {
                relay_log::warn!(
                    "failed to post to backend {}, buffering batch: {}",
                    self.name(),
                    relay_log::LogError(&error)
                );
                self.enqueue(&batch, context)?;
                Ok(BackendResponse::accepted())
            }
        }
    }

    fn enqueue(&self, batch: &[u8], context: &WriteContext) -> Result<(), BufferFull> {
        let mut queue = self.queue.lock();

        if queue.size + batch.len() > self.config.capacity {
            relay_statsd::metric!(
                counter(RelayCounters::RetryBufferFull) += 1,
                backend = self.name(),
            );
            return Err(BufferFull);
        }

        let mergeable = queue.batches.len() > 1 || !queue.in_flight;
        let max_batch = self.config.max_batch;
        let tail = queue.batches.back_mut().filter(|tail| {
            mergeable && tail.context == *context && tail.body.len() + batch.len() <= max_batch
        });

        match tail {
            Some(tail) => tail.body.extend_from_slice(batch),
            None => queue.batches.push_back(PendingBatch {
                body: batch.to_vec(),
                context: context.clone(),
            }),
        }

        queue.size += batch.len();
        self.emit_gauges(&queue);
        drop(queue);

        relay_statsd::metric!(
            counter(RelayCounters::RetryBufferEnqueued) += 1,
            backend = self.name(),
        );
        self.notify.notify_one();
        Ok(())
    }

    /// Takes a copy of the oldest batch and marks it as in flight.
    fn front(&self) -> Option<(Bytes, WriteContext)> {
        let mut queue = self.queue.lock();
        let front = queue.batches.front()?;
        let batch = (Bytes::copy_from_slice(&front.body), front.context.clone());
        queue.in_flight = true;
        Some(batch)
    }

    /// Removes the oldest batch after it was delivered.
    fn pop_front(&self) {
        let mut queue = self.queue.lock();
        if let Some(batch) = queue.batches.pop_front() {
            queue.size -= batch.body.len();
        }
        queue.in_flight = false;
        self.emit_gauges(&queue);
    }

    fn release_front(&self) {
        self.queue.lock().in_flight = false;
    }

    fn emit_gauges(&self, queue: &Queue) {
        relay_statsd::metric!(
            gauge(RelayGauges::RetryBufferBytes) = queue.size as u64,
            backend = self.name(),
        );
        relay_statsd::metric!(
            gauge(RelayGauges::RetryBufferBatches) = queue.batches.len() as u64,
            backend = self.name(),
        );
    }

    /// Delivers pending batches until the token is cancelled.
    ///
    /// Pending batches are not flushed on cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = RetryBackoff::new(self.config.max_delay);

        loop {
            let Some((batch, context)) = self.front() else {
                backoff.reset();
                tokio::select! {
                    _ = self.notify.notified() => (),
                    _ = cancel.cancelled() => return,
                }
                continue;
            };

            let delay = backoff.next_backoff();
            if !delay.is_zero() {
                relay_log::debug!(
                    "retrying backend {} in {delay:?} (attempt {})",
                    self.name(),
                    backoff.attempt()
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => (),
                _ = cancel.cancelled() => {
                    self.release_front();
                    return;
                }
            }

            match self.poster.post(batch, &context).await {
                Ok(response) if !response.is_server_error() => {
                    if response.is_client_error() {
                        relay_log::error!(
                            "backend {} rejected buffered batch with {}",
                            self.name(),
                            response.status
                        );
                    }
                    self.pop_front();
                    backoff.reset();
                    relay_statsd::metric!(
                        counter(RelayCounters::RetryBufferDelivered) += 1,
                        backend = self.name(),
                    );
                }
                Ok(response) => {
                    relay_log::debug!(
                        "backend {} responded with {} to buffered batch",
                        self.name(),
                        response.status
                    );
                    self.release_front();
                }
                Err(error) => {
                    relay_log::debug!(
                        "failed to deliver buffered batch to backend {}: {}",
                        self.name(),
                        relay_log::LogError(&error)
                    );
                    self.release_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    /// A poster that fails while `down` is set and records delivered batches.
    #[derive(Default)]
    struct FakeBackend {
        down: Mutex<bool>,
        delivered: Mutex<Vec<Bytes>>,
        attempts: Mutex<usize>,
    }

    impl Poster for Arc<FakeBackend> {
        fn name(&self) -> &str {
            "fake"
        }

        async fn post(&self, batch: Bytes, _: &WriteContext) -> Result<BackendResponse, PostError> {
            *self.attempts.lock() += 1;
            if *self.down.lock() {
                return Ok(BackendResponse::empty(StatusCode::SERVICE_UNAVAILABLE));
            }
            self.delivered.lock().push(batch);
            Ok(BackendResponse::accepted())
        }
    }

    fn context(org_id: &str) -> WriteContext {
        WriteContext {
            query: "db=metrics".to_owned(),
            auth: None,
            org_id: org_id.to_owned(),
        }
    }

    fn buffer(
        capacity: usize,
        max_batch: usize,
    ) -> (Arc<FakeBackend>, Arc<RetryBuffer<Arc<FakeBackend>>>) {
        let backend = Arc::new(FakeBackend::default());
        let config = RetryBufferConfig {
            capacity,
            max_batch,
            max_delay: Duration::from_secs(4),
        };
        (backend.clone(), Arc::new(RetryBuffer::new(backend, config)))
    }

    #[tokio::test]
    async fn test_forwards_when_idle() {
        let (backend, buffer) = buffer(1024, 1024);

        let response = buffer.send("a 1\n".into(), &context("o")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(buffer.pending(), (0, 0));
        assert_eq!(*backend.delivered.lock(), ["a 1\n"]);
    }

    #[tokio::test]
    async fn test_buffers_and_merges() {
        let (backend, buffer) = buffer(1024, 8);
        *backend.down.lock() = true;

        for line in ["a 1\n", "b 2\n", "c 3\n"] {
            let response = buffer.send(line.into(), &context("o")).await.unwrap();
            assert_eq!(response, BackendResponse::accepted());
        }

        // Only the first batch reached the backend, the others were queued behind it.
        assert_eq!(*backend.attempts.lock(), 1);
        assert_eq!(buffer.pending(), (2, 12));

        buffer.send("d 4\n".into(), &context("other")).await.unwrap();
        assert_eq!(buffer.pending(), (3, 16));
    }

    #[tokio::test]
    async fn test_buffer_full() {
        let (backend, buffer) = buffer(8, 8);
        *backend.down.lock() = true;

        buffer.send("a 1\n".into(), &context("o")).await.unwrap();
        buffer.send("b 2\n".into(), &context("o")).await.unwrap();

        let error = buffer.send("c 3\n".into(), &context("o")).await.unwrap_err();
        assert!(matches!(error, PostError::BufferFull(BufferFull)));
        assert_eq!(buffer.pending(), (1, 8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_order_after_recovery() {
        let (backend, buffer) = buffer(1024, 4);
        *backend.down.lock() = true;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(buffer.clone().run(cancel.clone()));

        for line in ["a 1\n", "b 2\n", "c 3\n"] {
            buffer.send(line.into(), &context("o")).await.unwrap();
        }

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(backend.delivered.lock().is_empty());
        assert_eq!(buffer.pending(), (3, 12));

        *backend.down.lock() = false;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(*backend.delivered.lock(), ["a 1\n", "b 2\n", "c 3\n"]);
        assert_eq!(buffer.pending(), (0, 0));

        // Accepts capacity again and forwards directly once drained.
        buffer.send("d 4\n".into(), &context("o")).await.unwrap();
        assert_eq!(backend.delivered.lock().len(), 4);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let (backend, buffer) = buffer(1024, 1024);
        *backend.down.lock() = true;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(buffer.clone().run(cancel.clone()));
        buffer.send("a 1\n".into(), &context("o")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        let attempts = *backend.attempts.lock();
        // With a 4s cap, a minute allows at least 15 attempts.
        assert!(attempts >= 15, "attempts: {attempts}");

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(buffer.pending(), (1, 4));
    }
}
