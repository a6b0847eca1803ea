use relay_statsd::{CounterMetric, DistributionMetric, GaugeMetric, TimerMetric};

/// Gauge metrics used by the relay.
pub enum RelayGauges {
    /// The number of bytes currently held in a retry buffer.
    ///
    /// This metric is tagged with:
    /// - `backend`: The name of the buffered backend.
    RetryBufferBytes,
    /// The number of batches currently held in a retry buffer.
    ///
    /// This metric is tagged with:
    /// - `backend`: The name of the buffered backend.
    RetryBufferBatches,
}

impl GaugeMetric for RelayGauges {
    fn name(&self) -> &'static str {
        match self {
            RelayGauges::RetryBufferBytes => "retry_buffer.bytes",
            RelayGauges::RetryBufferBatches => "retry_buffer.batches",
        }
    }
}

/// Distribution metrics used by the relay.
pub enum RelayDistributions {
    /// The number of datapoints in a single write request.
    ///
    /// This metric is tagged with:
    /// - `relay`: The name of the receiving relay.
    RequestDatapoints,
    /// The number of batches a write request was split into.
    ///
    /// This metric is tagged with:
    /// - `relay`: The name of the receiving relay.
    RequestBatches,
    /// The size of a request body after decompression, in bytes.
    RequestBodySize,
}

impl DistributionMetric for RelayDistributions {
    fn name(&self) -> &'static str {
        match self {
            RelayDistributions::RequestDatapoints => "requests.datapoints",
            RelayDistributions::RequestBatches => "requests.batches",
            RelayDistributions::RequestBodySize => "requests.body_size",
        }
    }
}

/// Timer metrics used by the relay.
pub enum RelayTimers {
    /// Total duration from receiving a request until the response is returned to the client.
    ///
    /// Requests acknowledged before delivery (fire-and-forget) stop the timer early.
    ///
    /// This metric is tagged with:
    ///  - `method`: The HTTP method of the request.
    ///  - `route`: The matched route, or `unknown`.
    RequestsDuration,
    /// Duration of a single request to a time-series backend.
    ///
    /// This metric is tagged with:
    ///  - `backend`: The name of the backend.
    ///  - `status_code`: The response status, or `error` for transport failures.
    BackendRequestDuration,
}

impl TimerMetric for RelayTimers {
    fn name(&self) -> &'static str {
        match self {
            RelayTimers::RequestsDuration => "requests.duration",
            RelayTimers::BackendRequestDuration => "backend.duration",
        }
    }
}

/// Counter metrics used by the relay.
pub enum RelayCounters {
    /// Number of times an HTTP relay started listening.
    ServerStarting,
    /// Number of accepted TCP connections.
    ///
    /// This metric is tagged with:
    ///  - `keepalive`: `ok` or `error`, depending on whether TCP keep-alive could be set.
    ///  - `nodelay`: `ok` or `error`, depending on whether `TCP_NODELAY` could be set.
    ServerSocketAccept,
    /// Number of HTTP requests reaching the relay.
    ///
    /// This metric is tagged with:
    ///  - `method`: The HTTP method of the request.
    ///  - `route`: The matched route, or `unknown`.
    ///  - `status_code`: The status code of the response.
    Requests,
    /// Number of write requests rejected before contacting any backend.
    ///
    /// This metric is tagged with:
    ///  - `relay`: The name of the receiving relay.
    ///  - `reason`: One of `body`, `gzip`, `parse`, `unauthorized`, `too_large`, `missing_db`.
    RequestsRejected,
    /// Number of datapoints accepted for delivery.
    ///
    /// This metric is tagged with:
    ///  - `relay`: The name of the receiving relay.
    DatapointsReceived,
    /// Number of failed deliveries to a backend.
    ///
    /// A failed delivery is either a transport error or a `5xx` response.
    ///
    /// This metric is tagged with:
    ///  - `backend`: The name of the backend.
    ///  - `reason`: `network`, `status`, or `buffer_full`.
    BackendFailure,
    /// Number of batches placed into a retry buffer.
    ///
    /// This metric is tagged with:
    ///  - `backend`: The name of the buffered backend.
    RetryBufferEnqueued,
    /// Number of batches rejected because the retry buffer was at capacity.
    ///
    /// This metric is tagged with:
    ///  - `backend`: The name of the buffered backend.
    RetryBufferFull,
    /// Number of batches delivered by the background retry of a retry buffer.
    ///
    /// This metric is tagged with:
    ///  - `backend`: The name of the buffered backend.
    RetryBufferDelivered,
    /// Number of datapoints dropped because they have no name in the hierarchy namespace.
    HierarchyDropped,
    /// Number of records pushed to a hierarchy store.
    ///
    /// This metric is tagged with:
    ///  - `backend`: The name of the hierarchy backend.
    HierarchyRecords,
    /// Number of deliveries that failed after the request was already acknowledged.
    ///
    /// This metric is tagged with:
    ///  - `relay`: The name of the receiving relay.
    AcknowledgedFailure,
    /// Number of datapoints reported by the periodic metering report.
    ///
    /// This metric is tagged with:
    ///  - `org`: The organization the points were counted for.
    MeteringPoints,
}

impl CounterMetric for RelayCounters {
    fn name(&self) -> &'static str {
        match self {
            RelayCounters::ServerStarting => "server.starting",
            RelayCounters::ServerSocketAccept => "server.socket.accept",
            RelayCounters::Requests => "requests",
            RelayCounters::RequestsRejected => "requests.rejected",
            RelayCounters::DatapointsReceived => "datapoints.received",
            RelayCounters::BackendFailure => "backend.failure",
            RelayCounters::RetryBufferEnqueued => "retry_buffer.enqueued",
            RelayCounters::RetryBufferFull => "retry_buffer.full",
            RelayCounters::RetryBufferDelivered => "retry_buffer.delivered",
            RelayCounters::HierarchyDropped => "hierarchy.dropped",
            RelayCounters::HierarchyRecords => "hierarchy.records",
            RelayCounters::AcknowledgedFailure => "acknowledged.failure",
            RelayCounters::MeteringPoints => "metering.points",
        }
    }
}
