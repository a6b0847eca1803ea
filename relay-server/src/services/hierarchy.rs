use std::fmt::Write as _;
use std::io;
use std::time::Duration;

use relay_config::BackendConfig;
use relay_metrics::{Point, translate};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::extractors::SourceType;
use crate::services::poster::PostError;
use crate::statsd::RelayCounters;

/// Pushes datapoints to a hierarchy store over its plaintext protocol.
///
/// Every numeric field is renamed with [`translate`] and written as one
/// `<prefix>.<source_type>.<id>.<namespace>.<field> <value> <timestamp>` record. The connection
/// is opened lazily and reopened once if writing to it fails. Connecting and writing are both
/// bounded by the backend timeout; a connection that times out is closed.
#[derive(Debug)]
pub struct HierarchyPoster {
    name: String,
    location: String,
    prefix: String,
    timeout: Duration,
    connection: Mutex<Option<BufWriter<TcpStream>>>,
}

impl HierarchyPoster {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            name: config.name().to_owned(),
            location: config.location.clone(),
            prefix: config.graphite_prefix.clone(),
            timeout: config.timeout(),
            connection: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pushes all datapoints of `points` and returns the number of written records.
    ///
    /// The identity in the namespace is `machine_id`, falling back to the `machine_id` tag of each
    /// point for anonymous requests.
    pub async fn push(
        &self,
        points: &[Point],
        machine_id: &str,
        source_type: SourceType,
    ) -> Result<usize, PostError> {
        let (records, count) = self.records(points, machine_id, source_type);
        if count == 0 {
            return Ok(0);
        }

        let mut connection = self.connection.lock().await;
        for attempt in 0..2 {
            let mut stream = match connection.take() {
                Some(stream) => stream,
                None => self.connect().await?,
            };

            let write = write_records(&mut stream, records.as_bytes());
            match tokio::time::timeout(self.timeout, write).await {
                Ok(Ok(())) => {
                    *connection = Some(stream);
                    break;
                }
                Ok(Err(error)) if attempt == 0 => {
                    relay_log::debug!(
                        "reconnecting to hierarchy store {}: {}",
                        self.name,
                        relay_log::LogError(&error)
                    );
                }
                Ok(Err(error)) => return Err(error.into()),
                Err(_) => {
                    relay_log::warn!("timed out writing to hierarchy store {}", self.name);
                    return Err(io::Error::from(io::ErrorKind::TimedOut).into());
                }
            }
        }

        relay_statsd::metric!(
            counter(RelayCounters::HierarchyRecords) += count as i64,
            backend = &self.name,
        );
        Ok(count)
    }

    fn records(
        &self,
        points: &[Point],
        machine_id: &str,
        source_type: SourceType,
    ) -> (String, usize) {
        let mut records = String::new();
        let mut count = 0;
        let mut dropped = 0i64;

        for point in points {
            let seconds = point.timestamp().div_euclid(1_000_000_000);

            for (field, value) in point.datapoints() {
                let Some(value) = value.as_f64() else {
                    continue;
                };

                match translate(point.measurement(), point.tags(), field, value) {
                    Some(metric) => {
                        let id = match machine_id {
                            "" => metric.id.as_deref().unwrap_or_default(),
                            id => id,
                        };
                        let record = metric.record(&self.prefix, source_type.as_str(), id, seconds);
                        writeln!(records, "{record}").ok();
                        count += 1;
                    }
                    None => dropped += 1,
                }
            }
        }

        if dropped > 0 {
            relay_statsd::metric!(counter(RelayCounters::HierarchyDropped) += dropped);
        }

        (records, count)
    }

    async fn connect(&self) -> Result<BufWriter<TcpStream>, PostError> {
        let connect = TcpStream::connect(&self.location);
        let stream = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))??;
        stream.set_nodelay(true)?;
        Ok(BufWriter::new(stream))
    }
}

async fn write_records(stream: &mut BufWriter<TcpStream>, records: &[u8]) -> io::Result<()> {
    stream.write_all(records).await?;
    stream.flush().await
}
