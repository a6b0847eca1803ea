use std::collections::HashSet;

use bytes::Bytes;
use relay_metrics::{Point, Precision};

/// Points of a write request, serialized into batches for time-series backends.
#[derive(Debug, Default)]
pub struct RequestBatches {
    /// Serialized batches in the order of the request.
    pub batches: Vec<Bytes>,
    /// The total number of datapoints in all batches.
    pub datapoints: usize,
    /// The number of distinct series and field combinations.
    pub series: usize,
}

/// Serializes the numeric fields of `points` and splits them into batches.
///
/// Lines are appended to the current batch while its datapoint count stays within
/// `max_datapoints`. A point is never split across batches, so a single point with more datapoints
/// than the limit forms a batch of its own. A limit of `0` keeps all points in one batch.
///
/// Points without numeric fields are skipped. No empty batches are emitted.
pub fn split_points(
    points: &[Point],
    precision: Precision,
    max_datapoints: usize,
) -> RequestBatches {
    let limit = match max_datapoints {
        0 => usize::MAX,
        limit => limit,
    };

    let mut batches = Vec::new();
    let mut series = HashSet::new();
    let mut current = String::new();
    let mut remaining = limit;
    let mut datapoints = 0;

    for point in points {
        let count = point.datapoint_count();
        if count == 0 {
            continue;
        }

        if count > remaining && !current.is_empty() {
            batches.push(Bytes::from(std::mem::take(&mut current)));
            remaining = limit;
        }

        let key = point.series_key();
        for (field, _) in point.datapoints() {
            series.insert(format!("{key}{field}"));
        }

        point.write_datapoints(&mut current, precision);
        remaining = remaining.saturating_sub(count);
        datapoints += count;
    }

    if !current.is_empty() {
        batches.push(Bytes::from(current));
    }

    RequestBatches {
        batches,
        datapoints,
        series: series.len(),
    }
}
