//! Line protocol and metric name translation for the metrics relay.
//!
//! The relay accepts writes in the InfluxDB line protocol. Every line describes a [`Point`]: a
//! measurement with a set of tags, one or more fields, and an optional timestamp:
//!
//! ```text
//! cpu,cpu=cpu0,host=web01 usage_idle=97.5,usage_user=1.5 1600000000000000000
//! ```
//!
//! The numeric fields of a point are its datapoints. They are counted for limits and metering,
//! and only numeric fields are forwarded to downstream time-series backends.
//!
//! # Parsing
//!
//! Use [`parse_points`] to parse a full request body. Lines without a timestamp receive the
//! default timestamp, which is truncated to the requested [`Precision`]:
//!
//! ```
//! use relay_metrics::{parse_points, Precision};
//!
//! let body = b"mem,machine_id=m1 used=1024i,free=2048i";
//! let points = parse_points(body, 1_600_000_000_123_456_789, Precision::Seconds).unwrap();
//!
//! assert_eq!(points[0].measurement(), "mem");
//! assert_eq!(points[0].timestamp(), 1_600_000_000_000_000_000);
//! assert_eq!(points[0].datapoint_count(), 2);
//! ```
//!
//! # Translation
//!
//! Hierarchy stores such as Graphite expect a dotted namespace instead of tags. The
//! [`translate`] function maps a single datapoint onto that namespace, following the naming
//! conventions of collectd. See its documentation for the rules per measurement.
#![warn(missing_docs)]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png",
    html_favicon_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png"
)]

mod protocol;
mod translate;

pub use self::protocol::*;
pub use self::translate::*;
