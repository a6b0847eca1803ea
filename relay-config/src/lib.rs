//! Configuration for the metrics relay CLI and server.
//!
//! The configuration is loaded from a `config.yml` file within a configuration directory, see
//! [`Config::from_path`]. All sections are optional and fall back to their defaults.
//!
//! ```yaml
//! logging:
//!   level: info
//! metrics:
//!   statsd: 127.0.0.1:8125
//! http_relays:
//!   - name: example-http
//!     bind_addr: 127.0.0.1:9096
//!     outputs:
//!       - name: local1
//!         location: http://127.0.0.1:8086/write
//!         type: influxdb
//!         buffer_size_mb: 100
//!       - name: graphite
//!         location: 127.0.0.1:2003
//!         type: graphite
//! ```
#![warn(missing_docs)]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png",
    html_favicon_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png"
)]

mod config;
mod relays;

pub use crate::config::*;
pub use crate::relays::*;
