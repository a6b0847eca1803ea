use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigErrorKind};

/// The kind of a backend, which determines how batches are delivered to it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum BackendKind {
    /// A time-series database accepting line protocol over HTTP.
    #[serde(rename = "influxdb")]
    TimeSeries,
    /// A dotted-namespace hierarchy store reached over a plaintext TCP connection.
    #[serde(rename = "graphite")]
    Hierarchy,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeSeries => f.write_str("influxdb"),
            Self::Hierarchy => f.write_str("graphite"),
        }
    }
}

fn default_backend_timeout() -> u64 {
    10
}

fn default_max_batch_kb() -> usize {
    512
}

fn default_max_delay_interval() -> u64 {
    10
}

fn default_graphite_prefix() -> String {
    "bucky".to_owned()
}

/// A delivery target of an HTTP relay.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackendConfig {
    /// Name of the backend used in logs and metrics.
    ///
    /// Defaults to the location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Target of the backend.
    ///
    /// For time-series backends this is the full URL of the write endpoint, for hierarchy backends
    /// the `host:port` of the plaintext listener.
    pub location: String,

    /// The kind of backend.
    #[serde(rename = "type")]
    pub kind: BackendKind,

    /// Timeout of an outbound request in seconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout: u64,

    /// Capacity of the in-memory retry buffer in megabytes.
    ///
    /// `0` disables the retry buffer, in which case failed requests are retried inline a few
    /// times before giving up.
    #[serde(default)]
    pub buffer_size_mb: usize,

    /// Maximum size of a merged batch in the retry buffer in kilobytes.
    #[serde(default = "default_max_batch_kb")]
    pub max_batch_kb: usize,

    /// Maximum delay between retries of the retry buffer in seconds.
    #[serde(default = "default_max_delay_interval")]
    pub max_delay_interval: u64,

    /// Skip verification of the backend's TLS certificate.
    #[serde(default)]
    pub skip_tls_verification: bool,

    /// Prefix of all records sent to a hierarchy backend.
    #[serde(default = "default_graphite_prefix")]
    pub graphite_prefix: String,
}

impl BackendConfig {
    /// Returns the name of this backend.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.location)
    }

    /// Returns the timeout of outbound requests.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Returns the retry buffer capacity in bytes, `0` if buffering is disabled.
    pub fn buffer_size_bytes(&self) -> usize {
        self.buffer_size_mb.saturating_mul(1024 * 1024)
    }

    /// Returns the maximum size of a merged batch in bytes.
    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_kb.saturating_mul(1024)
    }

    /// Returns the maximum delay between retries.
    pub fn max_delay_interval(&self) -> Duration {
        Duration::from_secs(self.max_delay_interval)
    }
}

fn default_bind_addr() -> SocketAddr {
    (Ipv4Addr::LOCALHOST, 9096).into()
}

fn default_metering_interval() -> u64 {
    60
}

fn default_max_body_size() -> usize {
    32 * 1024 * 1024
}

/// Configuration of a single HTTP relay listener.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HttpRelayConfig {
    /// Name of the relay.
    ///
    /// Defaults to `http://<bind_addr>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The address the relay listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Path to a combined certificate and key file.
    ///
    /// TLS is not terminated by the relay. Configuring this option fails the relay on startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_combined_pem: Option<String>,

    /// Retention policy added to forwarded requests that do not specify one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retention_policy: Option<String>,

    /// Reject requests without a machine identity header with `403 Forbidden`.
    #[serde(default)]
    pub drop_unauthorized: bool,

    /// Count received datapoints per organization and machine.
    #[serde(default)]
    pub enable_metering: bool,

    /// Interval of the metering report in seconds.
    ///
    /// Must not be `0` if metering is enabled, since the report drains the counters.
    #[serde(default = "default_metering_interval")]
    pub metering_interval: u64,

    /// Maximum number of datapoints in a single request, `0` for unlimited.
    ///
    /// Larger requests are acknowledged but not forwarded.
    #[serde(default)]
    pub max_datapoints_per_request: usize,

    /// Maximum number of datapoints in a single forwarded batch, `0` to never split.
    #[serde(default)]
    pub split_request_per_datapoints: usize,

    /// Acknowledge requests before their delivery is known.
    #[serde(default)]
    pub assume_success: bool,

    /// Maximum size of a request body in bytes, after decompression.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// The backends receiving all writes of this relay.
    #[serde(default)]
    pub outputs: Vec<BackendConfig>,
}

impl HttpRelayConfig {
    /// Returns the name of this relay.
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("http://{}", self.bind_addr),
        }
    }

    /// Returns the interval of the metering report, if enabled.
    pub fn metering_interval(&self) -> Option<Duration> {
        match (self.enable_metering, self.metering_interval) {
            (true, secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        // Counters are only drained by the periodic report.
        if self.enable_metering && self.metering_interval == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue)
                .field(format!("{}.metering_interval", self.name())));
        }

        for output in &self.outputs {
            if output.location.is_empty() {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue)
                    .field(format!("{}.outputs.location", self.name())));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_defaults() {
        let relay: HttpRelayConfig = serde_json::from_value(serde_json::json!({
            "outputs": [{"location": "http://127.0.0.1:8086/write", "type": "influxdb"}]
        }))
        .unwrap();

        assert_eq!(relay.name(), "http://127.0.0.1:9096");
        assert!(!relay.drop_unauthorized);
        assert_eq!(relay.metering_interval(), None);

        let output = &relay.outputs[0];
        assert_eq!(output.name(), "http://127.0.0.1:8086/write");
        assert_eq!(output.timeout(), Duration::from_secs(10));
        assert_eq!(output.max_delay_interval(), Duration::from_secs(10));
        assert_eq!(output.max_batch_bytes(), 512 * 1024);
        assert_eq!(output.buffer_size_bytes(), 0);
    }

    #[test]
    fn test_metering_interval() {
        let relay: HttpRelayConfig = serde_json::from_value(serde_json::json!({
            "enable_metering": true,
            "metering_interval": 0,
        }))
        .unwrap();
        assert_eq!(relay.metering_interval(), None);

        let relay: HttpRelayConfig = serde_json::from_value(serde_json::json!({
            "enable_metering": true,
        }))
        .unwrap();
        assert_eq!(relay.metering_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_metering_requires_interval() {
        let relay: HttpRelayConfig = serde_json::from_value(serde_json::json!({
            "name": "r1",
            "enable_metering": true,
            "metering_interval": 0,
        }))
        .unwrap();

        let error = relay.validate().unwrap_err();
        insta::assert_snapshot!(error.to_string(), @"invalid config value (field r1.metering_interval)");

        let relay: HttpRelayConfig = serde_json::from_value(serde_json::json!({
            "metering_interval": 0,
        }))
        .unwrap();
        assert!(relay.validate().is_ok());
    }

    #[test]
    fn test_unknown_backend_kind() {
        let result = serde_json::from_value::<BackendConfig>(serde_json::json!({
            "location": "127.0.0.1:4242",
            "type": "opentsdb",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_location() {
        let relay: HttpRelayConfig = serde_json::from_value(serde_json::json!({
            "name": "r1",
            "outputs": [{"location": "", "type": "graphite"}]
        }))
        .unwrap();

        let error = relay.validate().unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        insta::assert_snapshot!(error.to_string(), @"invalid config value (field r1.outputs.location)");
    }
}
