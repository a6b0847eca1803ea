//! Header names and fixed values of the write protocol.

/// Value of the version header returned by the ping endpoint.
pub const SERVER: &str = "relay";

/// Version header returned by the ping endpoint, checked by InfluxDB clients.
pub const VERSION_HEADER: &str = "x-influxdb-version";

/// Request header identifying the machine that sent the datapoints.
pub const MACHINE_ID_HEADER: &str = "x-gocky-tag-machine-id";

/// Request header identifying the organization owning the sending machine.
pub const ORG_ID_HEADER: &str = "x-gocky-tag-org-id";

/// Request header carrying the operating system family of the sending machine.
pub const SOURCE_TYPE_HEADER: &str = "x-gocky-tag-source-type";

/// Header carrying the organization on requests to time-series backends.
pub const FORWARDED_ORG_ID_HEADER: &str = "x-org-id";

/// Organization assumed for requests without an organization header.
pub const UNAUTHORIZED_ORG: &str = "Unauthorized";
