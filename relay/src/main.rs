//! The metrics relay receives writes in the InfluxDB line protocol and dispatches them to a set of
//! time-series databases and hierarchy stores.
//!
//! # Usage
//!
//! ```text
//! relay run --config <dir>
//! relay config show --config <dir>
//! ```
//!
//! The configuration directory contains a `config.yml`, see [`relay-config`] for all options.
//!
//! # Workspace Crates
//!
//! The relay is split into the following workspace crates:
//!
//!  - `relay`: Main entry point and command line interface.
//!  - [`relay-common`]: Common utilities.
//!  - [`relay-config`]: Static configuration for the CLI and server.
//!  - [`relay-log`]: Logging.
//!  - [`relay-metrics`]: Line protocol and translation into hierarchy namespaces.
//!  - [`relay-server`]: Endpoints and services.
//!  - [`relay-statsd`]: High-level StatsD metric client for internal measurements.
//!  - [`relay-system`]: Signal handling and shutdown.
//!
//! [`relay-common`]: ../relay_common/index.html
//! [`relay-config`]: ../relay_config/index.html
//! [`relay-log`]: ../relay_log/index.html
//! [`relay-metrics`]: ../relay_metrics/index.html
//! [`relay-server`]: ../relay_server/index.html
//! [`relay-statsd`]: ../relay_statsd/index.html
//! [`relay-system`]: ../relay_system/index.html

#![doc(
    html_logo_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png",
    html_favicon_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png"
)]

mod cli;
mod cliapp;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            relay_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
