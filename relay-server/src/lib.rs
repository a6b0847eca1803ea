//! The metrics relay server application.
//!
//! This module contains the [`run`] function which starts all configured relays. Every relay
//! accepts writes in the InfluxDB line protocol and delivers them to a set of outputs:
//!
//!  - **Time-series backends** receive the numeric fields of every request as line protocol,
//!    optionally split into batches with a maximum number of datapoints. Deliveries that fail can
//!    be kept in a bounded in-memory retry buffer.
//!  - **Hierarchy backends** receive every datapoint as a record in a dotted namespace, see
//!    [`relay_metrics::translate`].
//!
//! See the [`Config`] documentation for more information on configuration options.
//!
//! # Path of a Write through the Relay
//!
//! ```text
//! client -> POST /write -> parse -> split -> fan out -> backend 1..n
//!                                               |
//!                                          reconcile -> response
//! ```
//!
//! The client receives `204 No Content` as soon as one delivery succeeds. If no delivery succeeds,
//! the client receives the first client error of a backend, or `503 Service Unavailable`. Relays
//! configured with `assume_success`, as well as relays with a hierarchy backend, acknowledge
//! writes before their delivery is known.
#![warn(missing_docs)]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png",
    html_favicon_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png"
)]

mod constants;
mod endpoints;
mod extractors;
mod http;
mod middlewares;
mod service;
mod services;
mod statsd;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use relay_config::Config;
use relay_system::{Controller, Shutdown};

pub use self::service::{Relay, RelayService, ServiceError};
pub use self::services::server::{HttpRelay, ServerError};

/// Runs all configured relays.
///
/// This effectively boots the entire server application. It blocks the current thread until a
/// shutdown signal is received or all relays have stopped. Behavior of the relays is determined by
/// the `config` passed into this function.
pub fn run(config: Config) -> anyhow::Result<()> {
    relay_log::info!("relay server starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("relay-rt")
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(async {
        Controller::start(config.shutdown_timeout());

        let service = Arc::new(RelayService::new(&config)?);
        let mut run = tokio::spawn({
            let service = service.clone();
            async move { service.run().await }
        });

        let mut shutdown = Controller::shutdown_handle();
        let Shutdown { timeout } = tokio::select! {
            shutdown = shutdown.notified() => shutdown,
            _ = &mut run => {
                relay_log::info!("all relays stopped");
                return anyhow::Ok(());
            }
        };

        service.stop();
        match timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, run).await.is_err() {
                    relay_log::warn!("relays did not stop within {}s", timeout.as_secs());
                }
            }
            None => run.abort(),
        }

        anyhow::Ok(())
    })?;

    drop(runtime);

    relay_log::info!("relay shutdown complete");
    Ok(())
}
