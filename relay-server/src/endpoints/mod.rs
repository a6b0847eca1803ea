//! Web server endpoints.
//!
//! A relay serves the write API of InfluxDB: `POST /write` accepts line protocol and `/ping`
//! answers health checks. Every other route responds with a JSON error.

use axum::Router;
use axum::routing::{get, post};

use crate::service::RelayState;

mod ping;
mod statics;
mod write;

pub fn routes() -> Router<RelayState> {
    Router::new()
        .route("/ping", get(ping::handle).fallback(statics::not_found))
        .route(
            "/write",
            post(write::handle)
                .options(write::options)
                .fallback(write::method_not_allowed),
        )
        .fallback(statics::not_found)
}
