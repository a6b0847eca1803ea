//! Foundational system components for the metrics relay.
//!
//! Currently this only contains the [`Controller`], which listens for process signals and
//! distributes a [`Shutdown`] message to every component that asked for a [`ShutdownHandle`].
#![warn(missing_docs)]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png",
    html_favicon_url = "https://raw.githubusercontent.com/getsentry/relay/master/artwork/relay-icon.png"
)]

mod controller;

pub use self::controller::*;
