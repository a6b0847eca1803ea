//! Delivery of write requests to the outputs of a relay.
//!
//! Every output is a [`Backend`](backend::Backend). Time-series backends receive batches of line
//! protocol through an [`HttpPoster`](poster::HttpPoster), optionally wrapped in a
//! [`RetryBuffer`](retry_buffer::RetryBuffer). Hierarchy backends receive translated records
//! through a [`HierarchyPoster`](hierarchy::HierarchyPoster).

pub mod backend;
pub mod fanout;
pub mod hierarchy;
pub mod metering;
pub mod poster;
pub mod retry_buffer;
pub mod server;
