//! Push API delivery to Loki.
//!
//! Records are grouped into streams by their label set and, when a tenant key is configured,
//! into one push request per tenant.

mod config;
mod sink;

pub use self::{config::LokiConfig, sink::LokiSink};
