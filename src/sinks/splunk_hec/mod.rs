//! Splunk HTTP Event Collector delivery.

mod config;
mod sink;

pub use self::{config::SplunkConfig, sink::SplunkSink};
