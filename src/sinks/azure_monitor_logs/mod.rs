//! Azure Log Analytics delivery through the HTTP Data Collector API.

mod config;
mod sink;

pub use self::{config::AzureMonitorConfig, sink::AzureMonitorSink};
