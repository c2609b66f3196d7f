//! Google Cloud Logging `entries.write` delivery.

mod config;
mod sink;

pub use self::{
    config::{GoogleCloudLoggingConfig, LogParent},
    sink::GoogleCloudLoggingSink,
};
