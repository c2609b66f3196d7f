//! CloudWatch Logs delivery through `PutLogEvents`.

mod config;
mod sink;

pub use self::{config::CloudwatchConfig, sink::CloudwatchSink};

/// Destination of a record: one log group and one stream inside it.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct CloudwatchKey {
    pub group: String,
    pub stream: String,
}
