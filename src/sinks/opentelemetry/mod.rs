//! OTLP/HTTP delivery using the JSON encoding of `ExportLogsServiceRequest`.

mod config;
mod encoder;
mod sink;

pub use self::{config::OtlpConfig, sink::OtlpSink};
