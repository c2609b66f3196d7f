//! Syslog delivery over UDP, TCP or TLS.

mod config;
mod sink;

pub use self::{
    config::{CodeOrTemplate, Facility, Severity, SyslogCode, SyslogConfig, SyslogRfc},
    sink::SyslogSink,
};
