#![recursion_limit = "256"]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::module_name_repetitions)]

//! A node-level log collector.
//!
//! Container, journal and audit logs are read from the host, normalized into [`event::LogRecord`]s,
//! routed through declarative pipelines and delivered to any number of outputs. A source position is
//! only checkpointed once every output the record was routed to has finished with it.

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod app;
pub mod aws;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod event;
pub mod gcp;
pub mod http;
pub mod router;
pub mod signal;
pub mod sinks;
pub mod sources;
pub mod status;
pub mod templating;
pub mod tls;
pub mod topology;
pub mod trace;
pub mod transforms;

/// Catch-all error used where a component has no dedicated error enum.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Name of the node this collector runs on.
///
/// `NODE_NAME` is injected by the daemonset and wins over the kernel hostname so records keep a
/// stable host name across container restarts.
pub fn get_hostname() -> std::io::Result<String> {
    if let Ok(name) = std::env::var("NODE_NAME") {
        if !name.is_empty() {
            return Ok(name);
        }
    }
    Ok(hostname::get()?.to_string_lossy().into_owned())
}
