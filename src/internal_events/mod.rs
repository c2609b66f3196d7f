//! Observable occurrences inside the forwarder.
//!
//! Every event logs through `tracing` and updates `metrics` counters. Components never log or count
//! directly; they build an event and `emit!` it.

pub trait InternalEvent {
    fn emit_logs(&self) {}
    fn emit_metrics(&self) {}
}

pub fn emit(event: impl InternalEvent) {
    event.emit_logs();
    event.emit_metrics();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}

// Modules that require emit! macro so they need to be defined after the macro.
mod config;
mod delivery;
mod file;
mod journald;
mod kubernetes_logs;
mod parser;
mod process;
mod router;
mod sink;
mod template;

pub use self::{
    config::*, delivery::*, file::*, journald::*, kubernetes_logs::*, parser::*, process::*, router::*, sink::*,
    template::*,
};
