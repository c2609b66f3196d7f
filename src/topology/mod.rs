//! Wiring of sources, the route stage, output buffers and delivery workers.
//!
//! ```text
//! sources --mpsc--> normalize + route --buffer--> output worker --> sink
//!                                     --buffer--> output worker --> sink
//! ```
//!
//! A configuration runs as a [`Generation`]. Reloading builds the next generation completely,
//! drains the current one and only then starts the new one, so no record read under the old
//! configuration is routed under the new one.

mod builder;
mod generation;
mod running;

pub use self::{
    builder::{Pieces, build_pieces},
    generation::Generation,
    running::{ReloadOutcome, RunningTopology},
};
