//! Bounded, in-memory buffering between the router and each output.
//!
//! Every configured output owns exactly one buffer. The router is the only producer and the output's
//! delivery worker is the only consumer, so all cross-stage access goes through [`LimitedSender`] and
//! [`LimitedReceiver`].

#![deny(clippy::all)]

#[macro_use]
extern crate tracing;

mod buffer_usage_data;
pub mod internal_events;
mod limited_queue;

use serde::{Deserialize, Serialize};

pub use buffer_usage_data::{BufferUsage, BufferUsageHandle, BufferUsageSnapshot};
pub use limited_queue::{
    BufferLimits, LimitedReceiver, LimitedSender, SendError, SendOutcome, limited,
};

/// Event handling behavior when a buffer is full.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WhenFull {
    /// Wait for free space in the buffer.
    ///
    /// This applies backpressure up the topology, signalling that sources should slow down the
    /// acceptance/consumption of events.
    Block,

    /// Drops the event being written instead of waiting for free space.
    DropNewest,

    /// Evicts the oldest queued event to make room for the event being written.
    DropOldest,
}

impl Default for WhenFull {
    fn default() -> Self {
        Self::Block
    }
}

impl WhenFull {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::DropNewest => "drop_newest",
            Self::DropOldest => "drop_oldest",
        }
    }
}

/// Observable lifecycle of a buffer.
///
/// `Empty -> Filling -> Full -> {Draining, Dropping}`; a draining buffer goes back to `Filling` or
/// `Full` as the producer outpaces the consumer again, and to `Empty` once the consumer catches up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferState {
    Empty = 0,
    Filling = 1,
    Full = 2,
    Draining = 3,
    Dropping = 4,
}

impl BufferState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Filling,
            2 => Self::Full,
            3 => Self::Draining,
            4 => Self::Dropping,
            _ => Self::Empty,
        }
    }
}

/// An item that can be stored in a buffer.
pub trait Bufferable: Send + Sync + 'static {
    /// Approximate in-memory size, used for byte accounting and byte limits.
    fn allocated_bytes(&self) -> usize;
}

impl Bufferable for String {
    fn allocated_bytes(&self) -> usize {
        self.len()
    }
}

impl Bufferable for u64 {
    fn allocated_bytes(&self) -> usize {
        std::mem::size_of::<u64>()
    }
}
