//! Reassembly of CRI partial lines.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};

use super::cri::CriLine;
use crate::{
    event::{EventFinalizers, EventStatus, Finalizable},
    internal_events::OversizedLineDiscarded,
};

/// A message put back together from one or more CRI lines.
#[derive(Debug)]
pub struct Merged {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub finalizers: EventFinalizers,
}

#[derive(Debug)]
struct Pending {
    timestamp: DateTime<Utc>,
    message: String,
    finalizers: EventFinalizers,
    oversized: bool,
}

/// Joins `P` lines of each file with the `F` line that ends them.
///
/// A message growing past `max_bytes` is discarded as a whole; its lines are finalized as dropped
/// so the checkpoint moves past them.
#[derive(Debug)]
pub struct PartialMerger {
    max_bytes: usize,
    pending: HashMap<Arc<str>, Pending>,
}

impl PartialMerger {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            pending: HashMap::new(),
        }
    }

    pub fn push(
        &mut self,
        source_id: &Arc<str>,
        line: CriLine<'_>,
        finalizers: EventFinalizers,
    ) -> Option<Merged> {
        if !line.partial && !self.pending.contains_key(source_id) {
            return Some(Merged {
                timestamp: line.timestamp,
                message: line.message.to_string(),
                finalizers,
            });
        }

        let pending = self
            .pending
            .entry(Arc::clone(source_id))
            .or_insert_with(|| Pending {
                timestamp: line.timestamp,
                message: String::new(),
                finalizers: EventFinalizers::default(),
                oversized: false,
            });
        pending.finalizers.merge(finalizers);
        if !pending.oversized {
            if pending.message.len() + line.message.len() > self.max_bytes {
                emit!(OversizedLineDiscarded {
                    source_id: &**source_id,
                    max_bytes: self.max_bytes,
                });
                pending.oversized = true;
                pending.message = String::new();
            } else {
                pending.message.push_str(line.message);
            }
        }

        if line.partial {
            return None;
        }
        let mut pending = self.pending.remove(source_id)?;
        if pending.oversized {
            pending.finalizers.finalize(EventStatus::Dropped);
            return None;
        }
        Some(Merged {
            timestamp: pending.timestamp,
            message: pending.message,
            finalizers: pending.finalizers,
        })
    }

    /// Discards an unfinished message, after the file restarted or went away.
    pub fn reset(&mut self, source_id: &str) {
        if let Some(mut pending) = self.pending.remove(source_id) {
            pending.finalizers.finalize(EventStatus::Dropped);
        }
    }

    /// Discards every unfinished message.
    pub fn clear(&mut self) {
        for (_, mut pending) in self.pending.drain() {
            pending.finalizers.finalize(EventStatus::Dropped);
        }
    }
}
