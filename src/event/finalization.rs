//! Acknowledgement tracking from outputs back to the source positions.
//!
//! Every record read from a source gets one [`EventFinalizer`]. Routing a record to several outputs
//! clones its finalizer handles; each clone must be given a final [`EventStatus`] before it is
//! dropped. Once the last handle of a record is gone the record is complete, and the source's
//! [`SourceProgress`] advances its checkpoint over the contiguous prefix of completed records.
//!
//! A handle dropped while still [`EventStatus::Pending`] marks the record abandoned, which holds
//! the checkpoint back at that record for the rest of the process lifetime. That is what happens
//! to records still sitting in a buffer at shutdown, so they are read again after a restart.

use std::{
    collections::BTreeMap,
    mem,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use file_source::{CheckpointsView, FileFingerprint};

/// Outcome of one copy of a record at one output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    /// Not finished yet. Dropping a pending copy abandons the record.
    Pending,
    /// Accepted by the destination.
    Delivered,
    /// Discarded by an explicit policy: a filter, a full buffer, a rate limit or `AtMostOnce`.
    Dropped,
    /// Refused permanently by the destination.
    Rejected,
}

/// Where to resume reading once a record is complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckPosition {
    /// Byte offset just past the record in the file identified by `fingerprint`.
    File {
        fingerprint: FileFingerprint,
        offset: u64,
    },
    /// Journal cursor of the entry.
    Journal { cursor: String },
    /// Not resumable, e.g. records synthesized in tests.
    None,
}

impl AckPosition {
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::File { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    next_seq: u64,
    next_expected: u64,
    completed: BTreeMap<u64, AckPosition>,
    abandoned_at: Option<u64>,
}

/// Read-order bookkeeping of one source.
///
/// Sequence numbers are handed out in read order, so the checkpoint only ever moves to the
/// position of the highest record that has no incomplete record before it.
#[derive(Debug)]
pub struct SourceProgress {
    source_id: Arc<str>,
    checkpoints: Option<Arc<CheckpointsView>>,
    state: Mutex<ProgressState>,
}

impl SourceProgress {
    pub fn new(source_id: Arc<str>, checkpoints: Arc<CheckpointsView>) -> Arc<Self> {
        Arc::new(Self {
            source_id,
            checkpoints: Some(checkpoints),
            state: Mutex::new(ProgressState::default()),
        })
    }

    /// Progress that is tracked but never persisted.
    pub fn detached(source_id: Arc<str>) -> Arc<Self> {
        Arc::new(Self {
            source_id,
            checkpoints: None,
            state: Mutex::new(ProgressState::default()),
        })
    }

    pub fn source_id(&self) -> &Arc<str> {
        &self.source_id
    }

    /// Registers the next record read from this source.
    pub fn finalizer(self: &Arc<Self>, position: AckPosition) -> EventFinalizers {
        let seq = {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            seq
        };
        EventFinalizers::new(EventFinalizer {
            shared: Arc::new(FinalizerShared {
                progress: Arc::clone(self),
                seq,
                position,
                abandoned: AtomicBool::new(false),
            }),
            status: EventStatus::Pending,
        })
    }

    /// Records registered but not yet complete.
    pub fn pending(&self) -> u64 {
        let state = self.lock();
        state.next_seq - state.next_expected
    }

    pub fn is_stalled(&self) -> bool {
        self.lock().abandoned_at.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        // A panic while holding the lock leaves the state consistent, so poisoning is ignored.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn complete(&self, seq: u64, position: AckPosition, abandoned: bool) {
        let mut state = self.lock();
        if abandoned {
            state.abandoned_at = Some(state.abandoned_at.map_or(seq, |at| at.min(seq)));
        }
        state.completed.insert(seq, position);

        let mut latest = None;
        loop {
            let next = state.next_expected;
            if state.abandoned_at.is_some_and(|at| at <= next) {
                break;
            }
            match state.completed.remove(&next) {
                Some(AckPosition::None) => state.next_expected += 1,
                Some(position) => {
                    latest = Some(position);
                    state.next_expected += 1;
                }
                None => break,
            }
        }
        drop(state);

        match (latest, &self.checkpoints) {
            (
                Some(AckPosition::File {
                    fingerprint,
                    offset,
                }),
                Some(checkpoints),
            ) => checkpoints.update(&self.source_id, fingerprint, offset),
            (Some(AckPosition::Journal { cursor }), Some(checkpoints)) => {
                checkpoints.update_cursor(&self.source_id, cursor);
            }
            _ => {}
        }
    }
}

#[derive(Debug)]
struct FinalizerShared {
    progress: Arc<SourceProgress>,
    seq: u64,
    position: AckPosition,
    abandoned: AtomicBool,
}

impl Drop for FinalizerShared {
    fn drop(&mut self) {
        let position = mem::replace(&mut self.position, AckPosition::None);
        self.progress
            .complete(self.seq, position, self.abandoned.load(Ordering::Acquire));
    }
}

/// One copy's claim on a record.
#[derive(Debug)]
pub struct EventFinalizer {
    shared: Arc<FinalizerShared>,
    status: EventStatus,
}

impl Clone for EventFinalizer {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            status: EventStatus::Pending,
        }
    }
}

impl Drop for EventFinalizer {
    fn drop(&mut self) {
        if self.status == EventStatus::Pending {
            self.shared.abandoned.store(true, Ordering::Release);
        }
    }
}

/// The finalizers a record carries. Merged records carry those of every line they were built
/// from.
#[derive(Clone, Debug, Default)]
pub struct EventFinalizers(Vec<EventFinalizer>);

impl EventFinalizers {
    fn new(finalizer: EventFinalizer) -> Self {
        Self(vec![finalizer])
    }

    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Gives every handle its final status. The record completes once all copies are dropped.
    pub fn update_status(&mut self, status: EventStatus) {
        for finalizer in &mut self.0 {
            finalizer.status = status;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl PartialEq for EventFinalizers {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| Arc::ptr_eq(&a.shared, &b.shared))
    }
}

/// Something that carries finalizers.
pub trait Finalizable {
    fn take_finalizers(&mut self) -> EventFinalizers;

    /// Finishes this copy with `status`.
    fn finalize(&mut self, status: EventStatus) {
        let mut finalizers = self.take_finalizers();
        finalizers.update_status(status);
    }
}

impl Finalizable for EventFinalizers {
    fn take_finalizers(&mut self) -> EventFinalizers {
        mem::take(self)
    }
}
