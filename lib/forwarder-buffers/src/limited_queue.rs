use std::{
    fmt,
    future::poll_fn,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use crossbeam_queue::ArrayQueue;
use futures::{Stream, task::AtomicWaker};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::{BufferState, Bufferable, WhenFull, buffer_usage_data::BufferUsageHandle};

/// Error returned by `LimitedSender` once the receiving side is gone.
#[derive(Debug)]
pub struct SendError<T>(pub T);

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "channel closed")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// What happened to a write.
///
/// Dropped items are handed back so the caller can finalize them. Making room for a large item
/// under `DropOldest` can evict several queued ones.
#[derive(Debug)]
pub enum SendOutcome<T> {
    Queued,
    DroppedNewest(T),
    DroppedOldest(Vec<T>),
}

/// How much a buffer holds before its `WhenFull` policy applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLimits {
    pub max_events: usize,
    /// Cap on the summed `allocated_bytes` of queued items.
    pub max_bytes: Option<usize>,
}

impl BufferLimits {
    pub const fn events(max_events: usize) -> Self {
        Self {
            max_events,
            max_bytes: None,
        }
    }
}

/// Capacity held by one queued item, released when the consumer takes it.
struct Permits {
    _slot: OwnedSemaphorePermit,
    _bytes: Option<OwnedSemaphorePermit>,
}

struct Inner<T> {
    data: ArrayQueue<(Permits, T)>,
    limit: usize,
    when_full: WhenFull,
    limiter: Arc<Semaphore>,
    bytes: Option<(Arc<Semaphore>, u32)>,
    read_waker: AtomicWaker,
    senders: AtomicUsize,
    state: AtomicU8,
    usage: BufferUsageHandle,
}

impl<T> Inner<T> {
    fn transition(&self, next: BufferState) {
        self.state.store(next as u8, Ordering::Release);
    }

    fn state(&self) -> BufferState {
        BufferState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn after_push(&self) {
        if self.data.len() >= self.limit {
            self.transition(BufferState::Full);
        } else if self.state() != BufferState::Draining {
            self.transition(BufferState::Filling);
        }
    }

    /// Byte permits an item needs. An item larger than the whole cap takes all of it, so it still
    /// fits once the buffer is empty.
    fn byte_permits(&self, item: &T) -> u32
    where
        T: Bufferable,
    {
        self.bytes.as_ref().map_or(0, |(_, max)| {
            u32::try_from(item.allocated_bytes())
                .unwrap_or(u32::MAX)
                .min(*max)
        })
    }

    /// Takes capacity for an item without waiting. `Ok(None)` means the buffer is full.
    fn try_reserve(&self, byte_permits: u32) -> Result<Option<Permits>, TryAcquireError> {
        let slot = match Arc::clone(&self.limiter).try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => return Ok(None),
            Err(closed) => return Err(closed),
        };
        let bytes = match &self.bytes {
            Some((limiter, _)) => match Arc::clone(limiter).try_acquire_many_owned(byte_permits) {
                Ok(bytes) => Some(bytes),
                Err(TryAcquireError::NoPermits) => return Ok(None),
                Err(closed) => return Err(closed),
            },
            None => None,
        };
        Ok(Some(Permits {
            _slot: slot,
            _bytes: bytes,
        }))
    }

    /// Waits for capacity. `None` once the receiver is gone.
    async fn reserve(&self, byte_permits: u32) -> Option<Permits> {
        let slot = Arc::clone(&self.limiter).acquire_owned().await.ok()?;
        let bytes = match &self.bytes {
            Some((limiter, _)) => Some(
                Arc::clone(limiter)
                    .acquire_many_owned(byte_permits)
                    .await
                    .ok()?,
            ),
            None => None,
        };
        Some(Permits {
            _slot: slot,
            _bytes: bytes,
        })
    }

    fn close(&self) {
        self.limiter.close();
        if let Some((limiter, _)) = &self.bytes {
            limiter.close();
        }
    }

    fn after_pop(&self) {
        if self.data.is_empty() {
            self.transition(BufferState::Empty);
        } else if matches!(self.state(), BufferState::Full | BufferState::Dropping) {
            self.transition(BufferState::Draining);
        }
    }
}

pub struct LimitedSender<T> {
    inner: Arc<Inner<T>>,
}

pub struct LimitedReceiver<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Bufferable> LimitedSender<T> {
    /// Gets the number of items that this channel could accept without hitting its limit.
    pub fn capacity(&self) -> usize {
        self.inner.limiter.available_permits()
    }

    pub fn state(&self) -> BufferState {
        self.inner.state()
    }

    pub fn usage(&self) -> &BufferUsageHandle {
        &self.inner.usage
    }

    fn push(&self, permits: Permits, item: T) {
        let byte_size = item.allocated_bytes() as u64;
        // The queue and the slot semaphore share the same limit, so holding permits guarantees a
        // slot.
        if self.inner.data.push((permits, item)).is_err() {
            unreachable!("queue should always have capacity when permits can be acquired");
        }
        self.inner
            .usage
            .increment_received_event_count_and_byte_size(1, byte_size);
        self.inner.after_push();
        self.inner.read_waker.wake();
    }

    fn record_drop(&self, item: &T) {
        self.inner
            .usage
            .increment_dropped_event_count_and_byte_size(1, item.allocated_bytes() as u64);
        self.inner.transition(BufferState::Dropping);
    }

    /// Writes an item according to the buffer's `WhenFull` policy.
    ///
    /// With `Block` this waits for the consumer to free enough room. The other policies never
    /// wait on the consumer and instead report which items were discarded.
    ///
    /// # Errors
    ///
    /// Returns the item back if the receiver has been dropped.
    pub async fn send(&self, item: T) -> Result<SendOutcome<T>, SendError<T>> {
        let byte_permits = self.inner.byte_permits(&item);
        let permits = match self.inner.try_reserve(byte_permits) {
            Ok(Some(permits)) => permits,
            Err(_closed) => return Err(SendError(item)),
            Ok(None) => match self.inner.when_full {
                WhenFull::Block => {
                    self.inner.transition(BufferState::Full);
                    match self.inner.reserve(byte_permits).await {
                        Some(permits) => permits,
                        None => return Err(SendError(item)),
                    }
                }
                WhenFull::DropNewest => {
                    self.record_drop(&item);
                    return Ok(SendOutcome::DroppedNewest(item));
                }
                WhenFull::DropOldest => {
                    let mut evicted = Vec::new();
                    let permits = loop {
                        match self.inner.try_reserve(byte_permits) {
                            Ok(Some(permits)) => break permits,
                            Err(_closed) => return Err(SendError(item)),
                            Ok(None) => {}
                        }
                        match self.inner.data.pop() {
                            Some((released, oldest)) => {
                                drop(released);
                                self.record_drop(&oldest);
                                evicted.push(oldest);
                            }
                            // The consumer took the last item but has not released its permits
                            // yet.
                            None => match self.inner.reserve(byte_permits).await {
                                Some(permits) => break permits,
                                None => return Err(SendError(item)),
                            },
                        }
                    };
                    self.push(permits, item);
                    if evicted.is_empty() {
                        return Ok(SendOutcome::Queued);
                    }
                    self.inner.transition(BufferState::Dropping);
                    return Ok(SendOutcome::DroppedOldest(evicted));
                }
            },
        };

        self.push(permits, item);
        Ok(SendOutcome::Queued)
    }
}

impl<T: Bufferable> LimitedReceiver<T> {
    pub fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        loop {
            if let Some(item) = self.try_next() {
                return Poll::Ready(Some(item));
            }
            if self.is_closed() {
                return Poll::Ready(None);
            }

            self.inner.read_waker.register(cx.waker());
            // A write may have landed between the pop attempt and registering the waker.
            if self.inner.data.is_empty() && !self.is_closed() {
                return Poll::Pending;
            }
        }
    }

    /// Waits for the next item, or `None` once every sender is gone and the queue is empty.
    pub async fn next(&mut self) -> Option<T> {
        poll_fn(|cx| self.poll_next(cx)).await
    }

    /// Takes an item if one is immediately available.
    pub fn try_next(&mut self) -> Option<T> {
        let (permits, item) = self.inner.data.pop()?;
        // Releasing the permits is what unblocks a waiting `Block` writer.
        drop(permits);
        self.inner
            .usage
            .increment_sent_event_count_and_byte_size(1, item.allocated_bytes() as u64);
        self.inner.after_pop();
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    pub fn state(&self) -> BufferState {
        self.inner.state()
    }

    fn is_closed(&self) -> bool {
        self.inner.senders.load(Ordering::Acquire) == 0
    }
}

impl<T: Bufferable> Stream for LimitedReceiver<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        LimitedReceiver::poll_next(self.get_mut(), cx)
    }
}

impl<T> Clone for LimitedSender<T> {
    fn clone(&self) -> Self {
        self.inner.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Drop for LimitedSender<T> {
    fn drop(&mut self) {
        if self.inner.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.read_waker.wake();
        }
    }
}

impl<T> Drop for LimitedReceiver<T> {
    fn drop(&mut self) {
        // Wakes any blocked writer with an error instead of leaving it parked forever.
        self.inner.close();
    }
}

/// Creates a bounded buffer holding at most `limits.max_events` items and, when set,
/// `limits.max_bytes` bytes of them.
pub fn limited<T>(
    limits: BufferLimits,
    when_full: WhenFull,
    usage: BufferUsageHandle,
) -> (LimitedSender<T>, LimitedReceiver<T>) {
    let limit = limits.max_events.max(1);
    usage.set_buffer_limit(limit);
    let bytes = limits.max_bytes.map(|max_bytes| {
        let max = u32::try_from(max_bytes.max(1)).unwrap_or(u32::MAX);
        (Arc::new(Semaphore::new(max as usize)), max)
    });
    let inner = Arc::new(Inner {
        data: ArrayQueue::new(limit),
        limit,
        when_full,
        limiter: Arc::new(Semaphore::new(limit)),
        bytes,
        read_waker: AtomicWaker::new(),
        senders: AtomicUsize::new(1),
        state: AtomicU8::new(BufferState::Empty as u8),
        usage,
    });

    (
        LimitedSender {
            inner: Arc::clone(&inner),
        },
        LimitedReceiver { inner },
    )
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task::spawn};

    use super::*;

    fn channel(limit: usize, when_full: WhenFull) -> (LimitedSender<u64>, LimitedReceiver<u64>) {
        limited(BufferLimits::events(limit), when_full, BufferUsageHandle::noop())
    }

    fn byte_channel(
        max_bytes: usize,
        when_full: WhenFull,
    ) -> (LimitedSender<String>, LimitedReceiver<String>) {
        let limits = BufferLimits {
            max_events: 100,
            max_bytes: Some(max_bytes),
        };
        limited(limits, when_full, BufferUsageHandle::noop())
    }

    #[tokio::test]
    async fn send_and_receive_in_order() {
        let (tx, mut rx) = channel(4, WhenFull::Block);
        for i in 0..3 {
            assert!(matches!(tx.send(i).await.unwrap(), SendOutcome::Queued));
        }
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.next().await, Some(0));
        assert_eq!(rx.next().await, Some(1));
        assert_eq!(rx.next().await, Some(2));
        assert!(rx.try_next().is_none());
    }

    #[tokio::test]
    async fn block_waits_for_the_consumer() {
        let (tx, mut rx) = channel(1, WhenFull::Block);
        tx.send(1).await.unwrap();
        assert_eq!(tx.state(), BufferState::Full);

        let mut blocked = spawn(async { tx.send(2).await });
        assert_pending!(blocked.poll());

        assert_eq!(rx.try_next(), Some(1));
        assert!(blocked.is_woken());
        let outcome = assert_ready!(blocked.poll()).unwrap();
        assert!(matches!(outcome, SendOutcome::Queued));
        drop(blocked);

        assert_eq!(rx.next().await, Some(2));
    }

    #[tokio::test]
    async fn drop_newest_discards_incoming_item() {
        let (tx, mut rx) = channel(2, WhenFull::DropNewest);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        match tx.send(3).await.unwrap() {
            SendOutcome::DroppedNewest(item) => assert_eq!(item, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(tx.state(), BufferState::Dropping);
        assert_eq!(tx.usage().snapshot().dropped_event_count, 1);

        assert_eq!(rx.try_next(), Some(1));
        assert_eq!(rx.state(), BufferState::Draining);
        assert_eq!(rx.try_next(), Some(2));
        assert_eq!(rx.state(), BufferState::Empty);
    }

    #[tokio::test]
    async fn drop_oldest_evicts_head_of_queue() {
        let (tx, mut rx) = channel(2, WhenFull::DropOldest);
        for i in 1..=4 {
            tx.send(i).await.unwrap();
        }
        assert_eq!(tx.usage().snapshot().dropped_event_count, 2);
        assert_eq!(rx.try_next(), Some(3));
        assert_eq!(rx.try_next(), Some(4));
        assert!(rx.try_next().is_none());
    }

    #[tokio::test]
    async fn receiver_ends_after_senders_drop() {
        let (tx, mut rx) = channel(2, WhenFull::Block);
        let tx2 = tx.clone();
        tx.send(7).await.unwrap();
        drop(tx);
        tx2.send(8).await.unwrap();
        drop(tx2);

        assert_eq!(rx.next().await, Some(7));
        assert_eq!(rx.next().await, Some(8));
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = channel(1, WhenFull::Block);
        drop(rx);
        assert!(tx.send(1).await.is_err());
    }

    #[tokio::test]
    async fn state_walks_through_lifecycle() {
        let (tx, mut rx) = channel(2, WhenFull::Block);
        assert_eq!(rx.state(), BufferState::Empty);
        tx.send(1).await.unwrap();
        assert_eq!(rx.state(), BufferState::Filling);
        tx.send(2).await.unwrap();
        assert_eq!(rx.state(), BufferState::Full);
        rx.try_next();
        assert_eq!(rx.state(), BufferState::Draining);
        rx.try_next();
        assert_eq!(rx.state(), BufferState::Empty);
    }

    #[tokio::test]
    async fn byte_limit_applies_drop_newest() {
        let (tx, mut rx) = byte_channel(10, WhenFull::DropNewest);
        tx.send("aaaa".to_string()).await.unwrap();
        tx.send("bbbb".to_string()).await.unwrap();
        match tx.send("cccc".to_string()).await.unwrap() {
            SendOutcome::DroppedNewest(item) => assert_eq!(item, "cccc"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(rx.try_next().as_deref(), Some("aaaa"));
        assert!(matches!(
            tx.send("dd".to_string()).await.unwrap(),
            SendOutcome::Queued
        ));
    }

    #[tokio::test]
    async fn drop_oldest_evicts_until_the_item_fits() {
        let (tx, mut rx) = byte_channel(10, WhenFull::DropOldest);
        for item in ["aaa", "bbb", "ccc"] {
            tx.send(item.to_string()).await.unwrap();
        }
        match tx.send("dddddddd".to_string()).await.unwrap() {
            SendOutcome::DroppedOldest(evicted) => assert_eq!(evicted, vec!["aaa", "bbb", "ccc"]),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(rx.try_next().as_deref(), Some("dddddddd"));
        assert!(rx.try_next().is_none());
    }

    #[tokio::test]
    async fn oversized_item_waits_for_an_empty_buffer() {
        let (tx, mut rx) = byte_channel(4, WhenFull::Block);
        tx.send("ab".to_string()).await.unwrap();

        let mut blocked = spawn(async { tx.send("far too large".to_string()).await });
        assert_pending!(blocked.poll());

        assert_eq!(rx.try_next().as_deref(), Some("ab"));
        assert!(blocked.is_woken());
        assert!(matches!(
            assert_ready!(blocked.poll()).unwrap(),
            SendOutcome::Queued
        ));
        drop(blocked);
        assert_eq!(rx.next().await.as_deref(), Some("far too large"));
    }
}
