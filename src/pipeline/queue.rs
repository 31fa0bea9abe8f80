//! Bounded blocking queue connecting pipeline stages
//!
//! Producers block while the queue is full, consumers block while it is empty.
//! `shutdown` is irreversible: it wakes every waiter, refuses further pushes,
//! and lets consumers drain whatever is still queued before they observe the
//! end of the stream.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use super::types::{Frame, Packet};

/// Compressed units waiting for a decoder
pub type PacketQueue = BoundedQueue<Packet>;

/// Raw frames between decode, convert and display
pub type FrameQueue = BoundedQueue<Frame>;

/// Reason a non-blocking push was refused; the item is handed back.
pub enum TryPushError<T> {
    Full(T),
    Shutdown(T),
}

impl<T> TryPushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryPushError::Full(item) | TryPushError::Shutdown(item) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, TryPushError::Full(_))
    }
}

impl<T> fmt::Debug for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryPushError::Full(_) => write!(f, "Full(..)"),
            TryPushError::Shutdown(_) => write!(f, "Shutdown(..)"),
        }
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// FIFO queue with an optional capacity bound
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    /// 0 means unbounded
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (0 = unbounded)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    fn full(&self, inner: &Inner<T>) -> bool {
        self.capacity != 0 && inner.items.len() >= self.capacity
    }

    /// Block until there is room, then enqueue
    ///
    /// Returns the item back if the queue is (or becomes) shut down.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        while !inner.shutdown && self.full(&inner) {
            self.not_full.wait(&mut inner);
        }
        if inner.shutdown {
            return Err(item);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue without blocking
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Err(TryPushError::Shutdown(item));
        }
        if self.full(&inner) {
            return Err(TryPushError::Full(item));
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item is available
    ///
    /// Returns `None` only once the queue is shut down and empty.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        while !inner.shutdown && inner.items.is_empty() {
            self.not_empty.wait(&mut inner);
        }
        let item = inner.items.pop_front();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`
    pub fn pop_with_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.shutdown && inner.items.is_empty() {
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        let item = inner.items.pop_front();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Discard every queued item, returning how many were dropped
    pub fn flush(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.items.len();
        inner.items.clear();
        drop(inner);
        self.not_full.notify_all();
        dropped
    }

    /// Refuse further pushes and wake every blocked producer and consumer
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &inner.items.len())
            .field("capacity", &self.capacity)
            .field("shutdown", &inner.shutdown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_fifo_order_across_threads() {
        let queue = Arc::new(BoundedQueue::new(4));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    queue.push(i).unwrap();
                }
                queue.shutdown();
            })
        };

        let mut received = Vec::new();
        while let Some(item) = queue.pop() {
            assert!(queue.len() <= queue.capacity());
            received.push(item);
        }
        producer.join().unwrap();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_push_blocks_at_capacity() {
        let queue = Arc::new(BoundedQueue::new(30));
        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let done = done.clone();
            thread::spawn(move || {
                for i in 0..31 {
                    queue.push(i).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        wait_for(|| queue.len() == 30);
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 30);

        assert_eq!(queue.pop(), Some(0));
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 30);
    }

    #[test]
    fn test_try_push_full_returns_item() {
        let queue = BoundedQueue::new(1);
        queue.try_push(1).unwrap();
        match queue.try_push(2) {
            Err(TryPushError::Full(item)) => assert_eq!(item, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_drains_then_ends() {
        let queue = BoundedQueue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.shutdown();

        assert_eq!(queue.push(3), Err(3));
        assert!(matches!(queue.try_push(4), Err(TryPushError::Shutdown(4))));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_shutdown());
    }

    #[test]
    fn test_shutdown_wakes_blocked_consumer() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_shutdown_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(0).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(1))
        };
        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert_eq!(producer.join().unwrap(), Err(1));
    }

    #[test]
    fn test_pop_with_timeout_expires() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        let started = Instant::now();
        assert_eq!(queue.pop_with_timeout(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(30));

        queue.push(7).unwrap();
        assert_eq!(queue.pop_with_timeout(Duration::from_millis(30)), Some(7));
    }

    #[test]
    fn test_flush_wakes_producer() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(3))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.flush(), 2);
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_unbounded_never_blocks() {
        let queue = BoundedQueue::unbounded();
        for i in 0..1000 {
            queue.try_push(i).unwrap();
        }
        assert_eq!(queue.len(), 1000);
    }
}
