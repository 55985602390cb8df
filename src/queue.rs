//! Thread-safe FIFO connecting socket threads to application threads.
//!
//! One [`MessageQueue`] is shared by a producer and a consumer through cheap
//! clones of the handle. Consumers pick one of two disciplines:
//!
//! - poll: [`MessageQueue::try_pop`] / [`MessageQueue::drain`] never block, for
//!   application loops that check for input once per tick;
//! - block: [`MessageQueue::pop_timeout`] / [`MessageQueue::pop_blocking`] park
//!   the thread until an item arrives, for the egress socket thread.
//!
//! The lock only guards deque mutation; waiting happens on a condition variable
//! which releases the lock while parked.
use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::Duration,
};

#[derive(Debug)]
struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

/// Unbounded multi-producer, multi-consumer FIFO.
#[derive(Debug)]
pub struct MessageQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                items: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
            }),
        }
    }

    // A panic while holding the lock cannot leave a VecDeque half-mutated, so
    // a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.shared
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends `item`. Never blocks beyond the lock and never fails.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.shared.available.notify_one();
    }

    /// Appends every item in order, waking as many waiters as needed.
    pub fn extend<I: IntoIterator<Item = T>>(&self, items: I) {
        let added = {
            let mut queue = self.lock();
            let before = queue.len();
            queue.extend(items);
            queue.len() - before
        };

        match added {
            0 => {}
            1 => self.shared.available.notify_one(),
            _ => self.shared.available.notify_all(),
        }
    }

    /// Takes the oldest item if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Takes everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Waits up to `timeout` for an item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let queue = self.lock();
        let (mut queue, _) = self
            .shared
            .available
            .wait_timeout_while(queue, timeout, |items| items.is_empty())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.pop_front()
    }

    /// Waits until an item is available.
    pub fn pop_blocking(&self) -> T {
        let mut queue = self
            .shared
            .available
            .wait_while(self.lock(), |items| items.is_empty())
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match queue.pop_front() {
            Some(item) => item,
            None => unreachable!("woken with an empty queue"),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Clone for MessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = MessageQueue::new();
        queue.push('A');
        queue.push('B');
        queue.push('C');

        assert_eq!(queue.try_pop(), Some('A'));
        assert_eq!(queue.try_pop(), Some('B'));
        assert_eq!(queue.try_pop(), Some('C'));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn try_pop_on_empty_does_not_block() {
        let queue: MessageQueue<u8> = MessageQueue::new();
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_takes_everything() {
        let queue = MessageQueue::new();
        queue.extend([1, 2, 3]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_timeout_on_empty_gives_up() {
        let queue: MessageQueue<u8> = MessageQueue::new();
        let start = Instant::now();

        assert_eq!(queue.pop_timeout(Duration::from_millis(50)), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn pop_blocking_waits_for_push() {
        let queue = MessageQueue::new();
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            producer.push(String::from("spawn"));
        });

        let start = Instant::now();
        assert_eq!(queue.pop_blocking(), "spawn");
        assert!(start.elapsed() >= Duration::from_millis(40));
        handle.join().unwrap();
    }

    #[test]
    fn pop_timeout_receives_concurrent_push() {
        let queue = MessageQueue::new();
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(7u32);
        });

        assert_eq!(queue.pop_timeout(Duration::from_secs(5)), Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn order_preserved_across_threads() {
        let queue = MessageQueue::new();
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            for i in 0..1000 {
                producer.push(i);
            }
        });

        let received = (0..1000).map(|_| queue.pop_blocking()).collect::<Vec<_>>();
        assert_eq!(received, (0..1000).collect::<Vec<_>>());
        handle.join().unwrap();
    }
}
