//! Deadlines at which devices want to be polled.
//!
//! Keys are indexes into the board's device list; the queue yields
//! the earliest deadline first.
use std::cmp::Reverse;
use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use keyed_priority_queue::KeyedPriorityQueue;
use tracing::{event, Level};

pub(crate) struct PollQueue {
    items: KeyedPriorityQueue<usize, Reverse<Duration>>,
}

impl Debug for PollQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollQueue")
            .field("len", &self.items.len())
            .field("next", &self.peek())
            .finish()
    }
}

impl PollQueue {
    pub(crate) fn new() -> PollQueue {
        PollQueue {
            items: KeyedPriorityQueue::new(),
        }
    }

    pub(crate) fn peek(&self) -> Option<(usize, Duration)> {
        self.items.peek().map(|(k, Reverse(t))| (*k, *t))
    }

    /// Records `deadline` for device `key`, or forgets the device
    /// when it has nothing pending.
    pub(crate) fn schedule(&mut self, key: usize, deadline: Option<Duration>) {
        match deadline {
            Some(deadline) => {
                if let Some(Reverse(prev)) = self.items.push(key, Reverse(deadline)) {
                    if prev < deadline {
                        event!(
                            Level::TRACE,
                            "device {} poll time pushed back from {:?} to {:?}",
                            key,
                            prev,
                            deadline
                        );
                    }
                }
            }
            None => {
                self.items.remove(&key);
            }
        }
    }

    /// Removes and returns the first device whose deadline is no
    /// later than `now`.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<usize> {
        match self.peek() {
            Some((_, deadline)) if deadline <= now => self.items.pop().map(|(k, _)| k),
            _ => None,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.items = KeyedPriorityQueue::new();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[test]
fn test_pollqueue_empty() {
    let mut q = PollQueue::new();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    assert_eq!(q.peek(), None);
    assert_eq!(q.pop_due(Duration::MAX), None);
}

#[test]
fn test_pollqueue_earliest_first() {
    let mut q = PollQueue::new();
    q.schedule(0, Some(Duration::from_micros(400)));
    q.schedule(1, Some(Duration::from_micros(200)));
    q.schedule(2, Some(Duration::from_micros(300)));
    assert_eq!(q.peek(), Some((1, Duration::from_micros(200))));
    assert_eq!(q.pop_due(Duration::from_micros(100)), None);
    assert_eq!(q.pop_due(Duration::from_micros(350)), Some(1));
    assert_eq!(q.pop_due(Duration::from_micros(350)), Some(2));
    assert_eq!(q.pop_due(Duration::from_micros(350)), None);
    assert_eq!(q.len(), 1);
}

#[test]
fn test_pollqueue_reschedule_and_cancel() {
    let mut q = PollQueue::new();
    q.schedule(0, Some(Duration::from_micros(200)));
    q.schedule(0, Some(Duration::from_micros(500)));
    assert_eq!(q.len(), 1);
    assert_eq!(q.peek(), Some((0, Duration::from_micros(500))));
    q.schedule(0, None);
    assert!(q.is_empty());
    q.schedule(3, Some(Duration::ZERO));
    q.clear();
    assert!(q.is_empty());
}
