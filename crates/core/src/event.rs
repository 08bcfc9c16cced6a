//! Per-socket event queue and one-shot timers.
//!
//! Each control socket runs on its own cooperative loop: callbacks run to
//! completion, and everything that crosses a thread boundary arrives here as
//! an [`Event`]. Writers and readers post readiness, the transport posts
//! socket state changes, the lock arbiter posts wake-ups, and timers expire
//! into the same stream.
//!
//! Delivery is FIFO for posted events. Due timers are delivered ahead of
//! posted events so a fired deadline cannot be starved by a busy queue.

use std::collections::VecDeque;
use std::io;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Identifies a control socket within the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SocketId(
    /// Raw numeric identity.
    pub u64,
);

/// Identifies an asynchronous writer instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct WriterId(
    /// Raw numeric identity.
    pub u64,
);

/// Identifies an asynchronous reader instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ReaderId(
    /// Raw numeric identity.
    pub u64,
);

/// Handle of a pending one-shot timer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TimerId(u64);

/// State change on the transport's socket.
#[derive(Debug)]
pub enum SocketEvent {
    /// The connection attempt finished; `error` is set on failure.
    Connection {
        /// Failure cause, if any.
        error: Option<io::Error>,
    },
    /// One address of a multi-address attempt failed; the next is being
    /// tried.
    ConnectionNext {
        /// Failure cause of the attempted address.
        error: Option<io::Error>,
    },
    /// Inbound bytes are available.
    Read,
    /// The socket accepts outbound bytes again.
    Write,
    /// The connection ended; `error` distinguishes a server-side close from
    /// a failure.
    Close {
        /// Failure cause, if any.
        error: Option<io::Error>,
    },
}

/// An event delivered to a control socket's handler.
#[derive(Debug)]
pub enum Event {
    /// A one-shot timer fired.
    Timer(TimerId),
    /// A cache lock this socket waits for may have become available.
    ObtainLock,
    /// Transport state change.
    Socket(SocketEvent),
    /// The resolver produced an address; informational.
    HostAddress(String),
    /// The writer drained a slot after reporting `wait`.
    WriteReady(WriterId),
    /// The reader filled a slot after reporting `wait`.
    ReadReady(ReaderId),
}

#[derive(Debug)]
struct QueueState {
    events: VecDeque<Event>,
    timers: Vec<TimerEntry>,
    next_timer: u64,
}

#[derive(Debug)]
struct TimerEntry {
    id: TimerId,
    deadline: Instant,
}

/// FIFO event queue with one-shot timers.
///
/// Shared between the owning control thread and the worker/transport threads
/// that post into it; all methods take `&self`.
#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                timers: Vec::new(),
                next_timer: 1,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends an event and wakes a waiting consumer.
    pub fn post(&self, event: Event) {
        let mut state = self.state.lock().expect("event queue mutex poisoned");
        state.events.push_back(event);
        self.cond.notify_one();
    }

    /// Removes every queued event for which `keep` returns `false`.
    ///
    /// This is the purge hook used when a writer or reader is destroyed:
    /// stale readiness events must not reach the handler afterwards.
    pub fn filter<F>(&self, mut keep: F)
    where
        F: FnMut(&Event) -> bool,
    {
        let mut state = self.state.lock().expect("event queue mutex poisoned");
        state.events.retain(|event| keep(event));
    }

    /// Arms a one-shot timer and returns its handle.
    pub fn add_timer(&self, after: Duration) -> TimerId {
        let mut state = self.state.lock().expect("event queue mutex poisoned");
        let id = TimerId(state.next_timer);
        state.next_timer += 1;
        state.timers.push(TimerEntry {
            id,
            deadline: Instant::now() + after,
        });
        self.cond.notify_one();
        id
    }

    /// Cancels a pending timer. Returns `false` if it already fired.
    pub fn stop_timer(&self, id: TimerId) -> bool {
        let mut state = self.state.lock().expect("event queue mutex poisoned");
        let before = state.timers.len();
        state.timers.retain(|entry| entry.id != id);
        state.timers.len() != before
    }

    /// Returns the next event without blocking.
    ///
    /// Due timers take precedence over posted events.
    pub fn try_next(&self) -> Option<Event> {
        let mut state = self.state.lock().expect("event queue mutex poisoned");
        Self::take_next(&mut state, Instant::now())
    }

    /// Blocks until an event is available or `max_wait` elapses.
    pub fn wait_next(&self, max_wait: Duration) -> Option<Event> {
        let wait_deadline = Instant::now() + max_wait;
        let mut state = self.state.lock().expect("event queue mutex poisoned");
        loop {
            let now = Instant::now();
            if let Some(event) = Self::take_next(&mut state, now) {
                return Some(event);
            }
            let mut until = wait_deadline;
            if let Some(deadline) = state.timers.iter().map(|entry| entry.deadline).min() {
                until = until.min(deadline);
            }
            if until <= now {
                return None;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, until - now)
                .expect("event queue mutex poisoned");
            state = guard;
            if Instant::now() >= wait_deadline && state.events.is_empty() {
                // One last chance for a due timer before giving up.
                let now = Instant::now();
                return Self::take_next(&mut state, now);
            }
        }
    }

    /// Number of queued (posted, not timer) events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("event queue mutex poisoned")
            .events
            .len()
    }

    /// Returns `true` if no posted events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_next(state: &mut QueueState, now: Instant) -> Option<Event> {
        if let Some(pos) = state
            .timers
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(_, entry)| entry.deadline)
            .map(|(pos, _)| pos)
        {
            let entry = state.timers.swap_remove(pos);
            return Some(Event::Timer(entry.id));
        }
        state.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_delivery() {
        let queue = EventQueue::new();
        queue.post(Event::ObtainLock);
        queue.post(Event::HostAddress("10.0.0.1".into()));
        assert!(matches!(queue.try_next(), Some(Event::ObtainLock)));
        assert!(matches!(queue.try_next(), Some(Event::HostAddress(_))));
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn filter_removes_matching_events() {
        let queue = EventQueue::new();
        queue.post(Event::WriteReady(WriterId(1)));
        queue.post(Event::ObtainLock);
        queue.post(Event::WriteReady(WriterId(2)));
        queue.filter(|event| !matches!(event, Event::WriteReady(WriterId(1))));
        assert!(matches!(queue.try_next(), Some(Event::ObtainLock)));
        assert!(matches!(
            queue.try_next(),
            Some(Event::WriteReady(WriterId(2)))
        ));
    }

    #[test]
    fn stopped_timer_never_fires() {
        let queue = EventQueue::new();
        let id = queue.add_timer(Duration::from_millis(1));
        assert!(queue.stop_timer(id));
        thread::sleep(Duration::from_millis(5));
        assert!(queue.try_next().is_none());
        assert!(!queue.stop_timer(id));
    }

    #[test]
    fn due_timer_precedes_posted_events() {
        let queue = EventQueue::new();
        let id = queue.add_timer(Duration::ZERO);
        queue.post(Event::ObtainLock);
        match queue.try_next() {
            Some(Event::Timer(fired)) => assert_eq!(fired, id),
            other => panic!("expected timer, got {other:?}"),
        }
        assert!(matches!(queue.try_next(), Some(Event::ObtainLock)));
    }

    #[test]
    fn wait_next_wakes_on_cross_thread_post() {
        let queue = Arc::new(EventQueue::new());
        let poster = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            poster.post(Event::ObtainLock);
        });
        let event = queue.wait_next(Duration::from_secs(5));
        assert!(matches!(event, Some(Event::ObtainLock)));
        handle.join().unwrap();
    }

    #[test]
    fn wait_next_returns_fired_timer() {
        let queue = EventQueue::new();
        let id = queue.add_timer(Duration::from_millis(5));
        match queue.wait_next(Duration::from_secs(5)) {
            Some(Event::Timer(fired)) => assert_eq!(fired, id),
            other => panic!("expected timer, got {other:?}"),
        }
    }

    #[test]
    fn wait_next_times_out() {
        let queue = EventQueue::new();
        assert!(queue.wait_next(Duration::from_millis(5)).is_none());
    }
}
