//! Delayed task execution for connection watchdogs
//!
//! Transports are handed an `Arc<dyn Scheduler>` instead of owning a timer
//! thread. Production code shares one [`WatchdogScheduler`] between all
//! transports, so at most one watchdog, and therefore one redial, runs at a
//! time. Tests use [`ManualScheduler`](crate::testing::ManualScheduler) to fire
//! watchdogs deterministically.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};

/// A unit of delayed work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task);
}

struct Entry {
    deadline: Instant,
    // tie breaker keeping submission order for equal deadlines
    order: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.order == other.order
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // reversed so the max-heap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Single-threaded scheduler backed by a dedicated thread
///
/// Tasks run one after another on the scheduler thread in deadline order.
/// [`shutdown`](WatchdogScheduler::shutdown) drops every pending task and
/// waits for the thread to exit; dropping the scheduler does the same.
pub struct WatchdogScheduler {
    tx: Mutex<Option<Sender<Entry>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    submitted: Mutex<u64>,
}

impl WatchdogScheduler {
    /// Start the scheduler thread
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned
    pub fn start() -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Entry>();
        let thread = thread::Builder::new()
            .name("watchdog-scheduler".to_string())
            .spawn(move || {
                let mut queue = BinaryHeap::new();
                loop {
                    let received = match queue.peek() {
                        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                        Some(Entry { deadline, .. }) => rx.recv_deadline(*deadline),
                    };
                    match received {
                        Ok(entry) => queue.push(entry),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let now = Instant::now();
                    while queue.peek().is_some_and(|entry| entry.deadline <= now) {
                        if let Some(entry) = queue.pop() {
                            (entry.task)();
                        }
                    }
                }
                tracing::debug!(dropped = queue.len(), "watchdog scheduler stopped");
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            submitted: Mutex::new(0),
        })
    }

    /// Stop the scheduler thread, discarding tasks that have not run yet
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match thread {
            // dropped from inside one of its own tasks; the loop ends on its own
            Some(thread) if thread.thread().id() == thread::current().id() => {}
            Some(thread) => {
                if thread.join().is_err() {
                    tracing::warn!("watchdog task panicked");
                }
            }
            None => {}
        }
    }
}

impl Scheduler for WatchdogScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        let order = {
            let mut submitted = self
                .submitted
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *submitted += 1;
            *submitted
        };
        let entry = Entry {
            deadline: Instant::now() + delay,
            order,
            task,
        };
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) if tx.send(entry).is_ok() => {}
            _ => tracing::debug!("scheduler shut down, dropping task"),
        }
    }
}

impl Drop for WatchdogScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
