use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::scheduler::{Scheduler, Task};

/// A scheduler that only runs tasks when told to
///
/// Delays are recorded but never waited for, which makes watchdog behaviour
/// deterministic in tests.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<(Duration, Task)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Delays of the waiting tasks, in submission order
    pub fn delays(&self) -> Vec<Duration> {
        self.lock().iter().map(|(delay, _)| *delay).collect()
    }

    /// Run every task queued so far, as if their deadlines had passed
    ///
    /// Tasks scheduled while these run stay queued for the next call. Returns
    /// the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let tasks = std::mem::take(&mut *self.lock());
        let count = tasks.len();
        for (_, task) in tasks {
            task();
        }
        count
    }

    /// Drop every queued task without running it
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Duration, Task)>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        self.lock().push((delay, task));
    }
}
