//! Serial task execution without a worker thread.
//!
//! [`SerialExecutor::execute`] enqueues a task and then tries to claim the
//! right to drain the queue. The claiming thread runs every queued task,
//! including tasks enqueued by other threads or by the tasks themselves,
//! until the queue is empty. Callers that lose the race return immediately;
//! their task runs on the draining thread.
//!
//! ```text
//! thread A: execute(t1) ──► claims ──► t1, t2, t3 ──► queue empty, releases
//! thread B: execute(t2) ──► enqueued, returns
//! t1:       execute(t3) ──► enqueued, returns
//! ```
//!
//! At most one task runs at any time, and tasks run in enqueue order.

use std::collections::VecDeque;

use parking_lot::Mutex;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    tasks: VecDeque<Task>,
    draining: bool,
}

/// A FIFO queue drained by whichever caller claims it first.
#[derive(Default)]
pub struct SerialExecutor {
    queue: Mutex<Queue>,
}

/// Releases the drain claim if a task panics.
struct DrainGuard<'a> {
    executor: &'a SerialExecutor,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.executor.queue.lock().draining = false;
        }
    }
}

impl SerialExecutor {
    /// Creates an empty executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `task` and drains the queue if no other thread is.
    ///
    /// Returns `true` when this call did the draining.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> bool {
        {
            let mut queue = self.queue.lock();
            queue.tasks.push_back(Box::new(task));
            if queue.draining {
                return false;
            }
            queue.draining = true;
        }

        let mut guard = DrainGuard {
            executor: self,
            armed: true,
        };
        loop {
            let next = {
                let mut queue = self.queue.lock();
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        queue.draining = false;
                        guard.armed = false;
                        break;
                    }
                }
            };
            next();
        }
        true
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    /// `true` while some thread holds the drain claim.
    pub fn is_draining(&self) -> bool {
        self.queue.lock().draining
    }
}
