use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{FcacheError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    jobs: VecDeque<Job>,
    stop: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    ready: Condvar,
}

/// Fixed-size worker pool over one shared task queue.
///
/// Workers sleep on a condition variable until a task arrives or the pool
/// shuts down, and run tasks outside the queue lock. Dropping the pool
/// stops the workers after the queue is drained and joins them.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "thread pool needs at least one worker");

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                stop: false,
            }),
            ready: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let shared = Arc::clone(&shared);
            workers.push(thread::spawn(move || loop {
                let job = {
                    let mut queue = shared.queue.lock().unwrap();
                    loop {
                        if let Some(job) = queue.jobs.pop_front() {
                            break job;
                        }
                        if queue.stop {
                            return;
                        }
                        queue = shared.ready.wait(queue).unwrap();
                    }
                };

                // a panicking task must not take the worker down with it
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::warn!("task panicked in a pool worker");
                }
            }));
        }

        log::trace!("thread pool started with {} workers", threads);
        Self { shared, workers }
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task with no result.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.jobs.push_back(Box::new(job));
        self.shared.ready.notify_one();
    }

    /// Queue a task and get a handle that waits on its result.
    pub fn submit<T, F>(&self, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.execute(move || {
            // the receiver may be gone already; the job still ran
            let _ = tx.send(job());
        });

        JobHandle { rx }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stop = true;
        }
        self.shared.ready.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        log::trace!("thread pool stopped");
    }
}

/// Pending result of a task submitted through [`ThreadPool::submit`].
pub struct JobHandle<T> {
    rx: Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Block until the task finishes. Fails when the result channel closed
    /// without a value, i.e. the task panicked or the pool went away.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| FcacheError::Canceled)
    }
}
