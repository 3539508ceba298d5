//! Bounded worker pool accepting connection-handler jobs (C3).
//!
//! Grounded on the teacher's per-connection `thread::spawn` loop in its service-start
//! function, generalized into a fixed-size pool so the worker count bounds concurrent
//! platform exposure instead of spawning one thread per connection unboundedly.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
}

struct Worker {
    #[allow(dead_code)]
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl ThreadPool {
    /// Builds a pool with `size` worker threads. Panics if `size` is zero, matching the
    /// "bounded, non-empty" contract a server loop relies on.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "thread pool size must be greater than zero");

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            workers.push(Worker::new(id, Arc::clone(&receiver)));
        }

        ThreadPool {
            workers,
            sender: Some(sender),
        }
    }

    /// Enqueues a job. Returns an error if every worker has already shut down (the
    /// receiving end is gone) so the caller can fall back (e.g. serve inline, or drop
    /// the connection) instead of panicking.
    pub fn execute<F>(&self, job: F) -> Result<(), &'static str>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| "thread pool workers have shut down"),
            None => Err("thread pool is shutting down"),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<Receiver<Job>>>) -> Worker {
        let handle = thread::spawn(move || loop {
            let job = {
                let guard = receiver.lock().unwrap();
                guard.recv()
            };
            match job {
                Ok(job) => {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                    if result.is_err() {
                        tracing::error!(worker = id, "connection job panicked");
                    }
                }
                Err(_) => break,
            }
        });

        Worker {
            id,
            handle: Some(handle),
        }
    }
}

/// Dropping the pool closes the job channel and joins every worker, so a clean shutdown
/// waits for in-flight jobs to finish their current iteration.
impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn executes_jobs_across_workers() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        // Give workers a moment to drain the queue before the pool is dropped.
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn a_panicking_job_does_not_kill_the_worker() {
        let pool = ThreadPool::new(1);
        pool.execute(|| panic!("boom")).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = Arc::clone(&counter);
        pool.execute(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "greater than zero")]
    fn zero_sized_pool_panics() {
        let _ = ThreadPool::new(0);
    }
}
