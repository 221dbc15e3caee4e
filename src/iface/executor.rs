//! Pluggable task executor.
//!
//! Every interface funnels its inbound parsing, handler dispatch, and
//! outbound serialization through one [`Executor`] so state is only touched
//! from a single logical thread. Production interfaces use
//! [`WorkerExecutor`]; tests inject [`InlineExecutor`] to make every
//! operation complete before the call returns.

use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{Error, Result};

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Capability object deciding where interface work runs.
pub trait Executor: Send + Sync {
    /// Enqueue `task`. Non-blocking for asynchronous executors.
    fn schedule(&self, task: Task) -> Result<()>;

    /// Enqueue `task` and wait for it to finish.
    fn run_and_wait(&self, task: Task) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.schedule(Box::new(move || {
            task();
            let _ = tx.send(());
        }))?;
        rx.recv().map_err(|_| Error::Disposed)
    }

    /// Drain queued tasks and stop accepting new ones. Idempotent.
    fn shutdown(&self);
}

/// Dedicated worker thread consuming an unbounded FIFO queue.
pub struct WorkerExecutor {
    tx: Mutex<Option<mpsc::Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: ThreadId,
}

impl WorkerExecutor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name("openlcb-iface".into())
            .spawn(move || {
                // Runs until every sender is dropped and the queue is drained.
                while let Ok(task) = rx.recv() {
                    task();
                }
            })
            .expect("spawn interface worker thread");
        let worker_thread = handle.thread().id();
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
            worker_thread,
        }
    }
}

impl Default for WorkerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for WorkerExecutor {
    fn schedule(&self, task: Task) -> Result<()> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(task).map_err(|_| Error::Disposed),
            None => Err(Error::Disposed),
        }
    }

    fn shutdown(&self) {
        // Dropping the sender lets the worker drain the queue and exit.
        drop(self.tx.lock().take());
        if thread::current().id() == self.worker_thread {
            // Shutdown requested from a task on the worker itself; the
            // thread exits once the current task returns.
            warn!("executor shutdown from its own worker; skipping join");
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Caller-runs executor for deterministic tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for InlineExecutor {
    fn schedule(&self, task: Task) -> Result<()> {
        task();
        Ok(())
    }

    fn shutdown(&self) {}
}
