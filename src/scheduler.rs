//! Background Work
//!
//! - [`Worker`]: a single thread draining a queue of jobs, so jobs of one
//!   kind run strictly one after another
//! - [`TaskHandle`]: optional completion handle for a submitted job
//! - [`FlushGate`]: single-slot admission gate whose permit can be moved
//!   into a job and released by whichever thread drops it

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::StrataError;

type Job = Box<dyn FnOnce() + Send + 'static>;

// =============================================================================
// Worker
// =============================================================================

/// Single-threaded background task queue
pub struct Worker {
    name: &'static str,
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Start a worker thread called `name`
    pub fn spawn(name: &'static str) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in receiver.iter() {
                    job();
                }
                tracing::debug!("Worker {} stopped", name);
            })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue `task`; the handle may be waited on or dropped
    ///
    /// Fails with `Closed` once the worker was shut down.
    pub fn submit<F>(&self, task: F) -> Result<TaskHandle>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let (done_tx, done_rx) = channel::bounded(1);
        let name = self.name;
        let job: Job = Box::new(move || {
            let result = task();
            if let Err(e) = &result {
                tracing::error!("Background task on {} failed: {}", name, e);
            }
            // Nobody waiting is fine
            let _ = done_tx.send(result);
        });

        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| StrataError::Closed)?,
            None => return Err(StrataError::Closed),
        }
        Ok(TaskHandle { done: done_rx })
    }

    /// Stop taking jobs, finish the queued ones and join the thread
    pub fn shutdown(&self) -> Result<()> {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            handle
                .join()
                .map_err(|_| StrataError::BackgroundTask(format!("{} thread panicked", self.name)))?;
        }
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("{}", e);
        }
    }
}

/// Completion handle of a background job
#[derive(Debug)]
pub struct TaskHandle {
    done: Receiver<Result<()>>,
}

impl TaskHandle {
    /// Block until the job has run and return its outcome
    pub fn wait(self) -> Result<()> {
        self.done.recv().map_err(|_| {
            StrataError::BackgroundTask("task dropped before reporting".to_string())
        })?
    }
}

// =============================================================================
// Flush Gate
// =============================================================================

#[derive(Debug, Default)]
struct GateState {
    held: bool,
    interrupted: bool,
}

/// Admits one flush at a time
#[derive(Debug, Default)]
pub struct FlushGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl FlushGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the gate if it is free
    pub fn try_acquire(self: &Arc<Self>) -> Option<FlushPermit> {
        let mut state = self.state.lock();
        if state.held {
            return None;
        }
        state.held = true;
        Some(FlushPermit {
            gate: Arc::clone(self),
        })
    }

    /// Wait for the gate; fails with `Interrupted` once [`interrupt`](Self::interrupt)
    /// has been called
    pub fn acquire(self: &Arc<Self>) -> Result<FlushPermit> {
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return Err(StrataError::Interrupted);
            }
            if !state.held {
                state.held = true;
                return Ok(FlushPermit {
                    gate: Arc::clone(self),
                });
            }
            self.released.wait(&mut state);
        }
    }

    /// Wake every waiter with `Interrupted`; held permits stay valid
    pub fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.released.notify_all();
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    fn release(&self) {
        self.state.lock().held = false;
        self.released.notify_one();
    }
}

/// Proof of holding the [`FlushGate`]; releases it when dropped
#[derive(Debug)]
pub struct FlushPermit {
    gate: Arc<FlushGate>,
}

impl Drop for FlushPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
