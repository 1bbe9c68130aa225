//! Cooperative scheduler for deferred stream work.
//!
//! All stream logic runs on one logical thread. The only concurrency
//! primitive is deferral: work queued with [`Scheduler::defer`] (a microtask)
//! or [`Scheduler::defer_task`] (a macrotask) runs after the current call
//! returns, when the owner drives the scheduler.
//!
//! # Ordering
//!
//! - Microtasks run in FIFO order, and the microtask queue is drained
//!   completely before the next macrotask runs.
//! - Macrotasks run in FIFO order, one at a time.
//!
//! # Driving
//!
//! Synchronous code calls [`Scheduler::run_until_idle`]. Code that bridges to
//! tokio I/O registers each outside operation with [`Scheduler::external`]
//! and awaits [`Scheduler::run`], which sleeps until an outside completion
//! arrives.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use wirestream::Scheduler;
//!
//! let scheduler = Scheduler::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let l = log.clone();
//! scheduler.defer_task(move || l.borrow_mut().push("task"));
//! let l = log.clone();
//! scheduler.defer(move || l.borrow_mut().push("microtask"));
//!
//! scheduler.run_until_idle().unwrap();
//! assert_eq!(*log.borrow(), vec!["microtask", "task"]);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tokio::sync::Notify;

use crate::error::{Result, StreamError};

type Task = Box<dyn FnOnce()>;

/// Handle to a single-threaded task queue.
///
/// Cloning the handle shares the queues.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    /// Work that runs before the next macrotask.
    microtasks: RefCell<VecDeque<Task>>,
    /// Work that runs after the current turn.
    macrotasks: RefCell<VecDeque<Task>>,
    /// First error raised in deferred context with no `error` listener.
    uncaught: RefCell<Option<StreamError>>,
    /// Outside operations that will still queue a completion.
    outstanding: Cell<usize>,
    /// Wakes `run()` when an outside operation completes.
    wake: Notify,
}

impl Scheduler {
    /// Create a new, empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a microtask.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.microtasks.borrow_mut().push_back(Box::new(task));
    }

    /// Queue a macrotask.
    pub fn defer_task(&self, task: impl FnOnce() + 'static) {
        self.inner.macrotasks.borrow_mut().push_back(Box::new(task));
    }

    /// Check if no work is queued.
    pub fn is_idle(&self) -> bool {
        self.inner.microtasks.borrow().is_empty() && self.inner.macrotasks.borrow().is_empty()
    }

    /// Number of queued microtasks and macrotasks.
    pub fn pending_tasks(&self) -> usize {
        self.inner.microtasks.borrow().len() + self.inner.macrotasks.borrow().len()
    }

    /// Number of outside operations that have not completed yet.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.get()
    }

    /// Record an error that has nobody to receive it.
    ///
    /// The next `run_until_idle` call returns it. Only the first such error
    /// is kept; later ones are logged and dropped.
    pub(crate) fn report_uncaught(&self, err: StreamError) {
        let mut slot = self.inner.uncaught.borrow_mut();
        if slot.is_some() {
            tracing::warn!(error = %err, "dropping additional uncaught stream error");
            return;
        }
        tracing::warn!(error = %err, "uncaught stream error");
        *slot = Some(err);
    }

    /// Take the pending uncaught error, if any.
    pub fn take_uncaught(&self) -> Option<StreamError> {
        self.inner.uncaught.borrow_mut().take()
    }

    /// Run only the queued microtasks (and those they queue).
    pub fn run_microtasks(&self) -> Result<()> {
        loop {
            let task = self.inner.microtasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    self.check_uncaught()?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Run queued work until both queues are empty.
    ///
    /// Stops early and returns the error if a task raised an error with no
    /// `error` listener registered; the remaining work stays queued.
    pub fn run_until_idle(&self) -> Result<()> {
        loop {
            self.run_microtasks()?;

            let task = self.inner.macrotasks.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    self.check_uncaught()?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Drive the scheduler until it is idle and no outside operation is pending.
    ///
    /// Must be awaited on the thread that owns the streams (for instance
    /// inside a `tokio::task::LocalSet`).
    pub async fn run(&self) -> Result<()> {
        loop {
            self.run_until_idle()?;

            if !self.is_idle() {
                continue;
            }
            if self.inner.outstanding.get() == 0 {
                return Ok(());
            }

            self.inner.wake.notified().await;
        }
    }

    /// Register an outside operation that will complete later.
    pub fn external(&self) -> ExternalOp {
        self.inner.outstanding.set(self.inner.outstanding.get() + 1);
        ExternalOp {
            scheduler: Some(self.clone()),
        }
    }

    fn release_external(&self) {
        let outstanding = self.inner.outstanding.get();
        self.inner.outstanding.set(outstanding.saturating_sub(1));
        self.inner.wake.notify_one();
    }

    fn check_uncaught(&self) -> Result<()> {
        match self.inner.uncaught.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending_tasks", &self.pending_tasks())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Token for an operation running outside the scheduler.
///
/// Completing it queues the continuation as a macrotask and wakes
/// [`Scheduler::run`]. Dropping it without completing releases the
/// registration, so an abandoned operation cannot keep `run` waiting.
pub struct ExternalOp {
    scheduler: Option<Scheduler>,
}

impl ExternalOp {
    /// Queue the continuation and release the registration.
    pub fn complete(mut self, task: impl FnOnce() + 'static) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.defer_task(task);
            scheduler.release_external();
        }
    }
}

impl Drop for ExternalOp {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.release_external();
        }
    }
}
