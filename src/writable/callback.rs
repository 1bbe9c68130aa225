//! At-most-once completion callbacks handed to low-level hooks.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::codec::Chunk;
use crate::error::{Result, StreamError};

/// Completion handle passed to `doWrite`, `doWritev`, `doFinal`,
/// `doTransform` and `doFlush`.
///
/// The handle is `Clone` so a hook can move it into whatever finishes the
/// work. Only the first completion takes effect; every further call reports
/// [`StreamError::MultipleCallback`] on the stream instead.
pub struct Completion<T> {
    inner: Rc<CompletionInner<T>>,
}

/// Completion of a write, batch write or final hook.
pub type WriteCallback = Completion<()>;

/// Completion of a transform or flush hook, optionally carrying output.
pub type TransformCallback = Completion<Option<Chunk>>;

struct CompletionInner<T> {
    called: Cell<bool>,
    on_complete: RefCell<Option<Box<dyn FnOnce(Result<T>)>>>,
    on_repeat: Box<dyn Fn()>,
}

impl<T> Completion<T> {
    pub(crate) fn new<C, R>(on_complete: C, on_repeat: R) -> Self
    where
        C: FnOnce(Result<T>) + 'static,
        R: Fn() + 'static,
    {
        Self {
            inner: Rc::new(CompletionInner {
                called: Cell::new(false),
                on_complete: RefCell::new(Some(Box::new(on_complete))),
                on_repeat: Box::new(on_repeat),
            }),
        }
    }

    /// Report the outcome of the operation.
    pub fn complete(&self, result: Result<T>) {
        if self.inner.called.replace(true) {
            (self.inner.on_repeat)();
            return;
        }
        let on_complete = self.inner.on_complete.borrow_mut().take();
        if let Some(on_complete) = on_complete {
            on_complete(result);
        }
    }

    /// Report failure.
    pub fn fail(&self, err: StreamError) {
        self.complete(Err(err));
    }

    /// Check if the callback was invoked.
    pub fn is_called(&self) -> bool {
        self.inner.called.get()
    }
}

impl Completion<()> {
    /// Report success.
    pub fn ok(&self) {
        self.complete(Ok(()));
    }
}

impl Completion<Option<Chunk>> {
    /// Report success, pushing `output` (if any) to the read side.
    pub fn done(&self, output: Option<Chunk>) {
        self.complete(Ok(output));
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("called", &self.inner.called.get())
            .finish()
    }
}
