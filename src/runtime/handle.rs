//! Task and value handles
//!
//! `TaskHandle` observes and steers one task: lifecycle flags, lazy start,
//! cancellation, join, completion callbacks, child enumeration. `Deferred<T>`
//! is the value-bearing variant; awaiting it yields the body's result once the
//! task (including its children) is terminal, or the captured failure.
//!
//! Handles are cheap clones around the owning core and a task index; they stay
//! valid for the whole run even after the task turns terminal.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use super::error::{JoinError, RuntimeError};
use super::executor::Core;
use super::snapshot::TaskSnapshot;
use super::task::{TaskId, TaskState};

/// Handle to a launched task
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) core: Rc<Core>,
    pub(crate) id: TaskId,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.core.state(self.id)
    }

    /// Started and not yet terminal or unwinding. A lazy task is inactive
    /// until `start`; a cancelled task is inactive immediately.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            TaskState::Scheduled | TaskState::Running | TaskState::Completing
        ) && !self.core.cancel_requested(self.id)
    }

    /// Cancellation requested or already unwound
    pub fn is_cancelled(&self) -> bool {
        self.core.cancel_requested(self.id)
            || matches!(self.state(), TaskState::Cancelling | TaskState::Cancelled)
    }

    /// Reached any terminal state, including `Cancelled` and `Failed`
    pub fn is_completed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Schedule a lazily launched task. Errors if the task already started.
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.core.start(self.id)
    }

    /// Like `start`, but reports the no-op case as `false` instead of an error
    pub fn try_start(&self) -> bool {
        self.core.start(self.id).is_ok()
    }

    /// Request cancellation of this task and its whole subtree. Cooperative:
    /// each body unwinds at its next suspension point, and the task turns
    /// `Cancelled` only after all of its children are terminal.
    pub fn cancel(&self) {
        self.core.cancel(self.id);
    }

    /// Run `f` exactly once when the task reaches a terminal state,
    /// synchronously from whichever context observes the transition. Runs
    /// immediately if the task is already terminal.
    pub fn on_completion<F>(&self, f: F)
    where
        F: FnOnce(TaskState) + 'static,
    {
        self.core.add_callback(self.id, Box::new(f));
    }

    /// Direct children in launch order
    pub fn children(&self) -> Vec<TaskHandle> {
        self.core
            .children_of(self.id)
            .into_iter()
            .map(|id| TaskHandle {
                core: self.core.clone(),
                id,
            })
            .collect()
    }

    /// Suspend until the task is terminal. Resolves immediately if it already
    /// is. Never re-raises the task's failure.
    pub fn join(&self) -> Join {
        Join {
            core: self.core.clone(),
            id: self.id,
        }
    }

    /// Point-in-time view of this task's subtree
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot::capture(&self.core, self.id)
    }
}

/// Future returned by [`TaskHandle::join`]
pub struct Join {
    core: Rc<Core>,
    id: TaskId,
}

impl Future for Join {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.core.add_join_waiter(self.id, cx.waker().clone()) {
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Handle to a task that produces a value
///
/// Awaiting yields `Ok(value)` once the task completes, `Err(Cancelled)` if it
/// was cancelled first, or `Err(Failed)` re-raising the captured body failure.
pub struct Deferred<T> {
    handle: TaskHandle,
    receiver: oneshot::Receiver<T>,
}

impl<T> Deferred<T> {
    pub(crate) fn new(handle: TaskHandle, receiver: oneshot::Receiver<T>) -> Self {
        Self { handle, receiver }
    }

    /// The plain task handle behind this value
    pub fn task(&self) -> TaskHandle {
        self.handle.clone()
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let state = this.handle.state();
        if !state.is_terminal() {
            if this
                .handle
                .core
                .add_join_waiter(this.handle.id, cx.waker().clone())
            {
                return Poll::Pending;
            }
        }
        match this.handle.state() {
            TaskState::Completed => match this.receiver.try_recv() {
                Ok(Some(value)) => Poll::Ready(Ok(value)),
                // completed without sending cannot happen; report it as a
                // cancellation rather than hanging
                _ => Poll::Ready(Err(JoinError::Cancelled)),
            },
            TaskState::Failed => {
                let msg = this
                    .handle
                    .core
                    .failure_of(this.handle.id)
                    .unwrap_or_else(|| "task body failed".to_string());
                Poll::Ready(Err(JoinError::Failed(msg)))
            }
            _ => Poll::Ready(Err(JoinError::Cancelled)),
        }
    }
}
