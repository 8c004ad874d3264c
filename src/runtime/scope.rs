//! Scope - the explicit task context
//!
//! Every task body receives the `Scope` of its own task. All spawning and
//! suspension goes through it, so there is no ambient "current task" state
//! anywhere: a `Scope` is an explicit capability for exactly one task.
//!
//! Suspension primitives carry the owning task's cancellation flag and check
//! it before arming and after resuming. A task that never suspends and never
//! checks `is_active` keeps running until its body ends naturally; that is the
//! documented shape of cooperative cancellation, not a defect.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use tracing::debug;

use super::executor::{Core, Harness};
use super::handle::{Deferred, TaskHandle};
use super::snapshot::TaskSnapshot;
use super::task::TaskId;

/// Explicit context handle of one task
#[derive(Clone)]
pub struct Scope {
    pub(crate) core: Rc<Core>,
    pub(crate) task: TaskId,
}

impl Scope {
    pub(crate) fn new(core: Rc<Core>, task: TaskId) -> Self {
        Self { core, task }
    }

    /// Id of the task this scope belongs to
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Launch an eagerly started child task. The body builder receives the
    /// child's own scope.
    pub fn launch<F, Fut>(&self, f: F) -> TaskHandle
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.launch_inner(f, false)
    }

    /// Launch a child task that stays `Created` until its handle is started
    pub fn launch_lazy<F, Fut>(&self, f: F) -> TaskHandle
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.launch_inner(f, true)
    }

    fn launch_inner<F, Fut>(&self, f: F, lazy: bool) -> TaskHandle
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let id = self.core.create_task(Some(self.task), lazy);
        let child = Scope::new(self.core.clone(), id);
        let body = Box::pin(Harness::new(f(child)));
        self.core.install_body(id, body);
        TaskHandle {
            core: self.core.clone(),
            id,
        }
    }

    /// Launch an eagerly started child task producing a value. The failure of
    /// the body is captured in the returned handle rather than raised here.
    pub fn deferred<F, Fut, T>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = T> + 'static,
        T: 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let id = self.core.create_task(Some(self.task), false);
        let child = Scope::new(self.core.clone(), id);
        let fut = f(child);
        let body = Box::pin(Harness::new(async move {
            let value = fut.await;
            let _ = sender.send(value);
        }));
        self.core.install_body(id, body);
        Deferred::new(
            TaskHandle {
                core: self.core.clone(),
                id,
            },
            receiver,
        )
    }

    /// Suspend the current task for `delay`. The standard suspension
    /// primitive: the task yields here and the scheduler resumes it once the
    /// deadline elapses.
    pub fn delay(&self, delay: Duration) -> Sleep {
        Sleep {
            core: self.core.clone(),
            owner: self.task,
            delay,
            deadline: None,
        }
    }

    /// Suspend the current task for `millis` milliseconds
    pub fn delay_ms(&self, millis: u64) -> Sleep {
        self.delay(Duration::from_millis(millis))
    }

    /// Cooperative check-and-yield point: reschedules the task at the back of
    /// the ready queue
    pub fn yield_now(&self) -> YieldNow {
        YieldNow {
            core: self.core.clone(),
            owner: self.task,
            yielded: false,
        }
    }

    /// Whether this task should keep working. Turns false the moment
    /// cancellation is requested; the canonical loop condition for
    /// cancellable work.
    pub fn is_active(&self) -> bool {
        !self.core.cancel_requested(self.task) && !self.core.state(self.task).is_terminal()
    }

    /// Whether cancellation has been requested for this task
    pub fn is_cancelled(&self) -> bool {
        self.core.cancel_requested(self.task)
    }

    /// Cancel this task and its whole subtree
    pub fn cancel(&self) {
        debug!(task = self.task.0, "scope cancelled itself");
        self.core.cancel(self.task);
    }

    /// Handle to this scope's own task
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            core: self.core.clone(),
            id: self.task,
        }
    }

    /// Point-in-time view of this task's subtree
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot::capture(&self.core, self.task)
    }
}

/// Future returned by [`Scope::delay`]
pub struct Sleep {
    core: Rc<Core>,
    owner: TaskId,
    delay: Duration,
    deadline: Option<Instant>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        // a cancelled task never arms or re-arms its timer; the scheduler
        // unwinds it instead of resuming
        if this.core.cancel_requested(this.owner) {
            return Poll::Pending;
        }
        let now = Instant::now();
        match this.deadline {
            None => {
                this.core.arm_timer(this.owner, this.delay, now);
                this.deadline = Some(now + this.delay);
                Poll::Pending
            }
            Some(deadline) if now >= deadline => Poll::Ready(()),
            // woken for some other reason; the timer is still pending
            Some(_) => Poll::Pending,
        }
    }
}

/// Future returned by [`Scope::yield_now`]
pub struct YieldNow {
    core: Rc<Core>,
    owner: TaskId,
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.core.cancel_requested(this.owner) {
            return Poll::Pending;
        }
        if this.yielded {
            Poll::Ready(())
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
