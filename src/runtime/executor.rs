//! Core scheduler
//!
//! One `Core` per blocking run, owned by the thread that entered it:
//! - FIFO ready queue of task ids, wakers push into it through shared state
//! - tasks interleave only at suspension points (timers, joins, yields)
//! - cancellation marks a subtree pre-order and unwinds each task at its next
//!   suspension point; a parent turns terminal only after its children
//! - a body panic is captured, cancels the siblings, and travels upward as the
//!   parent's own failure (first failure wins)
//!
//! The table is never borrowed across a body poll, a body drop, a completion
//! callback, or a waker call. Bodies and callbacks run user code and may
//! re-enter the core through handles.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::thread;
use std::time::{Duration, Instant};

use pin_project_lite::pin_project;
use tracing::debug;

use super::error::{RunError, RuntimeError};
use super::task::{BodyExit, BoxBody, CompletionFn, TaskId, TaskRecord, TaskState, TaskTable};
use super::timer::{TimerId, TimerQueue};

// ============================================================================
// Ready queue
// ============================================================================

/// FIFO queue of runnable task ids with membership dedup. Shared with wakers
/// so a wake from inside a poll lands in the same queue.
pub(crate) struct ReadyQueue {
    queue: VecDeque<TaskId>,
    queued: HashSet<TaskId>,
}

impl ReadyQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
        }
    }

    fn push(&mut self, id: TaskId) {
        if self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }

    fn pop(&mut self) -> Option<TaskId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }
}

// ============================================================================
// Waker
// ============================================================================

/// Shared state for a waker to signal task readiness
struct WakerState {
    task: TaskId,
    ready: Rc<RefCell<ReadyQueue>>,
}

fn task_waker(task: TaskId, ready: Rc<RefCell<ReadyQueue>>) -> Waker {
    let state = Box::new(WakerState { task, ready });
    let raw = RawWaker::new(Box::into_raw(state) as *const (), &WAKER_VTABLE);
    unsafe { Waker::from_raw(raw) }
}

const WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(waker_clone, waker_wake, waker_wake_by_ref, waker_drop);

unsafe fn waker_clone(ptr: *const ()) -> RawWaker {
    unsafe {
        let state = &*(ptr as *const WakerState);
        let cloned = Box::new(WakerState {
            task: state.task,
            ready: state.ready.clone(),
        });
        RawWaker::new(Box::into_raw(cloned) as *const (), &WAKER_VTABLE)
    }
}

unsafe fn waker_wake(ptr: *const ()) {
    unsafe {
        let state = Box::from_raw(ptr as *mut WakerState);
        state.ready.borrow_mut().push(state.task);
    }
}

unsafe fn waker_wake_by_ref(ptr: *const ()) {
    unsafe {
        let state = &*(ptr as *const WakerState);
        state.ready.borrow_mut().push(state.task);
    }
}

unsafe fn waker_drop(ptr: *const ()) {
    unsafe {
        drop(Box::from_raw(ptr as *mut WakerState));
    }
}

// ============================================================================
// Body harness
// ============================================================================

pin_project! {
    /// Wraps a task body and reports how it ended. A panic is caught here and
    /// converted into a captured failure instead of unwinding into the pump.
    pub(crate) struct Harness<F> {
        #[pin]
        body: F,
    }
}

impl<F> Harness<F> {
    pub(crate) fn new(body: F) -> Self {
        Self { body }
    }
}

impl<F: Future<Output = ()>> Future for Harness<F> {
    type Output = BodyExit;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<BodyExit> {
        let this = self.project();
        match panic::catch_unwind(AssertUnwindSafe(|| this.body.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(())) => Poll::Ready(BodyExit::Finished),
            Err(payload) => Poll::Ready(BodyExit::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task body panicked".to_string()
    }
}

// ============================================================================
// Core
// ============================================================================

/// One scheduler instance. Each blocking run owns exactly one; instances on
/// different threads share nothing.
pub(crate) struct Core {
    tasks: RefCell<TaskTable>,
    ready: Rc<RefCell<ReadyQueue>>,
    timers: RefCell<TimerQueue>,
    /// Task whose body poll is currently on the stack, if any
    current: Cell<Option<TaskId>>,
}

impl Core {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            tasks: RefCell::new(TaskTable::new()),
            ready: Rc::new(RefCell::new(ReadyQueue::new())),
            timers: RefCell::new(TimerQueue::new()),
            current: Cell::new(None),
        })
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    /// Insert a record under `parent`. The body is installed separately so the
    /// child's scope handle can exist before its future is built.
    pub(crate) fn create_task(&self, parent: Option<TaskId>, lazy: bool) -> TaskId {
        let state = if lazy {
            TaskState::Created
        } else {
            TaskState::Scheduled
        };
        self.tasks.borrow_mut().insert(TaskRecord::new(parent, state))
    }

    /// Attach the body and make the task runnable (eager) or leave it waiting
    /// for an explicit start (lazy). A task launched under an already
    /// cancelled or terminal parent is born cancelled and never runs.
    pub(crate) fn install_body(&self, id: TaskId, body: BoxBody) {
        let (lazy, dead_parent) = {
            let mut tasks = self.tasks.borrow_mut();
            let parent = tasks.rec(id).parent;
            let dead_parent = parent.map(|p| {
                let prec = tasks.rec(p);
                prec.cancel_requested || prec.state.is_terminal()
            });
            let rec = tasks.rec_mut(id);
            rec.body = Some(body);
            (rec.state == TaskState::Created, dead_parent.unwrap_or(false))
        };
        debug!(task = id.0, lazy, "task launched");
        if dead_parent {
            self.cancel(id);
        } else if !lazy {
            self.ready.borrow_mut().push(id);
        }
    }

    /// Transition a lazy task from `Created` to `Scheduled`
    pub(crate) fn start(&self, id: TaskId) -> Result<(), RuntimeError> {
        {
            let mut tasks = self.tasks.borrow_mut();
            let rec = tasks.rec_mut(id);
            if rec.state != TaskState::Created {
                return Err(RuntimeError::InvalidState("task has already started"));
            }
            rec.state = TaskState::Scheduled;
        }
        self.ready.borrow_mut().push(id);
        debug!(task = id.0, "task started");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub(crate) fn state(&self, id: TaskId) -> TaskState {
        self.tasks.borrow().rec(id).state
    }

    pub(crate) fn cancel_requested(&self, id: TaskId) -> bool {
        self.tasks.borrow().rec(id).cancel_requested
    }

    pub(crate) fn failure_of(&self, id: TaskId) -> Option<String> {
        self.tasks.borrow().rec(id).failure.clone()
    }

    pub(crate) fn children_of(&self, id: TaskId) -> Vec<TaskId> {
        self.tasks.borrow().rec(id).children.clone()
    }

    pub(crate) fn task_count(&self) -> usize {
        self.tasks.borrow().len()
    }

    // ------------------------------------------------------------------
    // Completion observation
    // ------------------------------------------------------------------

    /// Register a completion callback, or run it right away if the task is
    /// already terminal
    pub(crate) fn add_callback(&self, id: TaskId, callback: CompletionFn) {
        let immediate = {
            let tasks = self.tasks.borrow();
            let state = tasks.rec(id).state;
            state.is_terminal().then_some(state)
        };
        match immediate {
            Some(state) => callback(state),
            None => self.tasks.borrow_mut().rec_mut(id).callbacks.push(callback),
        }
    }

    /// Suspend the caller on `id` reaching a terminal state. Returns false if
    /// the task is already terminal and no suspension is needed.
    pub(crate) fn add_join_waiter(&self, id: TaskId, waker: Waker) -> bool {
        let mut tasks = self.tasks.borrow_mut();
        let rec = tasks.rec_mut(id);
        if rec.state.is_terminal() {
            return false;
        }
        rec.join_waiters.push(waker);
        true
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Arm a delay timer waking `id`. The record tracks the latest armed
    /// timer so unwinding can cancel it; an older concurrent timer simply
    /// fires as a stale wake, which the poll path skips.
    pub(crate) fn arm_timer(&self, id: TaskId, delay: Duration, now: Instant) -> TimerId {
        let timer = self.timers.borrow_mut().schedule(delay, now, id);
        self.tasks.borrow_mut().rec_mut(id).timer = Some(timer);
        timer
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Cancel `target` and its whole subtree: pre-order mark, then unwind
    /// whatever is not currently on the stack. Each task turns `Cancelled`
    /// only after all of its children are terminal.
    pub(crate) fn cancel(&self, target: TaskId) {
        let walk = self.collect_subtree(target);
        if walk.is_empty() {
            return;
        }
        {
            let mut tasks = self.tasks.borrow_mut();
            for &id in &walk {
                tasks.rec_mut(id).cancel_requested = true;
            }
        }
        debug!(
            task = target.0,
            descendants = walk.len() - 1,
            "cancellation requested"
        );
        for &id in &walk {
            self.reap(id);
        }
    }

    /// Pre-order list of the non-terminal part of a subtree, children in
    /// launch order
    fn collect_subtree(&self, target: TaskId) -> Vec<TaskId> {
        let tasks = self.tasks.borrow();
        let mut out = Vec::new();
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            let rec = tasks.rec(id);
            if rec.state.is_terminal() {
                continue;
            }
            out.push(id);
            for &child in rec.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Unwind one cancel-marked task as far as its situation allows
    fn reap(&self, id: TaskId) {
        enum Reap {
            /// Never ran, cannot have children: terminal immediately
            Finalize,
            /// Body dropped or already gone: wait for children
            TryFinalize,
            /// Poll frame is on the stack or nothing to do
            Defer,
        }

        let (action, body, stale_timer) = {
            let mut tasks = self.tasks.borrow_mut();
            let rec = tasks.rec_mut(id);
            match rec.state {
                TaskState::Created => (Reap::Finalize, rec.body.take(), rec.timer.take()),
                TaskState::Scheduled => {
                    rec.state = TaskState::Cancelling;
                    (Reap::TryFinalize, rec.body.take(), rec.timer.take())
                }
                TaskState::Running => {
                    if self.current.get() == Some(id) {
                        // its poll is on the stack; the pump unwinds it when
                        // the poll returns
                        (Reap::Defer, None, None)
                    } else {
                        rec.state = TaskState::Cancelling;
                        (Reap::TryFinalize, rec.body.take(), rec.timer.take())
                    }
                }
                TaskState::Completing => {
                    rec.state = TaskState::Cancelling;
                    (Reap::TryFinalize, None, None)
                }
                TaskState::Cancelling => (Reap::TryFinalize, None, None),
                _ => (Reap::Defer, None, None),
            }
        };

        if let Some(timer) = stale_timer {
            self.timers.borrow_mut().cancel(timer);
        }
        // the body may run arbitrary drop code; no table borrow is held here
        drop(body);

        match action {
            Reap::Finalize => self.finalize(id),
            Reap::TryFinalize => self.try_finalize(id),
            Reap::Defer => {}
        }
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Commit a waiting task to its terminal state once every child is
    /// terminal
    fn try_finalize(&self, id: TaskId) {
        let done = {
            let tasks = self.tasks.borrow();
            let rec = tasks.rec(id);
            matches!(rec.state, TaskState::Completing | TaskState::Cancelling)
                && rec
                    .children
                    .iter()
                    .all(|&child| tasks.rec(child).state.is_terminal())
        };
        if done {
            self.finalize(id);
        }
    }

    /// Commit the terminal state, run completion callbacks, wake joiners, and
    /// notify the parent. Failure beats cancellation beats completion.
    fn finalize(&self, id: TaskId) {
        let (state, callbacks, waiters, parent, stale_timer) = {
            let mut tasks = self.tasks.borrow_mut();
            let rec = tasks.rec_mut(id);
            debug_assert!(!rec.state.is_terminal());
            let state = if rec.failure.is_some() {
                TaskState::Failed
            } else if rec.cancel_requested {
                TaskState::Cancelled
            } else {
                TaskState::Completed
            };
            rec.state = state;
            rec.body = None;
            (
                state,
                std::mem::take(&mut rec.callbacks),
                std::mem::take(&mut rec.join_waiters),
                rec.parent,
                rec.timer.take(),
            )
        };

        if let Some(timer) = stale_timer {
            self.timers.borrow_mut().cancel(timer);
        }
        debug!(task = id.0, state = %state, "task finalized");

        for callback in callbacks {
            callback(state);
        }
        for waker in waiters {
            waker.wake();
        }

        let Some(parent) = parent else { return };
        if state == TaskState::Failed {
            // first failure wins: charge the parent, then take the rest of
            // its subtree down; the parent turns Failed once all unwind
            let failure = self.failure_of(id);
            let charge = {
                let mut tasks = self.tasks.borrow_mut();
                let prec = tasks.rec_mut(parent);
                if prec.state.is_terminal() {
                    false
                } else {
                    if prec.failure.is_none() {
                        prec.failure = failure;
                    }
                    true
                }
            };
            if charge {
                self.cancel(parent);
            }
        }
        self.try_finalize(parent);
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Poll one ready task. Takes the body out of the record so the table
    /// stays borrowable while user code runs.
    fn poll_task(&self, id: TaskId) {
        let body = {
            let mut tasks = self.tasks.borrow_mut();
            let rec = tasks.rec_mut(id);
            if rec.state.is_terminal() || rec.state == TaskState::Created {
                return;
            }
            match rec.body.take() {
                Some(body) => body,
                // finished, unwound, or currently on the stack: stale wake
                None => return,
            }
        };

        // a wake that raced a cancellation: unwind here, at the suspension
        // point, instead of resuming the body
        if self.cancel_requested(id) {
            self.tasks.borrow_mut().rec_mut(id).state = TaskState::Cancelling;
            drop(body);
            self.try_finalize(id);
            return;
        }

        {
            let mut tasks = self.tasks.borrow_mut();
            let rec = tasks.rec_mut(id);
            if rec.state == TaskState::Scheduled {
                rec.state = TaskState::Running;
                debug!(task = id.0, "task running");
            }
        }

        let waker = task_waker(id, self.ready.clone());
        let mut cx = Context::from_waker(&waker);
        let previous = self.current.replace(Some(id));
        let mut body = body;
        let polled = body.as_mut().poll(&mut cx);
        self.current.set(previous);

        match polled {
            Poll::Pending => {
                let stale_timer = {
                    let mut tasks = self.tasks.borrow_mut();
                    let rec = tasks.rec_mut(id);
                    if rec.cancel_requested {
                        // the flag was raised during this poll; the frame is
                        // off the stack now, so drop the body here
                        rec.state = TaskState::Cancelling;
                        rec.timer.take()
                    } else {
                        rec.body = Some(body);
                        return;
                    }
                };
                if let Some(timer) = stale_timer {
                    self.timers.borrow_mut().cancel(timer);
                }
                drop(body);
                self.try_finalize(id);
            }
            Poll::Ready(exit) => {
                drop(body);
                let failed = {
                    let mut tasks = self.tasks.borrow_mut();
                    let rec = tasks.rec_mut(id);
                    match exit {
                        BodyExit::Finished => {
                            rec.state = TaskState::Completing;
                            false
                        }
                        BodyExit::Panicked(msg) => {
                            debug!(task = id.0, error = %msg, "task body failed");
                            if rec.failure.is_none() {
                                rec.failure = Some(msg);
                            }
                            rec.state = TaskState::Cancelling;
                            true
                        }
                    }
                };
                if failed {
                    // a failing body takes its own children down with it
                    self.cancel(id);
                }
                self.try_finalize(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Pump
    // ------------------------------------------------------------------

    /// Pump ready tasks and timers on the calling thread until `root` is
    /// terminal. Parks on the nearest timer deadline when idle.
    ///
    /// Timers are drained before every poll, so a task that keeps yielding
    /// itself back onto the queue cannot starve timer wakeups.
    pub(crate) fn run_until(&self, root: TaskId) -> Result<(), RunError> {
        loop {
            let due = self.timers.borrow_mut().tick(Instant::now());
            for id in due {
                self.tasks.borrow_mut().rec_mut(id).timer = None;
                self.ready.borrow_mut().push(id);
            }
            if self.state(root).is_terminal() {
                return Ok(());
            }

            let next = self.ready.borrow_mut().pop();
            match next {
                Some(id) => {
                    self.poll_task(id);
                    if self.state(root).is_terminal() {
                        return Ok(());
                    }
                }
                None => match self.timers.borrow_mut().next_deadline() {
                    Some(deadline) => {
                        let now = Instant::now();
                        if deadline > now {
                            thread::sleep(deadline - now);
                        }
                    }
                    None => return Err(RunError::Stalled),
                },
            }
        }
    }

    /// Drop every remaining body, callback, and waiter. Bodies capture scope
    /// handles that point back at the core, so this breaks the cycles before
    /// the run returns.
    pub(crate) fn shutdown(&self) {
        let mut bodies: Vec<BoxBody> = Vec::new();
        let mut callbacks: Vec<CompletionFn> = Vec::new();
        {
            let mut tasks = self.tasks.borrow_mut();
            for (_, rec) in tasks.iter_mut() {
                if let Some(body) = rec.body.take() {
                    bodies.push(body);
                }
                callbacks.append(&mut rec.callbacks);
                rec.join_waiters.clear();
            }
        }
        drop(bodies);
        drop(callbacks);
    }
}
