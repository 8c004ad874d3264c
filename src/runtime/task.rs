//! Task table and lifecycle
//!
//! A task is the unit of cooperative work. Records live in a slab arena and
//! refer to each other by index, so the parent/child tree carries no owning
//! pointers in either direction:
//! - parent link: a plain `TaskId` (a task never owns its parent)
//! - child links: `TaskId`s in launch order (the tree is walked, not dropped)
//!
//! Records stay in the arena for the lifetime of the runtime instance, which
//! keeps indices stable. Finalization drops the body future, the only part
//! with real weight.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::Waker;

use serde::Serialize;
use slab::Slab;

use super::timer::TimerId;

/// Unique identifier for a task within one runtime instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task lifecycle state
///
/// `Created` applies only to lazily launched tasks. `Completing` and
/// `Cancelling` are the waiting-for-children phases: a task whose body has
/// ended holds there until every child is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    /// Lazily launched, waiting for an explicit start
    Created,
    /// Enqueued on the ready queue, body not yet polled
    Scheduled,
    /// Body polled at least once and not yet finished (includes suspension)
    Running,
    /// Body finished normally, children still active
    Completing,
    /// Unwinding after cancellation or failure, children still active
    Cancelling,
    /// Terminal: body and every child finished normally
    Completed,
    /// Terminal: unwound after cancellation
    Cancelled,
    /// Terminal: body failure, own or propagated from a child
    Failed,
}

impl TaskState {
    /// Whether the state is final. Terminal states never change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Created => "created",
            TaskState::Scheduled => "scheduled",
            TaskState::Running => "running",
            TaskState::Completing => "completing",
            TaskState::Cancelling => "cancelling",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// How a task body ended
#[derive(Debug)]
pub(crate) enum BodyExit {
    /// Ran to the end of its code
    Finished,
    /// Panicked; carries the extracted panic message
    Panicked(String),
}

/// A boxed task body, type-erased to its exit report
pub(crate) type BoxBody = Pin<Box<dyn Future<Output = BodyExit>>>;

/// Completion callback, run exactly once at the terminal transition
pub(crate) type CompletionFn = Box<dyn FnOnce(TaskState)>;

/// One task's bookkeeping
pub(crate) struct TaskRecord {
    pub(crate) state: TaskState,
    /// The body future. `None` while the body is being polled, and forever
    /// once it has ended or been dropped.
    pub(crate) body: Option<BoxBody>,
    pub(crate) parent: Option<TaskId>,
    /// Direct children in launch order
    pub(crate) children: Vec<TaskId>,
    /// Cancellation requested. Advisory: observed at suspension points and
    /// explicit checks, never preemptively.
    pub(crate) cancel_requested: bool,
    pub(crate) callbacks: Vec<CompletionFn>,
    /// Wakers of tasks suspended in a join or await on this task
    pub(crate) join_waiters: Vec<Waker>,
    /// First failure charged to this task (its own panic or a child's)
    pub(crate) failure: Option<String>,
    /// Armed delay timer, cleared when it fires or the task unwinds
    pub(crate) timer: Option<TimerId>,
}

impl TaskRecord {
    pub(crate) fn new(parent: Option<TaskId>, state: TaskState) -> Self {
        Self {
            state,
            body: None,
            parent,
            children: Vec::new(),
            cancel_requested: false,
            callbacks: Vec::new(),
            join_waiters: Vec::new(),
            failure: None,
            timer: None,
        }
    }
}

/// Slab arena of task records; indices are `TaskId`s
pub(crate) struct TaskTable {
    slab: Slab<TaskRecord>,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self { slab: Slab::new() }
    }

    /// Insert a record and link it under its parent, preserving launch order
    pub(crate) fn insert(&mut self, record: TaskRecord) -> TaskId {
        let parent = record.parent;
        let id = TaskId(self.slab.insert(record));
        if let Some(p) = parent {
            self.slab[p.0].children.push(id);
        }
        id
    }

    pub(crate) fn rec(&self, id: TaskId) -> &TaskRecord {
        &self.slab[id.0]
    }

    pub(crate) fn rec_mut(&mut self, id: TaskId) -> &mut TaskRecord {
        &mut self.slab[id.0]
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut TaskRecord)> {
        self.slab.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }
}
