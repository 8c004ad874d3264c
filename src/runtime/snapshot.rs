//! Task tree introspection
//!
//! A snapshot is a point-in-time, serializable view of a task subtree.
//! Generated on demand, like any other state dump: the live table is walked
//! at capture time and nothing is cached.

use serde::Serialize;

use super::executor::Core;
use super::task::{TaskId, TaskState};

/// Point-in-time view of one task and its descendants
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: usize,
    pub state: TaskState,
    pub cancel_requested: bool,
    /// Direct children in launch order
    pub children: Vec<TaskSnapshot>,
}

impl TaskSnapshot {
    pub(crate) fn capture(core: &Core, id: TaskId) -> TaskSnapshot {
        TaskSnapshot {
            id: id.0,
            state: core.state(id),
            cancel_requested: core.cancel_requested(id),
            children: core
                .children_of(id)
                .into_iter()
                .map(|child| TaskSnapshot::capture(core, child))
                .collect(),
        }
    }

    /// Number of tasks in the subtree, this one included
    pub fn task_count(&self) -> usize {
        1 + self.children.iter().map(TaskSnapshot::task_count).sum::<usize>()
    }

    /// Pretty JSON rendering, for console dumps
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
