//! The runtime - task tree, scheduler, and blocking entry point
//!
//! One scheduler instance per blocking run, owned by the calling thread:
//! - no global state, runs on different threads share nothing
//! - tasks form a tree; a parent is terminal only after all of its children
//! - cancellation is cooperative and propagates along tree edges
//! - a failing body cancels its siblings and fails the parent, first one wins

pub mod error;
mod executor;
pub mod handle;
pub mod scope;
pub mod snapshot;
pub mod task;
pub mod timer;

pub use error::{JoinError, RunError, RuntimeError};
pub use handle::{Deferred, Join, TaskHandle};
pub use scope::{Scope, Sleep, YieldNow};
pub use snapshot::TaskSnapshot;
pub use task::{TaskId, TaskState};

use std::future::Future;

use futures::channel::oneshot;
use tracing::debug;

use executor::{Core, Harness};
use task::BoxBody;

/// Run a root task to completion on the calling thread.
///
/// Builds a fresh scheduler, launches `f`'s future as the root of a new task
/// tree, and pumps ready tasks and timers until the whole tree is terminal.
/// Returns the root body's value, or the failure that took the tree down.
///
/// Each call owns an independent scheduler; calls on different threads do not
/// interact.
pub fn run_blocking<F, Fut, T>(f: F) -> Result<T, RunError>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = T> + 'static,
    T: 'static,
{
    let core = Core::new();
    let (sender, mut receiver) = oneshot::channel();
    let root = core.create_task(None, false);
    let scope = Scope::new(core.clone(), root);
    let fut = f(scope);
    let body: BoxBody = Box::pin(Harness::new(async move {
        let value = fut.await;
        let _ = sender.send(value);
    }));
    core.install_body(root, body);
    debug!(task = root.0, "root task launched");

    let pumped = core.run_until(root);
    let state = core.state(root);
    let failure = core.failure_of(root);
    core.shutdown();
    pumped?;

    match state {
        TaskState::Completed => match receiver.try_recv() {
            Ok(Some(value)) => Ok(value),
            // completed without a value cannot happen; report the closest
            // truthful outcome instead of hanging
            _ => Err(RunError::Cancelled),
        },
        TaskState::Failed => Err(RunError::Failed(
            failure.unwrap_or_else(|| "task body failed".to_string()),
        )),
        _ => Err(RunError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_run_blocking_returns_root_value() {
        let value = run_blocking(|_scope| async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_blocking_waits_for_children() {
        let finished = Rc::new(Cell::new(false));
        let finished_probe = finished.clone();
        run_blocking(move |scope| async move {
            scope.launch(move |s| async move {
                s.delay_ms(20).await;
                finished_probe.set(true);
            });
            // root body ends right away; the child still runs to completion
        })
        .unwrap();
        assert!(finished.get());
    }

    #[test]
    fn test_child_failure_reaches_the_root() {
        let result: Result<(), RunError> = run_blocking(|scope| async move {
            scope.launch(|_s| async {
                panic!("fetch failed");
            });
            scope.delay_ms(50).await;
        });
        assert_eq!(result, Err(RunError::Failed("fetch failed".to_string())));
    }

    #[test]
    fn test_failure_cancels_the_siblings() {
        let sibling_done = Rc::new(Cell::new(false));
        let probe = sibling_done.clone();
        let result: Result<(), RunError> = run_blocking(move |scope| async move {
            scope.launch(move |s| async move {
                s.delay_ms(100).await;
                probe.set(true);
            });
            scope.launch(|s| async move {
                s.delay_ms(5).await;
                panic!("boom");
            });
            scope.delay_ms(200).await;
        });
        assert!(matches!(result, Err(RunError::Failed(_))));
        assert!(!sibling_done.get());
    }

    #[test]
    fn test_root_cancelling_itself() {
        let result: Result<(), RunError> = run_blocking(|scope| async move {
            scope.cancel();
            scope.delay_ms(10).await;
            unreachable!("resumed after cancellation");
        });
        assert_eq!(result, Err(RunError::Cancelled));
    }

    #[test]
    fn test_joining_an_unstarted_lazy_task_stalls() {
        let result: Result<(), RunError> = run_blocking(|scope| async move {
            let lazy = scope.launch_lazy(|_s| async {});
            lazy.join().await;
        });
        assert_eq!(result, Err(RunError::Stalled));
    }

    #[test]
    fn test_deferred_value_roundtrip() {
        let value = run_blocking(|scope| async move {
            let deferred = scope.deferred(|s| async move {
                s.delay_ms(10).await;
                "download result!".to_string()
            });
            deferred.await
        })
        .unwrap();
        assert_eq!(value, Ok("download result!".to_string()));
    }

    #[test]
    fn test_deferred_failure_is_reraised_to_the_awaiter() {
        let outcome = run_blocking(|scope| async move {
            let deferred: Deferred<u32> = scope.deferred(|_s| async {
                panic!("no such photo");
            });
            deferred.await
        });
        // the awaiting root observes the failure, and the failure also takes
        // the root down afterwards
        assert!(matches!(outcome, Err(RunError::Failed(_))));
    }

    #[test]
    fn test_on_completion_runs_immediately_when_terminal() {
        let seen = Rc::new(Cell::new(None));
        let seen_probe = seen.clone();
        run_blocking(move |scope| async move {
            let task = scope.launch(|_s| async {});
            task.join().await;
            task.on_completion(move |state| seen_probe.set(Some(state)));
        })
        .unwrap();
        assert_eq!(seen.get(), Some(TaskState::Completed));
    }
}
