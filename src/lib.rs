//! strand - a structured-concurrency runtime
//!
//! Design principles:
//! - Tractable: one scheduler per blocking entry point, nothing global
//! - Structured: tasks form a tree, and a parent never outlives its children
//! - Cooperative: tasks interleave at suspension points on a single thread,
//!   and cancellation is a checked flag, never a preemption
//!
//! The whole surface is a handful of calls: [`run_blocking`] enters a root
//! task, its [`Scope`] launches children (eager, lazy, or value-bearing), and
//! handles observe and steer the tree.
//!
//! ```no_run
//! use strand::run_blocking;
//!
//! let result = run_blocking(|scope| async move {
//!     let download = scope.deferred(|s| async move {
//!         s.delay_ms(1000).await;
//!         "download result!"
//!     });
//!     download.await
//! });
//! ```

pub mod runtime;

pub use runtime::error::{JoinError, RunError, RuntimeError};
pub use runtime::handle::{Deferred, Join, TaskHandle};
pub use runtime::run_blocking;
pub use runtime::scope::{Scope, Sleep, YieldNow};
pub use runtime::snapshot::TaskSnapshot;
pub use runtime::task::{TaskId, TaskState};
