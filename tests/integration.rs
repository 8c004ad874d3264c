//! Integration tests for the strand runtime
//!
//! End-to-end behavior of the public surface: lifecycle flags, cancellation
//! trees, latency composition, fairness, and per-thread independence. Delays
//! are short real-time waits; lower bounds are strict, upper bounds generous.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use strand::{run_blocking, Deferred, JoinError, RunError, TaskState};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

// ============================================================================
// Lifecycle flags
// ============================================================================

#[test]
fn test_lazy_task_flags_across_start() {
    run_blocking(|scope| async move {
        let lazy = scope.launch_lazy(|s| async move {
            s.delay_ms(30).await;
        });

        assert_eq!(lazy.state(), TaskState::Created);
        assert!(!lazy.is_active());
        assert!(!lazy.is_completed());
        assert!(!lazy.is_cancelled());

        lazy.start().unwrap();
        assert!(lazy.is_active());
        assert!(!lazy.is_completed());

        // starting twice is refused
        assert!(lazy.start().is_err());
        assert!(!lazy.try_start());

        lazy.join().await;
        assert_eq!(lazy.state(), TaskState::Completed);
        assert!(!lazy.is_active());
        assert!(lazy.is_completed());
        assert!(!lazy.is_cancelled());
    })
    .unwrap();
}

#[test]
fn test_eager_task_is_active_before_first_poll() {
    run_blocking(|scope| async move {
        let task = scope.launch(|s| async move {
            s.delay_ms(20).await;
        });
        // not yet polled, but already launched
        assert!(task.is_active());
        task.join().await;
        assert!(task.is_completed());
    })
    .unwrap();
}

// ============================================================================
// Cancellation trees
// ============================================================================

#[test]
fn test_cancel_reaches_every_descendant_parent_last() {
    let order = run_blocking(|scope| async move {
        let order = Rc::new(RefCell::new(Vec::new()));
        let parent = scope.launch(|s| async move {
            s.launch(|s| async move { s.delay_ms(1000).await });
            s.launch(|s| async move { s.delay_ms(3000).await });
            s.delay_ms(5000).await;
        });
        scope.delay_ms(20).await;

        let children = parent.children();
        assert_eq!(children.len(), 2);
        for (index, child) in children.iter().enumerate() {
            let order = order.clone();
            child.on_completion(move |state| {
                assert_eq!(state, TaskState::Cancelled);
                order.borrow_mut().push(format!("child{}", index));
            });
        }
        {
            let order = order.clone();
            parent.on_completion(move |state| {
                assert_eq!(state, TaskState::Cancelled);
                order.borrow_mut().push("parent".to_string());
            });
        }

        parent.cancel();
        // cooperative unwinding is synchronous here: the subtree was
        // suspended on timers, so everything is terminal already
        assert!(parent.is_completed());
        for child in &children {
            assert!(child.is_completed());
            assert_eq!(child.state(), TaskState::Cancelled);
        }
        Rc::try_unwrap(order).unwrap().into_inner()
    })
    .unwrap();

    assert_eq!(order, vec!["child0", "child1", "parent"]);
}

#[test]
fn test_cancel_mid_delay_fires_handler_once_before_deadline() {
    let t0 = Instant::now();
    let fired = Rc::new(Cell::new(0u32));
    let fired_probe = fired.clone();

    run_blocking(move |scope| async move {
        let worker = scope.launch(|s| async move {
            s.delay_ms(300).await;
        });
        worker.on_completion(move |state| {
            assert_eq!(state, TaskState::Cancelled);
            fired_probe.set(fired_probe.get() + 1);
        });
        scope.delay_ms(20).await;
        worker.cancel();
    })
    .unwrap();

    assert_eq!(fired.get(), 1);
    assert!(t0.elapsed() < ms(300), "handler must fire before the deadline");
}

#[test]
fn test_join_on_cancelled_task_does_not_disturb_the_caller() {
    run_blocking(|scope| async move {
        let worker = scope.launch(|s| async move {
            s.delay_ms(200).await;
        });
        scope.delay_ms(10).await;
        worker.cancel();
        worker.join().await;
        assert_eq!(worker.state(), TaskState::Cancelled);
        // join reports nothing; the caller keeps running
        assert!(scope.is_active());
    })
    .unwrap();
}

#[test]
fn test_cancelled_deferred_reports_cancellation_to_the_awaiter() {
    run_blocking(|scope| async move {
        let download: Deferred<u32> = scope.deferred(|s| async move {
            s.delay_ms(200).await;
            7
        });
        scope.delay_ms(10).await;
        download.task().cancel();
        assert_eq!(download.await, Err(JoinError::Cancelled));
    })
    .unwrap();
}

// ============================================================================
// Advisory cancellation
// ============================================================================

#[test]
fn test_tight_loop_outruns_its_own_cancellation() {
    let spins = Rc::new(Cell::new(0u32));
    let spins_probe = spins.clone();
    let result: Result<(), RunError> = run_blocking(move |scope| async move {
        scope.launch(move |s| async move {
            s.cancel();
            // no suspension point: the flag cannot interrupt this loop
            let mut count = 0u32;
            while count < 10_000 {
                count += 1;
            }
            spins_probe.set(count);
            // first cooperative check observes the cancellation
            assert!(!s.is_active());
        });
        scope.delay_ms(20).await;
    });

    result.unwrap();
    assert_eq!(spins.get(), 10_000);
}

// ============================================================================
// Latency composition
// ============================================================================

#[test]
fn test_sequential_awaits_sum_their_latencies() {
    let t0 = Instant::now();
    run_blocking(|scope| async move {
        let mut results = Vec::new();
        for _ in 0..3 {
            let step = scope.deferred(|s| async move {
                s.delay_ms(40).await;
                "photo info"
            });
            results.push(step.await.unwrap());
        }
        assert_eq!(results.len(), 3);
    })
    .unwrap();

    assert!(t0.elapsed() >= ms(120), "three sequential 40ms waits sum up");
}

#[test]
fn test_parallel_awaits_overlap_their_latencies() {
    let t0 = Instant::now();
    run_blocking(|scope| async move {
        let info = scope.deferred(|s| async move {
            s.delay_ms(40).await;
            "photo info"
        });
        let likes = scope.deferred(|s| async move {
            s.delay_ms(40).await;
            "photo like list"
        });
        let comments = scope.deferred(|s| async move {
            s.delay_ms(40).await;
            "photo comment list"
        });
        let all = vec![
            info.await.unwrap(),
            likes.await.unwrap(),
            comments.await.unwrap(),
        ];
        assert_eq!(all.len(), 3);
    })
    .unwrap();

    let elapsed = t0.elapsed();
    assert!(elapsed >= ms(40));
    assert!(elapsed < ms(120), "overlapping waits must not sum: {:?}", elapsed);
}

#[test]
fn test_parent_join_returns_with_the_slowest_child() {
    let t0 = Instant::now();
    run_blocking(|scope| async move {
        let parent = scope.launch(|s| async move {
            s.launch(|s| async move { s.delay_ms(20).await });
            s.launch(|s| async move { s.delay_ms(60).await });
            s.launch(|s| async move { s.delay_ms(100).await });
        });
        parent.join().await;
    })
    .unwrap();

    let elapsed = t0.elapsed();
    assert!(elapsed >= ms(100));
    assert!(elapsed < ms(250), "join must track the slowest child: {:?}", elapsed);
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_equal_deadlines_resume_in_creation_order() {
    let order = run_blocking(|scope| async move {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let order = order.clone();
            handles.push(scope.launch(move |s| async move {
                s.delay_ms(30).await;
                order.borrow_mut().push(name);
            }));
        }
        for handle in handles {
            handle.join().await;
        }
        Rc::try_unwrap(order).unwrap().into_inner()
    })
    .unwrap();

    assert_eq!(order, vec!["a", "b", "c"]);
}

// ============================================================================
// Introspection
// ============================================================================

#[test]
fn test_snapshot_reflects_the_live_tree() {
    run_blocking(|scope| async move {
        let parent = scope.launch(|s| async move {
            s.launch(|s| async move { s.delay_ms(40).await });
            s.launch_lazy(|_s| async {});
            s.delay_ms(40).await;
        });
        scope.delay_ms(10).await;

        let snap = parent.snapshot();
        assert_eq!(snap.task_count(), 3);
        assert_eq!(snap.state, TaskState::Running);
        assert_eq!(snap.children.len(), 2);
        assert_eq!(snap.children[0].state, TaskState::Running);
        assert_eq!(snap.children[1].state, TaskState::Created);
        assert!(snap.to_json().contains("\"Created\""));

        parent.cancel();
        parent.join().await;
        let snap = parent.snapshot();
        assert_eq!(snap.state, TaskState::Cancelled);
    })
    .unwrap();
}

// ============================================================================
// Independent runtimes
// ============================================================================

#[test]
fn test_runs_on_separate_threads_share_nothing() {
    let first = thread::spawn(|| {
        run_blocking(|scope| async move {
            let value = scope.deferred(|s| async move {
                s.delay_ms(30).await;
                1u32
            });
            value.await.unwrap()
        })
    });
    let second = thread::spawn(|| {
        run_blocking(|scope| async move {
            let value = scope.deferred(|s| async move {
                s.delay_ms(30).await;
                2u32
            });
            value.await.unwrap()
        })
    });

    assert_eq!(first.join().unwrap().unwrap(), 1);
    assert_eq!(second.join().unwrap().unwrap(), 2);
}
