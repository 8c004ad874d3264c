//! Launch a task, let it run out, and watch the lifecycle flags flip.

use std::time::Duration;

use strand::{run_blocking, TaskHandle};

fn log_state(label: &str, task: &TaskHandle) {
    println!(
        "[{label}] state={} isActive={} isCancelled={} isCompleted={}",
        task.state(),
        task.is_active(),
        task.is_cancelled(),
        task.is_completed()
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run_blocking(|scope| async move {
        let job = scope.launch(|s| async move {
            s.delay(Duration::from_millis(1000)).await;
        });
        log_state("after launch", &job);
        scope.delay(Duration::from_millis(1500)).await;
        log_state("after 1500ms", &job);
    })
    .unwrap();
}
