//! Lazy launch: the task stays `Created` until started, and a cancellation
//! mid-delay unwinds it before the body reaches its last line.

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
        let job = scope.launch_lazy(|s| async move {
            println!("task start!");
            s.delay_ms(1000).await;
            // not reached when the cancel below lands first
            println!("task end!");
        });

        scope.delay_ms(500).await;
        log_state("before start", &job);

        job.start().unwrap();
        log_state("after start", &job);

        scope.delay_ms(500).await;
        job.cancel();
        log_state("after cancel", &job);

        scope.delay_ms(2000).await;
        log_state("at the end", &job);
    })
    .unwrap();
}
