//! Join a task with an unpredictable duration and get a completion callback
//! exactly once when it turns terminal.

use std::time::{SystemTime, UNIX_EPOCH};

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

/// Stand-in for a download: a sub-second wait of varying length
fn download_millis() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % 1000
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run_blocking(|scope| async move {
        let millis = download_millis();
        println!("delay time = {millis}ms");

        let job = scope.launch(move |s| async move {
            println!("task start!");
            s.delay_ms(millis).await;
            println!("task end!");
        });
        log_state("after launch", &job);

        job.on_completion(|state| {
            println!("completion handler: state={state}");
        });

        job.join().await;
        log_state("after join", &job);
    })
    .unwrap();
}
