//! Cancellation is advisory: a loop only observes it at its own check point.
//! The worker below spins freely between yields; once cancelled, it is
//! unwound at the next yield and the line after the loop never runs.

use strand::run_blocking;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run_blocking(|scope| async move {
        let job = scope.launch(|s| async move {
            println!("task start!");
            let mut i: u64 = 0;
            while s.is_active() {
                i += 1;
                if i % 1_000_000 == 0 {
                    println!("fetch i: {i}");
                    s.yield_now().await;
                }
            }
            // not reached: the task is unwound at the yield point above
            println!("task end!");
        });

        scope.delay_ms(500).await;
        job.cancel();
        println!("process end! job state={}", job.state());
    })
    .unwrap();
}
