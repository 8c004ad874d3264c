//! Sequential awaiting sums latencies; creating every deferred up front lets
//! their timers overlap, so the total tracks the slowest one.

use std::time::Instant;

use strand::{run_blocking, Scope};

fn fetch(scope: &Scope, what: &'static str, millis: u64) -> strand::Deferred<&'static str> {
    scope.deferred(move |s| async move {
        s.delay_ms(millis).await;
        what
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run_blocking(|scope| async move {
        let started = Instant::now();
        let info = fetch(&scope, "photo info", 1000).await.unwrap();
        let likes = fetch(&scope, "photo like list", 1000).await.unwrap();
        let comments = fetch(&scope, "photo comment list", 1000).await.unwrap();
        println!(
            "sequential: {:?} -> {:?}",
            started.elapsed(),
            [info, likes, comments]
        );

        let started = Instant::now();
        let info = fetch(&scope, "photo info", 1000);
        let likes = fetch(&scope, "photo like list", 1000);
        let comments = fetch(&scope, "photo comment list", 1000);
        let all = [
            info.await.unwrap(),
            likes.await.unwrap(),
            comments.await.unwrap(),
        ];
        println!("parallel: {:?} -> {:?}", started.elapsed(), all);
    })
    .unwrap();
}
