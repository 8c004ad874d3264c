//! A parent task owns its children: enumerate them in launch order, dump the
//! tree, and watch one cancellation take the whole subtree down.

use strand::run_blocking;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run_blocking(|scope| async move {
        let parent = scope.launch(|s| async move {
            s.launch(|s| async move { s.delay_ms(1000).await });
            s.launch(|s| async move { s.delay_ms(3000).await });
            s.launch(|s| async move { s.delay_ms(5000).await });
        });

        scope.delay_ms(500).await;
        for (index, child) in parent.children().iter().enumerate() {
            println!("child {index} -> {} ({})", child.id(), child.state());
        }
        println!("tree before cancel:\n{}", parent.snapshot().to_json());

        parent.cancel();
        println!("tree after cancel:\n{}", parent.snapshot().to_json());
        println!("process end!");
    })
    .unwrap();
}
