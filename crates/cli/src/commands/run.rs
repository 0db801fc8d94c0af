//! `everloop run` — Start the always-on agent loop.

use everloop_config::AppConfig;
use tokio::sync::watch;
use tracing::info;

use crate::runtime;

pub async fn run(directive: Option<String>) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;
    if let Some(directive) = directive {
        config.agent.directive = directive;
    }

    println!("∞ Everloop — Starting agent loop");
    println!("   Store:   {}", config.store_root().display());
    println!("   Quotas:  {} loops/day, {} tokens/day",
        config.governor.max_loops_per_day, config.governor.max_tokens_per_day);
    println!("   Cadence: every {}s, consolidation each {} iterations",
        config.agent.loop_interval_secs, config.consolidation.iteration_threshold);

    let runtime = runtime::build(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // The wall-clock cadence runs alongside the loop, so consolidation
    // still happens while the loop is paused or throttled
    let cadence = runtime.consolidation.spawn_cadence(shutdown_rx.clone());

    runtime.controller.run(shutdown_rx).await;
    let _ = cadence.await;
    println!("Agent loop stopped.");
    Ok(())
}
