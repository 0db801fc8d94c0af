//! `everloop consolidate` — Run one memory-consolidation batch and exit.

use everloop_config::AppConfig;

use crate::runtime;

pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let runtime = runtime::build(&config);

    println!("∞ Everloop — Consolidating memory");
    match runtime.consolidation.run_batch().await {
        Some(summary) => {
            println!("  Promoted:  {}", summary.promoted);
            println!("  Learnings: {}", summary.learnings);
            println!("  Evicted:   {}", summary.evicted);
        }
        None => println!("  A consolidation batch is already running"),
    }
    Ok(())
}
