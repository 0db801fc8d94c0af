//! `everloop doctor` — Diagnose configuration and storage health.

use everloop_config::AppConfig;
use everloop_core::blob::{BlobMetadata, BlobStore};
use everloop_core::queue::CommandQueue;
use everloop_queue::InMemoryQueue;
use everloop_store::FileBlobStore;

pub async fn run() -> anyhow::Result<()> {
    println!("∞ Everloop Doctor — System Diagnostics");
    println!("======================================\n");

    let mut issues = 0;

    // Config
    let config_path = AppConfig::config_dir().join("everloop.toml");
    let config = if config_path.exists() {
        match AppConfig::load() {
            Ok(config) => {
                println!("  ✅ Config file valid");
                config
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                issues += 1;
                AppConfig::default()
            }
        }
    } else {
        println!("  ⚠️  No config file at {} — using defaults", config_path.display());
        AppConfig::default()
    };

    if config.engine.api_key.is_some() {
        println!("  ✅ Engine API key configured");
    } else {
        println!("  ⚠️  No engine API key — set ELOOP_API_KEY or [engine].api_key");
        issues += 1;
    }

    // Blob store round trip
    let store = FileBlobStore::new(config.store_root());
    let probe = "doctor/probe";
    let round_trip = async {
        store
            .put(probe, b"ok".to_vec(), BlobMetadata::new())
            .await?;
        let read = store.get(probe).await?;
        store.delete(probe).await?;
        Ok::<_, everloop_core::StoreError>(read.as_deref() == Some(&b"ok"[..]))
    };
    match round_trip.await {
        Ok(true) => println!("  ✅ Blob store writable at {}", config.store_root().display()),
        Ok(false) => {
            println!("  ❌ Blob store read back unexpected content");
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Blob store unreachable: {e}");
            issues += 1;
        }
    }

    // Queue semantics
    let queue = InMemoryQueue::new();
    let queue_ok = async {
        queue.send("probe").await?;
        let depth = queue.approximate_count().await?;
        let leased = queue.receive(1, 0).await?;
        for msg in &leased {
            queue.delete(&msg.id, &msg.pop_receipt).await?;
        }
        Ok::<_, everloop_core::QueueError>(depth == 1 && leased.len() == 1)
    };
    match queue_ok.await {
        Ok(true) => println!("  ✅ Command queue round trip"),
        Ok(false) => {
            println!("  ❌ Command queue misbehaved");
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Command queue error: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
