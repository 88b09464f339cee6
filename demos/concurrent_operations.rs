//! Concurrent Operations Example
//!
//! Shares one client between many tasks. Each task uploads, reads back and
//! deletes its own file; the client's pools bound the number of sockets no
//! matter how many tasks run.
//!
//! Run this example with:
//! ```bash
//! FDFS_TRACKER_ADDR=192.168.1.100:22122 cargo run --example concurrent_operations
//! ```

use fdfs_client::{Client, ClientConfig, FdfsError};
use std::sync::Arc;
use std::time::Instant;

const TASKS: usize = 50;
const CYCLES: usize = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("FastDFS Rust Client - Concurrent Operations Example");
    println!("{}", "=".repeat(50));

    let tracker = std::env::var("FDFS_TRACKER_ADDR")
        .unwrap_or_else(|_| "192.168.1.100:22122".to_string());
    let config = ClientConfig::new(vec![tracker])
        .with_max_conns(10)
        .with_acquire_timeout(10000);
    let client = Arc::new(Client::new(config)?);

    let start = Instant::now();
    let handles: Vec<_> = (0..TASKS)
        .map(|task| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                for cycle in 0..CYCLES {
                    let payload = format!("task {} cycle {}", task, cycle);
                    let file_id = client.upload_buffer(payload.as_bytes(), "txt").await?;
                    let data = client.download_file(&file_id).await?;
                    if data.as_ref() != payload.as_bytes() {
                        eprintln!("   task {}: content mismatch for {}", task, file_id);
                    }
                    client.delete_file(&file_id).await?;
                }
                Ok::<(), FdfsError>(())
            })
        })
        .collect();

    let mut failures = 0;
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result? {
            failures += 1;
            eprintln!("   task failed: {}", e);
        }
    }

    let elapsed = start.elapsed();
    println!(
        "\n{} cycles in {:.2?} ({} failed tasks)",
        TASKS * CYCLES,
        elapsed,
        failures
    );

    println!("\nPool usage:");
    for (addr, stats) in client.pool_stats().await {
        println!(
            "   {:<24} idle={} outstanding={} dialed={} max={}",
            addr, stats.idle, stats.outstanding, stats.dialed, stats.max_conns
        );
    }

    client.close().await;
    Ok(())
}
