//! Basic FastDFS Client Usage Example
//!
//! This example demonstrates the fundamental operations of the FastDFS client:
//! - Uploading files from buffers
//! - Downloading whole files and byte ranges
//! - Downloading into a caller-owned buffer and to a local file
//! - Deleting files
//!
//! Run this example with:
//! ```bash
//! FDFS_TRACKER_ADDR=192.168.1.100:22122 cargo run --example basic_usage
//! ```

use fdfs_client::{Client, ClientConfig, ErrorKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("FastDFS Rust Client - Basic Usage Example");
    println!("{}", "=".repeat(50));

    // Step 1: Configure the client
    let tracker = std::env::var("FDFS_TRACKER_ADDR")
        .unwrap_or_else(|_| "192.168.1.100:22122".to_string());
    let config = ClientConfig::new(vec![tracker])
        .with_max_conns(10)
        .with_connect_timeout(5000)
        .with_network_timeout(30000);

    // Step 2: Create the client instance
    let client = Client::new(config)?;

    // Example 1: Upload from buffer
    println!("\n1. Uploading data from buffer...");
    let test_data = b"Hello, FastDFS! This is a test file.";
    let file_id = client.upload_buffer(test_data, "txt").await?;
    println!("   File ID: {}", file_id);

    // Example 2: Download the whole file
    println!("\n2. Downloading file...");
    let data = client.download_file(&file_id).await?;
    println!("   Downloaded {} bytes: {}", data.len(), String::from_utf8_lossy(&data));

    // Example 3: Download a byte range
    println!("\n3. Downloading bytes 7..15...");
    let range = client.download_to_buffer(&file_id, 7, 8).await?;
    println!("   Range: {}", String::from_utf8_lossy(&range));

    // Example 4: Download into a fixed buffer
    println!("\n4. Downloading into a 64-byte buffer...");
    let mut buffer = [0u8; 64];
    let n = client.download_into_buffer(&file_id, &mut buffer, 0, 0).await?;
    println!("   Wrote {} bytes into the buffer", n);

    // Example 5: Download to a local file
    println!("\n5. Downloading to a local file...");
    let local = std::env::temp_dir().join("fdfs_basic_usage.txt");
    client
        .download_to_file(&file_id, &local.to_string_lossy(), 0, 0)
        .await?;
    println!("   Saved to {}", local.display());

    // Example 6: Delete the file
    println!("\n6. Deleting file...");
    client.delete_file(&file_id).await?;
    match client.download_file(&file_id).await {
        Err(e) if e.kind() == ErrorKind::Remote => {
            println!("   Deleted (server now reports: {})", e)
        }
        Err(e) => println!("   Unexpected error after delete: {}", e),
        Ok(_) => println!("   File is still present"),
    }

    client.close().await;
    println!("\n{}", "=".repeat(50));
    println!("Example completed successfully!");
    Ok(())
}
