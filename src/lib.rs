//! FastDFS Rust Client Library
//!
//! Async client for a FastDFS cluster: trackers assign storage locations,
//! storage servers hold the bytes. The crate is organised in layers:
//!
//! - [`protocol`]: the wire codec (10-byte frame header, fixed-width fields)
//! - [`connection`]: TCP connections and bounded per-endpoint pools
//! - [`task`]: one request/response exchange per operation
//! - [`Client`]: tracker lookup + storage task behind one call
//!
//! # Features
//!
//! - File upload from a buffer, a local file, or any async reader
//! - File download (full and partial) into memory, a caller buffer, a
//!   file, or any async writer
//! - File deletion
//! - Connection pooling with bounded capacity per endpoint
//! - Tracker failover
//! - Async/await support with Tokio
//!
//! # Example
//!
//! ```no_run
//! use fdfs_client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(vec!["192.168.1.100:22122".to_string()]);
//!     let client = Client::new(config)?;
//!
//!     let file_id = client.upload_buffer(b"Hello, FastDFS!", "txt").await?;
//!     let data = client.download_file(&file_id).await?;
//!     client.delete_file(&file_id).await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod config;
pub mod connection;
mod errors;
pub mod protocol;
pub mod task;
pub mod types;

// Re-export public API
pub use client::Client;
pub use config::ClientConfig;
pub use connection::{ConnectionPool, PoolStats};
pub use errors::{ErrorKind, FdfsError, Result};
pub use types::{StorageCommand, StorageLocation, TrackerCommand};
