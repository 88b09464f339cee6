//! FastDFS Client
//!
//! Every public operation follows the same path: validate the file ID,
//! ask a tracker for a storage location, run one storage task against a
//! pooled connection to that location, and release the connection (or
//! discard it if anything went wrong).

use bytes::Bytes;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tokio::sync::RwLock;

use crate::config::ClientConfig;
use crate::connection::{ConnectionPool, PoolStats, PooledConnection};
use crate::errors::{FdfsError, Result};
use crate::protocol::{get_file_ext_name, split_file_id};
use crate::task::{
    DeleteTask, DownloadSink, DownloadTask, QueryFetchTask, QueryStoreTask, Task, UploadSource,
    UploadTask,
};
use crate::types::StorageLocation;

/// FastDFS client for file operations
///
/// The client is safe to share between tasks (wrap it in an `Arc`). It
/// keeps one connection pool per tracker and lazily creates one pool per
/// storage server it is sent to.
///
/// # Example
///
/// ```no_run
/// use fdfs_client::{Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::new(vec!["192.168.1.100:22122".to_string()]);
///     let client = Client::new(config)?;
///
///     let file_id = client.upload_file("test.jpg").await?;
///     let head = client.download_to_buffer(&file_id, 0, 16).await?;
///     client.delete_file(&file_id).await?;
///
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct Client {
    config: ClientConfig,
    tracker_pools: Vec<Arc<ConnectionPool>>,
    storage_pools: RwLock<HashMap<String, Arc<ConnectionPool>>>,
    closed: RwLock<bool>,
}

impl Client {
    /// Creates a new client with the given configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut tracker_pools: Vec<Arc<ConnectionPool>> = Vec::new();
        for addr in &config.tracker_addrs {
            if tracker_pools.iter().any(|p| p.addr() == addr) {
                continue;
            }
            tracker_pools.push(Arc::new(ConnectionPool::new(addr.clone(), &config)));
        }

        tracing::info!(
            trackers = tracker_pools.len(),
            max_conns = config.max_conns,
            "client created"
        );

        Ok(Self {
            config,
            tracker_pools,
            storage_pools: RwLock::new(HashMap::new()),
            closed: RwLock::new(false),
        })
    }

    /// Creates a client from a `client.conf` file
    pub fn from_conf_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(ClientConfig::from_conf_file(path)?)
    }

    /// Checks if the client is closed
    async fn check_closed(&self) -> Result<()> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(FdfsError::ClientClosed);
        }
        Ok(())
    }

    /// Uploads a file from the local filesystem
    ///
    /// The file is streamed; it is never held in memory as a whole.
    pub async fn upload_file(&self, local_filename: &str) -> Result<String> {
        self.check_closed().await?;
        let mut file = tokio::fs::File::open(local_filename).await?;
        let size = file.metadata().await?.len();
        let ext_name = get_file_ext_name(local_filename);
        let source = UploadSource::Stream {
            reader: &mut file,
            size,
        };
        self.upload(None, &ext_name, source).await
    }

    /// Uploads data from a buffer
    pub async fn upload_buffer(&self, data: &[u8], file_ext_name: &str) -> Result<String> {
        self.upload(None, file_ext_name, UploadSource::Buffer(data))
            .await
    }

    /// Uploads data from a buffer into a specific group
    pub async fn upload_buffer_to_group(
        &self,
        group_name: &str,
        data: &[u8],
        file_ext_name: &str,
    ) -> Result<String> {
        self.upload(Some(group_name), file_ext_name, UploadSource::Buffer(data))
            .await
    }

    /// Uploads exactly `size` bytes read from `reader`
    pub async fn upload_reader(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
        file_ext_name: &str,
    ) -> Result<String> {
        self.upload(None, file_ext_name, UploadSource::Stream { reader, size })
            .await
    }

    async fn upload(
        &self,
        group_name: Option<&str>,
        file_ext_name: &str,
        source: UploadSource<'_>,
    ) -> Result<String> {
        self.check_closed().await?;

        let mut upload = UploadTask::new(0, file_ext_name, source)?;
        let mut query = QueryStoreTask::new(group_name)?;
        self.do_tracker(Task::from(&mut query)).await?;
        let location = assigned(query.location())?;

        upload.set_store_path_index(location.store_path_index);
        self.do_storage(&location, Task::from(&mut upload)).await?;

        upload
            .file_id()
            .ok_or_else(|| FdfsError::Framing("Upload completed without a file ID".to_string()))
    }

    /// Downloads a whole file into memory
    pub async fn download_file(&self, file_id: &str) -> Result<Bytes> {
        self.download_to_buffer(file_id, 0, 0).await
    }

    /// Downloads `length` bytes at `offset` into a new buffer
    ///
    /// `length == 0` reads to the end of the file.
    pub async fn download_to_buffer(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        let mut data = Vec::new();
        self.download(file_id, offset, length, DownloadSink::Writer(&mut data))
            .await?;
        Ok(Bytes::from(data))
    }

    /// Downloads into a caller-allocated buffer, returning the byte count
    ///
    /// Fails with `BufferTooSmall` if the range does not fit; no byte is
    /// written past the buffer's end.
    pub async fn download_into_buffer(
        &self,
        file_id: &str,
        buffer: &mut [u8],
        offset: u64,
        length: u64,
    ) -> Result<usize> {
        let received = self
            .download(file_id, offset, length, DownloadSink::Buffer(buffer))
            .await?;
        Ok(received as usize)
    }

    /// Streams a file range into any writer, returning the byte count
    pub async fn download_to_writer(
        &self,
        file_id: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
        offset: u64,
        length: u64,
    ) -> Result<u64> {
        self.download(file_id, offset, length, DownloadSink::Writer(writer))
            .await
    }

    /// Downloads a file range and saves it to the local filesystem
    ///
    /// Parent directories are created as needed. Bytes land in a sibling
    /// partial file that replaces `local_filename` only once the download
    /// has completed; on failure the partial file is removed and any
    /// existing file at `local_filename` is left as it was.
    pub async fn download_to_file(
        &self,
        file_id: &str,
        local_filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        self.check_closed().await?;
        split_file_id(file_id)?;

        let path = Path::new(local_filename);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let partial = partial_path(path);
        let mut writer = BufWriter::new(tokio::fs::File::create(&partial).await?);
        let result = self
            .download(file_id, offset, length, DownloadSink::Writer(&mut writer))
            .await;
        drop(writer);

        let result = match result {
            Ok(_) => tokio::fs::rename(&partial, path).await.map_err(FdfsError::from),
            Err(err) => Err(err),
        };
        if result.is_err() {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                tracing::warn!(path = %partial.display(), error = %cleanup, "failed to remove partial download");
            }
        }
        result
    }

    async fn download(
        &self,
        file_id: &str,
        offset: u64,
        length: u64,
        sink: DownloadSink<'_>,
    ) -> Result<u64> {
        self.check_closed().await?;
        let (group_name, remote_filename) = split_file_id(file_id)?;

        let mut download = DownloadTask::new(&group_name, &remote_filename, offset, length, sink)?;
        let location = self.query_fetch(&group_name, &remote_filename).await?;
        self.do_storage(&location, Task::from(&mut download)).await?;

        Ok(download.received())
    }

    /// Deletes a file
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.check_closed().await?;
        let (group_name, remote_filename) = split_file_id(file_id)?;

        let mut delete = DeleteTask::new(&group_name, &remote_filename)?;
        let location = self.query_fetch(&group_name, &remote_filename).await?;
        self.do_storage(&location, Task::from(&mut delete)).await
    }

    async fn query_fetch(&self, group_name: &str, remote_filename: &str) -> Result<StorageLocation> {
        let mut query = QueryFetchTask::new(group_name, remote_filename)?;
        self.do_tracker(Task::from(&mut query)).await?;
        assigned(query.location())
    }

    async fn do_tracker(&self, mut task: Task<'_, '_>) -> Result<()> {
        let (pool, mut conn) = self.get_tracker_connection().await?;
        let result = task.run(&mut conn).await;
        finish(&pool, conn, task.name(), &result);
        result
    }

    async fn do_storage(&self, location: &StorageLocation, mut task: Task<'_, '_>) -> Result<()> {
        let pool = self.storage_pool(&location.addr()).await?;
        let mut conn = pool.get().await?;
        let result = task.run(&mut conn).await;
        finish(&pool, conn, task.name(), &result);
        result
    }

    /// Checks out a connection from the first tracker that yields one
    ///
    /// Trackers are tried in configuration order. If all fail, the last
    /// error is returned.
    async fn get_tracker_connection(&self) -> Result<(Arc<ConnectionPool>, PooledConnection)> {
        let mut last_err = None;

        for pool in &self.tracker_pools {
            match pool.get().await {
                Ok(conn) => return Ok((Arc::clone(pool), conn)),
                Err(err) => {
                    tracing::warn!(addr = %pool.addr(), error = %err, "tracker unavailable");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(FdfsError::NoTrackerAvailable))
    }

    /// Returns the pool for a storage endpoint, creating it on first use
    async fn storage_pool(&self, addr: &str) -> Result<Arc<ConnectionPool>> {
        {
            let pools = self.storage_pools.read().await;
            if let Some(pool) = pools.get(addr) {
                return Ok(Arc::clone(pool));
            }
        }

        let mut pools = self.storage_pools.write().await;
        if *self.closed.read().await {
            return Err(FdfsError::ClientClosed);
        }
        let pool = pools.entry(addr.to_string()).or_insert_with(|| {
            tracing::debug!(addr, "creating storage pool");
            Arc::new(ConnectionPool::new(addr.to_string(), &self.config))
        });
        Ok(Arc::clone(pool))
    }

    /// Snapshot of every pool, trackers first
    pub async fn pool_stats(&self) -> Vec<(String, PoolStats)> {
        let mut stats: Vec<(String, PoolStats)> = self
            .tracker_pools
            .iter()
            .map(|p| (p.addr().to_string(), p.stats()))
            .collect();

        let pools = self.storage_pools.read().await;
        let mut storage: Vec<(String, PoolStats)> = pools
            .iter()
            .map(|(addr, p)| (addr.clone(), p.stats()))
            .collect();
        storage.sort_by(|a, b| a.0.cmp(&b.0));
        stats.extend(storage);
        stats
    }

    /// Closes the client and releases all resources
    ///
    /// After calling close, all operations will return ClientClosed error.
    /// It's safe to call close multiple times.
    pub async fn close(&self) {
        let mut closed = self.closed.write().await;
        if *closed {
            return;
        }
        *closed = true;
        drop(closed);

        for pool in &self.tracker_pools {
            pool.destroy();
        }

        let storage_pools = std::mem::take(&mut *self.storage_pools.write().await);
        for pool in storage_pools.values() {
            pool.destroy();
        }

        tracing::info!(storage_pools = storage_pools.len(), "client closed");
    }
}

/// Unique sibling of `path` that a download is written to before it is
/// moved into place
fn partial_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(
        ".{}.{}.part",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

fn assigned(location: Option<&StorageLocation>) -> Result<StorageLocation> {
    location
        .cloned()
        .ok_or_else(|| FdfsError::Framing("Tracker returned no storage location".to_string()))
}

/// Returns the connection to its pool, keeping it only if the exchange
/// ended at a frame boundary
fn finish(pool: &ConnectionPool, conn: PooledConnection, task: &'static str, result: &Result<()>) {
    let healthy = match result {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(task, addr = %pool.addr(), error = %err, "task failed");
            err.keeps_connection()
        }
    };
    pool.release(conn, healthy);
}
