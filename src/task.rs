//! FastDFS Tasks
//!
//! A task is a single-use request/response exchange over one connection:
//! `send_request` writes the whole request, then `receive_response` reads
//! and decodes the whole response. There is never more than one exchange
//! in flight on a connection.
//!
//! The concrete tasks are plain structs holding request parameters and,
//! after a successful run, response fields. [`Task`] is the closed set of
//! them that the client dispatches through one call site.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::connection::Connection;
use crate::errors::{map_status_to_error, FdfsError, Result};
use crate::protocol::*;
use crate::types::*;

/// Where upload bytes come from
pub enum UploadSource<'io> {
    /// Bytes already in memory
    Buffer(&'io [u8]),
    /// A reader that yields exactly `size` bytes
    Stream {
        /// Byte producer, read to exhaustion of `size`
        reader: &'io mut (dyn AsyncRead + Unpin + Send),
        /// Total number of bytes the reader will produce
        size: u64,
    },
}

impl UploadSource<'_> {
    /// Total payload length
    pub fn len(&self) -> u64 {
        match self {
            UploadSource::Buffer(data) => data.len() as u64,
            UploadSource::Stream { size, .. } => *size,
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where downloaded bytes go
pub enum DownloadSink<'io> {
    /// Fixed-capacity caller buffer; a larger response is an error
    Buffer(&'io mut [u8]),
    /// Any writer: a file, a growable buffer, a socket
    Writer(&'io mut (dyn AsyncWrite + Unpin + Send)),
}

/// Reads a response header and checks it against the expected body length
///
/// A nonzero status becomes a remote error after its (small) body has been
/// drained, so the connection is left at a frame boundary.
async fn read_response_header(conn: &mut Connection, expected: ExpectedBody) -> Result<u64> {
    let mut raw = [0u8; FDFS_PROTO_HEADER_LEN];
    conn.receive_exact(&mut raw).await?;
    let header = decode_header(&raw)?;
    check_response_header(&header)?;

    if let Some(err) = map_status_to_error(header.status) {
        if header.length > FDFS_MAX_ERROR_BODY_LEN {
            return Err(FdfsError::Framing(format!(
                "Error response (status {}) declares {} body bytes",
                header.status, header.length
            )));
        }
        if header.length > 0 {
            conn.receive_full(header.length as usize).await?;
        }
        return Err(err);
    }

    expected.check(header.length)?;
    Ok(header.length)
}

fn check_frame_len(len: u64) -> Result<u64> {
    if len > FDFS_MAX_BODY_LEN {
        return Err(FdfsError::Protocol(format!(
            "Request body of {} bytes exceeds protocol maximum",
            len
        )));
    }
    Ok(len)
}

/// Asks a tracker where to upload
pub struct QueryStoreTask {
    group_name: Option<Bytes>,
    location: Option<StorageLocation>,
}

impl QueryStoreTask {
    /// `None` lets the tracker pick the group
    pub fn new(group_name: Option<&str>) -> Result<Self> {
        let group_name = match group_name {
            Some(g) if !g.is_empty() => Some(pad_string(g, FDFS_GROUP_NAME_MAX_LEN)?),
            _ => None,
        };
        Ok(Self {
            group_name,
            location: None,
        })
    }

    /// Location assigned by the tracker
    pub fn location(&self) -> Option<&StorageLocation> {
        self.location.as_ref()
    }

    async fn send_request(&mut self, conn: &mut Connection) -> Result<()> {
        match &self.group_name {
            None => {
                let header = encode_header(0, TrackerCommand::ServiceQueryStoreWithoutGroupOne.into());
                conn.send(&header).await
            }
            Some(group) => {
                let mut req = BytesMut::with_capacity(FDFS_PROTO_HEADER_LEN + group.len());
                req.put(encode_header(
                    group.len() as u64,
                    TrackerCommand::ServiceQueryStoreWithGroupOne.into(),
                ));
                req.put_slice(group);
                conn.send(&req).await
            }
        }
    }

    async fn receive_response(&mut self, conn: &mut Connection) -> Result<()> {
        let expected = ExpectedBody::Exact(TRACKER_QUERY_STORAGE_STORE_BODY_LEN as u64);
        let len = read_response_header(conn, expected).await?;
        let body = conn.receive_full(len as usize).await?;
        self.location = Some(decode_storage_location(&body)?);
        Ok(())
    }
}

/// Asks a tracker which storage server holds a file
pub struct QueryFetchTask {
    group_name: Bytes,
    remote_filename: String,
    location: Option<StorageLocation>,
}

impl QueryFetchTask {
    /// Creates a fetch query for `group_name/remote_filename`
    pub fn new(group_name: &str, remote_filename: &str) -> Result<Self> {
        Ok(Self {
            group_name: pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN)?,
            remote_filename: remote_filename.to_string(),
            location: None,
        })
    }

    /// Location reported by the tracker
    pub fn location(&self) -> Option<&StorageLocation> {
        self.location.as_ref()
    }

    async fn send_request(&mut self, conn: &mut Connection) -> Result<()> {
        let req = group_and_name_request(
            TrackerCommand::ServiceQueryFetchOne.into(),
            &self.group_name,
            &self.remote_filename,
        );
        conn.send(&req).await
    }

    async fn receive_response(&mut self, conn: &mut Connection) -> Result<()> {
        let expected = ExpectedBody::Exact(TRACKER_QUERY_STORAGE_FETCH_BODY_LEN as u64);
        let len = read_response_header(conn, expected).await?;
        let body = conn.receive_full(len as usize).await?;
        self.location = Some(decode_storage_location(&body)?);
        Ok(())
    }
}

fn group_and_name_request(cmd: u8, group_name: &[u8], remote_filename: &str) -> Bytes {
    let body_len = group_name.len() + remote_filename.len();
    let mut req = BytesMut::with_capacity(FDFS_PROTO_HEADER_LEN + body_len);
    req.put(encode_header(body_len as u64, cmd));
    req.put_slice(group_name);
    req.put_slice(remote_filename.as_bytes());
    req.freeze()
}

/// Uploads a file body to a storage server
pub struct UploadTask<'io> {
    store_path_index: u8,
    ext_name: Bytes,
    source: UploadSource<'io>,
    group_name: Option<String>,
    remote_filename: Option<String>,
}

impl<'io> UploadTask<'io> {
    /// Creates an upload into the given store path with an extension hint
    pub fn new(store_path_index: u8, ext_name: &str, source: UploadSource<'io>) -> Result<Self> {
        check_frame_len(source.len().saturating_add(UPLOAD_PREFIX_LEN as u64))?;
        Ok(Self {
            store_path_index,
            ext_name: pad_string(ext_name, FDFS_FILE_EXT_NAME_MAX_LEN)?,
            source,
            group_name: None,
            remote_filename: None,
        })
    }

    /// Points the upload at the store path the tracker picked
    pub fn set_store_path_index(&mut self, store_path_index: u8) {
        self.store_path_index = store_path_index;
    }

    /// File ID assigned by the storage server
    pub fn file_id(&self) -> Option<String> {
        match (&self.group_name, &self.remote_filename) {
            (Some(group), Some(name)) => Some(join_file_id(group, name)),
            _ => None,
        }
    }

    async fn send_request(&mut self, conn: &mut Connection) -> Result<()> {
        let size = self.source.len();

        let mut req = BytesMut::with_capacity(FDFS_PROTO_HEADER_LEN + UPLOAD_PREFIX_LEN);
        req.put(encode_header(
            UPLOAD_PREFIX_LEN as u64 + size,
            StorageCommand::UploadFile.into(),
        ));
        req.put_u8(self.store_path_index);
        req.put(encode_int64(size));
        req.put_slice(&self.ext_name);
        conn.send(&req).await?;

        match &mut self.source {
            UploadSource::Buffer(data) => conn.send(data).await,
            UploadSource::Stream { reader, size } => conn.send_from(&mut **reader, *size).await,
        }
    }

    async fn receive_response(&mut self, conn: &mut Connection) -> Result<()> {
        let expected = ExpectedBody::Range {
            min: FDFS_GROUP_NAME_MAX_LEN as u64 + 1,
            max: (FDFS_GROUP_NAME_MAX_LEN + FDFS_REMOTE_NAME_MAX_SIZE) as u64,
        };
        let len = read_response_header(conn, expected).await?;
        let body = conn.receive_full(len as usize).await?;

        let group_name = unpad_string(&body[..FDFS_GROUP_NAME_MAX_LEN]);
        if group_name.is_empty() {
            return Err(FdfsError::Framing("Upload response has empty group".to_string()));
        }
        let remote_filename = String::from_utf8(body[FDFS_GROUP_NAME_MAX_LEN..].to_vec())
            .map_err(|_| FdfsError::Framing("Remote filename is not UTF-8".to_string()))?;

        self.group_name = Some(group_name);
        self.remote_filename = Some(remote_filename);
        Ok(())
    }
}

/// store path index + file size + extension
const UPLOAD_PREFIX_LEN: usize = 1 + FDFS_PROTO_PKG_LEN_SIZE + FDFS_FILE_EXT_NAME_MAX_LEN;

/// Downloads a file, or a range of it, from a storage server
pub struct DownloadTask<'io> {
    group_name: Bytes,
    remote_filename: String,
    offset: u64,
    length: u64,
    sink: DownloadSink<'io>,
    received: u64,
}

impl<'io> DownloadTask<'io> {
    /// Creates a download of `length` bytes at `offset`; `length == 0`
    /// means to the end of the file
    pub fn new(
        group_name: &str,
        remote_filename: &str,
        offset: u64,
        length: u64,
        sink: DownloadSink<'io>,
    ) -> Result<Self> {
        check_frame_len(offset)?;
        check_frame_len(length)?;
        if let DownloadSink::Buffer(buf) = &sink {
            if length > buf.len() as u64 {
                return Err(FdfsError::BufferTooSmall {
                    needed: length,
                    capacity: buf.len(),
                });
            }
        }

        Ok(Self {
            group_name: pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN)?,
            remote_filename: remote_filename.to_string(),
            offset,
            length,
            sink,
            received: 0,
        })
    }

    /// Bytes delivered to the sink
    pub fn received(&self) -> u64 {
        self.received
    }

    async fn send_request(&mut self, conn: &mut Connection) -> Result<()> {
        let body_len = 2 * FDFS_PROTO_PKG_LEN_SIZE + self.group_name.len() + self.remote_filename.len();
        let mut req = BytesMut::with_capacity(FDFS_PROTO_HEADER_LEN + body_len);
        req.put(encode_header(body_len as u64, StorageCommand::DownloadFile.into()));
        req.put(encode_int64(self.offset));
        req.put(encode_int64(self.length));
        req.put_slice(&self.group_name);
        req.put_slice(self.remote_filename.as_bytes());
        conn.send(&req).await
    }

    async fn receive_response(&mut self, conn: &mut Connection) -> Result<()> {
        let expected = if self.length > 0 {
            ExpectedBody::AtMost(self.length)
        } else {
            ExpectedBody::AtMost(FDFS_MAX_BODY_LEN)
        };
        let len = read_response_header(conn, expected).await?;

        match &mut self.sink {
            DownloadSink::Buffer(buf) => {
                if len > buf.len() as u64 {
                    return Err(FdfsError::BufferTooSmall {
                        needed: len,
                        capacity: buf.len(),
                    });
                }
                conn.receive_exact(&mut buf[..len as usize]).await?;
            }
            DownloadSink::Writer(writer) => {
                conn.receive_to(&mut **writer, len).await?;
                writer.flush().await?;
            }
        }

        self.received = len;
        Ok(())
    }
}

/// Deletes a file from a storage server
pub struct DeleteTask {
    group_name: Bytes,
    remote_filename: String,
}

impl DeleteTask {
    /// Creates a delete of `group_name/remote_filename`
    pub fn new(group_name: &str, remote_filename: &str) -> Result<Self> {
        Ok(Self {
            group_name: pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN)?,
            remote_filename: remote_filename.to_string(),
        })
    }

    async fn send_request(&mut self, conn: &mut Connection) -> Result<()> {
        let req = group_and_name_request(
            StorageCommand::DeleteFile.into(),
            &self.group_name,
            &self.remote_filename,
        );
        conn.send(&req).await
    }

    async fn receive_response(&mut self, conn: &mut Connection) -> Result<()> {
        read_response_header(conn, ExpectedBody::Exact(0)).await?;
        Ok(())
    }
}

/// One exchange with a tracker or storage server
pub enum Task<'t, 'io> {
    /// Tracker: where to upload
    QueryStore(&'t mut QueryStoreTask),
    /// Tracker: where a file lives
    QueryFetch(&'t mut QueryFetchTask),
    /// Storage: upload a file
    Upload(&'t mut UploadTask<'io>),
    /// Storage: download a file
    Download(&'t mut DownloadTask<'io>),
    /// Storage: delete a file
    Delete(&'t mut DeleteTask),
}

impl Task<'_, '_> {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Task::QueryStore(_) => "query_store",
            Task::QueryFetch(_) => "query_fetch",
            Task::Upload(_) => "upload",
            Task::Download(_) => "download",
            Task::Delete(_) => "delete",
        }
    }

    /// Writes the request
    pub async fn send_request(&mut self, conn: &mut Connection) -> Result<()> {
        match self {
            Task::QueryStore(t) => t.send_request(conn).await,
            Task::QueryFetch(t) => t.send_request(conn).await,
            Task::Upload(t) => t.send_request(conn).await,
            Task::Download(t) => t.send_request(conn).await,
            Task::Delete(t) => t.send_request(conn).await,
        }
    }

    /// Reads and decodes the response
    pub async fn receive_response(&mut self, conn: &mut Connection) -> Result<()> {
        match self {
            Task::QueryStore(t) => t.receive_response(conn).await,
            Task::QueryFetch(t) => t.receive_response(conn).await,
            Task::Upload(t) => t.receive_response(conn).await,
            Task::Download(t) => t.receive_response(conn).await,
            Task::Delete(t) => t.receive_response(conn).await,
        }
    }

    /// Sends the request then receives the response, failing on the first
    /// error
    pub async fn run(&mut self, conn: &mut Connection) -> Result<()> {
        tracing::debug!(task = self.name(), addr = %conn.addr(), conn_id = conn.id(), "running task");
        self.send_request(conn).await?;
        self.receive_response(conn).await
    }
}

impl<'t> From<&'t mut QueryStoreTask> for Task<'t, '_> {
    fn from(task: &'t mut QueryStoreTask) -> Self {
        Task::QueryStore(task)
    }
}

impl<'t> From<&'t mut QueryFetchTask> for Task<'t, '_> {
    fn from(task: &'t mut QueryFetchTask) -> Self {
        Task::QueryFetch(task)
    }
}

impl<'t, 'io> From<&'t mut UploadTask<'io>> for Task<'t, 'io> {
    fn from(task: &'t mut UploadTask<'io>) -> Self {
        Task::Upload(task)
    }
}

impl<'t, 'io> From<&'t mut DownloadTask<'io>> for Task<'t, 'io> {
    fn from(task: &'t mut DownloadTask<'io>) -> Self {
        Task::Download(task)
    }
}

impl<'t> From<&'t mut DeleteTask> for Task<'t, '_> {
    fn from(task: &'t mut DeleteTask) -> Self {
        Task::Delete(task)
    }
}
