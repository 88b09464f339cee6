//! FastDFS Protocol Types and Constants
//!
//! This module defines the protocol-level constants, command codes, and data
//! structures used when talking to tracker and storage servers.

/// Tracker port assumed for `tracker_server` entries without one
pub const TRACKER_DEFAULT_PORT: u16 = 22122;

/// Protocol header size
pub const FDFS_PROTO_HEADER_LEN: usize = 10;
/// Width of an encoded integer field
pub const FDFS_PROTO_PKG_LEN_SIZE: usize = 8;
/// Command code carried by every response header
pub const FDFS_PROTO_CMD_RESP: u8 = 100;

/// Field size limits
pub const FDFS_GROUP_NAME_MAX_LEN: usize = 16;
/// Width of the file extension field in upload requests
pub const FDFS_FILE_EXT_NAME_MAX_LEN: usize = 6;
/// Size of an IP address buffer; the wire field is one byte shorter
pub const IP_ADDRESS_SIZE: usize = 16;
/// Longest remote filename a storage server hands back
pub const FDFS_REMOTE_NAME_MAX_SIZE: usize = 128;

/// Largest body a rejected response may carry before it is treated as a
/// framing error
pub const FDFS_MAX_ERROR_BODY_LEN: u64 = 1024;

/// Tracker response body for a fetch query: group, ip, port
pub const TRACKER_QUERY_STORAGE_FETCH_BODY_LEN: usize =
    FDFS_GROUP_NAME_MAX_LEN + IP_ADDRESS_SIZE - 1 + FDFS_PROTO_PKG_LEN_SIZE;
/// Tracker response body for a store query: fetch body plus path index
pub const TRACKER_QUERY_STORAGE_STORE_BODY_LEN: usize = TRACKER_QUERY_STORAGE_FETCH_BODY_LEN + 1;

/// Tracker protocol commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackerCommand {
    /// Ask for an upload location in any group
    ServiceQueryStoreWithoutGroupOne = 101,
    /// Ask which storage server holds a file
    ServiceQueryFetchOne = 102,
    /// Ask for an upload location in a named group
    ServiceQueryStoreWithGroupOne = 104,
}

impl From<TrackerCommand> for u8 {
    fn from(cmd: TrackerCommand) -> u8 {
        cmd as u8
    }
}

/// Storage protocol commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageCommand {
    /// Upload a new file
    UploadFile = 11,
    /// Delete a file
    DeleteFile = 12,
    /// Download a file or a byte range of it
    DownloadFile = 14,
}

impl From<StorageCommand> for u8 {
    fn from(cmd: StorageCommand) -> u8 {
        cmd as u8
    }
}

/// FastDFS protocol header (10 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHeader {
    /// Length of the message body (not including header)
    pub length: u64,
    /// Command code (request type or response type)
    pub cmd: u8,
    /// Status code (0 for success, error code otherwise)
    pub status: u8,
}

/// A storage server chosen by a tracker for one operation
///
/// Produced by a tracker query and consumed by exactly one storage task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    /// Group the storage server belongs to
    pub group_name: String,
    /// IP address of the storage server
    pub ip_addr: String,
    /// Port number of the storage server
    pub port: u16,
    /// Index of the storage path to use (0-based)
    pub store_path_index: u8,
}

impl StorageLocation {
    /// Endpoint string used to key the storage pool map
    pub fn addr(&self) -> String {
        if self.ip_addr.contains(':') {
            format!("[{}]:{}", self.ip_addr, self.port)
        } else {
            format!("{}:{}", self.ip_addr, self.port)
        }
    }
}
