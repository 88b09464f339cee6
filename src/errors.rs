//! FastDFS Client Error Definitions
//!
//! Errors are split by where they originate: local misuse (configuration,
//! identifiers, oversized fields), transport (dialing, I/O, timeouts),
//! framing (a peer that speaks the protocol incorrectly), pool state, and
//! remote rejection (a well-formed response carrying a nonzero status).

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, FdfsError>;

/// Base error type for all client errors
#[derive(Error, Debug)]
pub enum FdfsError {
    /// Configuration was rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not establish a TCP connection
    #[error("Failed to connect to {addr}: {source}")]
    Dial {
        /// Endpoint that was dialed
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Connection establishment exceeded the connect timeout
    #[error("Connection timeout to {0}")]
    ConnectTimeout(String),

    /// Read or write failure on an established connection
    #[error("Network error during {operation} to {addr}: {source}")]
    Network {
        /// "read" or "write"
        operation: &'static str,
        /// Peer address
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Read or write exceeded the network timeout
    #[error("Network timeout during {operation} to {addr}")]
    NetworkTimeout {
        /// "read" or "write"
        operation: &'static str,
        /// Peer address
        addr: String,
    },

    /// Malformed header, unexpected command, or untrustworthy length
    #[error("Framing error: {0}")]
    Framing(String),

    /// Caller data violates a wire constraint
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Remote server rejected the request with a nonzero status
    #[error("Remote error (code {code}): {message}")]
    Remote {
        /// Status byte from the response header
        code: u8,
        /// Human-readable description of the status
        message: String,
    },

    /// Pool capacity stayed exhausted past the acquire timeout
    #[error("Connection pool exhausted for {0}")]
    PoolExhausted(String),

    /// Pool has been destroyed
    #[error("Connection pool closed for {0}")]
    PoolClosed(String),

    /// Client has been closed
    #[error("Client is closed")]
    ClientClosed,

    /// File ID format is invalid
    #[error("Invalid file ID: {0}")]
    InvalidFileId(String),

    /// Destination buffer cannot hold the requested range
    #[error("Buffer too small: need {needed} bytes, capacity is {capacity}")]
    BufferTooSmall {
        /// Bytes the response requires
        needed: u64,
        /// Bytes the buffer can hold
        capacity: usize,
    },

    /// No tracker pool is available to query
    #[error("No tracker server available")]
    NoTrackerAvailable,

    /// Local I/O error (files, caller-supplied readers and writers)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`FdfsError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration
    Config,
    /// Connection could not be established
    Dial,
    /// I/O failure or timeout on an established connection
    Transport,
    /// Peer violated the framing rules
    Framing,
    /// Caller supplied data that cannot be encoded
    Protocol,
    /// Remote server rejected the request
    Remote,
    /// Pool exhausted or closed, or client closed
    Pool,
    /// Malformed file identifier
    Identifier,
    /// Local resource failure or undersized destination
    Local,
}

impl FdfsError {
    /// Returns the classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            FdfsError::InvalidConfig(_) => ErrorKind::Config,
            FdfsError::Dial { .. } | FdfsError::ConnectTimeout(_) => ErrorKind::Dial,
            FdfsError::Network { .. } | FdfsError::NetworkTimeout { .. } => ErrorKind::Transport,
            FdfsError::Framing(_) => ErrorKind::Framing,
            FdfsError::Protocol(_) => ErrorKind::Protocol,
            FdfsError::Remote { .. } => ErrorKind::Remote,
            FdfsError::PoolExhausted(_)
            | FdfsError::PoolClosed(_)
            | FdfsError::ClientClosed
            | FdfsError::NoTrackerAvailable => ErrorKind::Pool,
            FdfsError::InvalidFileId(_) => ErrorKind::Identifier,
            FdfsError::BufferTooSmall { .. } | FdfsError::Io(_) => ErrorKind::Local,
        }
    }

    /// Returns the remote status code if the server rejected the request
    pub fn remote_code(&self) -> Option<u8> {
        match self {
            FdfsError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a connection that produced this error is still in sync
    ///
    /// Only a remote rejection leaves the stream at a frame boundary; every
    /// other failure means the connection must be discarded.
    pub fn keeps_connection(&self) -> bool {
        matches!(self, FdfsError::Remote { .. })
    }
}

/// Maps a response status byte to an error
///
/// Status code 0 indicates success (no error).
///
/// Common status codes:
///   - 2: File not found (ENOENT)
///   - 6: File already exists (EEXIST)
///   - 22: Invalid argument (EINVAL)
///   - 28: Insufficient space (ENOSPC)
pub fn map_status_to_error(status: u8) -> Option<FdfsError> {
    let message = match status {
        0 => return None,
        2 => "file not found".to_string(),
        6 => "file already exists".to_string(),
        22 => "invalid argument".to_string(),
        28 => "insufficient storage space".to_string(),
        _ => format!("unknown error code {}", status),
    };
    Some(FdfsError::Remote {
        code: status,
        message,
    })
}
