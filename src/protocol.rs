//! FastDFS Wire Codec
//!
//! Translates between in-memory values and the frame byte layout:
//!
//! ```text
//! ┌──────────────┬─────────┬─────────┬──────────────────┐
//! │ Body length  │ Command │ Status  │ Body             │
//! │ 8 bytes u64BE│ 1 byte  │ 1 byte  │ length bytes     │
//! └──────────────┴─────────┴─────────┴──────────────────┘
//! ```
//!
//! Nothing here touches the network.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::Path;

use crate::errors::{FdfsError, Result};
use crate::types::*;

/// Largest body length any frame may declare; lengths travel as signed
/// 64-bit integers on the server side.
pub const FDFS_MAX_BODY_LEN: u64 = i64::MAX as u64;

/// Encodes a request header into a 10-byte buffer
///
/// The status byte of a request is always 0.
pub fn encode_header(length: u64, cmd: u8) -> Bytes {
    encode_header_with_status(length, cmd, 0)
}

/// Encodes a header with an explicit status byte
///
/// The header format is:
///   - Bytes 0-7: Body length (8 bytes, big-endian uint64)
///   - Byte 8: Command code
///   - Byte 9: Status code (0 for request, error code for response)
pub fn encode_header_with_status(length: u64, cmd: u8, status: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(FDFS_PROTO_HEADER_LEN);
    buf.put_u64(length);
    buf.put_u8(cmd);
    buf.put_u8(status);
    buf.freeze()
}

/// Decodes a protocol header
///
/// The caller must have read the full 10 bytes; anything shorter is a
/// framing error.
pub fn decode_header(data: &[u8]) -> Result<ProtoHeader> {
    if data.len() < FDFS_PROTO_HEADER_LEN {
        return Err(FdfsError::Framing(format!(
            "Header too short: {} bytes",
            data.len()
        )));
    }

    let mut buf = &data[..FDFS_PROTO_HEADER_LEN];
    let length = buf.get_u64();
    let cmd = buf.get_u8();
    let status = buf.get_u8();

    Ok(ProtoHeader {
        length,
        cmd,
        status,
    })
}

/// Body length a response is allowed to declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedBody {
    /// Exactly this many bytes
    Exact(u64),
    /// Between `min` and `max` bytes inclusive
    Range {
        /// Smallest acceptable length
        min: u64,
        /// Largest acceptable length
        max: u64,
    },
    /// Anything up to this many bytes
    AtMost(u64),
}

impl ExpectedBody {
    /// Checks a declared length against this expectation
    pub fn check(self, length: u64) -> Result<()> {
        let ok = match self {
            ExpectedBody::Exact(n) => length == n,
            ExpectedBody::Range { min, max } => (min..=max).contains(&length),
            ExpectedBody::AtMost(max) => length <= max,
        };
        if ok {
            Ok(())
        } else {
            Err(FdfsError::Framing(format!(
                "Unexpected body length {} (expected {:?})",
                length, self
            )))
        }
    }
}

/// Validates the parts of a response header that do not depend on status
pub fn check_response_header(header: &ProtoHeader) -> Result<()> {
    if header.cmd != FDFS_PROTO_CMD_RESP {
        return Err(FdfsError::Framing(format!(
            "Unexpected response command {}",
            header.cmd
        )));
    }
    if header.length > FDFS_MAX_BODY_LEN {
        return Err(FdfsError::Framing(format!(
            "Declared body length {} exceeds maximum",
            header.length
        )));
    }
    Ok(())
}

/// Splits a file ID into its components
///
/// A file ID has the format: "groupName/path/to/file"
/// For example: "group1/M00/00/00/wKgBcFxyz.jpg"
pub fn split_file_id(file_id: &str) -> Result<(String, String)> {
    let (group_name, remote_filename) = file_id
        .split_once('/')
        .ok_or_else(|| FdfsError::InvalidFileId(file_id.to_string()))?;

    if group_name.is_empty() || group_name.len() > FDFS_GROUP_NAME_MAX_LEN {
        return Err(FdfsError::InvalidFileId(file_id.to_string()));
    }

    if remote_filename.is_empty() {
        return Err(FdfsError::InvalidFileId(file_id.to_string()));
    }

    Ok((group_name.to_string(), remote_filename.to_string()))
}

/// Constructs a complete file ID from its components
///
/// This is the inverse operation of split_file_id.
pub fn join_file_id(group_name: &str, remote_filename: &str) -> String {
    format!("{}/{}", group_name, remote_filename)
}

/// Extracts the file extension from a local filename
///
/// The extension is returned without the leading dot and truncated to 6
/// characters if it exceeds the field width.
///
/// Examples:
///   - "test.jpg" -> "jpg"
///   - "file.tar.gz" -> "gz"
///   - "noext" -> ""
///   - "file.verylongext" -> "verylo" (truncated)
pub fn get_file_ext_name(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    ext.char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= FDFS_FILE_EXT_NAME_MAX_LEN)
        .map(|(_, c)| c)
        .collect()
}

/// Pads a string to a fixed-width field with null bytes
///
/// A string longer than the field is a caller mistake and is rejected
/// rather than truncated.
pub fn pad_string(s: &str, length: usize) -> Result<Bytes> {
    let bytes = s.as_bytes();
    if bytes.len() > length {
        return Err(FdfsError::Protocol(format!(
            "'{}' is {} bytes, field width is {}",
            s,
            bytes.len(),
            length
        )));
    }
    let mut buf = BytesMut::with_capacity(length);
    buf.put_slice(bytes);
    buf.resize(length, 0);
    Ok(buf.freeze())
}

/// Removes trailing null bytes from a fixed-width field
pub fn unpad_string(data: &[u8]) -> String {
    let end = data.iter().rposition(|&b| b != 0).map(|i| i + 1).unwrap_or(0);
    String::from_utf8_lossy(&data[..end]).to_string()
}

/// Encodes a 64-bit integer to an 8-byte big-endian representation
pub fn encode_int64(n: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(FDFS_PROTO_PKG_LEN_SIZE);
    buf.put_u64(n);
    buf.freeze()
}

/// Decodes an 8-byte big-endian integer
pub fn decode_int64(data: &[u8]) -> Result<u64> {
    if data.len() < FDFS_PROTO_PKG_LEN_SIZE {
        return Err(FdfsError::Framing(format!(
            "Integer field too short: {} bytes",
            data.len()
        )));
    }
    let mut buf = &data[..FDFS_PROTO_PKG_LEN_SIZE];
    Ok(buf.get_u64())
}

/// Decodes a tracker query response body into a storage location
///
/// Store responses carry a trailing store path index; fetch responses do
/// not, in which case the index is 0.
pub fn decode_storage_location(body: &[u8]) -> Result<StorageLocation> {
    if body.len() < TRACKER_QUERY_STORAGE_FETCH_BODY_LEN {
        return Err(FdfsError::Framing(format!(
            "Tracker response too short: {} bytes",
            body.len()
        )));
    }

    let mut offset = 0;
    let group_name = unpad_string(&body[offset..offset + FDFS_GROUP_NAME_MAX_LEN]);
    offset += FDFS_GROUP_NAME_MAX_LEN;

    let ip_addr = unpad_string(&body[offset..offset + IP_ADDRESS_SIZE - 1]);
    offset += IP_ADDRESS_SIZE - 1;

    let port = decode_int64(&body[offset..offset + FDFS_PROTO_PKG_LEN_SIZE])?;
    offset += FDFS_PROTO_PKG_LEN_SIZE;

    let port = u16::try_from(port)
        .map_err(|_| FdfsError::Framing(format!("Port out of range: {}", port)))?;
    if ip_addr.is_empty() {
        return Err(FdfsError::Framing("Tracker returned empty IP".to_string()));
    }

    let store_path_index = body.get(offset).copied().unwrap_or(0);

    Ok(StorageLocation {
        group_name,
        ip_addr,
        port,
        store_path_index,
    })
}
