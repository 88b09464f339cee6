//! In-process mock FastDFS cluster for tests
//!
//! One tracker and one storage server, each on an ephemeral localhost port.
//! The tracker always points at the storage server; the storage server keeps
//! files in memory and speaks just enough of the storage protocol for
//! upload, download and delete.

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use fdfs_client::protocol::{
    decode_header, decode_int64, encode_header_with_status, encode_int64, pad_string, unpad_string,
};
use fdfs_client::types::{FDFS_GROUP_NAME_MAX_LEN, FDFS_PROTO_CMD_RESP, IP_ADDRESS_SIZE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Knobs for the mock cluster
#[derive(Clone)]
pub struct MockOptions {
    /// Group the storage server belongs to
    pub group: String,
    /// Storage connections are dropped when this many requests have been
    /// served on them and another arrives
    pub requests_per_storage_conn: Option<usize>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            group: "group1".to_string(),
            requests_per_storage_conn: None,
        }
    }
}

struct StorageState {
    group: String,
    files: Mutex<HashMap<String, Vec<u8>>>,
    next_name: AtomicU64,
    accepted: AtomicUsize,
}

/// Running mock cluster; servers stop when this is dropped
pub struct MockCluster {
    /// Address of the mock tracker
    pub tracker_addr: String,
    /// Address of the mock storage server
    pub storage_addr: String,
    storage: Arc<StorageState>,
    servers: Vec<JoinHandle<()>>,
}

impl MockCluster {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let tracker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let storage = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tracker_addr = tracker.local_addr().unwrap().to_string();
        let storage_port = storage.local_addr().unwrap().port();
        let storage_addr = format!("127.0.0.1:{}", storage_port);

        let state = Arc::new(StorageState {
            group: options.group.clone(),
            files: Mutex::new(HashMap::new()),
            next_name: AtomicU64::new(1),
            accepted: AtomicUsize::new(0),
        });

        let group = options.group.clone();
        let tracker_server = tokio::spawn(async move {
            while let Ok((socket, _)) = tracker.accept().await {
                tokio::spawn(serve_tracker(socket, group.clone(), storage_port));
            }
        });

        let storage_state = Arc::clone(&state);
        let limit = options.requests_per_storage_conn;
        let storage_server = tokio::spawn(async move {
            while let Ok((socket, _)) = storage.accept().await {
                storage_state.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_storage(socket, Arc::clone(&storage_state), limit));
            }
        });

        Self {
            tracker_addr,
            storage_addr,
            storage: state,
            servers: vec![tracker_server, storage_server],
        }
    }

    /// Storage connections accepted so far
    pub fn storage_connections(&self) -> usize {
        self.storage.accepted.load(Ordering::SeqCst)
    }

    /// Files currently stored
    pub fn file_count(&self) -> usize {
        self.storage.files.lock().unwrap().len()
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        for server in &self.servers {
            server.abort();
        }
    }
}

/// An address nothing listens on
pub async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

async fn read_frame(socket: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut header = [0u8; 10];
    socket.read_exact(&mut header).await.ok()?;
    let header = decode_header(&header).ok()?;
    let mut body = vec![0u8; header.length as usize];
    socket.read_exact(&mut body).await.ok()?;
    Some((header.cmd, body))
}

async fn write_frame(socket: &mut TcpStream, status: u8, body: &[u8]) -> bool {
    let mut out = BytesMut::new();
    out.put(encode_header_with_status(
        body.len() as u64,
        FDFS_PROTO_CMD_RESP,
        status,
    ));
    out.put_slice(body);
    socket.write_all(&out).await.is_ok()
}

async fn serve_tracker(mut socket: TcpStream, group: String, storage_port: u16) {
    while let Some((cmd, body)) = read_frame(&mut socket).await {
        let (reply_group, with_index) = match cmd {
            101 => (group.clone(), true),
            104 => (unpad_string(&body[..FDFS_GROUP_NAME_MAX_LEN]), true),
            102 => (unpad_string(&body[..FDFS_GROUP_NAME_MAX_LEN]), false),
            _ => return,
        };

        let mut reply = BytesMut::new();
        reply.put(pad_string(&reply_group, FDFS_GROUP_NAME_MAX_LEN).unwrap());
        reply.put(pad_string("127.0.0.1", IP_ADDRESS_SIZE - 1).unwrap());
        reply.put(encode_int64(storage_port as u64));
        if with_index {
            reply.put_u8(0);
        }

        if !write_frame(&mut socket, 0, &reply).await {
            return;
        }
    }
}

async fn serve_storage(mut socket: TcpStream, state: Arc<StorageState>, limit: Option<usize>) {
    let mut served = 0;
    loop {
        let mut header = [0u8; 10];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        if limit.map_or(false, |limit| served >= limit) {
            return;
        }
        let header = decode_header(&header).unwrap();
        let mut body = vec![0u8; header.length as usize];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }
        served += 1;

        let Some((status, reply)) = handle_storage(&state, header.cmd, &body) else {
            return;
        };
        if !write_frame(&mut socket, status, &reply).await {
            return;
        }
    }
}

fn handle_storage(state: &StorageState, cmd: u8, body: &[u8]) -> Option<(u8, Vec<u8>)> {
    let mut files = state.files.lock().unwrap();
    match cmd {
        11 => {
            let size = decode_int64(&body[1..9]).unwrap() as usize;
            let ext = unpad_string(&body[9..15]);
            let data = &body[15..];
            assert_eq!(size, data.len(), "declared size must match body");

            let n = state.next_name.fetch_add(1, Ordering::SeqCst);
            let mut name = format!("M00/00/00/{:08}", n);
            if !ext.is_empty() {
                name.push('.');
                name.push_str(&ext);
            }
            files.insert(format!("{}/{}", state.group, name), data.to_vec());

            let mut reply = pad_string(&state.group, FDFS_GROUP_NAME_MAX_LEN)
                .unwrap()
                .to_vec();
            reply.extend_from_slice(name.as_bytes());
            Some((0, reply))
        }
        14 => {
            let offset = decode_int64(&body[0..8]).unwrap() as usize;
            let length = decode_int64(&body[8..16]).unwrap() as usize;
            let group = unpad_string(&body[16..32]);
            let name = String::from_utf8_lossy(&body[32..]).to_string();

            let Some(data) = files.get(&format!("{}/{}", group, name)) else {
                return Some((2, Vec::new()));
            };
            if offset > data.len() {
                return Some((22, Vec::new()));
            }
            let end = if length == 0 { data.len() } else { offset + length };
            if end > data.len() {
                return Some((22, Vec::new()));
            }
            Some((0, data[offset..end].to_vec()))
        }
        12 => {
            let group = unpad_string(&body[..16]);
            let name = String::from_utf8_lossy(&body[16..]).to_string();
            match files.remove(&format!("{}/{}", group, name)) {
                Some(_) => Some((0, Vec::new())),
                None => Some((2, Vec::new())),
            }
        }
        _ => None,
    }
}
