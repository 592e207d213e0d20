//! Record store access.
//!
//! [`RecordStore`] is the seam between view logic and the record collection.
//! [`SocketStore`] speaks the newline-delimited JSON protocol to the
//! carline-store daemon; [`MemoryStore`] implements the same semantics in
//! process so state logic can be tested without a socket. Watches are
//! represented as [`Watch`] handles: long-lived channels of snapshots that
//! can be cancelled exactly once.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use carline_store_protocol::{
    now_rfc3339, ErrorInfo, Method, NewRecord, PickupRecord, RecordPatch, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

use crate::config;
use crate::error::{CarlineError, Result};

const REQUEST_TIMEOUT_MS: u64 = 600;
const WATCH_WRITE_TIMEOUT_SECS: u64 = 5;
const READ_CHUNK_SIZE: usize = 4096;

/// One delivery on a watch channel.
#[derive(Debug)]
pub enum WatchEvent<T> {
    /// A full snapshot of the watched data.
    Snapshot(T),
    /// The stream broke; no further snapshots will arrive on this handle.
    Lost(String),
}

/// A live subscription. Snapshots arrive through `recv` until the handle is
/// cancelled or the backing stream dies. Dropping the handle cancels it;
/// either way the underlying subscription is torn down exactly once.
pub struct Watch<T> {
    receiver: Receiver<WatchEvent<T>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Watch<T> {
    /// Wraps a snapshot channel and a teardown hook. [`RecordStore`]
    /// implementations build their watch handles through this; the hook runs
    /// at most once, on cancel or drop.
    pub fn new(receiver: Receiver<WatchEvent<T>>, cancel: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            receiver,
            cancel: Some(cancel),
        }
    }

    /// Blocks for the next event. `None` means the sending side is gone and
    /// nothing further will arrive.
    pub fn recv(&self) -> Option<WatchEvent<T>> {
        self.receiver.recv().ok()
    }

    pub fn try_recv(&self) -> Option<WatchEvent<T>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WatchEvent<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Tears the subscription down now instead of at drop time.
    pub fn cancel(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<T> Drop for Watch<T> {
    fn drop(&mut self) {
        self.close();
    }
}

pub type CollectionWatch = Watch<Vec<PickupRecord>>;
pub type RecordWatch = Watch<Option<PickupRecord>>;

/// Client-side access to the pickup record collection.
pub trait RecordStore: Send + Sync {
    fn create(&self, new_record: NewRecord) -> Result<PickupRecord>;
    fn merge_update(&self, record_id: &str, patch: RecordPatch) -> Result<PickupRecord>;
    fn fetch(&self, record_id: &str) -> Result<Option<PickupRecord>>;
    fn list(&self) -> Result<Vec<PickupRecord>>;
    fn delete(&self, record_id: &str) -> Result<bool>;
    fn watch_collection(&self) -> Result<CollectionWatch>;
    fn watch_record(&self, record_id: &str) -> Result<RecordWatch>;
}

struct CollectionWatcher {
    token: u64,
    sender: Sender<WatchEvent<Vec<PickupRecord>>>,
}

struct RecordWatcher {
    token: u64,
    record_id: String,
    sender: Sender<WatchEvent<Option<PickupRecord>>>,
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<String, PickupRecord>,
    next_id: u64,
    next_token: u64,
    collection_watchers: Vec<CollectionWatcher>,
    record_watchers: Vec<RecordWatcher>,
}

/// In-process store with the daemon's merge and fan-out semantics. Backs the
/// unit tests and any embedding that has no daemon to talk to.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner.lock().map_err(|_| CarlineError::StoreProtocol {
            context: "record store lock poisoned".to_string(),
        })
    }

    /// Fans the committed state out to every live watcher. Watchers whose
    /// receiving side is gone are pruned on the failed send.
    fn fan_out(inner: &mut MemoryInner, touched_id: &str) {
        let snapshot: Vec<PickupRecord> = inner.records.values().cloned().collect();
        inner.collection_watchers.retain(|watcher| {
            watcher
                .sender
                .send(WatchEvent::Snapshot(snapshot.clone()))
                .is_ok()
        });

        let touched = inner.records.get(touched_id).cloned();
        inner.record_watchers.retain(|watcher| {
            if watcher.record_id != touched_id {
                return true;
            }
            watcher
                .sender
                .send(WatchEvent::Snapshot(touched.clone()))
                .is_ok()
        });
    }
}

impl RecordStore for MemoryStore {
    fn create(&self, new_record: NewRecord) -> Result<PickupRecord> {
        new_record.validate().map_err(rejected)?;

        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = format!("rec-{:04}", inner.next_id);
        let record = PickupRecord::from_submission(id.clone(), new_record, &now_rfc3339());
        inner.records.insert(id.clone(), record.clone());
        MemoryStore::fan_out(&mut inner, &id);
        Ok(record)
    }

    fn merge_update(&self, record_id: &str, patch: RecordPatch) -> Result<PickupRecord> {
        patch.validate().map_err(rejected)?;

        let mut inner = self.lock()?;
        let now = now_rfc3339();
        let updated = match inner.records.get_mut(record_id) {
            Some(record) => {
                record.apply_patch(&patch, &now);
                record.clone()
            }
            None => return Err(not_found(record_id)),
        };
        MemoryStore::fan_out(&mut inner, record_id);
        Ok(updated)
    }

    fn fetch(&self, record_id: &str) -> Result<Option<PickupRecord>> {
        Ok(self.lock()?.records.get(record_id).cloned())
    }

    fn list(&self) -> Result<Vec<PickupRecord>> {
        Ok(self.lock()?.records.values().cloned().collect())
    }

    fn delete(&self, record_id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let removed = inner.records.remove(record_id).is_some();
        if removed {
            MemoryStore::fan_out(&mut inner, record_id);
        }
        Ok(removed)
    }

    fn watch_collection(&self) -> Result<CollectionWatch> {
        let (sender, receiver) = mpsc::channel();
        let mut inner = self.lock()?;

        let snapshot: Vec<PickupRecord> = inner.records.values().cloned().collect();
        let _ = sender.send(WatchEvent::Snapshot(snapshot));

        inner.next_token += 1;
        let token = inner.next_token;
        inner.collection_watchers.push(CollectionWatcher { token, sender });
        drop(inner);

        let registry = Arc::clone(&self.inner);
        Ok(Watch::new(
            receiver,
            Box::new(move || {
                if let Ok(mut inner) = registry.lock() {
                    inner.collection_watchers.retain(|watcher| watcher.token != token);
                }
            }),
        ))
    }

    fn watch_record(&self, record_id: &str) -> Result<RecordWatch> {
        let (sender, receiver) = mpsc::channel();
        let mut inner = self.lock()?;

        let current = inner.records.get(record_id).cloned();
        let _ = sender.send(WatchEvent::Snapshot(current));

        inner.next_token += 1;
        let token = inner.next_token;
        inner.record_watchers.push(RecordWatcher {
            token,
            record_id: record_id.to_string(),
            sender,
        });
        drop(inner);

        let registry = Arc::clone(&self.inner);
        Ok(Watch::new(
            receiver,
            Box::new(move || {
                if let Ok(mut inner) = registry.lock() {
                    inner.record_watchers.retain(|watcher| watcher.token != token);
                }
            }),
        ))
    }
}

fn rejected(info: ErrorInfo) -> CarlineError {
    CarlineError::StoreRejected {
        code: info.code,
        message: info.message,
    }
}

fn not_found(record_id: &str) -> CarlineError {
    CarlineError::StoreRejected {
        code: "not_found".to_string(),
        message: format!("no record with id {}", record_id),
    }
}

/// Store client backed by the carline-store daemon over its Unix socket.
///
/// Plain requests open a fresh connection per call; watches keep theirs open
/// and feed a reader thread that forwards each pushed snapshot into the
/// [`Watch`] channel. Cancelling a watch shuts the socket down, which also
/// unparks the daemon side.
pub struct SocketStore {
    socket_path: PathBuf,
}

impl SocketStore {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Resolves the socket path from `CARLINE_STORE_SOCKET` or the default
    /// location under the carline home directory.
    pub fn from_env() -> Result<Self> {
        config::get_socket_path()
            .map(Self::new)
            .ok_or(CarlineError::HomeDirNotFound)
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path).map_err(|source| CarlineError::StoreUnavailable {
            context: format!("connect to record store at {}", self.socket_path.display()),
            source,
        })
    }

    fn request(&self, method: Method, params: Option<Value>) -> Result<Value> {
        let mut stream = self.connect()?;
        let timeout = Some(Duration::from_millis(REQUEST_TIMEOUT_MS));
        let _ = stream.set_read_timeout(timeout);
        let _ = stream.set_write_timeout(timeout);

        send_request(&mut stream, method, params)?;
        let reply = read_reply_line(&mut stream)?;
        parse_reply(&reply)
    }

    fn open_watch_stream(&self, method: Method, params: Option<Value>) -> Result<UnixStream> {
        let mut stream = self.connect()?;
        let _ = stream.set_write_timeout(Some(Duration::from_secs(WATCH_WRITE_TIMEOUT_SECS)));
        let _ = stream.set_read_timeout(None);
        send_request(&mut stream, method, params)?;
        Ok(stream)
    }

    fn spawn_watch<T: Send + 'static>(
        stream: UnixStream,
        decode_snapshot: fn(Value) -> Result<T>,
    ) -> Result<Watch<T>> {
        let reader = stream
            .try_clone()
            .map_err(|source| CarlineError::StoreUnavailable {
                context: "clone watch stream".to_string(),
                source,
            })?;

        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || pump_watch(reader, sender, decode_snapshot));

        Ok(Watch::new(
            receiver,
            Box::new(move || {
                let _ = stream.shutdown(Shutdown::Both);
            }),
        ))
    }
}

impl RecordStore for SocketStore {
    fn create(&self, new_record: NewRecord) -> Result<PickupRecord> {
        let params = serde_json::to_value(&new_record).map_err(|source| CarlineError::Json {
            context: "encode creation payload".to_string(),
            source,
        })?;
        let data = self.request(Method::CreateRecord, Some(params))?;
        decode(data, "parse created record")
    }

    fn merge_update(&self, record_id: &str, patch: RecordPatch) -> Result<PickupRecord> {
        let params = serde_json::json!({ "record_id": record_id, "patch": patch });
        let data = self.request(Method::UpdateRecord, Some(params))?;
        decode(data, "parse updated record")
    }

    fn fetch(&self, record_id: &str) -> Result<Option<PickupRecord>> {
        let params = serde_json::json!({ "record_id": record_id });
        let data = self.request(Method::GetRecord, Some(params))?;
        let lookup: RecordLookup = decode(data, "parse record lookup")?;
        Ok(lookup.record)
    }

    fn list(&self) -> Result<Vec<PickupRecord>> {
        let data = self.request(Method::ListRecords, None)?;
        let list: RecordList = decode(data, "parse record list")?;
        Ok(list.records)
    }

    fn delete(&self, record_id: &str) -> Result<bool> {
        let params = serde_json::json!({ "record_id": record_id });
        let data = self.request(Method::DeleteRecord, Some(params))?;
        let outcome: Removed = decode(data, "parse delete outcome")?;
        Ok(outcome.removed)
    }

    fn watch_collection(&self) -> Result<CollectionWatch> {
        let stream = self.open_watch_stream(Method::WatchCollection, None)?;
        Self::spawn_watch(stream, decode_collection_snapshot)
    }

    fn watch_record(&self, record_id: &str) -> Result<RecordWatch> {
        let params = serde_json::json!({ "record_id": record_id });
        let stream = self.open_watch_stream(Method::WatchRecord, Some(params))?;
        Self::spawn_watch(stream, decode_record_snapshot)
    }
}

fn send_request(stream: &mut UnixStream, method: Method, params: Option<Value>) -> Result<()> {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: None,
        params,
    };
    let mut payload = serde_json::to_vec(&request).map_err(|source| CarlineError::Json {
        context: "encode store request".to_string(),
        source,
    })?;
    payload.push(b'\n');

    stream
        .write_all(&payload)
        .map_err(|source| CarlineError::StoreUnavailable {
            context: "send request to record store".to_string(),
            source,
        })?;
    stream
        .flush()
        .map_err(|source| CarlineError::StoreUnavailable {
            context: "flush request to record store".to_string(),
            source,
        })
}

fn read_reply_line(stream: &mut UnixStream) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(CarlineError::StoreProtocol {
                        context: "store reply exceeded the size limit".to_string(),
                    });
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Err(CarlineError::StoreUnavailable {
                    context: "record store did not reply in time".to_string(),
                    source: err,
                });
            }
            Err(source) => {
                return Err(CarlineError::StoreUnavailable {
                    context: "read record store reply".to_string(),
                    source,
                });
            }
        }
    }

    if let Some(index) = buffer.iter().position(|b| *b == b'\n') {
        buffer.truncate(index);
    }
    if buffer.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(CarlineError::StoreProtocol {
            context: "record store closed the connection without replying".to_string(),
        });
    }
    Ok(buffer)
}

fn parse_reply(bytes: &[u8]) -> Result<Value> {
    let response: Response = serde_json::from_slice(bytes).map_err(|source| CarlineError::Json {
        context: "parse store reply".to_string(),
        source,
    })?;

    if !response.ok {
        let info = response
            .error
            .unwrap_or_else(|| ErrorInfo::new("unknown_error", "store reported an unspecified failure"));
        return Err(rejected(info));
    }
    response.data.ok_or_else(|| CarlineError::StoreProtocol {
        context: "store reply carried no data".to_string(),
    })
}

/// Forwards pushed snapshot lines into the watch channel until the stream or
/// the receiving side goes away.
fn pump_watch<T: Send>(
    stream: UnixStream,
    sender: Sender<WatchEvent<T>>,
    decode_snapshot: fn(Value) -> Result<T>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                let _ = sender.send(WatchEvent::Lost(
                    "record store closed the watch stream".to_string(),
                ));
                return;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let event = match parse_reply(trimmed.as_bytes()).and_then(decode_snapshot) {
                    Ok(snapshot) => WatchEvent::Snapshot(snapshot),
                    Err(err) => {
                        let _ = sender.send(WatchEvent::Lost(err.to_string()));
                        return;
                    }
                };
                if sender.send(event).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = sender.send(WatchEvent::Lost(format!("watch stream read failed: {}", err)));
                return;
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value, context: &'static str) -> Result<T> {
    serde_json::from_value(data).map_err(|source| CarlineError::Json {
        context: context.to_string(),
        source,
    })
}

fn decode_collection_snapshot(data: Value) -> Result<Vec<PickupRecord>> {
    let list: RecordList = decode(data, "parse collection snapshot")?;
    Ok(list.records)
}

fn decode_record_snapshot(data: Value) -> Result<Option<PickupRecord>> {
    let lookup: RecordLookup = decode(data, "parse record snapshot")?;
    Ok(lookup.record)
}

#[derive(Deserialize)]
struct RecordLookup {
    #[serde(default)]
    record: Option<PickupRecord>,
}

#[derive(Deserialize)]
struct RecordList {
    records: Vec<PickupRecord>,
}

#[derive(Deserialize)]
struct Removed {
    removed: bool,
}
