//! Response sinks: where parsed response fields and body bytes end up.
//!
//! A [`ResponseSink`] is shared between the transfer worker (writer) and the
//! caller (reader polling progress). All fields live behind a single mutex,
//! which is the only synchronization point between the two sides; every
//! accessor and mutator takes that lock, so a reader always sees a consistent
//! snapshot.
//!
//! The body storage is chosen by tag ([`SinkKind`]): in memory, or streamed to
//! a file on every [`flush`](ResponseSink::flush).
//!
//! # Example
//!
//! ```
//! use anetd_core::ResponseSink;
//!
//! let sink = ResponseSink::in_memory("http://example.com/");
//! sink.set_status(200);
//! sink.append_body(b"hello");
//! assert_eq!(sink.progress(), 5);
//! assert_eq!(sink.body(), b"hello");
//! ```

mod file;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::trace;

use crate::transfer::TransferError;

pub use file::DEFAULT_FILE_NAME;
use file::FileBody;

/// Which body storage a sink uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Body accumulated in memory.
    InMemory,
    /// Body streamed to a file.
    FileBacked,
}

/// Body storage variants.
#[derive(Debug)]
enum SinkBody {
    Memory(Vec<u8>),
    File(FileBody),
}

impl SinkBody {
    fn kind(&self) -> SinkKind {
        match self {
            Self::Memory(_) => SinkKind::InMemory,
            Self::File(_) => SinkKind::FileBacked,
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        match self {
            Self::Memory(body) => body.extend_from_slice(bytes),
            Self::File(body) => body.extend(bytes),
        }
    }

    fn push(&mut self, byte: u8) {
        match self {
            Self::Memory(body) => body.push(byte),
            Self::File(body) => body.push(byte),
        }
    }

    fn buffered(&self) -> &[u8] {
        match self {
            Self::Memory(body) => body,
            Self::File(body) => body.pending(),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Memory(body) => body.clear(),
            Self::File(body) => body.reset(),
        }
    }
}

#[derive(Debug)]
struct SinkState {
    url: String,
    version: String,
    status: u16,
    description: String,
    headers: HashMap<String, String>,
    body_size: Option<u64>,
    progress: u64,
    body: SinkBody,
    completed: bool,
}

impl SinkState {
    fn new(url: String, body: SinkBody) -> Self {
        Self {
            url,
            version: String::new(),
            status: 0,
            description: String::new(),
            headers: HashMap::new(),
            body_size: None,
            progress: 0,
            body,
            completed: false,
        }
    }
}

/// Thread-safe receiver of a parsed response.
///
/// Cloning is cheap and yields another handle to the same sink.
#[derive(Clone)]
pub struct ResponseSink {
    inner: Arc<Mutex<SinkState>>,
}

/// Point-in-time copy of a sink's response fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSnapshot {
    /// Current (possibly redirected) target URL.
    pub url: String,
    /// Protocol version from the status line.
    pub version: String,
    /// Numeric status code, 0 until a status line was parsed.
    pub status: u16,
    /// Reason phrase.
    pub description: String,
    /// Response headers, sorted by name.
    pub headers: BTreeMap<String, String>,
    /// Body bytes received so far.
    pub progress: u64,
    /// Declared (or, after close, final) body size.
    pub body_size: Option<u64>,
    /// Storage variant.
    pub kind: SinkKind,
    /// File being written, for file-backed sinks.
    pub file_path: Option<PathBuf>,
    /// Whether the transfer reached a terminal state.
    pub completed: bool,
}

impl ResponseSink {
    /// Creates a sink that keeps the body in memory.
    #[must_use]
    pub fn in_memory(url: impl Into<String>) -> Self {
        Self::with_body(url.into(), SinkBody::Memory(Vec::new()))
    }

    /// Creates a sink that streams the body into a file under `dir`.
    ///
    /// The file name comes from the last path segment of the final URL.
    #[must_use]
    pub fn to_file(url: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        let url = url.into();
        let body = FileBody::new(dir.as_ref(), &url);
        Self::with_body(url, SinkBody::File(body))
    }

    fn with_body(url: String, body: SinkBody) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkState::new(url, body))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears the response fields between connection attempts.
    ///
    /// Status, description, version, headers, body, body size and progress
    /// are cleared; the target URL is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.version.clear();
        state.status = 0;
        state.description.clear();
        state.headers.clear();
        state.body_size = None;
        state.progress = 0;
        state.body.reset();
        state.completed = false;
    }

    /// Forgets the target URL.
    pub fn clear_url(&self) {
        self.set_url(String::new());
    }

    #[must_use]
    pub fn kind(&self) -> SinkKind {
        self.lock().body.kind()
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    /// Retargets the sink; file-backed sinks also derive a new file name.
    pub fn set_url(&self, url: impl Into<String>) {
        let url = url.into();
        let mut state = self.lock();
        if let SinkBody::File(body) = &mut state.body {
            body.retarget(&url);
        }
        trace!(url = %url, "sink retargeted");
        state.url = url;
    }

    #[must_use]
    pub fn version(&self) -> String {
        self.lock().version.clone()
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.lock().version = version.into();
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.lock().status
    }

    pub fn set_status(&self, status: u16) {
        self.lock().status = status;
    }

    #[must_use]
    pub fn description(&self) -> String {
        self.lock().description.clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.lock().description = description.into();
    }

    /// Records a response header. The first value for a name wins.
    pub fn add_header(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock()
            .headers
            .entry(key.into())
            .or_insert_with(|| value.into());
    }

    #[must_use]
    pub fn headers(&self) -> HashMap<String, String> {
        self.lock().headers.clone()
    }

    /// Looks up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock()
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    /// Declared body size; `None` while unknown.
    #[must_use]
    pub fn body_size(&self) -> Option<u64> {
        self.lock().body_size
    }

    pub fn set_body_size(&self, size: u64) {
        self.lock().body_size = Some(size);
    }

    /// Body bytes appended so far.
    #[must_use]
    pub fn progress(&self) -> u64 {
        self.lock().progress
    }

    pub fn append_body(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.body.extend(bytes);
        state.progress += bytes.len() as u64;
    }

    pub fn append_byte(&self, byte: u8) {
        let mut state = self.lock();
        state.body.push(byte);
        state.progress += 1;
    }

    /// Buffered body bytes.
    ///
    /// For file-backed sinks this is only the tail not yet flushed to disk.
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        self.lock().body.buffered().to_vec()
    }

    /// File the body is written to, once a file-backed sink has opened it.
    #[must_use]
    pub fn file_path(&self) -> Option<PathBuf> {
        match &self.lock().body {
            SinkBody::Memory(_) => None,
            SinkBody::File(body) => body.path().map(Path::to_path_buf),
        }
    }

    /// Name the file-backed sink will write to, before uniqueness suffixes.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        match &self.lock().body {
            SinkBody::Memory(_) => None,
            SinkBody::File(body) => Some(body.file_name().to_string()),
        }
    }

    /// Hands buffered body bytes to the backing store.
    ///
    /// A no-op for in-memory sinks.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::SinkIo`] if the file cannot be created or
    /// written.
    pub fn flush(&self) -> Result<(), TransferError> {
        let mut state = self.lock();
        match &mut state.body {
            SinkBody::Memory(_) => Ok(()),
            SinkBody::File(body) => body
                .flush()
                .map_err(|(path, source)| TransferError::sink_io(path, source)),
        }
    }

    /// Marks the transfer terminal. Only the first call has an effect.
    ///
    /// File-backed sinks flush remaining bytes and close the file.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::SinkIo`] if the final flush fails; the file
    /// is closed regardless.
    pub fn completed(&self) -> Result<(), TransferError> {
        let mut state = self.lock();
        if state.completed {
            return Ok(());
        }
        state.completed = true;
        match &mut state.body {
            SinkBody::Memory(_) => Ok(()),
            SinkBody::File(body) => {
                let flushed = body.flush();
                body.close();
                flushed.map_err(|(path, source)| TransferError::sink_io(path, source))
            }
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    /// Copies every response field under one lock acquisition.
    #[must_use]
    pub fn snapshot(&self) -> ResponseSnapshot {
        let state = self.lock();
        ResponseSnapshot {
            url: state.url.clone(),
            version: state.version.clone(),
            status: state.status,
            description: state.description.clone(),
            headers: state
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            progress: state.progress,
            body_size: state.body_size,
            kind: state.body.kind(),
            file_path: match &state.body {
                SinkBody::Memory(_) => None,
                SinkBody::File(body) => body.path().map(Path::to_path_buf),
            },
            completed: state.completed,
        }
    }
}

impl fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ResponseSink")
            .field("url", &state.url)
            .field("status", &state.status)
            .field("progress", &state.progress)
            .field("body_size", &state.body_size)
            .field("kind", &state.body.kind())
            .finish_non_exhaustive()
    }
}
