//! Handle table
//!
//! Maps the opaque tokens handed out by OPEN/OPENDIR to the open file or
//! directory state behind them. One table exists per SFTP session; handles
//! never outlive it.

use crate::listing::DirCursor;
use crate::protocol::OpenMode;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default cap on simultaneously open handles per session
pub const DEFAULT_MAX_HANDLES: usize = 1024;

/// Opaque, unguessable handle token (random 128-bit UUIDv4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(Uuid);

impl Handle {
    fn generate() -> Self {
        Handle(Uuid::new_v4())
    }

    /// Parse a handle presented by the client
    ///
    /// Anything that is not exactly 16 bytes can never name a live handle.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Handle)
    }

    /// Wire form of the handle
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Kind of resource behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Opened by OPEN
    File,
    /// Opened by OPENDIR
    Directory,
}

/// Open resource owned by a handle
#[derive(Debug)]
pub enum HandleState {
    /// Open file stream and the mode it was opened with
    File { file: File, mode: OpenMode },
    /// Directory enumeration cursor
    Directory(DirCursor),
}

/// One entry of the handle table
#[derive(Debug)]
pub struct HandleEntry {
    real_path: PathBuf,
    client_path: String,
    /// Open resource, locked per request
    pub state: HandleState,
}

impl HandleEntry {
    /// Entry for an open file
    pub fn file(
        real_path: PathBuf,
        client_path: impl Into<String>,
        file: File,
        mode: OpenMode,
    ) -> Self {
        Self {
            real_path,
            client_path: client_path.into(),
            state: HandleState::File { file, mode },
        }
    }

    /// Entry for an open directory with an empty enumeration cursor
    pub fn directory(real_path: PathBuf, client_path: impl Into<String>) -> Self {
        Self {
            real_path,
            client_path: client_path.into(),
            state: HandleState::Directory(DirCursor::default()),
        }
    }

    /// File or directory handle
    pub fn kind(&self) -> HandleKind {
        match self.state {
            HandleState::File { .. } => HandleKind::File,
            HandleState::Directory(_) => HandleKind::Directory,
        }
    }

    /// Sandboxed path on the real filesystem
    pub fn real_path(&self) -> &Path {
        &self.real_path
    }

    /// Client-visible path, for diagnostics
    pub fn client_path(&self) -> &str {
        &self.client_path
    }

    /// Release the underlying OS resource
    ///
    /// Write streams are flushed so every acknowledged WRITE reaches the
    /// file; read streams and directory cursors have nothing pending.
    pub async fn release(&mut self) -> std::io::Result<()> {
        match &mut self.state {
            HandleState::File { file, mode } if *mode != OpenMode::Read => {
                file.flush().await?;
                file.sync_data().await
            }
            _ => Ok(()),
        }
    }
}

/// Shared reference to a live entry
///
/// Operations hold their own reference, so an entry destroyed by CLOSE or
/// teardown while a request is in flight is simply released when that
/// request finishes.
pub type SharedEntry = Arc<Mutex<HandleEntry>>;

/// Per-session handle table
#[derive(Debug, Clone)]
pub struct HandleTable {
    entries: Arc<Mutex<HashMap<Handle, SharedEntry>>>,
    max_handles: usize,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HANDLES)
    }
}

impl HandleTable {
    /// Create an empty table holding at most `max_handles` entries
    pub fn new(max_handles: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            max_handles,
        }
    }

    /// Store an entry under a fresh token
    pub async fn create(&self, entry: HandleEntry) -> Result<Handle> {
        let mut entries = self.entries.lock().await;

        // NIST 800-53: SC-5 - bound per-session resource use
        if entries.len() >= self.max_handles {
            warn!(
                "Maximum open handles reached ({}), refusing {}",
                self.max_handles,
                entry.client_path()
            );
            return Err(Error::Other("Too many open handles".into()));
        }

        let mut handle = Handle::generate();
        while entries.contains_key(&handle) {
            handle = Handle::generate();
        }

        debug!(
            handle = %handle,
            path = entry.client_path(),
            kind = ?entry.kind(),
            "Handle created"
        );
        entries.insert(handle, Arc::new(Mutex::new(entry)));
        Ok(handle)
    }

    /// Look up a live entry
    pub async fn get(&self, handle: &Handle) -> Option<SharedEntry> {
        self.entries.lock().await.get(handle).cloned()
    }

    /// Look up a live entry by the raw bytes a client presented
    pub async fn lookup(&self, raw: &[u8]) -> Option<SharedEntry> {
        let handle = Handle::from_bytes(raw)?;
        self.get(&handle).await
    }

    /// Remove an entry; the caller releases the stream
    pub async fn destroy(&self, handle: &Handle) -> Option<SharedEntry> {
        self.entries.lock().await.remove(handle)
    }

    /// Number of live handles
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// `true` when no handle is open
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Release every remaining handle (session teardown)
    ///
    /// Returns how many handles were still open.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(Handle, SharedEntry)> = self.entries.lock().await.drain().collect();
        let count = drained.len();

        for (handle, entry) in drained {
            let mut entry = entry.lock().await;
            if let Err(e) = entry.release().await {
                warn!(
                    handle = %handle,
                    path = entry.client_path(),
                    "Failed to release handle: {}",
                    e
                );
            }
        }

        count
    }
}
