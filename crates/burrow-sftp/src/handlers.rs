//! SFTP operation handlers
//!
//! NIST 800-53: SI-11 (Error Handling), AC-3 (Access Enforcement)
//! STIG: V-222566, V-222596
//! Implementation: One handler per supported request. Every client path
//! passes through the sandbox before any filesystem call, and every handler
//! turns its own failures into a STATUS response so one bad request never
//! takes the session down.

use crate::handles::{Handle, HandleEntry, HandleKind, HandleState, HandleTable, SharedEntry};
use crate::protocol::{FileAttrs, NameEntry, OpenFlags, OpenMode, Response};
use crate::sandbox::{PathSandbox, SandboxedPath};
use crate::{Error, Result};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Largest DATA payload returned by a single READ
pub const MAX_READ_LEN: u32 = 256 * 1024;

/// Filesystem operations behind the SFTP requests of one session
#[derive(Debug, Clone)]
pub struct FileOps {
    sandbox: PathSandbox,
    handles: HandleTable,
}

impl FileOps {
    /// Bind the handlers to a sandbox and a session's handle table
    pub fn new(sandbox: PathSandbox, handles: HandleTable) -> Self {
        Self { sandbox, handles }
    }

    /// Handle table of this session
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// OPEN: open a file for read, write (truncate) or append
    pub async fn open(&self, id: u32, client_path: &str, pflags: u32) -> Response {
        let result = self
            .try_open(client_path, pflags)
            .await
            .map(|handle| Response::Handle {
                id,
                handle: handle.to_vec(),
            });
        reply(id, "OPEN", result)
    }

    async fn try_open(&self, client_path: &str, pflags: u32) -> Result<Handle> {
        let path = self.sandbox.resolve(client_path);
        let flags = OpenFlags(pflags);

        debug!("Opening {} with flags {:?}", path.virtual_path(), flags.as_mode_str());

        let mode = flags.mode().ok_or_else(|| {
            Error::Unsupported("Only read, write, and append mode are supported.".into())
        })?;

        let file = match mode {
            OpenMode::Read => {
                let metadata = match fs::metadata(path.real()).await {
                    Ok(metadata) => metadata,
                    Err(e) => return Err(not_found_or_io(e, "File does not exist", &path)),
                };
                if metadata.is_dir() {
                    return Err(Error::wrong_kind(format!(
                        "Cannot open directory {} as a file",
                        path.virtual_path()
                    )));
                }
                fs::OpenOptions::new().read(true).open(path.real()).await
            }
            OpenMode::Write => {
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path.real())
                    .await
            }
            OpenMode::Append => {
                fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path.real())
                    .await
            }
        }
        .map_err(|e| not_found_or_io(e, "File does not exist", &path))?;

        let handle = self
            .handles
            .create(HandleEntry::file(path.real().to_path_buf(), client_path, file, mode))
            .await?;

        info!(handle = %handle, mode = ?mode, "Opened file {}", path.virtual_path());
        Ok(handle)
    }

    /// WRITE: write data to a file opened for write or append
    ///
    /// Write-mode handles honor the offset, so out-of-order and sparse
    /// writes land where the client asked. Append-mode handles always
    /// write at the end of the file.
    pub async fn write(&self, id: u32, raw_handle: &[u8], offset: u64, data: &[u8]) -> Response {
        let result = self
            .try_write(raw_handle, offset, data)
            .await
            .map(|()| Response::ok(id));
        reply(id, "WRITE", result)
    }

    async fn try_write(&self, raw_handle: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        let entry = self
            .lookup(raw_handle, "File must first be opened before writing.")
            .await?;
        let mut entry = entry.lock().await;

        debug!("Write {} bytes at offset {} to {}", data.len(), offset, entry.client_path());

        match &mut entry.state {
            HandleState::File {
                file,
                mode: OpenMode::Write,
            } => {
                file.seek(SeekFrom::Start(offset)).await?;
                file.write_all(data).await?;
                file.flush().await?;
            }
            HandleState::File {
                file,
                mode: OpenMode::Append,
            } => {
                file.write_all(data).await?;
                file.flush().await?;
            }
            HandleState::File {
                mode: OpenMode::Read,
                ..
            } => return Err(Error::wrong_kind("File was not opened for writing.")),
            HandleState::Directory(_) => {
                return Err(Error::wrong_kind("Cannot write to directory, try a file."));
            }
        }

        Ok(())
    }

    /// CLOSE: release a handle
    ///
    /// Unknown handles are treated as already closed, so duplicate or racing
    /// CLOSE requests all succeed. A failed flush is logged; the handle is
    /// gone either way and the answer is still OK.
    pub async fn close(&self, id: u32, raw_handle: &[u8]) -> Response {
        let entry = match Handle::from_bytes(raw_handle) {
            Some(handle) => self.handles.destroy(&handle).await,
            None => None,
        };

        let Some(entry) = entry else {
            warn!("Cannot find handle, but saying we 'closed' it, since it's not open");
            return Response::ok(id);
        };

        let mut entry = entry.lock().await;
        match entry.release().await {
            Ok(()) => info!("Closed {}", entry.client_path()),
            Err(e) => error!("Failed to flush {} on close: {}", entry.client_path(), e),
        }
        Response::ok(id)
    }

    /// READ: pull up to `len` bytes from a read stream
    ///
    /// The stream position advances with every READ; the offset sent by the
    /// client is not used. An exhausted stream answers EOF, never empty data,
    /// and a zero length still reads one byte.
    pub async fn read(&self, id: u32, raw_handle: &[u8], len: u32) -> Response {
        let result = self.try_read(raw_handle, len).await.map(|data| match data {
            Some(data) => Response::Data { id, data },
            None => Response::eof(id),
        });
        reply(id, "READ", result)
    }

    async fn try_read(&self, raw_handle: &[u8], len: u32) -> Result<Option<Vec<u8>>> {
        let entry = self.lookup(raw_handle, "No file open.").await?;
        let mut entry = entry.lock().await;

        let file = match &mut entry.state {
            HandleState::File {
                file,
                mode: OpenMode::Read,
            } => file,
            HandleState::File { .. } => {
                return Err(Error::wrong_kind("File was not opened for reading."));
            }
            HandleState::Directory(_) => {
                return Err(Error::wrong_kind("Cannot read from directory handle."));
            }
        };

        let mut buffer = vec![0u8; len.clamp(1, MAX_READ_LEN) as usize];
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            return Ok(None);
        }

        buffer.truncate(n);
        Ok(Some(buffer))
    }

    /// FSTAT: attributes of the file behind a handle
    pub async fn fstat(&self, id: u32, raw_handle: &[u8]) -> Response {
        let result = self
            .try_fstat(raw_handle)
            .await
            .map(|attrs| Response::Attrs { id, attrs });
        reply(id, "FSTAT", result)
    }

    async fn try_fstat(&self, raw_handle: &[u8]) -> Result<FileAttrs> {
        let entry = self.lookup(raw_handle, "File not opened to stat.").await?;
        let real_path = {
            let entry = entry.lock().await;
            if entry.kind() != HandleKind::File {
                return Err(Error::wrong_kind("Cannot fstat a directory handle."));
            }
            entry.real_path().to_path_buf()
        };

        // Stat a fresh read-only descriptor rather than the client's stream
        let file = fs::File::open(&real_path).await?;
        let metadata = file.metadata().await?;
        Ok(FileAttrs::from_metadata(&metadata))
    }

    /// OPENDIR: open a directory for enumeration
    pub async fn opendir(&self, id: u32, client_path: &str) -> Response {
        let result = self
            .try_opendir(client_path)
            .await
            .map(|handle| Response::Handle {
                id,
                handle: handle.to_vec(),
            });
        reply(id, "OPENDIR", result)
    }

    async fn try_opendir(&self, client_path: &str) -> Result<Handle> {
        let path = self.sandbox.resolve(client_path);

        let metadata = fs::metadata(path.real())
            .await
            .map_err(|e| not_found_or_io(e, "Dir does not exist", &path))?;
        if !metadata.is_dir() {
            return Err(Error::wrong_kind(format!(
                "Not a directory {}",
                path.virtual_path()
            )));
        }

        let handle = self
            .handles
            .create(HandleEntry::directory(path.real().to_path_buf(), client_path))
            .await?;

        info!(handle = %handle, "Opened directory {}", path.virtual_path());
        Ok(handle)
    }

    /// READDIR: next batch of not-yet-returned entries, EOF once exhausted
    pub async fn readdir(&self, id: u32, raw_handle: &[u8]) -> Response {
        let result = self.try_readdir(raw_handle).await.map(|entries| {
            if entries.is_empty() {
                debug!("No more directory entries");
                Response::eof(id)
            } else {
                debug!("Found {} entries to return to client", entries.len());
                Response::Name { id, entries }
            }
        });
        reply(id, "READDIR", result)
    }

    async fn try_readdir(&self, raw_handle: &[u8]) -> Result<Vec<NameEntry>> {
        let entry = self.lookup(raw_handle, "Directory not opened.").await?;
        let mut entry = entry.lock().await;
        let dir = entry.real_path().to_path_buf();

        match &mut entry.state {
            HandleState::Directory(cursor) => Ok(cursor.next_batch(&dir).await?),
            HandleState::File { .. } => {
                Err(Error::wrong_kind("Cannot readdir from a file handle."))
            }
        }
    }

    /// RENAME: move a file or directory inside the sandbox
    pub async fn rename(&self, id: u32, old_path: &str, new_path: &str) -> Response {
        let result = self
            .try_rename(old_path, new_path)
            .await
            .map(|()| Response::ok(id));
        reply(id, "RENAME", result)
    }

    async fn try_rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old = self.sandbox.resolve(old_path);
        let new = self.sandbox.resolve(new_path);

        debug!("Renaming {} -> {}", old.virtual_path(), new.virtual_path());

        if !exists(old.real()).await {
            return Err(Error::NotFound(format!(
                "Path does not exist {}",
                old.virtual_path()
            )));
        }
        if old.is_root() || new.is_root() {
            return Err(Error::Other("Cannot rename the root directory".into()));
        }

        // Only a missing source is NO_SUCH_FILE; a bad destination is a plain failure
        fs::rename(old.real(), new.real()).await?;

        info!("Renamed {} -> {}", old.virtual_path(), new.virtual_path());
        Ok(())
    }

    /// REMOVE: unlink a file
    pub async fn remove(&self, id: u32, client_path: &str) -> Response {
        let result = self.try_remove(client_path).await.map(|()| Response::ok(id));
        reply(id, "REMOVE", result)
    }

    async fn try_remove(&self, client_path: &str) -> Result<()> {
        let path = self.sandbox.resolve(client_path);

        if !exists(path.real()).await {
            return Err(Error::NotFound(format!(
                "Path does not exist {}",
                path.virtual_path()
            )));
        }
        if path.is_root() {
            return Err(Error::Other("Cannot remove the root directory".into()));
        }

        fs::remove_file(path.real())
            .await
            .map_err(|e| not_found_or_io(e, "Path does not exist", &path))?;

        info!("Removed {}", path.virtual_path());
        Ok(())
    }

    /// REALPATH: canonical client-visible form of a path plus its attributes
    pub async fn realpath(&self, id: u32, client_path: &str) -> Response {
        let result = self
            .try_realpath(client_path)
            .await
            .map(|entry| Response::Name {
                id,
                entries: vec![entry],
            });
        reply(id, "REALPATH", result)
    }

    async fn try_realpath(&self, client_path: &str) -> Result<NameEntry> {
        let path = self.sandbox.resolve(client_path);

        let metadata = match fs::metadata(path.real()).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Other("Not a valid path on this server.".into()));
            }
            Err(e) => return Err(e.into()),
        };

        debug!("Realpath {} -> {}", client_path, path.virtual_path());

        Ok(NameEntry {
            filename: path.virtual_path().to_string(),
            longname: path.virtual_path().to_string(),
            attrs: FileAttrs::from_metadata(&metadata),
        })
    }

    async fn lookup(&self, raw_handle: &[u8], missing: &str) -> Result<SharedEntry> {
        self.handles
            .lookup(raw_handle)
            .await
            .ok_or_else(|| Error::invalid_handle(missing))
    }
}

/// Turn a handler result into the single response for `id`
fn reply(id: u32, op: &str, result: Result<Response>) -> Response {
    match result {
        Ok(response) => response,
        Err(e) => {
            if e.is_client_error() {
                warn!(request_id = id, op, "{}", e);
            } else {
                error!(request_id = id, op, "{}", e);
            }
            Response::from_error(id, &e)
        }
    }
}

/// Map an I/O error, reporting NotFound against the client-visible path
fn not_found_or_io(e: std::io::Error, what: &str, path: &SandboxedPath) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("{} {}", what, path.virtual_path()))
    } else {
        Error::Io(e)
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}
