//! Request dispatch
//!
//! A dispatcher is built when an SFTP session starts and routes every decoded
//! request to its handler. Requests without a handler (READLINK, LSTAT and
//! anything this server does not implement) are logged and produce no
//! response of their own; the session layer answers them with
//! `SSH_FX_OP_UNSUPPORTED` so the client never waits forever.

use crate::handlers::FileOps;
use crate::handles::HandleTable;
use crate::protocol::{Request, Response};
use crate::sandbox::PathSandbox;
use tracing::debug;

/// Routes requests of one SFTP session to the operation handlers
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ops: FileOps,
}

impl Dispatcher {
    /// Bind the handlers of a new session
    pub fn new(sandbox: PathSandbox, handles: HandleTable) -> Self {
        Self {
            ops: FileOps::new(sandbox, handles),
        }
    }

    /// Handle table owned by this session
    pub fn handles(&self) -> &HandleTable {
        self.ops.handles()
    }

    /// Run the handler bound to `request`
    ///
    /// Returns `None` when no handler is bound to the request type.
    pub async fn dispatch(&self, request: Request) -> Option<Response> {
        let name = request.name();
        debug!(request_id = request.id(), "Dispatching {}", name);

        let response = match request {
            Request::Open { id, path, pflags, .. } => self.ops.open(id, &path, pflags).await,
            Request::Close { id, handle } => self.ops.close(id, &handle).await,
            // Reads follow the stream position; the client offset is not used
            Request::Read { id, handle, len, .. } => self.ops.read(id, &handle, len).await,
            Request::Write {
                id,
                handle,
                offset,
                data,
            } => self.ops.write(id, &handle, offset, &data).await,
            Request::Fstat { id, handle } => self.ops.fstat(id, &handle).await,
            Request::Opendir { id, path } => self.ops.opendir(id, &path).await,
            Request::Readdir { id, handle } => self.ops.readdir(id, &handle).await,
            Request::Remove { id, path } => self.ops.remove(id, &path).await,
            Request::Rename {
                id,
                old_path,
                new_path,
            } => self.ops.rename(id, &old_path, &new_path).await,
            Request::Realpath { id, path } => self.ops.realpath(id, &path).await,
            Request::Readlink { .. } | Request::Lstat { .. } => {
                no_handler(name);
                return None;
            }
            Request::Unsupported { message_type, .. } => {
                no_handler(&format!("{} (type {})", name, message_type));
                return None;
            }
        };

        Some(response)
    }

    /// Release every handle still open in this session
    pub async fn shutdown(&self) -> usize {
        let released = self.handles().close_all().await;
        if released > 0 {
            debug!("Released {} handles left open at session end", released);
        }
        released
    }
}

/// Log an event that has no handler bound
pub fn no_handler(event: &str) {
    debug!(
        "The {} event does not have an explicitly defined handler at this time, but was just called",
        event
    );
}
