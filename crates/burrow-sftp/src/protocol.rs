//! SFTP Protocol Implementation
//!
//! This module implements the wire format of the SSH File Transfer Protocol,
//! version 3 (draft-ietf-secsh-filexfer-02), as used by OpenSSH and most
//! clients. Every packet is `uint32 length` followed by `byte type` and a
//! type-specific payload.
//!
//! The SFTP protocol runs over the SSH connection protocol (RFC 4254),
//! using the "sftp" subsystem.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// SFTP Protocol Version
pub const SFTP_VERSION: u32 = 3;

/// SFTP message types (draft-ietf-secsh-filexfer-02)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Initialize SFTP session
    Init = 1,
    /// Version response
    Version = 2,
    /// Open file
    Open = 3,
    /// Close file
    Close = 4,
    /// Read from file
    Read = 5,
    /// Write to file
    Write = 6,
    /// Get file attributes by path
    Lstat = 7,
    /// Get file attributes by handle
    Fstat = 8,
    /// Set file attributes by path
    Setstat = 9,
    /// Set file attributes by handle
    Fsetstat = 10,
    /// Open directory
    Opendir = 11,
    /// Read directory entries
    Readdir = 12,
    /// Remove file
    Remove = 13,
    /// Create directory
    Mkdir = 14,
    /// Remove directory
    Rmdir = 15,
    /// Get real path
    Realpath = 16,
    /// Get file attributes by path (follow symlinks)
    Stat = 17,
    /// Rename file or directory
    Rename = 18,
    /// Read symbolic link
    Readlink = 19,
    /// Create symbolic link
    Symlink = 20,
    /// Status response
    Status = 101,
    /// Handle response
    Handle = 102,
    /// Data response
    Data = 103,
    /// Name response (for directory listings)
    Name = 104,
    /// Attributes response
    Attrs = 105,
    /// Extended request
    Extended = 200,
    /// Extended reply
    ExtendedReply = 201,
}

impl TryFrom<u8> for MessageType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Init),
            2 => Ok(MessageType::Version),
            3 => Ok(MessageType::Open),
            4 => Ok(MessageType::Close),
            5 => Ok(MessageType::Read),
            6 => Ok(MessageType::Write),
            7 => Ok(MessageType::Lstat),
            8 => Ok(MessageType::Fstat),
            9 => Ok(MessageType::Setstat),
            10 => Ok(MessageType::Fsetstat),
            11 => Ok(MessageType::Opendir),
            12 => Ok(MessageType::Readdir),
            13 => Ok(MessageType::Remove),
            14 => Ok(MessageType::Mkdir),
            15 => Ok(MessageType::Rmdir),
            16 => Ok(MessageType::Realpath),
            17 => Ok(MessageType::Stat),
            18 => Ok(MessageType::Rename),
            19 => Ok(MessageType::Readlink),
            20 => Ok(MessageType::Symlink),
            101 => Ok(MessageType::Status),
            102 => Ok(MessageType::Handle),
            103 => Ok(MessageType::Data),
            104 => Ok(MessageType::Name),
            105 => Ok(MessageType::Attrs),
            200 => Ok(MessageType::Extended),
            201 => Ok(MessageType::ExtendedReply),
            _ => Err(crate::Error::Protocol(format!(
                "Unknown message type: {}",
                value
            ))),
        }
    }
}

/// SFTP Status codes (RFC draft-ietf-secsh-filexfer)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// End of file
    Eof = 1,
    /// No such file or directory
    NoSuchFile = 2,
    /// Permission denied
    PermissionDenied = 3,
    /// General failure
    Failure = 4,
    /// Bad message
    BadMessage = 5,
    /// No connection
    NoConnection = 6,
    /// Connection lost
    ConnectionLost = 7,
    /// Operation not supported
    OpUnsupported = 8,
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        code as u32
    }
}

/// File open flags (draft-ietf-secsh-filexfer-02)
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// SSH_FXF_READ
    pub const READ: u32 = 0x00000001;
    /// SSH_FXF_WRITE
    pub const WRITE: u32 = 0x00000002;
    /// SSH_FXF_APPEND
    pub const APPEND: u32 = 0x00000004;
    /// SSH_FXF_CREAT
    pub const CREAT: u32 = 0x00000008;
    /// SSH_FXF_TRUNC
    pub const TRUNC: u32 = 0x00000010;
    /// SSH_FXF_EXCL
    pub const EXCL: u32 = 0x00000020;

    /// Map the raw flags onto the `fopen`-style mode string clients expect
    ///
    /// Only the exact combinations below are recognized; anything else is
    /// not a mode this server knows how to open.
    pub fn as_mode_str(&self) -> Option<&'static str> {
        const R: u32 = OpenFlags::READ;
        const W: u32 = OpenFlags::WRITE;
        const A: u32 = OpenFlags::APPEND;
        const C: u32 = OpenFlags::CREAT;
        const T: u32 = OpenFlags::TRUNC;
        const X: u32 = OpenFlags::EXCL;

        let mode = match self.0 {
            f if f == R => "r",
            f if f == R | W => "r+",
            f if f == T | C | W => "w",
            f if f == T | C | W | X => "wx",
            f if f == T | C | R | W => "w+",
            f if f == T | C | R | W | X => "wx+",
            f if f == A | C | W => "a",
            f if f == A | C | W | X => "ax",
            f if f == A | C | R | W => "a+",
            f if f == A | C | R | W | X => "ax+",
            _ => return None,
        };
        Some(mode)
    }

    /// Resolve the open mode, `w` taking precedence over `a` over `r`
    pub fn mode(&self) -> Option<OpenMode> {
        let mode = self.as_mode_str()?;
        if mode.contains('w') {
            Some(OpenMode::Write)
        } else if mode.contains('a') {
            Some(OpenMode::Append)
        } else if mode.contains('r') {
            Some(OpenMode::Read)
        } else {
            None
        }
    }
}

/// How a file handle was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read stream
    Read,
    /// Truncating write stream
    Write,
    /// Write stream positioned at end of file
    Append,
}

/// File attributes (draft-ietf-secsh-filexfer-02)
///
/// `atime` and `mtime` are kept as epoch milliseconds; the v3 wire format
/// only carries whole seconds, so they are divided down on encode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// File size in bytes
    pub size: Option<u64>,
    /// Owner user id
    pub uid: Option<u32>,
    /// Owner group id
    pub gid: Option<u32>,
    /// Type and permission bits (`st_mode`)
    pub permissions: Option<u32>,
    /// Last access, epoch milliseconds
    pub atime: Option<u64>,
    /// Last modification, epoch milliseconds
    pub mtime: Option<u64>,
}

impl FileAttrs {
    const FLAG_SIZE: u32 = 0x00000001;
    const FLAG_UIDGID: u32 = 0x00000002;
    const FLAG_PERMISSIONS: u32 = 0x00000004;
    const FLAG_ACMODTIME: u32 = 0x00000008;

    /// Build attributes from filesystem metadata
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let (permissions, uid, gid) = {
            use std::os::unix::fs::MetadataExt;
            (metadata.mode(), metadata.uid(), metadata.gid())
        };

        #[cfg(not(unix))]
        let (permissions, uid, gid) = {
            let mode = if metadata.is_dir() { 0o040755 } else { 0o100644 };
            (mode, 0, 0)
        };

        FileAttrs {
            size: Some(metadata.len()),
            uid: Some(uid),
            gid: Some(gid),
            permissions: Some(permissions),
            atime: metadata.accessed().ok().map(epoch_millis),
            mtime: metadata.modified().ok().map(epoch_millis),
        }
    }

    /// Encode file attributes to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        let mut flags = 0u32;

        if self.size.is_some() {
            flags |= Self::FLAG_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= Self::FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= Self::FLAG_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= Self::FLAG_ACMODTIME;
        }

        buf.put_u32(flags);

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(millis_to_wire_secs(atime));
            buf.put_u32(millis_to_wire_secs(mtime));
        }

        buf
    }

    /// Decode file attributes from bytes
    pub fn decode(buf: &mut &[u8]) -> crate::Result<Self> {
        let flags = codec::get_u32(buf)?;
        let mut attrs = FileAttrs::default();

        if flags & Self::FLAG_SIZE != 0 {
            attrs.size = Some(codec::get_u64(buf)?);
        }

        if flags & Self::FLAG_UIDGID != 0 {
            attrs.uid = Some(codec::get_u32(buf)?);
            attrs.gid = Some(codec::get_u32(buf)?);
        }

        if flags & Self::FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::get_u32(buf)?);
        }

        if flags & Self::FLAG_ACMODTIME != 0 {
            attrs.atime = Some(u64::from(codec::get_u32(buf)?) * 1000);
            attrs.mtime = Some(u64::from(codec::get_u32(buf)?) * 1000);
        }

        Ok(attrs)
    }
}

fn epoch_millis(time: std::time::SystemTime) -> u64 {
    time.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn millis_to_wire_secs(millis: u64) -> u32 {
    u32::try_from(millis / 1000).unwrap_or(u32::MAX)
}

/// One entry of a NAME response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    /// Bare name (or the client-visible path for REALPATH)
    pub filename: String,
    /// `ls -l` style line
    pub longname: String,
    /// Attributes of the entry
    pub attrs: FileAttrs,
}

/// Helper functions for encoding/decoding SFTP protocol strings
pub mod codec {
    use bytes::{Buf, BufMut, BytesMut};

    /// Encode a string as SFTP string (length + data)
    pub fn put_string(buf: &mut BytesMut, s: &str) {
        buf.put_u32(s.len() as u32);
        buf.put_slice(s.as_bytes());
    }

    /// Decode an SFTP string
    pub fn get_string(buf: &mut &[u8]) -> crate::Result<String> {
        let bytes = get_bytes(buf)?;
        String::from_utf8(bytes)
            .map_err(|e| crate::Error::Protocol(format!("Invalid UTF-8 string: {}", e)))
    }

    /// Encode bytes as SFTP string (length + data)
    pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }

    /// Decode SFTP bytes
    pub fn get_bytes(buf: &mut &[u8]) -> crate::Result<Vec<u8>> {
        let len = get_u32(buf)? as usize;
        if buf.remaining() < len {
            return Err(crate::Error::Protocol("Insufficient data for bytes".into()));
        }

        let bytes = buf[..len].to_vec();
        buf.advance(len);

        Ok(bytes)
    }

    /// Decode a big-endian u32
    pub fn get_u32(buf: &mut &[u8]) -> crate::Result<u32> {
        if buf.remaining() < 4 {
            return Err(crate::Error::Protocol("Insufficient data for u32".into()));
        }
        Ok(buf.get_u32())
    }

    /// Decode a big-endian u64
    pub fn get_u64(buf: &mut &[u8]) -> crate::Result<u64> {
        if buf.remaining() < 8 {
            return Err(crate::Error::Protocol("Insufficient data for u64".into()));
        }
        Ok(buf.get_u64())
    }
}

/// A decoded client packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// SSH_FXP_INIT, answered by the session layer
    Init { version: u32 },
    /// Any request carrying a request id
    Request(Request),
}

/// A client request addressed to the operation handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// SSH_FXP_OPEN
    Open { id: u32, path: String, pflags: u32, attrs: FileAttrs },
    /// SSH_FXP_CLOSE
    Close { id: u32, handle: Vec<u8> },
    /// SSH_FXP_READ
    Read { id: u32, handle: Vec<u8>, offset: u64, len: u32 },
    /// SSH_FXP_WRITE
    Write { id: u32, handle: Vec<u8>, offset: u64, data: Vec<u8> },
    /// SSH_FXP_FSTAT
    Fstat { id: u32, handle: Vec<u8> },
    /// SSH_FXP_OPENDIR
    Opendir { id: u32, path: String },
    /// SSH_FXP_READDIR
    Readdir { id: u32, handle: Vec<u8> },
    /// SSH_FXP_REMOVE
    Remove { id: u32, path: String },
    /// SSH_FXP_RENAME
    Rename { id: u32, old_path: String, new_path: String },
    /// SSH_FXP_REALPATH
    Realpath { id: u32, path: String },
    /// SSH_FXP_READLINK
    Readlink { id: u32, path: String },
    /// SSH_FXP_LSTAT
    Lstat { id: u32, path: String },
    /// Recognized framing but no handler in this server (STAT, MKDIR, ...)
    Unsupported { id: u32, message_type: u8 },
}

impl Request {
    /// Request id the response must echo
    pub fn id(&self) -> u32 {
        match self {
            Request::Open { id, .. }
            | Request::Close { id, .. }
            | Request::Read { id, .. }
            | Request::Write { id, .. }
            | Request::Fstat { id, .. }
            | Request::Opendir { id, .. }
            | Request::Readdir { id, .. }
            | Request::Remove { id, .. }
            | Request::Rename { id, .. }
            | Request::Realpath { id, .. }
            | Request::Readlink { id, .. }
            | Request::Lstat { id, .. }
            | Request::Unsupported { id, .. } => *id,
        }
    }

    /// Short operation name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::Open { .. } => "OPEN",
            Request::Close { .. } => "CLOSE",
            Request::Read { .. } => "READ",
            Request::Write { .. } => "WRITE",
            Request::Fstat { .. } => "FSTAT",
            Request::Opendir { .. } => "OPENDIR",
            Request::Readdir { .. } => "READDIR",
            Request::Remove { .. } => "REMOVE",
            Request::Rename { .. } => "RENAME",
            Request::Realpath { .. } => "REALPATH",
            Request::Readlink { .. } => "READLINK",
            Request::Lstat { .. } => "LSTAT",
            Request::Unsupported { .. } => "UNSUPPORTED",
        }
    }
}

impl Packet {
    /// Decode one packet body (type byte onwards, length prefix removed)
    pub fn decode(payload: &[u8]) -> crate::Result<Packet> {
        let mut buf = payload;
        if buf.is_empty() {
            return Err(crate::Error::Protocol("Empty packet".into()));
        }
        let raw_type = buf.get_u8();

        let msg_type = match MessageType::try_from(raw_type) {
            Ok(t) => t,
            Err(_) => {
                let id = codec::get_u32(&mut buf)?;
                return Ok(Packet::Request(Request::Unsupported {
                    id,
                    message_type: raw_type,
                }));
            }
        };

        if msg_type == MessageType::Init {
            let version = codec::get_u32(&mut buf)?;
            return Ok(Packet::Init { version });
        }

        let id = codec::get_u32(&mut buf)?;
        let buf = &mut buf;

        let request = match msg_type {
            MessageType::Open => Request::Open {
                id,
                path: codec::get_string(buf)?,
                pflags: codec::get_u32(buf)?,
                attrs: FileAttrs::decode(buf)?,
            },
            MessageType::Close => Request::Close {
                id,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Read => Request::Read {
                id,
                handle: codec::get_bytes(buf)?,
                offset: codec::get_u64(buf)?,
                len: codec::get_u32(buf)?,
            },
            MessageType::Write => Request::Write {
                id,
                handle: codec::get_bytes(buf)?,
                offset: codec::get_u64(buf)?,
                data: codec::get_bytes(buf)?,
            },
            MessageType::Fstat => Request::Fstat {
                id,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Opendir => Request::Opendir {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Readdir => Request::Readdir {
                id,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Remove => Request::Remove {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Rename => Request::Rename {
                id,
                old_path: codec::get_string(buf)?,
                new_path: codec::get_string(buf)?,
            },
            MessageType::Realpath => Request::Realpath {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Readlink => Request::Readlink {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Lstat => Request::Lstat {
                id,
                path: codec::get_string(buf)?,
            },
            other => Request::Unsupported {
                id,
                message_type: other as u8,
            },
        };

        Ok(Packet::Request(request))
    }

    /// Best-effort request id of a packet that failed to decode
    pub fn peek_request_id(payload: &[u8]) -> Option<u32> {
        if payload.len() < 5 || payload[0] == MessageType::Init as u8 {
            return None;
        }
        Some(u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]))
    }
}

/// A server response, exactly one per request id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// SSH_FXP_STATUS
    Status { id: u32, code: StatusCode, message: String },
    /// SSH_FXP_HANDLE
    Handle { id: u32, handle: Vec<u8> },
    /// SSH_FXP_DATA
    Data { id: u32, data: Vec<u8> },
    /// SSH_FXP_NAME
    Name { id: u32, entries: Vec<NameEntry> },
    /// SSH_FXP_ATTRS
    Attrs { id: u32, attrs: FileAttrs },
}

impl Response {
    /// STATUS response with explicit code and message
    pub fn status(id: u32, code: StatusCode, message: impl Into<String>) -> Self {
        Response::Status {
            id,
            code,
            message: message.into(),
        }
    }

    /// STATUS(OK)
    pub fn ok(id: u32) -> Self {
        Response::status(id, StatusCode::Ok, "Success")
    }

    /// STATUS(EOF)
    pub fn eof(id: u32) -> Self {
        Response::status(id, StatusCode::Eof, "End of file")
    }

    /// STATUS response from an error, with sanitized message
    pub fn from_error(id: u32, error: &crate::Error) -> Self {
        Response::status(id, error.to_status_code(), error.sanitized_message())
    }

    /// Request id this response answers
    pub fn id(&self) -> u32 {
        match self {
            Response::Status { id, .. }
            | Response::Handle { id, .. }
            | Response::Data { id, .. }
            | Response::Name { id, .. }
            | Response::Attrs { id, .. } => *id,
        }
    }

    /// Status code, if this is a STATUS response
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Response::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Encode as a complete length-prefixed packet
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        match self {
            Response::Status { id, code, message } => {
                body.put_u8(MessageType::Status as u8);
                body.put_u32(*id);
                body.put_u32((*code).into());
                codec::put_string(&mut body, message);
                codec::put_string(&mut body, "en"); // language tag
            }
            Response::Handle { id, handle } => {
                body.put_u8(MessageType::Handle as u8);
                body.put_u32(*id);
                codec::put_bytes(&mut body, handle);
            }
            Response::Data { id, data } => {
                body.put_u8(MessageType::Data as u8);
                body.put_u32(*id);
                codec::put_bytes(&mut body, data);
            }
            Response::Name { id, entries } => {
                body.put_u8(MessageType::Name as u8);
                body.put_u32(*id);
                body.put_u32(entries.len() as u32);
                for entry in entries {
                    codec::put_string(&mut body, &entry.filename);
                    codec::put_string(&mut body, &entry.longname);
                    body.put(entry.attrs.encode());
                }
            }
            Response::Attrs { id, attrs } => {
                body.put_u8(MessageType::Attrs as u8);
                body.put_u32(*id);
                body.put(attrs.encode());
            }
        }
        frame(body)
    }
}

/// Encode the SSH_FXP_VERSION reply to INIT
pub fn encode_version() -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(MessageType::Version as u8);
    body.put_u32(SFTP_VERSION);
    frame(body)
}

fn frame(body: BytesMut) -> BytesMut {
    let mut packet = BytesMut::with_capacity(body.len() + 4);
    packet.put_u32(body.len() as u32);
    packet.put(body);
    packet
}

/// Reassembles SFTP packets from SSH channel data
///
/// SSH delivers channel data in arbitrary chunks: one chunk may hold half a
/// packet or several packets.
#[derive(Debug)]
pub struct PacketBuffer {
    buf: BytesMut,
    max_packet_size: usize,
}

impl PacketBuffer {
    /// Create a buffer rejecting packets longer than `max_packet_size`
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_packet_size,
        }
    }

    /// Append raw channel data
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete packet body, if one is buffered
    pub fn next_packet(&mut self) -> crate::Result<Option<Bytes>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len == 0 || len > self.max_packet_size {
            return Err(crate::Error::Protocol(format!(
                "Invalid packet length: {}",
                len
            )));
        }

        if self.buf.len() < 4 + len {
            return Ok(None);
        }

        self.buf.advance(4);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(packet: &BytesMut) -> &[u8] {
        &packet[4..]
    }

    #[test]
    fn test_open_mode_mapping() {
        use OpenFlags as F;

        assert_eq!(OpenFlags(F::READ).mode(), Some(OpenMode::Read));
        assert_eq!(OpenFlags(F::READ | F::WRITE).mode(), Some(OpenMode::Read));
        assert_eq!(
            OpenFlags(F::WRITE | F::CREAT | F::TRUNC).mode(),
            Some(OpenMode::Write)
        );
        assert_eq!(
            OpenFlags(F::READ | F::WRITE | F::CREAT | F::TRUNC).mode(),
            Some(OpenMode::Write)
        );
        assert_eq!(
            OpenFlags(F::WRITE | F::CREAT | F::APPEND).mode(),
            Some(OpenMode::Append)
        );
        assert_eq!(
            OpenFlags(F::WRITE | F::CREAT | F::APPEND | F::EXCL).mode(),
            Some(OpenMode::Append)
        );
    }

    #[test]
    fn test_unknown_open_flags() {
        use OpenFlags as F;

        assert_eq!(OpenFlags(0).mode(), None);
        assert_eq!(OpenFlags(F::WRITE).mode(), None);
        assert_eq!(OpenFlags(F::CREAT | F::TRUNC).mode(), None);
        assert_eq!(OpenFlags(F::READ | F::EXCL).mode(), None);
    }

    #[test]
    fn test_attrs_times_are_millis_internally() {
        let attrs = FileAttrs {
            atime: Some(1_700_000_000_123),
            mtime: Some(1_700_000_005_999),
            ..Default::default()
        };

        let encoded = attrs.encode();
        let mut buf = &encoded[..];
        let decoded = FileAttrs::decode(&mut buf).unwrap();

        // Sub-second precision does not survive the v3 wire format
        assert_eq!(decoded.atime, Some(1_700_000_000_000));
        assert_eq!(decoded.mtime, Some(1_700_000_005_000));
    }

    #[test]
    fn test_decode_open_request() {
        let mut body = BytesMut::new();
        body.put_u8(MessageType::Open as u8);
        body.put_u32(7);
        codec::put_string(&mut body, "/a.txt");
        body.put_u32(OpenFlags::READ);
        body.put_u32(0); // empty attrs

        let packet = Packet::decode(&body).unwrap();
        assert_eq!(
            packet,
            Packet::Request(Request::Open {
                id: 7,
                path: "/a.txt".into(),
                pflags: OpenFlags::READ,
                attrs: FileAttrs::default(),
            })
        );
    }

    #[test]
    fn test_decode_unknown_type_keeps_id() {
        let mut body = BytesMut::new();
        body.put_u8(42);
        body.put_u32(99);

        let packet = Packet::decode(&body).unwrap();
        assert_eq!(
            packet,
            Packet::Request(Request::Unsupported {
                id: 99,
                message_type: 42
            })
        );
    }

    #[test]
    fn test_decode_truncated_request() {
        let mut body = BytesMut::new();
        body.put_u8(MessageType::Read as u8);
        body.put_u32(3);
        codec::put_bytes(&mut body, b"handle");
        body.put_u32(0); // offset cut short

        assert!(Packet::decode(&body).is_err());
        assert_eq!(Packet::peek_request_id(&body), Some(3));
    }

    #[test]
    fn test_status_encoding() {
        let packet = Response::eof(5).encode();
        let mut body = body_of(&packet);

        let len = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
        assert_eq!(len as usize, body.len());
        assert_eq!(body.get_u8(), MessageType::Status as u8);
        assert_eq!(body.get_u32(), 5);
        assert_eq!(body.get_u32(), StatusCode::Eof as u32);
        assert_eq!(codec::get_string(&mut body).unwrap(), "End of file");
        assert_eq!(codec::get_string(&mut body).unwrap(), "en");
        assert!(body.is_empty());
    }

    #[test]
    fn test_name_encoding() {
        let response = Response::Name {
            id: 11,
            entries: vec![NameEntry {
                filename: "a.txt".into(),
                longname: "-rwxrwxrwx  1 user group    11 Sep 27 12:00 a.txt".into(),
                attrs: FileAttrs {
                    size: Some(2),
                    ..Default::default()
                },
            }],
        };

        let packet = response.encode();
        let mut body = body_of(&packet);
        assert_eq!(body.get_u8(), MessageType::Name as u8);
        assert_eq!(body.get_u32(), 11);
        assert_eq!(body.get_u32(), 1);
        assert_eq!(codec::get_string(&mut body).unwrap(), "a.txt");
        assert!(codec::get_string(&mut body).unwrap().ends_with(" a.txt"));
        let attrs = FileAttrs::decode(&mut body).unwrap();
        assert_eq!(attrs.size, Some(2));
    }

    #[test]
    fn test_packet_buffer_reassembles_split_packets() {
        let first = Response::ok(1).encode();
        let second = Response::eof(2).encode();
        let mut stream = BytesMut::new();
        stream.put(first.clone());
        stream.put(second.clone());

        let mut packets = PacketBuffer::new(1024);
        packets.extend(&stream[..3]);
        assert!(packets.next_packet().unwrap().is_none());

        packets.extend(&stream[3..first.len() + 2]);
        let p1 = packets.next_packet().unwrap().unwrap();
        assert_eq!(&p1[..], &first[4..]);
        assert!(packets.next_packet().unwrap().is_none());

        packets.extend(&stream[first.len() + 2..]);
        let p2 = packets.next_packet().unwrap().unwrap();
        assert_eq!(&p2[..], &second[4..]);
        assert!(packets.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_packet_buffer_rejects_oversize() {
        let mut packets = PacketBuffer::new(16);
        packets.extend(&1024u32.to_be_bytes());
        assert!(packets.next_packet().is_err());

        let mut packets = PacketBuffer::new(16);
        packets.extend(&0u32.to_be_bytes());
        assert!(packets.next_packet().is_err());
    }
}
