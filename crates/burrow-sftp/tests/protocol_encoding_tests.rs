//! Protocol encoding integration tests
//!
//! NIST 800-53: SI-10 (Input Validation)
//! Implementation: Raw SFTP packets go through the channel state and the
//! worker's answer step, and the encoded responses are parsed back

use burrow_sftp::protocol::{
    codec, MessageType, OpenFlags, Packet, PacketBuffer, Response, StatusCode, SFTP_VERSION,
};
use burrow_sftp::session::{answer, Action, ChannelState, Verdict};
use burrow_sftp::{Dispatcher, HandleTable, PathSandbox};
use bytes::{Buf, BufMut, BytesMut};
use tempfile::TempDir;

/// Frame a packet body with its length prefix
fn frame(body: BytesMut) -> BytesMut {
    let mut packet = BytesMut::new();
    packet.put_u32(body.len() as u32);
    packet.put(body);
    packet
}

fn open_packet(id: u32, path: &str, pflags: u32) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(MessageType::Open as u8);
    body.put_u32(id);
    codec::put_string(&mut body, path);
    body.put_u32(pflags);
    body.put_u32(0);
    frame(body)
}

fn handle_packet(msg_type: MessageType, id: u32, handle: &[u8]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(msg_type as u8);
    body.put_u32(id);
    codec::put_bytes(&mut body, handle);
    frame(body)
}

fn read_packet(id: u32, handle: &[u8], len: u32) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(MessageType::Read as u8);
    body.put_u32(id);
    codec::put_bytes(&mut body, handle);
    body.put_u64(0);
    body.put_u32(len);
    frame(body)
}

fn init_packet() -> BytesMut {
    let mut init = BytesMut::new();
    init.put_u8(MessageType::Init as u8);
    init.put_u32(3);
    frame(init)
}

/// One SFTP channel over a temporary root
struct Channel {
    state: ChannelState,
    dispatcher: Dispatcher,
    _root: TempDir,
}

impl Channel {
    fn new(root: TempDir) -> Self {
        Self {
            state: ChannelState::new(262144),
            dispatcher: Dispatcher::new(PathSandbox::new(root.path()), HandleTable::default()),
            _root: root,
        }
    }

    /// Channel that already completed the INIT/VERSION exchange
    async fn initialized(root: TempDir) -> Self {
        let mut channel = Self::new(root);
        assert_eq!(channel.exchange(&init_packet()).await.len(), 1);
        channel
    }

    /// Carry out the actions for `wire`, collecting everything sent back
    async fn exchange(&mut self, wire: &[u8]) -> Vec<BytesMut> {
        let feed = self.state.feed(wire);
        assert_eq!(feed.verdict, Verdict::Keep);

        let mut out = Vec::new();
        for action in feed.actions {
            match action {
                Action::Send(bytes) => out.push(bytes),
                Action::Queue(job) => out.push(answer(&self.dispatcher, job).await.encode()),
            }
        }
        out
    }
}

/// Parse the header of an encoded response: (type, id)
fn header(packet: &BytesMut) -> (u8, u32, &[u8]) {
    let mut buf = &packet[..];
    let len = buf.get_u32() as usize;
    assert_eq!(len, buf.len(), "length prefix must cover the body");
    let msg_type = buf.get_u8();
    let id = buf.get_u32();
    (msg_type, id, buf)
}

fn status_of(packet: &BytesMut) -> (u32, u32, String) {
    let (msg_type, id, mut rest) = header(packet);
    assert_eq!(msg_type, MessageType::Status as u8);
    let code = rest.get_u32();
    let message = codec::get_string(&mut rest).unwrap();
    (id, code, message)
}

#[tokio::test]
async fn test_init_then_download_over_the_wire() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("a.txt"), b"hi").unwrap();
    let mut channel = Channel::new(temp_dir);

    let mut wire = init_packet();
    wire.put(open_packet(1, "/a.txt", OpenFlags::READ));
    let responses = channel.exchange(&wire).await;
    assert_eq!(responses.len(), 2);

    let mut version = &responses[0][4..];
    assert_eq!(version.get_u8(), MessageType::Version as u8);
    assert_eq!(version.get_u32(), SFTP_VERSION);

    let (msg_type, id, mut rest) = header(&responses[1]);
    assert_eq!(msg_type, MessageType::Handle as u8);
    assert_eq!(id, 1);
    let handle = codec::get_bytes(&mut rest).unwrap();

    // Pipelined READ, READ, CLOSE in a single chunk
    let mut wire = read_packet(2, &handle, 1024);
    wire.put(read_packet(3, &handle, 1024));
    wire.put(handle_packet(MessageType::Close, 4, &handle));
    let responses = channel.exchange(&wire).await;
    assert_eq!(responses.len(), 3);

    let (msg_type, id, mut rest) = header(&responses[0]);
    assert_eq!(msg_type, MessageType::Data as u8);
    assert_eq!(id, 2);
    assert_eq!(codec::get_bytes(&mut rest).unwrap(), b"hi");

    assert_eq!(status_of(&responses[1]), (3, 1, "End of file".to_string()));
    assert_eq!(status_of(&responses[2]), (4, 0, "Success".to_string()));
}

/// Requests without a handler still get exactly one response
#[tokio::test]
async fn test_unhandled_requests_get_op_unsupported() {
    let mut channel = Channel::initialized(TempDir::new().unwrap()).await;

    let mut wire = BytesMut::new();
    for (msg_type, id) in [
        (MessageType::Readlink, 10),
        (MessageType::Lstat, 11),
        (MessageType::Stat, 12),
        (MessageType::Mkdir, 13),
    ] {
        let mut body = BytesMut::new();
        body.put_u8(msg_type as u8);
        body.put_u32(id);
        codec::put_string(&mut body, "/x");
        body.put_u32(0);
        wire.put(frame(body));
    }

    let responses = channel.exchange(&wire).await;
    let statuses: Vec<_> = responses.iter().map(status_of).collect();

    assert_eq!(
        statuses.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(),
        vec![10, 11, 12, 13]
    );
    assert!(statuses
        .iter()
        .all(|(_, code, _)| *code == StatusCode::OpUnsupported as u32));
}

#[tokio::test]
async fn test_no_such_file_status_on_the_wire() {
    let mut channel = Channel::initialized(TempDir::new().unwrap()).await;

    let responses = channel
        .exchange(&open_packet(42, "missing.txt", OpenFlags::READ))
        .await;

    let (id, code, message) = status_of(&responses[0]);
    assert_eq!(id, 42);
    assert_eq!(code, StatusCode::NoSuchFile as u32);
    assert_eq!(message, "File does not exist /missing.txt");
}

/// Requests split across channel data chunks are reassembled
#[tokio::test]
async fn test_request_split_across_chunks() {
    let temp_dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(PathSandbox::new(temp_dir.path()), HandleTable::default());

    let wire = open_packet(7, "/new.txt", OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC);
    let mut buffer = PacketBuffer::new(262144);

    for byte in &wire[..wire.len() - 1] {
        buffer.extend(&[*byte]);
        assert!(buffer.next_packet().unwrap().is_none());
    }
    buffer.extend(&wire[wire.len() - 1..]);

    let payload = buffer.next_packet().unwrap().unwrap();
    let Packet::Request(request) = Packet::decode(&payload).unwrap() else {
        panic!("expected a request");
    };
    let response = dispatcher.dispatch(request).await.unwrap();

    assert!(matches!(response, Response::Handle { id: 7, .. }));
    assert!(temp_dir.path().join("new.txt").exists());
}

/// A request whose body cannot be decoded is answered FAILURE in sequence
#[tokio::test]
async fn test_malformed_request_answered_in_order() {
    let mut channel = Channel::initialized(TempDir::new().unwrap()).await;

    let mut truncated = BytesMut::new();
    truncated.put_u8(MessageType::Rename as u8);
    truncated.put_u32(21);
    codec::put_string(&mut truncated, "/only-old-path");

    let mut wire = open_packet(20, "/missing.txt", OpenFlags::READ);
    wire.put(frame(truncated));
    wire.put(open_packet(22, "/missing.txt", OpenFlags::READ));

    let responses = channel.exchange(&wire).await;
    let statuses: Vec<_> = responses.iter().map(status_of).collect();
    assert_eq!(statuses[0].0, 20);
    assert_eq!(statuses[1].0, 21);
    assert_eq!(statuses[1].1, StatusCode::Failure as u32);
    assert_eq!(statuses[2].0, 22);
}

/// NIST 800-53: SI-10 - Requests before INIT end the channel
#[tokio::test]
async fn test_request_before_init_is_rejected() {
    let mut state = ChannelState::new(262144);

    let feed = state.feed(&open_packet(1, "/a.txt", OpenFlags::READ));
    assert_eq!(feed.verdict, Verdict::Close);
    assert!(feed.actions.is_empty());
}
