//! SFTP channel state
//!
//! NIST 800-53: SI-10 (Input Validation), AC-12 (Session Termination)
//! Implementation: Raw channel data goes in, a list of actions and a
//! keep/close verdict come out. The SSH handler only carries those actions
//! out, so the framing and INIT sequencing rules run without a connection.

use crate::dispatcher::Dispatcher;
use crate::protocol::{encode_version, Packet, PacketBuffer, Request, Response, StatusCode};
use bytes::BytesMut;
use tracing::{info, warn};

/// Work for the request worker, answered strictly in queue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Decoded request for the dispatcher
    Dispatch(Request),
    /// Ready answer to a request whose body could not be decoded
    Reply(Response),
}

/// What the SSH layer does with one decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write these bytes to the channel immediately
    Send(BytesMut),
    /// Hand to the worker
    Queue(Job),
}

/// Whether the channel survives the data just fed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep reading
    Keep,
    /// Protocol violation; stop reading and close once queued work is answered
    Close,
}

/// Outcome of feeding one chunk of channel data
#[derive(Debug, PartialEq, Eq)]
pub struct Feed {
    /// Actions in packet order
    pub actions: Vec<Action>,
    /// Channel verdict after this chunk
    pub verdict: Verdict,
}

/// Framing and INIT state of one SFTP channel
#[derive(Debug)]
pub struct ChannelState {
    buffer: PacketBuffer,
    initialized: bool,
}

impl ChannelState {
    /// Fresh channel, waiting for INIT
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buffer: PacketBuffer::new(max_packet_size),
            initialized: false,
        }
    }

    /// Buffer `data` and turn every complete packet into an action
    ///
    /// Actions decoded before a fatal packet are kept; anything after it is
    /// dropped with the channel.
    pub fn feed(&mut self, data: &[u8]) -> Feed {
        self.buffer.extend(data);
        let mut actions = Vec::new();

        let verdict = loop {
            let payload = match self.buffer.next_packet() {
                Ok(Some(payload)) => payload,
                Ok(None) => break Verdict::Keep,
                Err(e) => {
                    warn!("Dropping SFTP channel: {}", e);
                    break Verdict::Close;
                }
            };

            match Packet::decode(&payload) {
                Ok(Packet::Init { version }) => {
                    info!("SFTP init, client version {}", version);
                    self.initialized = true;
                    actions.push(Action::Send(encode_version()));
                }
                Ok(Packet::Request(request)) => {
                    if !self.initialized {
                        warn!("Received {} before INIT", request.name());
                        break Verdict::Close;
                    }
                    actions.push(Action::Queue(Job::Dispatch(request)));
                }
                Err(e) => match Packet::peek_request_id(&payload) {
                    Some(id) if self.initialized => {
                        warn!(request_id = id, "Malformed request: {}", e);
                        actions.push(Action::Queue(Job::Reply(Response::from_error(id, &e))));
                    }
                    _ => {
                        warn!("Malformed packet: {}", e);
                        break Verdict::Close;
                    }
                },
            }
        };

        Feed { actions, verdict }
    }
}

/// Produce the one response owed for `job`
///
/// Requests the dispatcher has no handler for get `SSH_FX_OP_UNSUPPORTED`.
pub async fn answer(dispatcher: &Dispatcher, job: Job) -> Response {
    match job {
        Job::Reply(response) => response,
        Job::Dispatch(request) => {
            let id = request.id();
            dispatcher.dispatch(request).await.unwrap_or_else(|| {
                Response::status(id, StatusCode::OpUnsupported, "Operation not supported")
            })
        }
    }
}
