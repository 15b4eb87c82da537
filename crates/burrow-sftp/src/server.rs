//! SSH server and SFTP session plumbing
//!
//! NIST 800-53: AC-12 (Session Termination), SI-11 (Error Handling)
//! STIG: V-222601
//! Implementation: The SSH event loop only feeds channel data to the
//! channel state and carries out the resulting actions. Each SFTP channel
//! owns one worker task that answers requests in arrival order, so
//! pipelined READs and WRITEs on a handle keep their order. When the queue
//! ends the worker releases every handle the session left open and closes
//! the channel.

use crate::auth::PasswordAuthenticator;
use crate::dispatcher::{no_handler, Dispatcher};
use crate::handles::HandleTable;
use crate::sandbox::PathSandbox;
use crate::session::{answer, Action, ChannelState, Job, Verdict};
use crate::{Config, Error, Result};
use async_trait::async_trait;
use russh::server::{Auth, Handle, Handler, Msg, Server as SshServer, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet};
use russh_keys::key;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// SFTP Server
pub struct Server {
    config: Arc<Config>,
    ssh_config: russh::server::Config,
}

impl Server {
    /// Validate the configuration, load the host key and prepare the SSH layer
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let key_pair = load_host_key(&config.host_key_path).await?;

        // NIST 800-53: IA-2 - password is the only method offered
        let ssh_config = russh::server::Config {
            inactivity_timeout: Some(Duration::from_secs(config.timeout)),
            auth_rejection_time: Duration::from_secs(3),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            methods: MethodSet::PASSWORD,
            keys: vec![key_pair],
            ..Default::default()
        };

        Ok(Self {
            config: Arc::new(config),
            ssh_config,
        })
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!(
            root = ?self.config.root_dir,
            users = self.config.users.len(),
            "Starting SFTP server on {}",
            addr
        );

        let mut server = SftpServer {
            authenticator: Arc::new(PasswordAuthenticator::new(self.config.users.clone())),
            config: self.config,
            next_connection_id: 0,
        };

        server
            .run_on_address(Arc::new(self.ssh_config), addr.as_str())
            .await
            .map_err(|e| Error::Ssh(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Factory for per-connection handlers
struct SftpServer {
    config: Arc<Config>,
    authenticator: Arc<PasswordAuthenticator>,
    next_connection_id: u64,
}

impl SshServer for SftpServer {
    type Handler = SftpConnection;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        self.next_connection_id += 1;
        info!(connection = self.next_connection_id, peer = ?peer_addr, "Client connected");

        SftpConnection {
            connection_id: self.next_connection_id,
            config: self.config.clone(),
            authenticator: self.authenticator.clone(),
            user: None,
            sessions: HashMap::new(),
            sftp: HashMap::new(),
        }
    }
}

/// State of one channel running the `sftp` subsystem
struct SftpChannel {
    _channel: Channel<Msg>,
    state: ChannelState,
    jobs: mpsc::UnboundedSender<Job>,
}

/// Per-connection SSH handler
struct SftpConnection {
    connection_id: u64,
    config: Arc<Config>,
    authenticator: Arc<PasswordAuthenticator>,
    user: Option<String>,
    /// Session channels opened but not yet bound to a subsystem
    sessions: HashMap<ChannelId, Channel<Msg>>,
    sftp: HashMap<ChannelId, SftpChannel>,
}

impl SftpConnection {
    /// Bind a fresh handle table and dispatcher to `channel` and start its worker
    fn start_sftp(&mut self, channel: Channel<Msg>, session: &mut Session) {
        let channel_id = channel.id();
        let handles = HandleTable::new(self.config.max_open_handles);
        let dispatcher = Dispatcher::new(PathSandbox::new(self.config.root_dir.clone()), handles);
        let (jobs, queue) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(
            self.connection_id,
            dispatcher,
            session.handle(),
            channel_id,
            queue,
        ));

        self.sftp.insert(
            channel_id,
            SftpChannel {
                _channel: channel,
                state: ChannelState::new(self.config.max_packet_size as usize),
                jobs,
            },
        );

        info!(
            connection = self.connection_id,
            user = self.user.as_deref().unwrap_or(""),
            "SFTP session started"
        );
    }

    /// Drop the SFTP state of `channel`
    ///
    /// Closing the job queue lets the worker answer what is already queued,
    /// release the session's handles and close the channel.
    fn end_sftp(&mut self, channel: ChannelId) -> bool {
        self.sessions.remove(&channel);
        self.sftp.remove(&channel).is_some()
    }
}

impl Drop for SftpConnection {
    fn drop(&mut self) {
        info!(
            connection = self.connection_id,
            open_sftp_channels = self.sftp.len(),
            "Client disconnected"
        );
    }
}

#[async_trait]
impl Handler for SftpConnection {
    type Error = Error;

    // NIST 800-53: IA-2 (Identification and Authentication)
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        if self.authenticator.verify(user, password) {
            self.user = Some(user.to_string());
            return Ok(Auth::Accept);
        }

        Ok(Auth::Reject {
            proceed_with_methods: Some(MethodSet::PASSWORD),
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        debug!(connection = self.connection_id, "Session channel opened");
        self.sessions.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<()> {
        info!(connection = self.connection_id, "Subsystem request: {}", name);

        if name != "sftp" {
            warn!("Unsupported subsystem: {}", name);
            session.channel_failure(channel_id);
            return Ok(());
        }

        let Some(channel) = self.sessions.remove(&channel_id) else {
            warn!("Subsystem requested on unknown or busy channel");
            session.channel_failure(channel_id);
            return Ok(());
        };

        self.start_sftp(channel, session);
        session.channel_success(channel_id);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        no_handler("shell");
        session.channel_failure(channel);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        no_handler("exec");
        session.channel_failure(channel);
        Ok(())
    }

    /// Handle SFTP data
    ///
    /// NIST 800-53: SI-10 (Input Validation), SI-11 (Error Handling)
    /// STIG: V-222566
    async fn data(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<()> {
        let Some(sftp) = self.sftp.get_mut(&channel) else {
            no_handler("data");
            return Ok(());
        };

        let feed = sftp.state.feed(data);
        let mut verdict = feed.verdict;

        for action in feed.actions {
            match action {
                Action::Send(bytes) => session.data(channel, CryptoVec::from_slice(&bytes)),
                Action::Queue(job) => {
                    if sftp.jobs.send(job).is_err() {
                        error!("SFTP worker is gone");
                        verdict = Verdict::Close;
                        break;
                    }
                }
            }
        }

        if verdict == Verdict::Close {
            self.end_sftp(channel);
        }

        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        if self.end_sftp(channel) {
            debug!(connection = self.connection_id, "Client sent EOF, ending SFTP session");
        }
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        if self.end_sftp(channel) {
            debug!(connection = self.connection_id, "Channel closed, ending SFTP session");
        }
        Ok(())
    }
}

/// Answer the jobs of one SFTP channel in order, then close it
async fn run_worker(
    connection_id: u64,
    dispatcher: Dispatcher,
    handle: Handle,
    channel: ChannelId,
    mut queue: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = queue.recv().await {
        let response = answer(&dispatcher, job).await;
        let id = response.id();

        if handle
            .data(channel, CryptoVec::from_slice(&response.encode()))
            .await
            .is_err()
        {
            warn!(request_id = id, "Channel closed before the response could be sent");
            break;
        }
    }

    let released = dispatcher.shutdown().await;
    if handle.close(channel).await.is_err() {
        debug!(connection = connection_id, "Channel was already closed");
    }
    info!(connection = connection_id, released, "SFTP session ended");
}

/// Load the host key, generating and saving an Ed25519 key when missing
async fn load_host_key(path: &Path) -> Result<key::KeyPair> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        warn!("Host key {:?} not found, generating a new Ed25519 key", path);
        let key_pair = key::KeyPair::generate_ed25519()
            .ok_or_else(|| Error::Config("Failed to generate host key".into()))?;

        let mut pem = Vec::new();
        match russh_keys::encode_pkcs8_pem(&key_pair, &mut pem) {
            Ok(()) => {
                if let Err(e) = fs::write(path, &pem).await {
                    warn!("Could not save host key to {:?}: {}", path, e);
                }
            }
            Err(e) => warn!("Could not encode host key: {}", e),
        }

        return Ok(key_pair);
    }

    let key_data = fs::read_to_string(path).await?;
    russh_keys::decode_secret_key(&key_data, None)
        .map_err(|e| Error::Config(format!("Failed to load host key: {}", e)))
}
