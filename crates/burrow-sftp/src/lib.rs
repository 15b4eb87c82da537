//! # Burrow SFTP
//!
//! Sandboxed SFTP (SSH File Transfer Protocol, version 3) server.
//!
//! Clients see one configured directory as `/` and can read, write, append,
//! list, rename and remove files beneath it. Every path is confined to that
//! root, and every open file or directory is addressed through an opaque
//! handle valid only within the session that opened it.
//!
//! - RFC 4251-4254: SSH transport, authentication and connection layers
//! - draft-ietf-secsh-filexfer-02: SSH File Transfer Protocol
//!
//! The request-handling core ([`Dispatcher`], [`handlers`], [`handles`],
//! [`sandbox`], [`listing`]) is independent of the SSH layer in [`server`]
//! and can be driven directly with decoded [`protocol::Request`] values.
//! [`session`] holds the per-channel framing rules the SSH layer applies.

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod handles;
pub mod listing;
pub mod protocol;
pub mod sandbox;
pub mod server;
pub mod session;

pub use auth::PasswordAuthenticator;
pub use config::{Config, LogFormat, LoggingConfig, UserCredentials};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use handles::HandleTable;
pub use sandbox::PathSandbox;
pub use server::Server;
