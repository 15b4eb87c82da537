//! Configuration for the SFTP server
//!
//! Values come from built-in defaults or a TOML file, then environment
//! variables, then command line flags (applied by the binary).

use crate::handles::DEFAULT_MAX_HANDLES;
use crate::{Error, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Minimum channel packet size (RFC 4254)
pub const MIN_PACKET_SIZE: u32 = 32768;

/// SFTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory exposed to clients as `/`
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// SSH host key path, generated on first start when missing
    #[serde(default = "default_host_key_path")]
    pub host_key_path: PathBuf,

    /// Accounts allowed to log in with a password
    #[serde(default)]
    pub users: Vec<UserCredentials>,

    /// Inactivity timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Largest SFTP packet accepted from a client
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,

    /// Open handles allowed per session
    #[serde(default = "default_max_open_handles")]
    pub max_open_handles: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One password account
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserCredentials {
    /// Login name
    pub username: String,
    /// Plain-text password, compared in constant time
    pub password: String,
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Logging configuration
///
/// NIST 800-53: AU-2 (Audit Events), AU-12 (Audit Generation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: default_root_dir(),
            host_key_path: default_host_key_path(),
            users: Vec::new(),
            timeout: default_timeout(),
            max_packet_size: default_max_packet_size(),
            max_open_handles: default_max_open_handles(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Overlay `SFTP_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables resolved through `lookup`
    ///
    /// `SFTP_USERNAMES` and `SFTP_PASSWORDS` are comma separated lists paired
    /// by position; they replace any users loaded from the file. Usernames
    /// are trimmed, passwords are taken verbatim.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("SFTP_HOSTNAME") {
            self.bind_address = host;
        }

        if let Some(port) = lookup("SFTP_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("Invalid SFTP_PORT: {}", port)))?;
        }

        if let Some(root) = lookup("SFTP_ROOT_DIR") {
            self.root_dir = PathBuf::from(root);
        }

        match (lookup("SFTP_USERNAMES"), lookup("SFTP_PASSWORDS")) {
            (None, None) => {}
            (Some(usernames), Some(passwords)) => {
                let usernames: Vec<&str> = usernames.split(',').map(str::trim).collect();
                let passwords: Vec<&str> = passwords.split(',').collect();

                if usernames.len() != passwords.len() {
                    return Err(Error::Config(format!(
                        "SFTP_USERNAMES has {} entries but SFTP_PASSWORDS has {}",
                        usernames.len(),
                        passwords.len()
                    )));
                }

                self.users = usernames
                    .into_iter()
                    .zip(passwords)
                    .filter(|(username, _)| !username.is_empty())
                    .map(|(username, password)| UserCredentials {
                        username: username.to_string(),
                        password: password.to_string(),
                    })
                    .collect();
            }
            _ => {
                return Err(Error::Config(
                    "SFTP_USERNAMES and SFTP_PASSWORDS must be set together".into(),
                ));
            }
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.root_dir.exists() {
            return Err(Error::Config(format!(
                "Root directory does not exist: {:?}",
                self.root_dir
            )));
        }

        if !self.root_dir.is_dir() {
            return Err(Error::Config(format!(
                "Root path is not a directory: {:?}",
                self.root_dir
            )));
        }

        if self.max_packet_size < MIN_PACKET_SIZE {
            return Err(Error::Config(format!(
                "max_packet_size must be at least {} bytes (RFC 4254)",
                MIN_PACKET_SIZE
            )));
        }

        if self.max_open_handles == 0 {
            return Err(Error::Config("max_open_handles must be at least 1".into()));
        }

        if self.users.iter().any(|user| user.username.is_empty()) {
            return Err(Error::Config("User entries need a non-empty username".into()));
        }

        Ok(())
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5556
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./sftp-server-files")
}

fn default_host_key_path() -> PathBuf {
    PathBuf::from("./host.key")
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_max_packet_size() -> u32 {
    262144
}

fn default_max_open_handles() -> usize {
    DEFAULT_MAX_HANDLES
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 5556);
        assert_eq!(config.root_dir, PathBuf::from("./sftp-server-files"));
        assert!(config.users.is_empty());
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            port = 2022
            root_dir = "/srv/sftp"

            [[users]]
            username = "alice"
            password = "secret"

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 2022);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].username, "alice");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.max_packet_size, 262144);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("SFTP_HOSTNAME", "0.0.0.0"),
                ("SFTP_PORT", "2200"),
                ("SFTP_ROOT_DIR", "/data"),
                ("SFTP_USERNAMES", "alice, bob"),
                ("SFTP_PASSWORDS", "a1,b2"),
            ]))
            .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 2200);
        assert_eq!(config.root_dir, PathBuf::from("/data"));
        assert_eq!(
            config.users,
            vec![
                UserCredentials {
                    username: "alice".into(),
                    password: "a1".into()
                },
                UserCredentials {
                    username: "bob".into(),
                    password: "b2".into()
                },
            ]
        );
    }

    #[test]
    fn test_env_passwords_keep_whitespace() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("SFTP_USERNAMES", " alice ,bob"),
                ("SFTP_PASSWORDS", " padded ,b2"),
            ]))
            .unwrap();

        assert_eq!(config.users[0].username, "alice");
        assert_eq!(config.users[0].password, " padded ");
        assert_eq!(config.users[1].password, "b2");
    }

    #[test]
    fn test_env_rejects_unpaired_credentials() {
        let mut config = Config::default();
        assert!(config
            .apply_env_from(env(&[("SFTP_USERNAMES", "a,b"), ("SFTP_PASSWORDS", "x")]))
            .is_err());
        assert!(config
            .apply_env_from(env(&[("SFTP_USERNAMES", "a")]))
            .is_err());
        assert!(config.apply_env_from(env(&[("SFTP_PORT", "ssh")])).is_err());
    }

    #[test]
    fn test_validate() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config {
            root_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.max_packet_size = 1024;
        assert!(config.validate().is_err());
        config.max_packet_size = MIN_PACKET_SIZE;

        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        config.root_dir = file;
        assert!(config.validate().is_err());

        config.root_dir = temp_dir.path().join("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let user = UserCredentials {
            username: "alice".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", user).contains("hunter2"));
    }
}
