//! Password authentication
//!
//! NIST 800-53: IA-2 (Identification and Authentication), AC-7 (Unsuccessful Logon Attempts)
//! STIG: V-222611
//! Implementation: Credentials are compared in constant time against every
//! configured account, so response timing does not reveal which usernames
//! exist or how much of a password matched.

use crate::config::UserCredentials;
use subtle::{Choice, ConstantTimeEq};
use tracing::{info, warn};

/// Verifies username/password pairs against the configured accounts
#[derive(Debug, Clone, Default)]
pub struct PasswordAuthenticator {
    users: Vec<UserCredentials>,
}

impl PasswordAuthenticator {
    /// Create an authenticator over the configured accounts
    pub fn new(users: Vec<UserCredentials>) -> Self {
        if users.is_empty() {
            warn!("No users configured, every login will be rejected");
        }
        Self { users }
    }

    /// Check a login attempt
    ///
    /// Every configured account is compared; there is no early exit on a
    /// match.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let mut matched = Choice::from(0u8);

        for user in &self.users {
            let name_ok = user.username.as_bytes().ct_eq(username.as_bytes());
            let password_ok = user.password.as_bytes().ct_eq(password.as_bytes());
            matched |= name_ok & password_ok;
        }

        let accepted: bool = matched.into();
        if accepted {
            info!(user = username, "Password authentication succeeded");
        } else {
            warn!(user = username, "Password authentication failed");
        }
        accepted
    }
}
