use std::io::Write;

use async_trait::async_trait;

use crate::error::TelegramError;

/// Structured peer description returned by the upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Peer {
    pub id: i64,
    /// Stability token required to address this peer in follow-up calls.
    pub access_hash: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

impl Peer {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Addressable reference to a previously resolved peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRef {
    pub id: i64,
    pub access_hash: i64,
}

/// Full-profile payload; only the bio is consumed downstream.
#[derive(Debug, Clone, Default)]
pub struct FullProfile {
    pub about: String,
}

/// The raw RPC surface one authenticated session exposes. Production
/// sessions speak MTProto; tests substitute scripted fakes.
#[async_trait]
pub trait MessengerSession: Send + Sync {
    /// Establishes the session and verifies authorization, driving the
    /// interactive login flow when one is required and permitted.
    async fn ensure_ready(&self) -> Result<(), TelegramError>;

    /// Maps a username (without `@`) to a peer. `None` means the username
    /// does not resolve or resolved to something that is not a user.
    async fn resolve_username(&self, username: &str) -> Result<Option<Peer>, TelegramError>;

    /// Batch-fetches peers by bare numeric id.
    async fn get_users(&self, ids: &[i64]) -> Result<Vec<Peer>, TelegramError>;

    /// Fetches the full profile of a peer addressed by id + access-hash.
    async fn get_full_user(&self, peer: PeerRef) -> Result<FullProfile, TelegramError>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), TelegramError>;
}

/// Collects login credentials during the interactive flow.
pub trait CredentialPrompt: Send + Sync {
    fn login_code(&self, phone_number: &str) -> Result<String, TelegramError>;
    fn password(&self) -> Result<String, TelegramError>;
}

/// Reads credentials from the controlling terminal.
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_line(&self, prompt: &str) -> Result<String, TelegramError> {
        print!("{prompt}");
        std::io::stdout()
            .flush()
            .map_err(|err| TelegramError::Transport(err.to_string()))?;
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|err| TelegramError::Transport(err.to_string()))?;
        Ok(line.trim().to_string())
    }
}

impl CredentialPrompt for TerminalPrompt {
    fn login_code(&self, phone_number: &str) -> Result<String, TelegramError> {
        self.read_line(&format!("Enter the login code sent to {phone_number}: "))
    }

    fn password(&self) -> Result<String, TelegramError> {
        self.read_line("Enter your two-factor password: ")
    }
}
