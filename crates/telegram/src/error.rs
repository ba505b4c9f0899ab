use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Pattern of the upstream rate-limit marker in an error's printable form.
static FLOOD_WAIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FLOOD_WAIT \((\d+)\)").expect("flood wait pattern"));

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("no healthy clients available")]
    NoHealthyClients,

    /// The client refused to touch the wire because a cool-down is active.
    #[error("client is cooling down, {} more seconds", .0.as_secs())]
    CoolingDown(Duration),

    /// The session is unusable without a fresh login.
    #[error("session is not authorized: {0}")]
    AuthRequired(String),

    /// An RPC-level failure; the message carries the upstream marker verbatim
    /// (e.g. `FLOOD_WAIT (120)`).
    #[error("{0}")]
    Rpc(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl TelegramError {
    pub fn is_auth_invalid(&self) -> bool {
        matches!(self, TelegramError::AuthRequired(_))
            || self.to_string().contains("AUTH_KEY_UNREGISTERED")
    }
}

/// Extracts the cool-down duration when the error's printable representation
/// carries the `FLOOD_WAIT (N)` marker.
pub(crate) fn parse_flood_wait(err: &TelegramError) -> Option<Duration> {
    let text = err.to_string();
    let caps = FLOOD_WAIT.captures(&text)?;
    let seconds: u64 = caps[1].parse().ok()?;
    Some(Duration::from_secs(seconds))
}
