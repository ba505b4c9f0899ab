use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{parse_flood_wait, TelegramError};
use crate::transport::{FullProfile, MessengerSession, Peer, PeerRef};

/// One authenticated upstream session with cool-down tracking.
///
/// After any call fails with a `FLOOD_WAIT (N)` marker the client refuses
/// further calls until the reported recovery instant, without touching the
/// wire. A later cool-down observation supersedes an earlier one.
pub struct UpstreamClient {
    id: String,
    session: Arc<dyn MessengerSession>,
    cooling_until: RwLock<Option<Instant>>,
}

impl UpstreamClient {
    pub fn new(session: Arc<dyn MessengerSession>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session,
            cooling_until: RwLock::new(None),
        }
    }

    /// Stable identifier for the process lifetime.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Probes the session once, driving interactive login when required.
    /// Meant to be called at startup.
    pub async fn start(&self) -> Result<(), TelegramError> {
        self.session.ensure_ready().await
    }

    /// Earliest instant at which the client expects to accept requests
    /// again; `None` when no cool-down has been observed.
    pub fn recovery_time(&self) -> Option<Instant> {
        *self.cooling_until.read()
    }

    pub async fn health(&self) -> Result<(), TelegramError> {
        self.run(self.session.ping()).await
    }

    pub async fn resolve_username(&self, username: &str) -> Result<Option<Peer>, TelegramError> {
        debug!(client_id = %self.id, username, "executing resolve-username");
        self.run(self.session.resolve_username(username)).await
    }

    pub async fn get_users(&self, ids: &[i64]) -> Result<Vec<Peer>, TelegramError> {
        debug!(client_id = %self.id, count = ids.len(), "executing get-users");
        self.run(self.session.get_users(ids)).await
    }

    pub async fn get_full_user(&self, peer: PeerRef) -> Result<FullProfile, TelegramError> {
        debug!(client_id = %self.id, user_id = peer.id, "executing get-full-user");
        self.run(self.session.get_full_user(peer)).await
    }

    async fn run<T>(
        &self,
        op: impl Future<Output = Result<T, TelegramError>>,
    ) -> Result<T, TelegramError> {
        self.check_cooling()?;
        match op.await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.observe_error(&err);
                Err(err)
            }
        }
    }

    fn check_cooling(&self) -> Result<(), TelegramError> {
        if let Some(until) = *self.cooling_until.read() {
            let now = Instant::now();
            if now < until {
                debug!(client_id = %self.id, "call refused, cool-down active");
                return Err(TelegramError::CoolingDown(until - now));
            }
        }
        Ok(())
    }

    fn observe_error(&self, err: &TelegramError) {
        if let Some(wait) = parse_flood_wait(err) {
            let until = Instant::now() + wait;
            // Latest observation wins.
            *self.cooling_until.write() = Some(until);
            warn!(client_id = %self.id, wait_seconds = wait.as_secs(), "client entered cool-down");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    /// Scripted session: fails the first `fail_first` calls with the given
    /// error message, then succeeds.
    struct ScriptedSession {
        fail_first: usize,
        error: String,
        calls: AtomicUsize,
    }

    impl ScriptedSession {
        fn new(fail_first: usize, error: &str) -> Self {
            Self {
                fail_first,
                error: error.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn outcome(&self) -> Result<(), TelegramError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(TelegramError::Rpc(self.error.clone()))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessengerSession for ScriptedSession {
        async fn ensure_ready(&self) -> Result<(), TelegramError> {
            Ok(())
        }

        async fn resolve_username(&self, _username: &str) -> Result<Option<Peer>, TelegramError> {
            self.outcome().map(|_| {
                Some(Peer {
                    id: 1,
                    access_hash: Some(2),
                    ..Default::default()
                })
            })
        }

        async fn get_users(&self, _ids: &[i64]) -> Result<Vec<Peer>, TelegramError> {
            self.outcome().map(|_| Vec::new())
        }

        async fn get_full_user(&self, _peer: PeerRef) -> Result<FullProfile, TelegramError> {
            self.outcome().map(|_| FullProfile::default())
        }

        async fn ping(&self) -> Result<(), TelegramError> {
            self.outcome()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_puts_client_into_cool_down() {
        let session = Arc::new(ScriptedSession::new(1, "FLOOD_WAIT (30)"));
        let client = UpstreamClient::new(session.clone());

        let err = client.resolve_username("kate").await.unwrap_err();
        assert!(err.to_string().contains("FLOOD_WAIT (30)"));
        let recovery = client.recovery_time().expect("cool-down recorded");
        assert_eq!(recovery - Instant::now(), Duration::from_secs(30));

        // The next call is refused without touching the wire.
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, TelegramError::CoolingDown(_)));
        assert_eq!(session.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_recovers_after_cool_down_expires() {
        let session = Arc::new(ScriptedSession::new(1, "FLOOD_WAIT (5)"));
        let client = UpstreamClient::new(session.clone());

        let _ = client.ping().await;
        assert!(client.ping().await.is_err());

        tokio::time::advance(Duration::from_secs(6)).await;
        client.ping().await.expect("cool-down expired");
        assert_eq!(session.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn later_cool_down_supersedes_earlier() {
        let session = Arc::new(ScriptedSession::new(2, "FLOOD_WAIT (10)"));
        let client = UpstreamClient::new(session.clone());

        let _ = client.ping().await;
        let first = client.recovery_time().unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let _ = client.ping().await;
        let second = client.recovery_time().unwrap();
        assert!(second > first);
    }

    #[tokio::test(start_paused = true)]
    async fn non_flood_errors_do_not_trigger_cool_down() {
        let session = Arc::new(ScriptedSession::new(1, "USERNAME_NOT_OCCUPIED"));
        let client = UpstreamClient::new(session.clone());

        let _ = client.resolve_username("ghost").await.unwrap_err();
        assert!(client.recovery_time().is_none());
        client.ping().await.expect("client still accepts calls");
    }
}
