use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use roster_domain::{RawParticipant, User};
use roster_telegram::{ClientRouter, PeerRef, RoutedClient};

/// Channel references inside a bio look like `@name` or `t.me/name`, with a
/// 5-character minimum on the captured tail.
static CHANNEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:@|t\.me/)([A-Za-z0-9_]{5,})").expect("channel pattern"));

#[derive(Debug, Clone)]
pub struct EnricherConfig {
    /// Upper bound on one whole enrichment run.
    pub total_timeout: Duration,
    /// Deadline for a single upstream call.
    pub operation_timeout: Duration,
    /// Number of concurrent enrichment workers.
    pub pool_size: usize,
    /// Pause before re-asking the router when no client is available.
    pub client_retry_pause: Duration,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(600),
            operation_timeout: Duration::from_secs(5),
            pool_size: 1,
            client_retry_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment deadline exceeded")]
    DeadlineExceeded,
}

/// Outcome of one enrichment run. Users collected before a deadline fired
/// are always returned, alongside the error describing why the run fell
/// short, if it did.
#[derive(Debug)]
pub struct EnrichmentReport {
    pub users: Vec<User>,
    pub error: Option<EnrichmentError>,
}

/// Per-participant attempt classification, mirroring the three-way error
/// taxonomy: terminal misses, transient failures, and deadline exhaustion.
enum Attempt {
    Unresolvable(String),
    Transient(String),
    DeadlineExceeded,
}

enum Outcome {
    Enriched(User),
    Skipped,
    /// The worker gave up on an item because the run's deadline had passed.
    DeadlineAborted,
}

/// Enriches raw participants through the upstream client pool with a
/// fixed-size worker pool. Stateless between runs and safe to share.
#[derive(Clone)]
pub struct Enricher {
    router: Arc<ClientRouter>,
    config: EnricherConfig,
}

impl Enricher {
    pub fn new(router: Arc<ClientRouter>, config: EnricherConfig) -> Self {
        Self { router, config }
    }

    /// Runs the full enrichment pipeline. `deadline_cap` further restricts
    /// the configured total timeout when the caller carries its own budget.
    pub async fn enrich(
        &self,
        participants: Vec<RawParticipant>,
        deadline_cap: Option<Duration>,
    ) -> EnrichmentReport {
        if participants.is_empty() {
            return EnrichmentReport {
                users: Vec::new(),
                error: None,
            };
        }

        let original_count = participants.len();
        let unique = dedup_participants(participants);
        if unique.len() < original_count {
            info!(
                original_count,
                unique_count = unique.len(),
                "removed duplicate participants"
            );
        }

        let total = match deadline_cap {
            Some(cap) => self.config.total_timeout.min(cap),
            None => self.config.total_timeout,
        };
        let deadline = Instant::now() + total;

        info!(
            participants = unique.len(),
            pool_size = self.config.pool_size,
            total_timeout_seconds = total.as_secs(),
            "starting enrichment"
        );

        let cancel = CancellationToken::new();
        let (task_tx, task_rx) = mpsc::channel::<RawParticipant>(unique.len());
        let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<Outcome>(unique.len());

        let mut workers = Vec::with_capacity(self.config.pool_size);
        for worker_id in 0..self.config.pool_size {
            let engine = self.clone();
            let cancel = cancel.clone();
            let tasks = task_rx.clone();
            let requeue = task_tx.clone();
            let results = result_tx.clone();
            workers.push(tokio::spawn(async move {
                engine
                    .worker(worker_id, cancel, tasks, requeue, results, deadline)
                    .await;
            }));
        }

        for participant in &unique {
            // Queue capacity equals the input count, so this never blocks.
            let _ = task_tx.send(participant.clone()).await;
        }
        drop(task_tx);
        drop(result_tx);

        let mut merged: HashMap<i64, User> = HashMap::with_capacity(unique.len());
        let mut unidentified: Vec<User> = Vec::new();
        let mut finished = 0usize;
        let mut deadline_hit = false;

        while finished < unique.len() {
            tokio::select! {
                outcome = result_rx.recv() => {
                    let Some(outcome) = outcome else { break };
                    finished += 1;
                    match outcome {
                        Outcome::Enriched(user) => merge_user(&mut merged, &mut unidentified, user),
                        Outcome::Skipped => {}
                        Outcome::DeadlineAborted => deadline_hit = true,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    deadline_hit = true;
                    break;
                }
            }
        }

        cancel.cancel();
        for worker in workers {
            let _ = worker.await;
        }

        let mut users: Vec<User> = merged.into_values().collect();
        users.append(&mut unidentified);

        let error = if deadline_hit {
            warn!(
                collected = users.len(),
                "enrichment deadline exceeded, returning partial results"
            );
            Some(EnrichmentError::DeadlineExceeded)
        } else {
            info!(enriched = users.len(), "enrichment finished");
            None
        };

        EnrichmentReport { users, error }
    }

    async fn worker(
        &self,
        worker_id: usize,
        cancel: CancellationToken,
        tasks: Arc<tokio::sync::Mutex<mpsc::Receiver<RawParticipant>>>,
        requeue: mpsc::Sender<RawParticipant>,
        results: mpsc::Sender<Outcome>,
        deadline: Instant,
    ) {
        loop {
            let participant = tokio::select! {
                _ = cancel.cancelled() => return,
                received = async { tasks.lock().await.recv().await } => {
                    match received {
                        Some(participant) => participant,
                        None => return,
                    }
                }
            };

            match self.enrich_participant(&participant, deadline, &cancel).await {
                Ok(user) => {
                    let _ = results.send(Outcome::Enriched(user)).await;
                }
                Err(Attempt::Unresolvable(reason)) => {
                    debug!(
                        worker_id,
                        participant = ?participant,
                        reason = %reason,
                        "participant could not be resolved, skipping"
                    );
                    let _ = results.send(Outcome::Skipped).await;
                }
                Err(Attempt::DeadlineExceeded) => {
                    warn!(
                        worker_id,
                        participant = ?participant,
                        "abandoning participant, deadline exceeded"
                    );
                    let _ = results.send(Outcome::DeadlineAborted).await;
                }
                Err(Attempt::Transient(reason)) => {
                    warn!(
                        worker_id,
                        participant = ?participant,
                        reason = %reason,
                        "re-queueing participant after transient error"
                    );
                    let _ = requeue.send(participant).await;
                }
            }
        }
    }

    async fn enrich_participant(
        &self,
        participant: &RawParticipant,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<User, Attempt> {
        if participant.user_id.is_empty() && participant.username.is_empty() {
            debug!(name = %participant.name, "participant has no id or username, passing through");
            return Ok(User {
                id: 0,
                name: participant.name.clone(),
                ..Default::default()
            });
        }

        if participant.username.is_empty() {
            // Id-only participants decode locally and never touch the RPC layer.
            let id = parse_user_id(&participant.user_id).map_err(Attempt::Unresolvable)?;
            return Ok(User {
                id,
                name: participant.name.clone(),
                ..Default::default()
            });
        }

        let username = participant.username.trim_start_matches('@');

        let client = self.lease_client(deadline, cancel).await?;
        let resolved = tokio::time::timeout(
            self.op_timeout(deadline),
            client.resolve_username(username),
        )
        .await;
        let peer = match resolved {
            Err(_) => {
                return Err(self.classify("resolve-username timed out".to_string(), deadline, cancel))
            }
            Ok(Err(err)) => {
                return Err(self.classify(format!("resolve-username failed: {err}"), deadline, cancel))
            }
            Ok(Ok(None)) => {
                return Err(Attempt::Unresolvable(format!(
                    "username {username:?} not found or not a user"
                )))
            }
            Ok(Ok(Some(peer))) => peer,
        };

        let Some(access_hash) = peer.access_hash else {
            return Err(self.classify(
                format!("peer {} is missing an access hash", peer.id),
                deadline,
                cancel,
            ));
        };

        let client = self.lease_client(deadline, cancel).await?;
        let profile = match tokio::time::timeout(
            self.op_timeout(deadline),
            client.get_full_user(PeerRef {
                id: peer.id,
                access_hash,
            }),
        )
        .await
        {
            Err(_) => {
                return Err(self.classify("get-full-user timed out".to_string(), deadline, cancel))
            }
            Ok(Err(err)) => {
                return Err(self.classify(format!("get-full-user failed: {err}"), deadline, cancel))
            }
            Ok(Ok(profile)) => profile,
        };

        let channel = extract_channel_from_bio(&profile.about);
        Ok(User {
            id: peer.id,
            name: peer.display_name(),
            username: peer.username.clone(),
            bio: profile.about,
            channel,
        })
    }

    /// Repeatedly asks the router for a client, pausing between attempts,
    /// until one is available or the deadline elapses.
    async fn lease_client(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<RoutedClient, Attempt> {
        loop {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                return Err(Attempt::DeadlineExceeded);
            }
            match self.router.get_client() {
                Ok(client) => {
                    debug!(client_id = client.id(), "obtained client from router");
                    return Ok(client);
                }
                Err(err) => {
                    debug!(
                        error = %err,
                        pause_seconds = self.config.client_retry_pause.as_secs(),
                        "no client available, will retry"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Attempt::DeadlineExceeded),
                        _ = tokio::time::sleep_until(deadline) => return Err(Attempt::DeadlineExceeded),
                        _ = tokio::time::sleep(self.config.client_retry_pause) => {}
                    }
                }
            }
        }
    }

    fn op_timeout(&self, deadline: Instant) -> Duration {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.config.operation_timeout.min(remaining)
    }

    fn classify(&self, reason: String, deadline: Instant, cancel: &CancellationToken) -> Attempt {
        if cancel.is_cancelled() || Instant::now() >= deadline {
            Attempt::DeadlineExceeded
        } else {
            Attempt::Transient(reason)
        }
    }
}

/// Collapses the input by `user_id`, falling back to `username`. Keyless
/// records cannot collide and pass through unchanged.
fn dedup_participants(participants: Vec<RawParticipant>) -> Vec<RawParticipant> {
    let mut seen: HashSet<String> = HashSet::with_capacity(participants.len());
    let mut unique = Vec::with_capacity(participants.len());
    for participant in participants {
        let key = if !participant.user_id.is_empty() {
            participant.user_id.clone()
        } else if !participant.username.is_empty() {
            participant.username.clone()
        } else {
            unique.push(participant);
            continue;
        };
        if seen.insert(key) {
            unique.push(participant);
        }
    }
    unique
}

/// Order-independent merge: a record with a username wins over one without;
/// `id = 0` records bypass deduplication entirely.
fn merge_user(merged: &mut HashMap<i64, User>, unidentified: &mut Vec<User>, user: User) {
    if user.id == 0 {
        unidentified.push(user);
    } else if !user.username.is_empty() {
        merged.insert(user.id, user);
    } else {
        merged.entry(user.id).or_insert(user);
    }
}

/// Strips the literal `user` prefix and decodes the remainder as a signed
/// 64-bit integer.
fn parse_user_id(raw: &str) -> Result<i64, String> {
    raw.strip_prefix("user")
        .unwrap_or(raw)
        .parse::<i64>()
        .map_err(|err| format!("invalid user id {raw:?}: {err}"))
}

fn extract_channel_from_bio(bio: &str) -> String {
    if bio.is_empty() {
        return String::new();
    }
    CHANNEL_PATTERN
        .captures(bio)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use roster_telegram::{
        FullProfile, MessengerSession, Peer, TelegramError, UpstreamClient,
    };

    use super::*;

    /// In-memory upstream: a username directory with optional per-username
    /// latency and one-shot failures.
    #[derive(Default)]
    struct DirectorySession {
        peers: HashMap<String, Peer>,
        bios: HashMap<i64, String>,
        delays: HashMap<String, Duration>,
        fail_once: Mutex<HashMap<String, String>>,
        rpc_calls: AtomicUsize,
    }

    impl DirectorySession {
        fn with_peer(mut self, username: &str, id: i64) -> Self {
            self.peers.insert(
                username.to_string(),
                Peer {
                    id,
                    access_hash: Some(id * 10),
                    first_name: format!("First{id}"),
                    last_name: String::new(),
                    username: username.to_string(),
                },
            );
            self
        }

        fn with_bio(mut self, id: i64, bio: &str) -> Self {
            self.bios.insert(id, bio.to_string());
            self
        }

        fn with_delay(mut self, username: &str, delay: Duration) -> Self {
            self.delays.insert(username.to_string(), delay);
            self
        }

        fn with_fail_once(self, username: &str, error: &str) -> Self {
            self.fail_once
                .lock()
                .insert(username.to_string(), error.to_string());
            self
        }

        fn rpc_calls(&self) -> usize {
            self.rpc_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessengerSession for DirectorySession {
        async fn ensure_ready(&self) -> Result<(), TelegramError> {
            Ok(())
        }

        async fn resolve_username(&self, username: &str) -> Result<Option<Peer>, TelegramError> {
            self.rpc_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(username) {
                tokio::time::sleep(*delay).await;
            }
            if let Some(message) = self.fail_once.lock().remove(username) {
                return Err(TelegramError::Rpc(message));
            }
            Ok(self.peers.get(username).cloned())
        }

        async fn get_users(&self, _ids: &[i64]) -> Result<Vec<Peer>, TelegramError> {
            self.rpc_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn get_full_user(&self, peer: PeerRef) -> Result<FullProfile, TelegramError> {
            self.rpc_calls.fetch_add(1, Ordering::SeqCst);
            Ok(FullProfile {
                about: self.bios.get(&peer.id).cloned().unwrap_or_default(),
            })
        }

        async fn ping(&self) -> Result<(), TelegramError> {
            Ok(())
        }
    }

    fn engine_with(
        session: Arc<DirectorySession>,
        pool_size: usize,
        total_timeout: Duration,
    ) -> (Enricher, Arc<ClientRouter>) {
        let session: Arc<dyn MessengerSession> = session;
        let client = Arc::new(UpstreamClient::new(session));
        let router = ClientRouter::new(vec![client], Duration::from_secs(1));
        let config = EnricherConfig {
            total_timeout,
            operation_timeout: Duration::from_secs(5),
            pool_size,
            client_retry_pause: Duration::from_millis(100),
        };
        (Enricher::new(router.clone(), config), router)
    }

    fn by_username(username: &str) -> RawParticipant {
        RawParticipant {
            username: username.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enriches_usernames_through_the_pool() {
        let session = Arc::new(
            DirectorySession::default()
                .with_peer("kate", 7)
                .with_bio(7, "Follow @mychannel for updates"),
        );
        let (engine, router) = engine_with(session.clone(), 2, Duration::from_secs(60));

        let report = engine.enrich(vec![by_username("@kate")], None).await;

        assert!(report.error.is_none());
        assert_eq!(report.users.len(), 1);
        let user = &report.users[0];
        assert_eq!(user.id, 7);
        assert_eq!(user.username, "kate");
        assert_eq!(user.name, "First7");
        assert_eq!(user.channel, "mychannel");
        // Resolve + full profile, the leading '@' stripped before the call.
        assert_eq!(session.rpc_calls(), 2);

        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_and_merge_precedence() {
        let session = Arc::new(
            DirectorySession::default()
                .with_peer("u1", 123)
                .with_peer("u2", 456),
        );
        let (engine, router) = engine_with(session, 2, Duration::from_secs(60));

        let participants = vec![
            RawParticipant {
                user_id: "user123".to_string(),
                username: "u1".to_string(),
                ..Default::default()
            },
            by_username("u2"),
            RawParticipant {
                user_id: "user123".to_string(),
                name: "Old".to_string(),
                ..Default::default()
            },
            RawParticipant {
                name: "Nameless".to_string(),
                ..Default::default()
            },
        ];

        let report = engine.enrich(participants, None).await;
        assert!(report.error.is_none());
        assert_eq!(report.users.len(), 3);

        let with_123 = report.users.iter().find(|u| u.id == 123).expect("id 123");
        assert_eq!(with_123.username, "u1");
        let with_456 = report.users.iter().find(|u| u.id == 456).expect("id 456");
        assert_eq!(with_456.username, "u2");
        let nameless = report.users.iter().find(|u| u.id == 0).expect("id 0");
        assert_eq!(nameless.name, "Nameless");

        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn id_only_participants_skip_the_rpc_layer() {
        let session = Arc::new(DirectorySession::default());
        let (engine, router) = engine_with(session.clone(), 1, Duration::from_secs(60));

        let participants = vec![
            RawParticipant {
                user_id: "user42".to_string(),
                name: "Bob".to_string(),
                ..Default::default()
            },
            RawParticipant {
                name: "Nameless".to_string(),
                ..Default::default()
            },
        ];

        let report = engine.enrich(participants, None).await;
        assert!(report.error.is_none());
        assert_eq!(report.users.len(), 2);
        assert!(report.users.iter().any(|u| u.id == 42 && u.name == "Bob"));
        assert!(report.users.iter().any(|u| u.id == 0 && u.name == "Nameless"));
        assert_eq!(session.rpc_calls(), 0);

        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_ids_are_terminal_not_retried() {
        let session = Arc::new(DirectorySession::default());
        let (engine, router) = engine_with(session.clone(), 1, Duration::from_secs(60));

        let report = engine
            .enrich(
                vec![RawParticipant {
                    user_id: "userXYZ".to_string(),
                    name: "Bad".to_string(),
                    ..Default::default()
                }],
                None,
            )
            .await;

        assert!(report.error.is_none());
        assert!(report.users.is_empty());
        assert_eq!(session.rpc_calls(), 0);

        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_username_counts_as_completed_without_result() {
        let session = Arc::new(DirectorySession::default());
        let (engine, router) = engine_with(session, 1, Duration::from_secs(60));

        let report = engine.enrich(vec![by_username("ghost")], None).await;
        assert!(report.error.is_none());
        assert!(report.users.is_empty());

        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_requeue_until_success() {
        let session = Arc::new(
            DirectorySession::default()
                .with_peer("kate", 7)
                .with_fail_once("kate", "INTERNAL (0)"),
        );
        let (engine, router) = engine_with(session, 1, Duration::from_secs(60));

        let report = engine.enrich(vec![by_username("kate")], None).await;
        assert!(report.error.is_none(), "error: {:?}", report.error);
        assert_eq!(report.users.len(), 1);
        assert_eq!(report.users[0].id, 7);

        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cool_down_errors_are_retried_after_recovery() {
        let session = Arc::new(
            DirectorySession::default()
                .with_peer("kate", 7)
                .with_fail_once("kate", "FLOOD_WAIT (2)"),
        );
        let (engine, router) = engine_with(session, 1, Duration::from_secs(60));

        let report = engine.enrich(vec![by_username("kate")], None).await;
        assert!(report.error.is_none(), "error: {:?}", report.error);
        assert_eq!(report.users.len(), 1);

        router.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_returns_partial_results() {
        let session = Arc::new(
            DirectorySession::default()
                .with_peer("fast", 1)
                .with_peer("slow", 2)
                .with_delay("slow", Duration::from_millis(150)),
        );
        let (engine, router) = engine_with(session, 2, Duration::from_secs(60));

        let report = engine
            .enrich(
                vec![by_username("fast"), by_username("slow")],
                Some(Duration::from_millis(50)),
            )
            .await;

        assert!(matches!(
            report.error,
            Some(EnrichmentError::DeadlineExceeded)
        ));
        assert_eq!(report.users.len(), 1);
        assert_eq!(report.users[0].id, 1);

        router.stop().await;
    }

    #[test]
    fn channel_extraction_matches_contract() {
        assert_eq!(
            extract_channel_from_bio("Follow @channel1 and @channel2"),
            "channel1"
        );
        assert_eq!(extract_channel_from_bio("t.me/start"), "start");
        // Five characters is the minimum for the captured tail, so a
        // five-character handle still matches while a four-character one
        // does not.
        assert_eq!(extract_channel_from_bio("@short"), "short");
        assert_eq!(extract_channel_from_bio("@tiny"), "");
        assert_eq!(extract_channel_from_bio(""), "");
    }

    #[test]
    fn user_id_parsing_strips_the_prefix() {
        assert_eq!(parse_user_id("user123").unwrap(), 123);
        assert_eq!(parse_user_id("user-5").unwrap(), -5);
        assert!(parse_user_id("userabc").is_err());
        assert!(parse_user_id("channel42").is_err());
    }
}
