use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::UpstreamClient;
use crate::error::TelegramError;
use crate::strategy::{RoundRobinStrategy, SelectionStrategy};
use crate::transport::{FullProfile, Peer, PeerRef};

struct Pools {
    healthy: HashMap<String, Arc<UpstreamClient>>,
    unhealthy: HashMap<String, Arc<UpstreamClient>>,
    /// Clients with an armed proactive-recovery timer. The flag is set before
    /// the timer is armed and cleared inside the timer body, both under the
    /// pool lock.
    scheduled_recovery: HashSet<String>,
}

/// Owns the upstream clients, partitions them by health, and hands out
/// error-capturing leases. A background sweep re-probes unhealthy clients;
/// cool-down errors additionally arm a one-shot wake-up timer per client.
pub struct ClientRouter {
    pools: RwLock<Pools>,
    strategy: RwLock<Arc<dyn SelectionStrategy>>,
    health_check_interval: Duration,
    shutdown: CancellationToken,
    sweep: Mutex<Option<JoinHandle<()>>>,
    /// Handed to leases and timers so detached work cannot outlive the router.
    weak_self: Weak<ClientRouter>,
}

impl ClientRouter {
    pub fn new(clients: Vec<Arc<UpstreamClient>>, health_check_interval: Duration) -> Arc<Self> {
        Self::with_strategy(
            clients,
            health_check_interval,
            Arc::new(RoundRobinStrategy::new()),
        )
    }

    pub fn with_strategy(
        clients: Vec<Arc<UpstreamClient>>,
        health_check_interval: Duration,
        strategy: Arc<dyn SelectionStrategy>,
    ) -> Arc<Self> {
        let healthy = clients
            .into_iter()
            .map(|client| (client.id().to_string(), client))
            .collect();

        let router = Arc::new_cyclic(|weak| Self {
            pools: RwLock::new(Pools {
                healthy,
                unhealthy: HashMap::new(),
                scheduled_recovery: HashSet::new(),
            }),
            strategy: RwLock::new(strategy),
            health_check_interval,
            shutdown: CancellationToken::new(),
            sweep: Mutex::new(None),
            weak_self: weak.clone(),
        });

        let handle = Self::spawn_health_loop(&router);
        *router.sweep.lock() = Some(handle);
        router
    }

    /// Fires the startup probe on every client. Clients whose session turns
    /// out to be invalid land in the unhealthy pool and stay there until the
    /// session is repaired.
    pub fn warm_up(&self) {
        let clients: Vec<_> = self.pools.read().healthy.values().cloned().collect();
        for client in clients {
            let router = self.weak_self.clone();
            tokio::spawn(async move {
                match client.start().await {
                    Ok(()) => {
                        info!(client_id = client.id(), "upstream client authenticated and ready")
                    }
                    Err(err) => {
                        warn!(
                            client_id = client.id(),
                            error = %err,
                            "upstream client failed its startup probe"
                        );
                        if let Some(router) = router.upgrade() {
                            router.handle_client_error(client, err.to_string());
                        }
                    }
                }
            });
        }
    }

    /// Selects a healthy client via the current strategy and wraps it so RPC
    /// failures feed back into the health state.
    pub fn get_client(&self) -> Result<RoutedClient, TelegramError> {
        let (snapshot, strategy) = {
            let pools = self.pools.read();
            let snapshot: Vec<_> = pools.healthy.values().cloned().collect();
            (snapshot, self.strategy.read().clone())
        };

        let client = strategy.next(&snapshot)?;
        debug!(client_id = client.id(), "client selected by strategy");
        Ok(RoutedClient {
            client,
            router: self.weak_self.clone(),
        })
    }

    /// Replaces the selection policy on a live router.
    pub fn set_strategy(&self, strategy: Arc<dyn SelectionStrategy>) {
        *self.strategy.write() = strategy;
        info!("router strategy updated");
    }

    /// Earliest instant at which an unhealthy client expects to accept
    /// requests again; `None` when nothing is pending recovery.
    pub fn next_recovery_time(&self) -> Option<Instant> {
        self.pools
            .read()
            .unhealthy
            .values()
            .filter_map(|client| client.recovery_time())
            .min()
    }

    pub fn healthy_count(&self) -> usize {
        self.pools.read().healthy.len()
    }

    pub fn unhealthy_count(&self) -> usize {
        self.pools.read().unhealthy.len()
    }

    pub fn is_healthy(&self, client_id: &str) -> bool {
        self.pools.read().healthy.contains_key(client_id)
    }

    /// Stops the health sweep and waits for it to exit.
    pub async fn stop(&self) {
        info!("stopping router");
        self.shutdown.cancel();
        let handle = { self.sweep.lock().take() };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("router stopped");
    }

    fn spawn_health_loop(router: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(router);
        let shutdown = router.shutdown.clone();
        let interval = router.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; consume it so the sweep
            // runs on the configured cadence.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("health check loop stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                let Some(router) = weak.upgrade() else { return };
                router.check_unhealthy_clients().await;
            }
        })
    }

    async fn check_unhealthy_clients(&self) {
        let candidates: Vec<_> = self.pools.read().unhealthy.values().cloned().collect();
        if candidates.is_empty() {
            return;
        }

        debug!(count = candidates.len(), "probing unhealthy clients");
        for client in candidates {
            match client.health().await {
                Ok(()) => {
                    info!(client_id = client.id(), "client recovered during periodic sweep");
                    self.set_client_healthy(client.id());
                }
                Err(err) => {
                    debug!(client_id = client.id(), reason = %err, "client remains unhealthy")
                }
            }
        }
    }

    /// Invoked (fire-and-forget) whenever a leased client returns an error:
    /// quarantines the client and, when it reported a recovery instant in
    /// the future, arms at most one wake-up timer for it.
    fn handle_client_error(&self, client: Arc<UpstreamClient>, error: String) {
        warn!(client_id = client.id(), error = %error, "client returned an error");
        self.set_client_unhealthy(&client);

        let Some(recovery) = client.recovery_time() else {
            return;
        };
        let now = Instant::now();
        if recovery <= now {
            return;
        }

        {
            let mut pools = self.pools.write();
            if !pools.unhealthy.contains_key(client.id()) {
                return;
            }
            if !pools.scheduled_recovery.insert(client.id().to_string()) {
                debug!(
                    client_id = client.id(),
                    "proactive recovery already scheduled"
                );
                return;
            }
        }

        let delay = recovery - now;
        info!(
            client_id = client.id(),
            delay_seconds = delay.as_secs(),
            "scheduling proactive recovery"
        );

        let router = self.weak_self.clone();
        let shutdown = self.shutdown.clone();
        let client_id = client.id().to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep_until(recovery) => {}
            }
            if let Some(router) = router.upgrade() {
                router.check_and_recover(&client_id).await;
            }
        });
    }

    /// Timer and sweep entry point: clears the scheduled flag, re-probes the
    /// client, and promotes it on success.
    async fn check_and_recover(&self, client_id: &str) {
        let client = {
            let mut pools = self.pools.write();
            pools.scheduled_recovery.remove(client_id);
            pools.unhealthy.get(client_id).cloned()
        };
        let Some(client) = client else {
            debug!(client_id, "client to recover no longer in unhealthy pool");
            return;
        };

        match client.health().await {
            Ok(()) => {
                info!(client_id, "client recovered, moving back to healthy pool");
                self.set_client_healthy(client_id);
            }
            Err(err) => {
                warn!(client_id, reason = %err, "recovery check failed, client remains unhealthy")
            }
        }
    }

    fn set_client_unhealthy(&self, client: &Arc<UpstreamClient>) {
        let mut pools = self.pools.write();
        if pools.healthy.remove(client.id()).is_none() {
            return;
        }
        pools
            .unhealthy
            .insert(client.id().to_string(), client.clone());
        warn!(
            client_id = client.id(),
            healthy_count = pools.healthy.len(),
            unhealthy_count = pools.unhealthy.len(),
            "client moved to unhealthy pool"
        );
    }

    fn set_client_healthy(&self, client_id: &str) {
        let mut pools = self.pools.write();
        let Some(client) = pools.unhealthy.remove(client_id) else {
            return;
        };
        pools.healthy.insert(client_id.to_string(), client);
        info!(
            client_id,
            healthy_count = pools.healthy.len(),
            unhealthy_count = pools.unhealthy.len(),
            "client moved back to healthy pool"
        );
    }
}

/// Error-capturing lease around a selected client. Forwards every RPC
/// unchanged; any failure is reported to the router asynchronously so slow
/// recovery bookkeeping never inflates call latency.
pub struct RoutedClient {
    client: Arc<UpstreamClient>,
    router: Weak<ClientRouter>,
}

impl RoutedClient {
    pub fn id(&self) -> &str {
        self.client.id()
    }

    pub async fn resolve_username(&self, username: &str) -> Result<Option<Peer>, TelegramError> {
        let result = self.client.resolve_username(username).await;
        self.report(&result);
        result
    }

    pub async fn get_users(&self, ids: &[i64]) -> Result<Vec<Peer>, TelegramError> {
        let result = self.client.get_users(ids).await;
        self.report(&result);
        result
    }

    pub async fn get_full_user(&self, peer: PeerRef) -> Result<FullProfile, TelegramError> {
        let result = self.client.get_full_user(peer).await;
        self.report(&result);
        result
    }

    fn report<T>(&self, result: &Result<T, TelegramError>) {
        let Err(err) = result else { return };
        let Some(router) = self.router.upgrade() else {
            return;
        };
        let client = self.client.clone();
        let message = err.to_string();
        tokio::spawn(async move {
            router.handle_client_error(client, message);
        });
    }
}
