use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::client::UpstreamClient;
use crate::error::TelegramError;

/// Picks one client out of a snapshot of the healthy pool. Implementations
/// must be safe for concurrent invocation; callers never mutate the snapshot
/// they pass in.
pub trait SelectionStrategy: Send + Sync {
    fn next(&self, clients: &[Arc<UpstreamClient>]) -> Result<Arc<UpstreamClient>, TelegramError>;
}

/// Cycles through the snapshot with an atomic cursor.
#[derive(Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobinStrategy {
    fn next(&self, clients: &[Arc<UpstreamClient>]) -> Result<Arc<UpstreamClient>, TelegramError> {
        if clients.is_empty() {
            return Err(TelegramError::NoHealthyClients);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(clients[index % clients.len()].clone())
    }
}
