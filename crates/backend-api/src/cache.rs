use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use roster_domain::User;

struct CacheEntry {
    users: Vec<User>,
    expires_at: Instant,
}

/// Content-addressed result cache: bundle fingerprint → enriched user list,
/// with TTL eviction by a periodic sweep.
#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached list only when the entry exists and has not
    /// expired yet.
    pub fn get(&self, key: &str) -> Option<Vec<User>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.users.clone())
    }

    pub fn put(&self, key: &str, users: Vec<User>, ttl: Duration) {
        let mut entries = self.entries.write();
        entries.insert(
            key.to_string(),
            CacheEntry {
                users,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "evicted expired cache entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Runs the eviction sweep on `interval` until `shutdown` fires or the
    /// cache is dropped.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("cache cleanup loop stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                let Some(cache) = cache.upgrade() else { return };
                cache.cleanup_expired();
            }
        })
    }
}

/// Lowercase-hex SHA-256 of one document's bytes.
pub fn document_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Fingerprint of a multi-document submission: the per-document digests are
/// concatenated in submission order and hashed again, so the same bundle in
/// the same order always maps to the same cache key.
pub fn bundle_fingerprint(digests: &[String]) -> String {
    let mut hasher = Sha256::new();
    for digest in digests {
        hasher.update(digest.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> User {
        User {
            id,
            name: format!("user-{id}"),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_entries_before_expiry_only() {
        let cache = ResultCache::new();
        cache.put("key", vec![user(1)], Duration::from_secs(60));

        assert_eq!(cache.get("key").unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("key").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_existing_entries() {
        let cache = ResultCache::new();
        cache.put("key", vec![user(1)], Duration::from_secs(60));
        cache.put("key", vec![user(2), user(3)], Duration::from_secs(60));

        assert_eq!(cache.get("key").unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_expired_entries() {
        let cache = ResultCache::new();
        cache.put("old", vec![user(1)], Duration::from_secs(10));
        cache.put("fresh", vec![user(2)], Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.cleanup_expired();

        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_loop_honors_shutdown() {
        let cache = Arc::new(ResultCache::new());
        let shutdown = CancellationToken::new();
        let handle = cache.spawn_cleanup(Duration::from_secs(1), shutdown.clone());

        cache.put("key", vec![user(1)], Duration::from_millis(500));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.is_empty());

        shutdown.cancel();
        handle.await.expect("cleanup loop exits");
    }

    #[test]
    fn fingerprints_are_stable_and_order_sensitive() {
        let a = document_digest(b"alpha");
        let b = document_digest(b"beta");

        assert_eq!(a, document_digest(b"alpha"));
        assert_ne!(a, b);

        let ab = bundle_fingerprint(&[a.clone(), b.clone()]);
        let ba = bundle_fingerprint(&[b, a]);
        assert_ne!(ab, ba);
        assert_eq!(ab.len(), 64);
    }
}
