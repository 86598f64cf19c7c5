//! Minted token cache
//!
//! Bounds the rate of TokenRequest calls against the management cluster
//! when the same workload identity is checked repeatedly (e.g. a polling
//! agent). Keyed by the workload service account UID: UIDs change when a
//! service account is deleted and recreated, which is exactly when prior
//! minted tokens should stop being served.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Default sweep interval for the background expiry sweeper
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// A cached management cluster token with its authoritative expiry
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The minted JWT
    pub token: String,
    /// Expiration reported by the TokenRequest API at mint time
    pub expires_at: SystemTime,
}

/// Concurrency-safe TTL cache of minted tokens, keyed by workload UID
///
/// A background sweeper removes expired entries on an interval so memory
/// stays bounded; expired entries are never returned by [`get`] whether
/// or not the sweeper has reached them yet. [`stop`] halts the sweeper;
/// the cache itself stays usable afterwards.
///
/// Must be created from within a Tokio runtime.
///
/// [`get`]: TokenCache::get
/// [`stop`]: TokenCache::stop
#[derive(Debug)]
pub struct TokenCache {
    entries: Arc<RwLock<HashMap<String, CachedToken>>>,
    stop_tx: watch::Sender<bool>,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    /// Create a cache with the production sweep interval (5 minutes)
    pub fn new() -> Self {
        Self::with_sweep_interval(SWEEP_INTERVAL)
    }

    /// Create a cache with a custom sweep interval
    pub fn with_sweep_interval(period: Duration) -> Self {
        let entries: Arc<RwLock<HashMap<String, CachedToken>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let sweep_entries = entries.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep_expired(&sweep_entries),
                    _ = stop_rx.changed() => return,
                }
            }
        });

        Self { entries, stop_tx }
    }

    /// Get a cached token by workload service account UID
    ///
    /// Returns `None` if no entry exists or the entry has expired.
    pub fn get(&self, uid: &str) -> Option<CachedToken> {
        let entries = self.entries.read();
        let entry = entries.get(uid)?;
        if entry.expires_at <= SystemTime::now() {
            return None;
        }
        Some(entry.clone())
    }

    /// Insert or replace the token for a workload service account UID
    pub fn set(&self, uid: impl Into<String>, token: impl Into<String>, expires_at: SystemTime) {
        self.entries.write().insert(
            uid.into(),
            CachedToken {
                token: token.into(),
                expires_at,
            },
        );
    }

    /// Halt the background sweeper
    ///
    /// Idempotent; `get` and `set` remain safe after stopping.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Remove every entry whose expiry has passed
fn sweep_expired(entries: &RwLock<HashMap<String, CachedToken>>) {
    let now = SystemTime::now();
    let mut entries = entries.write();
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    let removed = before - entries.len();
    if removed > 0 {
        debug!(removed, remaining = entries.len(), "Swept expired tokens");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_one_hour() -> SystemTime {
        SystemTime::now() + Duration::from_secs(3600)
    }

    fn one_hour_ago() -> SystemTime {
        SystemTime::now() - Duration::from_secs(3600)
    }

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let cache = TokenCache::new();

        let uid = "72b0e9c5-c44a-4de0-ae59-9b400f1221e0";
        assert!(cache.get(uid).is_none());

        cache.set(uid, "test-token", in_one_hour());
        let entry = cache.get(uid).expect("entry present");
        assert_eq!(entry.token, "test-token");

        cache.stop();
    }

    #[tokio::test]
    async fn test_expired_entry_not_returned() {
        let cache = TokenCache::new();

        cache.set("uid-1", "token-1", one_hour_ago());
        assert!(cache.get("uid-1").is_none());

        // Expiry exactly now is also expired.
        cache.set("uid-2", "token-2", SystemTime::now());
        assert!(cache.get("uid-2").is_none());

        cache.stop();
    }

    #[tokio::test]
    async fn test_set_replaces_by_key() {
        let cache = TokenCache::new();

        cache.set("uid-1", "token-1", in_one_hour());
        cache.set("uid-1", "token-2", in_one_hour());

        assert_eq!(cache.get("uid-1").unwrap().token, "token-2");
        assert_eq!(cache.len(), 1);

        cache.stop();
    }

    #[tokio::test]
    async fn test_entries_are_per_uid() {
        let cache = TokenCache::new();

        cache.set("uid-1", "token-1", in_one_hour());
        cache.set("uid-2", "token-2", in_one_hour());
        cache.set("uid-3", "token-3", in_one_hour());

        assert_eq!(cache.get("uid-1").unwrap().token, "token-1");
        assert_eq!(cache.get("uid-2").unwrap().token, "token-2");
        assert_eq!(cache.get("uid-3").unwrap().token, "token-3");
        assert!(cache.get("uid-4").is_none());

        cache.stop();
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let cache = TokenCache::new();

        cache.set("uid-1", "token-1", one_hour_ago());
        cache.set("uid-2", "token-2", in_one_hour());
        cache.set("uid-3", "token-3", SystemTime::now() - Duration::from_secs(1800));
        assert_eq!(cache.len(), 3);

        sweep_expired(&cache.entries);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("uid-2").unwrap().token, "token-2");

        cache.stop();
    }

    #[tokio::test]
    async fn test_background_sweeper_runs() {
        let cache = TokenCache::with_sweep_interval(Duration::from_millis(50));

        cache.set("expired-uid", "expired-token", one_hour_ago());
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;

        // The entry itself is gone, not just filtered by get().
        assert_eq!(cache.len(), 0);

        cache.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let cache = TokenCache::new();
        cache.set("uid-1", "token-1", in_one_hour());

        cache.stop();
        cache.stop();

        // Still readable and writable after stop.
        assert_eq!(cache.get("uid-1").unwrap().token, "token-1");
        cache.set("uid-2", "token-2", in_one_hour());
        assert_eq!(cache.get("uid-2").unwrap().token, "token-2");
    }

    #[tokio::test]
    async fn test_concurrent_get_set() {
        let cache = Arc::new(TokenCache::new());
        let expires_at = in_one_hour();

        let mut handles = Vec::new();
        for i in 0..50 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set(format!("uid-{i}"), format!("token-{i}"), expires_at);
                let _ = cache.get(&format!("uid-{}", i / 2));
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        assert_eq!(cache.len(), 50);
        cache.stop();
    }
}
