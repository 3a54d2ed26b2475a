use std::collections::HashSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use ipnet::IpNet;
use tokio::sync::RwLock;

/// Which slice of the blocklist a rule belongs to. A rule carries
/// exactly one matcher, so every rule maps to exactly one kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RuleKind {
    Ip,
    Network,
    Agent,
}

struct Slice<T> {
    values: T,
    loaded_at: Instant,
}

/// In-memory cache of the three blocklist slices, each held for at
/// most `ttl` after loading. Slices are independent: invalidating one
/// leaves the other two warm.
pub struct BlocklistCache {
    ttl: Duration,
    ips: RwLock<Option<Slice<HashSet<IpAddr>>>>,
    networks: RwLock<Option<Slice<Vec<IpNet>>>>,
    agents: RwLock<Option<Slice<Vec<String>>>>,
}

impl BlocklistCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ips: RwLock::new(None),
            networks: RwLock::new(None),
            agents: RwLock::new(None),
        }
    }

    /// Returns the cached IP slice, or None if it was never loaded,
    /// expired, or was invalidated.
    pub async fn ips(&self) -> Option<HashSet<IpAddr>> {
        Self::get(&self.ips, self.ttl).await
    }

    pub async fn networks(&self) -> Option<Vec<IpNet>> {
        Self::get(&self.networks, self.ttl).await
    }

    pub async fn agents(&self) -> Option<Vec<String>> {
        Self::get(&self.agents, self.ttl).await
    }

    pub async fn set_ips(&self, values: HashSet<IpAddr>) {
        Self::put(&self.ips, values).await;
    }

    pub async fn set_networks(&self, values: Vec<IpNet>) {
        Self::put(&self.networks, values).await;
    }

    pub async fn set_agents(&self, values: Vec<String>) {
        Self::put(&self.agents, values).await;
    }

    /// Drop one slice so the next lookup rebuilds it from the store.
    pub async fn invalidate(&self, kind: RuleKind) {
        match kind {
            RuleKind::Ip => *self.ips.write().await = None,
            RuleKind::Network => *self.networks.write().await = None,
            RuleKind::Agent => *self.agents.write().await = None,
        }
    }

    async fn get<T: Clone>(slot: &RwLock<Option<Slice<T>>>, ttl: Duration) -> Option<T> {
        let slot = slot.read().await;
        match &*slot {
            Some(slice) if slice.loaded_at.elapsed() < ttl => Some(slice.values.clone()),
            _ => None,
        }
    }

    async fn put<T>(slot: &RwLock<Option<Slice<T>>>, values: T) {
        *slot.write().await = Some(Slice {
            values,
            loaded_at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_empty_cache_returns_none() {
        let cache = BlocklistCache::new(Duration::from_secs(60));
        assert!(cache.ips().await.is_none());
        assert!(cache.networks().await.is_none());
        assert!(cache.agents().await.is_none());
    }

    #[tokio::test]
    async fn test_slice_served_within_ttl() {
        let cache = BlocklistCache::new(Duration::from_secs(60));
        cache.set_ips(HashSet::from([ip("203.0.113.5")])).await;

        let first = cache.ips().await.unwrap();
        let second = cache.ips().await.unwrap();
        assert_eq!(first, second);
        assert!(first.contains(&ip("203.0.113.5")));
    }

    #[tokio::test]
    async fn test_slice_expires_after_ttl() {
        let cache = BlocklistCache::new(Duration::from_millis(10));
        cache.set_ips(HashSet::from([ip("203.0.113.5")])).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.ips().await.is_none());
    }

    #[tokio::test]
    async fn test_invalidation_is_selective() {
        let cache = BlocklistCache::new(Duration::from_secs(60));
        cache.set_ips(HashSet::from([ip("203.0.113.5")])).await;
        cache
            .set_networks(vec!["198.51.100.0/24".parse().unwrap()])
            .await;
        cache.set_agents(vec!["badbot".to_string()]).await;

        cache.invalidate(RuleKind::Ip).await;

        assert!(cache.ips().await.is_none());
        assert!(cache.networks().await.is_some());
        assert!(cache.agents().await.is_some());
    }
}
