//! Health-ranked set of RPC endpoints.
//!
//! Every counter is its own atomic, so concurrent calls can report results
//! without a lock. A reader may see one field updated before another, which
//! at worst makes one selection slightly stale.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{config::NodesConfig, RpcError};

/// One node URL and what we have learned about it.
#[derive(Debug)]
pub struct NodeEndpoint {
    url: String,
    /// Milliseconds; 0 until the first success
    latency_ms: AtomicU64,
    consecutive_failures: AtomicU32,
    /// Unix milliseconds; 0 means never
    last_success: AtomicU64,
    last_failure: AtomicU64,
}

impl NodeEndpoint {
    fn new(url: String) -> Self {
        Self {
            url,
            latency_ms: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_success: AtomicU64::new(0),
            last_failure: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Latency of the last successful call, if there has been one.
    pub fn last_latency(&self) -> Option<Duration> {
        match self.last_success.load(Ordering::Relaxed) {
            0 => None,
            _ => Some(Duration::from_millis(self.latency_ms.load(Ordering::Relaxed))),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Unix milliseconds of the last success.
    pub fn last_success_ms(&self) -> Option<u64> {
        match self.last_success.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    fn last_failure_ms(&self) -> u64 {
        self.last_failure.load(Ordering::Relaxed)
    }

    fn rank(&self) -> (u32, u64) {
        (self.consecutive_failures(), self.latency_ms.load(Ordering::Relaxed))
    }
}

/// Lowest rank; ties keep configuration order.
fn best<'a>(candidates: impl Iterator<Item = &'a Arc<NodeEndpoint>>) -> Option<Arc<NodeEndpoint>> {
    candidates.min_by_key(|endpoint| endpoint.rank()).cloned()
}

fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// The configured nodes, ranked by (consecutive failures, latency).
///
/// Failing nodes are demoted rather than removed: once a node reaches the
/// failure threshold it is skipped while healthier nodes exist, and offered
/// again as a probe when everything is degraded and its cool-down has passed.
#[derive(Debug)]
pub struct NodePool {
    endpoints: Vec<Arc<NodeEndpoint>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl NodePool {
    pub fn new(urls: impl IntoIterator<Item = impl Into<String>>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            endpoints: urls
                .into_iter()
                .map(|url| Arc::new(NodeEndpoint::new(url.into())))
                .collect(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn from_config(config: &NodesConfig) -> Self {
        Self::new(
            config.urls.iter().cloned(),
            config.failure_threshold,
            Duration::from_secs(config.cooldown_secs),
        )
    }

    pub fn endpoints(&self) -> &[Arc<NodeEndpoint>] {
        &self.endpoints
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    fn is_healthy(&self, endpoint: &NodeEndpoint) -> bool {
        endpoint.consecutive_failures() < self.failure_threshold
    }

    fn is_cooled_down(&self, endpoint: &NodeEndpoint, now: u64) -> bool {
        let cooldown = u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX);
        now.saturating_sub(endpoint.last_failure_ms()) >= cooldown
    }

    /// The best endpoint, or [`RpcError::NoHealthyNodes`].
    pub fn select(&self) -> Result<Arc<NodeEndpoint>, RpcError> {
        self.select_excluding(&HashSet::new())
    }

    /// The best endpoint, preferring ones whose URL is not in `tried`.
    ///
    /// A healthy endpoint always wins over a demoted one, even if the healthy
    /// one was already tried during this call.
    pub fn select_excluding(&self, tried: &HashSet<String>) -> Result<Arc<NodeEndpoint>, RpcError> {
        let untried = |endpoint: &&Arc<NodeEndpoint>| !tried.contains(endpoint.url());

        let healthy: Vec<_> = self.endpoints.iter().filter(|e| self.is_healthy(e)).collect();
        if let Some(endpoint) = best(healthy.iter().copied().filter(untried)).or_else(|| best(healthy.iter().copied())) {
            return Ok(endpoint);
        }

        let now = now_ms();
        let cooled: Vec<_> = self
            .endpoints
            .iter()
            .filter(|e| self.is_cooled_down(e, now))
            .collect();
        match best(cooled.iter().copied().filter(untried)).or_else(|| best(cooled.iter().copied())) {
            Some(endpoint) => {
                debug!("All nodes degraded, probing {}", endpoint.url());
                Ok(endpoint)
            }
            None => Err(RpcError::NoHealthyNodes),
        }
    }

    pub fn report_success(&self, endpoint: &NodeEndpoint, latency: Duration) {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX).max(1);
        endpoint.latency_ms.store(latency_ms, Ordering::Relaxed);
        endpoint.consecutive_failures.store(0, Ordering::Relaxed);
        endpoint.last_success.store(now_ms().max(1), Ordering::Relaxed);
    }

    pub fn report_failure(&self, endpoint: &NodeEndpoint) {
        endpoint.last_failure.store(now_ms(), Ordering::Relaxed);
        let failures = endpoint.consecutive_failures.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        if failures == self.failure_threshold {
            warn!("Node {} demoted after {} consecutive failures", endpoint.url(), failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(cooldown: Duration) -> NodePool {
        NodePool::new(["wss://a", "wss://b", "wss://c"], 2, cooldown)
    }

    fn by_url<'a>(pool: &'a NodePool, url: &str) -> &'a NodeEndpoint {
        pool.endpoints().iter().find(|e| e.url() == url).unwrap()
    }

    #[test]
    fn test_untried_nodes_keep_config_order() {
        let pool = pool(Duration::from_secs(60));
        assert_eq!(pool.select().unwrap().url(), "wss://a");
    }

    #[test]
    fn test_lowest_latency_wins() {
        let pool = pool(Duration::from_secs(60));
        pool.report_success(by_url(&pool, "wss://a"), Duration::from_millis(90));
        pool.report_success(by_url(&pool, "wss://b"), Duration::from_millis(20));
        pool.report_success(by_url(&pool, "wss://c"), Duration::from_millis(50));
        assert_eq!(pool.select().unwrap().url(), "wss://b");
    }

    #[test]
    fn test_failures_outrank_latency() {
        let pool = pool(Duration::from_secs(60));
        pool.report_success(by_url(&pool, "wss://a"), Duration::from_millis(5));
        pool.report_success(by_url(&pool, "wss://b"), Duration::from_millis(500));
        pool.report_failure(by_url(&pool, "wss://a"));
        pool.report_failure(by_url(&pool, "wss://c"));
        assert_eq!(pool.select().unwrap().url(), "wss://b");
    }

    #[test]
    fn test_success_resets_failures() {
        let pool = pool(Duration::from_secs(60));
        let a = by_url(&pool, "wss://a");
        pool.report_failure(a);
        pool.report_failure(a);
        assert_eq!(a.consecutive_failures(), 2);
        pool.report_success(a, Duration::from_millis(10));
        assert_eq!(a.consecutive_failures(), 0);
        assert_eq!(a.last_latency(), Some(Duration::from_millis(10)));
        assert!(a.last_success_ms().is_some());
    }

    #[test]
    fn test_never_selects_demoted_while_healthy_exists() {
        let pool = pool(Duration::ZERO);
        for url in ["wss://a", "wss://b"] {
            pool.report_failure(by_url(&pool, url));
            pool.report_failure(by_url(&pool, url));
        }
        // c is slow and already tried, but it is the only healthy node.
        pool.report_success(by_url(&pool, "wss://c"), Duration::from_secs(5));
        let tried: HashSet<String> = ["wss://c".to_string()].into();
        for _ in 0..10 {
            assert_eq!(pool.select_excluding(&tried).unwrap().url(), "wss://c");
        }
    }

    #[test]
    fn test_excluding_tried_nodes() {
        let pool = pool(Duration::from_secs(60));
        let mut tried = HashSet::new();
        let mut order = Vec::new();
        for _ in 0..3 {
            let endpoint = pool.select_excluding(&tried).unwrap();
            tried.insert(endpoint.url().to_string());
            order.push(endpoint.url().to_string());
        }
        assert_eq!(order, ["wss://a", "wss://b", "wss://c"]);
        // Everything tried: fall back to the best healthy node.
        assert_eq!(pool.select_excluding(&tried).unwrap().url(), "wss://a");
    }

    #[test]
    fn test_no_healthy_nodes_until_cooldown() {
        let pool = pool(Duration::from_secs(3600));
        for endpoint in pool.endpoints() {
            pool.report_failure(endpoint);
            pool.report_failure(endpoint);
        }
        assert!(matches!(pool.select(), Err(RpcError::NoHealthyNodes)));

        let cooled = NodePool::new(["wss://a", "wss://b"], 1, Duration::ZERO);
        cooled.report_failure(&cooled.endpoints()[0]);
        cooled.report_failure(&cooled.endpoints()[1]);
        cooled.report_failure(&cooled.endpoints()[1]);
        // Both demoted; the probe goes to the one with fewer failures.
        assert_eq!(cooled.select().unwrap().url(), "wss://a");
    }

    #[test]
    fn test_empty_pool() {
        let pool = NodePool::new(Vec::<String>::new(), 3, Duration::ZERO);
        assert!(matches!(pool.select(), Err(RpcError::NoHealthyNodes)));
    }
}
