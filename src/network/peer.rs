//! Known peer set and discovery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.trim_end_matches('/').to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s.trim_end_matches('/').to_string())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct PeerRecord {
    pub url: String,
    pub consecutive_failures: AtomicU32,
    pub last_seen_healthy: parking_lot::Mutex<Option<Instant>>,
    pub first_observed: Instant,
}

impl PeerRecord {
    fn new(url: String) -> Self {
        PeerRecord {
            url,
            consecutive_failures: AtomicU32::new(0),
            last_seen_healthy: parking_lot::Mutex::new(None),
            first_observed: Instant::now(),
        }
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }
}

/// The node's view of the rest of the network: reachable peer URLs, health
/// bookkeeping, and the bounded-concurrency discovery walk.
pub struct PeerSet {
    peers: DashMap<PeerId, PeerRecord>,
    self_url: String,
    max_peers: usize,
}

/// `true` if `url` points at this host under any of the usual
/// loopback spellings, so a node never adds itself to its own peer
/// table under a different name than its configured public URL.
fn is_loopback(url: &str) -> bool {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .rsplit_once(':')
        .map(|(host, _port)| host)
        .unwrap_or(without_scheme);
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
}

impl PeerSet {
    pub fn new(self_url: impl Into<String>, max_peers: usize) -> Self {
        PeerSet {
            peers: DashMap::new(),
            self_url: self_url.into(),
            max_peers,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn urls(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.url.clone()).collect()
    }

    /// Adds `url` unless it is our own address, a loopback/localhost URL,
    /// already known, or the set is already at `max_peers`.
    pub fn add(&self, url: impl Into<String>) -> bool {
        let url = url.into();
        let normalized: PeerId = url.clone().into();
        let self_id: PeerId = self.self_url.clone().into();
        if normalized == self_id {
            return false;
        }
        if is_loopback(&url) {
            return false;
        }
        if self.peers.contains_key(&normalized) {
            return false;
        }
        if self.peers.len() >= self.max_peers {
            return false;
        }
        self.peers.insert(normalized, PeerRecord::new(url));
        true
    }

    pub fn remove(&self, url: &str) {
        let id: PeerId = url.into();
        self.peers.remove(&id);
    }

    pub fn mark_healthy(&self, url: &str) {
        let id: PeerId = url.into();
        if let Some(record) = self.peers.get(&id) {
            record.consecutive_failures.store(0, Ordering::SeqCst);
            *record.last_seen_healthy.lock() = Some(Instant::now());
        }
    }

    pub fn mark_unhealthy(&self, url: &str) {
        let id: PeerId = url.into();
        if let Some(record) = self.peers.get(&id) {
            record.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Drops peers whose consecutive failure count has reached
    /// `threshold`. Called by the health-check ticker.
    pub fn prune_unhealthy(&self, threshold: u32) {
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|entry| entry.failures() >= threshold)
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            tracing::info!(peer = %id, "evicting unhealthy peer");
            self.peers.remove(&id);
        }
    }

    /// Drops any peer that slipped into the table under a loopback
    /// spelling (e.g. restored from a stale persisted peer list) before
    /// `add`'s own rejection existed. Called alongside `prune_unhealthy`.
    pub fn prune_loopback(&self) {
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|entry| is_loopback(&entry.url))
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            tracing::info!(peer = %id, "evicting loopback peer");
            self.peers.remove(&id);
        }
    }

    /// Bounded-concurrency health sweep: pings every known peer's `/stats`
    /// endpoint and updates its health bookkeeping.
    pub async fn health_check_all(&self, client: &reqwest::Client, timeout: Duration) {
        let urls = self.urls();
        stream::iter(urls)
            .map(|url| {
                let client = client.clone();
                async move {
                    let ok = client
                        .get(format!("{url}/stats"))
                        .timeout(timeout)
                        .send()
                        .await
                        .map(|resp| resp.status().is_success())
                        .unwrap_or(false);
                    (url, ok)
                }
            })
            .buffer_unordered(8)
            .for_each(|(url, ok)| async move {
                if ok {
                    self.mark_healthy(&url);
                } else {
                    self.mark_unhealthy(&url);
                }
            })
            .await;
    }

    /// Phases 1-3 of the discovery walk (phase 4 — invoking the sync
    /// manager once — is the caller's job, since `PeerSet` has no sync
    /// manager handle):
    ///
    /// 1. Health-check every configured seed via `GET /stats`.
    /// 2. For each healthy seed, announce ourselves via
    ///    `POST /register-and-broadcast-node`, then harvest its peer
    ///    list via `GET /api/network/peers`; each harvested candidate is
    ///    quick-health-checked before being adopted.
    /// 3. Prune anything that has now accumulated enough consecutive
    ///    failures to cross the eviction threshold.
    pub async fn discover(&self, client: &reqwest::Client, config: &NodeConfig) {
        let timeout = config.peer_request_timeout();
        let concurrency = config.network.gossip_fanout_concurrency;

        for seed in &config.network.seeds {
            self.add(seed.clone());
        }

        let healthy_seeds: Vec<String> = stream::iter(config.network.seeds.clone())
            .map(|url| {
                let client = client.clone();
                async move {
                    let ok = client
                        .get(format!("{url}/stats"))
                        .timeout(timeout)
                        .send()
                        .await
                        .map(|resp| resp.status().is_success())
                        .unwrap_or(false);
                    (url, ok)
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .filter_map(|(url, ok)| {
                if ok {
                    self.mark_healthy(&url);
                    Some(url)
                } else {
                    self.mark_unhealthy(&url);
                    None
                }
            })
            .collect();

        let self_url = self.self_url.clone();
        let harvested: Vec<String> = stream::iter(healthy_seeds)
            .map(|seed| {
                let client = client.clone();
                let self_url = self_url.clone();
                async move {
                    let _ = client
                        .post(format!("{seed}/register-and-broadcast-node"))
                        .json(&serde_json::json!({ "newNodeUrl": self_url }))
                        .timeout(timeout)
                        .send()
                        .await;
                    client
                        .get(format!("{seed}/api/network/peers"))
                        .timeout(timeout)
                        .send()
                        .await
                        .ok()?
                        .json::<Vec<String>>()
                        .await
                        .ok()
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(|result| async move { result })
            .collect::<Vec<Vec<String>>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let mut seen: std::collections::HashSet<String> = self.urls().into_iter().collect();
        let candidates: Vec<String> = harvested.into_iter().filter(|c| seen.insert(c.clone())).collect();

        stream::iter(candidates)
            .map(|url| {
                let client = client.clone();
                async move {
                    let ok = client
                        .get(format!("{url}/stats"))
                        .timeout(timeout)
                        .send()
                        .await
                        .map(|resp| resp.status().is_success())
                        .unwrap_or(false);
                    (url, ok)
                }
            })
            .buffer_unordered(concurrency)
            .for_each(|(url, ok)| {
                if ok {
                    self.add(url);
                }
                async {}
            })
            .await;

        self.prune_unhealthy(config.network.unhealthy_eviction_threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_self_and_duplicates() {
        let set = PeerSet::new("http://self:3000", 10);
        assert!(!set.add("http://self:3000"));
        assert!(set.add("http://other:3000"));
        assert!(!set.add("http://other:3000"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn add_respects_capacity() {
        let set = PeerSet::new("http://self:3000", 1);
        assert!(set.add("http://a:3000"));
        assert!(!set.add("http://b:3000"));
    }

    #[test]
    fn prune_unhealthy_evicts_past_threshold() {
        let set = PeerSet::new("http://self:3000", 10);
        set.add("http://a:3000");
        for _ in 0..3 {
            set.mark_unhealthy("http://a:3000");
        }
        set.prune_unhealthy(3);
        assert!(set.is_empty());
    }

    #[test]
    fn add_rejects_loopback_urls() {
        let set = PeerSet::new("http://self:3000", 10);
        assert!(!set.add("http://127.0.0.1:5000"));
        assert!(!set.add("http://localhost:5000"));
        assert!(set.add("http://remote.example:5000"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn prune_loopback_evicts_preexisting_loopback_entries() {
        let set = PeerSet::new("http://self:3000", 10);
        set.peers.insert(
            "http://127.0.0.1:5000".to_string().into(),
            PeerRecord::new("http://127.0.0.1:5000".to_string()),
        );
        set.add("http://remote.example:5000");
        set.prune_loopback();
        let urls = set.urls();
        assert_eq!(urls, vec!["http://remote.example:5000".to_string()]);
    }

    #[test]
    fn mark_healthy_resets_failure_count() {
        let set = PeerSet::new("http://self:3000", 10);
        set.add("http://a:3000");
        set.mark_unhealthy("http://a:3000");
        set.mark_healthy("http://a:3000");
        set.prune_unhealthy(1);
        assert_eq!(set.len(), 1);
    }
}
