//! Presence registry: tracks which endpoints are currently connected to a
//! router, their advertised groups and metadata, and when they were last
//! heard from. An entry's `status` tracks online/idle per the router's
//! health-check loop; entries are removed outright on disconnect rather than
//! carrying a third "disconnected" state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    Online,
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub node_id: String,
    pub client_name: Option<String>,
    pub groups: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub status: PresenceStatus,
    #[serde(skip, default = "Instant::now")]
    pub last_activity: Instant,
}

/// Tracks connected nodes by id. Cheap to clone (wraps an `Arc`-free inner
/// mutex; callers share a reference to the registry, not its contents).
pub struct PresenceRegistry {
    entries: Mutex<HashMap<String, PresenceEntry>>,
    zombie_timeout: Duration,
}

impl PresenceRegistry {
    pub fn new(zombie_timeout: Duration) -> Self {
        PresenceRegistry {
            entries: Mutex::new(HashMap::new()),
            zombie_timeout,
        }
    }

    /// Registers a node, replacing any prior entry under the same id. Used
    /// both for first registration and for a node reconnecting after its
    /// old entry was evicted.
    pub fn register(
        &self,
        node_id: impl Into<String>,
        client_name: Option<String>,
        groups: Vec<String>,
        metadata: HashMap<String, String>,
    ) {
        let node_id = node_id.into();
        self.entries.lock().insert(
            node_id.clone(),
            PresenceEntry {
                node_id,
                client_name,
                groups,
                metadata,
                status: PresenceStatus::Online,
                last_activity: Instant::now(),
            },
        );
    }

    pub fn deregister(&self, node_id: &str) -> bool {
        self.entries.lock().remove(node_id).is_some()
    }

    /// Refreshes the liveness clock for `node_id` and brings it back online
    /// if it had gone idle. Returns `false` if the node was never
    /// registered (or was already evicted) — the caller should reject the
    /// heartbeat so the peer re-registers.
    pub fn heartbeat(&self, node_id: &str) -> bool {
        if let Some(entry) = self.entries.lock().get_mut(node_id) {
            entry.last_activity = Instant::now();
            entry.status = PresenceStatus::Online;
            true
        } else {
            false
        }
    }

    /// Any inbound traffic from `node_id` (not just an explicit heartbeat)
    /// counts as activity for idle/zombie purposes.
    pub fn touch(&self, node_id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(node_id) {
            entry.last_activity = Instant::now();
        }
    }

    pub fn update_metadata(&self, node_id: &str, metadata: HashMap<String, String>) -> bool {
        if let Some(entry) = self.entries.lock().get_mut(node_id) {
            entry.metadata = metadata;
            true
        } else {
            false
        }
    }

    pub fn get(&self, node_id: &str) -> Option<PresenceEntry> {
        self.entries.lock().get(node_id).cloned()
    }

    pub fn list(&self) -> Vec<PresenceEntry> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Every node id currently known to be online (not idle), excluding
    /// `exclude` if given. Used for broadcast.
    pub fn online_ids(&self, exclude: Option<&str>) -> Vec<String> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.status == PresenceStatus::Online && Some(e.node_id.as_str()) != exclude)
            .map(|e| e.node_id.clone())
            .collect()
    }

    /// Every online node id whose groups contain `group`, excluding
    /// `exclude` if given. Used for multicast.
    pub fn online_members_of_group(&self, group: &str, exclude: Option<&str>) -> Vec<String> {
        self.entries
            .lock()
            .values()
            .filter(|e| {
                e.status == PresenceStatus::Online
                    && Some(e.node_id.as_str()) != exclude
                    && e.groups.iter().any(|g| g == group)
            })
            .map(|e| e.node_id.clone())
            .collect()
    }

    /// Removes every entry whose last activity predates the inactivity
    /// timeout. Returns the evicted node ids so the caller can publish
    /// departure notifications with reason "Inactivity timeout".
    pub fn evict_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let timeout = self.zombie_timeout;
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .values()
            .filter(|e| now.duration_since(e.last_activity) > timeout)
            .map(|e| e.node_id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
        }
        expired
    }

    /// Transitions every online entry idle past `idle_after` (per the
    /// spec's `2 * healthCheckInterval` rule). Returns the transitioned ids.
    pub fn mark_idle(&self, idle_after: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut transitioned = Vec::new();
        for entry in entries.values_mut() {
            if entry.status == PresenceStatus::Online && now.duration_since(entry.last_activity) > idle_after {
                entry.status = PresenceStatus::Idle;
                transitioned.push(entry.node_id.clone());
            }
        }
        transitioned
    }

    /// Removes every entry whose id is not in `live_ids` — the zombie dual
    /// check: a presence record with no corresponding live outbound stream.
    /// Returns the evicted ids.
    pub fn evict_not_in(&self, live_ids: &std::collections::HashSet<String>) -> Vec<String> {
        let mut entries = self.entries.lock();
        let zombies: Vec<String> = entries
            .keys()
            .filter(|id| !live_ids.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &zombies {
            entries.remove(id);
        }
        zombies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get_round_trips() {
        let registry = PresenceRegistry::new(Duration::from_secs(30));
        let mut meta = HashMap::new();
        meta.insert("region".to_string(), "us-east".to_string());
        registry.register("node-1", None, vec!["workers".to_string()], meta.clone());

        let entry = registry.get("node-1").unwrap();
        assert_eq!(entry.metadata, meta);
        assert_eq!(entry.groups, vec!["workers".to_string()]);
        assert_eq!(entry.status, PresenceStatus::Online);
    }

    #[test]
    fn heartbeat_on_unknown_node_fails() {
        let registry = PresenceRegistry::new(Duration::from_secs(30));
        assert!(!registry.heartbeat("ghost"));
    }

    #[test]
    fn deregister_removes_entry() {
        let registry = PresenceRegistry::new(Duration::from_secs(30));
        registry.register("node-1", None, Vec::new(), HashMap::new());
        assert!(registry.deregister("node-1"));
        assert!(registry.get("node-1").is_none());
    }

    #[test]
    fn zombie_eviction_respects_timeout() {
        let registry = PresenceRegistry::new(Duration::from_millis(10));
        registry.register("node-1", None, Vec::new(), HashMap::new());
        std::thread::sleep(Duration::from_millis(30));
        let evicted = registry.evict_expired();
        assert_eq!(evicted, vec!["node-1".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn fresh_heartbeat_prevents_eviction() {
        let registry = PresenceRegistry::new(Duration::from_millis(50));
        registry.register("node-1", None, Vec::new(), HashMap::new());
        std::thread::sleep(Duration::from_millis(20));
        assert!(registry.heartbeat("node-1"));
        let evicted = registry.evict_expired();
        assert!(evicted.is_empty());
    }

    #[test]
    fn online_client_goes_idle_after_threshold() {
        let registry = PresenceRegistry::new(Duration::from_secs(30));
        registry.register("node-1", None, Vec::new(), HashMap::new());
        std::thread::sleep(Duration::from_millis(20));
        let transitioned = registry.mark_idle(Duration::from_millis(10));
        assert_eq!(transitioned, vec!["node-1".to_string()]);
        assert_eq!(registry.get("node-1").unwrap().status, PresenceStatus::Idle);
    }

    #[test]
    fn multicast_targets_only_online_members_of_group() {
        let registry = PresenceRegistry::new(Duration::from_secs(30));
        registry.register("a", None, vec!["workers".to_string()], HashMap::new());
        registry.register("b", None, vec!["other".to_string()], HashMap::new());
        registry.register("c", None, vec!["workers".to_string()], HashMap::new());

        let mut members = registry.online_members_of_group("workers", Some("a"));
        members.sort();
        assert_eq!(members, vec!["c".to_string()]);
    }

    #[test]
    fn zombie_dual_check_evicts_records_missing_from_live_set() {
        let registry = PresenceRegistry::new(Duration::from_secs(30));
        registry.register("a", None, Vec::new(), HashMap::new());
        registry.register("b", None, Vec::new(), HashMap::new());

        let live: std::collections::HashSet<String> = ["a".to_string()].into_iter().collect();
        let evicted = registry.evict_not_in(&live);
        assert_eq!(evicted, vec!["b".to_string()]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_none());
    }
}
