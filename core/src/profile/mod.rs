//! Profile & VIP Subsystem (spec §4.6): a cache-backed dedup layer in
//! front of an asynchronous profile scraper, plus VIP tagging for the sink
//! layer. The scraper implementation itself is a third-party collaborator
//! out of scope; only the plumbing around it lives here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::message::EventArgs;

/// How a profile entry was acquired (spec §3 `ProfileCache entry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Automatic,
    Manual,
}

#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub player_name: String,
    pub profile_data: Value,
    pub source_type: SourceType,
    pub origin: String,
    pub requested_by: String,
    pub source_user: String,
    pub cache_time: DateTime<Utc>,
}

/// Concurrent cache keyed on canonical player name.
///
/// Dedup is presence-before-insert, same as the original: there is no
/// separate "already broadcast" flag, the cache itself is the flag.
#[derive(Default)]
pub struct ProfileCache {
    entries: DashMap<String, ProfileEntry>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn get(&self, player_name: &str) -> Option<ProfileEntry> {
        self.entries.get(player_name).map(|e| e.value().clone())
    }

    pub fn contains(&self, player_name: &str) -> bool {
        self.entries.contains_key(player_name)
    }

    /// Inserts/overwrites the entry for `entry.player_name`. Returns `true`
    /// if this player had no prior entry — the caller's broadcast-once
    /// decision (spec §8 scenario 5).
    pub fn store(&self, entry: ProfileEntry) -> bool {
        let first_seen = !self.entries.contains_key(&entry.player_name);
        self.entries.insert(entry.player_name.clone(), entry);
        first_seen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why a profile was requested — drives the automatic-vs-manual cache
/// classification and whether it is broadcast or just shown locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOrigin {
    /// The local player killed or was killed by the subject.
    Automatic,
    /// An operator explicitly requested the lookup ("get").
    Manual,
    /// Received from a peer over the realtime bridge.
    BroadcastReceived,
}

impl ProfileOrigin {
    fn source_type(self) -> SourceType {
        match self {
            ProfileOrigin::Manual => SourceType::Manual,
            ProfileOrigin::Automatic | ProfileOrigin::BroadcastReceived => SourceType::Automatic,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ProfileOrigin::Automatic => "automatic",
            ProfileOrigin::Manual => "manual",
            ProfileOrigin::BroadcastReceived => "broadcast_received",
        }
    }
}

/// Coordinates the cache against the Bus and the outbound broadcast path.
/// Holding this is what makes "first local sighting broadcasts, cache hits
/// don't" (spec §4.6) an actual invariant instead of caller discipline.
pub struct ProfileSubsystem {
    cache: Arc<ProfileCache>,
    bus: MessageBus,
    local_username: String,
}

impl ProfileSubsystem {
    pub fn new(bus: MessageBus, local_username: impl Into<String>) -> Self {
        Self { cache: Arc::new(ProfileCache::new()), bus, local_username: local_username.into() }
    }

    pub fn cache(&self) -> Arc<ProfileCache> {
        self.cache.clone()
    }

    /// Handles a freshly scraped or broadcast-received profile. Returns
    /// `true` if this call should trigger an outbound broadcast (first
    /// local sighting only; broadcast-received and manual lookups never
    /// re-broadcast).
    pub async fn record_profile(
        &self,
        player_name: &str,
        profile_data: Value,
        origin: ProfileOrigin,
        requested_by: &str,
    ) -> bool {
        let entry = ProfileEntry {
            player_name: player_name.to_string(),
            profile_data: profile_data.clone(),
            source_type: origin.source_type(),
            origin: origin.label().to_string(),
            requested_by: requested_by.to_string(),
            source_user: self.local_username.clone(),
            cache_time: Utc::now(),
        };

        match origin {
            ProfileOrigin::BroadcastReceived => {
                self.cache.store(entry);
                let _ = self
                    .bus
                    .emit("actor_profile", EventArgs::with_args(vec![Value::String(player_name.to_string())]))
                    .await;
                debug!(player_name, "cached broadcast-received profile");
                false
            }
            ProfileOrigin::Manual => {
                self.cache.store(entry);
                let _ = self
                    .bus
                    .emit("actor_profile", EventArgs::with_args(vec![Value::String(player_name.to_string())]))
                    .await;
                let _ = self
                    .bus
                    .emit("show_windows_notification", EventArgs::with_args(vec![profile_data]))
                    .await;
                false
            }
            ProfileOrigin::Automatic => {
                let first_seen = self.cache.store(entry);
                let _ = self
                    .bus
                    .emit("actor_profile", EventArgs::with_args(vec![Value::String(player_name.to_string())]))
                    .await;
                if first_seen {
                    debug!(player_name, "broadcasting newly observed profile");
                } else {
                    debug!(player_name, "profile already cached, skipping broadcast");
                }
                first_seen
            }
        }
    }

    /// `force_broadcast_profile`: re-broadcasts regardless of cache state,
    /// without any notification side effect (spec §4.6).
    pub async fn force_broadcast(&self, player_name: &str, profile_data: Value) {
        let entry = ProfileEntry {
            player_name: player_name.to_string(),
            profile_data,
            source_type: SourceType::Automatic,
            origin: "force_broadcast".to_string(),
            requested_by: self.local_username.clone(),
            source_user: self.local_username.clone(),
            cache_time: Utc::now(),
        };
        self.cache.store(entry);
    }
}

/// Pluggable profile scraper (spec §1: third-party scrapers are out of
/// scope as a concrete implementation, but the interface is ours).
#[async_trait::async_trait]
pub trait ProfileScraper: Send + Sync {
    async fn scrape(&self, player_name: &str) -> Option<Value>;
}

/// VIP matching (spec §4.6): a comma/newline-separated config string
/// compiled into regexes, invalid entries dropped silently. Detection
/// itself is shared with [`crate::tailer::PatternEngine::detect_vip`]; this
/// wrapper exists so non-tailer callers (the profile widget, tests) can
/// compile and query VIP patterns without pulling in the whole pattern
/// engine.
pub struct VipMatcher {
    patterns: Vec<Regex>,
    invalid_count: usize,
}

impl VipMatcher {
    pub fn compile(important_players: &str) -> Self {
        let mut patterns = Vec::new();
        let mut invalid_count = 0;
        for raw in important_players.split(['\n', ',']) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            match Regex::new(trimmed) {
                Ok(re) => patterns.push(re),
                Err(_) => {
                    invalid_count += 1;
                    warn!(entry = trimmed, "dropping invalid VIP pattern");
                }
            }
        }
        Self { patterns, invalid_count }
    }

    pub fn compiled_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid_count
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;

    #[test]
    fn vip_matcher_drops_invalid_entries_but_keeps_valid_ones() {
        let matcher = VipMatcher::compile("Alice,(unterminated,Bob.*");
        assert_eq!(matcher.compiled_count(), 2);
        assert_eq!(matcher.invalid_count(), 1);
        assert!(matcher.matches("Alice"));
        assert!(matcher.matches("Bobby"));
        assert!(!matcher.matches("Carol"));
    }

    #[test]
    fn profile_cache_first_store_reports_first_seen() {
        let cache = ProfileCache::new();
        let entry = ProfileEntry {
            player_name: "Bob".into(),
            profile_data: Value::Null,
            source_type: SourceType::Automatic,
            origin: "automatic".into(),
            requested_by: "Alice".into(),
            source_user: "Alice".into(),
            cache_time: Utc::now(),
        };
        assert!(cache.store(entry.clone()));
        assert!(!cache.store(entry));
    }

    #[tokio::test]
    async fn automatic_profile_broadcasts_once_then_caches() {
        let bus = MessageBus::start();
        let subsystem = ProfileSubsystem::new(bus, "Alice");

        let first = subsystem
            .record_profile("Bob", serde_json::json!({"org": "Test"}), ProfileOrigin::Automatic, "Alice")
            .await;
        let second = subsystem
            .record_profile("Bob", serde_json::json!({"org": "Test"}), ProfileOrigin::Automatic, "Alice")
            .await;

        assert!(first);
        assert!(!second);
        assert_eq!(subsystem.cache().len(), 1);
    }

    #[tokio::test]
    async fn manual_lookup_never_reports_broadcast() {
        let bus = MessageBus::start();
        let subsystem = ProfileSubsystem::new(bus, "Alice");

        let should_broadcast = subsystem
            .record_profile("Carol", serde_json::json!({}), ProfileOrigin::Manual, "Alice")
            .await;

        assert!(!should_broadcast);
    }
}
