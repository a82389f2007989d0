//! Duplicate-suppression rate limiter with an optional global sliding window
//! (spec §3 `RateLimiterState` / §4.1).
//!
//! Algorithm ported from `MessageRateLimiter.should_send`: per-key
//! `(last_time, count)` pairs, a message is blocked once `count` reaches
//! `max_duplicates` inside `timeout` seconds of the last send, and resets
//! once `timeout` has elapsed. A global count/window pair, if configured,
//! is checked first and is independent of per-key state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::constants::{
    DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS, DEFAULT_RATE_LIMIT_MAX_DUPLICATES,
    DEFAULT_RATE_LIMIT_TIMEOUT_SECS,
};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub timeout: Duration,
    pub max_duplicates: u32,
    pub cleanup_interval: Duration,
    pub global_limit: Option<GlobalLimit>,
}

#[derive(Debug, Clone, Copy)]
pub struct GlobalLimit {
    pub count: usize,
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_RATE_LIMIT_TIMEOUT_SECS),
            max_duplicates: DEFAULT_RATE_LIMIT_MAX_DUPLICATES,
            cleanup_interval: Duration::from_secs(DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS),
            global_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_time: Instant,
    count: u32,
}

/// Per-message-type stats snapshot (spec §4.1 `get_stats`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitStats {
    pub last_sent: Instant,
    pub count: u32,
    pub blocked: bool,
}

struct State {
    messages: HashMap<String, Entry>,
    last_cleanup: Instant,
    recent_global: Vec<Instant>,
}

/// Thread-safe rate limiter; one instance is shared (via `Arc`) across
/// every place that decides whether to emit a message or dispatch event.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                messages: HashMap::new(),
                last_cleanup: Instant::now(),
                recent_global: Vec::new(),
            }),
        }
    }

    fn key(message: &str, message_type: Option<&str>) -> String {
        match message_type {
            Some(t) => format!("{t}:{message}"),
            None => message.to_string(),
        }
    }

    /// Returns `true` if the message may be sent, updating internal counters
    /// as a side effect regardless of the outcome (matches the original:
    /// a blocked duplicate still increments its count).
    pub fn should_send(&self, message: &str, message_type: Option<&str>) -> bool {
        let now = Instant::now();
        let key = Self::key(message, message_type);
        let mut state = self.state.lock();

        if let Some(global) = self.config.global_limit {
            state.recent_global.retain(|t| now.duration_since(*t) < global.window);
            if state.recent_global.len() >= global.count {
                return false;
            }
        }

        if now.duration_since(state.last_cleanup) > self.config.cleanup_interval {
            self.cleanup_locked(&mut state, now);
        }

        let allowed = match state.messages.get(&key).copied() {
            Some(entry) => {
                if entry.count >= self.config.max_duplicates
                    && now.duration_since(entry.last_time) < self.config.timeout
                {
                    state.messages.insert(key, Entry { last_time: entry.last_time, count: entry.count + 1 });
                    false
                } else if now.duration_since(entry.last_time) >= self.config.timeout {
                    state.messages.insert(key, Entry { last_time: now, count: 1 });
                    true
                } else {
                    state.messages.insert(key, Entry { last_time: entry.last_time, count: entry.count + 1 });
                    true
                }
            }
            None => {
                state.messages.insert(key, Entry { last_time: now, count: 1 });
                true
            }
        };

        if allowed && self.config.global_limit.is_some() {
            state.recent_global.push(now);
        }

        allowed
    }

    fn cleanup_locked(&self, state: &mut State, now: Instant) {
        state
            .messages
            .retain(|_, entry| now.duration_since(entry.last_time) <= self.config.cleanup_interval);
        state.last_cleanup = now;
    }

    /// Explicit cleanup entry point for callers that run their own timer
    /// instead of relying on the lazy check inside `should_send`.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.cleanup_locked(&mut state, now);
    }

    pub fn get_stats(&self, message: &str, message_type: Option<&str>) -> Option<RateLimitStats> {
        let key = Self::key(message, message_type);
        let state = self.state.lock();
        let entry = state.messages.get(&key)?;
        let blocked = entry.count > self.config.max_duplicates
            && Instant::now().duration_since(entry.last_time) < self.config.timeout;
        Some(RateLimitStats {
            last_sent: entry.last_time,
            count: entry.count,
            blocked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn limiter(timeout_ms: u64, max_duplicates: u32) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            timeout: Duration::from_millis(timeout_ms),
            max_duplicates,
            cleanup_interval: Duration::from_secs(60),
            global_limit: None,
        })
    }

    #[test]
    fn first_send_always_allowed() {
        let rl = limiter(300_000, 1);
        assert!(rl.should_send("hello", None));
    }

    #[test]
    fn duplicate_within_window_blocked_after_max() {
        let rl = limiter(300_000, 1);
        assert!(rl.should_send("hello", None));
        assert!(!rl.should_send("hello", None));
        assert!(!rl.should_send("hello", None));
    }

    #[test]
    fn duplicate_allowed_again_after_timeout() {
        let rl = limiter(20, 1);
        assert!(rl.should_send("hello", None));
        assert!(!rl.should_send("hello", None));
        sleep(Duration::from_millis(40));
        assert!(rl.should_send("hello", None));
    }

    #[test]
    fn message_type_partitions_the_key_space() {
        let rl = limiter(300_000, 1);
        assert!(rl.should_send("hello", Some("chat")));
        assert!(rl.should_send("hello", Some("system")));
        assert!(!rl.should_send("hello", Some("chat")));
    }

    #[test]
    fn max_duplicates_above_one_allows_that_many() {
        let rl = limiter(300_000, 3);
        assert!(rl.should_send("x", None));
        assert!(rl.should_send("x", None));
        assert!(rl.should_send("x", None));
        assert!(!rl.should_send("x", None));
    }

    #[test]
    fn global_limit_blocks_regardless_of_key() {
        let rl = RateLimiter::new(RateLimiterConfig {
            timeout: Duration::from_secs(300),
            max_duplicates: 100,
            cleanup_interval: Duration::from_secs(60),
            global_limit: Some(GlobalLimit { count: 2, window: Duration::from_secs(60) }),
        });
        assert!(rl.should_send("a", None));
        assert!(rl.should_send("b", None));
        assert!(!rl.should_send("c", None));
    }

    #[test]
    fn get_stats_reports_blocked_state() {
        let rl = limiter(300_000, 1);
        assert!(rl.get_stats("hello", None).is_none());
        rl.should_send("hello", None);
        rl.should_send("hello", None);
        let stats = rl.get_stats("hello", None).unwrap();
        assert_eq!(stats.count, 2);
        assert!(stats.blocked);
    }
}
