//! The `Message` and event-name data model carried on the [`crate::bus::MessageBus`].
//!
//! Grounded on `spec.md` §3. `Message` is the pub/sub payload; `Event` is the
//! distinct named-channel emission. They are intentionally not unified into
//! one enum — the bus treats them as two separate tables (spec §4.2).

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Total ordering matches the spec: DEBUG < INFO < WARNING < ERROR < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Default for MessageLevel {
    fn default() -> Self {
        MessageLevel::Info
    }
}

impl std::fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageLevel::Debug => "DEBUG",
            MessageLevel::Info => "INFO",
            MessageLevel::Warning => "WARNING",
            MessageLevel::Error => "ERROR",
            MessageLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Free-form metadata carried on a [`Message`].
pub type Metadata = HashMap<String, serde_json::Value>;

/// The unit carried on the bus (spec §3).
///
/// Invariant: `timestamp` is non-empty; `level` is always assigned (enforced
/// by the builder in [`MessageBuilder`], which is the only public way to
/// construct one outside this crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    /// Source-provided timestamp (log time), or creation time if absent.
    pub timestamp: String,
    /// Monotonic wall time when this message was constructed.
    #[serde(skip, default = "SystemTime::now")]
    pub creation_time: SystemTime,
    pub level: MessageLevel,
    pub pattern_name: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    /// Start building a message. `content` and `creation_time` are fixed;
    /// everything else defaults per spec §3 and can be overridden.
    pub fn builder(content: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(content)
    }
}

pub struct MessageBuilder {
    content: String,
    timestamp: Option<String>,
    level: MessageLevel,
    pattern_name: Option<String>,
    metadata: Metadata,
}

impl MessageBuilder {
    fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: None,
            level: MessageLevel::Info,
            pattern_name: None,
            metadata: Metadata::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn level(mut self, level: MessageLevel) -> Self {
        self.level = level;
        self
    }

    pub fn pattern_name(mut self, pattern_name: impl Into<String>) -> Self {
        self.pattern_name = Some(pattern_name.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Message {
        let creation_time = SystemTime::now();
        let timestamp = self.timestamp.unwrap_or_else(|| humantime_rfc3339(creation_time));
        Message {
            content: self.content,
            timestamp,
            creation_time,
            level: self.level,
            pattern_name: self.pattern_name,
            metadata: self.metadata,
        }
    }
}

fn humantime_rfc3339(t: SystemTime) -> String {
    let datetime: chrono::DateTime<chrono::Utc> = t.into();
    datetime.to_rfc3339()
}

/// A named-event emission: `(name, args, kwargs)`, a distinct namespace from
/// [`Message`] (spec §3). `args` is ordered, `kwargs` is the free-form
/// remainder.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventArgs {
    pub args: Vec<serde_json::Value>,
    pub kwargs: HashMap<String, serde_json::Value>,
}

impl EventArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args(args: Vec<serde_json::Value>) -> Self {
        Self {
            args,
            kwargs: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_spec() {
        assert!(MessageLevel::Debug < MessageLevel::Info);
        assert!(MessageLevel::Info < MessageLevel::Warning);
        assert!(MessageLevel::Warning < MessageLevel::Error);
        assert!(MessageLevel::Error < MessageLevel::Critical);
    }

    #[test]
    fn builder_defaults_to_info_and_nonempty_timestamp() {
        let msg = Message::builder("hello").build();
        assert_eq!(msg.level, MessageLevel::Info);
        assert!(!msg.timestamp.is_empty());
        assert_eq!(msg.content, "hello");
        assert!(msg.pattern_name.is_none());
    }

    #[test]
    fn builder_honors_explicit_timestamp() {
        let msg = Message::builder("x").timestamp("2020-01-01T00:00:00Z").build();
        assert_eq!(msg.timestamp, "2020-01-01T00:00:00Z");
    }
}
