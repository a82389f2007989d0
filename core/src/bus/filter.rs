//! Per-subscriber filter evaluation.
//!
//! Spec §9 REDESIGN FLAGS: "Level filter uses `≥`; every other filter uses
//! `==`. Keep this asymmetry visible in one small helper" — this module is
//! that helper.

use std::collections::HashMap;

use crate::message::{Message, MessageLevel};

/// A single filter value. `Level` compares with `>=`; everything else
/// compares with `==` against either `pattern_name` or a `metadata` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Level(MessageLevel),
    Value(serde_json::Value),
}

pub type FilterMap = HashMap<String, FilterValue>;

/// A message passes iff every `(key, value)` entry is satisfied.
pub fn passes(message: &Message, filters: &FilterMap) -> bool {
    filters.iter().all(|(key, value)| matches_one(message, key, value))
}

fn matches_one(message: &Message, key: &str, value: &FilterValue) -> bool {
    match (key, value) {
        ("level", FilterValue::Level(min)) => message.level >= *min,
        ("level", FilterValue::Value(v)) => level_from_json(v).is_none_or(|min| message.level >= min),
        ("pattern_name", FilterValue::Value(v)) => {
            message.pattern_name.as_deref() == v.as_str()
        }
        ("pattern_name", FilterValue::Level(_)) => false,
        (other, FilterValue::Value(v)) => message
            .metadata
            .get(other)
            .map(|m| m == v)
            .unwrap_or(false),
        (_, FilterValue::Level(_)) => false,
    }
}

fn level_from_json(v: &serde_json::Value) -> Option<MessageLevel> {
    let s = v.as_str()?;
    match s.to_ascii_uppercase().as_str() {
        "DEBUG" => Some(MessageLevel::Debug),
        "INFO" => Some(MessageLevel::Info),
        "WARNING" => Some(MessageLevel::Warning),
        "ERROR" => Some(MessageLevel::Error),
        "CRITICAL" => Some(MessageLevel::Critical),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn level_filter_uses_gte() {
        let msg = Message::builder("x").level(MessageLevel::Warning).build();
        let mut filters = FilterMap::new();
        filters.insert("level".into(), FilterValue::Level(MessageLevel::Info));
        assert!(passes(&msg, &filters));

        filters.insert("level".into(), FilterValue::Level(MessageLevel::Error));
        assert!(!passes(&msg, &filters));
    }

    #[test]
    fn pattern_name_filter_uses_eq() {
        let msg = Message::builder("x").pattern_name("mode_change").build();
        let mut filters = FilterMap::new();
        filters.insert(
            "pattern_name".into(),
            FilterValue::Value(serde_json::json!("mode_change")),
        );
        assert!(passes(&msg, &filters));

        filters.insert(
            "pattern_name".into(),
            FilterValue::Value(serde_json::json!("other")),
        );
        assert!(!passes(&msg, &filters));
    }

    #[test]
    fn metadata_filter_uses_eq() {
        let msg = Message::builder("x")
            .metadata_entry("shard", serde_json::json!("ABC123"))
            .build();
        let mut filters = FilterMap::new();
        filters.insert("shard".into(), FilterValue::Value(serde_json::json!("ABC123")));
        assert!(passes(&msg, &filters));
        filters.insert("shard".into(), FilterValue::Value(serde_json::json!("OTHER")));
        assert!(!passes(&msg, &filters));
    }

    #[test]
    fn empty_filters_always_pass() {
        let msg = Message::builder("x").build();
        assert!(passes(&msg, &FilterMap::new()));
    }
}
