//! Configurable, precompiled regex pattern set (spec §4.3 "Pattern Engine",
//! §9 "precompile all patterns at config load ... two ordered lists rather
//! than flag-based skipping"). Grounded on
//! `original_source/src/log_analyzer.py`'s `regex_patterns` table and
//! `detect_and_emit_generic`/`parse_log_entry` dispatch order.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::ConfigError;

/// One configured, precompiled pattern.
pub struct CompiledPattern {
    pub name: String,
    pub regex: Regex,
    pub message_template: Option<String>,
}

/// Trailing Star-Citizen entity-id suffix (spec §4.3 step 2): `_<4+ digits>`.
fn trailing_id_suffix() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_\d{4,}$").expect("static regex"))
}

/// A single regex match resolved into the `data` map the spec describes,
/// already cleaned of trailing entity-id suffixes and enriched with
/// `player`/`action`.
#[derive(Debug, Clone)]
pub struct MatchData {
    pub pattern_name: String,
    pub fields: HashMap<String, String>,
}

impl MatchData {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn player(&self) -> &str {
        self.get("player")
            .or_else(|| self.get("owner"))
            .or_else(|| self.get("entity"))
            .unwrap_or("Unknown")
    }

    /// `messages[pattern_name].format(**data)`-equivalent: `{field}` tokens
    /// replaced from `fields`, left as literal text if the key is absent.
    pub fn format(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let bytes = template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'{' {
                if let Some(end) = template[i + 1..].find('}') {
                    let key = &template[i + 1..i + 1 + end];
                    if let Some(v) = self.fields.get(key) {
                        out.push_str(v);
                    }
                    i = i + 1 + end + 1;
                    continue;
                }
            }
            let ch = template[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
        out
    }
}

/// Engine configuration: the same regex map drives two dispatch orders —
/// `google_sheets_mapping`-bound patterns run first, everything else second
/// (spec §9 REDESIGN FLAGS).
pub struct PatternEngine {
    sheet_bound: Vec<CompiledPattern>,
    general: Vec<CompiledPattern>,
    vip_patterns: Vec<Regex>,
    vip_invalid_count: usize,
    realtime: HashSet<String>,
    scraping: HashSet<String>,
}

/// Raw, uncompiled pattern set as it would arrive from config (spec §6).
pub struct PatternEngineConfig {
    pub regex_patterns: Vec<(String, String)>,
    pub messages: HashMap<String, String>,
    pub google_sheets_mapping: HashSet<String>,
    /// Pattern names that must additionally call `RealtimeBridge::broadcast`
    /// once dispatched (spec §4.3 step 8).
    pub realtime: HashSet<String>,
    /// Pattern names that must additionally trigger profile enrichment once
    /// dispatched (spec §4.3 step 9).
    pub scraping: HashSet<String>,
    pub important_players: String,
}

impl PatternEngine {
    pub fn compile(config: PatternEngineConfig) -> Result<Self, ConfigError> {
        let mut sheet_bound = Vec::new();
        let mut general = Vec::new();

        for (name, pattern) in config.regex_patterns {
            let regex = Regex::new(&pattern).map_err(|source| ConfigError::InvalidPattern { name: name.clone(), source })?;
            let compiled = CompiledPattern {
                message_template: config.messages.get(&name).cloned(),
                name: name.clone(),
                regex,
            };
            if config.google_sheets_mapping.contains(&name) {
                sheet_bound.push(compiled);
            } else {
                general.push(compiled);
            }
        }

        let (vip_patterns, vip_invalid_count) = compile_vip_patterns(&config.important_players);

        Ok(Self {
            sheet_bound,
            general,
            vip_patterns,
            vip_invalid_count,
            realtime: config.realtime,
            scraping: config.scraping,
        })
    }

    /// Number of VIP patterns that compiled successfully.
    pub fn vip_compiled_count(&self) -> usize {
        self.vip_patterns.len()
    }

    /// Number of `important_players` entries that failed to compile and
    /// were silently dropped (spec §9 open question; diagnostics addition).
    pub fn vip_invalid_count(&self) -> usize {
        self.vip_invalid_count
    }

    /// Runs the generic dispatch order: sheet-bound patterns first, then
    /// the rest, first match wins (spec §4.3 steps 1-3, §9 ordering rule).
    pub fn match_line(&self, line: &str) -> Option<MatchData> {
        for pattern in self.sheet_bound.iter().chain(self.general.iter()) {
            if let Some(data) = match_one(pattern, line) {
                return Some(data);
            }
        }
        None
    }

    pub fn is_sheet_bound(&self, pattern_name: &str) -> bool {
        self.sheet_bound.iter().any(|p| p.name == pattern_name)
    }

    /// Whether `pattern_name` is configured for realtime broadcast (spec
    /// §4.3 step 8).
    pub fn is_realtime(&self, pattern_name: &str) -> bool {
        self.realtime.contains(pattern_name)
    }

    /// Whether `pattern_name` is configured for profile enrichment (spec
    /// §4.3 step 9).
    pub fn is_scraping(&self, pattern_name: &str) -> bool {
        self.scraping.contains(pattern_name)
    }

    pub fn template_for(&self, pattern_name: &str) -> Option<&str> {
        self.sheet_bound
            .iter()
            .chain(self.general.iter())
            .find(|p| p.name == pattern_name)
            .and_then(|p| p.message_template.as_deref())
    }

    /// VIP detection: independent of the main dispatch (spec §4.3 "VIP
    /// detection"), runs against every configured VIP regex and returns the
    /// first match's captured `vip` group.
    pub fn detect_vip(&self, line: &str) -> Option<MatchData> {
        for regex in &self.vip_patterns {
            if let Some(caps) = regex.captures(line) {
                let mut fields = HashMap::new();
                for name in regex.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        fields.insert(name.to_string(), m.as_str().to_string());
                    }
                }
                clean_trailing_ids(&mut fields);
                return Some(MatchData { pattern_name: "vip".to_string(), fields });
            }
        }
        None
    }
}

fn match_one(pattern: &CompiledPattern, line: &str) -> Option<MatchData> {
    let caps = pattern.regex.captures(line)?;
    let mut fields = HashMap::new();
    for name in pattern.regex.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            fields.insert(name.to_string(), m.as_str().to_string());
        }
    }
    clean_trailing_ids(&mut fields);
    fields.entry("action".to_string()).or_insert_with(|| title_case(&pattern.name.replace('_', " ")));
    Some(MatchData { pattern_name: pattern.name.clone(), fields })
}

fn clean_trailing_ids(fields: &mut HashMap<String, String>) {
    for value in fields.values_mut() {
        if let Some(pos) = trailing_id_suffix().find(value) {
            value.truncate(pos.start());
        }
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `compile_vip_patterns` (spec §9 open question): invalid entries are
/// silently dropped, but the count is exposed for diagnostics.
fn compile_vip_patterns(important_players: &str) -> (Vec<Regex>, usize) {
    let mut patterns = Vec::new();
    let mut invalid = 0;
    for entry in important_players.split(|c| c == ',' || c == '\n') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let wrapped = format!(r"<(?P<timestamp>.*?)>.*?(?P<vip>{entry}?).*?");
        match Regex::new(&wrapped) {
            Ok(re) => patterns.push(re),
            Err(_) => invalid += 1,
        }
    }
    (patterns, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PatternEngine {
        let mut regex_patterns = Vec::new();
        regex_patterns.push((
            "player_death".to_string(),
            r"<(?P<timestamp>.*?)> Killer: (?P<killer>\w+) Victim: (?P<victim>\w+)".to_string(),
        ));
        regex_patterns.push((
            "ship_spawn".to_string(),
            r"<(?P<timestamp>.*?)> Ship spawned: (?P<owner>\w+)_(?P<entity_id>\d{5})".to_string(),
        ));
        let mut messages = HashMap::new();
        messages.insert("player_death".to_string(), "{killer} killed {victim}".to_string());
        let mut sheets = HashSet::new();
        sheets.insert("player_death".to_string());

        PatternEngine::compile(PatternEngineConfig {
            regex_patterns,
            messages,
            google_sheets_mapping: sheets,
            realtime: HashSet::new(),
            scraping: HashSet::new(),
            important_players: "Bob, Ali.*, (invalid[".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn sheet_bound_pattern_dispatched_first() {
        let engine = engine();
        assert!(engine.is_sheet_bound("player_death"));
        assert!(!engine.is_sheet_bound("ship_spawn"));
    }

    #[test]
    fn match_line_strips_trailing_entity_id() {
        let engine = engine();
        let data = engine.match_line("<2024-01-01> Ship spawned: Drake_12345").unwrap();
        assert_eq!(data.get("owner"), Some("Drake"));
    }

    #[test]
    fn match_line_formats_template() {
        let engine = engine();
        let data = engine.match_line("<2024-01-01> Killer: Bob Victim: Alice").unwrap();
        assert_eq!(data.pattern_name, "player_death");
        let rendered = data.format(engine.template_for("player_death").unwrap());
        assert_eq!(rendered, "Bob killed Alice");
    }

    #[test]
    fn player_defaults_through_owner_entity_unknown_chain() {
        let mut fields = HashMap::new();
        fields.insert("owner".to_string(), "Drake".to_string());
        let data = MatchData { pattern_name: "x".into(), fields };
        assert_eq!(data.player(), "Drake");

        let data2 = MatchData { pattern_name: "x".into(), fields: HashMap::new() };
        assert_eq!(data2.player(), "Unknown");
    }

    #[test]
    fn vip_patterns_silently_drop_invalid_entries() {
        let engine = engine();
        assert_eq!(engine.vip_compiled_count(), 2);
        assert_eq!(engine.vip_invalid_count(), 1);
    }

    #[test]
    fn vip_detection_is_independent_of_main_dispatch() {
        let engine = engine();
        let vip = engine.detect_vip("<2024-01-01> Bob has entered the area");
        assert!(vip.is_some());
        assert_eq!(vip.unwrap().pattern_name, "vip");
    }
}
