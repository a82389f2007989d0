//! Log tailer: file-watching loop wiring [`TailerState`] and [`PatternEngine`]
//! into [`MessageBus`] traffic (spec §4.3).
//!
//! Grounded on `original_source/src/log_analyzer.py`'s `LogFileHandler`
//! (seek/read/truncation detection, the one-shot "process everything then
//! exit" mode, special state patterns dispatched ahead of the general
//! pattern table) and `realtime_bridge.py`'s screenshot-folder watch feeding
//! the QR recovery pipeline.

pub mod patterns;
pub mod qr;
pub mod state;

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use notify_debouncer_full::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use regex::Regex;
use tokio::sync::mpsc;

use crate::bridge::RealtimeBridge;
use crate::bus::MessageBus;
use crate::constants::{
    SCREENSHOT_IGNORE_PREFIX, SCRIPT_VERSION, TAILER_DEBOUNCE_MS, TAILER_RETRY_BASE_DELAY_MS, TAILER_RETRY_MAX_ATTEMPTS,
};
use crate::dispatch::DispatchQueue;
use crate::error::TailerError;
use crate::message::{EventArgs, Message, MessageLevel};
use crate::profile::{ProfileOrigin, ProfileScraper, ProfileSubsystem};
use crate::retry::retry_with_backoff_async;

pub use patterns::{MatchData, PatternEngine, PatternEngineConfig};
pub use state::{StateEvent, TailerState};

/// Tailer configuration (spec §6 CLI/config surface).
#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub log_path: PathBuf,
    pub screenshot_dir: Option<PathBuf>,
    pub default_username: String,
    /// `-p/--process-all`: read the whole file from byte 0 instead of
    /// tailing from the current end. Only controls the starting offset.
    pub process_all: bool,
    /// `-o/--process-once`: exit after a single read pass instead of
    /// watching for further writes. Independent of `process_all`.
    pub process_once: bool,
}

fn context_establisher_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<(?P<timestamp>[^>]*)>.*?Context Establisher Done.*?resolving=(?P<mode>\w+).*?pImpl=(?P<nickname>\w+)")
            .expect("static regex")
    })
}

fn channel_disconnected_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<(?P<timestamp>[^>]*)>.*?Channel Disconnected.*?gamerules=(?P<gamerules>\w+)").expect("static regex")
    })
}

fn reuse_channel_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(?P<timestamp>[^>]*)>.*?ReuseChannel.*?version=(?P<version>[\w.]+)").expect("static regex"))
}

fn notify_service_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<(?P<timestamp>[^>]*)>.*?EALobby.*?NotifyServiceRequestResponse.*?mode=(?P<mode>\w+).*?network=(?P<network>\w+)")
            .expect("static regex")
    })
}

/// Handles to the other subsystems a generic pattern match can fan out to
/// (spec §4.3 steps 7-9). All `Option`: a tailer built for tests, or a
/// deployment that never configures `realtime`/`scraping` patterns, simply
/// leaves the unused ones `None`.
#[derive(Clone, Default)]
pub struct TailerDeps {
    /// Target for patterns in `google_sheets_mapping` (spec §4.3 step 7).
    pub dispatch: Option<DispatchQueue>,
    /// Target for patterns in `realtime` (spec §4.3 step 8).
    pub bridge: Option<RealtimeBridge>,
    /// Target for patterns in `scraping` (spec §4.3 step 9); requires a
    /// scraper to also be configured.
    pub profiles: Option<Arc<ProfileSubsystem>>,
    /// No concrete scraper ships with this crate (third-party scrapers are
    /// out of scope); step 9 is a no-op until a deployer supplies one.
    pub scraper: Option<Arc<dyn ProfileScraper>>,
}

/// Ties the pure FSM and the regex table to an actual file-watching loop and
/// the shared bus.
pub struct Tailer {
    config: TailerConfig,
    state: TailerState,
    patterns: PatternEngine,
    bus: MessageBus,
    deps: TailerDeps,
}

enum WatchSignal {
    LogChanged,
    Screenshot(PathBuf),
}

impl Tailer {
    pub fn new(config: TailerConfig, patterns: PatternEngine, bus: MessageBus) -> Self {
        Self::with_deps(config, patterns, bus, TailerDeps::default())
    }

    pub fn with_deps(config: TailerConfig, patterns: PatternEngine, bus: MessageBus, deps: TailerDeps) -> Self {
        let state = TailerState::new(config.default_username.clone());
        Self { config, state, patterns, bus, deps }
    }

    /// Runs the tailer until `process_once` completes its single pass or the
    /// bus is stopped (continuous watch mode).
    pub async fn run(&mut self) -> Result<(), TailerError> {
        self.open_and_drain().await?;

        if self.config.process_once {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<WatchSignal>();
        let _log_watcher = self.spawn_log_watcher(tx.clone())?;
        let _screenshot_watcher = match &self.config.screenshot_dir {
            Some(dir) => Some(self.spawn_screenshot_watcher(dir.clone(), tx.clone())?),
            None => None,
        };

        while let Some(signal) = rx.recv().await {
            match signal {
                WatchSignal::LogChanged => self.open_and_drain().await?,
                WatchSignal::Screenshot(path) => self.handle_screenshot(&path).await,
            }
        }

        Ok(())
    }

    fn spawn_log_watcher(
        &self,
        tx: mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Debouncer<RecommendedWatcher, RecommendedCache>, TailerError> {
        let (std_tx, std_rx) = std::sync::mpsc::channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(Duration::from_millis(TAILER_DEBOUNCE_MS), None, std_tx)?;
        let watch_target = self.config.log_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        debouncer.watch(&watch_target, RecursiveMode::NonRecursive)?;

        std::thread::spawn(move || {
            while let Ok(result) = std_rx.recv() {
                if result.is_ok() {
                    let _ = tx.send(WatchSignal::LogChanged);
                }
            }
        });

        Ok(debouncer)
    }

    fn spawn_screenshot_watcher(
        &self,
        dir: PathBuf,
        tx: mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Debouncer<RecommendedWatcher, RecommendedCache>, TailerError> {
        let (std_tx, std_rx) = std::sync::mpsc::channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(Duration::from_millis(TAILER_DEBOUNCE_MS), None, std_tx)?;
        debouncer.watch(&dir, RecursiveMode::NonRecursive)?;

        std::thread::spawn(move || {
            while let Ok(result) = std_rx.recv() {
                let Ok(events) = result else { continue };
                for event in events {
                    for path in event.paths {
                        let is_ignored = path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with(SCREENSHOT_IGNORE_PREFIX));
                        if !is_ignored {
                            let _ = tx.send(WatchSignal::Screenshot(path));
                        }
                    }
                }
            }
        });

        Ok(debouncer)
    }

    /// Opens the log file (retrying on a transient not-found), detects
    /// truncation, reads every line appended since `last_position` and
    /// dispatches each through the pattern engine.
    async fn open_and_drain(&mut self) -> Result<(), TailerError> {
        let path = self.config.log_path.clone();
        let process_all = self.config.process_all;
        let mut attempts_err = None;

        let file = retry_with_backoff_async(TAILER_RETRY_MAX_ATTEMPTS, TAILER_RETRY_BASE_DELAY_MS, || {
            let path = path.clone();
            async move { File::open(&path).map_err(TailerError::Io).map(|_| ()) }
        })
        .await;

        if let Err((err, _attempts)) = file {
            attempts_err = Some(err);
        }
        if let Some(err) = attempts_err {
            return Err(err);
        }

        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len < self.state.last_position {
            tracing::info!(?path, "log file truncated, resetting tailer state");
            let events = self.state.reset(self.config.default_username.clone());
            self.apply_events(events).await;
            self.sync_bridge_context();
        }

        let start = if process_all { 0 } else { self.state.last_position };
        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        loop {
            line.clear();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            self.state.last_position += bytes as u64;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if !trimmed.is_empty() {
                self.process_line(trimmed).await;
            }
        }

        Ok(())
    }

    /// VIP detection always runs, independent of whichever dispatch path the
    /// line takes (spec §4.3 "VIP detection"); special state patterns are
    /// checked before the general pattern table, matching the original's
    /// ordering.
    async fn process_line(&mut self, line: &str) {
        if let Some(vip) = self.patterns.detect_vip(line) {
            let mut args = EventArgs::new();
            if let Some(name) = vip.get("vip") {
                args.args.push(serde_json::Value::String(name.to_string()));
            }
            let _ = self.bus.emit("vip_detected", args).await;
        }

        if let Some(caps) = context_establisher_regex().captures(line) {
            let mode = caps.name("mode").map(|m| m.as_str().to_string()).unwrap_or_default();
            let nickname = caps.name("nickname").map(|m| m.as_str().to_string());
            let events = self.state.enter_mode(mode, nickname);
            self.apply_events(events).await;
            self.sync_bridge_context();
            return;
        }

        if let Some(caps) = channel_disconnected_regex().captures(line) {
            let gamerules = caps.name("gamerules").map(|m| m.as_str()).unwrap_or_default();
            if let Some(events) = self.state.exit_mode(gamerules) {
                self.apply_events(events).await;
                self.sync_bridge_context();
            }
            return;
        }

        if let Some(caps) = reuse_channel_regex().captures(line) {
            let version = caps.name("version").map(|m| m.as_str().to_string()).unwrap_or_default();
            if let Some(events) = self.state.update_server_version(version) {
                self.apply_events(events).await;
                self.sync_bridge_context();
            }
            return;
        }

        if let Some(caps) = notify_service_regex().captures(line) {
            let mode = caps.name("mode").map(|m| m.as_str()).unwrap_or_default();
            let network = caps.name("network").map(|m| m.as_str()).unwrap_or_default();
            self.state.update_lobby_block(mode, network);
            self.sync_bridge_context();
            return;
        }

        if let Some(data) = self.patterns.match_line(line) {
            self.dispatch_generic(&data).await;
        }
    }

    /// Renders a general-pattern match into a bus [`Message`], gated by PTU
    /// and private-lobby-recording suppression, then fans the same match out
    /// to the Dispatch Pipeline, the realtime bridge, and profile
    /// enrichment depending on which pattern maps configure it (spec §4.3
    /// steps 4, 6-9).
    async fn dispatch_generic(&self, data: &MatchData) {
        if self.state.is_ptu() {
            tracing::debug!(pattern = %data.pattern_name, "suppressed: PTU build");
            return;
        }
        if self.state.block_private_lobby_recording {
            tracing::debug!(pattern = %data.pattern_name, "suppressed: private lobby recording blocked");
            return;
        }

        let content = match self.patterns.template_for(&data.pattern_name) {
            Some(template) => data.format(template),
            None => format!("{}: {}", data.pattern_name, data.player()),
        };

        let mut message = Message::builder(content.clone()).level(MessageLevel::Info).pattern_name(data.pattern_name.clone());
        for (key, value) in &data.fields {
            message = message.metadata_entry(key.clone(), serde_json::Value::String(value.clone()));
        }
        if let Some(mode) = &self.state.current_mode {
            message = message.metadata_entry("mode", mode.clone());
        }
        if let Some(shard) = &self.state.current_shard {
            message = message.metadata_entry("shard", shard.clone());
        }
        message = message.metadata_entry("username", self.state.username.clone());
        if let Some(version) = &self.state.current_version {
            message = message.metadata_entry("version", version.clone());
        }
        message = message.metadata_entry("script_version", SCRIPT_VERSION);
        message = message.metadata_entry("datetime", chrono::Utc::now().to_rfc3339());

        let _ = self.bus.publish(message.build()).await;

        if self.patterns.is_sheet_bound(&data.pattern_name) {
            if let Some(dispatch) = &self.deps.dispatch {
                let mut payload = serde_json::Map::new();
                for (key, value) in &data.fields {
                    payload.insert(key.clone(), serde_json::Value::String(value.clone()));
                }
                payload.insert("pattern".to_string(), serde_json::Value::String(data.pattern_name.clone()));
                payload.insert("content".to_string(), serde_json::Value::String(content.clone()));
                if let Err(err) = dispatch.enqueue(serde_json::Value::Object(payload), &data.pattern_name) {
                    tracing::warn!(pattern = %data.pattern_name, error = %err, "failed to enqueue dispatch item");
                }
            }
        }

        if self.patterns.is_realtime(&data.pattern_name) {
            if let Some(bridge) = &self.deps.bridge {
                let payload = serde_json::json!({
                    "pattern": data.pattern_name,
                    "content": content,
                    "fields": data.fields,
                });
                if let Err(err) = bridge.broadcast(payload).await {
                    tracing::warn!(pattern = %data.pattern_name, error = %err, "failed to broadcast realtime event");
                }
            }
        }

        if self.patterns.is_scraping(&data.pattern_name) {
            if let (Some(profiles), Some(scraper)) = (&self.deps.profiles, &self.deps.scraper) {
                let player = data.player().to_string();
                let profiles = profiles.clone();
                let scraper = scraper.clone();
                let requested_by = self.state.username.clone();
                tokio::spawn(async move {
                    if let Some(profile_data) = scraper.scrape(&player).await {
                        profiles.record_profile(&player, profile_data, ProfileOrigin::Automatic, &requested_by).await;
                    }
                });
            }
        }
    }

    /// Keeps the realtime bridge's gating/filter context in lockstep with
    /// the state machine, so outbound PTU/lobby-block suppression and
    /// inbound mode/shard filtering (bridge §4.5) see live values instead of
    /// `BridgeContext::default()` forever.
    fn sync_bridge_context(&self) {
        if let Some(bridge) = &self.deps.bridge {
            bridge.update_context(
                self.state.current_mode.clone(),
                self.state.current_shard.clone(),
                self.state.is_ptu(),
                self.state.block_private_lobby_recording,
            );
        }
    }

    async fn handle_screenshot(&mut self, path: &Path) {
        let path = path.to_path_buf();
        let recovery = tokio::task::spawn_blocking(move || qr::recover_shard_version(&path)).await;
        match recovery {
            Ok(Ok(recovery)) => {
                if let Some(events) = self.state.update_shard_version_from_qr(recovery.shard, recovery.version) {
                    self.apply_events(events).await;
                    self.sync_bridge_context();
                }
            }
            Ok(Err(err)) => tracing::debug!(%err, "QR recovery failed for screenshot"),
            Err(err) => tracing::warn!(%err, "QR recovery task panicked"),
        }
    }

    async fn apply_events(&self, events: Vec<StateEvent>) {
        for event in events {
            match event {
                StateEvent::ModeChange { new_mode, old_mode } => {
                    let mut args = EventArgs::new();
                    args.kwargs.insert("new_mode".into(), opt_string(new_mode));
                    args.kwargs.insert("old_mode".into(), opt_string(old_mode));
                    let _ = self.bus.emit("mode_change", args).await;
                }
                StateEvent::ShardVersionUpdate { shard, version, username, mode } => {
                    let mut args = EventArgs::new();
                    args.kwargs.insert("shard".into(), opt_string(shard));
                    args.kwargs.insert("version".into(), opt_string(version));
                    args.kwargs.insert("username".into(), serde_json::Value::String(username));
                    args.kwargs.insert("mode".into(), opt_string(mode));
                    let _ = self.bus.emit("shard_version_update", args).await;
                }
                StateEvent::UsernameChange { new_username, old_username } => {
                    let mut args = EventArgs::new();
                    args.kwargs.insert("new_username".into(), serde_json::Value::String(new_username));
                    args.kwargs.insert("old_username".into(), serde_json::Value::String(old_username));
                    let _ = self.bus.emit("username_change", args).await;
                }
                StateEvent::RealtimeDisconnect => {
                    let _ = self.bus.emit("realtime_disconnect", EventArgs::new()).await;
                }
            }
        }
    }
}

fn opt_string(value: Option<String>) -> serde_json::Value {
    match value {
        Some(v) => serde_json::Value::String(v),
        None => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn engine() -> PatternEngine {
        let mut regex_patterns = Vec::new();
        regex_patterns.push((
            "player_death".to_string(),
            r"<(?P<timestamp>.*?)> Killer: (?P<killer>\w+) Victim: (?P<victim>\w+)".to_string(),
        ));
        let mut messages = std::collections::HashMap::new();
        messages.insert("player_death".to_string(), "{killer} killed {victim}".to_string());

        PatternEngine::compile(PatternEngineConfig {
            regex_patterns,
            messages,
            google_sheets_mapping: std::collections::HashSet::new(),
            realtime: std::collections::HashSet::new(),
            scraping: std::collections::HashSet::new(),
            important_players: String::new(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn process_all_drains_entire_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.log");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "<2024-01-01> Killer: Bob Victim: Alice").unwrap();
            writeln!(f, "<2024-01-01> Killer: Carl Victim: Dave").unwrap();
        }

        let bus = MessageBus::start();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.subscribe("recorder", Default::default(), std::sync::Arc::new(move |msg: &Message| {
            let _ = tx.send(msg.content.clone());
        }))
        .await
        .unwrap();

        let config = TailerConfig {
            log_path: path,
            screenshot_dir: None,
            default_username: "default".into(),
            process_all: true,
            process_once: true,
        };
        let mut tailer = Tailer::new(config, engine(), bus);
        tailer.run().await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, "Bob killed Alice");
        assert_eq!(second, "Carl killed Dave");
    }

    #[tokio::test]
    async fn context_establisher_line_drives_state_transition() {
        let bus = MessageBus::start();
        let config = TailerConfig {
            log_path: PathBuf::from("unused.log"),
            screenshot_dir: None,
            default_username: "default".into(),
            process_all: true,
            process_once: true,
        };
        let mut tailer = Tailer::new(config, engine(), bus);
        tailer
            .process_line("<2024-01-01> Context Establisher Done: resolving=SC_Default pImpl=PlayerOne extra")
            .await;
        assert_eq!(tailer.state.current_mode.as_deref(), Some("SC_Default"));
        assert_eq!(tailer.state.username, "PlayerOne");
    }

    #[tokio::test]
    async fn ptu_version_suppresses_generic_dispatch() {
        let bus = MessageBus::start();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.subscribe("recorder", Default::default(), std::sync::Arc::new(move |msg: &Message| {
            let _ = tx.send(msg.content.clone());
        }))
        .await
        .unwrap();

        let config = TailerConfig {
            log_path: PathBuf::from("unused.log"),
            screenshot_dir: None,
            default_username: "default".into(),
            process_all: true,
            process_once: true,
        };
        let mut tailer = Tailer::new(config, engine(), bus);
        tailer.state.current_version = Some("PTU-4.5".into());
        tailer.process_line("<2024-01-01> Killer: Bob Victim: Alice").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "PTU build must suppress dispatch");
    }

    fn engine_with(
        sheet_bound: std::collections::HashSet<String>,
        realtime: std::collections::HashSet<String>,
        scraping: std::collections::HashSet<String>,
    ) -> PatternEngine {
        let regex_patterns = vec![(
            "player_death".to_string(),
            r"<(?P<timestamp>.*?)> Killer: (?P<killer>\w+) Victim: (?P<player>\w+)".to_string(),
        )];
        let mut messages = std::collections::HashMap::new();
        messages.insert("player_death".to_string(), "{killer} killed {player}".to_string());

        PatternEngine::compile(PatternEngineConfig {
            regex_patterns,
            messages,
            google_sheets_mapping: sheet_bound,
            realtime,
            scraping,
            important_players: String::new(),
        })
        .unwrap()
    }

    fn unused_config() -> TailerConfig {
        TailerConfig {
            log_path: PathBuf::from("unused.log"),
            screenshot_dir: None,
            default_username: "default".into(),
            process_all: true,
            process_once: true,
        }
    }

    struct RecordingProvider {
        tx: tokio::sync::mpsc::UnboundedSender<crate::dispatch::DispatchItem>,
    }

    #[async_trait::async_trait]
    impl crate::dispatch::DataProvider for RecordingProvider {
        async fn is_connected(&self) -> bool {
            true
        }
        async fn fetch_data(&self, _sheet: &str, _username: Option<&str>) -> Result<Vec<serde_json::Value>, crate::error::DispatchError> {
            Ok(Vec::new())
        }
        async fn process_data(&self, batch: Vec<crate::dispatch::DispatchItem>) -> Result<(), crate::error::DispatchError> {
            for item in batch {
                let _ = self.tx.send(item);
            }
            Ok(())
        }
        async fn purge(&self, _sheet: &str) -> Result<(), crate::error::DispatchError> {
            Ok(())
        }
        async fn fetch_record_hashes(
            &self,
            _sheet: &str,
        ) -> Result<std::collections::HashMap<String, String>, crate::error::DispatchError> {
            Ok(std::collections::HashMap::new())
        }
        async fn ensure_dynamic_views(&self, _config: &serde_json::Value) -> Result<(), crate::error::DispatchError> {
            Ok(())
        }
        async fn view_exists(&self, _name: &str) -> Result<bool, crate::error::DispatchError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn sheet_bound_match_enqueues_to_dispatch_pipeline() {
        let bus = MessageBus::start();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let provider = Arc::new(RecordingProvider { tx });
        let dispatch = DispatchQueue::start(provider);

        let mut sheet_bound = std::collections::HashSet::new();
        sheet_bound.insert("player_death".to_string());
        let deps = TailerDeps { dispatch: Some(dispatch), ..Default::default() };

        let mut tailer = Tailer::with_deps(
            unused_config(),
            engine_with(sheet_bound, Default::default(), Default::default()),
            bus,
            deps,
        );
        tailer.process_line("<2024-01-01> Killer: Bob Victim: Alice").await;

        let item = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.unwrap().unwrap();
        assert_eq!(item.sheet, "player_death");
    }

    #[tokio::test]
    async fn realtime_pattern_broadcasts_through_bridge() {
        use crate::bridge::transport::InMemoryTransport;
        use crate::bridge::{BridgeConfig, RealtimeBridge, RealtimeTransport};
        use tokio_stream::StreamExt;

        let bus = MessageBus::start();
        let transport = Arc::new(InMemoryTransport::new());
        let bridge = RealtimeBridge::start(
            BridgeConfig { username: "alice".into(), auto_reconnect: false, excluded_content: Vec::new() },
            transport.clone(),
            bus.clone(),
        );
        bridge.connect().await.unwrap();
        let mut stream = transport.subscribe("general").await.unwrap();

        let mut realtime = std::collections::HashSet::new();
        realtime.insert("player_death".to_string());
        let deps = TailerDeps { bridge: Some(bridge), ..Default::default() };

        let mut tailer =
            Tailer::with_deps(unused_config(), engine_with(Default::default(), realtime, Default::default()), bus, deps);
        tailer.process_line("<2024-01-01> Killer: Bob Victim: Alice").await;

        let event = tokio::time::timeout(Duration::from_millis(500), stream.next()).await.unwrap().unwrap();
        let crate::bridge::InboundEvent::Broadcast { payload, .. } = event else {
            panic!("expected a broadcast event");
        };
        assert_eq!(payload["event_data"]["pattern"], "player_death");
    }

    /// Exercises comments 2 and 4 together: a "ReuseChannel" line first
    /// flips `current_version` to a PTU build, which must reach the bridge's
    /// context via [`Tailer::sync_bridge_context`] before the realtime
    /// pattern match is dispatched, so the broadcast is suppressed exactly
    /// as an outbound PTU broadcast would be.
    #[tokio::test]
    async fn synced_ptu_context_suppresses_realtime_broadcast() {
        use crate::bridge::transport::InMemoryTransport;
        use crate::bridge::{BridgeConfig, RealtimeBridge, RealtimeTransport};
        use tokio_stream::StreamExt;

        let bus = MessageBus::start();
        let transport = Arc::new(InMemoryTransport::new());
        let bridge = RealtimeBridge::start(
            BridgeConfig { username: "alice".into(), auto_reconnect: false, excluded_content: Vec::new() },
            transport.clone(),
            bus.clone(),
        );
        bridge.connect().await.unwrap();
        let mut stream = transport.subscribe("general").await.unwrap();

        let mut realtime = std::collections::HashSet::new();
        realtime.insert("player_death".to_string());
        let deps = TailerDeps { bridge: Some(bridge), ..Default::default() };

        let mut tailer =
            Tailer::with_deps(unused_config(), engine_with(Default::default(), realtime, Default::default()), bus, deps);
        tailer.process_line("<2024-01-01> ReuseChannel version=PTU-4.5.0").await;
        tailer.process_line("<2024-01-01> Killer: Bob Victim: Alice").await;

        let result = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(result.is_err(), "synced PTU context must suppress the realtime broadcast");
    }

    struct StaticScraper {
        profile: serde_json::Value,
    }

    #[async_trait::async_trait]
    impl ProfileScraper for StaticScraper {
        async fn scrape(&self, _player_name: &str) -> Option<serde_json::Value> {
            Some(self.profile.clone())
        }
    }

    #[tokio::test]
    async fn scraping_pattern_records_profile() {
        let bus = MessageBus::start();
        let profiles = Arc::new(ProfileSubsystem::new(bus.clone(), "alice"));
        let scraper: Arc<dyn ProfileScraper> = Arc::new(StaticScraper { profile: serde_json::json!({"org": "Test"}) });

        let mut scraping = std::collections::HashSet::new();
        scraping.insert("player_death".to_string());
        let deps = TailerDeps { profiles: Some(profiles.clone()), scraper: Some(scraper), ..Default::default() };

        let mut tailer =
            Tailer::with_deps(unused_config(), engine_with(Default::default(), Default::default(), scraping), bus, deps);
        tailer.process_line("<2024-01-01> Killer: Bob Victim: Alice").await;

        for _ in 0..20 {
            if profiles.cache().contains("Alice") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(profiles.cache().contains("Alice"));
    }
}
