//! Realtime presence/broadcast bridge (spec §4.5).
//!
//! Grounded on `original_source/src/helpers/core/realtime_bridge.py`'s
//! `RealtimeBridge`: that implementation ran its own dedicated asyncio
//! event-loop thread and serialized calls into it with a thread-safe
//! `submit`. Here the same serialization is achieved the way the bus worker
//! does it (spec §9, `bus::mod`) — a single actor task draining a command
//! queue — rather than a second runtime thread.

pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;

use crate::bus::MessageBus;
use crate::constants::{
    BRIDGE_SUBMIT_TIMEOUT_SECS, DEFAULT_HEARTBEAT_INTERVAL_SECS, PING_MISSING_THRESHOLD_SECS,
    PING_WATCHDOG_POLL_SECS, REALTIME_CHANNEL_NAME, REALTIME_EVENT_NAME,
};
use crate::error::BridgeError;
use crate::message::EventArgs;

pub use transport::{InboundEvent, PresenceRecord, RealtimeTransport};

/// Explicit bridge state machine (spec §4.5 "state machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
    Heartbeating,
    Disconnecting,
}

/// Shared, frequently-updated context the tailer keeps current (mode/shard/
/// gating flags) — read on every outbound broadcast and every inbound
/// filter pass, so it is a plain `RwLock`, not routed through the command
/// queue.
#[derive(Debug, Clone, Default)]
pub struct BridgeContext {
    pub mode: Option<String>,
    pub shard: Option<String>,
    pub is_ptu: bool,
    pub block_private_lobby_recording: bool,
}

pub struct BridgeConfig {
    pub username: String,
    pub auto_reconnect: bool,
    pub excluded_content: Vec<String>,
}

/// Callback invoked for a locally-surfaced notification (spec §4.5 "optional
/// OS-notification trigger"). No OS-notification crate is carried in the
/// teacher's stack or the rest of the pack, so this is left pluggable rather
/// than bundling one.
pub type NotificationSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

enum Command {
    Connect { reply: oneshot::Sender<Result<(), BridgeError>> },
    Disconnect { reply: oneshot::Sender<Result<(), BridgeError>> },
    Reconnect { reply: oneshot::Sender<Result<(), BridgeError>> },
    Broadcast { payload: serde_json::Value, reply: oneshot::Sender<Result<(), BridgeError>> },
    GetState { reply: oneshot::Sender<BridgeState> },
    Stop,
}

/// A presence record carries the fields worth re-broadcasting on change
/// (spec §4.5 "re-track dedup against last-tracked record") — here just the
/// tailer-derived mode/shard, so a heartbeat tick with no state change is a
/// no-op instead of redundant transport traffic.
fn presence_record_from_context(username: &str, ctx: &BridgeContext) -> PresenceRecord {
    let mut fields = HashMap::new();
    fields.insert("mode".to_string(), ctx.mode.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
    fields.insert("shard".to_string(), ctx.shard.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
    PresenceRecord { key: username.to_string(), fields }
}

struct Worker {
    config: BridgeConfig,
    transport: Arc<dyn RealtimeTransport>,
    bus: MessageBus,
    context: Arc<RwLock<BridgeContext>>,
    notification_sink: Option<NotificationSink>,
    state: BridgeState,
    last_tracked_presence: Arc<RwLock<Option<PresenceRecord>>>,
    /// Last instant any ping (self-emitted heartbeat or inbound) was seen.
    /// Read directly by the watchdog rather than through bus history, since
    /// pings are Events and never land in the Message history ring.
    last_any_ping: Arc<RwLock<Instant>>,
    reconnecting: bool,
    heartbeat_handle: Option<tokio::task::JoinHandle<()>>,
    watchdog_handle: Option<tokio::task::JoinHandle<()>>,
    inbound_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Worker {
    async fn connect(&mut self) -> Result<(), BridgeError> {
        if self.config.username.trim().is_empty() {
            return Err(BridgeError::NoUsername);
        }
        self.state = BridgeState::Connecting;

        self.transport.create_channel(REALTIME_CHANNEL_NAME).await?;
        let stream = self.transport.subscribe(REALTIME_CHANNEL_NAME).await?;

        let record = presence_record_from_context(&self.config.username, &self.context.read());
        self.transport.track_presence(REALTIME_CHANNEL_NAME, record.clone()).await?;
        *self.last_tracked_presence.write() = Some(record);

        let bus = self.bus.clone();
        let context = self.context.clone();
        let notification_sink = self.notification_sink.clone();
        let username = self.config.username.clone();
        let excluded_content = self.config.excluded_content.clone();
        let transport = self.transport.clone();
        let last_any_ping = self.last_any_ping.clone();
        let inbound_handle = tokio::spawn(run_inbound_pipeline(
            stream,
            bus,
            context,
            notification_sink,
            username,
            excluded_content,
            transport,
            last_any_ping,
        ));
        self.inbound_handle = Some(inbound_handle);

        self.state = BridgeState::Connected;
        let _ = self.bus.emit("realtime_connected", EventArgs::with_args(vec![serde_json::Value::String(self.config.username.clone())])).await;

        self.start_heartbeat();
        self.start_watchdog();
        self.state = BridgeState::Heartbeating;
        Ok(())
    }

    fn start_heartbeat(&mut self) {
        let transport = self.transport.clone();
        let bus = self.bus.clone();
        let username = self.config.username.clone();
        let context = self.context.clone();
        let last_tracked = self.last_tracked_presence.clone();
        let last_any_ping = self.last_any_ping.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS));
            interval.tick().await;
            loop {
                interval.tick().await;
                let record = presence_record_from_context(&username, &context.read());
                let unchanged = last_tracked.read().as_ref() == Some(&record);
                if unchanged {
                    tracing::debug!("presence unchanged since last track, skipping re-track");
                } else if transport.track_presence(REALTIME_CHANNEL_NAME, record.clone()).await.is_err() {
                    tracing::warn!("heartbeat presence re-track failed");
                } else {
                    *last_tracked.write() = Some(record);
                }
                *last_any_ping.write() = Instant::now();
                let mut args = EventArgs::new();
                args.kwargs.insert("type".into(), serde_json::Value::String("ping".into()));
                let _ = bus.emit("realtime_event", args).await;
            }
        });
        self.heartbeat_handle = Some(handle);
    }

    fn start_watchdog(&mut self) {
        // `last_any_ping` is updated directly by the heartbeat task and by
        // the inbound pipeline on every received ping, so this never touches
        // bus history (pings are Events, invisible to `get_history`).
        let bus = self.bus.clone();
        let transport = self.transport.clone();
        let auto_reconnect = self.config.auto_reconnect;
        let username = self.config.username.clone();
        let last_any_ping = self.last_any_ping.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(PING_WATCHDOG_POLL_SECS));
            let mut missing_emitted = false;
            loop {
                interval.tick().await;
                let elapsed = last_any_ping.read().elapsed().as_secs() as i64;
                if elapsed >= PING_MISSING_THRESHOLD_SECS {
                    if !missing_emitted {
                        missing_emitted = true;
                        let _ = transport.broadcast(REALTIME_CHANNEL_NAME, "ping_missing", serde_json::json!({"username": username})).await;
                        let mut args = EventArgs::new();
                        args.kwargs.insert("username".into(), serde_json::Value::String(username.clone()));
                        let _ = bus.emit("broadcast_ping_missing", args).await;
                    }
                    if auto_reconnect {
                        tracing::warn!("ping missing beyond threshold, auto-reconnecting");
                        // Reconnect is issued by the owning RealtimeBridge via its
                        // own submit() call from the public watchdog-triggered path;
                        // this task only raises the signal through the bus so the
                        // app layer (holding the actual RealtimeBridge handle) can
                        // act on it without a reentrant submit() from inside the
                        // worker loop.
                        let _ = bus.emit("realtime_reconnect_requested", EventArgs::new()).await;
                        missing_emitted = false;
                        *last_any_ping.write() = Instant::now();
                    }
                } else {
                    missing_emitted = false;
                }
            }
        });
        self.watchdog_handle = Some(handle);
    }

    async fn disconnect(&mut self) -> Result<(), BridgeError> {
        self.state = BridgeState::Disconnecting;
        if let Some(h) = self.heartbeat_handle.take() {
            h.abort();
        }
        if let Some(h) = self.watchdog_handle.take() {
            h.abort();
        }
        if let Some(h) = self.inbound_handle.take() {
            h.abort();
        }
        let _ = self.transport.unsubscribe(REALTIME_CHANNEL_NAME).await;
        *self.last_tracked_presence.write() = None;
        self.state = BridgeState::Disconnected;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), BridgeError> {
        if self.reconnecting {
            tracing::warn!("reconnect already in progress, ignoring concurrent request");
            return Err(BridgeError::ReconnectInProgress);
        }
        self.reconnecting = true;
        let result = async {
            self.disconnect().await?;
            self.connect().await
        }
        .await;
        self.reconnecting = false;
        if result.is_ok() {
            let _ = self.bus.emit("realtime_reconnected", EventArgs::new()).await;
        }
        result
    }

    async fn broadcast(&mut self, payload: serde_json::Value) -> Result<(), BridgeError> {
        let ctx = self.context.read().clone();
        if ctx.is_ptu || ctx.block_private_lobby_recording {
            tracing::debug!("broadcast suppressed by PTU/private-lobby gating");
            return Ok(());
        }
        let envelope = serde_json::json!({
            "username": self.config.username,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "shard": ctx.shard,
            "event_data": payload,
        });
        self.transport.broadcast(REALTIME_CHANNEL_NAME, REALTIME_EVENT_NAME, envelope).await
    }

    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Connect { reply } => {
                let _ = reply.send(self.connect().await);
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::Reconnect { reply } => {
                let _ = reply.send(self.reconnect().await);
            }
            Command::Broadcast { payload, reply } => {
                let _ = reply.send(self.broadcast(payload).await);
            }
            Command::GetState { reply } => {
                let _ = reply.send(self.state);
            }
            Command::Stop => {
                let _ = self.disconnect().await;
                return false;
            }
        }
        true
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_inbound_pipeline(
    mut stream: transport::InboundStream,
    bus: MessageBus,
    context: Arc<RwLock<BridgeContext>>,
    notification_sink: Option<NotificationSink>,
    own_username: String,
    excluded_content: Vec<String>,
    transport: Arc<dyn RealtimeTransport>,
    last_any_ping: Arc<RwLock<Instant>>,
) {
    while let Some(event) = stream.next().await {
        let InboundEvent::Broadcast { event_name, payload } = event else { continue };

        if event_name == "ping" {
            *last_any_ping.write() = Instant::now();
            let mut args = EventArgs::new();
            args.kwargs.insert("type".into(), serde_json::Value::String("ping".into()));
            let _ = bus.emit("realtime_event", args).await;
            continue;
        }

        if payload.get("type").and_then(|v| v.as_str()) == Some("actor_profile") {
            let mut args = EventArgs::new();
            args.kwargs.insert("payload".into(), payload);
            let _ = bus.emit("actor_profile_received", args).await;
            continue;
        }

        let ctx = context.read().clone();
        if let Some(event_mode) = payload.get("mode").and_then(|v| v.as_str()) {
            let mismatched = ctx.mode.as_deref().is_some_and(|m| m != "Unknown" && event_mode != "Unknown" && m != event_mode);
            if mismatched {
                continue;
            }
        }
        if let Some(event_shard) = payload.get("shard").and_then(|v| v.as_str()) {
            let mismatched = ctx.shard.as_deref().is_some_and(|s| s != "Unknown" && event_shard != "Unknown" && s != event_shard);
            if mismatched {
                continue;
            }
        }

        let content = payload.get("event_data").and_then(|v| v.get("content")).and_then(|v| v.as_str()).unwrap_or("");
        if excluded_content.iter().any(|needle| content.contains(needle.as_str())) {
            continue;
        }

        let sender = payload.get("username").and_then(|v| v.as_str()).unwrap_or("");
        if sender == own_username {
            continue;
        }
        if !sender.is_empty() {
            match transport.presence_state(REALTIME_CHANNEL_NAME).await {
                Ok(presence) if !presence.iter().any(|p| p.key == sender) => continue,
                Err(_) => continue,
                _ => {}
            }
        }

        if let Some(sink) = &notification_sink {
            sink(sender, content);
        }

        let mut args = EventArgs::new();
        args.kwargs.insert("payload".into(), payload);
        let _ = bus.emit("remote_realtime_event", args).await;
    }
}

/// Handle to the bridge's single-task worker; every call is routed through
/// `submit()`, so reconnect/connect/disconnect/broadcast can never race each
/// other (spec §8 "concurrent reconnect calls are serialized").
#[derive(Clone)]
pub struct RealtimeBridge {
    tx: mpsc::UnboundedSender<Command>,
    context: Arc<RwLock<BridgeContext>>,
    stopped: Arc<AtomicBool>,
}

impl RealtimeBridge {
    pub fn start(config: BridgeConfig, transport: Arc<dyn RealtimeTransport>, bus: MessageBus) -> Self {
        Self::start_with_notifications(config, transport, bus, None)
    }

    pub fn start_with_notifications(
        config: BridgeConfig,
        transport: Arc<dyn RealtimeTransport>,
        bus: MessageBus,
        notification_sink: Option<NotificationSink>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let context = Arc::new(RwLock::new(BridgeContext::default()));
        let mut worker = Worker {
            config,
            transport,
            bus,
            context: context.clone(),
            notification_sink,
            state: BridgeState::Disconnected,
            last_tracked_presence: Arc::new(RwLock::new(None)),
            last_any_ping: Arc::new(RwLock::new(Instant::now())),
            reconnecting: false,
            heartbeat_handle: None,
            watchdog_handle: None,
            inbound_handle: None,
        };
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                if !worker.handle(cmd).await {
                    break;
                }
            }
        });
        Self { tx, context, stopped: Arc::new(AtomicBool::new(false)) }
    }

    async fn submit<T>(&self, make_cmd: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, BridgeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make_cmd(reply_tx)).map_err(|_| BridgeError::LoopNotRunning)?;
        tokio::time::timeout(Duration::from_secs(BRIDGE_SUBMIT_TIMEOUT_SECS), reply_rx)
            .await
            .map_err(|_| BridgeError::SubmitTimeout(Duration::from_secs(BRIDGE_SUBMIT_TIMEOUT_SECS)))?
            .map_err(|_| BridgeError::LoopNotRunning)
    }

    pub async fn connect(&self) -> Result<(), BridgeError> {
        self.submit(|reply| Command::Connect { reply }).await?
    }

    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        self.submit(|reply| Command::Disconnect { reply }).await?
    }

    pub async fn reconnect(&self) -> Result<(), BridgeError> {
        self.submit(|reply| Command::Reconnect { reply }).await?
    }

    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<(), BridgeError> {
        self.submit(|reply| Command::Broadcast { payload, reply }).await?
    }

    pub async fn state(&self) -> Result<BridgeState, BridgeError> {
        self.submit(|reply| Command::GetState { reply }).await
    }

    pub fn update_context(&self, mode: Option<String>, shard: Option<String>, is_ptu: bool, block_private_lobby_recording: bool) {
        let mut ctx = self.context.write();
        ctx.mode = mode;
        ctx.shard = shard;
        ctx.is_ptu = is_ptu;
        ctx.block_private_lobby_recording = block_private_lobby_recording;
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Command::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::InMemoryTransport;

    fn config(username: &str) -> BridgeConfig {
        BridgeConfig { username: username.to_string(), auto_reconnect: false, excluded_content: Vec::new() }
    }

    #[tokio::test]
    async fn connect_then_state_is_connected() {
        let bridge = RealtimeBridge::start(config("alice"), Arc::new(InMemoryTransport::new()), MessageBus::start());
        bridge.connect().await.unwrap();
        assert_eq!(bridge.state().await.unwrap(), BridgeState::Heartbeating);
    }

    #[tokio::test]
    async fn connect_rejects_empty_username() {
        let bridge = RealtimeBridge::start(config(""), Arc::new(InMemoryTransport::new()), MessageBus::start());
        assert!(matches!(bridge.connect().await, Err(BridgeError::NoUsername)));
    }

    #[tokio::test]
    async fn disconnect_then_reconnect_restores_connected_state() {
        let bridge = RealtimeBridge::start(config("alice"), Arc::new(InMemoryTransport::new()), MessageBus::start());
        bridge.connect().await.unwrap();
        bridge.disconnect().await.unwrap();
        assert_eq!(bridge.state().await.unwrap(), BridgeState::Disconnected);
        bridge.reconnect().await.unwrap();
        assert_eq!(bridge.state().await.unwrap(), BridgeState::Heartbeating);
    }

    #[tokio::test]
    async fn broadcast_suppressed_by_ptu_context() {
        let transport = Arc::new(InMemoryTransport::new());
        let bus = MessageBus::start();
        let bridge = RealtimeBridge::start(config("alice"), transport.clone(), bus);
        bridge.connect().await.unwrap();
        bridge.update_context(None, None, true, false);

        let mut stream = transport.subscribe(REALTIME_CHANNEL_NAME).await.unwrap();
        bridge.broadcast(serde_json::json!({"content": "hello"})).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(result.is_err(), "PTU context must suppress outbound broadcast");
    }
}
