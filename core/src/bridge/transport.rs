//! Pluggable realtime transport (spec §4.5), modeled on the teacher's
//! `TopicBackend` trait (`data/topics/backend.rs`): an `async_trait`
//! abstraction over channel create/subscribe/presence/broadcast so the
//! bridge never depends on a specific realtime vendor.
//!
//! Only an in-memory loopback implementation ships here (spec §9 open
//! question) — a production deployment supplies its own `RealtimeTransport`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::BridgeError;

/// One presence record tracked under a channel (spec §4.5 "presence record").
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub key: String,
    pub fields: HashMap<String, serde_json::Value>,
}

/// Something arriving on a subscribed channel: either an application
/// broadcast or a presence-state change.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Broadcast { event_name: String, payload: serde_json::Value },
    Presence { joins: Vec<PresenceRecord>, leaves: Vec<PresenceRecord> },
}

pub type InboundStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn create_channel(&self, channel: &str) -> Result<(), BridgeError>;
    async fn subscribe(&self, channel: &str) -> Result<InboundStream, BridgeError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), BridgeError>;
    async fn track_presence(&self, channel: &str, record: PresenceRecord) -> Result<(), BridgeError>;
    async fn presence_state(&self, channel: &str) -> Result<Vec<PresenceRecord>, BridgeError>;
    async fn broadcast(&self, channel: &str, event_name: &str, payload: serde_json::Value) -> Result<(), BridgeError>;
}

struct ChannelState {
    sender: broadcast::Sender<InboundEvent>,
    presence: DashMap<String, PresenceRecord>,
}

/// In-process loopback transport: useful for tests and for single-process
/// deployments that don't need cross-process fanout.
pub struct InMemoryTransport {
    channels: DashMap<String, Arc<ChannelState>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    fn channel(&self, name: &str) -> Arc<ChannelState> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(1024);
                Arc::new(ChannelState { sender, presence: DashMap::new() })
            })
            .clone()
    }
}

#[async_trait]
impl RealtimeTransport for InMemoryTransport {
    async fn create_channel(&self, channel: &str) -> Result<(), BridgeError> {
        self.channel(channel);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<InboundStream, BridgeError> {
        let state = self.channel(channel);
        let rx = state.sender.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|res| res.ok());
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BridgeError> {
        self.channels.remove(channel);
        Ok(())
    }

    async fn track_presence(&self, channel: &str, record: PresenceRecord) -> Result<(), BridgeError> {
        let state = self.channel(channel);
        state.presence.insert(record.key.clone(), record.clone());
        let _ = state.sender.send(InboundEvent::Presence { joins: vec![record], leaves: Vec::new() });
        Ok(())
    }

    async fn presence_state(&self, channel: &str) -> Result<Vec<PresenceRecord>, BridgeError> {
        let state = self.channel(channel);
        Ok(state.presence.iter().map(|e| e.value().clone()).collect())
    }

    async fn broadcast(&self, channel: &str, event_name: &str, payload: serde_json::Value) -> Result<(), BridgeError> {
        let state = self.channel(channel);
        let _ = state.sender.send(InboundEvent::Broadcast { event_name: event_name.to_string(), payload });
        Ok(())
    }
}
