//! The Message Bus (spec §3/§4.2): in-process pub/sub with bounded history
//! replay, independent level filtering per subscriber, and a distinct
//! named-event channel.
//!
//! All mutating and replay-sensitive operations — publish, subscribe (with
//! optional replay), unsubscribe — are serialized through a single worker
//! task reading one unbounded [`mpsc`] queue. That gives the "no live
//! message interleaves ahead of a new subscriber's replay" guarantee (spec
//! §8 scenario 4) for free: the queue order *is* the delivery order, so a
//! `Subscribe` command always finishes replaying history before any
//! `Publish` enqueued after it is processed.

mod filter;
mod history;

pub use filter::{FilterMap, FilterValue};

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::constants::{BUS_QUEUE_CAPACITY, DEFAULT_HISTORY_CAPACITY};
use crate::error::BusError;
use crate::message::{EventArgs, Message, MessageLevel};

use history::HistoryRing;

pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(&EventArgs) + Send + Sync>;

struct Subscriber {
    name: String,
    filters: FilterMap,
    callback: MessageCallback,
}

struct EventSubscriber {
    id: u64,
    callback: EventCallback,
}

enum Command {
    Publish(Message),
    Subscribe {
        name: String,
        filters: FilterMap,
        callback: MessageCallback,
        replay: Option<ReplayRequest>,
        reply: oneshot::Sender<String>,
    },
    Unsubscribe {
        name: String,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    On {
        name: String,
        callback: EventCallback,
        reply: oneshot::Sender<u64>,
    },
    Off {
        name: String,
        id: u64,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    Emit {
        name: String,
        args: EventArgs,
    },
    GetHistory {
        max_messages: Option<usize>,
        min_level: Option<MessageLevel>,
        pattern_name: Option<String>,
        reply: oneshot::Sender<Vec<Message>>,
    },
    SetFilter {
        name: String,
        filters: FilterMap,
        reply: oneshot::Sender<Result<(), BusError>>,
    },
    GetFilter {
        name: String,
        reply: oneshot::Sender<Result<FilterMap, BusError>>,
    },
    Stop,
}

struct ReplayRequest {
    max_messages: Option<usize>,
    min_level: Option<MessageLevel>,
    pattern_name: Option<String>,
}

struct Worker {
    subscribers: Vec<Subscriber>,
    event_subscribers: HashMap<String, Vec<EventSubscriber>>,
    history: HistoryRing,
}

impl Worker {
    fn new(history_capacity: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            event_subscribers: HashMap::new(),
            history: HistoryRing::new(history_capacity),
        }
    }

    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Publish(message) => {
                self.history.push(message.clone());
                for sub in &self.subscribers {
                    if filter::passes(&message, &sub.filters) {
                        invoke_message_callback(&sub.callback, &message);
                    }
                }
            }
            Command::Subscribe { name, filters, callback, replay, reply } => {
                if let Some(r) = replay {
                    let snapshot = self.history.snapshot(r.max_messages, r.min_level, r.pattern_name.as_deref());
                    for message in &snapshot {
                        if filter::passes(message, &filters) {
                            invoke_message_callback(&callback, message);
                        }
                    }
                }
                // Re-subscribing under an existing name replaces the prior entry.
                self.subscribers.retain(|s| s.name != name);
                self.subscribers.push(Subscriber { name: name.clone(), filters, callback });
                let _ = reply.send(name);
            }
            Command::Unsubscribe { name, reply } => {
                let before = self.subscribers.len();
                self.subscribers.retain(|s| s.name != name);
                let result = if self.subscribers.len() < before {
                    Ok(())
                } else {
                    Err(BusError::UnknownSubscription(name))
                };
                let _ = reply.send(result);
            }
            Command::On { name, callback, reply } => {
                let id = next_id();
                self.event_subscribers.entry(name).or_default().push(EventSubscriber { id, callback });
                let _ = reply.send(id);
            }
            Command::Off { name, id, reply } => {
                let result = match self.event_subscribers.get_mut(&name) {
                    Some(subs) => {
                        let before = subs.len();
                        subs.retain(|s| s.id != id);
                        if subs.len() < before {
                            Ok(())
                        } else {
                            Err(BusError::UnknownEventSubscription(id))
                        }
                    }
                    None => Err(BusError::UnknownEventSubscription(id)),
                };
                let _ = reply.send(result);
            }
            Command::Emit { name, args } => {
                if let Some(subs) = self.event_subscribers.get(&name) {
                    for sub in subs {
                        invoke_event_callback(&sub.callback, &args);
                    }
                }
            }
            Command::GetHistory { max_messages, min_level, pattern_name, reply } => {
                let snapshot = self.history.snapshot(max_messages, min_level, pattern_name.as_deref());
                let _ = reply.send(snapshot);
            }
            Command::SetFilter { name, filters, reply } => {
                let result = match self.subscribers.iter_mut().find(|s| s.name == name) {
                    Some(sub) => {
                        sub.filters = filters;
                        Ok(())
                    }
                    None => Err(BusError::UnknownSubscription(name)),
                };
                let _ = reply.send(result);
            }
            Command::GetFilter { name, reply } => {
                let result = self
                    .subscribers
                    .iter()
                    .find(|s| s.name == name)
                    .map(|s| s.filters.clone())
                    .ok_or_else(|| BusError::UnknownSubscription(name));
                let _ = reply.send(result);
            }
            Command::Stop => return false,
        }
        true
    }
}

fn invoke_message_callback(callback: &MessageCallback, message: &Message) {
    let callback = callback.clone();
    let message = message.clone();
    if catch_unwind(AssertUnwindSafe(|| callback(&message))).is_err() {
        warn!("message bus subscriber callback panicked; isolated and ignored");
    }
}

fn invoke_event_callback(callback: &EventCallback, args: &EventArgs) {
    let callback = callback.clone();
    let args = args.clone();
    if catch_unwind(AssertUnwindSafe(|| callback(&args))).is_err() {
        warn!("message bus event callback panicked; isolated and ignored");
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Options for [`MessageBus::subscribe_with_replay`].
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub max_messages: Option<usize>,
    pub min_level: Option<MessageLevel>,
    pub pattern_name: Option<String>,
}

/// Handle to the running bus. Cloning shares the same worker and history.
#[derive(Clone)]
pub struct MessageBus {
    tx: mpsc::UnboundedSender<Command>,
    debug_mode: Arc<AtomicBool>,
}

impl MessageBus {
    /// Start the bus with the default history capacity (spec §3).
    pub fn start() -> Self {
        Self::start_with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn start_with_capacity(history_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        tokio::spawn(async move {
            let mut worker = Worker::new(history_capacity);
            while let Some(cmd) = rx.recv().await {
                if !worker.handle(cmd) {
                    break;
                }
            }
        });
        Self {
            tx,
            debug_mode: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn publish(&self, message: Message) -> Result<(), BusError> {
        self.tx.send(Command::Publish(message)).map_err(|_| BusError::Stopped)
    }

    /// Subscribe without replay. Subscriptions are uniquely named;
    /// re-subscribing under an existing name replaces the prior entry and
    /// drops its callback.
    pub async fn subscribe(
        &self,
        name: impl Into<String>,
        filters: FilterMap,
        callback: MessageCallback,
    ) -> Result<String, BusError> {
        self.subscribe_inner(name.into(), filters, callback, None).await
    }

    /// Subscribe, first replaying a filtered slice of history atomically
    /// with respect to concurrent publishes (spec §8 scenario 4).
    pub async fn subscribe_with_replay(
        &self,
        name: impl Into<String>,
        filters: FilterMap,
        callback: MessageCallback,
        replay: ReplayOptions,
    ) -> Result<String, BusError> {
        self.subscribe_inner(
            name.into(),
            filters,
            callback,
            Some(ReplayRequest {
                max_messages: replay.max_messages,
                min_level: replay.min_level,
                pattern_name: replay.pattern_name,
            }),
        )
        .await
    }

    async fn subscribe_inner(
        &self,
        name: String,
        filters: FilterMap,
        callback: MessageCallback,
        replay: Option<ReplayRequest>,
    ) -> Result<String, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe { name, filters, callback, replay, reply: reply_tx })
            .map_err(|_| BusError::Stopped)?;
        reply_rx.await.map_err(|_| BusError::Stopped)
    }

    pub async fn unsubscribe(&self, name: &str) -> Result<(), BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Unsubscribe { name: name.to_string(), reply: reply_tx })
            .map_err(|_| BusError::Stopped)?;
        reply_rx.await.map_err(|_| BusError::Stopped)?
    }

    pub async fn on(&self, name: impl Into<String>, callback: EventCallback) -> Result<u64, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::On { name: name.into(), callback, reply: reply_tx })
            .map_err(|_| BusError::Stopped)?;
        reply_rx.await.map_err(|_| BusError::Stopped)
    }

    pub async fn off(&self, name: impl Into<String>, id: u64) -> Result<(), BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Off { name: name.into(), id, reply: reply_tx })
            .map_err(|_| BusError::Stopped)?;
        reply_rx.await.map_err(|_| BusError::Stopped)?
    }

    pub async fn emit(&self, name: impl Into<String>, args: EventArgs) -> Result<(), BusError> {
        self.tx.send(Command::Emit { name: name.into(), args }).map_err(|_| BusError::Stopped)
    }

    pub async fn get_history(
        &self,
        max_messages: Option<usize>,
        min_level: Option<MessageLevel>,
        pattern_name: Option<String>,
    ) -> Result<Vec<Message>, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::GetHistory { max_messages, min_level, pattern_name, reply: reply_tx })
            .map_err(|_| BusError::Stopped)?;
        reply_rx.await.map_err(|_| BusError::Stopped)
    }

    pub async fn set_filter(&self, name: &str, filters: FilterMap) -> Result<(), BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::SetFilter { name: name.to_string(), filters, reply: reply_tx })
            .map_err(|_| BusError::Stopped)?;
        reply_rx.await.map_err(|_| BusError::Stopped)?
    }

    pub async fn get_filter(&self, name: &str) -> Result<FilterMap, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::GetFilter { name: name.to_string(), reply: reply_tx })
            .map_err(|_| BusError::Stopped)?;
        reply_rx.await.map_err(|_| BusError::Stopped)?
    }

    /// Stops the worker task. Further calls return `BusError::Stopped`.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Debug mode bypasses the command queue: it is a hint read by other
    /// subsystems (e.g. the tailer, to decide whether to log raw lines), not
    /// part of the ordering contract the queue protects.
    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }
}
