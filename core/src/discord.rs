//! Discord sink adapter (spec §6 `discord_webhook_url`/`live_discord_webhook`/
//! `ac_discord_webhook`/`technical_webhook_url`). Grounded on
//! `original_source/src/log_analyzer.py::send_discord_message`: webhook
//! selection keys off `current_mode`, alert tagging keys off VIP
//! membership, and delivery is rate-limited through the shared limiter
//! before ever touching the network.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::{EventCallback, FilterMap, MessageBus};
use crate::error::BusError;
use crate::message::{EventArgs, Message};
use crate::profile::VipMatcher;
use crate::ratelimit::RateLimiter;

/// Match fields a Discord-bound pattern match may carry (spec §4.3 step 6).
const PLAYER_FIELDS: [&str; 5] = ["player", "owner", "victim", "killer", "entity"];

/// Webhook endpoints a deployer may configure (spec §6).
#[derive(Debug, Clone, Default)]
pub struct DiscordWebhooks {
    pub default_webhook: Option<String>,
    pub live_webhook: Option<String>,
    pub ac_webhook: Option<String>,
    pub technical_webhook: Option<String>,
}

pub struct DiscordSink {
    client: Client,
    webhooks: DiscordWebhooks,
    rate_limiter: Arc<RateLimiter>,
    enabled: bool,
}

impl DiscordSink {
    pub fn new(webhooks: DiscordWebhooks, rate_limiter: Arc<RateLimiter>, enabled: bool) -> Self {
        Self { client: Client::new(), webhooks, rate_limiter, enabled }
    }

    /// Picks the webhook for a normal (non-technical) message: the live
    /// webhook when the current mode is `SC_Default`, otherwise the AC
    /// webhook, falling back to the default webhook either way.
    fn select_webhook(&self, current_mode: &str) -> Option<&str> {
        if current_mode == "SC_Default" {
            self.webhooks.live_webhook.as_deref().or(self.webhooks.default_webhook.as_deref())
        } else {
            self.webhooks.ac_webhook.as_deref().or(self.webhooks.default_webhook.as_deref())
        }
    }

    /// Sends a templated, pattern-driven message. `players` is the
    /// player/owner/victim/killer/entity field values pulled from the
    /// match, used only to decide the alert tag.
    pub async fn send(
        &self,
        pattern_name: &str,
        content: &str,
        current_mode: &str,
        players: &[&str],
        vip: &VipMatcher,
    ) {
        if !self.enabled {
            return;
        }
        let Some(webhook) = self.select_webhook(current_mode) else {
            return;
        };

        let alert = if players.iter().any(|p| vip.matches(p)) { "🔊 Sound Alert!" } else { "" };
        let content = if alert.is_empty() { content.to_string() } else { format!("{content} {alert}") };

        if !self.rate_limiter.should_send(&format!("{pattern_name}:{content}"), Some("discord")) {
            debug!(pattern_name, "rate limited Discord message");
            return;
        }

        self.post(webhook, &content).await;
    }

    /// Sends a technical (unformatted) message, bypassing the pattern
    /// lookup and alert tagging entirely.
    pub async fn send_technical(&self, content: &str) {
        if !self.enabled {
            return;
        }
        let webhook = self
            .webhooks
            .technical_webhook
            .as_deref()
            .or(self.webhooks.default_webhook.as_deref());
        let Some(webhook) = webhook else {
            return;
        };
        self.post(webhook, content).await;
    }

    /// Subscribes to every bus message and forwards the ones whose pattern
    /// is a key in `enabled_patterns` (the `discord` config map), per
    /// `log_analyzer.py::send_discord_message`'s per-pattern gating.
    pub async fn install(
        self: Arc<Self>,
        bus: &MessageBus,
        vip: Arc<VipMatcher>,
        enabled_patterns: Arc<HashSet<String>>,
    ) -> Result<String, BusError> {
        let sink = self;
        let callback = Arc::new(move |msg: &Message| {
            let Some(pattern_name) = msg.pattern_name.clone() else { return };
            if !enabled_patterns.contains(&pattern_name) {
                return;
            }

            let mode = msg.metadata.get("mode").and_then(Value::as_str).unwrap_or_default().to_string();
            let players: Vec<String> = PLAYER_FIELDS
                .iter()
                .filter_map(|key| msg.metadata.get(*key).and_then(Value::as_str).map(str::to_string))
                .collect();
            let content = msg.content.clone();

            let sink = sink.clone();
            let vip = vip.clone();
            tokio::spawn(async move {
                let players: Vec<&str> = players.iter().map(String::as_str).collect();
                sink.send(&pattern_name, &content, &mode, &players, &vip).await;
            });
        });
        bus.subscribe("discord_relay", FilterMap::default(), callback).await
    }

    /// Re-emits a Discord-only `shard_info` notice whenever the tailer's
    /// `shard_version_update` bus event fires, gated by `discord["shard_info"]`
    /// being configured. Distinct from the bus's own `shard_version_update`
    /// event, which fires regardless of Discord configuration.
    pub async fn install_shard_info(self: Arc<Self>, bus: &MessageBus) -> Result<u64, BusError> {
        let sink = self;
        let callback: EventCallback = Arc::new(move |args: &EventArgs| {
            let shard = args.kwargs.get("shard").and_then(Value::as_str).unwrap_or("unknown").to_string();
            let version = args.kwargs.get("version").and_then(Value::as_str).unwrap_or("unknown").to_string();
            let content = format!("Shard: {shard} | Version: {version}");
            let sink = sink.clone();
            tokio::spawn(async move { sink.send_technical(&content).await });
        });
        bus.on("shard_version_update", callback).await
    }

    async fn post(&self, webhook: &str, content: &str) {
        let payload: Value = serde_json::json!({ "content": content });
        match self.client.post(webhook).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().as_u16() == 204 => {}
            Ok(resp) => warn!(status = %resp.status(), "Discord webhook returned non-success status"),
            Err(err) => warn!(error = %err, "failed to send Discord message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhooks() -> DiscordWebhooks {
        DiscordWebhooks {
            default_webhook: Some("https://default".into()),
            live_webhook: Some("https://live".into()),
            ac_webhook: Some("https://ac".into()),
            technical_webhook: None,
        }
    }

    fn sink() -> DiscordSink {
        let rate_limiter = Arc::new(RateLimiter::new(Default::default()));
        DiscordSink::new(webhooks(), rate_limiter, true)
    }

    #[test]
    fn sc_default_mode_prefers_live_webhook() {
        let sink = sink();
        assert_eq!(sink.select_webhook("SC_Default"), Some("https://live"));
    }

    #[test]
    fn non_default_mode_prefers_ac_webhook() {
        let sink = sink();
        assert_eq!(sink.select_webhook("EA_SquadronBattle"), Some("https://ac"));
    }

    #[test]
    fn missing_specific_webhook_falls_back_to_default() {
        let mut sink = sink();
        sink.webhooks.live_webhook = None;
        assert_eq!(sink.select_webhook("SC_Default"), Some("https://default"));
    }

    /// `enabled: false` means neither relay ever reaches `post()`, so these
    /// only exercise the subscription wiring, not real network delivery.
    #[tokio::test]
    async fn install_subscribes_without_erroring() {
        let bus = MessageBus::start();
        let rate_limiter = Arc::new(RateLimiter::new(Default::default()));
        let sink = Arc::new(DiscordSink::new(webhooks(), rate_limiter, false));
        let mut enabled = HashSet::new();
        enabled.insert("kill_event".to_string());

        sink.clone().install(&bus, Arc::new(VipMatcher::compile("")), Arc::new(enabled)).await.unwrap();

        let msg = Message::builder("Bob killed Alice").pattern_name("kill_event").build();
        bus.publish(msg).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn install_shard_info_subscribes_without_erroring() {
        let bus = MessageBus::start();
        let rate_limiter = Arc::new(RateLimiter::new(Default::default()));
        let sink = Arc::new(DiscordSink::new(webhooks(), rate_limiter, false));

        sink.install_shard_info(&bus).await.unwrap();

        let mut args = EventArgs::new();
        args.kwargs.insert("shard".into(), serde_json::json!("ABC123"));
        args.kwargs.insert("version".into(), serde_json::json!("4.5.0"));
        bus.emit("shard_version_update", args).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
