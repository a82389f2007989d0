//! Core application bootstrap, grounded on the teacher's `core::CoreApp`:
//! one struct owning every long-lived subsystem, assembled in dependency
//! order by a single `run()` entrypoint.

use std::sync::Arc;

use anyhow::{Context, Result};
use scbridge_core::bridge::transport::InMemoryTransport;
use scbridge_core::bridge::{BridgeConfig, RealtimeBridge};
use scbridge_core::config::{AppConfig, CliOverrides, DataSource};
use scbridge_core::discord::{DiscordSink, DiscordWebhooks};
use scbridge_core::dispatch::{DataProvider, DispatchQueue, GoogleSheetsProvider, SupabaseProvider};
use scbridge_core::message::EventArgs;
use scbridge_core::profile::{ProfileSubsystem, VipMatcher};
use scbridge_core::ratelimit::{RateLimiter, RateLimiterConfig};
use scbridge_core::tailer::{PatternEngine, PatternEngineConfig, Tailer, TailerConfig, TailerDeps};
use scbridge_core::MessageBus;

use crate::shutdown::ShutdownService;
use crate::{cli, logging};

pub struct CoreApp;

impl CoreApp {
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();

        let overrides: CliOverrides = cli::parse();
        logging::init(overrides.debug);
        tracing::debug!("application starting");

        let config = AppConfig::load(&overrides).context("failed to load configuration")?;

        let bus = MessageBus::start();

        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            timeout: std::time::Duration::from_secs(config.rate_limit_timeout_secs),
            max_duplicates: config.rate_limit_max_duplicates,
            ..Default::default()
        }));

        let webhooks = DiscordWebhooks {
            default_webhook: config.discord_webhook_url.clone(),
            live_webhook: config.live_discord_webhook.clone(),
            ac_webhook: config.ac_discord_webhook.clone(),
            technical_webhook: config.technical_webhook_url.clone(),
        };
        let discord = Arc::new(DiscordSink::new(webhooks, rate_limiter.clone(), config.use_discord));
        let vip = Arc::new(VipMatcher::compile(&config.important_players));
        let discord_patterns = Arc::new(config.discord.keys().cloned().collect());
        discord
            .clone()
            .install(&bus, vip, discord_patterns)
            .await
            .context("failed to install Discord relay")?;
        if config.discord.contains_key("shard_info") {
            discord.clone().install_shard_info(&bus).await.context("failed to install shard_info relay")?;
        }

        let patterns = PatternEngine::compile(PatternEngineConfig {
            regex_patterns: config.regex_patterns.clone().into_iter().collect(),
            messages: config.messages.clone(),
            google_sheets_mapping: config.google_sheets_mapping.iter().cloned().collect(),
            realtime: config.realtime.iter().cloned().collect(),
            scraping: config.scraping.iter().cloned().collect(),
            important_players: config.important_players.clone(),
        })
        .context("failed to compile pattern table")?;
        tracing::info!(
            vip_compiled = patterns.vip_compiled_count(),
            vip_invalid = patterns.vip_invalid_count(),
            "pattern engine compiled"
        );

        let provider: Arc<dyn DataProvider> = match config.datasource {
            DataSource::GoogleSheets => Arc::new(GoogleSheetsProvider::new(
                config.google_sheets_webhook.clone().unwrap_or_default(),
            )),
            DataSource::Supabase => Arc::new(SupabaseProvider::new(
                config.supabase_url.clone().unwrap_or_default(),
                config.supabase_key.clone().unwrap_or_default(),
            )),
        };
        let dispatch = DispatchQueue::start(provider);

        let transport = Arc::new(InMemoryTransport::new());
        let bridge = RealtimeBridge::start(
            BridgeConfig {
                username: config.username.clone(),
                auto_reconnect: config.auto_reconnection,
                excluded_content: Vec::new(),
            },
            transport,
            bus.clone(),
        );
        bridge.connect().await.context("failed to connect realtime bridge")?;

        let profiles = Arc::new(ProfileSubsystem::new(bus.clone(), config.username.clone()));

        let tailer_config = TailerConfig {
            log_path: config.log_file_path.clone(),
            screenshot_dir: config.live_log_path.clone().and_then(|p| p.parent().map(|p| p.to_path_buf())),
            default_username: config.username.clone(),
            process_all: config.process_all,
            process_once: config.process_once,
        };
        let tailer_deps = TailerDeps {
            dispatch: Some(dispatch.clone()),
            bridge: Some(bridge.clone()),
            profiles: Some(profiles),
            scraper: None,
        };
        let tailer = Tailer::with_deps(tailer_config, patterns, bus.clone(), tailer_deps);

        let shutdown = ShutdownService::new(bridge, dispatch, bus.clone());
        shutdown.install_signal_handlers();

        if config.process_all {
            bus.emit("startup", EventArgs::new()).await.ok();
        }

        if config.process_once {
            let mut tailer = tailer;
            let result = tailer.run().await;
            shutdown.shutdown().await;
            result.context("tailer stopped with an error")?;
            return Ok(());
        }

        let tailer_handle = tokio::spawn(async move {
            let mut tailer = tailer;
            if let Err(err) = tailer.run().await {
                tracing::error!(error = %err, "tailer stopped with an error");
            }
        });
        shutdown.register(tailer_handle).await;

        shutdown.wait().await;
        shutdown.shutdown().await;

        Ok(())
    }
}
