//! Named constants for the bus/tailer/bridge/dispatch subsystems.
//!
//! Mirrors the teacher's `core::constants` module: every magic number that
//! shows up more than once, or that a deployer might reasonably want to
//! override, gets a name here.

// =============================================================================
// Application identity
// =============================================================================

pub const APP_NAME: &str = "scbridge";

/// This tool's own build version, merged into dispatched pattern data as
/// `script_version` — distinct from the detected server `version`
/// (`TailerState::current_version`).
pub const SCRIPT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable for the log filter directive.
pub const ENV_LOG: &str = "SCBRIDGE_LOG";

/// Environment variable for the config file path.
pub const ENV_CONFIG: &str = "SCBRIDGE_CONFIG";

/// Environment variable for debug mode.
pub const ENV_DEBUG: &str = "SCBRIDGE_DEBUG";

// =============================================================================
// Config — credential/webhook env fallbacks
// =============================================================================
//
// Sensitive or deployment-specific values get an env var fallback the same
// way the teacher's secrets config does (`ENV_SECRETS_VAULT_TOKEN` etc.):
// checked after the config file, before the built-in default.

pub const ENV_GOOGLE_SHEETS_WEBHOOK: &str = "SCBRIDGE_GOOGLE_SHEETS_WEBHOOK";
pub const ENV_SUPABASE_URL: &str = "SCBRIDGE_SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SCBRIDGE_SUPABASE_KEY";
pub const ENV_DISCORD_WEBHOOK_URL: &str = "SCBRIDGE_DISCORD_WEBHOOK_URL";
pub const ENV_LIVE_DISCORD_WEBHOOK: &str = "SCBRIDGE_LIVE_DISCORD_WEBHOOK";
pub const ENV_AC_DISCORD_WEBHOOK: &str = "SCBRIDGE_AC_DISCORD_WEBHOOK";
pub const ENV_TECHNICAL_WEBHOOK_URL: &str = "SCBRIDGE_TECHNICAL_WEBHOOK_URL";

// =============================================================================
// Message Bus
// =============================================================================

/// Default bounded history length (messages).
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Bus ingress queue capacity before `publish` starts applying backpressure.
pub const BUS_QUEUE_CAPACITY: usize = 10_000;

// =============================================================================
// Rate limiter
// =============================================================================

/// Default duplicate-suppression window, seconds.
pub const DEFAULT_RATE_LIMIT_TIMEOUT_SECS: u64 = 300;

/// Default number of duplicates tolerated inside the window.
pub const DEFAULT_RATE_LIMIT_MAX_DUPLICATES: u32 = 1;

/// Default stale-entry cleanup interval, seconds.
pub const DEFAULT_RATE_LIMIT_CLEANUP_INTERVAL_SECS: u64 = 60;

// =============================================================================
// Log Tailer
// =============================================================================

/// Backoff base delay when the log file is missing, milliseconds.
pub const TAILER_RETRY_BASE_DELAY_MS: u64 = 500;

/// Max retry attempts before the tailer gives up on a missing file for one cycle.
pub const TAILER_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Debounce window for file-change notifications, milliseconds.
pub const TAILER_DEBOUNCE_MS: u64 = 200;

/// Prefix that marks a QR-recovery screenshot as already processed output.
pub const SCREENSHOT_IGNORE_PREFIX: &str = "cropped_";

/// Size (pixels) of the top-right crop region sampled for the QR code.
pub const QR_CROP_SIZE: u32 = 200;

/// Size (pixels) of the central luminance-sampling region.
pub const QR_LUMINANCE_SAMPLE_SIZE: u32 = 50;

/// Fixed darkening delta applied to sub-threshold pixels before decode.
pub const QR_DARKEN_DELTA: u8 = 40;

/// Retry attempts for a transient screenshot-read failure.
pub const QR_DECODE_RETRIES: u32 = 3;

// =============================================================================
// Realtime Bridge
// =============================================================================

/// Default heartbeat interval, seconds. Authoritative per spec §9 (the
/// original's inline comment notes a change from 120 to 30).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Ping-loss watchdog poll interval, seconds.
pub const PING_WATCHDOG_POLL_SECS: u64 = 5;

/// Ping-loss threshold, seconds, after which `broadcast_ping_missing` fires.
pub const PING_MISSING_THRESHOLD_SECS: i64 = 120;

/// Default timeout for a cross-thread `submit()` call into the bridge loop.
pub const BRIDGE_SUBMIT_TIMEOUT_SECS: u64 = 10;

/// Name of the single presence + broadcast channel used by the bridge.
pub const REALTIME_CHANNEL_NAME: &str = "general";

/// Event name used on the realtime channel for application events.
pub const REALTIME_EVENT_NAME: &str = "realtime-event";

// =============================================================================
// Dispatch Pipeline
// =============================================================================

/// Batch timer window, milliseconds.
pub const DISPATCH_BATCH_WINDOW_MS: u64 = 500;

/// Max items per batch.
pub const DISPATCH_BATCH_MAX_ITEMS: usize = 20;

/// Poll interval while filling a batch, milliseconds.
pub const DISPATCH_POLL_INTERVAL_MS: u64 = 100;

/// Dispatch ingress queue capacity.
pub const DISPATCH_QUEUE_CAPACITY: usize = 10_000;

// =============================================================================
// Shutdown
// =============================================================================

/// Graceful shutdown join timeout, seconds.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5;
