//! Tracing setup, grounded on the teacher's `app.rs::init_logging`: an
//! app-specific env var takes precedence over `RUST_LOG`, falling back to
//! a sane default directive.

use scbridge_core::constants::{APP_NAME, ENV_LOG};

pub fn init(debug: bool) {
    let default_filter = if debug { format!("debug,{APP_NAME}=trace") } else { format!("info,{APP_NAME}=info") };

    let filter = std::env::var(ENV_LOG).or_else(|_| std::env::var("RUST_LOG")).unwrap_or(default_filter);

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_ansi(true)
        .compact()
        .with_env_filter(filter)
        .init();
}
