//! CLI surface (spec §6): `--process-all/-p`, `--no-discord/-nd`,
//! `--process-once/-o`, `--datasource`, `--debug/-d`. Grounded on the
//! teacher's `core/cli.rs` (clap derive, global flags).

use std::path::PathBuf;

use clap::Parser;
use scbridge_core::config::{CliOverrides, DataSource};
use scbridge_core::constants::{ENV_CONFIG, ENV_DEBUG};

#[derive(Parser, Debug)]
#[command(name = "scbridge")]
#[command(version, about = "Star Citizen log bridge", long_about = None)]
pub struct Cli {
    /// Process the entire log file from the start, then exit, instead of
    /// tailing from the end.
    #[arg(long, short = 'p')]
    pub process_all: bool,

    /// Disable Discord delivery even if webhooks are configured.
    #[arg(long = "no-discord", visible_alias = "nd")]
    pub no_discord: bool,

    /// Process the file once and exit rather than watching for further
    /// writes (independent of `--process-all`'s starting offset).
    #[arg(long = "process-once", short = 'o')]
    pub process_once: bool,

    /// Durable sink backend.
    #[arg(long, value_parser = parse_datasource)]
    pub datasource: Option<DataSource>,

    /// Enable debug-level logging.
    #[arg(long, short = 'd', env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to a JSON config file (defaults to `./scbridge.json` if present).
    #[arg(long, short = 'c', env = ENV_CONFIG)]
    pub config: Option<PathBuf>,
}

fn parse_datasource(s: &str) -> Result<DataSource, String> {
    match s.to_lowercase().as_str() {
        "googlesheets" => Ok(DataSource::GoogleSheets),
        "supabase" => Ok(DataSource::Supabase),
        _ => Err(format!("invalid datasource '{s}'. Valid options: googlesheets, supabase")),
    }
}

pub fn parse() -> CliOverrides {
    let cli = Cli::parse();
    CliOverrides {
        process_all: cli.process_all,
        no_discord: cli.no_discord,
        process_once: cli.process_once,
        datasource: cli.datasource,
        debug: cli.debug,
        config_path: cli.config,
    }
}
