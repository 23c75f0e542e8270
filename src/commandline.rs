use crate::{config, mqtt};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::{path::PathBuf, time::Duration};

const fn about_text() -> &'static str {
    "vestwoods bms to mqtt bridge"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Configuration file, created interactively on first run
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Deadline for one BLE poll including discovery and connection (e.g. "20s", "1m")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "20s")]
    pub timeout: Duration,

    /// Keep running and poll every `poll_interval_sec` seconds
    #[arg(long)]
    pub daemon: bool,

    /// Print telemetry to the console instead of publishing it
    #[arg(long)]
    pub console: bool,

    /// Print telemetry to the console as JSON
    #[arg(long)]
    pub json: bool,

    /// File remembering which Home Assistant discovery configuration was published
    #[arg(long, default_value = mqtt::DEFAULT_DISCOVERY_MARKER)]
    pub discovery_marker: PathBuf,
}
