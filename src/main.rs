use clap::Parser;
use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic, process::ExitCode, time::Duration};

mod commandline;
mod config;
mod daemon;
mod mqtt;

use daemon::{CycleError, Daemon};

/// How long the first-run device selection listens for advertisements.
const FIRST_RUN_SCAN_TIME: Duration = Duration::from_secs(10);

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle, FlexiLoggerError> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())?.start()?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    Ok(log_handle)
}

async fn run(args: commandline::CliArgs) -> Result<(), CycleError> {
    let config = config::load(&args.config, FIRST_RUN_SCAN_TIME)
        .await
        .map_err(CycleError::Config)?;

    let options = daemon::Options {
        timeout: args.timeout,
        console: args.console,
        json: args.json,
        discovery_marker: args.discovery_marker,
    };
    Daemon::new(config, options).run(args.daemon).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = commandline::CliArgs::parse();

    let _log_handle = match logging_init(args.verbose.log_level_filter()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Cannot init logging: {e}");
            None
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            error!("{:#}", anyhow::Error::new(err));
            ExitCode::from(code)
        }
    }
}
