//! FTI daemon entry point.

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

use fti::logger::Logger;
use fti::settings::Settings;
use fti::{supervisor, DebugFlags};

#[derive(Parser, Debug)]
#[command(
    name = "fti",
    version,
    about = "fti -- onboard flight test instrumentation daemon"
)]
struct Args {
    /// Configuration file path.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Display received sensor data for debugging.
    #[arg(short = 'd', long = "debug-data")]
    debug_data: bool,

    /// Display settings for debugging.
    #[arg(short = 'r', long = "debug-rc")]
    debug_rc: bool,

    /// Display serial i/o for debugging.
    #[arg(short = 's', long = "debug-serial")]
    debug_serial: bool,
}

fn main() {
    let args = Args::parse();

    let mut debug = DebugFlags::empty();
    debug.set(DebugFlags::DATA, args.debug_data);
    debug.set(DebugFlags::RC, args.debug_rc);
    debug.set(DebugFlags::SERIAL, args.debug_serial);

    let level = if debug.is_empty() {
        LevelFilter::INFO
    } else {
        LevelFilter::DEBUG
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let settings = match Settings::load(args.config.as_deref(), debug) {
        Ok(s) => s,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    let logger = match Logger::open(&settings) {
        Ok(l) => l,
        Err(e) => {
            error!("{e}");
            exit(-1);
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "fti starting");
    if let Err(e) = supervisor::run(settings, logger) {
        error!("{e:#}");
        exit(1);
    }
}
