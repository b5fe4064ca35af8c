//! Replays a recorded change stream through a transform router, printing the lifecycle messages and per-endpoint batches
//! it produces.

#![deny(warnings)]
#![deny(missing_docs)]

use anyhow::Context as _;
use tracing::{error, info};

mod config;
use self::config::ReplayConfiguration;

mod driver;
use self::driver::Driver;

mod evaluator;

mod logging;
use self::logging::initialize_logging;

mod record;

fn main() {
    if let Err(e) = initialize_logging() {
        eprintln!("FATAL: failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    match run() {
        Ok(()) => info!("dataport-replay stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<(), anyhow::Error> {
    info!("dataport-replay starting...");

    let mut args = std::env::args().skip(1);
    let (config_path, events_path) = match (args.next(), args.next()) {
        (Some(config_path), Some(events_path)) => (config_path, events_path),
        _ => {
            error!("Usage: dataport-replay <config.yaml> <events.jsonl>");
            std::process::exit(1);
        }
    };

    let config = ReplayConfiguration::try_from_file(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime.")?;

    runtime.block_on(async move {
        let driver = Driver::new(config);
        driver.run(&events_path, tokio::io::stdout()).await.map(|_| ())
    })
}
