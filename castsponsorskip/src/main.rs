use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;

use castsponsorskip_core::core::config::Config;
use castsponsorskip_logging::CssLogger;

use crate::app::{Args, CastSponsorSkip};

mod app;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let logger = match CssLogger::builder()
        .root_level(LevelFilter::Info)
        .logger("mdns_sd", LevelFilter::Warn)
        .build()
    {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logger, {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::load(args.into_overrides()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load configuration, {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logger.set_root_level(config.log_level_filter()) {
        eprintln!("Failed to apply log level, {}", e);
        return ExitCode::FAILURE;
    }

    CastSponsorSkip::new(config).run().await;
    ExitCode::SUCCESS
}
