mod cli;
mod config;
mod error;
mod hex;
mod linker;
mod process;
mod report;

use clap::Parser;
use cli::Cli;
use std::process::exit;
use tracing_subscriber::{fmt, EnvFilter};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn main() {
    init_logging();

    if let Err(e) = cli::run(Cli::parse()) {
        eprintln!("Error: {}", e);
        exit(1);
    }
}
