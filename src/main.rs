mod cli;
mod execute;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use crate::cli::CLI;
use anyhow::Result;

fn main() -> Result<()> {
    let cli = CLI::parse();
    init_logging(cli.verbose);
    execute::execute(cli)
}

/// Logs go to stderr; stdout is for command output.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "guidekit=info",
        _ => "guidekit=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
