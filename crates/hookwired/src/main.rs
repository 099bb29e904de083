//! Entry point for the `hookwired` plugin host daemon.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Runs plugin processes and dispatches hooks to them.
#[derive(Debug, Parser)]
#[command(name = "hookwired", version, about)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match hookwired::daemon::run(cli.config.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(io::stderr().lock(), "hookwired: {error}"));
            ExitCode::FAILURE
        }
    }
}
