//! HOSTCALL CLI
//!
//! Loads a plugin, calls one export and prints what it returned.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::Parser;
use clap::error::ErrorKind;
use color_eyre::Result;
use hostcall_cli::{Cli, CliError, run};
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            let err = CliError::Usage(err.to_string());
            eprint!("{err}");
            return Ok(ExitCode::from(err.exit_status()));
        }
    };

    // received values are logged to stdout next to the plugin output
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    match run(&cli) {
        Ok(output) => {
            println!("{output}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::from(err.exit_status()))
        }
    }
}
