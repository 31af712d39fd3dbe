use std::process::ExitCode;

use clap::Parser;

use pixelportal::cli::{self, CliArgs};
use pixelportal::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    if let Some(path) = logger::init(args.verbose) {
        log::debug!("logging to {}", path.display());
    }
    cli::run(args)
}
