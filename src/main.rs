use std::process::ExitCode;

use anyhow::Result;
use bag2nerf::cli::{self, Args};
use clap::Parser;

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    cli::init_logging(args.verbose);

    let report = cli::run(&args)?;
    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
