use std::process::ExitCode;

use clap::Parser;

use gpuconv::cli::{self, CliArgs};
use gpuconv::{EngineConfig, logger};

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Settings first: whether the session log goes to a file is configurable.
    let cfg = EngineConfig::load(args.config.as_deref());
    logger::init(cfg.log_to_file, args.verbose);

    cli::run(args, cfg)
}
