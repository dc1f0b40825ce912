//! Cloudcast CLI: converge a declared cloud topology.

use clap::Parser;
use cloudcast::cli::Cli;

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .format_timestamp(None)
        .init();

    if let Err(e) = cloudcast::cli::run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
