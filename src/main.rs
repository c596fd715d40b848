mod api;
mod cli;
mod display;
mod error;
mod mirror;
mod models;
mod sanitize;
mod telemetry;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse_args();
    telemetry::init(cli.verbose);
    cli::run(cli);
}
