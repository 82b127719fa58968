mod cli;
mod extract;

use clap::Parser;
use cli::Cli;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    extract::run(&Cli::parse())
}
