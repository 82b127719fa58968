use clap::Parser;
use dbguard_runner::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dbguard_runner::run(Cli::parse()).await
}
