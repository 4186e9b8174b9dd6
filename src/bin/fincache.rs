use clap::Parser;
use fin_cache::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fin_cache::cli::execute(Cli::parse()).await
}
