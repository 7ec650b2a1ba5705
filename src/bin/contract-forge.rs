use anyhow::Result;
use clap::Parser;
use contract_forge::cli::{execute, ContractForgeCli};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ContractForgeCli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .init();

    debug!("Starting contract-forge v{}", env!("CARGO_PKG_VERSION"));

    execute(cli).await
}
