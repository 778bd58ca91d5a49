// ABOUTME: Entry point for the keywarden CLI
// ABOUTME: Syncs public keys to managed hosts

use anyhow::Result;
use clap::Parser;
use keywarden_cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    keywarden_log::init();

    let cli = Cli::parse();

    keywarden_cli::run(cli).await
}
