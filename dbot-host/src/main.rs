use clap::Parser;
use dbot_host::cli::{execute, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    execute(Cli::parse()).await
}
