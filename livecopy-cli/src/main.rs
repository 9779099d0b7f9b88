//! livecopy command-line tool
//!
//! Usage:
//!   livecopy edit --project site --kind text --key hero.title --value "Hello"
//!   livecopy caption --project site --key /img/team.jpg --text "Our team"
//!   livecopy publish --project site --clear
//!   livecopy status --project site
//!
//! Logs go to stderr. `RUST_LOG` overrides the level chosen by `--verbose`.

use anyhow::Result;
use clap::Parser;
use livecopy_cli::Args;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let output = livecopy_cli::run(&args).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
