//! ResearchBrief CLI: research briefs for government document drafting.
//!
//! Turns a subject, purpose and jurisdiction into search queries, summarized
//! sources and a cross-source summary, printed as JSON.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
