//! paperdigest CLI — daily research paper digest generator.
//!
//! Scrapes a paper listing, ranks candidates with a completion model,
//! downloads and converts the selected PDFs, and writes per-paper
//! summaries plus an aggregate digest.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
