// Tangle: Program Dependence Graph engine for C-family source code.
//
// Builds source CFGs, control dependence graphs and program dependence
// graphs per function, and renders them as DOT or JSON.

#![allow(dead_code)]

use anyhow::Result;
use clap::Parser;

mod ast;
mod cdg;
mod cli;
mod error;
mod export;
mod graph;
mod ir;
mod pdg;
mod scfg;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    run_command(cli)?;

    Ok(())
}

fn run_command(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Scfg(args) => cli::cmds::scfg(args, &cli),
        Commands::Cdg(args) => cli::cmds::cdg(args, &cli),
        Commands::Pdg(args) => cli::cmds::pdg(args, &cli),
        Commands::Domtree(args) => cli::cmds::domtree(args, &cli),
    }
}
