//! Command-line driver
//!
//! Every command reads one JSON analysis document describing a function
//! (AST and/or lowered IR plus collaborator analysis results) and writes
//! a DOT or JSON rendering of the requested graph. Driver errors exit
//! non-zero; the analyses themselves never fail — defects surface as
//! warnings and the graph is still produced.

use crate::ast;
use crate::cdg::{build_cdg, PostDominatorTree};
use crate::error::AnalysisError;
use crate::export;
use crate::ir::{
    AliasTree, DependenceEntry, DiDependenceInfo, IrFunction, LoopInfo, MapOracle, TargetLibInfo,
};
use crate::pdg::{PdgBuilder, PdgConfig};
use crate::scfg::build_scfg;
use clap::{Parser, Subcommand, ValueEnum};
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tangle - Program Dependence Graph engine
///
/// Builds source control flow graphs, control dependence graphs and
/// program dependence graphs for one C-family function at a time.
#[derive(Parser)]
#[command(name = "tangle")]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Write the result here instead of stdout
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Dot)]
    pub format: OutputFormat,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Graphviz DOT text
    Dot,
    /// JSON for programmatic consumption
    Json,
}

/// Which control flow graph a command operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Flavor {
    Source,
    Ir,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the source control flow graph from the AST section
    Scfg(ScfgArgs),
    /// Build a control dependence graph over the source or IR CFG
    Cdg(CdgArgs),
    /// Build the program dependence graph over the IR section
    Pdg(PdgArgs),
    /// Print the post-dominator tree of the source or IR CFG
    Domtree(DomtreeArgs),
}

#[derive(clap::Args)]
pub struct ScfgArgs {
    /// Analysis input document
    pub input: PathBuf,
}

#[derive(clap::Args)]
pub struct CdgArgs {
    /// Analysis input document
    pub input: PathBuf,
    /// Which CFG to build the CDG over
    #[arg(long, value_enum, default_value_t = Flavor::Source)]
    pub flavor: Flavor,
}

#[derive(clap::Args)]
pub struct PdgArgs {
    /// Analysis input document
    pub input: PathBuf,
    /// Keep every instruction in its own node
    #[arg(long)]
    pub no_simplify: bool,
    /// Skip pi-block formation
    #[arg(long)]
    pub no_pi_blocks: bool,
    /// Test every memory pair instead of only reachable ones
    #[arg(long)]
    pub no_reachability: bool,
}

#[derive(clap::Args)]
pub struct DomtreeArgs {
    /// Analysis input document
    pub input: PathBuf,
    #[arg(long, value_enum, default_value_t = Flavor::Source)]
    pub flavor: Flavor,
}

/// The IR section of an input document: the lowered function plus the
/// collaborator analysis results recorded for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrSection {
    #[serde(flatten)]
    pub function: IrFunction,
    #[serde(default)]
    pub dependences: Vec<DependenceEntry>,
    #[serde(default)]
    pub alias: Option<AliasTree>,
    #[serde(default)]
    pub server_alias: Option<AliasTree>,
    #[serde(default)]
    pub di_dependences: Option<DiDependenceInfo>,
    #[serde(default)]
    pub loops: Option<LoopInfo>,
    #[serde(default)]
    pub tli: Option<TargetLibInfo>,
}

/// One analysis input document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisInput {
    #[serde(default)]
    pub function: Option<ast::Function>,
    #[serde(default)]
    pub ir: Option<IrSection>,
}

pub fn load_input(path: &Path) -> Result<AnalysisInput, AnalysisError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn emit(cli: &Cli, content: &str) -> anyhow::Result<()> {
    match &cli.output {
        Some(path) => std::fs::write(path, content)?,
        None => println!("{}", content),
    }
    Ok(())
}

fn json_string<T: Serialize>(value: &T) -> anyhow::Result<String> {
    use is_terminal::IsTerminal;
    // Pretty output for humans, compact for pipes.
    if std::io::stdout().is_terminal() {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

fn warn_diagnostics(diagnostics: &[crate::error::Diagnostic]) {
    for d in diagnostics {
        tracing::warn!(kind = ?d.kind, "{}", d.message);
    }
}

pub mod cmds {
    use super::*;

    pub fn scfg(args: &ScfgArgs, cli: &Cli) -> anyhow::Result<()> {
        let input = load_input(&args.input)?;
        let func = input
            .function
            .ok_or(AnalysisError::MissingSection("function"))?;
        let scfg = build_scfg(&func);
        warn_diagnostics(&scfg.diagnostics);
        let out = match cli.format {
            OutputFormat::Dot => export::scfg_to_dot(&scfg),
            OutputFormat::Json => json_string(&export::scfg_to_json(&scfg))?,
        };
        emit(cli, &out)
    }

    pub fn cdg(args: &CdgArgs, cli: &Cli) -> anyhow::Result<()> {
        let input = load_input(&args.input)?;
        let (cdg, title) = match args.flavor {
            Flavor::Source => {
                let func = input
                    .function
                    .ok_or(AnalysisError::MissingSection("function"))?;
                let scfg = build_scfg(&func);
                warn_diagnostics(&scfg.diagnostics);
                (
                    build_cdg(scfg.graph(), scfg.entry_or_start()),
                    "Source Control Dependence Graph",
                )
            }
            Flavor::Ir => {
                let ir = input.ir.ok_or(AnalysisError::MissingSection("ir"))?;
                let bg = ir.function.block_graph();
                let entry = NodeIndex::new(
                    ir.function
                        .entry
                        .min(ir.function.blocks.len().saturating_sub(1)),
                );
                (build_cdg(&bg, entry), "IR Control Dependence Graph")
            }
        };
        let out = match cli.format {
            OutputFormat::Dot => export::cdg_to_dot(&cdg, title),
            OutputFormat::Json => {
                anyhow::bail!("json export is not defined for the CDG; use --format dot")
            }
        };
        emit(cli, &out)
    }

    pub fn pdg(args: &PdgArgs, cli: &Cli) -> anyhow::Result<()> {
        let input = load_input(&args.input)?;
        let ir = input.ir.ok_or(AnalysisError::MissingSection("ir"))?;
        let oracle = MapOracle::new(ir.dependences.clone());
        let config = PdgConfig {
            solve_reachability: !args.no_reachability,
            simplify: !args.no_simplify,
            create_pi_blocks: !args.no_pi_blocks,
        };

        let mut builder = PdgBuilder::new(&ir.function)
            .with_oracle(&oracle)
            .with_config(config);
        if let Some(t) = ir.alias.as_ref() {
            builder = builder.with_alias(t);
        }
        if let Some(t) = ir.server_alias.as_ref() {
            builder = builder.with_server_alias(t);
        }
        if let Some(d) = ir.di_dependences.as_ref() {
            builder = builder.with_di_deps(d);
        }
        if let Some(l) = ir.loops.as_ref() {
            builder = builder.with_loops(l);
        }
        if let Some(t) = ir.tli.as_ref() {
            builder = builder.with_tli(t);
        }
        let pdg = builder.build();
        warn_diagnostics(&pdg.diagnostics);

        let out = match cli.format {
            OutputFormat::Dot => export::pdg_to_dot(&pdg, &ir.function),
            OutputFormat::Json => json_string(&export::pdg_to_json(&pdg, &ir.function))?,
        };
        emit(cli, &out)
    }

    pub fn domtree(args: &DomtreeArgs, cli: &Cli) -> anyhow::Result<()> {
        let input = load_input(&args.input)?;
        let pdt = match args.flavor {
            Flavor::Source => {
                let func = input
                    .function
                    .ok_or(AnalysisError::MissingSection("function"))?;
                let scfg = build_scfg(&func);
                warn_diagnostics(&scfg.diagnostics);
                PostDominatorTree::new(scfg.graph())
            }
            Flavor::Ir => {
                let ir = input.ir.ok_or(AnalysisError::MissingSection("ir"))?;
                PostDominatorTree::new(&ir.function.block_graph())
            }
        };
        let out = match cli.format {
            OutputFormat::Dot => export::pdt_to_dot(&pdt),
            OutputFormat::Json => {
                anyhow::bail!(
                    "json export is not defined for the dominator tree; use --format dot"
                )
            }
        };
        emit(cli, &out)
    }
}
