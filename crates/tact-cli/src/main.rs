//! TACT command-line interface
//!
//! Unified entrypoint for:
//! - Building a taxonomy tree from a ranks CSV (`build-taxonomy`)
//! - Adding unsampled taxa onto a backbone phylogeny (`add-taxa`)
//! - Checking a TACTed tree against its inputs (`check-trees`)

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use tact_engine::EngineError;

mod add_taxa;
mod build_taxonomy;
mod check_trees;

/// Exit code for validation failures (bad inputs).
const EXIT_VALIDATION: u8 = 1;
/// Exit code for internal invariant violations (bugs).
const EXIT_INTERNAL: u8 = 2;

#[derive(Parser)]
#[command(name = "tact")]
#[command(
    author,
    version,
    about = "TACT: Taxonomic Addition for Complete Trees"
)]
struct Cli {
    /// Emit extra information (repeat for debug output).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a taxonomic tree from a CSV of ranks.
    ///
    /// Each row is one species; columns run from the most inclusive rank
    /// to the least inclusive, species name last. Every cell must be
    /// nonempty and every rank label unique.
    BuildTaxonomy(build_taxonomy::BuildTaxonomyArgs),

    /// Add tips onto a backbone phylogeny using a taxonomy tree.
    AddTaxa(add_taxa::AddTaxaArgs),

    /// Check a TACTed phylogeny for consistency with its backbone and
    /// taxonomy, writing a per-taxon CSV report.
    CheckTrees(check_trees::CheckTreesArgs),
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<()> = match cli.command {
        Commands::BuildTaxonomy(args) => build_taxonomy::run(&args),
        Commands::AddTaxa(args) => add_taxa::run(&args),
        Commands::CheckTrees(args) => check_trees::run(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Internal(_)) | Some(EngineError::MonophylyBroken(_)) => EXIT_INTERNAL,
        Some(_) => EXIT_VALIDATION,
        None => EXIT_VALIDATION,
    }
}
