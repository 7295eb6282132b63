use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use tact_engine::{Event, RateRow, RunConfig, RunOutcome, Severity};
use tact_phylo::{newick, nexus};

#[derive(Args)]
pub struct AddTaxaArgs {
    /// Taxonomy tree (Newick or NEXUS), e.g. from `tact build-taxonomy`.
    #[arg(long)]
    pub taxonomy: PathBuf,

    /// Backbone tree to attach the taxonomy to (Newick or NEXUS).
    #[arg(long)]
    pub backbone: PathBuf,

    /// Output base name; writes `<output>.newick.tre`, `<output>.nexus.tre`,
    /// `<output>.rates.csv` and `<output>.log.txt`.
    #[arg(long)]
    pub output: PathBuf,

    /// Minimum probability to consider a clade's crown sampled.
    #[arg(long, default_value_t = 0.8)]
    pub min_ccp: f64,

    /// Assume a Yule (pure birth) process: all extinction rates zero.
    #[arg(long)]
    pub yule: bool,

    /// Tolerance for the ultrametricity check.
    #[arg(long, default_value_t = 1e-6)]
    pub ultrametricity_precision: f64,

    /// Seed for all stochastic choices; identical seeds give identical
    /// output trees.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Comma-separated outgroup taxa, pruned from the backbone before
    /// any fitting.
    #[arg(long, value_delimiter = ',')]
    pub outgroups: Vec<String>,
}

pub fn run(args: &AddTaxaArgs) -> Result<()> {
    let taxonomy_text = fs::read_to_string(&args.taxonomy)
        .with_context(|| format!("reading {}", args.taxonomy.display()))?;
    let taxonomy = nexus::parse_auto(&taxonomy_text)
        .with_context(|| format!("parsing {}", args.taxonomy.display()))?;

    let backbone_text = fs::read_to_string(&args.backbone)
        .with_context(|| format!("reading {}", args.backbone.display()))?;
    let backbone = nexus::parse_auto(&backbone_text)
        .with_context(|| format!("parsing {}", args.backbone.display()))?;

    let config = RunConfig {
        min_ccp: args.min_ccp,
        yule: args.yule,
        precision: args.ultrametricity_precision,
        seed: args.seed,
        outgroups: args.outgroups.clone(),
    };

    let cancel = AtomicBool::new(false);
    let outcome = tact_engine::run(&taxonomy, backbone, &config, &cancel)?;
    write_outputs(&args.output, &outcome)?;

    let warnings = outcome
        .events
        .iter()
        .filter(|e| e.severity != Severity::Info)
        .count();
    println!(
        "Added {} tips ({} warnings). Output written to: {}.newick.tre",
        outcome.added.to_string().bold(),
        warnings,
        args.output.display()
    );
    Ok(())
}

fn write_outputs(base: &PathBuf, outcome: &RunOutcome) -> Result<()> {
    let base = base.display();

    let newick_path = format!("{base}.newick.tre");
    fs::write(&newick_path, newick::write(&outcome.tree))
        .with_context(|| format!("writing {newick_path}"))?;

    let nexus_path = format!("{base}.nexus.tre");
    fs::write(&nexus_path, nexus::write(&outcome.tree))
        .with_context(|| format!("writing {nexus_path}"))?;

    let mut rates = String::from("taxon,birth,death,ccp,source\n");
    for row in &outcome.rates {
        let _ = writeln!(
            rates,
            "{},{},{},{},{}",
            row.taxon, row.birth, row.death, row.ccp, row.source
        );
    }
    let rates_path = format!("{base}.rates.csv");
    fs::write(&rates_path, rates).with_context(|| format!("writing {rates_path}"))?;

    let mut log = String::new();
    for event in &outcome.events {
        let severity = match event.severity {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        };
        let _ = writeln!(
            log,
            "{severity}\t{}\t{}\t{}",
            event.tag, event.taxon, event.message
        );
    }
    let log_path = format!("{base}.log.txt");
    fs::write(&log_path, log).with_context(|| format!("writing {log_path}"))?;

    #[derive(Serialize)]
    struct Summary<'a> {
        tips: usize,
        added: usize,
        rates: &'a [RateRow],
        events: &'a [Event],
    }
    let summary = Summary {
        tips: outcome.tree.leaf_labels().len(),
        added: outcome.added,
        rates: &outcome.rates,
        events: &outcome.events,
    };
    let summary_path = format!("{base}.summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("writing {summary_path}"))?;

    Ok(())
}
