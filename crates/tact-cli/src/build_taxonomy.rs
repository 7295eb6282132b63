use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use tact_phylo::{newick, nexus, taxonomy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Schema {
    Newick,
    Nexus,
}

#[derive(Args)]
pub struct BuildTaxonomyArgs {
    /// Input taxonomy CSV.
    pub taxonomy: PathBuf,

    /// Name of the output taxonomic tree.
    #[arg(long)]
    pub output: PathBuf,

    /// Format of the output taxonomic tree.
    #[arg(long, value_enum, default_value = "newick")]
    pub schema: Schema,
}

pub fn run(args: &BuildTaxonomyArgs) -> Result<()> {
    let text = fs::read_to_string(&args.taxonomy)
        .with_context(|| format!("reading {}", args.taxonomy.display()))?;
    let (tree, warnings) = taxonomy::build_from_csv(&text)?;
    for w in &warnings {
        tracing::warn!("{w}");
    }

    let rendered = match args.schema {
        Schema::Newick => newick::write_topology(&tree),
        Schema::Nexus => nexus::write(&tree),
    };
    fs::write(&args.output, rendered.as_bytes())
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!(
        "Taxonomy with {} species written to: {}",
        tree.leaf_labels().len(),
        args.output.display()
    );
    Ok(())
}
