use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;

use tact_engine::rates;
use tact_phylo::{nexus, MrcaCache, Tree};

#[derive(Args)]
pub struct CheckTreesArgs {
    /// The TACTed phylogeny to check.
    pub simulated: PathBuf,

    /// Backbone phylogeny the TACTed tree was built from.
    #[arg(long)]
    pub backbone: PathBuf,

    /// Taxonomy tree, e.g. from `tact build-taxonomy`.
    #[arg(long)]
    pub taxonomy: PathBuf,

    /// Output CSV report (defaults to standard output).
    #[arg(long)]
    pub output: Option<PathBuf>,
}

struct TreeView {
    tree: Tree,
    cache: MrcaCache,
    tips: BTreeSet<String>,
}

fn load(path: &PathBuf) -> Result<TreeView> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut tree =
        nexus::parse_auto(&text).with_context(|| format!("parsing {}", path.display()))?;
    tree.compute_ages(tact_phylo::DEFAULT_PRECISION)
        .with_context(|| format!("validating {}", path.display()))?;
    let cache = MrcaCache::build(&tree);
    let tips = tree.leaf_labels();
    Ok(TreeView { tree, cache, tips })
}

/// Monophyletic tip count and a refit of the clade's rates, when the
/// taxon exists as a clade in the given tree.
fn clade_stats(view: &TreeView, species: &BTreeSet<String>) -> Option<(usize, f64, f64)> {
    let sampled: BTreeSet<String> = species.intersection(&view.tips).cloned().collect();
    if sampled.is_empty() {
        return None;
    }
    let mrca = view.cache.monophyletic_mrca(&view.tree, &sampled)?;
    let ntax = view.tree.num_leaves_under(mrca);
    if view.tree.is_leaf(mrca) {
        // Singleton: analytic stem estimate, or nothing at the root.
        return match view.tree.parent(mrca) {
            Some(p) => {
                let (b, d) = rates::fit_singleton(species.len(), view.tree.age(p)).ok()?;
                Some((ntax, b, d))
            }
            None => Some((ntax, f64::NAN, f64::NAN)),
        };
    }
    let sampling = (ntax as f64 / species.len() as f64).min(1.0);
    let ages = view.tree.branching_ages(mrca);
    let mut rng = StdRng::seed_from_u64(0);
    match rates::fit_birth_death(&ages, sampling, &mut rng) {
        Ok((b, d)) => Some((ntax, b, d)),
        Err(_) => Some((ntax, f64::NAN, f64::NAN)),
    }
}

fn fmt_opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

pub fn run(args: &CheckTreesArgs) -> Result<()> {
    let taxonomy_text = fs::read_to_string(&args.taxonomy)
        .with_context(|| format!("reading {}", args.taxonomy.display()))?;
    let taxonomy = nexus::parse_auto(&taxonomy_text)
        .with_context(|| format!("parsing {}", args.taxonomy.display()))?;

    let backbone = load(&args.backbone)?;
    let simulated = load(&args.simulated)?;

    let mut out = String::from(
        "node,taxonomy_tips,backbone_tips,simulated_tips,backbone_monophyletic,simulated_monophyletic,backbone_birth,simulated_birth,backbone_death,simulated_death,warnings\n",
    );

    for id in taxonomy.preorder(taxonomy.root()) {
        if taxonomy.is_leaf(id) || id == taxonomy.root() {
            continue;
        }
        let Some(taxon) = taxonomy.label(id) else {
            continue;
        };
        let species = taxonomy.leaf_labels_under(id);
        let mut notes: Vec<&str> = Vec::new();

        let bb = clade_stats(&backbone, &species);
        let st = clade_stats(&simulated, &species);

        if let Some((n, _, _)) = bb {
            if n > species.len() {
                notes.push("BACKBONE clade has more tips than the taxonomy suggests");
            }
        }
        if let Some((n, _, _)) = st {
            if n > species.len() {
                notes.push("SIMULATED clade has more tips than the taxonomy suggests");
            }
        }
        let bb_sampled = species.intersection(&backbone.tips).count();
        if bb_sampled > 0 && bb.is_some() != st.is_some() {
            notes.push("BACKBONE and SIMULATED trees differ in monophyly for this taxon");
        }

        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{}",
            taxon,
            species.len(),
            fmt_opt(bb.map(|(n, _, _)| n)),
            fmt_opt(st.map(|(n, _, _)| n)),
            bb.is_some(),
            st.is_some(),
            fmt_opt(bb.map(|(_, b, _)| b)),
            fmt_opt(st.map(|(_, b, _)| b)),
            fmt_opt(bb.map(|(_, _, d)| d)),
            fmt_opt(st.map(|(_, _, d)| d)),
            notes.join("; "),
        );
    }

    match &args.output {
        Some(path) => {
            fs::write(path, out).with_context(|| format!("writing {}", path.display()))?;
            println!("Report written to: {}", path.display());
        }
        None => print!("{out}"),
    }
    Ok(())
}
