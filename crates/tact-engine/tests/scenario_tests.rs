//! End-to-end scenarios: taxonomy + backbone in, augmented tree out.
//!
//! All runs are seeded; the seed used throughout is 0x5AC7 unless a
//! scenario needs to demonstrate seed sensitivity.

use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;

use tact_engine::driver::tags;
use tact_engine::{RunConfig, RunOutcome};
use tact_phylo::{newick, MrcaCache};

const SEED: u64 = 0x5AC7;

fn cfg(seed: u64) -> RunConfig {
    RunConfig {
        seed,
        ..RunConfig::default()
    }
}

fn run(taxonomy: &str, backbone: &str, config: &RunConfig) -> RunOutcome {
    let taxonomy = newick::parse(taxonomy).unwrap();
    let backbone = newick::parse(backbone).unwrap();
    let cancel = AtomicBool::new(false);
    tact_engine::run(&taxonomy, backbone, config, &cancel).unwrap()
}

fn labels(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The output carries exactly the taxonomy's species, is binary,
/// and is ultrametric.
fn assert_well_formed(outcome: &RunOutcome, taxonomy: &str) {
    let taxonomy = newick::parse(taxonomy).unwrap();
    assert_eq!(outcome.tree.leaf_labels(), taxonomy.leaf_labels());
    assert!(outcome.tree.is_binary());
    let (ok, lo, hi) = outcome
        .tree
        .ultrametricity(tact_phylo::DEFAULT_PRECISION * 10.0);
    assert!(ok, "not ultrametric: {lo:?} vs {hi:?}");
}

/// Every rates row is feasible and `source` is ancestor-or-self.
fn assert_rate_rows(outcome: &RunOutcome, taxonomy: &str) {
    let taxonomy = newick::parse(taxonomy).unwrap();
    for row in &outcome.rates {
        assert!(row.birth > 0.0, "row {row:?}");
        assert!(row.death >= 0.0, "row {row:?}");
        assert!(row.birth > row.death, "row {row:?}");
        if row.source != row.taxon {
            let node = taxonomy.find_label(&row.taxon).expect("row taxon in taxonomy");
            let ancestors: Vec<&str> = taxonomy
                .ancestors(node)
                .filter_map(|a| taxonomy.label(a))
                .collect();
            assert!(
                ancestors.contains(&row.source.as_str())
                    || row.source == tact_phylo::taxonomy::TAXONOMY_ROOT_LABEL,
                "source {} is not an ancestor of {}",
                row.source,
                row.taxon
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Cherry only: a two-tip genus gains its third species.
// ---------------------------------------------------------------------------

const CHERRY_TAXONOMY: &str = "(((a,b,c)G)F);";
const CHERRY_BACKBONE: &str = "((a:1.0,b:1.0):0.0);";

#[test]
fn cherry_gains_its_third_species() {
    let outcome = run(CHERRY_TAXONOMY, CHERRY_BACKBONE, &cfg(SEED));
    assert_well_formed(&outcome, CHERRY_TAXONOMY);
    assert_rate_rows(&outcome, CHERRY_TAXONOMY);
    assert_eq!(outcome.added, 1);

    // The new divergence lies strictly inside (0, 1.0).
    let t = &outcome.tree;
    let idx = t.leaf_index();
    let c_parent = t.parent(idx["c"]).unwrap();
    let age = t.age(c_parent);
    assert!(age > 0.0 && age <= 1.0, "divergence at {age}");

    // Analytic cherry rate: ln(3) / 1.0, zero extinction.
    let g_row = outcome.rates.iter().find(|r| r.taxon == "G").unwrap();
    assert!((g_row.birth - 3.0f64.ln()).abs() < 1e-9);
    assert_eq!(g_row.death, 0.0);
}

// ---------------------------------------------------------------------------
// A fully unsampled sister genus attaches on the stem.
// ---------------------------------------------------------------------------

const SISTER_TAXONOMY: &str = "((a1,a2,a3)cladeA,(b1,b2,b3)cladeB)everything;";
const SISTER_BACKBONE: &str = "((a1:2.0,(a2:1.0,a3:1.0):1.0):2.0);";

#[test]
fn unsampled_sister_genus_attaches_on_the_stem() {
    let outcome = run(SISTER_TAXONOMY, SISTER_BACKBONE, &cfg(SEED));
    assert_well_formed(&outcome, SISTER_TAXONOMY);
    assert_rate_rows(&outcome, SISTER_TAXONOMY);
    assert_eq!(outcome.added, 3);

    let t = &outcome.tree;
    let cache = MrcaCache::build(t);

    // Both genera come out monophyletic.
    let a = cache
        .monophyletic_mrca(t, &labels(&["a1", "a2", "a3"]))
        .expect("cladeA must stay monophyletic");
    let b = cache
        .monophyletic_mrca(t, &labels(&["b1", "b2", "b3"]))
        .expect("cladeB must come out monophyletic");

    // cladeA's crown age is untouched.
    assert!((t.age(a) - 2.0).abs() < 1e-9);

    // cladeB hangs off cladeA's stem: its stem age lies in [2, 4].
    let b_stem = t.parent(b).map(|p| t.age(p)).unwrap();
    assert!(
        (2.0..=4.0).contains(&b_stem),
        "cladeB stem at {b_stem}, expected within [2, 4]"
    );
    let fully_locked_logged = outcome
        .events
        .iter()
        .any(|e| e.tag == tags::FULLY_LOCKED);
    assert!(fully_locked_logged);
}

// ---------------------------------------------------------------------------
// A rogue tip relaxes monophyly enforcement for its host taxon.
// ---------------------------------------------------------------------------

const ROGUE_TAXONOMY: &str = "((a1,a2,a3,a4)A,(b1,b2)B)root;";
const ROGUE_BACKBONE: &str = "((a1:1.0,b1:1.0):1.0,(a2:1.5,a3:1.5):0.5);";

#[test]
fn rogue_tip_is_reported_and_tolerated() {
    let outcome = run(ROGUE_TAXONOMY, ROGUE_BACKBONE, &cfg(SEED));
    assert_well_formed(&outcome, ROGUE_TAXONOMY);
    assert_rate_rows(&outcome, ROGUE_TAXONOMY);
    assert_eq!(outcome.added, 2);

    let warned = outcome
        .events
        .iter()
        .any(|e| e.tag == tags::NOT_MONOPHYLETIC && e.taxon.ends_with("/A"));
    assert!(warned, "expected a monophyly warning keyed to A: {:?}", outcome.events);

    // B was completed around its rogue member and is monophyletic.
    let t = &outcome.tree;
    let cache = MrcaCache::build(t);
    assert!(cache.monophyletic_mrca(t, &labels(&["b1", "b2"])).is_some());
}

// ---------------------------------------------------------------------------
// Low crown capture defers to the parent's rates and permits stem attachment.
// ---------------------------------------------------------------------------

fn ladder(names: &[String], crown_age: f64) -> String {
    // (h1:c,(h2:c',(...)):...) with evenly spaced divergences.
    let n = names.len();
    assert!(n >= 2);
    let step = crown_age / (n - 1) as f64;
    let mut inner = format!(
        "({}:{},{}:{})",
        names[n - 2],
        step,
        names[n - 1],
        step
    );
    let mut depth = step;
    for i in (0..n - 2).rev() {
        depth += step;
        inner = format!("({}:{depth},{inner}:{step})", names[i]);
    }
    inner
}

#[test]
fn low_ccp_uses_ancestor_rates_and_source() {
    let g_species: Vec<String> = (1..=10).map(|i| format!("g{i}")).collect();
    let h_species: Vec<String> = (1..=10).map(|i| format!("h{i}")).collect();
    let taxonomy = format!(
        "(({})G,({})H)F;",
        g_species.join(","),
        h_species.join(",")
    );
    // G is a cherry of 2 (CCP(10,2) ~ 0.41); H is fully sampled.
    let h_clade = ladder(&h_species, 2.0);
    let backbone = format!("((g1:1.0,g2:1.0):2.0,{h_clade}:1.0);");

    let outcome = run(&taxonomy, &backbone, &cfg(SEED));
    assert_well_formed(&outcome, &taxonomy);
    assert_rate_rows(&outcome, &taxonomy);
    assert_eq!(outcome.added, 8);

    let g_row = outcome.rates.iter().find(|r| r.taxon == "G").unwrap();
    assert_ne!(g_row.source, "G");
    let refused = outcome
        .events
        .iter()
        .any(|e| e.tag == tags::CCP_BELOW_CUTOFF && e.taxon.ends_with("/G"));
    assert!(refused, "expected CCPBelowCutoff for G: {:?}", outcome.events);

    // H stays monophyletic.
    let t = &outcome.tree;
    let cache = MrcaCache::build(t);
    let h_set: BTreeSet<String> = h_species.iter().cloned().collect();
    assert!(cache.monophyletic_mrca(t, &h_set).is_some());
}

// ---------------------------------------------------------------------------
// The yule flag zeroes every extinction rate and changes the draw.
// ---------------------------------------------------------------------------

#[test]
fn yule_flag_zeroes_extinction() {
    let outcome = run(SISTER_TAXONOMY, SISTER_BACKBONE, &cfg(SEED));
    let yule = RunConfig {
        yule: true,
        ..cfg(SEED)
    };
    let outcome_yule = run(SISTER_TAXONOMY, SISTER_BACKBONE, &yule);

    assert_well_formed(&outcome_yule, SISTER_TAXONOMY);
    for row in &outcome_yule.rates {
        assert_eq!(row.death, 0.0, "row {row:?}");
    }
    // When the free fit found nonzero extinction, the rates differ and so
    // must the drawn divergence times.
    if outcome.rates.iter().any(|r| r.death > 0.0) {
        assert_ne!(
            newick::write(&outcome.tree),
            newick::write(&outcome_yule.tree)
        );
    }
}

// ---------------------------------------------------------------------------
// Determinism under the seed.
// ---------------------------------------------------------------------------

#[test]
fn same_seed_bit_identical_different_seed_not() {
    let a = run(SISTER_TAXONOMY, SISTER_BACKBONE, &cfg(SEED));
    let b = run(SISTER_TAXONOMY, SISTER_BACKBONE, &cfg(SEED));
    assert_eq!(newick::write(&a.tree), newick::write(&b.tree));
    assert_eq!(a.rates.len(), b.rates.len());

    let c = run(SISTER_TAXONOMY, SISTER_BACKBONE, &cfg(SEED + 1));
    assert_ne!(newick::write(&a.tree), newick::write(&c.tree));
}

// ---------------------------------------------------------------------------
// Broader sweeps: every leaf placed, monophyly and ages preserved.
// ---------------------------------------------------------------------------

#[test]
fn sparse_family_is_filled_completely() {
    let species: Vec<String> = (1..=8).map(|i| format!("x{i}")).collect();
    let taxonomy = "((x1,x2,x3,x4)GenA,(x5,x6)GenB,(x7,x8)GenC)Fam;";
    let backbone = "((x1:1.0,x2:1.0):2.0,(x5:2.0,x6:2.0):1.0);";
    let outcome = run(taxonomy, backbone, &cfg(SEED));
    assert_well_formed(&outcome, taxonomy);
    assert_rate_rows(&outcome, taxonomy);
    assert_eq!(outcome.added, 4);
    let t = &outcome.tree;
    assert_eq!(t.leaf_labels(), species.iter().cloned().collect());

    // Genera that were monophyletic in the backbone stay monophyletic.
    let cache = MrcaCache::build(t);
    assert!(cache.monophyletic_mrca(t, &labels(&["x1", "x2", "x3", "x4"])).is_some());
    assert!(cache.monophyletic_mrca(t, &labels(&["x5", "x6"])).is_some());
    // GenC was created whole.
    assert!(cache.monophyletic_mrca(t, &labels(&["x7", "x8"])).is_some());
}

#[test]
fn pre_existing_node_ages_are_preserved() {
    let outcome = run(SISTER_TAXONOMY, SISTER_BACKBONE, &cfg(SEED));
    let t = &outcome.tree;
    let idx = t.leaf_index();
    let a1a2 = t.mrca(&[idx["a1"], idx["a2"]]).unwrap();
    let a2a3 = t.mrca(&[idx["a2"], idx["a3"]]).unwrap();
    assert!((t.age(a1a2) - 2.0).abs() < 1e-9);
    assert!((t.age(a2a3) - 1.0).abs() < 1e-9);
}

#[test]
fn validation_rejects_unknown_backbone_leaves() {
    let taxonomy = newick::parse("((a,b)G)F;").unwrap();
    let backbone = newick::parse("((a:1.0,zz:1.0):1.0,b:2.0);").unwrap();
    let cancel = AtomicBool::new(false);
    let err = tact_engine::run(&taxonomy, backbone, &cfg(SEED), &cancel).unwrap_err();
    assert!(matches!(
        err,
        tact_engine::EngineError::Phylo(tact_phylo::PhyloError::UnknownLeaves(_))
    ));
}

#[test]
fn validation_rejects_polytomies() {
    let taxonomy = newick::parse("((a,b,c,d)G)F;").unwrap();
    let backbone = newick::parse("(a:1.0,b:1.0,c:1.0);").unwrap();
    let cancel = AtomicBool::new(false);
    let err = tact_engine::run(&taxonomy, backbone, &cfg(SEED), &cancel).unwrap_err();
    assert!(matches!(
        err,
        tact_engine::EngineError::Phylo(tact_phylo::PhyloError::NotBinary(_))
    ));
}

#[test]
fn outgroups_are_pruned_before_fitting() {
    let taxonomy = "((a1,a2,a3)A)F;";
    let backbone = "(((a1:1.0,a2:1.0):1.0,og:2.0):1.0);";
    // `og` is not in the taxonomy: without pruning this is a validation
    // failure, with pruning it runs.
    let mut config = cfg(SEED);
    let cancel = AtomicBool::new(false);
    assert!(tact_engine::run(
        &newick::parse(taxonomy).unwrap(),
        newick::parse(backbone).unwrap(),
        &config,
        &cancel
    )
    .is_err());

    config.outgroups = vec!["og".to_owned()];
    let outcome = run(taxonomy, backbone, &config);
    assert_well_formed(&outcome, taxonomy);
    assert!(!outcome.tree.leaf_labels().contains("og"));
}
