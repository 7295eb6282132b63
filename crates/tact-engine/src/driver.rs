//! Two-phase pipeline: parallel rate precomputation, then sequential,
//! deterministic taxon placement.
//!
//! Phase 1 fans out over the taxonomy with rayon; every qualifying taxon
//! gets a maximum-likelihood fit against the (read-only) backbone. Phase
//! 2 walks the same taxa in the same post-order and mutates the backbone,
//! one taxon transaction at a time.
//!
//! All randomness derives from one global seed: each taxon draws from a
//! substream seeded by hashing its taxonomy path, so outputs are
//! bit-identical across runs no matter how Phase 1 was scheduled.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use tact_phylo::{taxonomy, MrcaCache, NodeId, PhyloError, Tree};

use crate::bd::crown_capture_probability;
use crate::placement;
use crate::rates;
use crate::sampler;
use crate::EngineError;

/// Stable textual tags for the log stream.
pub mod tags {
    pub const FULLY_LOCKED: &str = "FullyLocked";
    pub const MIN_AGE_VIOLATION: &str = "MinAgeViolation";
    pub const RATE_FIT_FAILED: &str = "RateFitFailed";
    pub const CCP_BELOW_CUTOFF: &str = "CCPBelowCutoff";
    pub const ULTRAMETRIC_REPAIRED: &str = "UltrametricRepaired";
    pub const NOT_MONOPHYLETIC: &str = "NotMonophyletic";
    pub const SHORT_BRANCHES: &str = "ShortBranches";
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Minimum crown capture probability to fit rates at a taxon and to
    /// forbid stem attachment.
    pub min_ccp: f64,
    /// Force pure-birth fits (`death = 0`).
    pub yule: bool,
    /// Ultrametricity tolerance.
    pub precision: f64,
    /// Global seed; per-taxon substreams derive from it.
    pub seed: u64,
    /// Leaves pruned from the backbone before any fitting.
    pub outgroups: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            min_ccp: 0.8,
            yule: false,
            precision: tact_phylo::DEFAULT_PRECISION,
            seed: 0,
            outgroups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// One entry of the classified log stream.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub severity: Severity,
    pub tag: &'static str,
    /// Taxonomy path of the taxon the event is keyed to.
    pub taxon: String,
    pub message: String,
}

/// One row of the rates table.
#[derive(Debug, Clone, Serialize)]
pub struct RateRow {
    pub taxon: String,
    pub birth: f64,
    pub death: f64,
    pub ccp: f64,
    /// Label of the taxon whose fit was actually used: the taxon itself,
    /// or its nearest ancestor with an admitted fit.
    pub source: String,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub tree: Tree,
    pub rates: Vec<RateRow>,
    pub events: Vec<Event>,
    /// Number of leaves grafted.
    pub added: usize,
}

/// Derive the RNG substream seed for a taxon from the global seed and the
/// taxon's path in the taxonomy.
pub fn subseed(seed: u64, path: &str) -> u64 {
    let digest = Sha256::digest(path.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    seed ^ u64::from_be_bytes(bytes)
}

/// Static view of one taxonomy node, precomputed before either phase.
struct TaxonInfo {
    label: String,
    /// Labels root → taxon, slash-joined; the substream key.
    path: String,
    /// Number of labelled ancestors (root = 0).
    level: usize,
    species: BTreeSet<String>,
    /// Labels of the labelled internal taxa strictly below this one.
    nested: BTreeSet<String>,
    /// Labels of this taxon and its labelled ancestors, nearest first.
    fallback_chain: Vec<String>,
}

fn collect_taxa(taxonomy: &Tree) -> Vec<TaxonInfo> {
    let root = taxonomy.root();
    let mut out = Vec::new();
    for id in taxonomy.postorder(root) {
        if taxonomy.is_leaf(id) {
            continue;
        }
        let Some(label) = taxonomy.label(id) else {
            continue;
        };
        let mut chain_ids: Vec<NodeId> = taxonomy
            .ancestors(id)
            .filter(|&a| taxonomy.label(a).is_some())
            .collect();
        let mut path_parts: Vec<&str> = chain_ids
            .iter()
            .rev()
            .filter_map(|&a| taxonomy.label(a))
            .collect();
        path_parts.push(label);
        chain_ids.insert(0, id);

        let nested = taxonomy
            .preorder(id)
            .into_iter()
            .filter(|&n| n != id && !taxonomy.is_leaf(n))
            .filter_map(|n| taxonomy.label(n).map(str::to_owned))
            .collect();

        out.push(TaxonInfo {
            label: label.to_owned(),
            path: path_parts.join("/"),
            level: path_parts.len() - 1,
            species: taxonomy.leaf_labels_under(id),
            nested,
            fallback_chain: chain_ids
                .iter()
                .filter_map(|&a| taxonomy.label(a).map(str::to_owned))
                .collect(),
        });
    }
    out
}

struct EventSink {
    events: Vec<Event>,
}

impl EventSink {
    fn new() -> Self {
        Self { events: Vec::new() }
    }

    fn push(&mut self, severity: Severity, tag: &'static str, taxon: &str, message: String) {
        match severity {
            Severity::Info => info!(tag, taxon, "{message}"),
            Severity::Warn => warn!(tag, taxon, "{message}"),
            Severity::Error => error!(tag, taxon, "{message}"),
        }
        self.events.push(Event {
            severity,
            tag,
            taxon: taxon.to_owned(),
            message,
        });
    }
}

/// Result of one Phase-1 fit attempt.
struct FitAttempt {
    taxon: String,
    ccp: f64,
    fit: Option<(f64, f64)>,
    event: Option<(Severity, &'static str, String, String)>,
}

fn phase1_fit(
    backbone: &Tree,
    cache: &MrcaCache,
    info: &TaxonInfo,
    cfg: &RunConfig,
    is_root: bool,
) -> Option<FitAttempt> {
    let mask = cache.bitmask(info.species.iter().map(String::as_str));
    let k_sampled = mask.len() as usize;
    if k_sampled == 0 {
        return None;
    }
    let n_total = info.species.len();
    let ccp = crown_capture_probability(n_total, k_sampled);

    // Admission gate. The taxonomy root is always fit so that ancestor
    // fallback has a terminal anchor.
    if ccp < cfg.min_ccp && !is_root {
        return Some(FitAttempt {
            taxon: info.label.clone(),
            ccp,
            fit: None,
            event: Some((
                Severity::Warn,
                tags::CCP_BELOW_CUTOFF,
                info.path.clone(),
                format!(
                    "crown capture probability {ccp:.4} below cutoff {} ({k_sampled}/{n_total} sampled); deferring to an ancestor fit",
                    cfg.min_ccp
                ),
            )),
        });
    }

    let mrca = cache.mrca(backbone, &mask)?;
    if backbone.is_leaf(mrca) {
        // A single sampled tip carries no branching times; only the
        // forced root fit falls back to the analytic stem estimate.
        let fit = if is_root {
            backbone
                .parent(mrca)
                .and_then(|p| rates::fit_singleton(n_total, backbone.age(p)).ok())
        } else {
            None
        };
        return Some(FitAttempt {
            taxon: info.label.clone(),
            ccp,
            fit,
            event: None,
        });
    }
    let k_eff = backbone.num_leaves_under(mrca);
    let sampling = (k_eff as f64 / n_total as f64).min(1.0);

    let result = if k_eff == 2 {
        rates::fit_cherry(n_total, backbone.age(mrca))
    } else {
        let ages = backbone.branching_ages(mrca);
        let mut rng = StdRng::seed_from_u64(subseed(cfg.seed, &info.path));
        rates::fit(&ages, sampling, cfg.yule, &mut rng)
    };

    match result {
        Ok((birth, death)) => Some(FitAttempt {
            taxon: info.label.clone(),
            ccp,
            fit: Some((birth, death)),
            event: None,
        }),
        Err(e) => Some(FitAttempt {
            taxon: info.label.clone(),
            ccp,
            fit: None,
            event: Some((
                Severity::Warn,
                tags::RATE_FIT_FAILED,
                info.path.clone(),
                format!("{e}; deferring to an ancestor fit"),
            )),
        }),
    }
}

/// Fits and admission bookkeeping shared by Phase 2.
struct RateTable {
    fits: HashMap<String, (f64, f64)>,
    ccp: HashMap<String, f64>,
    rows: Vec<RateRow>,
    emitted: HashSet<String>,
}

impl RateTable {
    fn resolve(&self, chain: &[String]) -> Option<(f64, f64, String)> {
        for label in chain {
            if let Some(&(b, d)) = self.fits.get(label) {
                return Some((b, d, label.clone()));
            }
        }
        None
    }

    fn record(&mut self, taxon: &str, birth: f64, death: f64, ccp: f64, source: &str) {
        if self.emitted.insert(taxon.to_owned()) {
            self.rows.push(RateRow {
                taxon: taxon.to_owned(),
                birth,
                death,
                ccp,
                source: source.to_owned(),
            });
        }
    }
}

/// Window of admissible ages for new divergences inside `node`.
struct Window {
    tyoung: f64,
    /// Upper cap when the contiguous band stops short of the crown.
    told_cap: Option<f64>,
}

fn admissible_window(
    tree: &Tree,
    node: NodeId,
    precision: f64,
    path: &str,
    sink: &mut EventSink,
) -> Window {
    let intervals = placement::age_intervals(tree, node);
    if intervals.is_empty() {
        return Window {
            tyoung: 0.0,
            told_cap: None,
        };
    }
    match intervals.atomic_hull(precision) {
        Ok((lo, _hi)) => Window {
            tyoung: lo,
            told_cap: None,
        },
        Err(_) => {
            let &(lo, hi) = intervals
                .parts()
                .last()
                .expect("non-empty union has a last part");
            sink.push(
                Severity::Warn,
                tags::MIN_AGE_VIOLATION,
                path,
                format!(
                    "age constraints are disjoint; constraining new divergences to [{lo:.6}, {hi:.6}]"
                ),
            );
            Window {
                tyoung: lo,
                told_cap: Some(hi),
            }
        }
    }
}

/// Draw `m` divergence times for grafts into `node`, honouring the
/// admissible window. Falls back to the tightest feasible age (with a
/// `MinAgeViolation`) when the window cannot accommodate the minimum age.
#[allow(clippy::too_many_arguments)]
fn draw_for(
    tree: &Tree,
    node: NodeId,
    birth: f64,
    death: f64,
    m: usize,
    told: Option<f64>,
    window: &Window,
    cfg: &RunConfig,
    path: &str,
    rng: &mut StdRng,
    sink: &mut EventSink,
) -> Result<Vec<f64>, EngineError> {
    let ages = tree.branching_ages(node);
    let told = told.or(window.told_cap);
    let upper = told
        .or_else(|| ages.first().copied())
        .ok_or_else(|| EngineError::Internal(format!("no age window for {path}")))?;

    if upper < window.tyoung {
        sink.push(
            Severity::Warn,
            tags::MIN_AGE_VIOLATION,
            path,
            format!(
                "minimum age constraint {:.6} exceeds oldest feasible age {:.6}; emitting a constrained divergence",
                window.tyoung, upper
            ),
        );
        return Ok(vec![(upper - cfg.precision).max(0.0); m]);
    }

    let draw = sampler::draw_times(
        &ages,
        birth,
        death,
        m,
        told,
        window.tyoung,
        cfg.precision,
        rng,
    )?;
    if draw.collapsed {
        sink.push(
            Severity::Warn,
            tags::SHORT_BRANCHES,
            path,
            format!("degenerate age window at {upper:.6}; expect near-zero branches"),
        );
    }
    Ok(draw.times)
}

/// Run the full TACT pipeline.
///
/// Validation failures surface as `EngineError::Phylo` (CLI exit 1);
/// invariant violations after mutation surface as `Internal`/
/// `MonophylyBroken` (exit 2).
pub fn run(
    taxonomy_input: &Tree,
    mut backbone: Tree,
    cfg: &RunConfig,
    cancel: &AtomicBool,
) -> Result<RunOutcome, EngineError> {
    let mut sink = EventSink::new();

    // ------------------------------------------------------------------
    // Validation tier: everything here fails before any placement.
    // ------------------------------------------------------------------
    let mut taxonomy = taxonomy_input.clone();
    if taxonomy.label(taxonomy.root()).is_none() {
        taxonomy.set_label(
            taxonomy.root(),
            Some(taxonomy::TAXONOMY_ROOT_LABEL.to_owned()),
        );
    }
    taxonomy::check_unique_labels(&taxonomy)?;
    for line in taxonomy::depth_warnings(&taxonomy) {
        warn!("{line}");
    }

    if !cfg.outgroups.is_empty() {
        let names: HashSet<String> = cfg.outgroups.iter().cloned().collect();
        let pruned = backbone.prune_leaves(&names);
        debug!("pruned {pruned} outgroup leaves");
    }

    let repaired = backbone.compute_ages(cfg.precision)?;
    if repaired {
        sink.push(
            Severity::Warn,
            tags::ULTRAMETRIC_REPAIRED,
            "",
            "sub-tolerance ultrametricity error folded into pendant edges".to_owned(),
        );
    }
    if !backbone.is_binary() {
        let at = backbone
            .first_polytomy()
            .and_then(|n| backbone.label(n).map(str::to_owned))
            .unwrap_or_else(|| "<unlabelled>".to_owned());
        return Err(PhyloError::NotBinary(at).into());
    }

    let taxonomy_tips = taxonomy.leaf_labels();
    let mut tree_tips = backbone.leaf_labels();
    let unknown: Vec<String> = tree_tips.difference(&taxonomy_tips).cloned().collect();
    if !unknown.is_empty() {
        return Err(PhyloError::UnknownLeaves(unknown).into());
    }

    let infos = collect_taxa(&taxonomy);
    let root_label = taxonomy.label(taxonomy.root()).map(str::to_owned);
    let info_index: HashMap<String, usize> = infos
        .iter()
        .enumerate()
        .map(|(i, t)| (t.label.clone(), i))
        .collect();

    let cache = MrcaCache::build(&backbone);

    // Taxa monophyletic in the input backbone must stay monophyletic.
    let mono_at_start: Vec<String> = infos
        .iter()
        .filter(|t| {
            let sampled: BTreeSet<String> =
                t.species.intersection(&tree_tips).cloned().collect();
            sampled.len() >= 2 && cache.monophyletic_mrca(&backbone, &sampled).is_some()
        })
        .map(|t| t.label.clone())
        .collect();
    let initial_node_count = backbone.len();
    let initial_ages: Vec<f64> = (0..initial_node_count as u32)
        .map(|i| backbone.age(NodeId::new(i)))
        .collect();

    // ------------------------------------------------------------------
    // Phase 1: parallel rate fits.
    // ------------------------------------------------------------------
    let attempts: Vec<Option<FitAttempt>> = infos
        .par_iter()
        .map(|info| {
            let is_root = root_label.as_deref() == Some(info.label.as_str());
            phase1_fit(&backbone, &cache, info, cfg, is_root)
        })
        .collect();

    let mut table = RateTable {
        fits: HashMap::new(),
        ccp: HashMap::new(),
        rows: Vec::new(),
        emitted: HashSet::new(),
    };
    for attempt in attempts.into_iter().flatten() {
        table.ccp.insert(attempt.taxon.clone(), attempt.ccp);
        if let Some((sev, tag, path, msg)) = attempt.event {
            sink.push(sev, tag, &path, msg);
        }
        if let Some((birth, death)) = attempt.fit {
            table.fits.insert(attempt.taxon.clone(), (birth, death));
            let taxon = attempt.taxon.clone();
            table.record(&taxon, birth, death, attempt.ccp, &taxon);
        }
    }

    // ------------------------------------------------------------------
    // Phase 2: sequential placement.
    // ------------------------------------------------------------------
    let mut full_clades: BTreeSet<String> = BTreeSet::new();
    let mut added = 0usize;

    for idx in 0..infos.len() {
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }
        let info = &infos[idx];
        let mut rng = StdRng::seed_from_u64(subseed(cfg.seed, &info.path));
        let species = &info.species;
        let mut extant: BTreeSet<String> =
            species.intersection(&tree_tips).cloned().collect();
        debug!(taxon = %info.path, sampled = extant.len(), total = species.len(), "processing taxon");

        if extant.is_empty() {
            full_clades.insert(info.label.clone());
            continue;
        }
        if extant == *species {
            // Fully sampled: protect it from later intrusions.
            if let Some(m) = cache.monophyletic_mrca(&backbone, species) {
                backbone.lock_clade(m, false);
            }
            continue;
        }

        let Some(mut node) = cache.monophyletic_mrca(&backbone, &extant) else {
            sink.push(
                Severity::Warn,
                tags::NOT_MONOPHYLETIC,
                &info.path,
                "sampled members are not monophyletic; its missing species will be placed by an ancestor taxon"
                    .to_owned(),
            );
            continue;
        };

        let Some((birth, death, source)) = table.resolve(&info.fallback_chain) else {
            return Err(EngineError::RateFitFailed(format!(
                "no admitted rate fit on the ancestor chain of {}",
                info.path
            )));
        };
        let ccp_now = crown_capture_probability(species.len(), extant.len());
        let phase1_ccp = table.ccp.get(&info.label).copied().unwrap_or(ccp_now);
        table.record(&info.label, birth, death, phase1_ccp, &source);

        // --- Nested fully-unsampled taxa, deepest ranks first.
        let mut pending: Vec<(String, usize)> = full_clades
            .intersection(&info.nested)
            .map(|l| (l.clone(), infos[info_index[l]].level))
            .collect();
        pending.shuffle(&mut rng);
        pending.sort_by(|a, b| b.1.cmp(&a.1));

        for (clade, _) in pending {
            let cinfo = &infos[info_index[&clade]];
            // A deeper pending clade processed just before this one may
            // already have supplied part of the species set; only the
            // still-missing members form the new clade.
            let cspecies: Vec<String> =
                cinfo.species.difference(&tree_tips).cloned().collect();
            if cspecies.is_empty() {
                debug!(taxon = %info.path, clade = %clade, "all species already present; skipping clade");
                full_clades.remove(&clade);
                continue;
            }
            let window = admissible_window(&backbone, node, cfg.precision, &info.path, &mut sink);
            let m = cspecies.len();
            let told_main = if backbone.is_leaf(node) {
                backbone.parent(node).map(|p| backbone.age(p))
            } else {
                None
            };
            let mut times = draw_for(
                &backbone, node, birth, death, m, told_main, &window, cfg, &info.path, &mut rng,
                &mut sink,
            )?;

            let fully_locked = backbone.is_fully_locked(node);
            if fully_locked {
                sink.push(
                    Severity::Info,
                    tags::FULLY_LOCKED,
                    &info.path,
                    format!("every edge under the clade is closed; attaching {clade} to the stem"),
                );
                // Replace the oldest time with a draw on the stem lineage.
                let stem_window = Window {
                    tyoung: backbone.age(node),
                    told_cap: None,
                };
                let stem_age = backbone
                    .parent(node)
                    .map(|p| backbone.age(p))
                    .unwrap_or_else(|| backbone.age(node));
                let stem_times = draw_for(
                    &backbone,
                    node,
                    birth,
                    death,
                    1,
                    Some(stem_age),
                    &stem_window,
                    cfg,
                    &info.path,
                    &mut rng,
                    &mut sink,
                )?;
                times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                times.pop();
                times.extend(stem_times);
            }

            info!(taxon = %info.path, clade = %clade, n = m, "creating clade");
            let stem_node = placement::create_clade(&mut backbone, &cspecies, &times, &mut rng)?;
            node = placement::graft_clade_at(
                &mut backbone,
                &cache,
                node,
                stem_node,
                fully_locked,
                &mut rng,
            )?;
            added += cspecies.len();
            tree_tips.extend(cspecies);
            extant = species.intersection(&tree_tips).cloned().collect();
            full_clades.remove(&clade);
            if !backbone.is_binary() {
                return Err(EngineError::Internal(format!(
                    "tree lost binarity after grafting clade {clade}"
                )));
            }
        }

        // --- Taxon spray: the remaining missing species of this taxon.
        if extant == *species {
            if let Some(m) = cache.monophyletic_mrca(&backbone, species) {
                backbone.lock_clade(m, false);
            }
            continue;
        }

        let node = cache
            .monophyletic_mrca(&backbone, &extant)
            .ok_or_else(|| EngineError::MonophylyBroken(info.path.clone()))?;
        let mut missing: Vec<String> = species.difference(&tree_tips).cloned().collect();
        missing.shuffle(&mut rng);

        let mut window = admissible_window(&backbone, node, cfg.precision, &info.path, &mut sink);
        let fully_locked = backbone.is_fully_locked(node) && !backbone.is_leaf(node);
        if fully_locked {
            sink.push(
                Severity::Info,
                tags::FULLY_LOCKED,
                &info.path,
                "every edge under the clade is closed; attaching new species to the stem"
                    .to_owned(),
            );
            window.tyoung = backbone.age(node);
        }
        let told = if backbone.is_leaf(node) || fully_locked {
            // Singletons have no crown, and a fully locked clade only
            // accepts grafts on its stem lineage.
            backbone.parent(node).map(|p| backbone.age(p))
        } else {
            None
        };
        let times = draw_for(
            &backbone,
            node,
            birth,
            death,
            missing.len(),
            told,
            &window,
            cfg,
            &info.path,
            &mut rng,
            &mut sink,
        )?;

        info!(taxon = %info.path, n = missing.len(), "adding species");
        let stem_allowed = ccp_now < cfg.min_ccp || fully_locked;
        let (_crown, short) = placement::fill_new_taxa(
            &mut backbone,
            &cache,
            node,
            &missing,
            &times,
            stem_allowed,
            &mut rng,
        )?;
        if short > 0 {
            sink.push(
                Severity::Warn,
                tags::SHORT_BRANCHES,
                &info.path,
                format!("{short} short branches detected"),
            );
        }
        added += missing.len();
        tree_tips.extend(missing);

        let node = cache
            .monophyletic_mrca(&backbone, species)
            .ok_or_else(|| EngineError::MonophylyBroken(info.path.clone()))?;
        backbone.lock_clade(node, false);
        if !backbone.is_binary() {
            return Err(EngineError::Internal(format!(
                "tree lost binarity while adding species to {}",
                info.path
            )));
        }
    }

    // ------------------------------------------------------------------
    // Invariant checks: I1-I5 must hold on the finished tree.
    // ------------------------------------------------------------------
    let out_tips = backbone.leaf_labels();
    if out_tips != taxonomy_tips {
        let missing: Vec<String> = taxonomy_tips.difference(&out_tips).cloned().collect();
        return Err(EngineError::Internal(format!(
            "output tip set disagrees with the taxonomy ({} missing, {} unexpected)",
            missing.len(),
            out_tips.difference(&taxonomy_tips).count()
        )));
    }
    let (ultra, (min_l, min_d), (max_l, max_d)) = backbone.ultrametricity(cfg.precision * 10.0);
    if !ultra {
        return Err(EngineError::Internal(format!(
            "output tree is not ultrametric: {min_l} at {min_d}, {max_l} at {max_d}"
        )));
    }
    if !backbone.is_binary() {
        return Err(EngineError::Internal("output tree is not binary".to_owned()));
    }
    for i in 0..initial_node_count {
        let before = initial_ages[i];
        let now = backbone.age(NodeId::new(i as u32));
        if (now - before).abs() > cfg.precision * 10.0 {
            return Err(EngineError::Internal(format!(
                "age of pre-existing node #{i} drifted from {before} to {now}"
            )));
        }
    }
    for taxon in &mono_at_start {
        let info = &infos[info_index[taxon]];
        if cache.monophyletic_mrca(&backbone, &info.species).is_none() {
            return Err(EngineError::MonophylyBroken(taxon.clone()));
        }
    }

    backbone.ladderize();
    table.rows.sort_by(|a, b| a.taxon.cmp(&b.taxon));
    Ok(RunOutcome {
        tree: backbone,
        rates: table.rows,
        events: sink.events,
        added,
    })
}
