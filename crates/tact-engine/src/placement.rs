//! Graft mechanics on the evolving backbone.
//!
//! Everything here operates under the edge-locking discipline: completed
//! monophyletic clades have their internal edges locked, so an eligible
//! attachment edge is one that straddles the target age, is not locked,
//! and lies inside the recipient clade (plus, optionally, its stem).
//! Which eligible edge receives a graft is uniform-random; which missing
//! species lands at which time is a seeded shuffle upstream. Nothing in
//! this module imposes an ordering beyond the caller's RNG.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use tact_phylo::{IntervalUnion, MrcaCache, NodeId, PhyloError, Tree};

use crate::EngineError;

/// Head nodes of the edges on which a divergence at `age` may be
/// inserted: unlocked, straddling `age`, inside the clade under `crown`
/// (and its stem edge when `stem` is set).
pub fn eligible_edges(tree: &Tree, crown: NodeId, age: f64, stem: bool) -> Vec<NodeId> {
    let mut edges = tree.edges_under(crown);
    if stem && tree.parent(crown).is_some() {
        edges.push(crown);
    }
    edges.retain(|&e| {
        let p = tree.parent(e).expect("edge head always has a parent");
        !tree.is_locked(e) && tree.age(e) <= age && tree.age(p) >= age
    });
    edges
}

/// Union of the age spans of all unlocked edges under `node`: every age
/// at which a graft inside the clade could land.
pub fn age_intervals(tree: &Tree, node: NodeId) -> IntervalUnion {
    let mut u = IntervalUnion::new();
    for e in tree.edges_under(node) {
        if !tree.is_locked(e) {
            let p = tree.parent(e).expect("edge head always has a parent");
            u.insert(tree.age(e), tree.age(p));
        }
    }
    u
}

/// Minimum age a graft into `node` can take. Empty interval (a bare
/// leaf) yields 0.0. Fails with `DisjointConstraints` when the unlocked
/// edges do not form a single contiguous age band.
pub fn min_age(tree: &Tree, node: NodeId, precision: f64) -> Result<f64, PhyloError> {
    let u = age_intervals(tree, node);
    if u.is_empty() {
        return Ok(0.0);
    }
    let (lo, _hi) = u.atomic_hull(precision)?;
    Ok(lo)
}

/// Insert a divergence at `age` on a uniformly chosen eligible edge and
/// hang a new leaf off it. Returns the (possibly new) crown of the
/// recipient clade: a graft on the stem edge becomes the new crown.
pub fn graft_leaf_at(
    tree: &mut Tree,
    cache: &MrcaCache,
    crown: NodeId,
    name: &str,
    age: f64,
    stem: bool,
    rng: &mut StdRng,
) -> Result<NodeId, EngineError> {
    let edges = eligible_edges(tree, crown, age, stem);
    let focal = *edges.choose(rng).ok_or_else(|| {
        EngineError::Internal(format!(
            "could not place {name} at age {age} in clade {}",
            describe(tree, crown)
        ))
    })?;
    let div = tree.insert_on_edge(focal, age)?;
    cache.note_insert(tree, div, focal);
    let leaf = tree.add_leaf(div, name);
    cache.note_leaf(tree, leaf);
    Ok(if tree.parent(crown) == Some(div) {
        div
    } else {
        crown
    })
}

/// Graft a pre-built clade (its stem node, carrying the new divergence
/// age) onto a uniformly chosen eligible edge of the recipient. The
/// chosen edge's head becomes sister to the new clade's crown.
pub fn graft_clade_at(
    tree: &mut Tree,
    cache: &MrcaCache,
    recipient: NodeId,
    stem_node: NodeId,
    stem: bool,
    rng: &mut StdRng,
) -> Result<NodeId, EngineError> {
    let age = tree.age(stem_node);
    let edges = eligible_edges(tree, recipient, age, stem);
    let focal = *edges.choose(rng).ok_or_else(|| {
        EngineError::Internal(format!(
            "could not place a new clade at age {age} in {}",
            describe(tree, recipient)
        ))
    })?;
    let parent = tree
        .parent(focal)
        .ok_or_else(|| EngineError::Internal("cannot graft above the root".to_owned()))?;
    tree.detach(focal);
    tree.attach_child(parent, stem_node)?;
    tree.attach_child(stem_node, focal)?;
    cache.rebuild(tree);
    Ok(if tree.parent(recipient) == Some(stem_node) {
        stem_node
    } else {
        recipient
    })
}

/// Pair missing species with drawn times (both already in their final
/// order: species shuffled by the caller, times oldest first) and graft
/// one leaf per time. Returns the updated crown and the count of
/// suspiciously short edges afterwards.
pub fn fill_new_taxa(
    tree: &mut Tree,
    cache: &MrcaCache,
    crown: NodeId,
    new_taxa: &[String],
    times: &[f64],
    stem: bool,
    rng: &mut StdRng,
) -> Result<(NodeId, usize), EngineError> {
    debug_assert_eq!(new_taxa.len(), times.len());
    let mut crown = crown;
    for (name, &t) in new_taxa.iter().zip(times) {
        crown = graft_leaf_at(tree, cache, crown, name, t, stem, rng)?;
    }
    let short = tree
        .short_edges(crown, tact_phylo::SHORT_BRANCH_CUTOFF)
        .len();
    Ok((crown, short))
}

/// Build a fully resolved clade for a set of wholly unsampled species,
/// detached inside the arena. `ages` supplies the stem age first, then
/// the crown and internal divergences. The topology is drawn uniformly:
/// each successive divergence attaches to a random open slot old enough
/// to hold it, and the shuffled species fill the remaining slots. All
/// edges of the new clade (crown edge included) come back locked.
pub fn create_clade(
    tree: &mut Tree,
    species: &[String],
    ages: &[f64],
    rng: &mut StdRng,
) -> Result<NodeId, EngineError> {
    if species.is_empty() {
        return Err(EngineError::Internal(
            "create_clade called with no species".to_owned(),
        ));
    }
    if ages.len() != species.len() {
        return Err(EngineError::Internal(format!(
            "create_clade needs one age per species (got {} ages for {} species)",
            ages.len(),
            species.len()
        )));
    }
    let mut ages: Vec<f64> = ages.to_vec();
    ages.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let mut ages = ages.into_iter();

    let stem = tree.new_detached(None, ages.next().expect("species is non-empty"));

    let mut species: Vec<String> = species.to_vec();
    species.shuffle(rng);

    if species.len() == 1 {
        let leaf = tree.new_detached(Some(species.pop().expect("one species")), 0.0);
        tree.attach_child(stem, leaf)?;
        tree.lock_clade(stem, false);
        return Ok(stem);
    }

    let crown_age = ages.next().expect("two or more species");
    let crown = tree.new_detached(None, crown_age);
    tree.attach_child(stem, crown)?;

    let mut internals = vec![crown];
    for age in ages {
        let open: Vec<NodeId> = internals
            .iter()
            .copied()
            .filter(|&n| tree.children(n).len() < 2 && age < tree.age(n))
            .collect();
        let &host = open.choose(rng).ok_or_else(|| {
            EngineError::Internal("no open slot for a new divergence; ages are degenerate".to_owned())
        })?;
        let child = tree.new_detached(None, age);
        tree.attach_child(host, child)?;
        internals.push(child);
    }

    for &node in &internals {
        while tree.children(node).len() < 2 {
            let Some(name) = species.pop() else { break };
            let leaf = tree.new_detached(Some(name), 0.0);
            tree.attach_child(node, leaf)?;
        }
    }
    if !species.is_empty() {
        return Err(EngineError::Internal(format!(
            "{} species left over after resolving a new clade",
            species.len()
        )));
    }
    if !tree.is_binary_under(crown) {
        return Err(EngineError::MonophylyBroken(
            "freshly created clade is not binary".to_owned(),
        ));
    }

    tree.lock_clade(stem, false);
    Ok(stem)
}

fn describe(tree: &Tree, node: NodeId) -> String {
    tree.label(node)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("node #{}", node.raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tact_phylo::newick;

    fn backbone() -> (Tree, MrcaCache) {
        let mut t = newick::parse("((a:1.0,b:1.0):1.0,(c:1.5,d:1.5):0.5);").unwrap();
        t.compute_ages(tact_phylo::DEFAULT_PRECISION).unwrap();
        let cache = MrcaCache::build(&t);
        (t, cache)
    }

    #[test]
    fn eligible_edges_respect_age_and_locks() {
        let (mut t, _cache) = backbone();
        let idx = t.leaf_index();
        let root = t.root();
        // At age 1.2 only the two internal edges straddle.
        let edges = eligible_edges(&t, root, 1.2, false);
        assert_eq!(edges.len(), 2);
        let ab = t.mrca(&[idx["a"], idx["b"]]).unwrap();
        t.lock_clade(ab, true);
        let edges = eligible_edges(&t, root, 1.2, false);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn age_intervals_union_over_unlocked_edges() {
        let (mut t, _cache) = backbone();
        let idx = t.leaf_index();
        let ab = t.mrca(&[idx["a"], idx["b"]]).unwrap();
        let full = age_intervals(&t, t.root());
        assert_eq!(full.parts(), &[(0.0, 2.0)]);
        // Lock everything except two disconnected pendant spans.
        t.lock_clade(t.root(), false);
        t.set_locked(idx["a"], false);
        let u = age_intervals(&t, t.root());
        assert_eq!(u.parts(), &[(0.0, t.age(ab))]);
    }

    #[test]
    fn min_age_detects_disjoint_constraints() {
        let mut t = newick::parse("(((a1:1,a2:1):3,(b1:3.5,b2:3.5):0.5):1,c:5);").unwrap();
        t.compute_ages(tact_phylo::DEFAULT_PRECISION).unwrap();
        let idx = t.leaf_index();
        // Unlock only the a-cherry pendant edges and the b-cherry's stem:
        // the spans [0,1] and [3.5,4] leave a gap in the middle.
        t.lock_clade(t.root(), false);
        for e in [idx["a1"], idx["a2"]] {
            t.set_locked(e, false);
        }
        let b = t.mrca(&[idx["b1"], idx["b2"]]).unwrap();
        t.set_locked(b, false);
        let res = min_age(&t, t.root(), 1e-6);
        assert!(res.is_err(), "expected disjoint constraints, got {res:?}");
    }

    #[test]
    fn graft_leaf_updates_crown_when_placed_on_stem() {
        let (mut t, cache) = backbone();
        let idx = t.leaf_index();
        let ab = t.mrca(&[idx["a"], idx["b"]]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        // Stem edge spans [1.0, 2.0]; an age of 1.5 with stem=true and the
        // internal edges excluded by age must land on the stem.
        let new_crown = graft_leaf_at(&mut t, &cache, ab, "x", 1.5, true, &mut rng).unwrap();
        assert_ne!(new_crown, ab);
        assert_eq!(t.parent(ab), Some(new_crown));
        let (ok, _, _) = t.ultrametricity(tact_phylo::DEFAULT_PRECISION);
        assert!(ok);
        assert!(t.is_binary());
    }

    #[test]
    fn fill_respects_locked_sibling() {
        let (mut t, cache) = backbone();
        let idx = t.leaf_index();
        let ab = t.mrca(&[idx["a"], idx["b"]]).unwrap();
        t.lock_clade(ab, true);
        let mut rng = StdRng::seed_from_u64(2);
        let names = vec!["x".to_owned(), "y".to_owned()];
        let times = [0.9, 0.4];
        let root = t.root();
        fill_new_taxa(&mut t, &cache, root, &names, &times, false, &mut rng).unwrap();
        // a+b still monophyletic: nothing intruded into the locked clade.
        let labels: std::collections::BTreeSet<String> =
            ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert!(cache.is_monophyletic(&t, &labels));
        assert!(t.is_binary());
    }

    #[test]
    fn create_clade_is_binary_locked_and_complete() {
        let mut t = Tree::with_root(None);
        let species: Vec<String> = (1..=5).map(|i| format!("sp{i}")).collect();
        let ages = [4.0, 3.0, 2.2, 1.5, 0.7];
        let mut rng = StdRng::seed_from_u64(3);
        let stem = create_clade(&mut t, &species, &ages, &mut rng).unwrap();
        assert_eq!(t.age(stem), 4.0);
        assert_eq!(t.children(stem).len(), 1);
        let crown = t.children(stem)[0];
        assert!(t.is_binary_under(crown));
        assert_eq!(t.leaf_labels_under(stem).len(), 5);
        assert!(t.is_fully_locked(stem));
        assert!(!t.is_locked(stem));
    }

    #[test]
    fn create_clade_singleton_hangs_one_leaf() {
        let mut t = Tree::with_root(None);
        let mut rng = StdRng::seed_from_u64(4);
        let stem = create_clade(&mut t, &["only".to_owned()], &[2.5], &mut rng).unwrap();
        assert_eq!(t.leaf_labels_under(stem).len(), 1);
        assert_eq!(t.age(stem), 2.5);
    }

    #[test]
    fn graft_clade_preserves_recipient_ages() {
        let (mut t, cache) = backbone();
        let idx = t.leaf_index();
        let ab = t.mrca(&[idx["a"], idx["b"]]).unwrap();
        let ages_before: Vec<f64> = (0..t.len() as u32).map(|i| t.age(NodeId::new(i))).collect();

        let species: Vec<String> = vec!["n1".to_owned(), "n2".to_owned()];
        let mut rng = StdRng::seed_from_u64(5);
        // Stem at 1.5 lands on ab's stem edge (span [1.0, 2.0]).
        let stem = create_clade(&mut t, &species, &[1.5, 0.8], &mut rng).unwrap();
        graft_clade_at(&mut t, &cache, ab, stem, true, &mut rng).unwrap();

        for (i, &before) in ages_before.iter().enumerate() {
            assert!((t.age(NodeId::new(i as u32)) - before).abs() < 1e-12);
        }
        let (ok, _, _) = t.ultrametricity(tact_phylo::DEFAULT_PRECISION);
        assert!(ok);
        assert!(t.is_binary());
        assert_eq!(t.leaf_labels().len(), 6);
    }
}
