//! Cross-checks of the bitmap MRCA cache against the plain tree walk,
//! exhaustively over label subsets of fixed trees.

use std::collections::BTreeSet;

use tact_phylo::{newick, MrcaCache, Tree};

fn prepared(src: &str) -> (Tree, MrcaCache) {
    let mut t = newick::parse(src).unwrap();
    t.compute_ages(tact_phylo::DEFAULT_PRECISION).unwrap();
    let cache = MrcaCache::build(&t);
    (t, cache)
}

fn subsets(labels: &[String]) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    for bits in 1u32..(1 << labels.len()) {
        out.push(
            labels
                .iter()
                .enumerate()
                .filter(|(i, _)| bits & (1 << i) != 0)
                .map(|(_, l)| l.clone())
                .collect(),
        );
    }
    out
}

const TREES: &[&str] = &[
    "((a:1,b:1):1,(c:1.5,d:1.5):0.5);",
    "(((a:1,b:1):1,c:2):1,(d:1.5,e:1.5):1.5);",
    "((((a:1,b:1):1,(c:0.5,d:0.5):1.5):1,e:3):1,f:4);",
    "((a:2.0,(b:1.0,c:1.0):1.0):2.0);",
];

#[test]
fn cache_mrca_matches_tree_mrca_for_every_subset() {
    for src in TREES {
        let (t, cache) = prepared(src);
        let idx = t.leaf_index();
        let labels: Vec<String> = t.leaf_labels().into_iter().collect();
        for subset in subsets(&labels) {
            let mask = cache.bitmask(subset.iter().map(String::as_str));
            let ids: Vec<_> = subset.iter().map(|l| idx[l]).collect();
            assert_eq!(
                cache.mrca(&t, &mask),
                t.mrca(&ids),
                "subset {subset:?} of {src}"
            );
        }
    }
}

#[test]
fn monophyly_agrees_with_leaf_set_equality() {
    for src in TREES {
        let (t, cache) = prepared(src);
        let idx = t.leaf_index();
        let labels: Vec<String> = t.leaf_labels().into_iter().collect();
        for subset in subsets(&labels) {
            let set: BTreeSet<String> = subset.iter().cloned().collect();
            let ids: Vec<_> = subset.iter().map(|l| idx[l]).collect();
            let mrca = t.mrca(&ids).unwrap();
            let expected = t.leaf_labels_under(mrca) == set;
            assert_eq!(
                cache.is_monophyletic(&t, &set),
                expected,
                "subset {subset:?} of {src}"
            );
        }
    }
}

#[test]
fn incremental_extension_matches_a_fresh_rebuild() {
    let (mut t, cache) = prepared(TREES[1]);
    let idx = t.leaf_index();
    let ab = t.mrca(&[idx["a"], idx["b"]]).unwrap();

    let div = t.insert_on_edge(ab, 1.5).unwrap();
    cache.note_insert(&t, div, ab);
    let leaf = t.add_leaf(div, "zz");
    cache.note_leaf(&t, leaf);

    let fresh = MrcaCache::build(&t);
    let labels: Vec<String> = t.leaf_labels().into_iter().collect();
    for subset in subsets(&labels) {
        let set: BTreeSet<String> = subset.iter().cloned().collect();
        assert_eq!(
            cache.is_monophyletic(&t, &set),
            fresh.is_monophyletic(&t, &set),
            "subset {subset:?} after incremental update"
        );
    }
}
