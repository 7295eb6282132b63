//! Taxonomy-tree construction and validation.
//!
//! The input is a CSV in which each row is one species and the columns
//! run from the most inclusive rank to the least inclusive, species name
//! last. The output is a rooted tree whose internal labels are the rank
//! names and whose leaves are species; branch lengths are meaningless and
//! left at zero.

use std::collections::HashMap;

use crate::tree::{NodeId, Tree};
use crate::PhyloError;

pub const TAXONOMY_ROOT_LABEL: &str = "__TAXONOMIC_ROOT__";

fn split_csv_line(line: &str) -> Vec<String> {
    line.split(',').map(|c| c.trim().to_owned()).collect()
}

/// Build a taxonomy tree from CSV text.
///
/// Fails on duplicate rank/species labels, empty cells, and ragged rows.
/// Returns the tree along with human-readable warnings (currently the
/// unequal-rank-depth diagnostic, which the caller is expected to log).
pub fn build_from_csv(text: &str) -> Result<(Tree, Vec<String>), PhyloError> {
    let mut rows_iter = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());
    let (_, header) = rows_iter
        .next()
        .ok_or_else(|| PhyloError::Parse("taxonomy CSV is empty".to_owned()))?;
    let columns = split_csv_line(header);
    {
        let mut seen = HashMap::new();
        for name in &columns {
            if seen.insert(name.clone(), ()).is_some() {
                return Err(PhyloError::NameConflict(name.clone()));
            }
        }
    }
    let width = columns.len();

    let mut tree = Tree::with_root(Some(TAXONOMY_ROOT_LABEL.to_owned()));
    // label -> (node, parent) for uniqueness and nesting checks
    let mut known: HashMap<String, (NodeId, NodeId)> = HashMap::new();

    for (lineno, line) in rows_iter {
        let row = split_csv_line(line);
        if row.len() != width {
            return Err(PhyloError::Parse(format!(
                "taxonomy row {} has {} columns, expected {}",
                lineno + 1,
                row.len(),
                width
            )));
        }
        let mut node = tree.root();
        for (col, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                return Err(PhyloError::EmptyRank { row: lineno + 1 });
            }
            let is_species = col == width - 1;
            match known.get(cell) {
                Some(&(existing, parent)) => {
                    // A rank may recur across rows, but only nested in the
                    // same place; a species may not recur at all.
                    if is_species || parent != node {
                        return Err(PhyloError::NameConflict(cell.clone()));
                    }
                    node = existing;
                }
                None => {
                    let child = tree.add_child(node, Some(cell.clone()), 0.0);
                    known.insert(cell.clone(), (child, node));
                    node = child;
                }
            }
        }
    }

    let warnings = depth_warnings(&tree);
    Ok((tree, warnings))
}

/// Number of labelled ancestors for each leaf.
pub fn node_depths(tree: &Tree) -> HashMap<String, usize> {
    let mut out = HashMap::new();
    for leaf in tree.leaves_under(tree.root()) {
        let depth = tree
            .ancestors(leaf)
            .filter(|&a| tree.label(a).is_some())
            .count();
        if let Some(l) = tree.label(leaf) {
            out.insert(l.to_owned(), depth);
        }
    }
    out
}

/// The original node-depth diagnostic: tips whose ancestor chains carry
/// unequal numbers of ranked clades invite rank intrusion later.
pub fn depth_warnings(tree: &Tree) -> Vec<String> {
    let depths = node_depths(tree);
    let mut by_depth: HashMap<usize, usize> = HashMap::new();
    for &d in depths.values() {
        *by_depth.entry(d).or_insert(0) += 1;
    }
    if by_depth.len() <= 1 {
        return Vec::new();
    }
    let mut out = vec![
        "the tips of the taxonomy do not have equal numbers of ranked clades in their ancestor chains:"
            .to_owned(),
    ];
    let mut keys: Vec<usize> = by_depth.keys().copied().collect();
    keys.sort_unstable();
    for k in keys {
        out.push(format!("* {} tips have {} ranked ancestors", by_depth[&k], k));
    }
    out
}

/// Check that every label in the tree is unique. Applied to taxonomy
/// trees loaded from Newick, where the CSV builder's guarantee is absent.
pub fn check_unique_labels(tree: &Tree) -> Result<(), PhyloError> {
    let mut seen = HashMap::new();
    for id in tree.preorder(tree.root()) {
        if let Some(l) = tree.label(id) {
            if seen.insert(l.to_owned(), ()).is_some() {
                return Err(PhyloError::NameConflict(l.to_owned()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
family,genus,species
Cichlidae,Cichla,Cichla temensis
Cichlidae,Cichla,Cichla ocellaris
Cichlidae,Crenicichla,Crenicichla lugubris
Percidae,Perca,Perca fluviatilis
";

    #[test]
    fn builds_nested_ranks() {
        let (tree, warnings) = build_from_csv(CSV).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(tree.leaf_labels().len(), 4);
        let cichla = tree.find_label("Cichla").unwrap();
        assert_eq!(tree.leaf_labels_under(cichla).len(), 2);
        let family = tree.find_label("Cichlidae").unwrap();
        assert_eq!(tree.leaf_labels_under(family).len(), 3);
        check_unique_labels(&tree).unwrap();
    }

    #[test]
    fn rejects_duplicate_rank_in_different_position() {
        let bad = "family,genus,species\nA,B,B sp1\nC,B,B sp2\n";
        assert!(matches!(
            build_from_csv(bad),
            Err(PhyloError::NameConflict(_))
        ));
    }

    #[test]
    fn rejects_duplicate_species() {
        let bad = "family,genus,species\nA,B,B sp1\nA,B,B sp1\n";
        assert!(matches!(
            build_from_csv(bad),
            Err(PhyloError::NameConflict(_))
        ));
    }

    #[test]
    fn rejects_empty_cells() {
        let bad = "family,genus,species\nA,,A sp1\n";
        assert!(matches!(
            build_from_csv(bad),
            Err(PhyloError::EmptyRank { row: 2 })
        ));
    }

    #[test]
    fn warns_on_unequal_depths() {
        let mut tree = Tree::with_root(Some(TAXONOMY_ROOT_LABEL.to_owned()));
        let root = tree.root();
        let fam = tree.add_child(root, Some("Fam".to_owned()), 0.0);
        let gen = tree.add_child(fam, Some("Gen".to_owned()), 0.0);
        tree.add_child(gen, Some("Gen deep".to_owned()), 0.0);
        tree.add_child(fam, Some("Fam shallow".to_owned()), 0.0);
        assert!(!depth_warnings(&tree).is_empty());
    }
}
