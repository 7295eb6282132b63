//! Minimal NEXUS support: enough to emit a standard TAXA + TREES file and
//! to pull the first tree statement back out of one.

use std::fmt::Write as _;

use crate::newick;
use crate::tree::Tree;
use crate::PhyloError;

fn quote(label: &str) -> String {
    if label.is_empty() || label.chars().any(|c| c.is_whitespace() || "(),:;[]'".contains(c)) {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_owned()
    }
}

/// Serialize a tree as a NEXUS document with TAXA and TREES blocks.
pub fn write(tree: &Tree) -> String {
    let taxa = tree.leaf_labels();
    let mut out = String::new();
    out.push_str("#NEXUS\n\n");
    out.push_str("BEGIN TAXA;\n");
    let _ = writeln!(out, "    DIMENSIONS NTAX={};", taxa.len());
    out.push_str("    TAXLABELS\n");
    for t in &taxa {
        let _ = writeln!(out, "        {}", quote(t));
    }
    out.push_str("    ;\nEND;\n\n");
    out.push_str("BEGIN TREES;\n");
    let _ = writeln!(out, "    TREE tact = {}", newick::write(tree));
    out.push_str("END;\n");
    out
}

/// Extract and parse the first tree statement from a NEXUS document.
pub fn parse(input: &str) -> Result<Tree, PhyloError> {
    let lower = input.to_ascii_lowercase();
    let trees_at = lower
        .find("begin trees")
        .ok_or_else(|| PhyloError::Parse("no TREES block in NEXUS input".to_owned()))?;
    let block = &input[trees_at..];
    let block_lower = &lower[trees_at..];

    // Find a statement of the form `tree <name> = <newick>;`.
    let mut search_from = 0usize;
    loop {
        let rel = block_lower[search_from..]
            .find("tree")
            .ok_or_else(|| PhyloError::Parse("no tree statement in TREES block".to_owned()))?;
        let at = search_from + rel;
        // Must be a word of its own ("trees" in the block header is not).
        let before_ok = at == 0
            || block_lower[..at]
                .chars()
                .last()
                .is_some_and(|c| c.is_whitespace() || c == ';');
        let after = block_lower[at + 4..].chars().next();
        let after_ok = after.is_some_and(|c| c.is_whitespace());
        if before_ok && after_ok {
            let eq = block[at..]
                .find('=')
                .ok_or_else(|| PhyloError::Parse("tree statement without '='".to_owned()))?;
            let stmt = &block[at + eq + 1..];
            let end = stmt
                .find(';')
                .ok_or_else(|| PhyloError::Parse("unterminated tree statement".to_owned()))?;
            let newick_src = format!("{};", &stmt[..end]);
            return newick::parse(&newick_src);
        }
        search_from = at + 4;
    }
}

/// Parse tree input in either format, deciding by the `#NEXUS` magic.
pub fn parse_auto(input: &str) -> Result<Tree, PhyloError> {
    if input.trim_start().starts_with("#NEXUS") || input.trim_start().starts_with("#nexus") {
        parse(input)
    } else {
        newick::parse(input)
    }
}
