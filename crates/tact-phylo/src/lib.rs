//! tact-phylo: tree storage and taxonomic bookkeeping for TACT.
//!
//! This crate carries the data-structure layer of the TACT pipeline:
//!
//! - `tree`: arena-backed rooted trees with branch lengths and precomputed
//!   node ages, including the structural mutations the placement engine
//!   performs (edge bisection, leaf grafts, subtree attachment).
//! - `newick` / `nexus`: tree serialization. Newick is parsed with `nom`;
//!   NEXUS is written directly and read by extracting the tree statement.
//! - `taxonomy`: CSV-to-taxonomy-tree construction and validation.
//! - `fastmrca`: bitmap-indexed MRCA and monophyly queries over a fixed tip
//!   set, safe for concurrent readers.
//! - `interval`: closed-interval unions on the age axis with atomic-hull
//!   reduction, used to decide whether taxonomic age constraints admit a
//!   single divergence time.

pub mod fastmrca;
pub mod interval;
pub mod newick;
pub mod nexus;
pub mod taxonomy;
pub mod tree;

use thiserror::Error;

pub use fastmrca::MrcaCache;
pub use interval::IntervalUnion;
pub use tree::{Node, NodeId, Tree};

/// Default relative tolerance for ultrametricity checks.
pub const DEFAULT_PRECISION: f64 = 1e-6;

/// Edges at or below this length are reported as suspiciously short.
pub const SHORT_BRANCH_CUTOFF: f64 = 1e-3;

/// Errors raised by the tree layer. The validation-tier variants
/// (`NonUltrametric`, `NotBinary`, `NameConflict`, `EmptyRank`,
/// `UnknownLeaves`) are fatal before any placement begins.
#[derive(Debug, Clone, Error)]
pub enum PhyloError {
    #[error("tree is not ultrametric: {min_label} has a root distance of {min_dist}, but {max_label} has {max_dist}")]
    NonUltrametric {
        min_label: String,
        min_dist: f64,
        max_label: String,
        max_dist: f64,
    },

    #[error("tree is not binary at node {0}")]
    NotBinary(String),

    #[error("duplicate label: {0}")]
    NameConflict(String),

    #[error("empty cell in taxonomy row {row}")]
    EmptyRank { row: usize },

    #[error("backbone contains leaves not present in the taxonomy: {0:?}")]
    UnknownLeaves(Vec<String>),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("negative branch length at node {0}")]
    NegativeBranch(String),

    #[error("age {age} lies outside the edge span [{lo}, {hi}]")]
    AgeOutsideEdge { age: f64, lo: f64, hi: f64 },

    #[error("constraints imply a disjoint age interval (gap [{gap_lo}, {gap_hi}])")]
    DisjointConstraints { gap_lo: f64, gap_hi: f64 },

    #[error("no node labelled {0:?}")]
    MissingNode(String),
}
