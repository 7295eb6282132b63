//! Bitmap-indexed MRCA and monophyly queries.
//!
//! Every backbone leaf gets a stable bit index; every node carries the
//! bitmap of descendant leaf bits. An MRCA query walks rootward from one
//! member leaf until the node bitmap covers the query bitmap, which makes
//! the lookup proportional to tree depth rather than tree size.
//!
//! Rate estimation (Phase 1) issues these queries from many threads at
//! once, so the cache sits behind a `RwLock`: readers share, the placement
//! engine (Phase 2) writes. Leaf grafts extend the index incrementally;
//! structural grafts of whole subtrees trigger a rebuild that keeps the
//! existing bit assignment.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::tree::{NodeId, Tree};

#[derive(Debug, Default)]
struct Inner {
    bit_of_leaf: HashMap<String, u32>,
    leaf_of_bit: Vec<NodeId>,
    /// Descendant-leaf bitmap per node, indexed by `NodeId::raw`.
    node_bits: Vec<RoaringBitmap>,
}

impl Inner {
    fn ensure_len(&mut self, len: usize) {
        if self.node_bits.len() < len {
            self.node_bits.resize_with(len, RoaringBitmap::new);
        }
    }

    fn rebuild(&mut self, tree: &Tree) {
        self.node_bits.clear();
        self.node_bits.resize_with(tree.len(), RoaringBitmap::new);
        self.leaf_of_bit
            .resize(self.bit_of_leaf.len(), tree.root());
        for id in tree.postorder(tree.root()) {
            if tree.is_leaf(id) {
                let Some(label) = tree.label(id) else { continue };
                let next = self.bit_of_leaf.len() as u32;
                let bit = *self
                    .bit_of_leaf
                    .entry(label.to_owned())
                    .or_insert(next);
                if bit as usize >= self.leaf_of_bit.len() {
                    self.leaf_of_bit.resize(bit as usize + 1, id);
                }
                self.leaf_of_bit[bit as usize] = id;
                self.node_bits[id.idx()].insert(bit);
            } else {
                let mut bits = RoaringBitmap::new();
                for &c in tree.children(id) {
                    bits |= &self.node_bits[c.idx()];
                }
                self.node_bits[id.idx()] = bits;
            }
        }
    }
}

/// Thread-safe MRCA cache over one backbone tree.
#[derive(Debug, Default)]
pub struct MrcaCache {
    inner: RwLock<Inner>,
}

impl MrcaCache {
    pub fn build(tree: &Tree) -> Self {
        let cache = Self::default();
        cache.rebuild(tree);
        cache
    }

    /// Recompute all node bitmaps, keeping the existing leaf-bit
    /// assignment and extending it for leaves seen for the first time.
    pub fn rebuild(&self, tree: &Tree) {
        let mut inner = self.inner.write();
        inner.rebuild(tree);
        tracing::trace!(leaves = inner.bit_of_leaf.len(), nodes = tree.len(), "rebuilt mrca cache");
    }

    /// Bitmap for the subset of `labels` present in the backbone.
    pub fn bitmask<'a, I>(&self, labels: I) -> RoaringBitmap
    where
        I: IntoIterator<Item = &'a str>,
    {
        let inner = self.inner.read();
        let mut out = RoaringBitmap::new();
        for l in labels {
            if let Some(&bit) = inner.bit_of_leaf.get(l) {
                out.insert(bit);
            }
        }
        out
    }

    /// MRCA of the leaves in `mask`: the shallowest ancestor of any member
    /// whose descendant bitmap covers the whole mask.
    pub fn mrca(&self, tree: &Tree, mask: &RoaringBitmap) -> Option<NodeId> {
        let inner = self.inner.read();
        let first = mask.min()?;
        let mut cur = *inner.leaf_of_bit.get(first as usize)?;
        loop {
            if mask.is_subset(&inner.node_bits[cur.idx()]) {
                return Some(cur);
            }
            cur = tree.parent(cur)?;
        }
    }

    /// The original `fastmrca.get`: MRCA of the sampled members of
    /// `labels`, but only when that MRCA subtends *no other* leaves, i.e.
    /// the sampled set is monophyletic in the backbone.
    pub fn monophyletic_mrca(&self, tree: &Tree, labels: &BTreeSet<String>) -> Option<NodeId> {
        let mask = self.bitmask(labels.iter().map(String::as_str));
        if mask.is_empty() {
            return None;
        }
        let node = self.mrca(tree, &mask)?;
        let inner = self.inner.read();
        if inner.node_bits[node.idx()].is_subset(&mask) {
            Some(node)
        } else {
            None
        }
    }

    pub fn is_monophyletic(&self, tree: &Tree, labels: &BTreeSet<String>) -> bool {
        self.monophyletic_mrca(tree, labels).is_some()
    }

    /// Record an internal node created by edge bisection: it subtends
    /// exactly what the child below it subtends.
    pub fn note_insert(&self, tree: &Tree, new_node: NodeId, child: NodeId) {
        let mut inner = self.inner.write();
        inner.ensure_len(tree.len());
        let bits = inner.node_bits[child.idx()].clone();
        inner.node_bits[new_node.idx()] = bits;
    }

    /// Record a freshly grafted leaf: allocate its bit and flip it on the
    /// whole ancestor chain.
    pub fn note_leaf(&self, tree: &Tree, leaf: NodeId) {
        let mut inner = self.inner.write();
        inner.ensure_len(tree.len());
        let Some(label) = tree.label(leaf) else { return };
        let bit = inner.bit_of_leaf.len() as u32;
        inner.bit_of_leaf.insert(label.to_owned(), bit);
        inner.leaf_of_bit.push(leaf);
        inner.node_bits[leaf.idx()].insert(bit);
        for anc in tree.ancestors(leaf) {
            inner.node_bits[anc.idx()].insert(bit);
        }
    }
}
