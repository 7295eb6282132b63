//! Arena-backed rooted trees with branch lengths and node ages.
//!
//! Nodes live in a flat `Vec` and are addressed by compact `NodeId`s
//! (4 bytes). Each node stores its branch length to the parent *and* its
//! age (distance to any descendant leaf); the two are kept consistent by
//! every mutation, so the age of a pre-existing node never drifts while
//! new divergences are inserted around it.
//!
//! The mutating operations are exactly those the placement engine needs:
//! `insert_on_edge` (bisect a parent→child edge at a given age),
//! `add_leaf` (graft a tip at age zero) and `attach_child` (hang an
//! already-built subtree below a node). Edges carry a `locked` flag used
//! to protect completed monophyletic clades from later grafts.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::PhyloError;

/// Slack used when comparing ages against edge spans. Mutations clamp
/// results inside this band rather than creating negative branch lengths.
const AGE_SLACK: f64 = 1e-9;

/// Compact node handle into a [`Tree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Branch length to the parent; 0.0 at a root.
    pub(crate) length: f64,
    /// Distance to any descendant leaf. Leaves sit at exactly 0.0.
    pub(crate) age: f64,
    pub(crate) label: Option<String>,
    /// The edge above this node is closed to grafts.
    pub(crate) locked: bool,
}

impl Node {
    fn new(label: Option<String>) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            length: 0.0,
            age: 0.0,
            label,
            locked: false,
        }
    }
}

/// A rooted tree. May represent either a phylogeny (ages meaningful) or a
/// taxonomy (ages all zero, only topology and labels meaningful).
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    /// Create a tree holding a single root node.
    pub fn with_root(label: Option<String>) -> Self {
        Self {
            nodes: vec![Node::new(label)],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.idx()]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.idx()]
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.node(id).label.as_deref()
    }

    pub fn age(&self, id: NodeId) -> f64 {
        self.node(id).age
    }

    pub fn length(&self, id: NodeId) -> f64 {
        self.node(id).length
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node(id).children.is_empty()
    }

    pub fn is_locked(&self, id: NodeId) -> bool {
        self.node(id).locked
    }

    pub fn set_locked(&mut self, id: NodeId, locked: bool) {
        self.node_mut(id).locked = locked;
    }

    pub fn set_label(&mut self, id: NodeId, label: Option<String>) {
        self.node_mut(id).label = label;
    }

    pub(crate) fn set_age(&mut self, id: NodeId, age: f64) {
        self.node_mut(id).age = age;
    }

    pub(crate) fn set_length(&mut self, id: NodeId, length: f64) {
        self.node_mut(id).length = length;
    }

    /// Raw builder used by parsers: append a child with an explicit branch
    /// length. Ages are reconciled afterwards by [`Tree::compute_ages`].
    pub fn add_child(&mut self, parent: NodeId, label: Option<String>, length: f64) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut node = Node::new(label);
        node.parent = Some(parent);
        node.length = length;
        self.nodes.push(node);
        self.nodes[parent.idx()].children.push(id);
        id
    }

    /// Create a detached node (no parent) with a preset age. Used when the
    /// engine builds a new clade inside the arena before splicing it in.
    pub fn new_detached(&mut self, label: Option<String>, age: f64) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut node = Node::new(label);
        node.age = age;
        self.nodes.push(node);
        id
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Post-order traversal of the subtree rooted at `from`.
    pub fn postorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(from, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
            } else {
                stack.push((id, true));
                for &c in self.children(id).iter().rev() {
                    stack.push((c, false));
                }
            }
        }
        order
    }

    /// Pre-order traversal of the subtree rooted at `from`.
    pub fn preorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &c in self.children(id).iter().rev() {
                stack.push(c);
            }
        }
        order
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> AncestorIter<'_> {
        AncestorIter {
            tree: self,
            cur: self.parent(id),
        }
    }

    /// Every edge in the subtree below `node`, identified by its head
    /// (child-side) node. The edge above `node` itself is excluded.
    pub fn edges_under(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = self.preorder(node);
        out.retain(|&e| e != node);
        out
    }

    pub fn leaves_under(&self, node: NodeId) -> Vec<NodeId> {
        self.preorder(node)
            .into_iter()
            .filter(|&n| self.is_leaf(n))
            .collect()
    }

    pub fn leaf_labels_under(&self, node: NodeId) -> BTreeSet<String> {
        self.leaves_under(node)
            .into_iter()
            .filter_map(|n| self.label(n).map(str::to_owned))
            .collect()
    }

    pub fn leaf_labels(&self) -> BTreeSet<String> {
        self.leaf_labels_under(self.root)
    }

    pub fn num_leaves_under(&self, node: NodeId) -> usize {
        self.leaves_under(node).len()
    }

    /// Map from leaf label to node id over the whole tree.
    pub fn leaf_index(&self) -> HashMap<String, NodeId> {
        let mut out = HashMap::new();
        for id in self.leaves_under(self.root) {
            if let Some(l) = self.label(id) {
                out.insert(l.to_owned(), id);
            }
        }
        out
    }

    /// First node carrying `label`, searching the whole tree.
    pub fn find_label(&self, label: &str) -> Option<NodeId> {
        self.preorder(self.root)
            .into_iter()
            .find(|&n| self.label(n) == Some(label))
    }

    /// MRCA of a set of nodes by ancestor-chain intersection.
    pub fn mrca(&self, ids: &[NodeId]) -> Option<NodeId> {
        let (&first, rest) = ids.split_first()?;
        let mut chain: Vec<NodeId> = std::iter::once(first).chain(self.ancestors(first)).collect();
        let mut members: HashSet<NodeId> = chain.iter().copied().collect();
        for &id in rest {
            let mut cur = Some(id);
            let hit = loop {
                match cur {
                    Some(n) if members.contains(&n) => break n,
                    Some(n) => cur = self.parent(n),
                    None => return None,
                }
            };
            let pos = chain.iter().position(|&n| n == hit)?;
            for dropped in chain.drain(..pos) {
                members.remove(&dropped);
            }
        }
        chain.first().copied()
    }

    // ------------------------------------------------------------------
    // Ages and ultrametricity
    // ------------------------------------------------------------------

    /// Root-to-node distances for every node.
    pub fn root_distances(&self) -> Vec<f64> {
        let mut dist = vec![0.0; self.nodes.len()];
        for id in self.preorder(self.root) {
            if let Some(p) = self.parent(id) {
                dist[id.idx()] = dist[p.idx()] + self.length(id);
            }
        }
        dist
    }

    /// Report ultrametricity: `(ok, (min_label, min_dist), (max_label, max_dist))`
    /// with the relative tolerance semantics of `math.isclose`.
    pub fn ultrametricity(&self, precision: f64) -> (bool, (String, f64), (String, f64)) {
        let dist = self.root_distances();
        let mut min: Option<(NodeId, f64)> = None;
        let mut max: Option<(NodeId, f64)> = None;
        for id in self.leaves_under(self.root) {
            let d = dist[id.idx()];
            if min.map_or(true, |(_, m)| d < m) {
                min = Some((id, d));
            }
            if max.map_or(true, |(_, m)| d > m) {
                max = Some((id, d));
            }
        }
        let name = |id: NodeId| self.label(id).unwrap_or("<unlabelled>").to_owned();
        let (min_id, min_d) = min.unwrap_or((self.root, 0.0));
        let (max_id, max_d) = max.unwrap_or((self.root, 0.0));
        let ok = (max_d - min_d).abs() <= precision * min_d.abs().max(max_d.abs());
        (ok, (name(min_id), min_d), (name(max_id), max_d))
    }

    /// Compute node ages from branch lengths, repairing sub-tolerance
    /// ultrametricity error by folding the per-leaf discrepancy into the
    /// pendant edges. Returns whether any repair was applied.
    ///
    /// Fails with `NonUltrametric` when the spread of root-to-leaf
    /// distances exceeds `precision` (relative).
    pub fn compute_ages(&mut self, precision: f64) -> Result<bool, PhyloError> {
        let (ok, (min_label, min_dist), (max_label, max_dist)) = self.ultrametricity(precision);
        if !ok {
            return Err(PhyloError::NonUltrametric {
                min_label,
                min_dist,
                max_label,
                max_dist,
            });
        }

        let dist = self.root_distances();
        let height = max_dist;
        let mut repaired = false;
        for id in self.leaves_under(self.root) {
            let delta = height - dist[id.idx()];
            if delta != 0.0 {
                repaired = true;
                let l = self.length(id) + delta;
                self.set_length(id, l.max(0.0));
            }
        }

        // With pendant edges corrected, every leaf sits at distance
        // `height` and internal ages follow from the root distances.
        let dist = self.root_distances();
        for id in self.preorder(self.root) {
            if self.is_leaf(id) {
                self.set_age(id, 0.0);
            } else {
                self.set_age(id, height - dist[id.idx()]);
            }
        }
        Ok(repaired)
    }

    /// A tree is binary when every internal node has exactly two children.
    /// A root with a single child is tolerated: it represents an explicit
    /// stem lineage.
    pub fn is_binary(&self) -> bool {
        self.is_binary_under(self.root)
    }

    pub fn is_binary_under(&self, node: NodeId) -> bool {
        self.preorder(node).into_iter().all(|n| {
            let deg = self.children(n).len();
            deg == 0 || deg == 2 || (n == self.root && deg == 1)
        })
    }

    /// First polytomy (internal node of degree > 2), if any.
    pub fn first_polytomy(&self) -> Option<NodeId> {
        self.preorder(self.root)
            .into_iter()
            .find(|&n| self.children(n).len() > 2)
    }

    /// Ages of the internal nodes of the subtree rooted at `node`
    /// (including `node` itself when it is internal), descending. These
    /// are the branching times consumed by the rate estimator and the
    /// branching-time sampler.
    pub fn branching_ages(&self, node: NodeId) -> Vec<f64> {
        let mut ages: Vec<f64> = self
            .preorder(node)
            .into_iter()
            .filter(|&n| !self.is_leaf(n))
            .map(|n| self.age(n))
            .collect();
        ages.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        ages
    }

    /// Edges below `node` with a length at or below `cutoff`.
    pub fn short_edges(&self, node: NodeId, cutoff: f64) -> Vec<NodeId> {
        self.edges_under(node)
            .into_iter()
            .filter(|&e| self.length(e) <= cutoff)
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Bisect the edge above `child` at `at_age`, returning the new
    /// internal node. Requires `age(parent) ≥ at_age ≥ age(child)` (within
    /// slack); ages equal to an endpoint yield a zero-length half, which
    /// the short-branch scan reports downstream.
    pub fn insert_on_edge(&mut self, child: NodeId, at_age: f64) -> Result<NodeId, PhyloError> {
        let parent = self.parent(child).ok_or_else(|| PhyloError::AgeOutsideEdge {
            age: at_age,
            lo: self.age(child),
            hi: f64::INFINITY,
        })?;
        let lo = self.age(child);
        let hi = self.age(parent);
        if at_age < lo - AGE_SLACK || at_age > hi + AGE_SLACK {
            return Err(PhyloError::AgeOutsideEdge { age: at_age, lo, hi });
        }
        let at_age = at_age.clamp(lo, hi);

        let id = NodeId(self.nodes.len() as u32);
        let mut node = Node::new(None);
        node.parent = Some(parent);
        node.age = at_age;
        node.length = hi - at_age;
        node.children.push(child);
        self.nodes.push(node);

        let slot = self.nodes[parent.idx()]
            .children
            .iter()
            .position(|&c| c == child)
            .expect("child not under parent");
        self.nodes[parent.idx()].children[slot] = id;
        self.nodes[child.idx()].parent = Some(id);
        self.nodes[child.idx()].length = at_age - lo;
        Ok(id)
    }

    /// Attach a detached node (and whatever hangs below it) as a child of
    /// `parent`. The branch length is derived from the two ages.
    pub fn attach_child(&mut self, parent: NodeId, node: NodeId) -> Result<(), PhyloError> {
        debug_assert!(self.node(node).parent.is_none(), "node already attached");
        let length = self.age(parent) - self.age(node);
        if length < -AGE_SLACK {
            return Err(PhyloError::NegativeBranch(
                self.label(node).unwrap_or("<unlabelled>").to_owned(),
            ));
        }
        self.node_mut(node).parent = Some(parent);
        self.node_mut(node).length = length.max(0.0);
        self.nodes[parent.idx()].children.push(node);
        Ok(())
    }

    /// Detach `node` from its parent, leaving it as the root of a
    /// free-standing subtree inside the arena.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(p) = self.node(node).parent {
            self.nodes[p.idx()].children.retain(|&c| c != node);
            self.node_mut(node).parent = None;
            self.node_mut(node).length = 0.0;
        }
    }

    /// Graft a new leaf (age 0) directly below `parent`.
    pub fn add_leaf(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.new_detached(Some(name.to_owned()), 0.0);
        self.attach_child(parent, id)
            .expect("leaf age 0 can never be older than its parent");
        id
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    /// Mark every edge below `node` as closed to grafts; optionally the
    /// stem edge above it too.
    pub fn lock_clade(&mut self, node: NodeId, include_stem: bool) {
        for e in self.edges_under(node) {
            self.set_locked(e, true);
        }
        if include_stem {
            self.set_locked(node, true);
        }
    }

    pub fn unlock_clade(&mut self, node: NodeId, include_stem: bool) {
        for e in self.edges_under(node) {
            self.set_locked(e, false);
        }
        if include_stem {
            self.set_locked(node, false);
        }
    }

    pub fn count_locked(&self, node: NodeId) -> usize {
        self.edges_under(node)
            .into_iter()
            .filter(|&e| self.is_locked(e))
            .count()
    }

    pub fn is_fully_locked(&self, node: NodeId) -> bool {
        self.edges_under(node).iter().all(|&e| self.is_locked(e))
    }

    // ------------------------------------------------------------------
    // Pruning and cosmetics
    // ------------------------------------------------------------------

    /// Remove the named leaves, suppressing any internal node left with a
    /// single child (its length is folded into the surviving child). The
    /// arena is compacted, so all previously held `NodeId`s are
    /// invalidated; callers prune before building any derived state.
    pub fn prune_leaves(&mut self, names: &HashSet<String>) -> usize {
        let mut dead: HashSet<NodeId> = self
            .leaves_under(self.root)
            .into_iter()
            .filter(|&n| self.label(n).is_some_and(|l| names.contains(l)))
            .collect();
        let removed = dead.len();
        if removed == 0 {
            return 0;
        }
        tracing::debug!(removed, "pruning leaves");

        // Cascade: an internal node whose children all died dies too.
        for id in self.postorder(self.root) {
            if !self.is_leaf(id)
                && self.children(id).iter().all(|c| dead.contains(c))
            {
                dead.insert(id);
            }
        }

        let mut out = Tree {
            nodes: Vec::with_capacity(self.nodes.len() - dead.len()),
            root: NodeId(0),
        };
        let mut map: HashMap<NodeId, NodeId> = HashMap::new();
        // Preorder guarantees parents are visited before children. Unary
        // survivors are suppressed by redirecting to their parent and
        // accumulating length.
        for id in self.preorder(self.root) {
            if dead.contains(&id) {
                continue;
            }
            let live_children: Vec<NodeId> = self
                .children(id)
                .iter()
                .copied()
                .filter(|c| !dead.contains(c))
                .collect();
            let suppress = live_children.len() == 1 && id != self.root;
            let parent = self.parent(id).map(|p| map[&p]);
            if suppress {
                // Defer to the single live child: it inherits this node's
                // attachment point, with the suppressed length folded in.
                let p = parent.expect("non-root node has a parent");
                map.insert(id, p);
                let extra = self.length(id);
                self.node_mut(live_children[0]).length += extra;
                continue;
            }
            let new_id = NodeId(out.nodes.len() as u32);
            let mut node = self.node(id).clone();
            node.parent = parent;
            node.children = Vec::new();
            out.nodes.push(node);
            if let Some(p) = parent {
                out.nodes[p.idx()].children.push(new_id);
            }
            map.insert(id, new_id);
        }
        *self = out;
        removed
    }

    /// Order children by descendant leaf count (smallest first) for stable,
    /// readable output.
    pub fn ladderize(&mut self) {
        let mut counts = vec![0usize; self.nodes.len()];
        for id in self.postorder(self.root) {
            counts[id.idx()] = if self.is_leaf(id) {
                1
            } else {
                self.children(id).iter().map(|c| counts[c.idx()]).sum()
            };
        }
        for idx in 0..self.nodes.len() {
            self.nodes[idx]
                .children
                .sort_by_key(|c| counts[c.idx()]);
        }
    }
}

pub struct AncestorIter<'a> {
    tree: &'a Tree,
    cur: Option<NodeId>,
}

impl Iterator for AncestorIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = self.tree.parent(id);
        Some(id)
    }
}
