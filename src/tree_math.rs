// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index arithmetic on the left-balanced binary tree over the group's members.
//!
//! The tree of `n` leaves occupies `2n - 1` node slots. Leaves sit at even node indices,
//! intermediate nodes at odd indices. The level of a node is the number of trailing one bits
//! in its index; leaves are level zero.
//!
//! All functions here are pure and total on their domain. Every other part of the crate
//! consumes them read-only.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Position of a member in the leaf space of the tree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeafIndex(pub u32);

/// Position of a node (leaf or intermediate) in the node space of the tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex(pub u32);

/// Number of leaves in a tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeafCount(pub u32);

/// Number of node slots in a tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeCount(pub u32);

impl From<LeafIndex> for NodeIndex {
    fn from(leaf: LeafIndex) -> Self {
        NodeIndex(2 * leaf.0)
    }
}

impl NodeIndex {
    /// Returns the leaf position of this node, or `None` for an intermediate node.
    pub fn leaf(self) -> Option<LeafIndex> {
        if self.0 % 2 == 0 {
            Some(LeafIndex(self.0 / 2))
        } else {
            None
        }
    }
}

impl From<LeafCount> for NodeCount {
    fn from(leaves: LeafCount) -> Self {
        if leaves.0 == 0 {
            NodeCount(0)
        } else {
            NodeCount(2 * leaves.0 - 1)
        }
    }
}

impl From<NodeCount> for LeafCount {
    fn from(nodes: NodeCount) -> Self {
        if nodes.0 == 0 {
            LeafCount(0)
        } else {
            LeafCount(nodes.0 / 2 + 1)
        }
    }
}

fn log2(x: u32) -> u32 {
    if x == 0 { 0 } else { 31 - x.leading_zeros() }
}

/// Level of a node in the tree: the number of trailing ones in its index.
pub fn level(x: NodeIndex) -> u32 {
    x.0.trailing_ones()
}

/// Index of the root node of a tree with `n` leaves.
pub fn root(n: LeafCount) -> NodeIndex {
    let width = NodeCount::from(n).0;
    NodeIndex((1 << log2(width)) - 1)
}

/// Left child of an intermediate node. Independent of the tree size.
pub fn left(x: NodeIndex) -> Result<NodeIndex> {
    let k = level(x);
    if k == 0 {
        return Err(Error::InvalidIndex);
    }
    Ok(NodeIndex(x.0 ^ (0b01 << (k - 1))))
}

/// Right child of an intermediate node, clipped to the tree size: when the mathematical
/// right child falls outside the node array, its leftmost present ancestor stands in.
pub fn right(x: NodeIndex, n: LeafCount) -> Result<NodeIndex> {
    let k = level(x);
    if k == 0 {
        return Err(Error::InvalidIndex);
    }
    let width = NodeCount::from(n).0;
    let mut r = x.0 ^ (0b11 << (k - 1));
    while r >= width {
        r = left(NodeIndex(r))?.0;
    }
    Ok(NodeIndex(r))
}

// Parent within a complete tree, ignoring tree size.
fn parent_step(x: NodeIndex) -> NodeIndex {
    let k = level(x);
    NodeIndex((x.0 | (1 << k)) & !(1 << (k + 1)))
}

/// Parent of a node, clipped to the tree size. Fails on the root.
pub fn parent(x: NodeIndex, n: LeafCount) -> Result<NodeIndex> {
    if x == root(n) {
        return Err(Error::InvalidIndex);
    }
    let width = NodeCount::from(n).0;
    let mut p = parent_step(x);
    while p.0 >= width {
        p = parent_step(p);
    }
    Ok(p)
}

/// The other child of a node's parent.
pub fn sibling(x: NodeIndex, n: LeafCount) -> Result<NodeIndex> {
    let p = parent(x, n)?;
    let l = left(p)?;
    if x != l { Ok(l) } else { right(p, n) }
}

/// Nodes from the parent of `x` up to and including the root. Empty for a one-leaf tree.
pub fn direct_path(x: NodeIndex, n: LeafCount) -> Result<Vec<NodeIndex>> {
    let width = NodeCount::from(n).0;
    if x.0 >= width {
        return Err(Error::InvalidIndex);
    }
    let mut path = Vec::new();
    let r = root(n);
    let mut cursor = x;
    while cursor != r {
        cursor = parent(cursor, n)?;
        path.push(cursor);
    }
    Ok(path)
}

/// Siblings along the direct path of `x`: the node under each direct-path node that does
/// not contain `x`. Pairwise aligned with [`direct_path`].
pub fn copath(x: NodeIndex, n: LeafCount) -> Result<Vec<NodeIndex>> {
    let dirpath = direct_path(x, n)?;
    let mut below = x;
    let mut path = Vec::with_capacity(dirpath.len());
    for _ in &dirpath {
        path.push(sibling(below, n)?);
        below = parent(below, n)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_leaf_tree() {
        assert_eq!(root(LeafCount(1)), NodeIndex(0));
        assert!(direct_path(NodeIndex(0), LeafCount(1)).unwrap().is_empty());
        assert!(copath(NodeIndex(0), LeafCount(1)).unwrap().is_empty());
    }

    #[test]
    fn known_indices() {
        // Five leaves: 9 nodes, root at 7.
        let n = LeafCount(5);
        assert_eq!(root(n), NodeIndex(7));
        assert_eq!(left(NodeIndex(7)).unwrap(), NodeIndex(3));
        assert_eq!(right(NodeIndex(7), n).unwrap(), NodeIndex(8));
        assert_eq!(
            direct_path(NodeIndex(0), n).unwrap(),
            vec![NodeIndex(1), NodeIndex(3), NodeIndex(7)]
        );
        assert_eq!(
            copath(NodeIndex(0), n).unwrap(),
            vec![NodeIndex(2), NodeIndex(5), NodeIndex(8)]
        );
        assert_eq!(
            direct_path(NodeIndex(8), n).unwrap(),
            vec![NodeIndex(7)]
        );
        assert_eq!(copath(NodeIndex(8), n).unwrap(), vec![NodeIndex(3)]);
    }

    #[test]
    fn parent_and_children_agree() {
        for leaves in 1u32..=255 {
            let n = LeafCount(leaves);
            let width = NodeCount::from(n).0;
            let r = root(n);
            for x in 0..width {
                let x = NodeIndex(x);
                if x == r {
                    assert!(parent(x, n).is_err());
                    continue;
                }
                let p = parent(x, n).unwrap();
                let l = left(p).unwrap();
                let rt = right(p, n).unwrap();
                assert!(x == l || x == rt, "n={leaves} x={x:?} p={p:?}");
                assert_eq!(sibling(l, n).unwrap(), rt);
                assert_eq!(sibling(rt, n).unwrap(), l);
            }
        }
    }

    #[test]
    fn children_partition_leaves() {
        for leaves in 2u32..=255 {
            let n = LeafCount(leaves);
            let r = root(n);
            let l = left(r).unwrap();
            let rt = right(r, n).unwrap();
            // Left subtree of the root spans the largest power of two below the leaf count.
            let split = 1 << log2(leaves - 1);
            for leaf in 0..leaves {
                let mut cursor = NodeIndex::from(LeafIndex(leaf));
                while cursor != l && cursor != rt {
                    cursor = parent(cursor, n).unwrap();
                }
                let expected = if leaf < split { l } else { rt };
                assert_eq!(cursor, expected, "n={leaves} leaf={leaf}");
            }
        }
    }

    #[test]
    fn direct_path_length() {
        for leaves in 2u32..=255 {
            let n = LeafCount(leaves);
            let expected = 32 - (leaves - 1).leading_zeros(); // ceil(log2 n)
            for leaf in 0..leaves {
                let path = direct_path(NodeIndex::from(LeafIndex(leaf)), n).unwrap();
                assert!(path.len() as u32 <= expected);
                assert_eq!(*path.last().unwrap(), root(n));
            }
            let path = direct_path(NodeIndex(0), n).unwrap();
            assert_eq!(path.len() as u32, expected);
        }
    }
}
