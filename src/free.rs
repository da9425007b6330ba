//! Free-space management tree.
//!
//! [`FreeTree`] tracks the set of free block ranges over a fixed-capacity
//! logical address space. Allocation walks the tree best-fit first and
//! carves blocks from the low end of the tightest free run; release merges
//! the returned range back into its neighbours so two adjacent free ranges
//! never coexist as separate leaves.
//!
//! Both operations are O(height). There is no rotation-based rebalancing:
//! new leaves created by gap fills are attached on alternating sides, which
//! keeps pathological linear growth unlikely under mixed workloads but does
//! not bound the height. That is a deliberate trade-off, not a guarantee.

use tracing::trace;

use crate::error::{LarderError, Result};

/// A node owns either one free range (leaf) or exactly two ordered,
/// non-adjacent children. Forks cache `best`, the largest single free run
/// reachable below them, so allocation can steer without descending blind.
#[derive(Debug)]
enum Node {
    Leaf {
        first: u64,
        last: u64,
    },
    Fork {
        left: Box<Node>,
        right: Box<Node>,
        best: u64,
    },
}

impl Node {
    fn leaf(first: u64, last: u64) -> Box<Node> {
        Box::new(Node::Leaf { first, last })
    }

    fn fork(left: Box<Node>, right: Box<Node>) -> Box<Node> {
        let best = left.best().max(right.best());
        Box::new(Node::Fork { left, right, best })
    }

    fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Largest single free run reachable in this subtree.
    fn best(&self) -> u64 {
        match self {
            Node::Leaf { first, last } => last - first + 1,
            Node::Fork { best, .. } => *best,
        }
    }

    /// Total free blocks in this subtree.
    fn free_blocks(&self) -> u64 {
        match self {
            Node::Leaf { first, last } => last - first + 1,
            Node::Fork { left, right, .. } => left.free_blocks() + right.free_blocks(),
        }
    }

    /// First block of the leftmost leaf.
    fn first_block(&self) -> u64 {
        match self {
            Node::Leaf { first, .. } => *first,
            Node::Fork { left, .. } => left.first_block(),
        }
    }

    /// Last block of the rightmost leaf.
    fn last_block(&self) -> u64 {
        match self {
            Node::Leaf { last, .. } => *last,
            Node::Fork { right, .. } => right.last_block(),
        }
    }

    fn height(&self) -> usize {
        match self {
            Node::Leaf { .. } => 1,
            Node::Fork { left, right, .. } => 1 + left.height().max(right.height()),
        }
    }

    fn node_count(&self) -> usize {
        match self {
            Node::Leaf { .. } => 1,
            Node::Fork { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }

    fn recompute_best(&mut self) {
        if let Node::Fork { left, right, best } = self {
            *best = left.best().max(right.best());
        }
    }

    /// Grows the leftmost leaf downward, refreshing cached bests on the way.
    fn expand_left_leaf(&mut self, blocks: u64) {
        match self {
            Node::Leaf { first, .. } => *first -= blocks,
            Node::Fork { left, .. } => left.expand_left_leaf(blocks),
        }
        self.recompute_best();
    }

    /// Grows the rightmost leaf upward, refreshing cached bests on the way.
    fn expand_right_leaf(&mut self, blocks: u64) {
        match self {
            Node::Leaf { last, .. } => *last += blocks,
            Node::Fork { right, .. } => right.expand_right_leaf(blocks),
        }
        self.recompute_best();
    }

    /// Range held by the leftmost leaf.
    fn left_leaf_range(&self) -> (u64, u64) {
        match self {
            Node::Leaf { first, last } => (*first, *last),
            Node::Fork { left, .. } => left.left_leaf_range(),
        }
    }

    /// Detaches the leftmost leaf. Returns `None` when the node itself is
    /// that leaf, telling the parent to promote the sibling.
    fn snip_left_leaf(self: Box<Node>) -> Option<Box<Node>> {
        match *self {
            Node::Leaf { .. } => None,
            Node::Fork { left, right, .. } => match left.snip_left_leaf() {
                None => Some(right),
                Some(new_left) => Some(Node::fork(new_left, right)),
            },
        }
    }

    /// Best-fit allocation. Returns the surviving subtree (`None` when the
    /// allocation consumed it whole) and the offset on success.
    fn allocate(self: Box<Node>, blocks: u64) -> (Option<Box<Node>>, Option<u64>) {
        match *self {
            Node::Leaf { first, last } => {
                let size = last - first + 1;
                if size > blocks {
                    // Carve from the low end and stay a leaf.
                    (Some(Node::leaf(first + blocks, last)), Some(first))
                } else if size == blocks {
                    // Exact fit consumes the leaf; the parent splices us out.
                    (None, Some(first))
                } else {
                    (Some(Node::leaf(first, last)), None)
                }
            }
            Node::Fork { left, right, .. } => {
                let left_best = left.best();
                let right_best = right.best();
                if left_best < blocks && right_best < blocks {
                    return (Some(Node::fork(left, right)), None);
                }
                // Tightest non-negative room wins; a side that cannot hold
                // the request is pushed out of the running, and ties go
                // right.
                let left_room = if left_best >= blocks {
                    left_best - blocks
                } else {
                    u64::MAX
                };
                let right_room = if right_best >= blocks {
                    right_best - blocks
                } else {
                    u64::MAX
                };
                if left_room < right_room {
                    let (new_left, offset) = left.allocate(blocks);
                    match new_left {
                        None => (Some(right), offset),
                        Some(new_left) => (Some(Node::fork(new_left, right)), offset),
                    }
                } else {
                    let (new_right, offset) = right.allocate(blocks);
                    match new_right {
                        None => (Some(left), offset),
                        Some(new_right) => (Some(Node::fork(left, new_right)), offset),
                    }
                }
            }
        }
    }

    /// Returns the freed range to the tree, merging with neighbours.
    fn release(
        self: Box<Node>,
        offset: u64,
        blocks: u64,
        lean_right: &mut bool,
    ) -> Result<Box<Node>> {
        let end = offset + blocks; // one past the freed range
        match *self {
            Node::Leaf { first, last } => {
                if end < first {
                    Ok(Node::fork(Node::leaf(offset, end - 1), Node::leaf(first, last)))
                } else if end == first {
                    Ok(Node::leaf(first - blocks, last))
                } else if offset == last + 1 {
                    Ok(Node::leaf(first, last + blocks))
                } else if offset > last + 1 {
                    Ok(Node::fork(Node::leaf(first, last), Node::leaf(offset, end - 1)))
                } else {
                    Err(LarderError::Corruption(format!(
                        "freed range [{}, {}] overlaps free range [{}, {}]",
                        offset,
                        end - 1,
                        first,
                        last
                    )))
                }
            }
            Node::Fork { left, right, .. } => {
                if left.last_block() > offset {
                    // Freed range belongs inside the left subtree.
                    let left = left.release(offset, blocks, lean_right)?;
                    if left.last_block() + 1 == right.first_block() {
                        return Ok(Node::merge(left, right));
                    }
                    Ok(Node::fork(left, right))
                } else if right.first_block() < offset {
                    // Freed range belongs inside the right subtree.
                    let right = right.release(offset, blocks, lean_right)?;
                    if left.last_block() + 1 == right.first_block() {
                        return Ok(Node::merge(left, right));
                    }
                    Ok(Node::fork(left, right))
                } else {
                    // Freed range sits in the gap between the subtrees.
                    let left_adjacent = offset == left.last_block() + 1;
                    let right_adjacent = end == right.first_block();
                    if left_adjacent && right_adjacent {
                        Ok(Node::merge(left, right))
                    } else if left_adjacent {
                        let mut left = left;
                        left.expand_right_leaf(blocks);
                        Ok(Node::fork(left, right))
                    } else if right_adjacent {
                        let mut right = right;
                        right.expand_left_leaf(blocks);
                        Ok(Node::fork(left, right))
                    } else if offset > left.last_block() && end < right.first_block() {
                        // Floats free in the gap: attach on alternating sides
                        // so repeated gap fills do not lean the tree over.
                        *lean_right = !*lean_right;
                        let fresh = Node::leaf(offset, end - 1);
                        if *lean_right {
                            Ok(Node::fork(left, Node::fork(fresh, right)))
                        } else {
                            Ok(Node::fork(Node::fork(left, fresh), right))
                        }
                    } else {
                        Err(LarderError::Corruption(format!(
                            "freed range [{}, {}] overlaps tracked free space",
                            offset,
                            end - 1
                        )))
                    }
                }
            }
        }
    }

    /// Combines two subtrees whose spans have become contiguous into one.
    fn merge(left: Box<Node>, right: Box<Node>) -> Box<Node> {
        match (left.is_leaf(), right.is_leaf()) {
            (true, true) => Node::leaf(left.first_block(), right.last_block()),
            (false, true) => {
                // Splice the right leaf onto the left subtree's boundary leaf.
                let mut left = left;
                left.expand_right_leaf(right.last_block() - left.last_block());
                left
            }
            (true, false) => {
                let mut right = right;
                right.expand_left_leaf(right.first_block() - left.first_block());
                right
            }
            (false, false) => {
                // Snip the leftmost leaf off the right subtree and splice its
                // range onto the left subtree's rightmost leaf.
                let (_, snip_last) = right.left_leaf_range();
                let right = right
                    .snip_left_leaf()
                    .expect("a fork holds at least two leaves");
                let mut left = left;
                left.expand_right_leaf(snip_last - left.last_block());
                Node::fork(left, right)
            }
        }
    }

    /// Full integrity walk: leaf ordering, no adjacency between successive
    /// ranges, cached `best` equal to the true maximum. Returns
    /// (first, last, true best) for the subtree.
    fn check(&self) -> Result<(u64, u64, u64)> {
        match self {
            Node::Leaf { first, last } => {
                if last < first {
                    return Err(LarderError::Corruption(format!(
                        "inverted leaf range [{first}, {last}]"
                    )));
                }
                Ok((*first, *last, last - first + 1))
            }
            Node::Fork { left, right, best } => {
                let (left_first, left_last, left_best) = left.check()?;
                let (right_first, right_last, right_best) = right.check()?;
                if left_last >= right_first {
                    return Err(LarderError::Corruption(format!(
                        "children out of order: left ends at {left_last}, right starts at {right_first}"
                    )));
                }
                if left_last + 1 == right_first {
                    return Err(LarderError::Corruption(format!(
                        "adjacent free ranges left unmerged at block {right_first}"
                    )));
                }
                let true_best = left_best.max(right_best);
                if *best != true_best {
                    return Err(LarderError::Corruption(format!(
                        "stale contiguous-run cache: {best} recorded, {true_best} actual"
                    )));
                }
                Ok((left_first, right_last, true_best))
            }
        }
    }
}

/// Interval tree over a fixed-size block address space.
///
/// Created with every block free; [`allocate`](FreeTree::allocate) hands out
/// contiguous runs and [`free`](FreeTree::free) returns them. The tree has no
/// knowledge of records or keys, only of block ranges.
#[derive(Debug)]
pub struct FreeTree {
    root: Option<Box<Node>>,
    capacity: u64,
    /// Alternating attachment side for gap-fill insertions. Instance state
    /// on purpose: two trees must never couple through a shared flag.
    lean_right: bool,
}

impl FreeTree {
    /// Builds a tree over `blocks` blocks, all free. Zero blocks gives an
    /// empty tree that can never satisfy an allocation.
    pub fn new(blocks: u64) -> Self {
        let root = if blocks == 0 {
            None
        } else {
            Some(Node::leaf(0, blocks - 1))
        };
        Self {
            root,
            capacity: blocks,
            lean_right: false,
        }
    }

    /// Allocates `blocks` contiguous blocks, best-fit. Returns the first
    /// block of the run, or `None` when no single free run is big enough.
    /// Requests for zero blocks are never satisfied.
    pub fn allocate(&mut self, blocks: u64) -> Option<u64> {
        if blocks == 0 {
            return None;
        }
        let root = self.root.take()?;
        let (root, offset) = root.allocate(blocks);
        self.root = root;
        if let Some(offset) = offset {
            trace!(offset, blocks, "free_tree.allocate");
        }
        offset
    }

    /// Returns `blocks` blocks starting at `offset` to the free set.
    ///
    /// The range must have been handed out by [`allocate`](Self::allocate)
    /// and not freed since; overlap with tracked free space is reported as
    /// `Corruption` and leaves the tree untrustworthy for the session.
    pub fn free(&mut self, offset: u64, blocks: u64) -> Result<()> {
        if blocks == 0 {
            return Err(LarderError::InvalidArgument("cannot free zero blocks"));
        }
        let end = offset
            .checked_add(blocks)
            .ok_or(LarderError::InvalidArgument(
                "freed range overflows the block address space",
            ))?;
        if end > self.capacity {
            return Err(LarderError::InvalidArgument(
                "freed range extends past tree capacity",
            ));
        }
        self.root = Some(match self.root.take() {
            None => Node::leaf(offset, end - 1),
            Some(root) => root.release(offset, blocks, &mut self.lean_right)?,
        });
        trace!(offset, blocks, "free_tree.free");
        Ok(())
    }

    /// Total number of blocks the tree was created over.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Total free blocks across all ranges.
    pub fn free_blocks(&self) -> u64 {
        self.root.as_ref().map_or(0, |r| r.free_blocks())
    }

    /// Size of the largest single free run.
    pub fn largest_contiguous(&self) -> u64 {
        self.root.as_ref().map_or(0, |r| r.best())
    }

    /// Height of the tree (a lone leaf has height 1, an empty tree 0).
    pub fn height(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.height())
    }

    /// Total node count, leaves and forks.
    pub fn node_count(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.node_count())
    }

    /// Walks the whole tree checking structural invariants: ranges ordered
    /// left to right, no two adjacent free ranges, every cached contiguous
    /// run equal to the true maximum.
    pub fn validate(&self) -> Result<()> {
        if let Some(root) = &self.root {
            root.check()?;
        }
        Ok(())
    }
}
