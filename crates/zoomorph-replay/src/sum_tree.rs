//! Array-backed sum tree.
//!
//! The tree stores `2 * capacity - 1` nodes in a flat vector. Leaves occupy
//! indices `capacity - 1 ..= 2 * capacity - 2` and hold one priority each;
//! every internal node holds the sum of its two children, so the root is the
//! total priority mass. Both update propagation and prefix-sum retrieval walk
//! the tree iteratively using `parent = (i - 1) / 2`, `left = 2i + 1`,
//! `right = 2i + 2`.
//!
//! Data slots are written in ring order: once `capacity` items have been
//! added, the oldest slot is overwritten.

/// A fixed-capacity sum tree mapping data slots to priorities.
#[derive(Debug, Clone)]
pub struct SumTree<T> {
    /// Number of leaves (data slots).
    capacity: usize,
    /// Flat node array; index 0 is the root.
    nodes: Vec<f64>,
    /// Payload for each leaf, `None` until first written.
    data: Vec<Option<T>>,
    /// Next slot to write.
    write: usize,
    /// Number of occupied slots (saturates at `capacity`).
    len: usize,
}

impl<T> SumTree<T> {
    /// Create an empty tree with room for `capacity` items.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let node_count = capacity.saturating_mul(2).saturating_sub(1);
        let mut data = Vec::with_capacity(capacity);
        data.resize_with(capacity, || None);
        Self {
            capacity,
            nodes: vec![0.0; node_count],
            data,
            write: 0,
            len: 0,
        }
    }

    /// Number of data slots.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no item has been added yet.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total priority mass (the root node).
    pub fn total(&self) -> f64 {
        self.nodes.first().copied().unwrap_or(0.0)
    }

    /// Store `item` in the next ring slot with the given priority.
    ///
    /// Returns the slot index, which stays valid until the ring wraps
    /// around and overwrites it.
    pub fn add(&mut self, priority: f64, item: T) -> usize {
        let slot = self.write;
        if let Some(entry) = self.data.get_mut(slot) {
            *entry = Some(item);
        }
        self.update(slot, priority);
        self.write = slot.saturating_add(1).checked_rem(self.capacity).unwrap_or(0);
        if self.len < self.capacity {
            self.len = self.len.saturating_add(1);
        }
        slot
    }

    /// Set the priority of `slot` and refresh every ancestor sum.
    ///
    /// Returns `false` if the slot is out of range.
    pub fn update(&mut self, slot: usize, priority: f64) -> bool {
        if slot >= self.capacity {
            return false;
        }
        let mut idx = self.leaf_index(slot);
        let Some(leaf) = self.nodes.get_mut(idx) else {
            return false;
        };
        *leaf = priority.max(0.0);

        while idx > 0 {
            idx = idx.saturating_sub(1) / 2;
            let left = self.child_sum(idx.saturating_mul(2).saturating_add(1));
            let right = self.child_sum(idx.saturating_mul(2).saturating_add(2));
            if let Some(node) = self.nodes.get_mut(idx) {
                *node = left + right;
            }
        }
        true
    }

    /// Priority currently stored for `slot`.
    pub fn priority(&self, slot: usize) -> Option<f64> {
        if slot >= self.capacity {
            return None;
        }
        self.nodes.get(self.leaf_index(slot)).copied()
    }

    /// Whether `slot` holds an item.
    pub fn is_occupied(&self, slot: usize) -> bool {
        matches!(self.data.get(slot), Some(Some(_)))
    }

    /// Find the item whose cumulative priority range contains `value`.
    ///
    /// `value` is clamped into `[0, total]`. The walk only ever descends
    /// into subtrees with positive mass, so an empty slot is never returned
    /// while the total is positive. Returns `(slot, priority, item)`.
    pub fn get(&self, value: f64) -> Option<(usize, f64, &T)> {
        let total = self.total();
        if total <= 0.0 {
            return None;
        }
        let mut remaining = value.clamp(0.0, total);
        let mut idx = 0usize;

        loop {
            let left = idx.saturating_mul(2).saturating_add(1);
            let Some(&left_sum) = self.nodes.get(left) else {
                break;
            };
            let right_sum = self.child_sum(left.saturating_add(1));
            if remaining < left_sum || right_sum <= 0.0 {
                idx = left;
            } else {
                remaining -= left_sum;
                idx = left.saturating_add(1);
            }
        }

        let slot = idx.checked_sub(self.capacity.saturating_sub(1))?;
        let priority = self.nodes.get(idx).copied()?;
        let item = self.data.get(slot)?.as_ref()?;
        Some((slot, priority, item))
    }

    /// Sum of every leaf priority, computed directly from the leaves.
    pub fn leaf_sum(&self) -> f64 {
        let first_leaf = self.capacity.saturating_sub(1);
        self.nodes.iter().skip(first_leaf).sum()
    }

    const fn leaf_index(&self, slot: usize) -> usize {
        slot.saturating_add(self.capacity).saturating_sub(1)
    }

    fn child_sum(&self, idx: usize) -> f64 {
        self.nodes.get(idx).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn assert_root_matches_leaves<T>(tree: &SumTree<T>) {
        assert!(
            (tree.total() - tree.leaf_sum()).abs() < 1e-9,
            "root {} != leaf sum {}",
            tree.total(),
            tree.leaf_sum()
        );
    }

    #[test]
    fn empty_tree_has_no_mass() {
        let tree: SumTree<u32> = SumTree::new(4);
        assert!(tree.is_empty());
        assert!(tree.total().abs() < f64::EPSILON);
        assert!(tree.get(0.5).is_none());
    }

    #[test]
    fn add_accumulates_total() {
        let mut tree = SumTree::new(4);
        tree.add(1.0, "a");
        tree.add(2.0, "b");
        tree.add(3.0, "c");
        assert_eq!(tree.len(), 3);
        assert!((tree.total() - 6.0).abs() < 1e-12);
        assert_root_matches_leaves(&tree);
    }

    #[test]
    fn ring_overwrites_oldest_slot() {
        let mut tree = SumTree::new(3);
        assert_eq!(tree.add(1.0, 'a'), 0);
        assert_eq!(tree.add(1.0, 'b'), 1);
        assert_eq!(tree.add(1.0, 'c'), 2);
        assert_eq!(tree.add(5.0, 'd'), 0);
        assert_eq!(tree.len(), 3);
        assert!((tree.total() - 7.0).abs() < 1e-12);
        assert_eq!(tree.get(0.5).map(|(s, _, v)| (s, *v)), Some((0, 'd')));
        assert_eq!(tree.get(6.5).map(|(s, _, v)| (s, *v)), Some((2, 'c')));
        assert_root_matches_leaves(&tree);
    }

    #[test]
    fn retrieval_follows_cumulative_ranges() {
        let mut tree = SumTree::new(4);
        tree.add(1.0, 'a');
        tree.add(2.0, 'b');
        tree.add(3.0, 'c');
        tree.add(4.0, 'd');
        assert_eq!(tree.get(0.5).map(|(_, _, v)| *v), Some('a'));
        assert_eq!(tree.get(1.5).map(|(_, _, v)| *v), Some('b'));
        assert_eq!(tree.get(4.0).map(|(_, _, v)| *v), Some('c'));
        assert_eq!(tree.get(9.99).map(|(_, _, v)| *v), Some('d'));
        // Values past the total clamp to the last item with mass.
        assert_eq!(tree.get(100.0).map(|(_, _, v)| *v), Some('d'));
    }

    #[test]
    fn retrieval_skips_empty_slots() {
        let mut tree = SumTree::new(5);
        tree.add(2.0, 'a');
        for value in [0.0, 0.7, 1.999, 2.0, 50.0] {
            let (slot, _, item) = tree.get(value).unwrap();
            assert_eq!(slot, 0);
            assert_eq!(*item, 'a');
        }
    }

    #[test]
    fn update_keeps_root_consistent() {
        let mut tree = SumTree::new(7);
        for i in 0..7u32 {
            tree.add(f64::from(i) + 0.5, i);
        }
        tree.update(3, 10.0);
        tree.update(0, 0.0);
        tree.update(6, 0.25);
        assert_root_matches_leaves(&tree);
        assert!((tree.priority(3).unwrap() - 10.0).abs() < 1e-12);
        assert!(!tree.update(7, 1.0));
    }

    #[test]
    fn capacity_one_tree_is_a_single_leaf() {
        let mut tree = SumTree::new(1);
        tree.add(0.3, 'x');
        tree.add(0.9, 'y');
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(0.1).map(|(s, _, v)| (s, *v)), Some((0, 'y')));
        assert!((tree.total() - 0.9).abs() < 1e-12);
    }
}
