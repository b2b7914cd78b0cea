
use std::cmp::Ordering;

use crate::pool::NONE;

/// Ordering oracle for treap keys.  Implementations must provide a total
/// order over node ids; equal payloads are expected to be tie-broken by id
/// so that every id has a unique resting position in the tree.
pub trait TreapOrd {
    fn cmp_ids(&self, a: u32, b: u32) -> Ordering;
}

#[derive(Debug, Clone, Copy)]
struct Link {
    left: u32,
    right: u32,
}

impl Default for Link {
    fn default() -> Self {
        Link { left: NONE, right: NONE }
    }
}

/// Randomised binary search tree whose priorities are a pure function of
/// the node id (Knuth multiplicative hash), so the shape is deterministic
/// for a given insertion set.  Nodes live in an index-addressed arena; the
/// caller allocates a slot per id before inserting it.
#[derive(Debug)]
pub struct Treap {
    links: Vec<Link>,
    root: u32,
}

impl Default for Treap {
    fn default() -> Self {
        Treap::new()
    }
}

const KNUTH_GOLDEN_RATIO: u32 = 0x9E37_79B1;

fn priority(id: u32) -> u32 {
    KNUTH_GOLDEN_RATIO.wrapping_mul(id)
}

impl Treap {
    pub fn new() -> Self {
        Treap { links: Vec::new(), root: NONE }
    }

    /// Allocate the link slot for the next node id (ids are dense and
    /// issued in order by the caller).
    pub fn push_slot(&mut self) {
        self.links.push(Link::default());
    }

    /// Drop the most recently allocated slot.  Only valid while that id has
    /// not been inserted.
    pub fn pop_slot(&mut self) {
        self.links.pop();
    }

    /// Predecessor search: the greatest inserted id ordered at or before
    /// `id`, or `None` when everything in the tree orders after it.
    pub fn psearch<C: TreapOrd>(&self, cmp: &C, id: u32) -> Option<u32> {
        let mut best = NONE;
        let mut cur = self.root;
        while cur != NONE {
            match cmp.cmp_ids(id, cur) {
                Ordering::Less => cur = self.links[cur as usize].left,
                Ordering::Equal | Ordering::Greater => {
                    best = cur;
                    cur = self.links[cur as usize].right;
                }
            }
        }
        if best == NONE { None } else { Some(best) }
    }

    pub fn insert<C: TreapOrd>(&mut self, cmp: &C, id: u32) {
        self.root = self.insert_at(cmp, self.root, id);
    }

    fn insert_at<C: TreapOrd>(&mut self, cmp: &C, cur: u32, id: u32) -> u32 {
        if cur == NONE {
            return id;
        }
        if cmp.cmp_ids(id, cur) == Ordering::Less {
            let left = self.insert_at(cmp, self.links[cur as usize].left, id);
            self.links[cur as usize].left = left;
            if priority(left) < priority(cur) {
                return self.rotate_right(cur);
            }
        } else {
            let right = self.insert_at(cmp, self.links[cur as usize].right, id);
            self.links[cur as usize].right = right;
            if priority(right) < priority(cur) {
                return self.rotate_left(cur);
            }
        }
        cur
    }

    fn rotate_right(&mut self, node: u32) -> u32 {
        let pivot = self.links[node as usize].left;
        self.links[node as usize].left = self.links[pivot as usize].right;
        self.links[pivot as usize].right = node;
        pivot
    }

    fn rotate_left(&mut self, node: u32) -> u32 {
        let pivot = self.links[node as usize].right;
        self.links[node as usize].right = self.links[pivot as usize].left;
        self.links[pivot as usize].left = node;
        pivot
    }

    pub fn reset(&mut self) {
        self.links.clear();
        self.root = NONE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Orders ids by an external key table, ties broken by id.
    struct KeyTable<'a>(&'a [u32]);

    impl TreapOrd for KeyTable<'_> {
        fn cmp_ids(&self, a: u32, b: u32) -> Ordering {
            self.0[a as usize]
                .cmp(&self.0[b as usize])
                .then(a.cmp(&b))
        }
    }

    fn build(keys: &[u32]) -> Treap {
        let mut treap = Treap::new();
        let cmp = KeyTable(keys);
        for id in 0..keys.len() as u32 {
            treap.push_slot();
            treap.insert(&cmp, id);
        }
        treap
    }

    fn check_bst(treap: &Treap, keys: &[u32], node: u32, lo: Option<u32>, hi: Option<u32>) {
        if node == NONE {
            return;
        }
        if let Some(lo) = lo {
            assert!(KeyTable(keys).cmp_ids(node, lo) == Ordering::Greater);
        }
        if let Some(hi) = hi {
            assert!(KeyTable(keys).cmp_ids(node, hi) == Ordering::Less);
        }
        let link = treap.links[node as usize];
        if link.left != NONE {
            assert!(priority(link.left) >= priority(node));
        }
        if link.right != NONE {
            assert!(priority(link.right) >= priority(node));
        }
        check_bst(treap, keys, link.left, lo, Some(node));
        check_bst(treap, keys, link.right, Some(node), hi);
    }

    #[test]
    fn maintains_search_and_heap_order() {
        let keys: Vec<u32> = vec![50, 10, 90, 30, 70, 20, 80, 40, 60, 0, 100];
        let treap = build(&keys);
        check_bst(&treap, &keys, treap.root, None, None);
    }

    #[test]
    fn psearch_finds_predecessor() {
        let keys: Vec<u32> = vec![10, 30, 50, 70];
        let mut treap = build(&keys);
        // Probe with a fresh id whose key sits between 30 and 50.
        let mut probe_keys = keys.clone();
        probe_keys.push(40);
        treap.push_slot();
        let found = treap.psearch(&KeyTable(&probe_keys), 4);
        assert_eq!(found, Some(1));
        // A probe below every key has no predecessor.
        probe_keys[4] = 5;
        assert_eq!(treap.psearch(&KeyTable(&probe_keys), 4), None);
    }

    #[test]
    fn duplicate_keys_rest_by_identity() {
        // Same key for every node: psearch from a new max-id probe must
        // find the largest inserted id.
        let keys: Vec<u32> = vec![7, 7, 7, 7];
        let mut treap = build(&keys);
        let mut probe_keys = keys.clone();
        probe_keys.push(7);
        treap.push_slot();
        assert_eq!(treap.psearch(&KeyTable(&probe_keys), 4), Some(3));
    }

    #[test]
    fn priorities_are_deterministic() {
        assert_eq!(priority(1), 0x9E37_79B1);
        assert_eq!(priority(2), 0x9E37_79B1u32.wrapping_mul(2));
    }
}
