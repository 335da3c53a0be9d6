//! On-disk node layout and its ordering predicates.

use common::{DiskPos, NO_LINK};
use serde::{Deserialize, Serialize};
use storage::{encoded_len, Record};

use crate::TreeItem;

/// Composite ordering key: user key first, value as tiebreak.
///
/// The derived `Ord` is lexicographic over the fields, which is exactly the
/// multimap order: all values of one key sort together, in value order.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPair<K, V> {
    pub key: K,
    pub val: V,
}

impl<K, V> KeyPair<K, V> {
    pub fn new(key: K, val: V) -> Self {
        Self { key, val }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageKind {
    #[default]
    Invalid,
    Leaf,
    Internal,
}

/// One fixed-footprint tree node. `N` is the slot count (even, at least 4).
///
/// Internal nodes route by maximum: `entries[i]` equals the largest composite
/// key in the subtree under `children[i]`, so keys and children stay parallel
/// (`entries.len() == children.len()`). Leaves keep `children` empty and are
/// threaded into a doubly-linked chain through `left`/`right`; internal nodes
/// leave both links at `NO_LINK` and reach siblings through their parent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<K, V, const N: usize> {
    pub kind: PageKind,
    pub parent: DiskPos,
    pub left: DiskPos,
    pub right: DiskPos,
    pub entries: Vec<KeyPair<K, V>>,
    pub children: Vec<DiskPos>,
}

impl<K, V, const N: usize> Default for Page<K, V, N> {
    fn default() -> Self {
        Self {
            kind: PageKind::Invalid,
            parent: NO_LINK,
            left: NO_LINK,
            right: NO_LINK,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl<K: TreeItem, V: TreeItem, const N: usize> Page<K, V, N> {
    pub fn new(kind: PageKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == PageKind::Leaf
    }

    /// A page at the slot count must split before control returns to the
    /// caller; the last slot exists only for that transient state.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= N
    }

    pub fn is_underfull(&self) -> bool {
        self.entries.len() < N / 2
    }

    /// Index of the first entry `>= probe`, clamped to the last live slot.
    ///
    /// The clamp makes the final slot a "maximum" sentinel: when every entry
    /// is smaller than the probe, callers see the last index and distinguish
    /// "found" from "would insert after" with an equality check.
    pub fn lower_bound(&self, probe: &KeyPair<K, V>) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        self.entries
            .partition_point(|e| e < probe)
            .min(self.entries.len() - 1)
    }

    /// As `lower_bound`, but probing by user key alone.
    pub fn lower_bound_key(&self, key: &K) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        self.entries
            .partition_point(|e| e.key < *key)
            .min(self.entries.len() - 1)
    }

    pub fn front(&self) -> Option<&KeyPair<K, V>> {
        self.entries.first()
    }

    pub fn back(&self) -> Option<&KeyPair<K, V>> {
        self.entries.last()
    }
}

impl<K: TreeItem, V: TreeItem, const N: usize> Record for Page<K, V, N> {
    fn record_len() -> usize {
        // Size a fully loaded page plus the transient overflow entry; the
        // codec is fixed-width, so the probe bounds every real page.
        let probe = Page::<K, V, N> {
            kind: PageKind::Internal,
            parent: NO_LINK,
            left: NO_LINK,
            right: NO_LINK,
            entries: vec![KeyPair::default(); N + 1],
            children: vec![0; N + 1],
        };
        encoded_len(&probe).expect("page footprint probe")
    }
}
