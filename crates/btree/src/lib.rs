//! Persistent multi-value B+ tree index.
//!
//! The tree is an ordered multimap over a composite key `(key, value)`:
//! compare by key first, break ties by value, so one user key can hold many
//! values while the whole structure keeps a single total order. Internal
//! nodes route by subtree maximum, leaves form a doubly-linked chain for
//! in-order walks, and rebalancing goes borrow-from-left, borrow-from-right,
//! then merge.
//!
//! Pages live in a [`buffer::BufferPool`]; every structural operation pins
//! the pages it mutates through scoped guards and releases them before
//! recursing toward the root, so even a tiny cache can admit the ancestors.
//!
//! # Example
//!
//! ```no_run
//! use btree::BPlusTree;
//! use common::StoreConfig;
//!
//! let mut tree: BPlusTree<i64, i32> =
//!     BPlusTree::open("index.dat".as_ref(), &StoreConfig::default()).unwrap();
//! tree.insert(7, 1).unwrap();
//! tree.insert(7, 2).unwrap();
//! assert_eq!(tree.find_all(&7).unwrap(), vec![1, 2]);
//! tree.erase(&7, &1).unwrap();
//! assert_eq!(tree.find(&7).unwrap(), Some(2));
//! ```

mod page;

pub use page::{KeyPair, Page, PageKind};

use std::fmt::Debug;
use std::path::Path;

use buffer::BufferPool;
use common::{DiskPos, StoreConfig, StoreError, StoreResult, NO_LINK, NO_PAGE};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bounds every key and value type stored in the tree must satisfy: a
/// natural total order plus a fixed-footprint serde image.
pub trait TreeItem: Ord + Clone + Default + Debug + Serialize + DeserializeOwned {}

impl<T: Ord + Clone + Default + Debug + Serialize + DeserializeOwned> TreeItem for T {}

/// What the descent loop decided at one node.
enum Step {
    Descend(DiskPos),
    Inserted { split: bool },
}

/// How `balance` handles the root.
enum RootAction {
    Rebalance,
    Keep,
    Drain,
    Collapse(DiskPos),
}

/// Disk-backed ordered multimap with composite-key ordering.
pub struct BPlusTree<K: TreeItem, V: TreeItem, const N: usize = 200> {
    pool: BufferPool<Page<K, V, N>>,
    root: DiskPos,
}

impl<K: TreeItem, V: TreeItem, const N: usize> BPlusTree<K, V, N> {
    /// Open (or create) the index file and load the root offset.
    ///
    /// # Panics
    ///
    /// Panics if `N` is odd or smaller than 4.
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        assert!(N >= 4 && N % 2 == 0, "slot count must be an even number >= 4");
        let mut pool = BufferPool::open(path, config)?;
        let root = pool.root_pos()?;
        Ok(Self { pool, root })
    }

    /// True when the tree holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.root == NO_PAGE
    }

    /// First value stored under `key`, in composite order, if any.
    pub fn find(&mut self, key: &K) -> StoreResult<Option<V>> {
        if self.root == NO_PAGE {
            return Ok(None);
        }
        let leaf = self.descend_by_key(key)?;
        let frame = self.pool.get(leaf)?;
        let page = frame.borrow();
        if page.is_empty() {
            return Ok(None);
        }
        let slot = page.lower_bound_key(key);
        if page.entries[slot].key == *key {
            Ok(Some(page.entries[slot].val.clone()))
        } else {
            Ok(None)
        }
    }

    /// Every value stored under `key`, in composite order, walking the leaf
    /// chain across page boundaries.
    pub fn find_all(&mut self, key: &K) -> StoreResult<Vec<V>> {
        let mut out = Vec::new();
        if self.root == NO_PAGE {
            return Ok(out);
        }
        let mut pos = self.descend_by_key(key)?;
        let mut slot = {
            let frame = self.pool.get(pos)?;
            let page = frame.borrow();
            if page.is_empty() {
                return Ok(out);
            }
            page.lower_bound_key(key)
        };
        loop {
            let frame = self.pool.get(pos)?;
            let page = frame.borrow();
            if slot >= page.len() || page.entries[slot].key != *key {
                break;
            }
            out.push(page.entries[slot].val.clone());
            if slot + 1 < page.len() {
                slot += 1;
                continue;
            }
            if page.right == NO_LINK {
                break;
            }
            pos = page.right;
            slot = 0;
        }
        Ok(out)
    }

    /// Insert the composite key `(key, val)`. Re-inserting an existing pair
    /// is a no-op. Routing maxima are raised on the way down, because the new
    /// pair may exceed the current maximum of every subtree on its path.
    pub fn insert(&mut self, key: K, val: V) -> StoreResult<()> {
        let pair = KeyPair::new(key, val);
        if self.root == NO_PAGE {
            let mut page = Page::new(PageKind::Leaf);
            page.entries.push(pair);
            self.root = self.pool.insert_page(page)?;
            return Ok(());
        }
        let mut pos = self.root;
        loop {
            let guard = self.pool.get_mut(pos)?;
            let step = {
                let mut page = guard.borrow_mut();
                if page.is_leaf() {
                    if page.is_empty() {
                        page.entries.push(pair.clone());
                        Step::Inserted { split: false }
                    } else {
                        let slot = page.lower_bound(&pair);
                        if page.entries[slot] == pair {
                            Step::Inserted { split: false }
                        } else {
                            if page.entries[slot] < pair {
                                // Sentinel slot: the new pair goes after the
                                // current maximum.
                                page.entries.insert(slot + 1, pair.clone());
                            } else {
                                page.entries.insert(slot, pair.clone());
                            }
                            Step::Inserted {
                                split: page.is_full(),
                            }
                        }
                    }
                } else {
                    let slot = page.lower_bound(&pair);
                    if page.entries[slot] < pair {
                        page.entries[slot] = pair.clone();
                    }
                    Step::Descend(page.children[slot])
                }
            };
            drop(guard);
            match step {
                Step::Descend(next) => pos = next,
                Step::Inserted { split } => {
                    if split {
                        self.split(pos)?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Remove the composite key `(key, val)` if present; anything else is a
    /// no-op. When the leaf's maximum was removed, ancestor routing keys that
    /// still carry it are rewritten on the way up.
    pub fn erase(&mut self, key: &K, val: &V) -> StoreResult<()> {
        if self.root == NO_PAGE {
            return Ok(());
        }
        let pair = KeyPair::new(key.clone(), val.clone());
        let pos = self.descend_by_pair(&pair)?;

        let (new_max, mut ancestor) = {
            let guard = self.pool.get_mut(pos)?;
            let mut page = guard.borrow_mut();
            if page.is_empty() {
                return Ok(());
            }
            let slot = page.lower_bound(&pair);
            if page.entries[slot] != pair {
                return Ok(());
            }
            page.entries.remove(slot);
            (page.back().cloned(), page.parent)
        };

        if let Some(new_max) = new_max {
            while ancestor != NO_LINK {
                let guard = self.pool.get_mut(ancestor)?;
                let next = {
                    let mut page = guard.borrow_mut();
                    let slot = page.lower_bound(&pair);
                    if page.entries[slot] != pair {
                        break;
                    }
                    page.entries[slot] = new_max.clone();
                    page.parent
                };
                drop(guard);
                ancestor = next;
            }
        }

        let underfull = {
            let frame = self.pool.get(pos)?;
            let result = frame.borrow().is_underfull();
            result
        };
        if underfull {
            self.balance(pos)?;
        }
        Ok(())
    }

    /// In-order dump of the whole tree along the leaf chain
    /// (debugging/testing).
    pub fn scan_all(&mut self) -> StoreResult<Vec<(K, V)>> {
        let mut out = Vec::new();
        if self.root == NO_PAGE {
            return Ok(out);
        }
        let mut pos = self.root;
        loop {
            let frame = self.pool.get(pos)?;
            let next = {
                let page = frame.borrow();
                if page.is_leaf() {
                    break;
                }
                *page.children.first().ok_or_else(|| {
                    StoreError::Index("internal node without children".into())
                })?
            };
            pos = next;
        }
        loop {
            let frame = self.pool.get(pos)?;
            let page = frame.borrow();
            for entry in &page.entries {
                out.push((entry.key.clone(), entry.val.clone()));
            }
            if page.right == NO_LINK {
                break;
            }
            pos = page.right;
        }
        Ok(out)
    }

    /// Drop every entry and truncate the backing file.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.pool.clear()?;
        self.root = NO_PAGE;
        self.pool.set_root_pos(NO_PAGE)
    }

    /// Write the root offset and all dirty pages back to disk.
    pub fn flush(&mut self) -> StoreResult<()> {
        self.pool.set_root_pos(self.root)?;
        self.pool.flush()
    }

    /// Length of the backing file in bytes (testing/inspection).
    pub fn file_len(&self) -> StoreResult<u64> {
        self.pool.file_len()
    }

    fn descend_by_key(&mut self, key: &K) -> StoreResult<DiskPos> {
        let mut pos = self.root;
        loop {
            let frame = self.pool.get(pos)?;
            let next = {
                let page = frame.borrow();
                if page.is_leaf() {
                    return Ok(pos);
                }
                page.children[page.lower_bound_key(key)]
            };
            pos = next;
        }
    }

    fn descend_by_pair(&mut self, pair: &KeyPair<K, V>) -> StoreResult<DiskPos> {
        let mut pos = self.root;
        loop {
            let frame = self.pool.get(pos)?;
            let next = {
                let page = frame.borrow();
                if page.is_leaf() {
                    return Ok(pos);
                }
                page.children[page.lower_bound(pair)]
            };
            pos = next;
        }
    }

    /// Split the full page at `pos` in half, splice the new sibling into the
    /// parent (or grow a new root), and recurse if the parent filled up.
    fn split(&mut self, pos: DiskPos) -> StoreResult<()> {
        let half = N / 2;
        let cur = self.pool.get_mut(pos)?;
        let (kind, parent, old_right) = {
            let page = cur.borrow();
            (page.kind, page.parent, page.right)
        };

        let mut sibling = Page::new(kind);
        sibling.parent = parent;
        if kind == PageKind::Leaf {
            sibling.left = pos;
            sibling.right = old_right;
        }
        {
            let mut page = cur.borrow_mut();
            sibling.entries = page.entries.split_off(half);
            if kind == PageKind::Internal {
                sibling.children = page.children.split_off(half);
            }
        }
        let split_at = cur
            .borrow()
            .back()
            .cloned()
            .ok_or_else(|| StoreError::Index("split emptied a page".into()))?;
        let max_pair = sibling
            .back()
            .cloned()
            .ok_or_else(|| StoreError::Index("split produced an empty sibling".into()))?;

        let sibling_pos = self.pool.insert_page(sibling)?;
        debug!("split page {pos} into {sibling_pos}");

        if kind == PageKind::Internal {
            let moved: Vec<DiskPos> = self.pool.get(sibling_pos)?.borrow().children.clone();
            for child in moved {
                let guard = self.pool.get_mut(child)?;
                guard.borrow_mut().parent = sibling_pos;
            }
        } else {
            if old_right != NO_LINK {
                let guard = self.pool.get_mut(old_right)?;
                guard.borrow_mut().left = sibling_pos;
            }
            cur.borrow_mut().right = sibling_pos;
        }

        if parent != NO_LINK {
            let parent_full = {
                let guard = self.pool.get_mut(parent)?;
                let mut page = guard.borrow_mut();
                let slot = page.lower_bound(&max_pair);
                page.entries[slot] = split_at;
                page.children[slot] = pos;
                page.entries.insert(slot + 1, max_pair);
                page.children.insert(slot + 1, sibling_pos);
                page.is_full()
            };
            drop(cur);
            if parent_full {
                self.split(parent)?;
            }
        } else {
            let mut root = Page::new(PageKind::Internal);
            root.entries = vec![split_at, max_pair];
            root.children = vec![pos, sibling_pos];
            let root_pos = self.pool.insert_page(root)?;
            cur.borrow_mut().parent = root_pos;
            {
                let guard = self.pool.get_mut(sibling_pos)?;
                guard.borrow_mut().parent = root_pos;
            }
            self.root = root_pos;
        }
        Ok(())
    }

    /// Restore the fill invariant for the underfull page at `pos`:
    /// borrow-left, borrow-right, then merge. The root is exempt until it
    /// drains empty or collapses into a single child.
    fn balance(&mut self, pos: DiskPos) -> StoreResult<()> {
        let action = {
            let guard = self.pool.get_mut(pos)?;
            let page = guard.borrow();
            if page.parent != NO_LINK {
                RootAction::Rebalance
            } else if page.is_empty() {
                RootAction::Drain
            } else if !page.is_leaf() && page.len() == 1 {
                RootAction::Collapse(page.children[0])
            } else {
                RootAction::Keep
            }
        };
        match action {
            RootAction::Keep => return Ok(()),
            RootAction::Drain => {
                self.root = NO_PAGE;
                self.pool.free_page(pos)?;
                return Ok(());
            }
            RootAction::Collapse(child) => {
                {
                    let guard = self.pool.get_mut(child)?;
                    guard.borrow_mut().parent = NO_LINK;
                }
                self.root = child;
                self.pool.free_page(pos)?;
                debug!("collapsed root {pos} into {child}");
                return Ok(());
            }
            RootAction::Rebalance => {}
        }
        if self.borrow_left(pos)? {
            return Ok(());
        }
        if self.borrow_right(pos)? {
            return Ok(());
        }
        self.merge(pos)
    }

    /// Move the left sibling's last slot to the front of `pos`. Fails (false)
    /// when there is no left sibling under the same parent or it sits at the
    /// fill floor.
    fn borrow_left(&mut self, pos: DiskPos) -> StoreResult<bool> {
        let cur = self.pool.get_mut(pos)?;
        let (parent, max_pair, is_internal) = {
            let page = cur.borrow();
            if page.parent == NO_LINK {
                return Ok(false);
            }
            let Some(back) = page.back() else {
                return Ok(false);
            };
            (page.parent, back.clone(), !page.is_leaf())
        };

        let par = self.pool.get_mut(parent)?;
        let (slot, sibling_pos) = {
            let page = par.borrow();
            let slot = page.lower_bound(&max_pair);
            if slot == 0 {
                return Ok(false);
            }
            (slot, page.children[slot - 1])
        };

        let sib = self.pool.get_mut(sibling_pos)?;
        if sib.borrow().len() <= N / 2 {
            return Ok(false);
        }

        let (moved, moved_child) = {
            let mut page = sib.borrow_mut();
            let entry = page
                .entries
                .pop()
                .ok_or_else(|| StoreError::Index("borrow from an empty sibling".into()))?;
            let child = if is_internal {
                Some(page.children.pop().ok_or_else(|| {
                    StoreError::Index("internal sibling without children".into())
                })?)
            } else {
                None
            };
            (entry, child)
        };
        {
            let mut page = cur.borrow_mut();
            page.entries.insert(0, moved);
            if let Some(child) = moved_child {
                page.children.insert(0, child);
            }
        }
        if is_internal {
            let adopted = cur.borrow().children[0];
            let guard = self.pool.get_mut(adopted)?;
            guard.borrow_mut().parent = pos;
        }
        if let Some(new_back) = sib.borrow().back().cloned() {
            par.borrow_mut().entries[slot - 1] = new_back;
        }
        Ok(true)
    }

    /// Mirror of `borrow_left` against the right sibling.
    fn borrow_right(&mut self, pos: DiskPos) -> StoreResult<bool> {
        let cur = self.pool.get_mut(pos)?;
        let (parent, max_pair, is_internal) = {
            let page = cur.borrow();
            if page.parent == NO_LINK {
                return Ok(false);
            }
            let Some(back) = page.back() else {
                return Ok(false);
            };
            (page.parent, back.clone(), !page.is_leaf())
        };

        let par = self.pool.get_mut(parent)?;
        let (slot, sibling_pos) = {
            let page = par.borrow();
            let slot = page.lower_bound(&max_pair);
            if slot + 1 >= page.len() {
                return Ok(false);
            }
            (slot, page.children[slot + 1])
        };

        let sib = self.pool.get_mut(sibling_pos)?;
        if sib.borrow().len() <= N / 2 {
            return Ok(false);
        }

        let (moved, moved_child) = {
            let mut page = sib.borrow_mut();
            let entry = page.entries.remove(0);
            let child = if is_internal {
                if page.children.is_empty() {
                    return Err(StoreError::Index(
                        "internal sibling without children".into(),
                    ));
                }
                Some(page.children.remove(0))
            } else {
                None
            };
            (entry, child)
        };
        {
            let mut page = cur.borrow_mut();
            page.entries.push(moved);
            if let Some(child) = moved_child {
                page.children.push(child);
            }
        }
        if is_internal {
            let adopted = {
                let page = cur.borrow();
                page.children[page.len() - 1]
            };
            let guard = self.pool.get_mut(adopted)?;
            guard.borrow_mut().parent = pos;
        }
        if let Some(new_back) = cur.borrow().back().cloned() {
            par.borrow_mut().entries[slot] = new_back;
        }
        Ok(true)
    }

    /// Coalesce `pos` with a sibling (left preferred), remove the emptied
    /// page's slot from the parent, recycle the page, and rebalance the
    /// parent if it dropped below the fill floor.
    fn merge(&mut self, pos: DiskPos) -> StoreResult<()> {
        let cur = self.pool.get_mut(pos)?;
        let (parent, max_pair, is_leaf) = {
            let page = cur.borrow();
            if page.parent == NO_LINK {
                return Ok(());
            }
            let Some(back) = page.back() else {
                return Ok(());
            };
            (page.parent, back.clone(), page.is_leaf())
        };

        let par = self.pool.get_mut(parent)?;
        let (slot, parent_len) = {
            let page = par.borrow();
            (page.lower_bound(&max_pair), page.len())
        };

        if slot > 0 {
            // Fold this page into its left sibling.
            let sibling_pos = par.borrow().children[slot - 1];
            let sib = self.pool.get_mut(sibling_pos)?;
            if !is_leaf {
                let moved: Vec<DiskPos> = cur.borrow().children.clone();
                for child in moved {
                    let guard = self.pool.get_mut(child)?;
                    guard.borrow_mut().parent = sibling_pos;
                }
            }
            {
                let mut target = sib.borrow_mut();
                let mut page = cur.borrow_mut();
                target.entries.append(&mut page.entries);
                target.children.append(&mut page.children);
            }
            if is_leaf {
                let old_right = cur.borrow().right;
                sib.borrow_mut().right = old_right;
                if old_right != NO_LINK {
                    let guard = self.pool.get_mut(old_right)?;
                    guard.borrow_mut().left = sibling_pos;
                }
            }
            let parent_underfull = {
                let mut page = par.borrow_mut();
                page.entries.remove(slot);
                page.children.remove(slot);
                if let Some(new_back) = sib.borrow().back().cloned() {
                    page.entries[slot - 1] = new_back;
                }
                page.is_underfull()
            };
            drop(sib);
            drop(par);
            drop(cur);
            debug!("merged page {pos} into {sibling_pos}");
            self.pool.free_page(pos)?;
            if parent_underfull {
                self.balance(parent)?;
            }
            Ok(())
        } else if slot + 1 < parent_len {
            // Fold the right sibling into this page.
            let sibling_pos = par.borrow().children[slot + 1];
            let sib = self.pool.get_mut(sibling_pos)?;
            if !is_leaf {
                let moved: Vec<DiskPos> = sib.borrow().children.clone();
                for child in moved {
                    let guard = self.pool.get_mut(child)?;
                    guard.borrow_mut().parent = pos;
                }
            }
            {
                let mut target = cur.borrow_mut();
                let mut page = sib.borrow_mut();
                target.entries.append(&mut page.entries);
                target.children.append(&mut page.children);
            }
            if is_leaf {
                let old_right = sib.borrow().right;
                cur.borrow_mut().right = old_right;
                if old_right != NO_LINK {
                    let guard = self.pool.get_mut(old_right)?;
                    guard.borrow_mut().left = pos;
                }
            }
            let parent_underfull = {
                let mut page = par.borrow_mut();
                page.entries.remove(slot + 1);
                page.children.remove(slot + 1);
                if let Some(new_back) = cur.borrow().back().cloned() {
                    page.entries[slot] = new_back;
                }
                page.is_underfull()
            };
            drop(sib);
            drop(par);
            drop(cur);
            debug!("merged page {sibling_pos} into {pos}");
            self.pool.free_page(sibling_pos)?;
            if parent_underfull {
                self.balance(parent)?;
            }
            Ok(())
        } else {
            // Only child: nothing to coalesce with.
            Ok(())
        }
    }
}

impl<K: TreeItem, V: TreeItem, const N: usize> Drop for BPlusTree<K, V, N> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.set_root_pos(self.root) {
            error!("failed to persist root offset: {e}");
        }
        // The pool's own Drop flushes the dirty pages.
    }
}
