//! Write-back record cache between the index and the disk layer.
//!
//! The pool owns every cached frame and hands out two kinds of access:
//! - shared read handles (`get`), which promote the frame in the recency
//!   order but do not protect it from eviction;
//! - pinned write guards (`get_mut`), which mark the frame dirty up front and
//!   hold a pin for their whole lifetime. The pin is released when the guard
//!   drops, on every exit path, so a mid-operation page can never be evicted
//!   underneath its user.
//!
//! Eviction scans from the least recently used end and skips pinned frames;
//! when everything is pinned the pool temporarily exceeds its nominal
//! capacity rather than sacrifice a pinned page.
//!
//! # Example
//!
//! ```no_run
//! use buffer::BufferPool;
//! use common::StoreConfig;
//! # use serde::{Serialize, Deserialize};
//! # #[derive(Serialize, Deserialize)]
//! # struct Rec(i64);
//! # impl storage::Record for Rec { fn record_len() -> usize { 8 } }
//!
//! let config = StoreConfig::builder().cache_capacity(4).build();
//! let mut pool: BufferPool<Rec> =
//!     BufferPool::open("index.dat".as_ref(), &config).unwrap();
//!
//! let pos = pool.insert_page(Rec(7)).unwrap();
//! {
//!     let guard = pool.get_mut(pos).unwrap();
//!     guard.borrow_mut().0 = 8;
//! } // pin released here
//! pool.flush().unwrap();
//! ```

#[cfg(test)]
mod tests;

use std::cell::{Ref, RefCell, RefMut};
use std::path::Path;
use std::rc::Rc;

use common::{DiskPos, StoreConfig, StoreResult};
use hashbrown::HashMap;
use log::{debug, error};
use lru::LruCache;
use storage::{DiskFile, Record};

type PinTable = Rc<RefCell<HashMap<DiskPos, usize>>>;

struct Frame<R> {
    page: Rc<RefCell<R>>,
    dirty: bool,
}

/// Pinned mutable handle to a cached record.
///
/// Holding a guard keeps the frame ineligible for eviction; the pin is a
/// count, so overlapping guards for the same offset compose and the frame
/// becomes evictable when the last one drops.
pub struct PageGuard<R> {
    page: Rc<RefCell<R>>,
    pos: DiskPos,
    pins: PinTable,
}

impl<R> PageGuard<R> {
    pub fn pos(&self) -> DiskPos {
        self.pos
    }

    pub fn borrow(&self) -> Ref<'_, R> {
        self.page.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, R> {
        self.page.borrow_mut()
    }
}

impl<R> Drop for PageGuard<R> {
    fn drop(&mut self) {
        let mut pins = self.pins.borrow_mut();
        if let Some(count) = pins.get_mut(&self.pos) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.pos);
            }
        }
    }
}

/// Bounded write-back cache over a `DiskFile`.
pub struct BufferPool<R: Record> {
    disk: DiskFile<R>,
    frames: HashMap<DiskPos, Frame<R>>,
    recency: LruCache<DiskPos, ()>,
    pins: PinTable,
    capacity: usize,
}

impl<R: Record> BufferPool<R> {
    /// Open the backing file and an empty cache.
    ///
    /// # Panics
    ///
    /// Panics if `config.cache_capacity` is 0.
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        assert!(config.cache_capacity > 0, "cache_capacity must be > 0");
        Ok(Self {
            disk: DiskFile::open(path, config)?,
            frames: HashMap::new(),
            // Recency is managed by hand so pinned frames can be skipped.
            recency: LruCache::unbounded(),
            pins: Rc::new(RefCell::new(HashMap::new())),
            capacity: config.cache_capacity,
        })
    }

    /// Shared read handle. A hit promotes the frame; a miss may evict one
    /// unpinned frame before loading from disk.
    pub fn get(&mut self, pos: DiskPos) -> StoreResult<Rc<RefCell<R>>> {
        if let Some(frame) = self.frames.get(&pos) {
            let page = Rc::clone(&frame.page);
            self.recency.promote(&pos);
            return Ok(page);
        }
        self.admit(pos)
    }

    /// Pinned mutable handle. The frame is marked dirty up front, even if the
    /// caller never writes, so no mutation can escape write-back.
    pub fn get_mut(&mut self, pos: DiskPos) -> StoreResult<PageGuard<R>> {
        let page = self.get(pos)?;
        self.mark_dirty(pos);
        *self.pins.borrow_mut().entry(pos).or_insert(0) += 1;
        Ok(PageGuard {
            page,
            pos,
            pins: Rc::clone(&self.pins),
        })
    }

    /// Write a new record through to disk at an allocator-chosen offset and
    /// cache it clean.
    pub fn insert_page(&mut self, page: R) -> StoreResult<DiskPos> {
        if self.frames.len() >= self.capacity {
            self.evict_one()?;
        }
        let pos = self.disk.write(&page)?;
        self.frames.insert(
            pos,
            Frame {
                page: Rc::new(RefCell::new(page)),
                dirty: false,
            },
        );
        self.recency.push(pos, ());
        Ok(pos)
    }

    pub fn mark_dirty(&mut self, pos: DiskPos) {
        if let Some(frame) = self.frames.get_mut(&pos) {
            frame.dirty = true;
        }
    }

    /// Write back every dirty frame and drop the whole cache, recency order
    /// and pin table included.
    pub fn flush(&mut self) -> StoreResult<()> {
        for (pos, frame) in self.frames.iter() {
            if frame.dirty {
                self.disk.update(*pos, &frame.page.borrow())?;
            }
        }
        self.frames.clear();
        self.recency.clear();
        self.pins.borrow_mut().clear();
        Ok(())
    }

    /// Drop the frame without write-back and return its offset to the free
    /// list. The caller must have released every guard for `pos` first.
    pub fn free_page(&mut self, pos: DiskPos) -> StoreResult<()> {
        self.frames.remove(&pos);
        self.recency.pop(&pos);
        self.pins.borrow_mut().remove(&pos);
        self.disk.erase(pos);
        Ok(())
    }

    /// Root offset stored in info slot 1 (0 when the file holds no index).
    pub fn root_pos(&mut self) -> StoreResult<DiskPos> {
        self.disk.info(1)
    }

    pub fn set_root_pos(&mut self, pos: DiskPos) -> StoreResult<()> {
        self.disk.set_info(1, pos)
    }

    /// Reset both the cache and the backing file (testing/reset use).
    pub fn clear(&mut self) -> StoreResult<()> {
        self.frames.clear();
        self.recency.clear();
        self.pins.borrow_mut().clear();
        self.disk.clear()
    }

    /// Length of the backing file in bytes.
    pub fn file_len(&self) -> StoreResult<u64> {
        self.disk.file_len()
    }

    fn admit(&mut self, pos: DiskPos) -> StoreResult<Rc<RefCell<R>>> {
        if self.frames.len() >= self.capacity {
            self.evict_one()?;
        }
        let record = self.disk.read(pos)?;
        let page = Rc::new(RefCell::new(record));
        self.frames.insert(
            pos,
            Frame {
                page: Rc::clone(&page),
                dirty: false,
            },
        );
        self.recency.push(pos, ());
        Ok(page)
    }

    /// Evict the least recently used unpinned frame, if any. With every
    /// frame pinned this is a no-op and the cache runs over capacity.
    fn evict_one(&mut self) -> StoreResult<()> {
        let victim = {
            let pins = self.pins.borrow();
            self.recency
                .iter()
                .rev()
                .map(|(pos, _)| *pos)
                .find(|pos| !pins.contains_key(pos))
        };
        let Some(pos) = victim else {
            return Ok(());
        };
        self.recency.pop(&pos);
        if let Some(frame) = self.frames.remove(&pos) {
            if frame.dirty {
                self.disk.update(pos, &frame.page.borrow())?;
            }
            debug!("evicted frame at {pos}");
        }
        Ok(())
    }
}

impl<R: Record> Drop for BufferPool<R> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("failed to flush buffer pool: {e}");
        }
    }
}
