//! Record-oriented storage over a single flat file.
//!
//! The file starts with a small metadata header of 8-byte slots, followed by
//! fixed-footprint records addressed by absolute byte offset (`DiskPos`).
//! Freed record slots are recycled through a free list that survives clean
//! shutdowns:
//! - slot 1 holds the root offset of the index stored in the file,
//! - slot 2 holds the free-list length,
//! - slots 3.. hold the free list inline when it fits; otherwise the list
//!   spills into a `<name>.free_list.dat` side file.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DiskPos, StoreConfig, StoreError, StoreResult};
use log::{debug, error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

const INFO_SLOT_BYTES: u64 = 8;

/// First header slot available to the inline free list.
const FREE_LIST_FIRST_SLOT: usize = 3;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Encoded size of a value under the storage codec (little-endian,
/// fixed-width integers). Used by record types to probe their footprint.
pub fn encoded_len<T: Serialize>(value: &T) -> StoreResult<usize> {
    let bytes = encode_to_vec(value, bincode_config())
        .map_err(|e| StoreError::Storage(format!("footprint probe failed: {e}")))?;
    Ok(bytes.len())
}

/// A value with a fixed on-disk footprint.
///
/// `record_len()` is the slot width in bytes; every value of the type must
/// encode to at most that many bytes, independent of its contents (fixed-width
/// fields only, no strings or unbounded collections).
pub trait Record: Serialize + DeserializeOwned {
    fn record_len() -> usize;
}

/// Typed random access to records in one flat file, plus the metadata
/// header and the recyclable free list.
pub struct DiskFile<R: Record> {
    file: File,
    path: PathBuf,
    record_len: u64,
    info_slots: usize,
    reuse: bool,
    free: Vec<DiskPos>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> DiskFile<R> {
    /// Open an existing data file or create a new one with a zeroed header.
    /// With `reuse_freed_pages` enabled, the persisted free list is restored.
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut disk = Self {
            file,
            path: path.to_path_buf(),
            record_len: R::record_len() as u64,
            info_slots: config.info_slots,
            reuse: config.reuse_freed_pages,
            free: Vec::new(),
            _record: PhantomData,
        };

        let len = disk.file.metadata()?.len();
        if len == 0 {
            debug!("creating data file {}", disk.path.display());
            disk.write_zeroed_header()?;
        } else if len < disk.header_len() {
            return Err(StoreError::Storage(format!(
                "data file {} shorter than its header ({len} bytes)",
                disk.path.display()
            )));
        } else if disk.reuse {
            disk.restore_free_list()?;
        }

        Ok(disk)
    }

    fn header_len(&self) -> u64 {
        self.info_slots as u64 * INFO_SLOT_BYTES
    }

    fn write_zeroed_header(&mut self) -> StoreResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&vec![0u8; self.header_len() as usize])?;
        Ok(())
    }

    fn check_slot(&self, idx: usize) -> StoreResult<()> {
        if idx < 1 || idx > self.info_slots {
            return Err(StoreError::Storage(format!(
                "info slot {idx} out of range 1..={}",
                self.info_slots
            )));
        }
        Ok(())
    }

    /// Read the `idx`-th metadata slot (1-indexed).
    pub fn info(&mut self, idx: usize) -> StoreResult<i64> {
        self.check_slot(idx)?;
        self.file
            .seek(SeekFrom::Start((idx as u64 - 1) * INFO_SLOT_BYTES))?;
        let mut buf = [0u8; INFO_SLOT_BYTES as usize];
        self.file.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Overwrite the `idx`-th metadata slot (1-indexed).
    pub fn set_info(&mut self, idx: usize, value: i64) -> StoreResult<()> {
        self.check_slot(idx)?;
        self.file
            .seek(SeekFrom::Start((idx as u64 - 1) * INFO_SLOT_BYTES))?;
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Read the record at `pos`.
    pub fn read(&mut self, pos: DiskPos) -> StoreResult<R> {
        self.check_pos(pos)?;
        self.file.seek(SeekFrom::Start(pos as u64))?;
        let mut buf = vec![0u8; self.record_len as usize];
        self.file.read_exact(&mut buf)?;
        let (record, _) = decode_from_slice(&buf, bincode_config())
            .map_err(|e| StoreError::Storage(format!("decode record at {pos} failed: {e}")))?;
        Ok(record)
    }

    /// Overwrite the record at `pos`.
    pub fn update(&mut self, pos: DiskPos, record: &R) -> StoreResult<()> {
        self.check_pos(pos)?;
        let buf = self.encode_padded(record)?;
        self.file.seek(SeekFrom::Start(pos as u64))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Write a record into a recycled slot when one is available, otherwise
    /// append at end of file. Returns the offset it landed at.
    pub fn write(&mut self, record: &R) -> StoreResult<DiskPos> {
        if let Some(pos) = self.free.pop() {
            self.update(pos, record)?;
            return Ok(pos);
        }
        let pos = self.file.seek(SeekFrom::End(0))?;
        let buf = self.encode_padded(record)?;
        self.file.write_all(&buf)?;
        Ok(pos as DiskPos)
    }

    /// Return a record slot to the free list. With reuse disabled the offset
    /// simply leaks; the file is never truncated.
    pub fn erase(&mut self, pos: DiskPos) {
        if self.reuse {
            self.free.push(pos);
        }
    }

    /// Truncate the file back to an empty (zero-header) state.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.file.set_len(0)?;
        self.write_zeroed_header()?;
        self.free.clear();
        Ok(())
    }

    /// Current file length in bytes.
    pub fn file_len(&self) -> StoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Number of offsets currently waiting for reuse.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    fn check_pos(&self, pos: DiskPos) -> StoreResult<()> {
        if pos < self.header_len() as DiskPos {
            return Err(StoreError::Storage(format!(
                "record offset {pos} inside the header"
            )));
        }
        Ok(())
    }

    fn encode_padded(&self, record: &R) -> StoreResult<Vec<u8>> {
        let bytes = encode_to_vec(record, bincode_config())
            .map_err(|e| StoreError::Storage(format!("encode record failed: {e}")))?;
        if bytes.len() > self.record_len as usize {
            return Err(StoreError::Storage(format!(
                "record too large: {} bytes (slot is {})",
                bytes.len(),
                self.record_len
            )));
        }
        let mut buf = vec![0u8; self.record_len as usize];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(buf)
    }

    fn side_file_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".free_list.dat");
        PathBuf::from(name)
    }

    fn inline_capacity(&self) -> usize {
        self.info_slots.saturating_sub(FREE_LIST_FIRST_SLOT - 1)
    }

    /// Persist the free list: length into slot 2, entries inline when they
    /// fit, otherwise into the side file (overwritten whole).
    fn persist_free_list(&mut self) -> StoreResult<()> {
        self.set_info(2, self.free.len() as i64)?;
        if self.free.len() <= self.inline_capacity() {
            let entries = self.free.clone();
            for (i, pos) in entries.iter().enumerate() {
                self.set_info(FREE_LIST_FIRST_SLOT + i, *pos)?;
            }
            return Ok(());
        }
        let mut side = File::create(self.side_file_path())?;
        for pos in &self.free {
            side.write_all(&pos.to_le_bytes())?;
        }
        Ok(())
    }

    /// Restore the free list persisted by the previous clean shutdown. The
    /// side file is consulted only when the recorded length exceeded the
    /// inline header capacity; if it is missing the freed pages are dropped.
    fn restore_free_list(&mut self) -> StoreResult<()> {
        let count = self.info(2)? as usize;
        if count == 0 {
            return Ok(());
        }
        if count <= self.inline_capacity() {
            for i in 0..count {
                let pos = self.info(FREE_LIST_FIRST_SLOT + i)?;
                self.free.push(pos);
            }
            return Ok(());
        }
        let side_path = self.side_file_path();
        let mut side = match File::open(&side_path) {
            Ok(file) => file,
            Err(_) => {
                warn!(
                    "free list side file {} missing, discarding {count} free pages",
                    side_path.display()
                );
                return Ok(());
            }
        };
        let mut buf = [0u8; INFO_SLOT_BYTES as usize];
        for _ in 0..count {
            side.read_exact(&mut buf)?;
            self.free.push(i64::from_le_bytes(buf));
        }
        debug!("restored {count} free pages from {}", side_path.display());
        Ok(())
    }
}

impl<R: Record> Drop for DiskFile<R> {
    fn drop(&mut self) {
        if self.reuse {
            if let Err(e) = self.persist_free_list() {
                error!("failed to persist free list for {}: {e}", self.path.display());
            }
        }
        if let Err(e) = self.file.flush() {
            error!("failed to flush {}: {e}", self.path.display());
        }
    }
}
