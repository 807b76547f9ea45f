//! Persisted mapping table.
//!
//! Image layout at `base`, little-endian:
//!
//! ```text
//! [u16 magic][NUM_TOTAL_MAPS x (u8 tag, 4 x u16 code)]
//! ```
//!
//! The marker and the table always go out in one `write`, so a table is
//! never stored without its marker.

use core::fmt;

use embedded_storage::{ReadStorage, Storage};

use crate::config::{STORAGE_ERASED_MAGIC, STORAGE_MAGIC};
use crate::keymap::{Keymap, TABLE_BYTES};
use crate::stats::Usage;

const MAGIC_BYTES: usize = 2;
pub const IMAGE_BYTES: usize = MAGIC_BYTES + TABLE_BYTES;

#[derive(Debug)]
pub enum StorageError<E> {
    /// Underlying storage driver error.
    Bus(E),
    /// Region is smaller than the image or runs past the end of the storage.
    OutOfRange,
}

impl<E> From<E> for StorageError<E> {
    fn from(e: E) -> Self {
        StorageError::Bus(e)
    }
}

impl<E: fmt::Debug> fmt::Display for StorageError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageError::Bus(e) => write!(f, "storage error: {:?}", e),
            StorageError::OutOfRange => write!(f, "config image does not fit in storage"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Marker matched, table read back.
    Restored,
    /// Marker missing, an all-`None` table was written.
    Initialized,
}

pub struct ConfigStore<S> {
    storage: S,
    base: u32,
    len: usize,
}

impl<S> ConfigStore<S>
where
    S: Storage,
{
    /// Store the image in the `len` bytes starting at `base`.
    pub fn new(storage: S, base: u32, len: usize) -> Self {
        Self { storage, base, len }
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn check_range(&self) -> Result<(), StorageError<S::Error>> {
        let end = self.base as usize + self.len;
        if IMAGE_BYTES > self.len || end > self.storage.capacity() {
            return Err(StorageError::OutOfRange);
        }
        Ok(())
    }

    /// Read the table into `keymap`. Uninitialised or invalidated storage is
    /// healed: the table is cleared and saved with a valid marker.
    pub fn load(&mut self, keymap: &mut Keymap) -> Result<LoadOutcome, StorageError<S::Error>> {
        self.check_range()?;

        let mut magic = [0u8; MAGIC_BYTES];
        self.storage.read(self.base, &mut magic)?;

        if u16::from_le_bytes(magic) == STORAGE_MAGIC {
            let mut table = [0u8; TABLE_BYTES];
            self.storage.read(self.base + MAGIC_BYTES as u32, &mut table)?;
            *keymap = Keymap::decode(&table);
            log::info!("config restored from storage");
            return Ok(LoadOutcome::Restored);
        }

        log::warn!("no valid config marker, writing empty table");
        keymap.clear();
        self.save(keymap)?;
        Ok(LoadOutcome::Initialized)
    }

    pub fn save(&mut self, keymap: &Keymap) -> Result<(), StorageError<S::Error>> {
        self.check_range()?;

        let mut image = [0u8; IMAGE_BYTES];
        image[..MAGIC_BYTES].copy_from_slice(&STORAGE_MAGIC.to_le_bytes());
        let table: &mut [u8; TABLE_BYTES] = (&mut image[MAGIC_BYTES..])
            .try_into()
            .map_err(|_| StorageError::OutOfRange)?;
        keymap.encode(table);

        self.storage.write(self.base, &image)?;
        Ok(())
    }

    /// Overwrite the marker only; the next `load` starts from scratch.
    pub fn invalidate(&mut self) -> Result<(), StorageError<S::Error>> {
        self.check_range()?;
        self.storage
            .write(self.base, &STORAGE_ERASED_MAGIC.to_le_bytes())?;
        Ok(())
    }

    /// Bytes taken by the image versus the size of the region.
    pub fn usage(&self) -> Usage {
        Usage::new(IMAGE_BYTES, self.len)
    }
}
