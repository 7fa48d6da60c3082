//! Striped Data File
//!
//! Several handles opened on the same data file, each behind its own mutex
//! guarding a seek followed by a read or write. Requests for a key always go
//! to the same handle, so readers of unrelated keys do not queue behind one
//! another.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::store::element::ElementKey;
use crate::error::Result;

/// Data file accessed through a power-of-two number of handles
pub struct StripedFile {
    path: PathBuf,
    handles: Box<[Mutex<File>]>,
}

impl StripedFile {
    /// Open (creating if needed) `path` with `stripes` handles
    pub fn open(path: &Path, stripes: usize) -> Result<Self> {
        let stripes = stripes.max(1).next_power_of_two();
        let mut handles = Vec::with_capacity(stripes);
        for _ in 0..stripes {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;
            handles.push(Mutex::new(file));
        }
        Ok(Self {
            path: path.to_path_buf(),
            handles: handles.into_boxed_slice(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stripe_count(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    fn handle_for(&self, key: &ElementKey) -> &Mutex<File> {
        &self.handles[key.stripe_index(self.handles.len())]
    }

    /// Read exactly `len` bytes at `offset`
    pub fn read_at(&self, key: &ElementKey, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut file = self.handle_for(key).lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write all of `data` at `offset`
    pub fn write_at(&self, key: &ElementKey, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.handle_for(key).lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Current file length
    pub fn len(&self) -> Result<u64> {
        let file = self.handles[0].lock();
        Ok(file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate or extend the file
    pub fn set_len(&self, len: u64) -> Result<()> {
        let file = self.handles[0].lock();
        file.set_len(len)?;
        Ok(())
    }

    /// Flush file contents to stable storage
    pub fn sync(&self) -> Result<()> {
        let file = self.handles[0].lock();
        file.sync_data()?;
        Ok(())
    }
}

impl std::fmt::Debug for StripedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripedFile")
            .field("path", &self.path)
            .field("stripes", &self.handles.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
