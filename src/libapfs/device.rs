//! Device reader (spec.md 2 component 1, 6.1). The embedder's narrow
//! synchronous byte-range interface; the core never assumes a `File`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use crate::libapfs::error::{Error, Result};

/// Positioned byte reads over the backing container image. Implemented by
/// the embedder; `FileDevice` is the default implementation used by the
/// demo binary and the tests.
pub trait Device: Send + Sync {
    fn read_bytes(&self, offset_in_bytes: u64, len: usize) -> Result<Vec<u8>>;
    fn sector_size(&self) -> u32;
    fn num_bytes(&self) -> u64;
    fn is_read_only(&self) -> bool;
}

/// A `Device` backed by a plain `std::fs::File`. Grounded on the teacher's
/// `Volume`, which holds a raw `File` and seeks/reads directly
/// (`file.rs::read_sectors`); here the seek+read pair is factored out behind
/// the `Device` trait since spec.md treats the block device as an external
/// collaborator reached only through `read_bytes`.
pub struct FileDevice {
    file: Mutex<File>,
    len: u64,
    sector_size: u32,
    read_only: bool,
}

impl FileDevice {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::ReadFailed(format!("open {}: {e}", path.as_ref().display())))?;
        let len = file
            .metadata()
            .map_err(|e| Error::ReadFailed(e.to_string()))?
            .len();
        Ok(FileDevice {
            file: Mutex::new(file),
            len,
            sector_size: 512,
            read_only: true,
        })
    }
}

impl Device for FileDevice {
    fn read_bytes(&self, offset_in_bytes: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::ReadFailed("device lock poisoned".into()))?;
        file.seek(SeekFrom::Start(offset_in_bytes))
            .map_err(|e| Error::ReadFailed(e.to_string()))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .map_err(|e| Error::ReadFailed(e.to_string()))?;
        Ok(buf)
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn num_bytes(&self) -> u64 {
        self.len
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// An in-memory `Device`, used by unit and integration tests to exercise the
/// core against a hand-built container image without touching the
/// filesystem.
pub struct MemDevice {
    data: Vec<u8>,
}

impl MemDevice {
    pub fn new(data: Vec<u8>) -> Self {
        MemDevice { data }
    }
}

impl Device for MemDevice {
    fn read_bytes(&self, offset_in_bytes: u64, len: usize) -> Result<Vec<u8>> {
        let start = usize::try_from(offset_in_bytes)
            .map_err(|_| Error::BadParams("offset overflows usize".into()))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::BadParams("offset+len overflow".into()))?;
        self.data
            .get(start..end)
            .map(|s| s.to_vec())
            .ok_or_else(|| Error::ReadFailed(format!("read past end of device at {start}..{end}")))
    }

    fn sector_size(&self) -> u32 {
        512
    }

    fn num_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn is_read_only(&self) -> bool {
        true
    }
}
