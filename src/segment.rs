use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::SegmentError;

const MAGIC: &[u8; 4] = b"LGMP";

/// A typed handle around an LGMP shared-memory segment.
///
/// Reads are unsynchronized 32-bit loads, writes are plain stores (spec.md
/// §4.1, §9): the producer polls rather than signalling, and the word space
/// is partitioned so that the client and the producer never write the same
/// word. This type only exposes word-granular access and raw byte slices so
/// that partition is enforced at the API surface rather than by convention.
pub struct SegmentMap {
    path: PathBuf,
    mmap: MmapMut,
}

impl SegmentMap {
    /// Opens `path` read-write, maps the entire file, and verifies the
    /// magic tag. `min_size`, when given, is checked against the file size
    /// so a geometry mismatch is caught at startup rather than at first
    /// frame read.
    pub fn open(path: impl AsRef<Path>, min_size: Option<u64>) -> Result<Self, SegmentError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SegmentError::NotFound(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SegmentError::MapFailed {
                path: path.to_path_buf(),
                source,
            })?;

        let actual = file
            .metadata()
            .map_err(|source| SegmentError::MapFailed {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        if let Some(needed) = min_size {
            if actual < needed {
                return Err(SegmentError::TooSmall {
                    path: path.to_path_buf(),
                    actual,
                    needed,
                });
            }
        }

        // SAFETY: the file is kept open for the mapping's lifetime via the
        // `MmapMut` itself; we do not assume exclusive access to the
        // underlying file — concurrent modification by the producer is the
        // entire point of this type.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| SegmentError::MapFailed {
            path: path.to_path_buf(),
            source,
        })?;

        if mmap.len() < 4 || &mmap[..4] != MAGIC {
            return Err(SegmentError::NotLgmp(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    fn check_bounds(&self, off: usize, len: usize) -> Result<(), SegmentError> {
        if off.checked_add(len).map_or(true, |end| end > self.mmap.len()) {
            return Err(SegmentError::OutOfBounds {
                offset: off,
                len,
                size: self.mmap.len(),
            });
        }
        Ok(())
    }

    /// Unaligned-safe little-endian load.
    pub fn read_u32(&self, off: usize) -> Result<u32, SegmentError> {
        self.check_bounds(off, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.mmap[off..off + 4]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Unaligned-safe little-endian store. This is a plain store, not a
    /// read-modify-write: callers that need to OR bits in must read first
    /// (spec.md §4.1 — the protocol tolerates this because the producer
    /// never writes the words the client writes).
    pub fn write_u32(&mut self, off: usize, v: u32) -> Result<(), SegmentError> {
        self.check_bounds(off, 4)?;
        self.mmap[off..off + 4].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Borrows an immutable byte range.
    pub fn slice(&self, off: usize, len: usize) -> Result<&[u8], SegmentError> {
        self.check_bounds(off, len)?;
        Ok(&self.mmap[off..off + len])
    }
}
