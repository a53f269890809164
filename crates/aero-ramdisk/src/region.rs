//! Separately addressable memory used by the callback I/O path.
//!
//! Asynchronous requests do not carry a caller buffer. Instead the caller names a region and an
//! offset within it, and the device copies to or from that region.

use std::sync::{Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    #[error("region access out of range: offset={offset} len={len} size={size}")]
    OutOfRange { offset: u64, len: usize, size: u64 },
}

/// Memory region shared between a requester and a device.
///
/// Implementations must be usable from several threads at once; the device never holds a
/// reference to the region beyond a single call.
pub trait ExternalRegion: Send + Sync {
    fn size(&self) -> u64;

    /// Copies bytes at `offset` into `dst`.
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<(), RegionError>;

    /// Copies `src` to `offset`.
    fn write_at(&self, offset: u64, src: &[u8]) -> Result<(), RegionError>;

    /// Checks that `[offset, offset + len)` lies inside the region.
    fn check_range(&self, offset: u64, len: u64) -> Result<(), RegionError> {
        let size = self.size();
        let out_of_range = || RegionError::OutOfRange {
            offset,
            len: usize::try_from(len).unwrap_or(usize::MAX),
            size,
        };
        let end = offset.checked_add(len).ok_or_else(out_of_range)?;
        if end > size {
            return Err(out_of_range());
        }
        Ok(())
    }
}

/// Heap-backed [`ExternalRegion`].
#[derive(Debug, Default)]
pub struct VecRegion {
    mem: Mutex<Vec<u8>>,
}

impl VecRegion {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            mem: Mutex::new(vec![0u8; size_bytes]),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            mem: Mutex::new(data),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.mem
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn span(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>, RegionError> {
        self.check_range(offset, len as u64)?;
        // `check_range` bounds the end by the region size, which is a `usize`.
        let start = offset as usize;
        Ok(start..start + len)
    }
}

impl ExternalRegion for VecRegion {
    fn size(&self) -> u64 {
        self.mem.lock().unwrap_or_else(PoisonError::into_inner).len() as u64
    }

    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<(), RegionError> {
        let span = self.span(offset, dst.len())?;
        let mem = self.mem.lock().unwrap_or_else(PoisonError::into_inner);
        dst.copy_from_slice(&mem[span]);
        Ok(())
    }

    fn write_at(&self, offset: u64, src: &[u8]) -> Result<(), RegionError> {
        let span = self.span(offset, src.len())?;
        let mut mem = self.mem.lock().unwrap_or_else(PoisonError::into_inner);
        mem[span].copy_from_slice(src);
        Ok(())
    }
}
