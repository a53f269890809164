//! Backing store: the memory that holds a disk's bytes.
//!
//! The store is split into fixed-size chunks, each behind its own lock, so copies to disjoint
//! ranges on different threads only contend when they land in the same chunk. All memory is
//! reserved and zeroed up front; allocation failure surfaces as
//! [`RamdiskError::OutOfMemory`] instead of aborting the process.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::constraint::BlockRange;
use crate::{RamdiskError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub struct BackingStore {
    len: u64,
    chunk_size: usize,
    chunks: Box<[Mutex<Box<[u8]>>]>,
}

impl BackingStore {
    /// Reserves `len` zeroed bytes split into `chunk_size` pieces.
    pub fn allocate(len: u64, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RamdiskError::InvalidConfig("chunk_size must be > 0"));
        }
        let len_usize = usize::try_from(len).map_err(|_| RamdiskError::CapacityOverflow)?;
        let chunk_count = len_usize.div_ceil(chunk_size);

        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(chunk_count)
            .map_err(|_| RamdiskError::OutOfMemory("backing store chunk table"))?;

        let mut remaining = len_usize;
        while remaining > 0 {
            let this_len = remaining.min(chunk_size);
            let mut data = Vec::new();
            data.try_reserve_exact(this_len)
                .map_err(|_| RamdiskError::OutOfMemory("backing store chunk"))?;
            data.resize(this_len, 0);
            chunks.push(Mutex::new(data.into_boxed_slice()));
            remaining -= this_len;
        }

        Ok(Self {
            len,
            chunk_size,
            chunks: chunks.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Hands out the bytes of `range` in chunk-sized pieces.
    ///
    /// `sink` receives the position relative to `range.offset()` and the bytes at that position.
    /// The chunk lock is held for the duration of each call.
    pub fn copy_out<F>(&self, range: BlockRange, mut sink: F) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        self.for_each_piece(range, |pos, chunk, within, len| {
            let chunk = lock(chunk);
            sink(pos, &chunk[within..within + len])
        })
    }

    /// Fills the bytes of `range` in chunk-sized pieces.
    ///
    /// `source` receives the position relative to `range.offset()` and the destination bytes to
    /// fill.
    pub fn copy_in<F>(&self, range: BlockRange, mut source: F) -> Result<()>
    where
        F: FnMut(u64, &mut [u8]) -> Result<()>,
    {
        self.for_each_piece(range, |pos, chunk, within, len| {
            let mut chunk = lock(chunk);
            source(pos, &mut chunk[within..within + len])
        })
    }

    fn for_each_piece<F>(&self, range: BlockRange, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &Mutex<Box<[u8]>>, usize, usize) -> Result<()>,
    {
        if range.is_empty() {
            return Ok(());
        }
        let end = range
            .offset()
            .checked_add(range.len())
            .ok_or(RamdiskError::CapacityOverflow)?;
        if end > self.len {
            return Err(RamdiskError::InvalidGeometry(
                "range exceeds backing store",
            ));
        }

        let chunk_size = self.chunk_size as u64;
        let mut pos = 0u64;
        while pos < range.len() {
            let abs = range.offset() + pos;
            let idx = (abs / chunk_size) as usize;
            let within = (abs % chunk_size) as usize;
            let remaining = range.len() - pos;
            let piece = (self.chunk_size - within).min(remaining as usize);

            f(pos, &self.chunks[idx], within, piece)?;
            pos += piece as u64;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackingStore")
            .field("len", &self.len)
            .field("chunk_size", &self.chunk_size)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

// Chunks hold plain bytes; a panic in a copy callback cannot leave them logically inconsistent.
fn lock(chunk: &Mutex<Box<[u8]>>) -> MutexGuard<'_, Box<[u8]>> {
    chunk.lock().unwrap_or_else(PoisonError::into_inner)
}
