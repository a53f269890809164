//! Offset/length validation shared by every I/O path.
//!
//! [`BlockGeometry::constrain`] is the only way to obtain a [`BlockRange`], and a `BlockRange` is
//! the only thing the backing store accepts for indexing. Both the transaction path and the
//! callback path therefore go through exactly the same checks.

use crate::{RamdiskError, Result};

/// Immutable block geometry of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    block_size: u64,
    block_count: u64,
    capacity_bytes: u64,
}

impl BlockGeometry {
    /// Validates `block_size`/`block_count` and computes the capacity.
    ///
    /// The capacity must fit both `u64` and the platform `usize`, since the whole disk is held in
    /// host memory.
    pub fn new(block_size: u64, block_count: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(RamdiskError::InvalidGeometry("block_size must be > 0"));
        }
        if block_count == 0 {
            return Err(RamdiskError::InvalidGeometry("block_count must be > 0"));
        }
        let capacity_bytes = block_size
            .checked_mul(block_count)
            .ok_or(RamdiskError::CapacityOverflow)?;
        usize::try_from(capacity_bytes).map_err(|_| RamdiskError::CapacityOverflow)?;
        Ok(Self {
            block_size,
            block_count,
            capacity_bytes,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Block count as configured.
    pub fn configured_block_count(&self) -> u64 {
        self.block_count
    }

    /// Block count as reported to consumers, always re-derived from the capacity.
    pub fn block_count(&self) -> u64 {
        self.capacity_bytes / self.block_size
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Validates a candidate request and clamps its length to the device capacity.
    ///
    /// - `offset` must be block aligned.
    /// - `length` is clamped to `capacity - offset`; an offset at or past the end clamps to 0,
    ///   which is an accepted no-op.
    /// - the clamped length must be block aligned.
    pub fn constrain(&self, offset: u64, length: u64) -> Result<BlockRange> {
        if offset % self.block_size != 0 {
            return Err(RamdiskError::UnalignedOffset {
                offset,
                block_size: self.block_size,
            });
        }

        let len = length.min(self.capacity_bytes.saturating_sub(offset));

        if len % self.block_size != 0 {
            return Err(RamdiskError::UnalignedLength {
                len,
                block_size: self.block_size,
            });
        }

        Ok(BlockRange { offset, len })
    }
}

/// A validated `(offset, len)` pair produced by [`BlockGeometry::constrain`].
///
/// A non-empty range always satisfies `offset + len <= capacity`. An empty range may carry an
/// offset at or beyond the capacity and never touches memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    offset: u64,
    len: u64,
}

impl BlockRange {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
