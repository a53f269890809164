//! Control requests addressed to a device or to the controller.
//!
//! Requests arrive as a raw opcode plus a reply buffer; replies are written into that buffer in
//! a fixed little-endian layout.

use crate::constraint::BlockGeometry;
use crate::{RamdiskError, Result};

pub const CONTROL_OP_UNLINK: u32 = 0x0001;
pub const CONTROL_OP_GET_NAME: u32 = 0x0101;
pub const CONTROL_OP_GET_INFO: u32 = 0x0102;
pub const CONTROL_OP_REBIND: u32 = 0x0103;
pub const CONTROL_OP_SYNC: u32 = 0x0104;

/// Controller-level: create a disk from a [`crate::RamdiskConfig`] payload.
pub const CONTROL_OP_CONFIG: u32 = 0x0201;

/// Requests understood by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Remove the device from the namespace and tear it down.
    Unlink,
    /// Copy the NUL-padded name into the reply buffer.
    GetName,
    /// Encode a [`BlockInfo`] into the reply buffer.
    GetInfo,
    /// Ask the namespace to re-enumerate the device.
    Rebind,
    /// Flush; always succeeds on a live device.
    Sync,
}

impl TryFrom<u32> for ControlRequest {
    type Error = RamdiskError;

    fn try_from(op: u32) -> Result<Self> {
        Ok(match op {
            CONTROL_OP_UNLINK => Self::Unlink,
            CONTROL_OP_GET_NAME => Self::GetName,
            CONTROL_OP_GET_INFO => Self::GetInfo,
            CONTROL_OP_REBIND => Self::Rebind,
            CONTROL_OP_SYNC => Self::Sync,
            other => return Err(RamdiskError::Unsupported(other)),
        })
    }
}

/// Geometry record returned by [`ControlRequest::GetInfo`].
///
/// Layout (little-endian): `block_size: u64` at 0, `block_count: u64` at 8, `flags: u32` at 16,
/// four reserved zero bytes at 20.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_size: u64,
    pub block_count: u64,
    /// No flags are defined for RAM disks; always zero when produced by a device.
    pub flags: u32,
}

impl BlockInfo {
    pub const SIZE: usize = 24;

    /// Builds the record, deriving the block count from the capacity.
    pub fn from_geometry(geometry: &BlockGeometry) -> Self {
        Self {
            block_size: geometry.block_size(),
            block_count: geometry.capacity_bytes() / geometry.block_size(),
            flags: 0,
        }
    }

    /// Writes the record at the start of `out`, zeroing the remainder.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<usize> {
        if out.len() < Self::SIZE {
            return Err(RamdiskError::BufferTooSmall {
                required: Self::SIZE,
                available: out.len(),
            });
        }
        out.fill(0);
        out[0..8].copy_from_slice(&self.block_size.to_le_bytes());
        out[8..16].copy_from_slice(&self.block_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.flags.to_le_bytes());
        Ok(Self::SIZE)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::SIZE {
            return Err(RamdiskError::BufferTooSmall {
                required: Self::SIZE,
                available: raw.len(),
            });
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&raw[0..8]);
        let block_size = u64::from_le_bytes(word);
        word.copy_from_slice(&raw[8..16]);
        let block_count = u64::from_le_bytes(word);
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&raw[16..20]);
        Ok(Self {
            block_size,
            block_count,
            flags: u32::from_le_bytes(flags),
        })
    }
}
