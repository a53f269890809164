use serde::{Deserialize, Serialize};

use crate::constraint::BlockGeometry;
use crate::store::DEFAULT_CHUNK_SIZE;
use crate::{RamdiskError, Result};

/// Size of the fixed name field in the configuration payload, terminator included.
pub const NAME_MAX: usize = 256;

/// Request to create one disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamdiskConfig {
    pub name: String,
    pub block_size: u64,
    pub block_count: u64,
}

impl RamdiskConfig {
    /// Encoded size: `name[NAME_MAX]` + `block_size: u64 LE` + `block_count: u64 LE`.
    pub const WIRE_SIZE: usize = NAME_MAX + 16;

    pub fn new(name: impl Into<String>, block_size: u64, block_count: u64) -> Self {
        Self {
            name: name.into(),
            block_size,
            block_count,
        }
    }

    /// Checks the name and geometry without allocating anything.
    pub fn validate(&self) -> Result<BlockGeometry> {
        validate_name(&self.name)?;
        BlockGeometry::new(self.block_size, self.block_count)
    }

    /// Parses a configuration payload.
    ///
    /// The last byte of the name field is treated as a terminator regardless of its value, so an
    /// unterminated name is cut to `NAME_MAX - 1` bytes.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::WIRE_SIZE {
            return Err(RamdiskError::InvalidConfig("payload size mismatch"));
        }

        let name_field = &payload[..NAME_MAX - 1];
        let name_len = name_field
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(name_field.len());
        let name = std::str::from_utf8(&name_field[..name_len])
            .map_err(|_| RamdiskError::InvalidName("name is not valid UTF-8"))?
            .to_string();

        let block_size = read_u64_le(payload, NAME_MAX);
        let block_count = read_u64_le(payload, NAME_MAX + 8);

        Ok(Self {
            name,
            block_size,
            block_count,
        })
    }

    pub fn encode(&self) -> Result<[u8; Self::WIRE_SIZE]> {
        validate_name(&self.name)?;
        let mut out = [0u8; Self::WIRE_SIZE];
        out[..self.name.len()].copy_from_slice(self.name.as_bytes());
        out[NAME_MAX..NAME_MAX + 8].copy_from_slice(&self.block_size.to_le_bytes());
        out[NAME_MAX + 8..].copy_from_slice(&self.block_count.to_le_bytes());
        Ok(out)
    }
}

fn read_u64_le(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RamdiskError::InvalidName("name is empty"));
    }
    if name.len() > NAME_MAX - 1 {
        return Err(RamdiskError::InvalidName("name is too long"));
    }
    if name.contains('/') {
        return Err(RamdiskError::InvalidName("name contains a path separator"));
    }
    if name.contains('\0') {
        return Err(RamdiskError::InvalidName("name contains a NUL byte"));
    }
    Ok(())
}

/// Controller-wide limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Allocation granularity of each backing store.
    pub chunk_size: usize,
    /// Upper bound on the summed capacity of all live disks.
    pub max_total_bytes: Option<u64>,
    /// Upper bound on the number of live disks.
    pub max_devices: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_total_bytes: None,
            max_devices: None,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RamdiskError::InvalidConfig("chunk_size must be > 0"));
        }
        Ok(())
    }
}
