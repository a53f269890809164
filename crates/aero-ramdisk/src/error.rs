use thiserror::Error;

use crate::region::RegionError;

pub type Result<T> = std::result::Result<T, RamdiskError>;

/// Coarse classification of a [`RamdiskError`].
///
/// Callers that only need to branch on the failure class (e.g. a transport mapping errors onto
/// status codes) should match on this instead of the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    OutOfMemory,
    NotFound,
    Unsupported,
    AlreadyExists,
    BufferTooSmall,
}

/// Unified error type for RAM disk controller and device operations.
///
/// Every failure is a returned value; no operation in this crate panics on caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RamdiskError {
    #[error("unaligned offset {offset} (block size {block_size})")]
    UnalignedOffset { offset: u64, block_size: u64 },

    #[error("unaligned length {len} (block size {block_size})")]
    UnalignedLength { len: u64, block_size: u64 },

    #[error("caller buffer holds {available} bytes but {required} are needed")]
    ShortBuffer { required: u64, available: usize },

    #[error("invalid device name: {0}")]
    InvalidName(&'static str),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("unsupported transaction opcode {0}")]
    InvalidOpcode(u32),

    #[error("integer overflow while computing device capacity")]
    CapacityOverflow,

    #[error("external region access failed: {0}")]
    ExternalRegion(#[from] RegionError),

    #[error("no completion sink registered")]
    NoCompletionSink,

    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),

    #[error("device {0:?} already exists")]
    AlreadyExists(String),

    #[error("device not found")]
    NotFound,

    #[error("unsupported request {0:#x}")]
    Unsupported(u32),

    #[error("reply buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall { required: usize, available: usize },
}

impl RamdiskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnalignedOffset { .. }
            | Self::UnalignedLength { .. }
            | Self::ShortBuffer { .. }
            | Self::InvalidName(_)
            | Self::InvalidGeometry(_)
            | Self::InvalidConfig(_)
            | Self::InvalidOpcode(_)
            | Self::CapacityOverflow
            | Self::ExternalRegion(_)
            | Self::NoCompletionSink => ErrorKind::InvalidArgument,
            Self::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
        }
    }
}
