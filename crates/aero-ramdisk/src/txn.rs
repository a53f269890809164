use crate::{RamdiskError, Result};

pub const TXN_OP_READ: u32 = 1;
pub const TXN_OP_WRITE: u32 = 2;

/// Outcome of a submitted [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: Result<()>,
    /// Bytes moved between the caller buffer and the device.
    pub actual: u64,
}

impl Completion {
    pub fn ok(actual: u64) -> Self {
        Self {
            status: Ok(()),
            actual,
        }
    }

    pub fn err(err: RamdiskError) -> Self {
        Self {
            status: Err(err),
            actual: 0,
        }
    }
}

/// One synchronous read or write request against a device.
///
/// `opcode` is kept raw so that unknown opcodes coming off a transport can be completed with an
/// error instead of being rejected at decode time. Only the first `length` bytes of `data` are
/// touched; `length` may be lowered by clamping at submission.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub opcode: u32,
    pub offset: u64,
    pub length: u64,
    pub data: Vec<u8>,
    pub completion: Option<Completion>,
}

impl Transaction {
    /// Read of `length` bytes at `offset` into a zeroed buffer.
    pub fn read(offset: u64, length: usize) -> Self {
        Self::new(TXN_OP_READ, offset, vec![0u8; length])
    }

    /// Write of `data` at `offset`.
    pub fn write(offset: u64, data: Vec<u8>) -> Self {
        Self::new(TXN_OP_WRITE, offset, data)
    }

    pub fn new(opcode: u32, offset: u64, data: Vec<u8>) -> Self {
        Self {
            opcode,
            offset,
            length: data.len() as u64,
            data,
            completion: None,
        }
    }

    /// Sets the requested length independently of the buffer size.
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    /// The bytes covered by the completed transfer.
    pub fn transferred(&self) -> &[u8] {
        let actual = self.completion.as_ref().map_or(0, |c| c.actual);
        &self.data[..actual as usize]
    }
}
