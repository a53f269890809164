//! A single RAM-backed block device.
//!
//! Both I/O entry points ([`Device::submit`] for transactions and
//! [`Device::read_async`]/[`Device::write_async`] for region-based requests) are thin adapters
//! over one routine that checks the device is live, constrains the request and copies through
//! the backing store. Nothing else indexes the store.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::constraint::{BlockGeometry, BlockRange};
use crate::namespace::DeviceNamespace;
use crate::region::ExternalRegion;
use crate::sink::{CompletionSink, RequestToken};
use crate::store::BackingStore;
use crate::txn::{Completion, Transaction, TXN_OP_READ, TXN_OP_WRITE};
use crate::{RamdiskError, Result};

/// Identity of a device, unique for the lifetime of the controller that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ramdisk#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Published and serving I/O.
    Live,
    /// Removed from the namespace; new I/O is refused.
    Unbinding,
    /// Torn down; every operation fails with [`RamdiskError::NotFound`].
    Released,
}

const STATE_LIVE: u8 = 0;
const STATE_UNBINDING: u8 = 1;
const STATE_RELEASED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Device to requester.
    Read,
    /// Requester to device.
    Write,
}

/// The requester's side of a copy.
trait TransferPeer {
    /// Checks that `len` bytes can be moved before any byte is copied.
    fn reserve(&self, len: u64) -> Result<()>;
    /// Receives device bytes at `pos` (relative to the start of the transfer).
    fn put(&mut self, pos: u64, src: &[u8]) -> Result<()>;
    /// Supplies bytes destined for the device at `pos`.
    fn take(&mut self, pos: u64, dst: &mut [u8]) -> Result<()>;
}

struct BufferPeer<'a> {
    buf: &'a mut [u8],
}

impl TransferPeer for BufferPeer<'_> {
    fn reserve(&self, len: u64) -> Result<()> {
        if (self.buf.len() as u64) < len {
            return Err(RamdiskError::ShortBuffer {
                required: len,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    fn put(&mut self, pos: u64, src: &[u8]) -> Result<()> {
        let pos = pos as usize;
        self.buf[pos..pos + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn take(&mut self, pos: u64, dst: &mut [u8]) -> Result<()> {
        let pos = pos as usize;
        dst.copy_from_slice(&self.buf[pos..pos + dst.len()]);
        Ok(())
    }
}

struct RegionPeer<'a> {
    region: &'a dyn ExternalRegion,
    base: u64,
}

impl TransferPeer for RegionPeer<'_> {
    fn reserve(&self, len: u64) -> Result<()> {
        Ok(self.region.check_range(self.base, len)?)
    }

    fn put(&mut self, pos: u64, src: &[u8]) -> Result<()> {
        Ok(self.region.write_at(self.base + pos, src)?)
    }

    fn take(&mut self, pos: u64, dst: &mut [u8]) -> Result<()> {
        Ok(self.region.read_at(self.base + pos, dst)?)
    }
}

pub struct Device {
    id: DeviceId,
    name: String,
    geometry: BlockGeometry,
    store: BackingStore,
    sink: RwLock<Option<Arc<dyn CompletionSink>>>,
    state: AtomicU8,
    namespace: Arc<dyn DeviceNamespace>,
}

impl Device {
    /// Builds a device around an already allocated store.
    ///
    /// The store must be exactly `geometry.capacity_bytes()` long.
    pub(crate) fn new(
        id: DeviceId,
        name: String,
        geometry: BlockGeometry,
        store: BackingStore,
        namespace: Arc<dyn DeviceNamespace>,
    ) -> Self {
        debug_assert_eq!(store.len(), geometry.capacity_bytes());
        Self {
            id,
            name,
            geometry,
            store,
            sink: RwLock::new(None),
            state: AtomicU8::new(STATE_LIVE),
            namespace,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> Result<&str> {
        self.ensure_present()?;
        Ok(&self.name)
    }

    pub fn geometry(&self) -> Result<BlockGeometry> {
        self.ensure_present()?;
        Ok(self.geometry)
    }

    /// `(block_size, block_count)` with the count re-derived from the capacity.
    pub fn block_geometry(&self) -> Result<(u64, u64)> {
        let geometry = self.geometry()?;
        Ok((geometry.block_size(), geometry.block_count()))
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.geometry()?.capacity_bytes())
    }

    /// Name the device was registered under, readable in any state.
    pub(crate) fn registered_name(&self) -> &str {
        &self.name
    }

    /// Capacity for quota accounting, readable in any state.
    pub(crate) fn capacity_bytes(&self) -> u64 {
        self.geometry.capacity_bytes()
    }

    pub fn state(&self) -> DeviceState {
        match self.state.load(Ordering::Acquire) {
            STATE_LIVE => DeviceState::Live,
            STATE_UNBINDING => DeviceState::Unbinding,
            _ => DeviceState::Released,
        }
    }

    pub fn is_released(&self) -> bool {
        self.state() == DeviceState::Released
    }

    /// Copies the name into `out`, zero-filling the rest and truncating if `out` is short.
    ///
    /// Returns the number of name bytes copied.
    pub fn copy_name_into(&self, out: &mut [u8]) -> Result<usize> {
        self.ensure_present()?;
        out.fill(0);
        let n = self.name.len().min(out.len());
        out[..n].copy_from_slice(&self.name.as_bytes()[..n]);
        Ok(n)
    }

    /// Replaces the target of future async completions.
    pub fn set_completion_sink(&self, sink: Arc<dyn CompletionSink>) -> Result<()> {
        self.ensure_present()?;
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    pub fn clear_completion_sink(&self) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Serves one synchronous transaction.
    ///
    /// On success the transaction's `length` reflects any clamping. The completion is stored in
    /// the transaction and returned.
    pub fn submit(&self, txn: &mut Transaction) -> Completion {
        let direction = match txn.opcode {
            TXN_OP_READ => Some(Direction::Read),
            TXN_OP_WRITE => Some(Direction::Write),
            _ => None,
        };

        let completion = match direction {
            None => {
                debug!(device = %self.id, opcode = txn.opcode, "rejecting transaction opcode");
                Completion::err(RamdiskError::InvalidOpcode(txn.opcode))
            }
            Some(direction) => {
                let mut peer = BufferPeer {
                    buf: txn.data.as_mut_slice(),
                };
                match self.validate_and_copy(direction, txn.offset, txn.length, &mut peer) {
                    Ok(range) => {
                        txn.length = range.len();
                        Completion::ok(range.len())
                    }
                    Err(err) => Completion::err(err),
                }
            }
        };

        txn.completion = Some(completion.clone());
        completion
    }

    /// Copies `length` device bytes at `device_offset` into `region` at `region_offset`.
    ///
    /// The outcome is delivered to the registered sink exactly once. Fails synchronously, with
    /// nothing copied, when the device has been released or no sink is registered.
    pub fn read_async(
        &self,
        region: &dyn ExternalRegion,
        length: u64,
        region_offset: u64,
        device_offset: u64,
        token: RequestToken,
    ) -> Result<()> {
        self.async_transfer(
            Direction::Read,
            region,
            length,
            region_offset,
            device_offset,
            token,
        )
    }

    /// Copies `length` bytes from `region` at `region_offset` to the device at `device_offset`.
    pub fn write_async(
        &self,
        region: &dyn ExternalRegion,
        length: u64,
        region_offset: u64,
        device_offset: u64,
        token: RequestToken,
    ) -> Result<()> {
        self.async_transfer(
            Direction::Write,
            region,
            length,
            region_offset,
            device_offset,
            token,
        )
    }

    fn async_transfer(
        &self,
        direction: Direction,
        region: &dyn ExternalRegion,
        length: u64,
        region_offset: u64,
        device_offset: u64,
        token: RequestToken,
    ) -> Result<()> {
        self.ensure_present()?;
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sink) = sink else {
            warn!(device = %self.id, token, "async request without a completion sink");
            return Err(RamdiskError::NoCompletionSink);
        };

        let mut peer = RegionPeer {
            region,
            base: region_offset,
        };
        let status = self
            .validate_and_copy(direction, device_offset, length, &mut peer)
            .map(|range| range.len());
        sink.complete(token, status);
        Ok(())
    }

    fn validate_and_copy(
        &self,
        direction: Direction,
        offset: u64,
        length: u64,
        peer: &mut dyn TransferPeer,
    ) -> Result<BlockRange> {
        if self.state() != DeviceState::Live {
            return Err(RamdiskError::NotFound);
        }

        let range = self.geometry.constrain(offset, length).map_err(|err| {
            debug!(device = %self.id, offset, length, "rejecting request: {err}");
            err
        })?;
        peer.reserve(range.len())?;

        match direction {
            Direction::Read => self.store.copy_out(range, |pos, src| peer.put(pos, src))?,
            Direction::Write => self.store.copy_in(range, |pos, dst| peer.take(pos, dst))?,
        }
        Ok(range)
    }

    /// Flushes pending writes. RAM has none, so this only checks the device is present.
    pub fn sync(&self) -> Result<()> {
        self.ensure_present()
    }

    /// Asks the namespace to re-enumerate this device. No device state changes.
    pub fn rebind(&self) -> Result<()> {
        self.ensure_present()?;
        debug!(device = %self.id, name = %self.name, "rebind requested");
        self.namespace.rebind(&self.name)
    }

    /// Marks the device as going away and removes it from the namespace.
    ///
    /// New I/O is refused from this point on. Unbinding twice is harmless; unbinding a released
    /// device is an error.
    pub fn unbind(&self) -> Result<()> {
        match self.state.compare_exchange(
            STATE_LIVE,
            STATE_UNBINDING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                debug!(device = %self.id, name = %self.name, "unbinding");
                self.namespace.remove(&self.name);
                Ok(())
            }
            Err(STATE_UNBINDING) => Ok(()),
            Err(_) => Err(RamdiskError::NotFound),
        }
    }

    /// Tears the device down. May succeed at most once.
    ///
    /// After this returns, every operation on the device fails with
    /// [`RamdiskError::NotFound`]. A copy that passed its liveness check before the release keeps
    /// the device alive through its own reference; the backing store is freed when the last
    /// reference is dropped.
    pub fn release(&self) -> Result<()> {
        let prev = self.state.swap(STATE_RELEASED, Ordering::AcqRel);
        if prev == STATE_RELEASED {
            return Err(RamdiskError::NotFound);
        }
        if prev == STATE_LIVE {
            self.namespace.remove(&self.name);
        }
        self.clear_completion_sink();
        info!(
            device = %self.id,
            name = %self.name,
            capacity = self.geometry.capacity_bytes(),
            "ramdisk released"
        );
        Ok(())
    }

    fn ensure_present(&self) -> Result<()> {
        if self.is_released() {
            return Err(RamdiskError::NotFound);
        }
        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("geometry", &self.geometry)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
