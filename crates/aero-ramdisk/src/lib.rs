//! RAM-backed block devices.
//!
//! A [`Controller`] validates configuration requests, allocates a zeroed [`BackingStore`] per
//! disk and publishes the resulting [`Device`] through a [`DeviceNamespace`]. Devices serve
//! block-aligned I/O through two entry points:
//!
//! - [`Device::submit`]: synchronous [`Transaction`]s against a caller buffer
//! - [`Device::read_async`] / [`Device::write_async`]: copies to or from an [`ExternalRegion`],
//!   completed through a registered [`CompletionSink`]
//!
//! Both paths share [`BlockGeometry::constrain`], which rejects unaligned requests and clamps
//! lengths to the device capacity. All state is volatile.

#![forbid(unsafe_code)]

mod config;
mod constraint;
mod control;
mod controller;
mod device;
mod error;
mod namespace;
mod region;
mod sink;
mod store;
mod txn;

pub use config::{validate_name, ControllerConfig, RamdiskConfig, NAME_MAX};
pub use constraint::{BlockGeometry, BlockRange};
pub use control::{
    BlockInfo, ControlRequest, CONTROL_OP_CONFIG, CONTROL_OP_GET_INFO, CONTROL_OP_GET_NAME,
    CONTROL_OP_REBIND, CONTROL_OP_SYNC, CONTROL_OP_UNLINK,
};
pub use controller::{ControlInstance, Controller};
pub use device::{Device, DeviceId, DeviceState};
pub use error::{ErrorKind, RamdiskError, Result};
pub use namespace::{DeviceNamespace, InMemoryNamespace};
pub use region::{ExternalRegion, RegionError, VecRegion};
pub use sink::{CompletionSink, RequestToken};
pub use store::{BackingStore, DEFAULT_CHUNK_SIZE};
pub use txn::{Completion, Transaction, TXN_OP_READ, TXN_OP_WRITE};

#[cfg(all(test, not(target_arch = "wasm32")))]
mod proptests;
