//! Factory and registry for RAM disks.
//!
//! A [`Controller`] is an ordinary value: hosts construct one and pass it to whatever needs to
//! create or look up disks, and tests can run several side by side.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::{ControllerConfig, RamdiskConfig};
use crate::control::{BlockInfo, ControlRequest, CONTROL_OP_CONFIG};
use crate::device::{Device, DeviceId};
use crate::namespace::{DeviceNamespace, InMemoryNamespace};
use crate::store::BackingStore;
use crate::{RamdiskError, Result};

#[derive(Default)]
struct Registry {
    devices: BTreeMap<String, Arc<Device>>,
}

impl Registry {
    /// Drops entries for devices released outside the controller.
    fn prune(&mut self) {
        self.devices.retain(|_, dev| !dev.is_released());
    }

    fn allocated_bytes(&self) -> u64 {
        self.devices.values().map(|dev| dev.capacity_bytes()).sum()
    }
}

pub struct Controller {
    config: ControllerConfig,
    namespace: Arc<dyn DeviceNamespace>,
    registry: Mutex<Registry>,
    next_device_id: AtomicU64,
    next_instance_id: AtomicU64,
    open_instances: AtomicUsize,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            config: ControllerConfig::default(),
            namespace: Arc::new(InMemoryNamespace::new()),
            registry: Mutex::default(),
            next_device_id: AtomicU64::new(1),
            next_instance_id: AtomicU64::new(1),
            open_instances: AtomicUsize::new(0),
        }
    }
}

impl Controller {
    pub fn new(config: ControllerConfig, namespace: Arc<dyn DeviceNamespace>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            namespace,
            ..Self::default()
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Validates `config`, allocates a zeroed backing store and publishes the new disk.
    ///
    /// Every check that does not need memory runs before the allocation. If publishing fails the
    /// freshly built device is dropped, which frees its store, and nothing is registered.
    pub fn configure(&self, config: &RamdiskConfig) -> Result<Arc<Device>> {
        let geometry = config.validate()?;
        let capacity = geometry.capacity_bytes();

        let mut registry = self.registry();
        registry.prune();

        if registry.devices.contains_key(&config.name) {
            return Err(RamdiskError::AlreadyExists(config.name.clone()));
        }
        if let Some(max) = self.config.max_devices {
            if registry.devices.len() >= max {
                return Err(RamdiskError::OutOfMemory("device limit reached"));
            }
        }
        if let Some(max) = self.config.max_total_bytes {
            let total = registry
                .allocated_bytes()
                .checked_add(capacity)
                .ok_or(RamdiskError::CapacityOverflow)?;
            if total > max {
                return Err(RamdiskError::OutOfMemory("memory quota exceeded"));
            }
        }

        let store = BackingStore::allocate(capacity, self.config.chunk_size)?;
        let id = DeviceId(self.next_device_id.fetch_add(1, Ordering::Relaxed));
        let device = Arc::new(Device::new(
            id,
            config.name.clone(),
            geometry,
            store,
            self.namespace.clone(),
        ));

        if let Err(err) = self.namespace.publish(&config.name) {
            debug!(name = %config.name, "publishing ramdisk failed: {err}");
            return Err(err);
        }
        registry
            .devices
            .insert(config.name.clone(), device.clone());

        info!(
            device = %id,
            name = %config.name,
            block_size = geometry.block_size(),
            block_count = geometry.block_count(),
            "ramdisk created"
        );
        Ok(device)
    }

    /// Removes `device` from view and tears it down.
    ///
    /// Fails with [`RamdiskError::NotFound`] unless `device` is the very disk registered with
    /// this controller under its name, including when it was already unlinked. The name leaves
    /// the registry and the namespace under one registry lock, so a concurrent `configure` of
    /// the same name sees either both or neither.
    pub fn unlink(&self, device: &Device) -> Result<()> {
        let removed = {
            let mut registry = self.registry();
            registry.prune();
            let name = device.registered_name();
            let registered = registry
                .devices
                .get(name)
                .is_some_and(|found| std::ptr::eq(Arc::as_ptr(found), device));
            if !registered {
                return Err(RamdiskError::NotFound);
            }
            let removed = registry
                .devices
                .remove(name)
                .ok_or(RamdiskError::NotFound)?;
            removed.unbind()?;
            removed
        };
        removed.release()
    }

    /// Tears down the disk published as `name`; used when the host unbinds it.
    pub fn unlink_by_name(&self, name: &str) -> Result<()> {
        let device = self.lookup(name).ok_or(RamdiskError::NotFound)?;
        self.unlink(&device)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Device>> {
        let mut registry = self.registry();
        registry.prune();
        registry.devices.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut registry = self.registry();
        registry.prune();
        registry.devices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let mut registry = self.registry();
        registry.prune();
        registry.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed capacity of all registered disks.
    pub fn allocated_bytes(&self) -> u64 {
        let mut registry = self.registry();
        registry.prune();
        registry.allocated_bytes()
    }

    /// Serves a control request against `device`, writing any reply into `reply`.
    ///
    /// Returns the number of reply bytes written.
    pub fn device_control(
        &self,
        device: &Device,
        request: ControlRequest,
        reply: &mut [u8],
    ) -> Result<usize> {
        debug!(device = %device.id(), ?request, "control request");
        match request {
            ControlRequest::Unlink => self.unlink(device).map(|()| 0),
            ControlRequest::GetName => device.copy_name_into(reply),
            ControlRequest::GetInfo => {
                BlockInfo::from_geometry(&device.geometry()?).encode_into(reply)
            }
            ControlRequest::Rebind => device.rebind().map(|()| 0),
            ControlRequest::Sync => device.sync().map(|()| 0),
        }
    }

    /// Decodes `op` and forwards to [`Controller::device_control`].
    pub fn dispatch(&self, device: &Device, op: u32, reply: &mut [u8]) -> Result<usize> {
        let request = ControlRequest::try_from(op).map_err(|err| {
            debug!(device = %device.id(), op, "unsupported control request");
            err
        })?;
        self.device_control(device, request, reply)
    }

    /// Opens an independent control instance.
    pub fn open(&self) -> ControlInstance<'_> {
        let id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        self.open_instances.fetch_add(1, Ordering::AcqRel);
        debug!(instance = id, "control instance opened");
        ControlInstance {
            controller: self,
            id,
        }
    }

    pub fn open_instances(&self) -> usize {
        self.open_instances.load(Ordering::Acquire)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("devices", &self.names())
            .field("open_instances", &self.open_instances())
            .finish_non_exhaustive()
    }
}

/// A handle obtained from [`Controller::open`].
///
/// Closing (or dropping) it releases only the handle itself; disks created through it stay
/// registered with the controller.
pub struct ControlInstance<'a> {
    controller: &'a Controller,
    id: u64,
}

impl<'a> ControlInstance<'a> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn controller(&self) -> &'a Controller {
        self.controller
    }

    pub fn configure(&self, config: &RamdiskConfig) -> Result<Arc<Device>> {
        self.controller.configure(config)
    }

    /// Serves a raw controller request. Only [`CONTROL_OP_CONFIG`] is understood.
    pub fn control(&self, op: u32, payload: &[u8]) -> Result<Arc<Device>> {
        match op {
            CONTROL_OP_CONFIG => self.configure(&RamdiskConfig::decode(payload)?),
            other => Err(RamdiskError::Unsupported(other)),
        }
    }

    pub fn close(self) {}
}

impl Drop for ControlInstance<'_> {
    fn drop(&mut self) {
        self.controller.open_instances.fetch_sub(1, Ordering::AcqRel);
        debug!(instance = self.id, "control instance closed");
    }
}
