//! Seam to the device namespace that makes disks visible to other components.
//!
//! Publishing, removing and re-enumerating are owned by the host; the controller only calls into
//! this trait. [`InMemoryNamespace`] is a self-contained implementation used by tools and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{RamdiskError, Result};

pub trait DeviceNamespace: Send + Sync {
    /// Makes `name` visible. Fails if the name is already published.
    fn publish(&self, name: &str) -> Result<()>;

    /// Removes `name` from view. Removing an unknown name is a no-op.
    fn remove(&self, name: &str);

    /// Asks the host to re-enumerate the children of `name`.
    fn rebind(&self, name: &str) -> Result<()>;
}

/// Namespace kept in a map, recording how often each entry was re-enumerated.
#[derive(Debug, Default)]
pub struct InMemoryNamespace {
    entries: Mutex<BTreeMap<String, u64>>,
}

impl InMemoryNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    pub fn rebind_count(&self, name: &str) -> Option<u64> {
        self.entries().get(name).copied()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, u64>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceNamespace for InMemoryNamespace {
    fn publish(&self, name: &str) -> Result<()> {
        let mut entries = self.entries();
        if entries.contains_key(name) {
            return Err(RamdiskError::AlreadyExists(name.to_string()));
        }
        entries.insert(name.to_string(), 0);
        Ok(())
    }

    fn remove(&self, name: &str) {
        self.entries().remove(name);
    }

    fn rebind(&self, name: &str) -> Result<()> {
        let mut entries = self.entries();
        let count = entries.get_mut(name).ok_or(RamdiskError::NotFound)?;
        *count += 1;
        Ok(())
    }
}
