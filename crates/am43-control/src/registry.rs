//! Open device sessions, keyed by address.

use std::collections::HashMap;

use am43_metrics::metric_defs;
use ble_proxy_protocol::DeviceAddress;
use parking_lot::Mutex;

use crate::dispatcher::DeviceHandle;

/// The live device tasks.
///
/// A handle whose task has exited is replaced on the next lookup.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    handles: Mutex<HashMap<DeviceAddress, DeviceHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The running handle for `address`, if any.
    pub fn get(&self, address: &DeviceAddress) -> Option<DeviceHandle> {
        self.handles
            .lock()
            .get(address)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// The running handle for `address`, created with `spawn` when missing.
    pub fn get_or_insert_with(
        &self,
        address: &DeviceAddress,
        spawn: impl FnOnce() -> DeviceHandle,
    ) -> DeviceHandle {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(address) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }
        let handle = spawn();
        handles.insert(address.clone(), handle.clone());
        Self::record(handles.len());
        handle
    }

    pub fn remove(&self, address: &DeviceAddress) -> Option<DeviceHandle> {
        let mut handles = self.handles.lock();
        let removed = handles.remove(address);
        Self::record(handles.len());
        removed
    }

    /// Take every handle out of the registry.
    pub fn drain(&self) -> Vec<DeviceHandle> {
        let drained: Vec<_> = self.handles.lock().drain().map(|(_, handle)| handle).collect();
        Self::record(0);
        drained
    }

    pub fn addresses(&self) -> Vec<DeviceAddress> {
        let mut addresses: Vec<_> = self.handles.lock().keys().cloned().collect();
        addresses.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        addresses
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    fn record(active: usize) {
        metrics::gauge!(metric_defs::SESSIONS_ACTIVE.name).set(active as f64);
    }
}
