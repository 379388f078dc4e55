//! Queue wrapper (§4.1). Owns the native device queue handle and the mutex
//! that makes concurrent submission to that queue sound.

use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, MutexGuard};

use crate::device::DeviceContext;
use crate::error::{Error, Result};

bitflags::bitflags! {
    pub struct QueueCapabilities: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE  = 1 << 1;
        const TRANSFER = 1 << 2;
        const SPARSE_BINDING = 1 << 3;
    }
}

/// Owns one native `VkQueue`. Every submission, present-time layout
/// transition, and sparse-binding call funnels through `acquire`/`release`
/// so exactly one thread ever touches the handle at a time (Vulkan forbids
/// concurrent access to the same `VkQueue` from multiple threads).
pub struct QueueWrapper {
    device: Arc<dyn DeviceContext>,
    family_index: u32,
    capabilities: QueueCapabilities,
    timestamp_valid_bits: u32,
    raw: Mutex<vk::Queue>,
}

/// RAII guard returned by `acquire`. Dropping it is equivalent to calling
/// `release`; this makes unbalanced acquire/release pairs, which the spec
/// calls out as an invariant, a compile-time property instead of a runtime
/// one.
pub struct QueueLock<'a> {
    guard: MutexGuard<'a, vk::Queue>,
}

impl<'a> std::ops::Deref for QueueLock<'a> {
    type Target = vk::Queue;
    fn deref(&self) -> &vk::Queue {
        &self.guard
    }
}

impl QueueWrapper {
    pub fn new(
        device: Arc<dyn DeviceContext>,
        raw: vk::Queue,
        family_index: u32,
        capabilities: QueueCapabilities,
        timestamp_valid_bits: u32,
    ) -> Self {
        QueueWrapper {
            device,
            family_index,
            capabilities,
            timestamp_valid_bits,
            raw: Mutex::new(raw),
        }
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn capabilities(&self) -> QueueCapabilities {
        self.capabilities
    }

    pub fn timestamp_valid_bits(&self) -> u32 {
        self.timestamp_valid_bits
    }

    /// Locks the queue mutex and returns the native handle. Fails only if
    /// the device has been marked removed, matching §4.1 ("fails only if
    /// lock fails" — a poisoned/removed device is this crate's analogue of
    /// lock failure since `parking_lot` mutexes never poison).
    pub fn acquire(&self) -> Result<QueueLock<'_>> {
        if self.device.is_device_removed() {
            return Err(Error::DeviceRemoved);
        }
        Ok(QueueLock {
            guard: self.raw.lock(),
        })
    }

    /// Explicit release, for symmetry with the spec's acquire/release
    /// naming; equivalent to dropping the `QueueLock`.
    pub fn release(&self, lock: QueueLock<'_>) {
        drop(lock);
    }

    pub fn wait_idle(&self) -> Result<()> {
        let lock = self.acquire()?;
        let result = unsafe { self.device.raw().queue_wait_idle(*lock) };
        self.release(lock);
        result.map_err(Error::from)
    }
}
