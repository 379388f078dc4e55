//! Command execution and synchronization core for a D3D12-on-Vulkan
//! translation layer: command allocator/list lifetime, the D3D12 fence
//! engine bridged onto Vulkan timeline semaphores, a serialized per-queue
//! submission worker, and resource-state to pipeline-barrier translation.
//!
//! The shader/root-signature compiler, descriptor-heap allocator, VA map,
//! and memory allocator are external collaborators, consumed here through
//! the traits in [`device`] and [`resource`].

pub mod command_list;
pub mod command_signature;
pub mod conv;
pub mod device;
pub mod error;
pub mod fence;
pub mod native;
pub mod pool;
pub mod queue;
pub mod resource;
pub mod submission;

use std::sync::Arc;

pub use command_list::CommandList;
pub use command_signature::CommandSignature;
pub use device::DeviceContext;
pub use error::{Error, Result};
pub use fence::worker::FenceWorker;
pub use fence::D3d12Fence;
pub use pool::CommandAllocator;
pub use queue::{QueueCapabilities, QueueWrapper};
pub use submission::SubmissionQueue;

/// Acquires the native queue for exclusive use, blocking out concurrent
/// submitters. Mirrors `vkd3d_acquire_vk_queue`.
pub fn vkd3d_acquire_vk_queue(queue: &QueueWrapper) -> Result<queue::QueueLock<'_>> {
    queue.acquire()
}

/// Releases a queue previously returned by [`vkd3d_acquire_vk_queue`].
/// Mirrors `vkd3d_release_vk_queue`.
pub fn vkd3d_release_vk_queue(queue: &QueueWrapper, lock: queue::QueueLock<'_>) {
    queue.release(lock)
}

/// Mirrors `vkd3d_get_vk_queue_family_index`.
pub fn vkd3d_get_vk_queue_family_index(queue: &QueueWrapper) -> u32 {
    queue.family_index()
}

/// Creates a D3D12 fence backed by a Vulkan timeline semaphore, registering
/// it with `worker` for completion polling. Mirrors `vkd3d_create_fence`.
pub fn vkd3d_create_fence(
    device: Arc<dyn DeviceContext>,
    worker: &Arc<FenceWorker>,
    initial_value: u64,
) -> Result<Arc<D3d12Fence>> {
    D3d12Fence::new(device, Arc::downgrade(worker), initial_value)
}

/// Creates a command allocator (arena-style command-buffer pool) bound to
/// one queue family. Mirrors `vkd3d_create_command_allocator`.
pub fn vkd3d_create_command_allocator(
    device: Arc<dyn DeviceContext>,
    queue_family_index: u32,
    queue_caps: QueueCapabilities,
) -> Result<CommandAllocator> {
    CommandAllocator::new(device, queue_family_index, queue_caps)
}

/// Creates an unattached, non-recording command list. Call
/// [`CommandList::begin`]/[`CommandList::reset`] before recording into it.
/// Mirrors `vkd3d_create_command_list`.
pub fn vkd3d_create_command_list(
    device: Arc<dyn DeviceContext>,
    queue_caps: QueueCapabilities,
) -> CommandList {
    CommandList::new(device, queue_caps)
}

/// Spawns the serialized submission worker for one queue, wiring it to the
/// device's fence worker and, for a sparse-binding-capable queue pair, the
/// dedicated sparse-bind queue. Mirrors `vkd3d_create_command_queue`.
pub fn vkd3d_create_command_queue(
    device: Arc<dyn DeviceContext>,
    queue_wrapper: Arc<QueueWrapper>,
    fence_worker: Arc<FenceWorker>,
    sparse_queue: Option<Arc<QueueWrapper>>,
) -> Arc<SubmissionQueue> {
    SubmissionQueue::new(device, queue_wrapper, fence_worker, sparse_queue)
}

/// Validates and constructs an `ExecuteIndirect` argument layout. Mirrors
/// `vkd3d_create_command_signature`.
pub fn vkd3d_create_command_signature(
    arguments: &[command_signature::IndirectArgumentType],
    byte_stride: u32,
) -> Result<CommandSignature> {
    CommandSignature::new(arguments, byte_stride)
}

/// Device-wide handle to the background thread that polls timeline
/// semaphores for every fence created against this device. One per
/// `DeviceContext`, started at device-creation time and stopped at
/// teardown.
pub fn vkd3d_start_fence_worker(device: Arc<dyn DeviceContext>) -> Arc<FenceWorker> {
    FenceWorker::start(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_types_are_reachable_from_crate_root() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<D3d12Fence>>();
        assert_send_sync::<Arc<QueueWrapper>>();
        assert_send_sync::<Arc<SubmissionQueue>>();
    }

    #[test]
    fn command_signature_factory_validates_terminal_position() {
        use command_signature::IndirectArgumentType as A;
        let args = [A::Draw, A::ConstantBufferView { root_parameter_index: 0 }];
        assert!(vkd3d_create_command_signature(&args, 16).is_err());
    }
}
