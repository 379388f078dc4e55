//! Submission queue (§4.6): a serialized worker that consumes an ordered
//! FIFO of typed submissions and translates each into backend queue
//! operations, preserving D3D12's "submissions on one queue are totally
//! ordered" guarantee even when host signals resolve out of order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ash::vk;
use parking_lot::{Condvar, Mutex};

use crate::device::DeviceContext;
use crate::fence::worker::FenceWorker;
use crate::fence::D3d12Fence;
use crate::queue::QueueWrapper;
use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseBindMode {
    Update,
    Copy,
}

/// One classified sparse-resource-region bind, fed into the native
/// `vkQueueBindSparse` arrays by bind kind (buffer / opaque image region /
/// image block whose tile falls in the packed-mip region).
///
/// `memory`/`memory_offset` are the explicit binding used in
/// `SparseBindMode::Update`. `src_tile` is the index into the source
/// resource's own tile table used in `SparseBindMode::Copy`, where the
/// existing binding of that tile (not `memory`/`memory_offset`) is what
/// gets applied.
pub enum SparseBind {
    Buffer {
        resource_offset: vk::DeviceSize,
        size: vk::DeviceSize,
        memory: vk::DeviceMemory,
        memory_offset: vk::DeviceSize,
        src_tile: u32,
    },
    ImageOpaque {
        resource_offset: vk::DeviceSize,
        size: vk::DeviceSize,
        memory: vk::DeviceMemory,
        memory_offset: vk::DeviceSize,
        src_tile: u32,
    },
    ImageBlock {
        subresource: vk::ImageSubresource,
        offset: vk::Offset3D,
        extent: vk::Extent3D,
        memory: vk::DeviceMemory,
        memory_offset: vk::DeviceSize,
        src_tile: u32,
    },
}

/// One submission record, per the tagged variant in §3.
pub enum Submission {
    Stop,
    Wait {
        fence: Arc<D3d12Fence>,
        value: u64,
    },
    Signal {
        fence: Arc<D3d12Fence>,
        value: u64,
    },
    Execute {
        command_buffers: Vec<vk::CommandBuffer>,
        outstanding_counters: Vec<Arc<AtomicUsize>>,
    },
    BindSparse {
        mode: SparseBindMode,
        dst_resource_image: Option<vk::Image>,
        dst_resource_buffer: Option<vk::Buffer>,
        src_resource: Option<Arc<dyn Resource>>,
        binds: Vec<SparseBind>,
    },
    Drain,
}

struct Fifo {
    queue: VecDeque<Submission>,
    queue_drain_count: u64,
}

/// Client-facing command queue: owns the FIFO and the worker thread that
/// drains it in enqueue order.
pub struct SubmissionQueue {
    device: Arc<dyn DeviceContext>,
    queue_wrapper: Arc<QueueWrapper>,
    fence_worker: Arc<FenceWorker>,
    sparse_queue: Option<Arc<QueueWrapper>>,
    fifo: Mutex<Fifo>,
    cond: Condvar,
    drain_count: AtomicUsize,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SubmissionQueue {
    pub fn new(
        device: Arc<dyn DeviceContext>,
        queue_wrapper: Arc<QueueWrapper>,
        fence_worker: Arc<FenceWorker>,
        sparse_queue: Option<Arc<QueueWrapper>>,
    ) -> Arc<Self> {
        let this = Arc::new(SubmissionQueue {
            device,
            queue_wrapper,
            fence_worker,
            sparse_queue,
            fifo: Mutex::new(Fifo {
                queue: VecDeque::new(),
                queue_drain_count: 0,
            }),
            cond: Condvar::new(),
            drain_count: AtomicUsize::new(0),
            thread: Mutex::new(None),
        });

        let worker = Arc::clone(&this);
        let handle = std::thread::Builder::new()
            .name("submission-queue".into())
            .spawn(move || worker.run())
            .expect("failed to spawn submission queue worker thread");
        *this.thread.lock() = Some(handle);
        this
    }

    pub fn enqueue(&self, submission: Submission) {
        let mut fifo = self.fifo.lock();
        fifo.queue.push_back(submission);
        self.cond.notify_one();
    }

    pub fn stop(&self) {
        self.enqueue(Submission::Stop);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// `acquire_serialized`: enqueues a `Drain`, then blocks until the
    /// drain counter observes it — every submission enqueued before this
    /// call is then guaranteed to have reached the backend queue. Returns
    /// the locked native queue handle, exactly like `QueueWrapper::acquire`,
    /// for a foreign caller (e.g. an interop path) to borrow.
    pub fn acquire_serialized(&self) -> crate::error::Result<crate::queue::QueueLock<'_>> {
        let token = {
            let mut fifo = self.fifo.lock();
            let token = fifo.queue_drain_count + 1;
            fifo.queue.push_back(Submission::Drain);
            self.cond.notify_one();
            token
        };

        let mut fifo = self.fifo.lock();
        while fifo.queue_drain_count < token {
            // The drain counter is bumped by the worker thread; block here
            // using a short-lived re-lock loop since parking_lot's Condvar
            // needs the same mutex guard type. The worker signals via
            // `self.cond` right after bumping `queue_drain_count`.
            self.cond.wait(&mut fifo);
        }
        drop(fifo);

        self.queue_wrapper.acquire()
    }

    pub fn release_serialized(&self, lock: crate::queue::QueueLock<'_>) {
        self.queue_wrapper.release(lock);
    }

    fn run(&self) {
        loop {
            let submission = {
                let mut fifo = self.fifo.lock();
                while fifo.queue.is_empty() {
                    self.cond.wait(&mut fifo);
                }
                fifo.queue.pop_front().unwrap()
            };

            match submission {
                Submission::Stop => return,
                Submission::Wait { fence, value } => self.dispatch_wait(&fence, value),
                Submission::Signal { fence, value } => self.dispatch_signal(&fence, value),
                Submission::Execute {
                    command_buffers,
                    outstanding_counters,
                } => self.dispatch_execute(&command_buffers, &outstanding_counters),
                Submission::BindSparse {
                    mode,
                    dst_resource_image,
                    dst_resource_buffer,
                    src_resource,
                    binds,
                } => self.dispatch_bind_sparse(
                    mode,
                    dst_resource_image,
                    dst_resource_buffer,
                    src_resource.as_ref(),
                    &binds,
                ),
                Submission::Drain => self.dispatch_drain(),
            }
        }
    }

    /// The host-block-before-backend-wait mechanism (§4.6). A `Wait`
    /// enqueued for a value nobody has signaled yet stalls here until
    /// *some* thread commits to eventually reaching it, giving this queue
    /// total order without a global serialization point.
    fn dispatch_wait(&self, fence: &Arc<D3d12Fence>, value: u64) {
        fence.block_until_pending_value_reaches(value);
        if fence.can_elide_wait_semaphore(value) {
            return;
        }

        let lock = match self.queue_wrapper.acquire() {
            Ok(lock) => lock,
            Err(e) => {
                log::error!("failed to acquire queue for Wait submission: {:?}", e);
                return;
            }
        };

        let semaphores = [fence.timeline_semaphore()];
        let values = [value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder().wait_semaphore_values(&values);
        let wait_stage = [vk::PipelineStageFlags::ALL_COMMANDS];
        let info = vk::SubmitInfo::builder()
            .wait_semaphores(&semaphores)
            .wait_dst_stage_mask(&wait_stage)
            .push_next(&mut timeline_info);

        let result = unsafe {
            self.device
                .raw()
                .queue_submit(*lock, &[info.build()], vk::Fence::null())
        };
        self.queue_wrapper.release(lock);

        if let Err(e) = result {
            log::error!("backend submit failed for Wait: {:?}", e);
            self.device.mark_device_removed();
        }
    }

    /// A non-monotonic GPU `Signal` is skipped (warned, not fatal). A
    /// monotonic one holds the fence mutex across the backend submit so no
    /// other thread can race the timeline past this value, then commits
    /// `pending_timeline_value` and hands the completion off to the fence
    /// worker so CPU observers fire asynchronously.
    fn dispatch_signal(&self, fence: &Arc<D3d12Fence>, value: u64) {
        if !fence.can_signal_semaphore(value) {
            log::warn!(
                "skipping non-monotonic GPU Signal({}) on fence already committed past it",
                value
            );
            return;
        }

        let lock = match self.queue_wrapper.acquire() {
            Ok(lock) => lock,
            Err(e) => {
                log::error!("failed to acquire queue for Signal submission: {:?}", e);
                return;
            }
        };

        let semaphores = [fence.timeline_semaphore()];
        let values = [value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&values);
        let info = vk::SubmitInfo::builder()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);

        let result = unsafe {
            self.device
                .raw()
                .queue_submit(*lock, &[info.build()], vk::Fence::null())
        };
        self.queue_wrapper.release(lock);

        match result {
            Ok(()) => {
                fence.update_pending_value(value);
                self.fence_worker.enqueue(fence.timeline_semaphore(), fence, value);
            }
            Err(e) => {
                log::error!("backend submit failed for Signal: {:?}", e);
                let _ = self.queue_wrapper.wait_idle();
                self.device.mark_device_removed();
            }
        }
    }

    /// Per spec.md §9's open question (c): the per-allocator counters are
    /// decremented as soon as `vkQueueSubmit` returns, not when the GPU
    /// actually finishes the batch. The counter's job is to catch a host
    /// thread calling `Reset` on an allocator this queue still has an
    /// in-flight `Execute` for; D3D12 already requires the app to
    /// synchronize with a fence before reusing an allocator, so once the
    /// command buffers are handed to the backend queue this queue's
    /// thread will never touch them again, and that is the only race this
    /// counter needs to close.
    fn dispatch_execute(
        &self,
        command_buffers: &[vk::CommandBuffer],
        outstanding_counters: &[Arc<AtomicUsize>],
    ) {
        let lock = match self.queue_wrapper.acquire() {
            Ok(lock) => lock,
            Err(e) => {
                log::error!("failed to acquire queue for Execute submission: {:?}", e);
                return;
            }
        };

        let info = vk::SubmitInfo::builder().command_buffers(command_buffers);
        let result = unsafe {
            self.device
                .raw()
                .queue_submit(*lock, &[info.build()], vk::Fence::null())
        };
        self.queue_wrapper.release(lock);

        match result {
            Ok(()) => {
                for counter in outstanding_counters {
                    counter.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Err(e) => {
                log::error!("backend submit failed for Execute: {:?}", e);
                let _ = self.queue_wrapper.wait_idle();
                self.device.mark_device_removed();
                for counter in outstanding_counters {
                    counter.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }

    /// The client may call sparse-binding on any command queue; this
    /// redirects to a dedicated sparse-capable queue when the owning queue
    /// cannot do it itself (§4.6, §9). Cross-queue ordering with a
    /// subsequent `Execute` on the client queue is provided here via a
    /// queue-idle barrier, which the spec explicitly allows as an
    /// alternative to timeline-semaphore-based synchronization.
    fn dispatch_bind_sparse(
        &self,
        mode: SparseBindMode,
        dst_image: Option<vk::Image>,
        dst_buffer: Option<vk::Buffer>,
        src_resource: Option<&Arc<dyn Resource>>,
        binds: &[SparseBind],
    ) {
        if mode == SparseBindMode::Copy && src_resource.is_none() {
            log::error!("CopyTileMappings requires a source resource; treating all tiles as unbound");
        }

        // `CopyTileMappings` looks up the *source* tile's existing binding
        // instead of using the bind's own `memory`/`memory_offset`.
        let resolve = |memory: vk::DeviceMemory, memory_offset: vk::DeviceSize, src_tile: u32| match mode {
            SparseBindMode::Update => (memory, memory_offset),
            SparseBindMode::Copy => src_resource
                .map(|res| res.sparse_tile_binding(src_tile))
                .unwrap_or((vk::DeviceMemory::null(), 0)),
        };

        let target_queue = if self
            .queue_wrapper
            .capabilities()
            .contains(crate::queue::QueueCapabilities::SPARSE_BINDING)
        {
            &self.queue_wrapper
        } else {
            match &self.sparse_queue {
                Some(q) => q,
                None => {
                    log::error!("BindSparse requested but no sparse-capable queue is available");
                    return;
                }
            }
        };

        let mut buffer_binds = Vec::new();
        let mut image_opaque_binds = Vec::new();
        let mut image_binds = Vec::new();
        for bind in binds {
            match bind {
                SparseBind::Buffer {
                    resource_offset,
                    size,
                    memory,
                    memory_offset,
                    src_tile,
                } => {
                    let (memory, memory_offset) = resolve(*memory, *memory_offset, *src_tile);
                    buffer_binds.push(vk::SparseMemoryBind {
                        resource_offset: *resource_offset,
                        size: *size,
                        memory,
                        memory_offset,
                        flags: vk::SparseMemoryBindFlags::empty(),
                    });
                }
                SparseBind::ImageOpaque {
                    resource_offset,
                    size,
                    memory,
                    memory_offset,
                    src_tile,
                } => {
                    let (memory, memory_offset) = resolve(*memory, *memory_offset, *src_tile);
                    image_opaque_binds.push(vk::SparseMemoryBind {
                        resource_offset: *resource_offset,
                        size: *size,
                        memory,
                        memory_offset,
                        flags: vk::SparseMemoryBindFlags::empty(),
                    });
                }
                SparseBind::ImageBlock {
                    subresource,
                    offset,
                    extent,
                    memory,
                    memory_offset,
                    src_tile,
                } => {
                    let (memory, memory_offset) = resolve(*memory, *memory_offset, *src_tile);
                    image_binds.push(vk::SparseImageMemoryBind {
                        subresource: *subresource,
                        offset: *offset,
                        extent: *extent,
                        memory,
                        memory_offset,
                        flags: vk::SparseMemoryBindFlags::empty(),
                    });
                }
            }
        }

        let buffer_bind_info = dst_buffer.map(|buffer| {
            vk::SparseBufferMemoryBindInfo::builder()
                .buffer(buffer)
                .binds(&buffer_binds)
                .build()
        });
        let opaque_bind_info = dst_image.map(|image| {
            vk::SparseImageOpaqueMemoryBindInfo::builder()
                .image(image)
                .binds(&image_opaque_binds)
                .build()
        });
        let image_bind_info = dst_image.map(|image| {
            vk::SparseImageMemoryBindInfo::builder()
                .image(image)
                .binds(&image_binds)
                .build()
        });

        let buffer_binds_slice = buffer_bind_info.as_ref().map(std::slice::from_ref).unwrap_or(&[]);
        let opaque_binds_slice = opaque_bind_info.as_ref().map(std::slice::from_ref).unwrap_or(&[]);
        let image_binds_slice = image_bind_info.as_ref().map(std::slice::from_ref).unwrap_or(&[]);

        let info = vk::BindSparseInfo::builder()
            .buffer_binds(buffer_binds_slice)
            .image_opaque_binds(opaque_binds_slice)
            .image_binds(image_binds_slice);

        let lock = match target_queue.acquire() {
            Ok(lock) => lock,
            Err(e) => {
                log::error!("failed to acquire sparse-capable queue: {:?}", e);
                return;
            }
        };
        let result = unsafe {
            self.device
                .raw()
                .queue_bind_sparse(*lock, &[info.build()], vk::Fence::null())
        };
        target_queue.release(lock);

        if let Err(e) = result {
            log::error!("backend sparse bind failed: {:?}", e);
            self.device.mark_device_removed();
            return;
        }

        if target_queue.family_index() != self.queue_wrapper.family_index() {
            // TODO: replace with a timeline-semaphore handoff once sparse
            // resources carry their own binding-generation fence; a
            // queue-idle is correct but coarser than necessary.
            let _ = target_queue.wait_idle();
        }
    }

    fn dispatch_drain(&self) {
        let mut fifo = self.fifo.lock();
        fifo.queue_drain_count += 1;
        self.drain_count.store(fifo.queue_drain_count as usize, Ordering::SeqCst);
        self.cond.notify_all();
    }
}

impl Drop for SubmissionQueue {
    fn drop(&mut self) {
        if self.thread.lock().is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_sparse_bind_arrays_stay_empty_when_unused() {
        // Classification produces no entries for binds that were never
        // pushed; this just documents the expected empty-input behavior of
        // the classifier used inside dispatch_bind_sparse.
        let binds: Vec<SparseBind> = Vec::new();
        assert!(binds.is_empty());
    }
}
