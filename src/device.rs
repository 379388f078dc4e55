//! The seam through which the core borrows the backend device. Everything
//! in this module is a contract the core *consumes*; the concrete device,
//! memory allocator, descriptor-heap allocator, and VA map live outside
//! this crate (§6 of the specification).

use ash::vk;

/// Raw Win32-style event handle. Opaque to the core; passed through to
/// `DeviceContext::signal_event` unmodified.
pub type RawEventHandle = usize;

bitflags::bitflags! {
    /// Backend feature bits the core consults when choosing an update
    /// strategy or a synchronization primitive.
    pub struct Features: u32 {
        const INLINE_UNIFORM_BLOCK       = 0b0000_0001;
        const UPDATE_AFTER_BIND          = 0b0000_0010;
        const DRAW_INDIRECT_COUNT        = 0b0000_0100;
        const CONDITIONAL_RENDERING      = 0b0000_1000;
        const TRANSFORM_FEEDBACK         = 0b0001_0000;
        const SPARSE_BINDING             = 0b0010_0000;
        const TIMELINE_SEMAPHORE         = 0b0100_0000;
    }
}

/// A device-owned meta compute pipeline backing `ClearUnorderedAccessView`
/// when the bound view's descriptor type has no native Vulkan clear
/// command (`vkCmdClearColorImage` only covers views usable as copy/blit
/// destinations, not arbitrary storage images/texel buffers). Expects a
/// single descriptor at binding 0 of `descriptor_set_layout`, matching
/// `descriptor_type`, and a push-constant block carrying the clear color,
/// rect offset, and rect extent.
#[derive(Clone, Copy)]
pub struct MetaClearUavPipeline {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub descriptor_type: vk::DescriptorType,
    pub workgroup_size: (u32, u32),
}

/// A device-owned meta graphics pipeline backing `CopyTextureRegion`
/// copies whose source/destination aspect masks don't match closely
/// enough for a native `vkCmdCopyImage` (e.g. a typeless resource copied
/// between a color view and a depth/stencil view). Renders a full-screen
/// triangle sampling `src` into a render pass compatible with `dst`'s
/// format, scissored to the copy region.
#[derive(Clone, Copy)]
pub struct MetaCopyImagePipeline {
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub render_pass: vk::RenderPass,
}

/// Per-queue-family static information the device hands the core at
/// queue-wrapper construction time.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyInfo {
    pub family_index: u32,
    pub graphics: bool,
    pub compute: bool,
    pub transfer: bool,
    pub sparse_binding: bool,
    pub timestamp_valid_bits: u32,
}

/// The contract the core consumes from the device layer. A real
/// implementation holds the `ash::Instance`/`ash::Device`, the memory
/// allocator, the VA map, and the private-data store; none of those are
/// this crate's concern, so they are erased behind this trait.
pub trait DeviceContext: Send + Sync {
    /// The logical device function-pointer table.
    fn raw(&self) -> &ash::Device;

    /// The instance function-pointer table (needed by a handful of
    /// extension entry points that are instance-level, e.g. surface
    /// capability queries during present-layout transitions).
    fn instance(&self) -> &ash::Instance;

    /// Feature bits negotiated at device-creation time.
    fn features(&self) -> Features;

    /// Size, in bytes, of `wchar_t` on the client platform; used only for
    /// debug-name conversion, which lives outside this crate's scope, but
    /// kept here because the device layer is the only place that knows it.
    fn wchar_size(&self) -> usize;

    /// Sets a Win32-style event object. Called by the fence worker and by
    /// `D3d12Fence::SetEventOnCompletion`'s immediate-signal path.
    fn signal_event(&self, event: RawEventHandle);

    /// Resolves a raw GPU virtual address back to a descriptor-ready
    /// buffer range. Out of scope per §1 (the VA map lives outside this
    /// crate); stubbed as `None` by every implementation this crate ships,
    /// since no concrete device exists in-tree. A root-descriptor update
    /// that can't resolve its address is logged and left unbound rather
    /// than guessed at.
    fn dereference_gpu_address(&self, gpu_address: u64) -> Option<vk::DescriptorBufferInfo> {
        let _ = gpu_address;
        None
    }

    /// Looks up the meta compute pipeline for `ClearUnorderedAccessView`.
    /// `is_image` selects storage-image vs. storage-texel-buffer views,
    /// `is_float` selects the float vs. uint clear-value variant. Out of
    /// scope per §1 (the meta-shader cache lives outside this crate);
    /// stubbed as `None`.
    fn meta_clear_uav_pipeline(&self, is_image: bool, is_float: bool) -> Option<MetaClearUavPipeline> {
        let _ = (is_image, is_float);
        None
    }

    /// Looks up the meta graphics pipeline for a `CopyTextureRegion` whose
    /// source/destination aspect masks don't match. Out of scope per §1;
    /// stubbed as `None`.
    fn meta_copy_image_pipeline(
        &self,
        dst_format: vk::Format,
        src_format: vk::Format,
    ) -> Option<MetaCopyImagePipeline> {
        let _ = (dst_format, src_format);
        None
    }

    /// Marks the device as removed. Idempotent.
    fn mark_device_removed(&self);

    /// True once `mark_device_removed` has been called.
    fn is_device_removed(&self) -> bool;

    /// The maximum framebuffer dimensions reported by the physical device,
    /// used by `OMSetRenderTargets` when no attachment is bound.
    fn max_framebuffer_extent(&self) -> vk::Extent2D;
}
