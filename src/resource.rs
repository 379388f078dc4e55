//! External-collaborator contracts named by §6 of the specification:
//! resources, pipeline state objects, root signatures, descriptor heaps.
//! The shader/root-signature compiler, the descriptor-heap allocator, the
//! VA map, and the memory allocator that produce the concrete
//! implementations of these traits are explicitly out of scope (§1); this
//! crate only needs to call through them.

use ash::vk;

bitflags::bitflags! {
    /// D3D12 `D3D12_RESOURCE_STATES`, reduced to the bits the translator
    /// and command list inspect. Mirrors the bit-iterator shape of the
    /// teacher's `hal::image::Access`/`hal::buffer::Access` bitflags.
    pub struct ResourceState: u32 {
        const COMMON                     = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER               = 1 << 1;
        const RENDER_TARGET              = 1 << 2;
        const UNORDERED_ACCESS           = 1 << 3;
        const DEPTH_WRITE                = 1 << 4;
        const DEPTH_READ                 = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE  = 1 << 6;
        const PIXEL_SHADER_RESOURCE      = 1 << 7;
        const STREAM_OUT                 = 1 << 8;
        const INDIRECT_ARGUMENT          = 1 << 9;
        const COPY_DEST                  = 1 << 10;
        const COPY_SOURCE                = 1 << 11;
        const RESOLVE_DEST               = 1 << 12;
        const RESOLVE_SOURCE             = 1 << 13;
        const PRESENT                    = 1 << 14;
        const GENERIC_READ =
            Self::VERTEX_AND_CONSTANT_BUFFER.bits
            | Self::INDEX_BUFFER.bits
            | Self::NON_PIXEL_SHADER_RESOURCE.bits
            | Self::PIXEL_SHADER_RESOURCE.bits
            | Self::INDIRECT_ARGUMENT.bits
            | Self::COPY_SOURCE.bits;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Image,
}

/// Sparse-residency metadata exposed by buffer/image resources that have a
/// tile table; only consulted by `submission::BindSparse`.
pub struct SparseInfo {
    pub tile_count: u32,
    pub packed_mip_first_tile: Option<u32>,
    pub packed_mip_tile_count: u32,
}

/// The resource contract named in §6. Implementations live outside this
/// crate (the memory allocator / VA map own resource lifetime).
pub trait Resource: Send + Sync {
    fn kind(&self) -> ResourceKind;
    fn format(&self) -> vk::Format;
    /// Aspect mask of `format()`. `CopyTextureRegion` compares this against
    /// the source resource's own mask to decide between a native
    /// `vkCmdCopyImage` (masks match) and the meta copy-image pipeline
    /// (masks differ, e.g. a typeless copy between a color and a
    /// depth/stencil format).
    fn aspect_mask(&self) -> vk::ImageAspectFlags;
    fn common_layout(&self) -> vk::ImageLayout;
    /// `Some(_)` exactly once: on first use, the command list transitions
    /// from this initial layout and then the resource must clear the flag
    /// (I5). `None` after the flag has been consumed.
    fn initial_state(&self) -> Option<ResourceState>;
    fn clear_initial_state(&self);
    fn present_state(&self) -> ResourceState;
    fn native_image(&self) -> Option<vk::Image>;
    fn native_buffer(&self) -> Option<vk::Buffer>;
    fn gpu_address(&self) -> u64;
    fn sparse_info(&self) -> Option<&SparseInfo>;
    /// Current binding of tile `tile_index`, as tracked by the resource's
    /// own tile table. `CopyTileMappings` reads this on the *source*
    /// resource to carry an existing binding over to the destination
    /// without the caller re-specifying it. Null memory means unbound.
    fn sparse_tile_binding(&self, tile_index: u32) -> (vk::DeviceMemory, vk::DeviceSize);
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct DynamicStateFlags: u32 {
        const VIEWPORT       = 1 << 0;
        const SCISSOR        = 1 << 1;
        const BLEND_CONSTANTS = 1 << 2;
        const STENCIL_REF    = 1 << 3;
        const DEPTH_BOUNDS   = 1 << 4;
        const PRIMITIVE_TOPOLOGY = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// The pipeline-state contract named in §6.
pub trait PipelineState: Send + Sync {
    fn bind_point(&self) -> BindPoint;
    fn native(&self) -> vk::Pipeline;
    fn render_pass_compat_key(&self) -> u64;
    fn render_target_count(&self) -> u32;
    fn null_attachment_mask(&self) -> u32;
    /// `None` encodes D3D12's `DXGI_FORMAT_UNKNOWN` depth-stencil format.
    fn dsv_format(&self) -> Option<vk::Format>;
    fn dsv_layout(&self) -> vk::ImageLayout;
    fn dynamic_state_flags(&self) -> DynamicStateFlags;
    fn strip_cut_requires_index_format(&self) -> Option<vk::IndexType>;

    /// Gets or lazily creates a pipeline + compatible render pass keyed on
    /// the current dynamic-state set and DSV format (I4).
    fn get_or_create_pipeline(
        &self,
        dynamic_state: DynamicStateFlags,
        dsv_format: Option<vk::Format>,
    ) -> crate::error::Result<(vk::Pipeline, vk::RenderPass)>;
}

bitflags::bitflags! {
    pub struct RootSignatureFlags: u32 {
        const USE_PUSH_DESCRIPTORS       = 1 << 0;
        const USE_INLINE_UNIFORM_BLOCK   = 1 << 1;
        const USE_BINDLESS_UAV_COUNTERS  = 1 << 2;
    }
}

/// The root-signature contract named in §6.
pub trait RootSignature: Send + Sync {
    fn pipeline_layout(&self) -> vk::PipelineLayout;
    fn parameter_count(&self) -> u32;
    fn descriptor_table_mask(&self) -> u32;
    fn push_constant_range(&self) -> Option<vk::PushConstantRange>;
    fn inline_uniform_block_binding(&self) -> Option<u32>;
    fn flags(&self) -> RootSignatureFlags;
    fn layout_compatibility_hash(&self) -> u64;

    /// The already-bound, immutable-sampler descriptor set this root
    /// signature keeps static samplers in, if it declares any.
    fn static_sampler_set(&self) -> Option<vk::DescriptorSet>;
    /// Layout of the small descriptor set root CBV/SRV/UAV descriptors and
    /// the UAV-counter binding (if any) get written into. `None` when the
    /// root signature declares no root descriptors and no UAV counters.
    fn root_descriptor_set_layout(&self) -> Option<vk::DescriptorSetLayout>;
    /// Binding index within `root_descriptor_set_layout()` a given root
    /// parameter's descriptor is written to.
    fn root_descriptor_binding(&self, root_parameter_index: u32) -> Option<u32>;
    /// Binding index within `root_descriptor_set_layout()` the bindless
    /// UAV-counter buffer is written to, for root signatures built with
    /// `RootSignatureFlags::USE_BINDLESS_UAV_COUNTERS`.
    fn uav_counter_binding(&self) -> Option<u32>;
}

/// The descriptor-heap / bindless-state contract named in §6.
pub trait DescriptorHeap: Send + Sync {
    fn gpu_table_handle(&self, heap_type: u32) -> Option<vk::DeviceSize>;
    fn index_of(&self, heap_type: u32, offset_in_heap: u32) -> Option<u32>;
}
