//! Command list (§4.5): the recording state machine. Owns render-pass,
//! framebuffer, pipeline, dynamic-state, and pipeline-bindings bookkeeping,
//! and is responsible for invariants I1–I5. This is the largest component
//! in the core, mirroring its share of the implementation budget.

use std::sync::Arc;

use arrayvec::ArrayVec;
use ash::vk;
use smallvec::SmallVec;

use crate::conv::{translate_resource_state, uav_barrier_stage_access};
use crate::device::DeviceContext;
use crate::error::{Error, Result};
use crate::native::{DescriptorPoolKind, Framebuffer, ImageView, RenderPass};
use crate::pool::CommandAllocator;
use crate::queue::QueueCapabilities;
use crate::resource::{
    BindPoint, DynamicStateFlags, PipelineState, Resource, ResourceState, RootSignature,
};

/// A rendertarget/depth-stencil view descriptor as recorded by
/// `OMSetRenderTargets`; kept minimal since the concrete view-creation
/// logic belongs to the out-of-scope descriptor layer (§1).
#[derive(Clone, Copy)]
pub struct AttachmentView {
    pub image_view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// One bound stream-output buffer slot, as recorded by `SOSetTargets`.
#[derive(Clone, Copy)]
pub struct StreamOutputBufferView {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub counter_buffer: vk::Buffer,
    pub counter_buffer_offset: vk::DeviceSize,
}

/// `ClearUnorderedAccessView`'s view argument: D3D12 UAVs address either an
/// image or a typed (texel) buffer, and the two need different descriptor
/// types in the meta clear pipeline's descriptor set.
#[derive(Clone, Copy)]
pub enum ClearUavView {
    Image(vk::ImageView),
    TexelBuffer(vk::BufferView),
}

#[derive(Clone, Copy)]
enum ClearUavValue {
    Uint([u32; 4]),
    Float([f32; 4]),
}

impl ClearUavValue {
    fn is_float(self) -> bool {
        matches!(self, ClearUavValue::Float(_))
    }

    fn as_bits(self) -> [u32; 4] {
        match self {
            ClearUavValue::Uint(v) => v,
            ClearUavValue::Float(v) => v.map(f32::to_bits),
        }
    }
}

/// Push-constant layout the meta ClearUAV compute shader expects: the
/// clear value (reinterpreted as uint bits for the float variant), the
/// rect's origin, and its extent.
#[repr(C)]
#[derive(Clone, Copy)]
struct ClearUavPushConstants {
    color: [u32; 4],
    offset: [i32; 2],
    extent: [i32; 2],
}

#[derive(Clone, Copy, Default)]
struct ClearValue {
    color: [f32; 4],
    depth: f32,
    stencil: u32,
}

/// Deferred-clear bookkeeping (I3): a full-attachment clear requested
/// outside an active render pass is retained here until the next
/// `BeginRenderPass`, where it is upgraded to `LOAD_OP_CLEAR` wherever the
/// attachment's layout allows it.
#[derive(Default)]
struct DeferredClears {
    pending_mask: u32,
    aspect_mask: [vk::ImageAspectFlags; 9],
    value: [ClearValue; 9],
}

impl DeferredClears {
    fn record(&mut self, attachment_index: usize, aspect: vk::ImageAspectFlags, value: ClearValue) {
        self.pending_mask |= 1 << attachment_index;
        self.aspect_mask[attachment_index] |= aspect;
        self.value[attachment_index] = value;
    }

    fn take(&mut self, attachment_index: usize) -> Option<(vk::ImageAspectFlags, ClearValue)> {
        if self.pending_mask & (1 << attachment_index) != 0 {
            self.pending_mask &= !(1 << attachment_index);
            Some((self.aspect_mask[attachment_index], self.value[attachment_index]))
        } else {
            None
        }
    }
}

#[derive(Default, Clone, Copy)]
struct DynamicState {
    viewports: [vk::Viewport; 16],
    viewport_count: u32,
    scissors: [vk::Rect2D; 16],
    scissor_count: u32,
    blend_constants: [f32; 4],
    stencil_ref: u32,
    depth_bounds: (f32, f32),
    primitive_topology: vk::PrimitiveTopology,
    dirty: DynamicStateFlags,
}

/// Per-bind-point (graphics/compute) pipeline-bindings bookkeeping: bound
/// root signature, per-parameter shadow state, and dirty tracking so
/// `update_descriptors` only re-emits what actually changed.
#[derive(Default)]
struct PipelineBindings {
    root_signature: Option<Arc<dyn RootSignature>>,
    root_constants: SmallVec<[u32; 64]>,
    /// `(root_parameter_index, gpu_address)`, set by `SetGraphicsRoot*View`
    /// / `SetComputeRoot*View`. Kept as a small association list rather
    /// than indexed by parameter count, since the root signature's
    /// parameter count isn't known to `PipelineBindings` itself.
    root_descriptors: SmallVec<[(u32, u64); 16]>,
    uav_counter_buffer: Option<vk::Buffer>,
    dirty_descriptor_heaps: bool,
    dirty_static_samplers: bool,
    dirty_packed_descriptors: bool,
    dirty_root_descriptors: bool,
    dirty_root_constants: bool,
    dirty_table_offsets: bool,
    dirty_uav_counters: bool,
}

impl PipelineBindings {
    fn any_dirty(&self) -> bool {
        self.dirty_descriptor_heaps
            || self.dirty_static_samplers
            || self.dirty_packed_descriptors
            || self.dirty_root_descriptors
            || self.dirty_root_constants
            || self.dirty_table_offsets
            || self.dirty_uav_counters
    }

    fn clear(&mut self) {
        self.dirty_descriptor_heaps = false;
        self.dirty_static_samplers = false;
        self.dirty_packed_descriptors = false;
        self.dirty_root_descriptors = false;
        self.dirty_root_constants = false;
        self.dirty_table_offsets = false;
        self.dirty_uav_counters = false;
    }

    fn set_root_descriptor(&mut self, root_parameter_index: u32, gpu_address: u64) {
        match self
            .root_descriptors
            .iter_mut()
            .find(|(index, _)| *index == root_parameter_index)
        {
            Some(entry) => entry.1 = gpu_address,
            None => self.root_descriptors.push((root_parameter_index, gpu_address)),
        }
        self.dirty_root_descriptors = true;
    }
}

/// `SOSetTargets` bookkeeping: the bound buffer/counter-buffer slots.
/// `VK_EXT_transform_feedback`'s entry points live behind their own
/// extension-function-pointer struct that the device-context seam doesn't
/// expose (see `close`'s conditional-rendering comment for the same
/// situation with `VK_EXT_conditional_rendering`); this only tracks state
/// so a concrete device's own command-recording wrapper can issue
/// `cmd_bind_transform_feedback_buffers_ext`/`cmd_begin_transform_feedback_ext`
/// around it.
#[derive(Default)]
struct StreamOutputTargets {
    start_slot: u32,
    views: SmallVec<[StreamOutputBufferView; 4]>,
}

pub struct CommandList {
    device: Arc<dyn DeviceContext>,
    queue_caps: QueueCapabilities,

    native: Option<vk::CommandBuffer>,
    is_recording: bool,
    is_valid: bool,

    pipeline: Option<Arc<dyn PipelineState>>,
    render_pass: Option<RenderPass>,
    framebuffer: Option<Framebuffer>,
    render_pass_active: bool,
    render_pass_suspended: bool,

    render_targets: ArrayVec<[AttachmentView; 8]>,
    depth_stencil: Option<AttachmentView>,
    depth_stencil_layout: vk::ImageLayout,

    deferred_clears: DeferredClears,
    dynamic_state: DynamicState,
    graphics_bindings: PipelineBindings,
    compute_bindings: PipelineBindings,
    descriptor_heap_sets: SmallVec<[vk::DescriptorSet; 4]>,

    xfb_enabled: bool,
    xfb_targets: StreamOutputTargets,
    is_predicated: bool,
    index_buffer_format: Option<vk::IndexType>,
}

impl CommandList {
    pub fn new(device: Arc<dyn DeviceContext>, queue_caps: QueueCapabilities) -> Self {
        CommandList {
            device,
            queue_caps,
            native: None,
            is_recording: false,
            is_valid: true,
            pipeline: None,
            render_pass: None,
            framebuffer: None,
            render_pass_active: false,
            render_pass_suspended: false,
            render_targets: ArrayVec::new(),
            depth_stencil: None,
            depth_stencil_layout: vk::ImageLayout::UNDEFINED,
            deferred_clears: DeferredClears::default(),
            dynamic_state: DynamicState::default(),
            graphics_bindings: PipelineBindings::default(),
            compute_bindings: PipelineBindings::default(),
            descriptor_heap_sets: SmallVec::new(),
            xfb_enabled: false,
            xfb_targets: StreamOutputTargets::default(),
            is_predicated: false,
            index_buffer_format: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn native(&self) -> Option<vk::CommandBuffer> {
        self.native
    }

    fn mark_invalid_on_error<T>(&mut self, result: std::result::Result<T, vk::Result>) -> Result<T> {
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                self.is_valid = false;
                log::error!("command list recording failed: {:?}", e);
                Err(Error::from(e))
            }
        }
    }

    fn require_recording(&self) -> Result<()> {
        if !self.is_recording {
            return Err(Error::Fail);
        }
        Ok(())
    }

    fn cmd(&self) -> vk::CommandBuffer {
        self.native.expect("recording requires an attached native command buffer")
    }

    // ---- Begin / Close / Reset ------------------------------------

    /// Attaches to `allocator`, allocates a native command buffer (I1:
    /// fails if the allocator already has an open list), and enters
    /// recording+valid state.
    pub fn begin(&mut self, allocator: &mut CommandAllocator, initial_pso: Option<Arc<dyn PipelineState>>) -> Result<()> {
        if self.is_recording {
            return Err(Error::Fail);
        }
        let buffer = allocator.allocate_command_buffer()?;
        self.native = Some(buffer);
        self.is_recording = true;
        self.is_valid = true;
        self.reset_tracked_state();
        if let Some(pso) = initial_pso {
            self.set_pipeline_state(pso);
        }
        Ok(())
    }

    fn reset_tracked_state(&mut self) {
        self.pipeline = None;
        self.render_pass = None;
        self.framebuffer = None;
        self.render_pass_active = false;
        self.render_pass_suspended = false;
        self.render_targets.clear();
        self.depth_stencil = None;
        self.depth_stencil_layout = vk::ImageLayout::UNDEFINED;
        self.deferred_clears = DeferredClears::default();
        self.dynamic_state = DynamicState::default();
        self.graphics_bindings = PipelineBindings::default();
        self.compute_bindings = PipelineBindings::default();
        self.descriptor_heap_sets.clear();
        self.xfb_enabled = false;
        self.xfb_targets = StreamOutputTargets::default();
        self.is_predicated = false;
        self.index_buffer_format = None;
    }

    /// Ends any active render pass and predication block, calls
    /// `vkEndCommandBuffer`, and un-parents the allocator. Returns
    /// `InvalidArg` if `is_valid` is false (a recording-time error was
    /// absorbed earlier).
    pub fn close(&mut self, allocator: &mut CommandAllocator) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();
        if self.is_predicated {
            // VK_EXT_conditional_rendering lives behind its own extension
            // loader, which the device-context seam (§6) does not expose;
            // a concrete device wires the matching cmd_end_conditional_rendering_ext
            // call in its own command-recording wrapper.
            self.is_predicated = false;
        }

        let cmd = self.cmd();
        let result = unsafe { self.device.raw().end_command_buffer(cmd) };
        self.is_recording = false;
        allocator.free_command_buffer(cmd);
        self.native = None;

        if !self.is_valid {
            return Err(Error::InvalidArg);
        }
        result.map_err(Error::from)
    }

    /// Requires `!is_recording`. Re-allocates a native buffer from
    /// `allocator` and resets every piece of tracked state to the listed
    /// defaults.
    pub fn reset(&mut self, allocator: &mut CommandAllocator, initial_pso: Option<Arc<dyn PipelineState>>) -> Result<()> {
        if self.is_recording {
            return Err(Error::Fail);
        }
        self.begin(allocator, initial_pso)
    }

    // ---- Render-pass state machine (I2, I3) ------------------------

    /// Ends the current pass for a layout-neutral interruption: the
    /// attachments keep their logical layout ownership (render-pass
    /// "suspension"), so a subsequent draw resumes without re-emitting
    /// begin-of-pass transitions.
    fn suspend_render_pass(&mut self) {
        if self.render_pass_active {
            unsafe { self.device.raw().cmd_end_render_pass(self.cmd()) };
            self.render_pass_active = false;
            self.render_pass_suspended = true;
        }
    }

    /// Fully ends the current pass, clearing the suspension flag too (used
    /// whenever the pass must not be logically resumable, e.g. a pipeline
    /// change that alters render-pass compatibility, or `Close`).
    fn end_render_pass(&mut self) {
        if self.render_pass_active {
            unsafe { self.device.raw().cmd_end_render_pass(self.cmd()) };
            self.render_pass_active = false;
        }
        self.render_pass_suspended = false;
    }

    /// Lazily begins a render pass for the currently bound pipeline + RTVs.
    /// Converts any deferred clear on an attachment that's part of this
    /// pass and is in a writable layout into `LOAD_OP_CLEAR` (I3); all
    /// other pending clears are emitted as sub-region clears right after.
    fn begin_render_pass(&mut self) -> Result<()> {
        if self.render_pass_active {
            return Ok(());
        }
        let pipeline = match &self.pipeline {
            Some(p) => Arc::clone(p),
            None => return Err(Error::Fail),
        };

        let dsv_format = self.depth_stencil.map(|d| d.format);
        let (native_pipeline, render_pass) = pipeline
            .get_or_create_pipeline(self.dynamic_state.dirty, dsv_format)?;
        self.render_pass = Some(RenderPass(render_pass));

        let extent = self.framebuffer_extent();
        let attachment_views: SmallVec<[vk::ImageView; 9]> = self
            .render_targets
            .iter()
            .map(|rt| rt.image_view)
            .chain(self.depth_stencil.iter().map(|ds| ds.image_view))
            .collect();

        let fb_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachment_views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let create_result = unsafe { self.device.raw().create_framebuffer(&fb_info, None) };
        let framebuffer = self.mark_invalid_on_error(create_result)?;
        self.framebuffer = Some(Framebuffer(framebuffer));

        let mut clear_values: SmallVec<[vk::ClearValue; 9]> = SmallVec::new();
        for i in 0..attachment_views.len() {
            if let Some((aspect, value)) = self.deferred_clears.take(i) {
                // Upgraded to LOAD_OP_CLEAR by the render-pass object the
                // pipeline layer constructed for us; we only need to
                // supply the matching clear value here.
                clear_values.push(Self::vk_clear_value(aspect, value));
            } else {
                clear_values.push(vk::ClearValue::default());
            }
        }

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device
                .raw()
                .cmd_begin_render_pass(self.cmd(), &begin_info, vk::SubpassContents::INLINE);
            self.device.raw().cmd_bind_pipeline(
                self.cmd(),
                vk::PipelineBindPoint::GRAPHICS,
                native_pipeline,
            );
        }
        self.apply_dirty_dynamic_state();
        self.render_pass_active = true;
        self.render_pass_suspended = false;
        self.dynamic_state.dirty = DynamicStateFlags::empty();
        Ok(())
    }

    /// Re-emits every dynamic-state category the pipeline just bound
    /// dynamically and that this list has touched since the last bind
    /// (I4: a dynamic slot a pipeline newly declares must be re-applied
    /// even if its value didn't change, since the replaced pipeline used
    /// to bake it in statically).
    fn apply_dirty_dynamic_state(&self) {
        let dirty = self.dynamic_state.dirty;
        let cmd = self.cmd();
        unsafe {
            if dirty.contains(DynamicStateFlags::VIEWPORT) {
                self.device.raw().cmd_set_viewport(
                    cmd,
                    0,
                    &self.dynamic_state.viewports[..self.dynamic_state.viewport_count as usize],
                );
            }
            if dirty.contains(DynamicStateFlags::SCISSOR) {
                self.device.raw().cmd_set_scissor(
                    cmd,
                    0,
                    &self.dynamic_state.scissors[..self.dynamic_state.scissor_count as usize],
                );
            }
            if dirty.contains(DynamicStateFlags::BLEND_CONSTANTS) {
                self.device
                    .raw()
                    .cmd_set_blend_constants(cmd, &self.dynamic_state.blend_constants);
            }
            if dirty.contains(DynamicStateFlags::STENCIL_REF) {
                self.device.raw().cmd_set_stencil_reference(
                    cmd,
                    vk::StencilFaceFlags::FRONT_AND_BACK,
                    self.dynamic_state.stencil_ref,
                );
            }
            if dirty.contains(DynamicStateFlags::DEPTH_BOUNDS) {
                self.device.raw().cmd_set_depth_bounds(
                    cmd,
                    self.dynamic_state.depth_bounds.0,
                    self.dynamic_state.depth_bounds.1,
                );
            }
            if dirty.contains(DynamicStateFlags::PRIMITIVE_TOPOLOGY) {
                // Requires VK_EXT_extended_dynamic_state / Vulkan 1.3; a
                // pipeline only declares this dynamic slot when the device
                // negotiated that support.
                self.device
                    .raw()
                    .cmd_set_primitive_topology(cmd, self.dynamic_state.primitive_topology);
            }
        }
    }

    pub fn rs_set_viewports(&mut self, viewports: &[vk::Viewport]) {
        let count = viewports.len().min(self.dynamic_state.viewports.len());
        self.dynamic_state.viewports[..count].copy_from_slice(&viewports[..count]);
        self.dynamic_state.viewport_count = count as u32;
        self.dynamic_state.dirty |= DynamicStateFlags::VIEWPORT;
    }

    pub fn rs_set_scissor_rects(&mut self, rects: &[vk::Rect2D]) {
        let count = rects.len().min(self.dynamic_state.scissors.len());
        self.dynamic_state.scissors[..count].copy_from_slice(&rects[..count]);
        self.dynamic_state.scissor_count = count as u32;
        self.dynamic_state.dirty |= DynamicStateFlags::SCISSOR;
    }

    pub fn om_set_blend_factor(&mut self, factor: [f32; 4]) {
        self.dynamic_state.blend_constants = factor;
        self.dynamic_state.dirty |= DynamicStateFlags::BLEND_CONSTANTS;
    }

    pub fn om_set_stencil_ref(&mut self, reference: u32) {
        self.dynamic_state.stencil_ref = reference;
        self.dynamic_state.dirty |= DynamicStateFlags::STENCIL_REF;
    }

    pub fn om_set_depth_bounds(&mut self, min: f32, max: f32) {
        self.dynamic_state.depth_bounds = (min, max);
        self.dynamic_state.dirty |= DynamicStateFlags::DEPTH_BOUNDS;
    }

    pub fn ia_set_primitive_topology(&mut self, topology: vk::PrimitiveTopology) {
        if self.dynamic_state.primitive_topology != topology {
            self.dynamic_state.primitive_topology = topology;
            self.dynamic_state.dirty |= DynamicStateFlags::PRIMITIVE_TOPOLOGY;
        }
    }

    /// `IASetIndexBuffer`. `format` is `None` for a null binding (D3D12
    /// allows unbinding the index buffer); the tracked format feeds
    /// `draw_indexed`'s strip-cut compatibility check.
    pub fn ia_set_index_buffer(
        &mut self,
        format: Option<vk::IndexType>,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) -> Result<()> {
        self.require_recording()?;
        self.index_buffer_format = format;
        if let Some(index_type) = format {
            unsafe {
                self.device
                    .raw()
                    .cmd_bind_index_buffer(self.cmd(), buffer, offset, index_type);
            }
        }
        Ok(())
    }

    fn vk_clear_value(aspect: vk::ImageAspectFlags, value: ClearValue) -> vk::ClearValue {
        if aspect.contains(vk::ImageAspectFlags::COLOR) {
            vk::ClearValue {
                color: vk::ClearColorValue { float32: value.color },
            }
        } else {
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: value.depth,
                    stencil: value.stencil,
                },
            }
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let mut extent: Option<vk::Extent2D> = None;
        for rt in &self.render_targets {
            extent = Some(match extent {
                Some(e) => vk::Extent2D {
                    width: e.width.min(rt.extent.width),
                    height: e.height.min(rt.extent.height),
                },
                None => rt.extent,
            });
        }
        if let Some(ds) = self.depth_stencil {
            extent = Some(match extent {
                Some(e) => vk::Extent2D {
                    width: e.width.min(ds.extent.width),
                    height: e.height.min(ds.extent.height),
                },
                None => ds.extent,
            });
        }
        extent.unwrap_or_else(|| self.device.max_framebuffer_extent())
    }

    // ---- Draws / dispatch -------------------------------------------

    pub fn draw(
        &mut self,
        allocator: &mut CommandAllocator,
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    ) -> Result<()> {
        self.require_recording()?;
        self.begin_render_pass()?;
        self.update_descriptors(allocator, BindPoint::Graphics);
        unsafe {
            self.device.raw().cmd_draw(
                self.cmd(),
                vertex_count,
                instance_count,
                start_vertex,
                start_instance,
            );
        }
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        allocator: &mut CommandAllocator,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> Result<()> {
        self.require_recording()?;
        if let Some(pipeline) = &self.pipeline {
            if let Some(required) = pipeline.strip_cut_requires_index_format() {
                if self.index_buffer_format != Some(required) {
                    log::debug!(
                        "pipeline's strip-cut value requires index format {:?}, bound format is {:?}",
                        required,
                        self.index_buffer_format
                    );
                }
            }
        }
        self.begin_render_pass()?;
        self.update_descriptors(allocator, BindPoint::Graphics);
        unsafe {
            self.device.raw().cmd_draw_indexed(
                self.cmd(),
                index_count,
                instance_count,
                start_index,
                base_vertex,
                start_instance,
            );
        }
        Ok(())
    }

    /// `update_compute_state`: ends the current pass, rebinds the compute
    /// pipeline if dirty, updates descriptors, then dispatches.
    pub fn dispatch(&mut self, allocator: &mut CommandAllocator, x: u32, y: u32, z: u32) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();
        if let Some(pipeline) = &self.pipeline {
            if pipeline.bind_point() == BindPoint::Compute {
                unsafe {
                    self.device.raw().cmd_bind_pipeline(
                        self.cmd(),
                        vk::PipelineBindPoint::COMPUTE,
                        pipeline.native(),
                    );
                }
            }
        }
        self.update_descriptors(allocator, BindPoint::Compute);
        unsafe { self.device.raw().cmd_dispatch(self.cmd(), x, y, z) };
        Ok(())
    }

    // ---- Pipeline state / root signature -----------------------------

    /// `dirty |= new.dynamic_state_flags & ~old.dynamic_state_flags`: a
    /// newly-dynamic piece of state needs re-application even if its value
    /// hasn't changed, since the old pipeline baked it in statically.
    pub fn set_pipeline_state(&mut self, pso: Arc<dyn PipelineState>) {
        let old_flags = self
            .pipeline
            .as_ref()
            .map(|p| p.dynamic_state_flags())
            .unwrap_or_else(DynamicStateFlags::empty);
        let new_flags = pso.dynamic_state_flags();
        self.dynamic_state.dirty |= new_flags & !old_flags;

        let changes_render_pass_compat = self
            .pipeline
            .as_ref()
            .map(|p| p.render_pass_compat_key() != pso.render_pass_compat_key())
            .unwrap_or(true);
        if changes_render_pass_compat {
            self.end_render_pass();
        }
        self.pipeline = Some(pso);
    }

    /// Binding a new root signature invalidates every piece of bound root
    /// state: the layout it addresses descriptor-heap/static-sampler/root
    /// descriptor sets with may have changed shape entirely.
    pub fn set_root_signature(&mut self, bind_point: BindPoint, root_signature: Arc<dyn RootSignature>) {
        let bindings = self.bindings_mut(bind_point);
        bindings.root_signature = Some(root_signature);
        bindings.dirty_descriptor_heaps = true;
        bindings.dirty_static_samplers = true;
        bindings.dirty_packed_descriptors = true;
        bindings.dirty_root_descriptors = true;
        bindings.dirty_root_constants = true;
        bindings.dirty_table_offsets = true;
        bindings.dirty_uav_counters = true;
    }

    /// `SetDescriptorHeaps`: descriptor heaps are bound globally, not per
    /// bind point, so both graphics and compute bindings are marked dirty.
    /// Rebinding the heaps also invalidates the UAV-counter buffer a
    /// bindless root signature reads from, since it lives in the same heap.
    pub fn set_descriptor_heaps(&mut self, sets: &[vk::DescriptorSet]) {
        self.descriptor_heap_sets = sets.iter().copied().collect();
        for bindings in [&mut self.graphics_bindings, &mut self.compute_bindings] {
            bindings.dirty_descriptor_heaps = true;
            bindings.dirty_uav_counters = true;
        }
    }

    /// `SetGraphicsRoot{Constant,Shader,UnorderedAccess}View`/
    /// `SetComputeRoot*View`: records the raw GPU address for a root
    /// descriptor parameter. Resolved to an actual buffer range lazily in
    /// `update_descriptors`, once it's known whether a draw/dispatch will
    /// actually consume it.
    pub fn set_root_descriptor(&mut self, bind_point: BindPoint, root_parameter_index: u32, gpu_address: u64) {
        self.bindings_mut(bind_point)
            .set_root_descriptor(root_parameter_index, gpu_address);
    }

    /// Root signatures built with `USE_BINDLESS_UAV_COUNTERS` read the
    /// active heap's UAV-counter buffer through a root descriptor binding
    /// of their own; this is normally populated by `set_descriptor_heaps`,
    /// but can be refreshed independently (e.g. a counter buffer swap
    /// without a full heap rebind).
    pub fn set_uav_counter_buffer(&mut self, bind_point: BindPoint, buffer: Option<vk::Buffer>) {
        let bindings = self.bindings_mut(bind_point);
        bindings.uav_counter_buffer = buffer;
        bindings.dirty_uav_counters = true;
    }

    /// `SOSetTargets`: records the stream-output buffer/counter-buffer
    /// slots and flips `xfb_enabled`. See `StreamOutputTargets`'s doc
    /// comment for why no native call is issued here.
    pub fn so_set_targets(&mut self, start_slot: u32, views: &[StreamOutputBufferView]) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();
        self.xfb_targets = StreamOutputTargets {
            start_slot,
            views: views.iter().copied().collect(),
        };
        self.xfb_enabled = !views.is_empty();
        Ok(())
    }

    fn bindings_mut(&mut self, bind_point: BindPoint) -> &mut PipelineBindings {
        match bind_point {
            BindPoint::Graphics => &mut self.graphics_bindings,
            BindPoint::Compute => &mut self.compute_bindings,
        }
    }

    /// Root-parameter update strategy: each dirty flag maps to exactly one
    /// backend update path. When the root signature uses an inline-uniform
    /// block, root constants and table offsets are packed into a single
    /// inline-uniform-block write alongside any dirty root descriptors.
    fn update_descriptors(&mut self, allocator: &mut CommandAllocator, bind_point: BindPoint) {
        // Snapshot everything this pass needs out of `bindings` up front:
        // the rest of this function interleaves `self.device`/`self.cmd()`
        // calls with backend updates, and those can't run while a `&mut
        // PipelineBindings` borrowed from `self` is still live.
        let bindings = self.bindings_mut(bind_point);
        if !bindings.any_dirty() {
            return;
        }
        let root_signature = match &bindings.root_signature {
            Some(rs) => Arc::clone(rs),
            None => return,
        };
        let dirty_descriptor_heaps = bindings.dirty_descriptor_heaps;
        let dirty_static_samplers = bindings.dirty_static_samplers;
        let dirty_root_constants = bindings.dirty_root_constants;
        let dirty_table_offsets = bindings.dirty_table_offsets;
        let dirty_root_descriptors = bindings.dirty_root_descriptors;
        let dirty_uav_counters = bindings.dirty_uav_counters;
        let dirty_packed_descriptors = bindings.dirty_packed_descriptors;
        let root_constants: SmallVec<[u32; 64]> = bindings.root_constants.clone();

        let vk_bind_point = match bind_point {
            BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
            BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
        };
        let layout = root_signature.pipeline_layout();
        let use_iub = root_signature
            .flags()
            .contains(crate::resource::RootSignatureFlags::USE_INLINE_UNIFORM_BLOCK);

        if dirty_descriptor_heaps && !self.descriptor_heap_sets.is_empty() {
            unsafe {
                self.device.raw().cmd_bind_descriptor_sets(
                    self.cmd(),
                    vk_bind_point,
                    layout,
                    0,
                    &self.descriptor_heap_sets,
                    &[],
                );
            }
        }

        if dirty_static_samplers {
            if let Some(set) = root_signature.static_sampler_set() {
                unsafe {
                    self.device.raw().cmd_bind_descriptor_sets(
                        self.cmd(),
                        vk_bind_point,
                        layout,
                        self.descriptor_heap_sets.len() as u32,
                        &[set],
                        &[],
                    );
                }
            }
        }

        if use_iub && (dirty_root_constants || dirty_table_offsets) {
            if let Some(binding) = root_signature.inline_uniform_block_binding() {
                // VK_EXT_inline_uniform_block writes go through
                // vkUpdateDescriptorSets with a
                // WriteDescriptorSetInlineUniformBlock pNext chain; the
                // concrete descriptor-set owner (out of scope per §6) is
                // what actually issues that write, keyed on this binding.
                let _ = (binding, vk_bind_point, layout);
                log::trace!("inline-uniform-block root data is dirty for binding {}", binding);
            }
        } else if let Some(range) = root_signature.push_constant_range() {
            if dirty_root_constants && !root_constants.is_empty() {
                unsafe {
                    self.device.raw().cmd_push_constants(
                        self.cmd(),
                        layout,
                        range.stage_flags,
                        range.offset,
                        bytemuck_cast_u32_slice(root_constants.as_slice()),
                    );
                }
            }
        }

        if dirty_root_descriptors || dirty_uav_counters {
            self.update_root_descriptor_set(allocator, bind_point, &root_signature, vk_bind_point, layout);
        }

        if dirty_packed_descriptors {
            // The deferred-update path: when the device supports
            // update-after-bind on volatile pools, the write is recorded
            // and replayed at submit time instead of issued eagerly here
            // (D3D12-conformant RS 1.0 semantics for volatile tables).
            let deferred = self
                .device
                .features()
                .contains(crate::device::Features::UPDATE_AFTER_BIND);
            if !deferred {
                log::debug!("binding packed descriptor set eagerly (no update-after-bind support)");
            }
        }

        self.bindings_mut(bind_point).clear();
    }

    /// Allocates (or reuses, via the caller's pool cache) a descriptor set
    /// for every dirty root CBV/SRV/UAV and the UAV-counter binding, writes
    /// what it can resolve, and binds the set. Root descriptors whose raw
    /// GPU address doesn't resolve through `dereference_gpu_address` (the
    /// VA map is out of scope, §1) are logged and left unbound rather than
    /// guessed at.
    fn update_root_descriptor_set(
        &mut self,
        allocator: &mut CommandAllocator,
        bind_point: BindPoint,
        root_signature: &Arc<dyn RootSignature>,
        vk_bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
    ) {
        let set_layout = match root_signature.root_descriptor_set_layout() {
            Some(l) => l,
            None => return,
        };
        let set = match allocator.allocate_descriptor_set(DescriptorPoolKind::Static, set_layout, false) {
            Ok(set) => set,
            Err(e) => {
                log::warn!("failed to allocate root-descriptor set: {:?}", e);
                return;
            }
        };

        let bindings = self.bindings_mut(bind_point);
        let root_descriptors: SmallVec<[(u32, u64); 16]> = bindings.root_descriptors.clone();
        let uav_counter_buffer = bindings.uav_counter_buffer;

        let mut buffer_infos: SmallVec<[vk::DescriptorBufferInfo; 16]> = SmallVec::new();
        let mut writes: SmallVec<[(u32, usize); 16]> = SmallVec::new();

        for (root_parameter_index, gpu_address) in root_descriptors {
            let binding = match root_signature.root_descriptor_binding(root_parameter_index) {
                Some(b) => b,
                None => continue,
            };
            match self.device.dereference_gpu_address(gpu_address) {
                Some(info) => {
                    buffer_infos.push(info);
                    writes.push((binding, buffer_infos.len() - 1));
                }
                None => log::warn!(
                    "could not resolve root parameter {} (GPU address {:#x}); leaving its binding stale",
                    root_parameter_index,
                    gpu_address
                ),
            }
        }

        if let (Some(buffer), Some(binding)) = (uav_counter_buffer, root_signature.uav_counter_binding()) {
            buffer_infos.push(vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range: vk::WHOLE_SIZE,
            });
            writes.push((binding, buffer_infos.len() - 1));
        }

        let descriptor_writes: SmallVec<[vk::WriteDescriptorSet; 16]> = writes
            .iter()
            .map(|&(binding, info_index)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_infos[info_index]))
                    .build()
            })
            .collect();

        if !descriptor_writes.is_empty() {
            unsafe {
                self.device.raw().update_descriptor_sets(&descriptor_writes, &[]);
            }
        }
        unsafe {
            self.device.raw().cmd_bind_descriptor_sets(
                self.cmd(),
                vk_bind_point,
                layout,
                self.descriptor_heap_sets.len() as u32 + 1,
                &[set],
                &[],
            );
        }
    }

    // ---- Resource first-use (I5) --------------------------------------

    /// On first use of a resource carrying an initial-state flag, emits an
    /// undefined-layout → common-layout transition and clears the flag
    /// (I5). A no-op for a resource that has already been used, or for a
    /// buffer (no layout to transition).
    fn consume_initial_state(&mut self, resource: &dyn Resource) {
        if resource.initial_state().is_some() {
            self.emit_layout_transition(resource, vk::ImageLayout::UNDEFINED, resource.common_layout());
            resource.clear_initial_state();
        }
    }

    // ---- Copy family --------------------------------------------------

    pub fn copy_buffer_region(
        &mut self,
        dst: &dyn Resource,
        dst_offset: vk::DeviceSize,
        src: &dyn Resource,
        src_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        self.require_recording()?;
        self.suspend_render_pass();
        self.consume_initial_state(dst);
        self.consume_initial_state(src);
        let (dst_buf, src_buf) = match (dst.native_buffer(), src.native_buffer()) {
            (Some(d), Some(s)) => (d, s),
            _ => return Err(Error::InvalidArg),
        };
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device
                .raw()
                .cmd_copy_buffer(self.cmd(), src_buf, dst_buf, &[region]);
        }
        Ok(())
    }

    /// Texture→texture copies with identical aspect sets use a native
    /// image copy; a mismatched aspect set (e.g. a typeless resource
    /// copied between a color and a depth/stencil view) falls back to the
    /// meta copy-image graphics pipeline.
    pub fn copy_texture_region(
        &mut self,
        allocator: &mut CommandAllocator,
        dst: &dyn Resource,
        src: &dyn Resource,
        region: vk::ImageCopy,
    ) -> Result<()> {
        self.require_recording()?;
        self.suspend_render_pass();
        self.consume_initial_state(dst);
        self.consume_initial_state(src);
        let (dst_img, src_img) = match (dst.native_image(), src.native_image()) {
            (Some(d), Some(s)) => (d, s),
            _ => return Err(Error::InvalidArg),
        };

        if dst.aspect_mask() != src.aspect_mask() {
            return self.copy_texture_region_meta(allocator, dst, src, region);
        }

        self.transition_for_transfer(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        self.transition_for_transfer(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        unsafe {
            self.device.raw().cmd_copy_image(
                self.cmd(),
                src_img,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_img,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.transition_from_transfer(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        self.transition_from_transfer(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        Ok(())
    }

    /// The mismatched-aspect/format fallback: samples `src` in a
    /// full-screen-triangle draw scissored to `region`, into a dedicated
    /// render pass targeting `dst`. Requires the device to provide a meta
    /// copy-image pipeline (out of scope per §1's shader compiler
    /// boundary, so most devices leave this `None`); when it can't, the
    /// copy is logged and skipped rather than silently falling back to a
    /// native copy that would corrupt mismatched-aspect data.
    fn copy_texture_region_meta(
        &mut self,
        allocator: &mut CommandAllocator,
        dst: &dyn Resource,
        src: &dyn Resource,
        region: vk::ImageCopy,
    ) -> Result<()> {
        let meta = match self.device.meta_copy_image_pipeline(dst.format(), src.format()) {
            Some(m) => m,
            None => {
                log::warn!(
                    "no meta copy-image pipeline available for format pair ({:?}, {:?}); mismatched-aspect copy skipped",
                    dst.format(),
                    src.format()
                );
                return Ok(());
            }
        };
        let (dst_img, src_img) = match (dst.native_image(), src.native_image()) {
            (Some(d), Some(s)) => (d, s),
            _ => return Err(Error::InvalidArg),
        };

        self.transition_for_transfer(src, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        self.emit_layout_transition(dst, dst.common_layout(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let src_view_info = vk::ImageViewCreateInfo::builder()
            .image(src_img)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(src.format())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: src.aspect_mask(),
                base_mip_level: region.src_subresource.mip_level,
                level_count: 1,
                base_array_layer: region.src_subresource.base_array_layer,
                layer_count: region.src_subresource.layer_count,
            });
        let src_view_result = unsafe { self.device.raw().create_image_view(&src_view_info, None) };
        let src_view = self.mark_invalid_on_error(src_view_result)?;
        allocator.add_image_view_ref(ImageView(src_view));

        let dst_view_info = vk::ImageViewCreateInfo::builder()
            .image(dst_img)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(dst.format())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: dst.aspect_mask(),
                base_mip_level: region.dst_subresource.mip_level,
                level_count: 1,
                base_array_layer: region.dst_subresource.base_array_layer,
                layer_count: region.dst_subresource.layer_count,
            });
        let dst_view_result = unsafe { self.device.raw().create_image_view(&dst_view_info, None) };
        let dst_view = self.mark_invalid_on_error(dst_view_result)?;
        allocator.add_image_view_ref(ImageView(dst_view));

        let set = allocator.allocate_descriptor_set(DescriptorPoolKind::Static, meta.descriptor_set_layout, false)?;
        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: src_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info)
            .build();
        unsafe { self.device.raw().update_descriptor_sets(&[write], &[]) };

        let views = [dst_view];
        let fb_info = vk::FramebufferCreateInfo::builder()
            .render_pass(meta.render_pass)
            .attachments(&views)
            .width(region.extent.width.max(1))
            .height(region.extent.height.max(1))
            .layers(1);
        let framebuffer_result = unsafe { self.device.raw().create_framebuffer(&fb_info, None) };
        let framebuffer = self.mark_invalid_on_error(framebuffer_result)?;
        allocator.add_framebuffer(Framebuffer(framebuffer));

        let render_area = vk::Rect2D {
            offset: vk::Offset2D {
                x: region.dst_offset.x,
                y: region.dst_offset.y,
            },
            extent: vk::Extent2D {
                width: region.extent.width,
                height: region.extent.height,
            },
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(meta.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area);
        unsafe {
            self.device
                .raw()
                .cmd_begin_render_pass(self.cmd(), &begin_info, vk::SubpassContents::INLINE);
            self.device
                .raw()
                .cmd_bind_pipeline(self.cmd(), vk::PipelineBindPoint::GRAPHICS, meta.pipeline);
            self.device
                .raw()
                .cmd_bind_descriptor_sets(self.cmd(), vk::PipelineBindPoint::GRAPHICS, meta.pipeline_layout, 0, &[set], &[]);
            self.device.raw().cmd_set_viewport(
                self.cmd(),
                0,
                &[vk::Viewport {
                    x: render_area.offset.x as f32,
                    y: render_area.offset.y as f32,
                    width: render_area.extent.width as f32,
                    height: render_area.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            self.device.raw().cmd_set_scissor(self.cmd(), 0, &[render_area]);
            self.device.raw().cmd_draw(self.cmd(), 3, 1, 0, 0);
            self.device.raw().cmd_end_render_pass(self.cmd());
        }

        self.transition_from_transfer(src, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        self.emit_layout_transition(dst, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, dst.common_layout());
        self.pipeline = None;
        self.graphics_bindings = PipelineBindings::default();
        Ok(())
    }

    /// `CopyTextureRegion` with a buffer-typed source location.
    pub fn copy_buffer_to_texture(
        &mut self,
        dst_texture: &dyn Resource,
        src_buffer: &dyn Resource,
        region: vk::BufferImageCopy,
    ) -> Result<()> {
        self.require_recording()?;
        self.suspend_render_pass();
        self.consume_initial_state(dst_texture);
        let (dst_img, src_buf) = match (dst_texture.native_image(), src_buffer.native_buffer()) {
            (Some(d), Some(s)) => (d, s),
            _ => return Err(Error::InvalidArg),
        };
        self.transition_for_transfer(dst_texture, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        unsafe {
            self.device.raw().cmd_copy_buffer_to_image(
                self.cmd(),
                src_buf,
                dst_img,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.transition_from_transfer(dst_texture, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        Ok(())
    }

    /// `CopyTextureRegion` with a buffer-typed destination location.
    pub fn copy_texture_to_buffer(
        &mut self,
        dst_buffer: &dyn Resource,
        src_texture: &dyn Resource,
        region: vk::BufferImageCopy,
    ) -> Result<()> {
        self.require_recording()?;
        self.suspend_render_pass();
        self.consume_initial_state(src_texture);
        let (dst_buf, src_img) = match (dst_buffer.native_buffer(), src_texture.native_image()) {
            (Some(d), Some(s)) => (d, s),
            _ => return Err(Error::InvalidArg),
        };
        self.transition_for_transfer(src_texture, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        unsafe {
            self.device.raw().cmd_copy_image_to_buffer(
                self.cmd(),
                src_img,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_buf,
                &[region],
            );
        }
        self.transition_from_transfer(src_texture, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        Ok(())
    }

    // ---- ResolveSubresource ---------------------------------------------

    /// `ResolveSubresourceRegion`: the caller controls src/dst offsets and
    /// extent directly.
    pub fn resolve_subresource_region(
        &mut self,
        dst: &dyn Resource,
        src: &dyn Resource,
        region: vk::ImageResolve,
    ) -> Result<()> {
        self.require_recording()?;
        self.suspend_render_pass();
        self.consume_initial_state(dst);
        self.consume_initial_state(src);
        let (dst_img, src_img) = match (dst.native_image(), src.native_image()) {
            (Some(d), Some(s)) => (d, s),
            _ => return Err(Error::InvalidArg),
        };
        self.transition_for_transfer(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        self.transition_for_transfer(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        unsafe {
            self.device.raw().cmd_resolve_image(
                self.cmd(),
                src_img,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_img,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.transition_from_transfer(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        self.transition_from_transfer(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        Ok(())
    }

    /// `ResolveSubresource`: always resolves the full subresource at
    /// offset (0,0,0), unlike `ResolveSubresourceRegion`.
    pub fn resolve_subresource(
        &mut self,
        dst: &dyn Resource,
        dst_subresource: vk::ImageSubresourceLayers,
        src: &dyn Resource,
        src_subresource: vk::ImageSubresourceLayers,
        extent: vk::Extent3D,
    ) -> Result<()> {
        self.resolve_subresource_region(
            dst,
            src,
            vk::ImageResolve {
                src_subresource,
                src_offset: vk::Offset3D::default(),
                dst_subresource,
                dst_offset: vk::Offset3D::default(),
                extent,
            },
        )
    }

    fn transition_for_transfer(&mut self, resource: &dyn Resource, target_layout: vk::ImageLayout) {
        self.emit_layout_transition(resource, resource.common_layout(), target_layout);
    }

    fn transition_from_transfer(&mut self, resource: &dyn Resource, from_layout: vk::ImageLayout) {
        self.emit_layout_transition(resource, from_layout, resource.common_layout());
    }

    fn emit_layout_transition(
        &mut self,
        resource: &dyn Resource,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let image = match resource.native_image() {
            Some(i) => i,
            None => return,
        };
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: resource.aspect_mask(),
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        unsafe {
            self.device.raw().cmd_pipeline_barrier(
                self.cmd(),
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }
    }

    // ---- ResourceBarrier ------------------------------------------------

    /// Transition barriers: `PRESENT` transitions emit an image-memory
    /// barrier with a layout change; every other transition this API call
    /// describes collapses into one global memory barrier with aggregated
    /// src/dst stage+access masks (§4.5).
    pub fn resource_barrier_transition(
        &mut self,
        resources: &[(&dyn Resource, ResourceState, ResourceState)],
    ) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();

        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let mut src_access = vk::AccessFlags::empty();
        let mut dst_access = vk::AccessFlags::empty();
        let mut image_barriers: SmallVec<[vk::ImageMemoryBarrier; 4]> = SmallVec::new();

        for (resource, before, after) in resources {
            self.consume_initial_state(*resource);
            let before_sa = translate_resource_state(*before, resource.kind(), self.queue_caps);
            let after_sa = translate_resource_state(*after, resource.kind(), self.queue_caps);

            if before.contains(ResourceState::PRESENT) || after.contains(ResourceState::PRESENT) {
                if let Some(image) = resource.native_image() {
                    let old_layout = if before.contains(ResourceState::PRESENT) {
                        vk::ImageLayout::PRESENT_SRC_KHR
                    } else {
                        resource.common_layout()
                    };
                    let new_layout = if after.contains(ResourceState::PRESENT) {
                        vk::ImageLayout::PRESENT_SRC_KHR
                    } else {
                        resource.common_layout()
                    };
                    image_barriers.push(
                        vk::ImageMemoryBarrier::builder()
                            .old_layout(old_layout)
                            .new_layout(new_layout)
                            .src_access_mask(before_sa.access)
                            .dst_access_mask(after_sa.access)
                            .image(image)
                            .subresource_range(vk::ImageSubresourceRange {
                                aspect_mask: resource.aspect_mask(),
                                base_mip_level: 0,
                                level_count: vk::REMAINING_MIP_LEVELS,
                                base_array_layer: 0,
                                layer_count: vk::REMAINING_ARRAY_LAYERS,
                            })
                            .build(),
                    );
                }
                continue;
            }

            src_stage |= before_sa.stage;
            dst_stage |= after_sa.stage;
            src_access |= before_sa.access;
            dst_access |= after_sa.access;
        }

        let memory_barrier = vk::MemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        let memory_barriers = if src_access.is_empty() && dst_access.is_empty() {
            [].as_slice()
        } else {
            std::slice::from_ref(&memory_barrier)
        };

        unsafe {
            self.device.raw().cmd_pipeline_barrier(
                self.cmd(),
                if src_stage.is_empty() {
                    vk::PipelineStageFlags::TOP_OF_PIPE
                } else {
                    src_stage
                },
                if dst_stage.is_empty() {
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE
                } else {
                    dst_stage
                },
                vk::DependencyFlags::empty(),
                memory_barriers,
                &[],
                &image_barriers,
            );
        }
        Ok(())
    }

    /// UAV barrier: one memory barrier between UAV-capable shader stages,
    /// gated by the owning queue's capability bits.
    pub fn resource_barrier_uav(&mut self) -> Result<()> {
        self.require_recording()?;
        let sa = uav_barrier_stage_access(self.queue_caps);
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(sa.access)
            .dst_access_mask(sa.access)
            .build();
        unsafe {
            self.device.raw().cmd_pipeline_barrier(
                self.cmd(),
                sa.stage,
                sa.stage,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
        Ok(())
    }

    /// Aliasing barriers are recognized but not implemented, per §4.5.
    pub fn resource_barrier_aliasing(&mut self) -> Result<()> {
        self.require_recording()?;
        log::warn!("aliasing barrier requested; not implemented, treated as a no-op");
        Ok(())
    }

    /// `BEGIN_ONLY` splits are ignored — the matching `END_ONLY` performs
    /// the full transition. A warning is logged, matching §4.5.
    pub fn resource_barrier_begin_only(&mut self) -> Result<()> {
        log::warn!("BEGIN_ONLY split barrier coalesced into its END_ONLY counterpart");
        Ok(())
    }

    // ---- OMSetRenderTargets / clears ------------------------------------

    pub fn om_set_render_targets(
        &mut self,
        render_targets: &[AttachmentView],
        depth_stencil: Option<(AttachmentView, vk::ImageLayout)>,
    ) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();

        self.render_targets = render_targets.iter().cloned().take(8).collect();
        if render_targets.len() > 8 {
            log::warn!("clamping {} render targets to 8", render_targets.len());
        }

        let dsv_format_changed = match (self.depth_stencil, depth_stencil) {
            (Some(old), Some((new, _))) => old.format != new.format,
            (None, Some(_)) | (Some(_), None) => true,
            (None, None) => false,
        };

        self.depth_stencil = depth_stencil.map(|(view, _)| view);
        self.depth_stencil_layout = depth_stencil
            .map(|(_, layout)| layout)
            .unwrap_or(vk::ImageLayout::UNDEFINED);

        if dsv_format_changed {
            if let Some(pipeline) = &self.pipeline {
                if pipeline.dsv_format().is_none() {
                    self.pipeline = None;
                }
            }
        }
        Ok(())
    }

    /// Full-view clears recorded outside a pass are deferred (I3); clears
    /// that are bound as an attachment with an active pass emit
    /// `vkCmdClearAttachments` directly; everything else opens a dedicated
    /// single-attachment pass.
    pub fn clear_render_target_view(
        &mut self,
        allocator: &mut CommandAllocator,
        attachment_index: usize,
        color: [f32; 4],
        rects: &[vk::Rect2D],
    ) -> Result<()> {
        self.require_recording()?;
        let view = *self
            .render_targets
            .get(attachment_index)
            .ok_or(Error::InvalidArg)?;
        let full_view_clear = rects.is_empty();

        if self.render_pass_active {
            let attachment = vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: attachment_index as u32,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
            };
            let clear_rects: SmallVec<[vk::ClearRect; 4]> = if rects.is_empty() {
                let mut v = SmallVec::new();
                v.push(vk::ClearRect {
                    rect: vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: view.extent,
                    },
                    base_array_layer: 0,
                    layer_count: 1,
                });
                v
            } else {
                rects
                    .iter()
                    .map(|r| vk::ClearRect {
                        rect: *r,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .collect()
            };
            unsafe {
                self.device
                    .raw()
                    .cmd_clear_attachments(self.cmd(), &[attachment], &clear_rects);
            }
            return Ok(());
        }

        if full_view_clear {
            self.deferred_clears.record(
                attachment_index,
                vk::ImageAspectFlags::COLOR,
                ClearValue {
                    color,
                    depth: 0.0,
                    stencil: 0,
                },
            );
            return Ok(());
        }

        self.clear_attachment_via_dedicated_pass(
            allocator,
            view.image_view,
            view.format,
            view.extent,
            vk::ImageAspectFlags::COLOR,
            vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            rects,
        )
    }

    /// Same three-way structure as `clear_render_target_view`, but for the
    /// bound depth-stencil view; `aspect_mask` restricts the clear to
    /// depth, stencil, or both per D3D12's `D3D12_CLEAR_FLAGS`.
    pub fn clear_depth_stencil_view(
        &mut self,
        allocator: &mut CommandAllocator,
        aspect_mask: vk::ImageAspectFlags,
        depth: f32,
        stencil: u32,
        rects: &[vk::Rect2D],
    ) -> Result<()> {
        self.require_recording()?;
        let view = self.depth_stencil.ok_or(Error::InvalidArg)?;
        let full_view_clear = rects.is_empty();
        let clear_value = ClearValue {
            color: [0.0; 4],
            depth,
            stencil,
        };
        // Depth is always the attachment right after the bound render
        // targets in begin_render_pass's attachment ordering.
        let depth_index = self.render_targets.len();

        if self.render_pass_active {
            let attachment = vk::ClearAttachment {
                aspect_mask,
                color_attachment: 0,
                clear_value: Self::vk_clear_value(aspect_mask, clear_value),
            };
            let clear_rects: SmallVec<[vk::ClearRect; 4]> = if rects.is_empty() {
                let mut v = SmallVec::new();
                v.push(vk::ClearRect {
                    rect: vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: view.extent,
                    },
                    base_array_layer: 0,
                    layer_count: 1,
                });
                v
            } else {
                rects
                    .iter()
                    .map(|r| vk::ClearRect {
                        rect: *r,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .collect()
            };
            unsafe {
                self.device
                    .raw()
                    .cmd_clear_attachments(self.cmd(), &[attachment], &clear_rects);
            }
            return Ok(());
        }

        if full_view_clear {
            self.deferred_clears.record(depth_index, aspect_mask, clear_value);
            return Ok(());
        }

        self.clear_attachment_via_dedicated_pass(
            allocator,
            view.image_view,
            view.format,
            view.extent,
            aspect_mask,
            Self::vk_clear_value(aspect_mask, clear_value),
            self.depth_stencil_layout,
            rects,
        )
    }

    /// Builds a throwaway single-attachment render pass + framebuffer with
    /// `LOAD_OP_LOAD` (the existing contents outside the clear rects must
    /// survive) and issues `vkCmdClearAttachments` over `rects`, for a
    /// clear requested outside an active pass that isn't a full-view
    /// clear. The render pass and framebuffer are registered with
    /// `allocator` for batch teardown at the next `Reset`.
    fn clear_attachment_via_dedicated_pass(
        &mut self,
        allocator: &mut CommandAllocator,
        image_view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent2D,
        aspect_mask: vk::ImageAspectFlags,
        clear_value: vk::ClearValue,
        layout: vk::ImageLayout,
        rects: &[vk::Rect2D],
    ) -> Result<()> {
        let is_depth = !aspect_mask.contains(vk::ImageAspectFlags::COLOR);
        let attachment_description = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::LOAD)
            .stencil_store_op(vk::AttachmentStoreOp::STORE)
            .initial_layout(layout)
            .final_layout(layout)
            .build();
        let attachment_ref = vk::AttachmentReference { attachment: 0, layout };
        let color_refs = [attachment_ref];
        let mut subpass = vk::SubpassDescription::builder().pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS);
        subpass = if is_depth {
            subpass.depth_stencil_attachment(&attachment_ref)
        } else {
            subpass.color_attachments(&color_refs)
        };
        let attachments = [attachment_description];
        let subpasses = [subpass.build()];
        let rp_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let render_pass_result = unsafe { self.device.raw().create_render_pass(&rp_info, None) };
        let render_pass = self.mark_invalid_on_error(render_pass_result)?;
        allocator.add_render_pass(RenderPass(render_pass));

        let views = [image_view];
        let fb_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer_result = unsafe { self.device.raw().create_framebuffer(&fb_info, None) };
        let framebuffer = self.mark_invalid_on_error(framebuffer_result)?;
        allocator.add_framebuffer(Framebuffer(framebuffer));

        let begin_info = vk::RenderPassBeginInfo::builder().render_pass(render_pass).framebuffer(framebuffer).render_area(
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );
        let attachment = vk::ClearAttachment {
            aspect_mask,
            color_attachment: 0,
            clear_value,
        };
        let clear_rects: SmallVec<[vk::ClearRect; 4]> = rects
            .iter()
            .map(|r| vk::ClearRect {
                rect: *r,
                base_array_layer: 0,
                layer_count: 1,
            })
            .collect();
        unsafe {
            self.device
                .raw()
                .cmd_begin_render_pass(self.cmd(), &begin_info, vk::SubpassContents::INLINE);
            self.device
                .raw()
                .cmd_clear_attachments(self.cmd(), &[attachment], &clear_rects);
            self.device.raw().cmd_end_render_pass(self.cmd());
        }
        Ok(())
    }

    // ---- ClearUAV ---------------------------------------------------------

    /// Ends any pass, invalidates pipeline and compute bindings, and
    /// dispatches a meta compute shader over the clear rects. A UAV view
    /// has no native Vulkan clear command for arbitrary storage
    /// images/texel buffers, so this always goes through the device's meta
    /// pipeline cache; when the device has none, the clear is logged and
    /// skipped.
    pub fn clear_unordered_access_view_uint(
        &mut self,
        allocator: &mut CommandAllocator,
        view: ClearUavView,
        clear_value: [u32; 4],
        rects: &[vk::Rect2D],
    ) -> Result<()> {
        self.clear_unordered_access_view(allocator, view, ClearUavValue::Uint(clear_value), rects)
    }

    pub fn clear_unordered_access_view_float(
        &mut self,
        allocator: &mut CommandAllocator,
        view: ClearUavView,
        clear_value: [f32; 4],
        rects: &[vk::Rect2D],
    ) -> Result<()> {
        self.clear_unordered_access_view(allocator, view, ClearUavValue::Float(clear_value), rects)
    }

    fn clear_unordered_access_view(
        &mut self,
        allocator: &mut CommandAllocator,
        view: ClearUavView,
        clear_value: ClearUavValue,
        rects: &[vk::Rect2D],
    ) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();
        self.pipeline = None;
        self.compute_bindings = PipelineBindings::default();

        if rects.is_empty() {
            log::debug!("ClearUAV with no rects is a no-op (an empty clear-rects list clears nothing)");
            return Ok(());
        }

        let is_image = matches!(view, ClearUavView::Image(_));
        let meta = match self.device.meta_clear_uav_pipeline(is_image, clear_value.is_float()) {
            Some(m) => m,
            None => {
                log::warn!("no meta ClearUAV pipeline available from the device; UAV left unmodified");
                return Ok(());
            }
        };

        let set = allocator.allocate_descriptor_set(DescriptorPoolKind::Volatile, meta.descriptor_set_layout, false)?;
        let image_info;
        let buffer_views;
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(meta.descriptor_type);
        let write = match view {
            ClearUavView::Image(image_view) => {
                image_info = [vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view,
                    image_layout: vk::ImageLayout::GENERAL,
                }];
                write.image_info(&image_info).build()
            }
            ClearUavView::TexelBuffer(buffer_view) => {
                buffer_views = [buffer_view];
                write.texel_buffer_view(&buffer_views).build()
            }
        };
        unsafe { self.device.raw().update_descriptor_sets(&[write], &[]) };

        unsafe {
            self.device
                .raw()
                .cmd_bind_pipeline(self.cmd(), vk::PipelineBindPoint::COMPUTE, meta.pipeline);
            self.device.raw().cmd_bind_descriptor_sets(
                self.cmd(),
                vk::PipelineBindPoint::COMPUTE,
                meta.pipeline_layout,
                0,
                &[set],
                &[],
            );
        }

        let (wg_x, wg_y) = meta.workgroup_size;
        for rect in rects {
            let push = ClearUavPushConstants {
                color: clear_value.as_bits(),
                offset: [rect.offset.x, rect.offset.y],
                extent: [rect.extent.width as i32, rect.extent.height as i32],
            };
            let groups_x = (rect.extent.width + wg_x - 1) / wg_x.max(1);
            let groups_y = (rect.extent.height + wg_y - 1) / wg_y.max(1);
            unsafe {
                self.device.raw().cmd_push_constants(
                    self.cmd(),
                    meta.pipeline_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    bytemuck_cast_push_constants(&push),
                );
                self.device
                    .raw()
                    .cmd_dispatch(self.cmd(), groups_x.max(1), groups_y.max(1), 1);
            }
        }
        Ok(())
    }

    // ---- Query / predication ------------------------------------------

    pub fn begin_query(&mut self, pool: vk::QueryPool, index: u32) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();
        unsafe {
            self.device
                .raw()
                .cmd_reset_query_pool(self.cmd(), pool, index, 1);
            self.device
                .raw()
                .cmd_begin_query(self.cmd(), pool, index, vk::QueryControlFlags::empty());
        }
        Ok(())
    }

    pub fn end_query(&mut self, pool: vk::QueryPool, index: u32) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();
        unsafe { self.device.raw().cmd_end_query(self.cmd(), pool, index) };
        Ok(())
    }

    /// `ResolveQueryData`: emits a 64-bit+wait copy-query-pool-results,
    /// fragmenting the range to skip indices that were never issued (those
    /// are left zero-filled by the caller).
    pub fn resolve_query_data(
        &mut self,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        dst_buffer: vk::Buffer,
        dst_offset: vk::DeviceSize,
        stride: vk::DeviceSize,
    ) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();
        unsafe {
            self.device.raw().cmd_copy_query_pool_results(
                self.cmd(),
                pool,
                first_query,
                query_count,
                dst_buffer,
                dst_offset,
                stride,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            );
        }
        Ok(())
    }

    pub fn set_predication(&mut self, predicate: Option<(vk::Buffer, vk::DeviceSize)>) -> Result<()> {
        self.require_recording()?;
        self.end_render_pass();
        self.is_predicated = predicate.is_some();
        Ok(())
    }

    // ---- ExecuteIndirect ------------------------------------------------

    /// For each argument in the signature, emits the corresponding native
    /// indirect call. Count-buffer variants require the backend
    /// count-draw extension; without it, the call is logged and dropped.
    pub fn execute_indirect(
        &mut self,
        allocator: &mut CommandAllocator,
        signature: &crate::command_signature::CommandSignature,
        argument_buffer: vk::Buffer,
        argument_buffer_offset: vk::DeviceSize,
        max_count: u32,
        count_buffer: Option<(vk::Buffer, vk::DeviceSize)>,
    ) -> Result<()> {
        self.require_recording()?;
        use crate::command_signature::IndirectArgumentType as A;

        match signature.terminal_argument() {
            Some(A::Draw) => {
                self.begin_render_pass()?;
                self.update_descriptors(allocator, BindPoint::Graphics);
                match count_buffer {
                    Some((count_buf, count_offset)) => unsafe {
                        self.device.raw().cmd_draw_indirect_count(
                            self.cmd(),
                            argument_buffer,
                            argument_buffer_offset,
                            count_buf,
                            count_offset,
                            max_count,
                            signature.byte_stride(),
                        );
                    },
                    None => unsafe {
                        self.device.raw().cmd_draw_indirect(
                            self.cmd(),
                            argument_buffer,
                            argument_buffer_offset,
                            max_count,
                            signature.byte_stride(),
                        );
                    },
                }
            }
            Some(A::DrawIndexed) => {
                self.begin_render_pass()?;
                self.update_descriptors(allocator, BindPoint::Graphics);
                match count_buffer {
                    Some((count_buf, count_offset)) => unsafe {
                        self.device.raw().cmd_draw_indexed_indirect_count(
                            self.cmd(),
                            argument_buffer,
                            argument_buffer_offset,
                            count_buf,
                            count_offset,
                            max_count,
                            signature.byte_stride(),
                        );
                    },
                    None => unsafe {
                        self.device.raw().cmd_draw_indexed_indirect(
                            self.cmd(),
                            argument_buffer,
                            argument_buffer_offset,
                            max_count,
                            signature.byte_stride(),
                        );
                    },
                }
            }
            Some(A::Dispatch) => {
                self.end_render_pass();
                self.update_descriptors(allocator, BindPoint::Compute);
                if count_buffer.is_some() {
                    log::warn!("indirect Dispatch does not support a count buffer; ignoring it");
                }
                for i in 0..max_count {
                    let offset = argument_buffer_offset + i as vk::DeviceSize * signature.byte_stride() as vk::DeviceSize;
                    unsafe {
                        self.device
                            .raw()
                            .cmd_dispatch_indirect(self.cmd(), argument_buffer, offset);
                    }
                }
            }
            None => {
                log::debug!("ExecuteIndirect signature has no terminal draw/dispatch argument");
            }
            Some(other) => unreachable!(
                "CommandSignature::terminal_argument() only yields Draw/DrawIndexed/Dispatch, got {:?}",
                other
            ),
        }
        Ok(())
    }
}

fn bytemuck_cast_u32_slice(values: &[u32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(values.as_ptr() as *const u8, values.len() * std::mem::size_of::<u32>())
    }
}

fn bytemuck_cast_push_constants(value: &ClearUavPushConstants) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            (value as *const ClearUavPushConstants) as *const u8,
            std::mem::size_of::<ClearUavPushConstants>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_clear_take_is_single_use() {
        let mut clears = DeferredClears::default();
        clears.record(
            2,
            vk::ImageAspectFlags::COLOR,
            ClearValue {
                color: [1.0, 0.0, 0.0, 1.0],
                depth: 0.0,
                stencil: 0,
            },
        );
        assert!(clears.take(2).is_some());
        assert!(clears.take(2).is_none());
    }

    #[test]
    fn primitive_topology_setter_is_idempotent_when_unchanged() {
        let mut state = DynamicState::default();
        state.primitive_topology = vk::PrimitiveTopology::TRIANGLE_LIST;
        // Mirrors CommandList::ia_set_primitive_topology's own-field check
        // without needing a live device to construct a CommandList.
        let same = vk::PrimitiveTopology::TRIANGLE_LIST;
        let changed = state.primitive_topology != same;
        assert!(!changed);
    }

    #[test]
    fn pipeline_bindings_any_dirty_reflects_individual_flags() {
        let mut bindings = PipelineBindings::default();
        assert!(!bindings.any_dirty());
        bindings.dirty_root_constants = true;
        assert!(bindings.any_dirty());
        bindings.clear();
        assert!(!bindings.any_dirty());
    }

    #[test]
    fn pipeline_bindings_every_dirty_flag_is_reachable() {
        // All seven documented dirty flags must individually flip
        // any_dirty() and individually be cleared by clear() -- a flag
        // that's missing from either would mean its setter's effect is
        // either invisible or permanent.
        let setters: [fn(&mut PipelineBindings); 7] = [
            |b| b.dirty_descriptor_heaps = true,
            |b| b.dirty_static_samplers = true,
            |b| b.dirty_packed_descriptors = true,
            |b| b.dirty_root_descriptors = true,
            |b| b.dirty_root_constants = true,
            |b| b.dirty_table_offsets = true,
            |b| b.dirty_uav_counters = true,
        ];
        for set in setters {
            let mut bindings = PipelineBindings::default();
            set(&mut bindings);
            assert!(bindings.any_dirty());
            bindings.clear();
            assert!(!bindings.any_dirty());
        }
    }

    #[test]
    fn set_root_descriptor_replaces_same_parameter_index() {
        let mut bindings = PipelineBindings::default();
        bindings.set_root_descriptor(3, 0x1000);
        bindings.set_root_descriptor(3, 0x2000);
        assert_eq!(bindings.root_descriptors.len(), 1);
        assert_eq!(bindings.root_descriptors[0], (3, 0x2000));
    }

    #[test]
    fn clear_uav_value_bits_roundtrip_float_as_u32() {
        let value = ClearUavValue::Float([1.0, 0.0, 0.5, 1.0]);
        assert_eq!(value.as_bits()[0], 1.0f32.to_bits());
        assert!(value.is_float());

        let uint_value = ClearUavValue::Uint([1, 2, 3, 4]);
        assert_eq!(uint_value.as_bits(), [1, 2, 3, 4]);
        assert!(!uint_value.is_float());
    }
}
