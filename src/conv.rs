//! Resource-state → pipeline-barrier translation (§4.7). Maps a D3D12
//! resource-state bitmask, plus the resource kind and the owning queue's
//! capability flags, to a Vulkan stage mask + access mask pair. Follows the
//! bit-iterator shape of the teacher's `map_buffer_access`/
//! `map_image_access`/`map_pipeline_stage` in `conv.rs`, generalized to a
//! single combined D3D12 state mask rather than three separate HAL masks.

use ash::vk;

use crate::queue::QueueCapabilities;
use crate::resource::{ResourceKind, ResourceState};

/// Output of the translator: what a barrier transitioning a resource into
/// (or out of) a given `ResourceState` should wait on / make visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageAccess {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl StageAccess {
    const fn empty() -> Self {
        StageAccess {
            stage: vk::PipelineStageFlags::empty(),
            access: vk::AccessFlags::empty(),
        }
    }

    fn merge(self, other: Self) -> Self {
        StageAccess {
            stage: self.stage | other.stage,
            access: self.access | other.access,
        }
    }
}

/// `COMMON`'s translation per §4.7: the default "we don't know, be safe"
/// sentinel.
fn common_default() -> StageAccess {
    StageAccess {
        stage: vk::PipelineStageFlags::ALL_COMMANDS,
        access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
    }
}

/// Translates a D3D12 resource-state mask into the Vulkan stage+access
/// mask that a barrier must use to make the transition visible. `PRESENT`
/// contributes no backend access bits of its own — it is a layout sentinel
/// consumed by the barrier-emission path in `command_list.rs`, never an
/// access flag (§4.7).
pub fn translate_resource_state(
    state: ResourceState,
    kind: ResourceKind,
    queue_caps: QueueCapabilities,
) -> StageAccess {
    if state.is_empty() || state == ResourceState::COMMON {
        return common_default();
    }

    let mut out = StageAccess::empty();
    let mut unknown = state;

    if state.contains(ResourceState::VERTEX_AND_CONSTANT_BUFFER) {
        unknown.remove(ResourceState::VERTEX_AND_CONSTANT_BUFFER);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER,
            access: vk::AccessFlags::UNIFORM_READ | vk::AccessFlags::SHADER_READ,
        });
        if queue_caps.contains(QueueCapabilities::GRAPHICS) {
            out = out.merge(StageAccess {
                stage: vk::PipelineStageFlags::VERTEX_INPUT,
                access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            });
        }
    }
    if state.contains(ResourceState::INDEX_BUFFER) {
        unknown.remove(ResourceState::INDEX_BUFFER);
        if queue_caps.contains(QueueCapabilities::GRAPHICS) {
            out = out.merge(StageAccess {
                stage: vk::PipelineStageFlags::VERTEX_INPUT,
                access: vk::AccessFlags::INDEX_READ,
            });
        }
    }
    if state.contains(ResourceState::RENDER_TARGET) {
        unknown.remove(ResourceState::RENDER_TARGET);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            access: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        });
    }
    if state.contains(ResourceState::UNORDERED_ACCESS) {
        unknown.remove(ResourceState::UNORDERED_ACCESS);
        let mut stage = vk::PipelineStageFlags::COMPUTE_SHADER;
        if queue_caps.contains(QueueCapabilities::GRAPHICS) {
            stage |= vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
        }
        out = out.merge(StageAccess {
            stage,
            access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        });
    }
    if state.contains(ResourceState::DEPTH_WRITE) {
        unknown.remove(ResourceState::DEPTH_WRITE);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        });
    }
    if state.contains(ResourceState::DEPTH_READ) {
        unknown.remove(ResourceState::DEPTH_READ);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        });
    }
    if state.contains(ResourceState::NON_PIXEL_SHADER_RESOURCE) {
        unknown.remove(ResourceState::NON_PIXEL_SHADER_RESOURCE);
        let mut stage = vk::PipelineStageFlags::COMPUTE_SHADER;
        if queue_caps.contains(QueueCapabilities::GRAPHICS) {
            stage |= vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::GEOMETRY_SHADER
                | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
                | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER;
        }
        out = out.merge(StageAccess {
            stage,
            access: vk::AccessFlags::SHADER_READ,
        });
    }
    if state.contains(ResourceState::PIXEL_SHADER_RESOURCE) {
        unknown.remove(ResourceState::PIXEL_SHADER_RESOURCE);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            access: vk::AccessFlags::SHADER_READ,
        });
    }
    if state.contains(ResourceState::STREAM_OUT) {
        unknown.remove(ResourceState::STREAM_OUT);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::TRANSFORM_FEEDBACK_EXT,
            access: vk::AccessFlags::TRANSFORM_FEEDBACK_WRITE_EXT,
        });
    }
    if state.contains(ResourceState::INDIRECT_ARGUMENT) {
        unknown.remove(ResourceState::INDIRECT_ARGUMENT);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::DRAW_INDIRECT,
            access: vk::AccessFlags::INDIRECT_COMMAND_READ,
        });
    }
    if state.contains(ResourceState::COPY_DEST) || state.contains(ResourceState::RESOLVE_DEST) {
        unknown.remove(ResourceState::COPY_DEST);
        unknown.remove(ResourceState::RESOLVE_DEST);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::TRANSFER,
            access: vk::AccessFlags::TRANSFER_WRITE,
        });
    }
    if state.contains(ResourceState::COPY_SOURCE) || state.contains(ResourceState::RESOLVE_SOURCE)
    {
        unknown.remove(ResourceState::COPY_SOURCE);
        unknown.remove(ResourceState::RESOLVE_SOURCE);
        out = out.merge(StageAccess {
            stage: vk::PipelineStageFlags::TRANSFER,
            access: vk::AccessFlags::TRANSFER_READ,
        });
    }
    // PRESENT contributes no access of its own; the layout transition
    // around it is handled by the caller as a special case (§4.5,
    // ResourceBarrier).
    unknown.remove(ResourceState::PRESENT);

    if !unknown.is_empty() {
        log::warn!(
            "unhandled resource-state bits {:?} for {:?} resource",
            unknown,
            kind
        );
    }

    if out == StageAccess::empty() {
        common_default()
    } else {
        out
    }
}

/// Computes the single aggregated memory barrier for a `UAV` barrier kind:
/// a read/write hazard between UAV-capable shader stages gated by the
/// queue's capability bits, per §4.5 "ResourceBarrier".
pub fn uav_barrier_stage_access(queue_caps: QueueCapabilities) -> StageAccess {
    let mut stage = vk::PipelineStageFlags::COMPUTE_SHADER;
    if queue_caps.contains(QueueCapabilities::GRAPHICS) {
        stage |= vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    StageAccess {
        stage,
        access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_state_is_all_commands_rw() {
        let sa = translate_resource_state(
            ResourceState::COMMON,
            ResourceKind::Image,
            QueueCapabilities::GRAPHICS,
        );
        assert_eq!(sa.stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(
            sa.access,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE
        );
    }

    #[test]
    fn vertex_buffer_gains_vertex_input_only_on_graphics_queue() {
        let graphics = translate_resource_state(
            ResourceState::VERTEX_AND_CONSTANT_BUFFER,
            ResourceKind::Buffer,
            QueueCapabilities::GRAPHICS,
        );
        assert!(graphics.stage.contains(vk::PipelineStageFlags::VERTEX_INPUT));

        let compute_only = translate_resource_state(
            ResourceState::VERTEX_AND_CONSTANT_BUFFER,
            ResourceKind::Buffer,
            QueueCapabilities::COMPUTE,
        );
        assert!(!compute_only
            .stage
            .contains(vk::PipelineStageFlags::VERTEX_INPUT));
    }

    #[test]
    fn present_contributes_no_access() {
        let sa = translate_resource_state(
            ResourceState::PRESENT | ResourceState::RENDER_TARGET,
            ResourceKind::Image,
            QueueCapabilities::GRAPHICS,
        );
        // Only RENDER_TARGET's access should show up; PRESENT adds nothing.
        assert_eq!(
            sa.access,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn copy_dest_and_resolve_dest_collapse_to_transfer_write() {
        let sa = translate_resource_state(
            ResourceState::COPY_DEST,
            ResourceKind::Buffer,
            QueueCapabilities::TRANSFER,
        );
        assert_eq!(sa.stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(sa.access, vk::AccessFlags::TRANSFER_WRITE);
    }
}
