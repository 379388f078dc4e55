//! Thin newtype wrappers around raw Vulkan handles. Kept separate from the
//! owning structs (`pool::CommandAllocator`, `command_list::CommandList`,
//! ...) so that transient-resource inventories can store plain `Vec`s of
//! these without pulling in the whole owner type.

use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Semaphore(pub vk::Semaphore);
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Event(pub vk::Event);
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderPass(pub vk::RenderPass);
unsafe impl Send for RenderPass {}
unsafe impl Sync for RenderPass {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Framebuffer(pub vk::Framebuffer);
unsafe impl Send for Framebuffer {}
unsafe impl Sync for Framebuffer {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorPool(pub vk::DescriptorPool);
unsafe impl Send for DescriptorPool {}
unsafe impl Sync for DescriptorPool {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSet(pub vk::DescriptorSet);
unsafe impl Send for DescriptorSet {}
unsafe impl Sync for DescriptorSet {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageView(pub vk::ImageView);
unsafe impl Send for ImageView {}
unsafe impl Sync for ImageView {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferView(pub vk::BufferView);
unsafe impl Send for BufferView {}
unsafe impl Sync for BufferView {}

/// One descriptor-pool kind, per §4.4. Order matters only for readability;
/// each kind owns its own active/free-for-reuse lists in `pool.rs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorPoolKind {
    ImmutableSampler,
    Static,
    Volatile,
}
