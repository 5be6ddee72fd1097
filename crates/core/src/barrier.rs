use crate::backing::handle::ResourceHandle;
use crate::resource::ResourceUsage;
use crate::view::SubresourceRange;
use bitflags::bitflags;

bitflags! {
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
	pub struct PipelineStages: u32 {
		const DRAW_INDIRECT = 1 << 0;
		const VERTEX_INPUT = 1 << 1;
		const VERTEX_SHADER = 1 << 2;
		const FRAGMENT_SHADER = 1 << 3;
		const EARLY_FRAGMENT_TESTS = 1 << 4;
		const LATE_FRAGMENT_TESTS = 1 << 5;
		const COLOR_OUTPUT = 1 << 6;
		const COMPUTE_SHADER = 1 << 7;
		const TRANSFER = 1 << 8;
		const HOST = 1 << 9;
		const ALL_GRAPHICS = 1 << 10;
		const ALL_COMMANDS = 1 << 11;
	}
}

bitflags! {
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
	pub struct Access: u32 {
		const INDIRECT_READ = 1 << 0;
		const INDEX_READ = 1 << 1;
		const VERTEX_READ = 1 << 2;
		const CONSTANT_READ = 1 << 3;
		const SHADER_READ = 1 << 4;
		const SHADER_WRITE = 1 << 5;
		const RENDER_TARGET_READ = 1 << 6;
		const RENDER_TARGET_WRITE = 1 << 7;
		const DEPTH_STENCIL_READ = 1 << 8;
		const DEPTH_STENCIL_WRITE = 1 << 9;
		const TRANSFER_READ = 1 << 10;
		const TRANSFER_WRITE = 1 << 11;
		const HOST_READ = 1 << 12;
		const HOST_WRITE = 1 << 13;
	}
}

impl Access {
	pub const WRITES: Self = Self::SHADER_WRITE
		.union(Self::RENDER_TARGET_WRITE)
		.union(Self::DEPTH_STENCIL_WRITE)
		.union(Self::TRANSFER_WRITE)
		.union(Self::HOST_WRITE);

	/// Usage flags a resource needs to be accessed this way.
	pub fn required_usage(&self) -> ResourceUsage {
		let mut usage = ResourceUsage::empty();
		if self.contains(Access::INDEX_READ) {
			usage |= ResourceUsage::INDEX_BUFFER;
		}
		if self.contains(Access::VERTEX_READ) {
			usage |= ResourceUsage::VERTEX_BUFFER;
		}
		if self.contains(Access::INDIRECT_READ) {
			usage |= ResourceUsage::INDIRECT_BUFFER;
		}
		if self.intersects(Access::RENDER_TARGET_READ | Access::RENDER_TARGET_WRITE) {
			usage |= ResourceUsage::RENDER_TARGET;
		}
		if self.intersects(Access::DEPTH_STENCIL_READ | Access::DEPTH_STENCIL_WRITE) {
			usage |= ResourceUsage::DEPTH_STENCIL;
		}
		if self.contains(Access::TRANSFER_READ) {
			usage |= ResourceUsage::TRANSFER_SRC;
		}
		if self.contains(Access::TRANSFER_WRITE) {
			usage |= ResourceUsage::TRANSFER_DST;
		}
		usage
	}
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum TextureLayout {
	/// Contents are undefined, only valid as the old layout of a transition.
	#[default]
	Undefined,
	General,
	RenderTarget,
	DepthStencilWrite,
	DepthStencilRead,
	ShaderReadOnly,
	TransferSrc,
	TransferDst,
	Present,
}

impl TextureLayout {
	/// Usage flags a texture needs to be transitioned into this layout.
	pub fn required_usage(&self) -> ResourceUsage {
		match self {
			TextureLayout::Undefined | TextureLayout::General | TextureLayout::Present => ResourceUsage::empty(),
			TextureLayout::RenderTarget => ResourceUsage::RENDER_TARGET,
			TextureLayout::DepthStencilWrite | TextureLayout::DepthStencilRead => ResourceUsage::DEPTH_STENCIL,
			TextureLayout::ShaderReadOnly => ResourceUsage::SAMPLED,
			TextureLayout::TransferSrc => ResourceUsage::TRANSFER_SRC,
			TextureLayout::TransferDst => ResourceUsage::TRANSFER_DST,
		}
	}
}

/// Execution and memory dependency: work in `src_stages` with `src_access` happens before `dst_stages` with
/// `dst_access`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct MemoryBarrier {
	pub src_stages: PipelineStages,
	pub src_access: Access,
	pub dst_stages: PipelineStages,
	pub dst_access: Access,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BufferBarrier {
	pub resource: ResourceHandle,
	pub src_stages: PipelineStages,
	pub src_access: Access,
	pub dst_stages: PipelineStages,
	pub dst_access: Access,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TextureBarrier {
	pub resource: ResourceHandle,
	pub src_stages: PipelineStages,
	pub src_access: Access,
	pub dst_stages: PipelineStages,
	pub dst_access: Access,
	pub old_layout: TextureLayout,
	pub new_layout: TextureLayout,
	pub subresource: SubresourceRange,
}

impl TextureBarrier {
	/// A full layout transition of all subresources between two common states.
	pub fn transition(resource: ResourceHandle, old_layout: TextureLayout, new_layout: TextureLayout) -> Self {
		let (src_stages, src_access) = layout_stage_access(old_layout);
		let (dst_stages, dst_access) = layout_stage_access(new_layout);
		Self {
			resource,
			src_stages,
			src_access,
			dst_stages,
			dst_access,
			old_layout,
			new_layout,
			subresource: SubresourceRange::ALL,
		}
	}
}

/// The stages and accesses typically associated with a texture layout.
pub fn layout_stage_access(layout: TextureLayout) -> (PipelineStages, Access) {
	match layout {
		TextureLayout::Undefined | TextureLayout::Present => (PipelineStages::empty(), Access::empty()),
		TextureLayout::General => (PipelineStages::ALL_COMMANDS, Access::SHADER_READ | Access::SHADER_WRITE),
		TextureLayout::RenderTarget => (
			PipelineStages::COLOR_OUTPUT,
			Access::RENDER_TARGET_READ | Access::RENDER_TARGET_WRITE,
		),
		TextureLayout::DepthStencilWrite => (
			PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS,
			Access::DEPTH_STENCIL_READ | Access::DEPTH_STENCIL_WRITE,
		),
		TextureLayout::DepthStencilRead => (
			PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS,
			Access::DEPTH_STENCIL_READ,
		),
		TextureLayout::ShaderReadOnly => (
			PipelineStages::VERTEX_SHADER | PipelineStages::FRAGMENT_SHADER | PipelineStages::COMPUTE_SHADER,
			Access::SHADER_READ,
		),
		TextureLayout::TransferSrc => (PipelineStages::TRANSFER, Access::TRANSFER_READ),
		TextureLayout::TransferDst => (PipelineStages::TRANSFER, Access::TRANSFER_WRITE),
	}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Barrier {
	Memory(MemoryBarrier),
	Buffer(BufferBarrier),
	Texture(TextureBarrier),
}

impl From<MemoryBarrier> for Barrier {
	fn from(value: MemoryBarrier) -> Self {
		Barrier::Memory(value)
	}
}

impl From<BufferBarrier> for Barrier {
	fn from(value: BufferBarrier) -> Self {
		Barrier::Buffer(value)
	}
}

impl From<TextureBarrier> for Barrier {
	fn from(value: TextureBarrier) -> Self {
		Barrier::Texture(value)
	}
}
