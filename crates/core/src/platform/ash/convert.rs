use crate::barrier::{Access, PipelineStages, TextureLayout};
use crate::binding::{BindingType, ShaderStages};
use crate::command::{IndexType, LoadOp, Rect, StoreOp, Viewport};
use crate::format::Format;
use crate::memory::{CpuPageProperty, HeapType};
use crate::pipeline::{
	BlendFactor, BlendOp, ColorWriteMask, CullMode, FrontFace, PipelineBindPoint, PolygonMode, PrimitiveTopology,
	VertexStepRate,
};
use crate::resource::{ResourceDimension, ResourceUsage, SampleCount};
use crate::view::{AddressMode, BorderColor, CompareOp, Filter, SubresourceRange};
use ash::vk::{
	AccessFlags2, AttachmentLoadOp, AttachmentStoreOp, BufferUsageFlags, ColorComponentFlags, CullModeFlags,
	DescriptorType, Extent2D, ImageAspectFlags, ImageLayout, ImageSubresourceRange, ImageType, ImageUsageFlags,
	ImageViewType, Offset2D, PipelineStageFlags2, Rect2D, SampleCountFlags, ShaderStageFlags,
};
use gpu_allocator::MemoryLocation;

impl Format {
	pub fn to_ash(&self) -> ash::vk::Format {
		match self {
			Format::Unknown => ash::vk::Format::UNDEFINED,
			Format::R8Unorm => ash::vk::Format::R8_UNORM,
			Format::R8G8Unorm => ash::vk::Format::R8G8_UNORM,
			Format::R8G8B8A8Unorm => ash::vk::Format::R8G8B8A8_UNORM,
			Format::R8G8B8A8Srgb => ash::vk::Format::R8G8B8A8_SRGB,
			Format::B8G8R8A8Unorm => ash::vk::Format::B8G8R8A8_UNORM,
			Format::B8G8R8A8Srgb => ash::vk::Format::B8G8R8A8_SRGB,
			Format::R10G10B10A2Unorm => ash::vk::Format::A2B10G10R10_UNORM_PACK32,
			Format::R16Float => ash::vk::Format::R16_SFLOAT,
			Format::R16G16Float => ash::vk::Format::R16G16_SFLOAT,
			Format::R16G16B16A16Float => ash::vk::Format::R16G16B16A16_SFLOAT,
			Format::R32Uint => ash::vk::Format::R32_UINT,
			Format::R32Float => ash::vk::Format::R32_SFLOAT,
			Format::R32G32Float => ash::vk::Format::R32G32_SFLOAT,
			Format::R32G32B32Float => ash::vk::Format::R32G32B32_SFLOAT,
			Format::R32G32B32A32Float => ash::vk::Format::R32G32B32A32_SFLOAT,
			Format::D16Unorm => ash::vk::Format::D16_UNORM,
			Format::D32Float => ash::vk::Format::D32_SFLOAT,
			Format::D24UnormS8Uint => ash::vk::Format::D24_UNORM_S8_UINT,
			Format::D32FloatS8Uint => ash::vk::Format::D32_SFLOAT_S8_UINT,
		}
	}

	/// Inverse of [`Self::to_ash`], [`Format::Unknown`] for formats without a counterpart.
	pub fn from_ash(format: ash::vk::Format) -> Self {
		match format {
			ash::vk::Format::R8_UNORM => Format::R8Unorm,
			ash::vk::Format::R8G8_UNORM => Format::R8G8Unorm,
			ash::vk::Format::R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
			ash::vk::Format::R8G8B8A8_SRGB => Format::R8G8B8A8Srgb,
			ash::vk::Format::B8G8R8A8_UNORM => Format::B8G8R8A8Unorm,
			ash::vk::Format::B8G8R8A8_SRGB => Format::B8G8R8A8Srgb,
			ash::vk::Format::A2B10G10R10_UNORM_PACK32 => Format::R10G10B10A2Unorm,
			ash::vk::Format::R16_SFLOAT => Format::R16Float,
			ash::vk::Format::R16G16_SFLOAT => Format::R16G16Float,
			ash::vk::Format::R16G16B16A16_SFLOAT => Format::R16G16B16A16Float,
			ash::vk::Format::R32_UINT => Format::R32Uint,
			ash::vk::Format::R32_SFLOAT => Format::R32Float,
			ash::vk::Format::R32G32_SFLOAT => Format::R32G32Float,
			ash::vk::Format::R32G32B32_SFLOAT => Format::R32G32B32Float,
			ash::vk::Format::R32G32B32A32_SFLOAT => Format::R32G32B32A32Float,
			ash::vk::Format::D16_UNORM => Format::D16Unorm,
			ash::vk::Format::D32_SFLOAT => Format::D32Float,
			ash::vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
			ash::vk::Format::D32_SFLOAT_S8_UINT => Format::D32FloatS8Uint,
			_ => Format::Unknown,
		}
	}

	/// All aspects of an image of this format.
	pub fn aspect(&self) -> ImageAspectFlags {
		if self.has_stencil() {
			ImageAspectFlags::DEPTH | ImageAspectFlags::STENCIL
		} else if self.is_depth() {
			ImageAspectFlags::DEPTH
		} else {
			ImageAspectFlags::COLOR
		}
	}

	/// The aspect copies between buffers and images of this format access.
	pub fn copy_aspect(&self) -> ImageAspectFlags {
		if self.is_depth() {
			ImageAspectFlags::DEPTH
		} else {
			ImageAspectFlags::COLOR
		}
	}
}

impl SubresourceRange {
	pub fn to_ash(&self, aspect_mask: ImageAspectFlags) -> ImageSubresourceRange {
		ImageSubresourceRange {
			aspect_mask,
			base_mip_level: self.base_mip,
			level_count: self.mip_count,
			base_array_layer: self.base_layer,
			layer_count: self.layer_count,
		}
	}
}

impl ResourceUsage {
	pub fn to_ash_buffer_usage_flags(&self) -> BufferUsageFlags {
		let mut out = BufferUsageFlags::empty();
		if self.contains(ResourceUsage::TRANSFER_SRC) {
			out |= BufferUsageFlags::TRANSFER_SRC;
		}
		if self.contains(ResourceUsage::TRANSFER_DST) {
			out |= BufferUsageFlags::TRANSFER_DST;
		}
		if self.contains(ResourceUsage::CONSTANT_BUFFER) {
			out |= BufferUsageFlags::UNIFORM_BUFFER;
		}
		if self.contains(ResourceUsage::STORAGE_BUFFER) {
			out |= BufferUsageFlags::STORAGE_BUFFER;
		}
		if self.contains(ResourceUsage::INDEX_BUFFER) {
			out |= BufferUsageFlags::INDEX_BUFFER;
		}
		if self.contains(ResourceUsage::VERTEX_BUFFER) {
			out |= BufferUsageFlags::VERTEX_BUFFER;
		}
		if self.contains(ResourceUsage::INDIRECT_BUFFER) {
			out |= BufferUsageFlags::INDIRECT_BUFFER;
		}
		// empty flags are invalid in vulkan, reachable by buffers only ever mapped on the host
		if out.is_empty() {
			BufferUsageFlags::TRANSFER_SRC
		} else {
			out
		}
	}

	pub fn to_ash_image_usage_flags(&self) -> ImageUsageFlags {
		let mut out = ImageUsageFlags::empty();
		if self.contains(ResourceUsage::TRANSFER_SRC) {
			out |= ImageUsageFlags::TRANSFER_SRC;
		}
		if self.contains(ResourceUsage::TRANSFER_DST) {
			out |= ImageUsageFlags::TRANSFER_DST;
		}
		if self.contains(ResourceUsage::SAMPLED) {
			out |= ImageUsageFlags::SAMPLED;
		}
		if self.contains(ResourceUsage::STORAGE_TEXTURE) {
			out |= ImageUsageFlags::STORAGE;
		}
		if self.contains(ResourceUsage::RENDER_TARGET) {
			out |= ImageUsageFlags::COLOR_ATTACHMENT;
		}
		if self.contains(ResourceUsage::DEPTH_STENCIL) {
			out |= ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
		}
		if out.is_empty() {
			ImageUsageFlags::TRANSFER_SRC
		} else {
			out
		}
	}
}

impl ResourceDimension {
	pub fn to_ash_image_type(&self) -> ImageType {
		match self {
			ResourceDimension::Buffer | ResourceDimension::Texture2D => ImageType::TYPE_2D,
			ResourceDimension::Texture1D => ImageType::TYPE_1D,
			ResourceDimension::Texture3D => ImageType::TYPE_3D,
		}
	}

	pub fn to_ash_image_view_type(&self, arrayed: bool) -> ImageViewType {
		match (self, arrayed) {
			(ResourceDimension::Texture1D, false) => ImageViewType::TYPE_1D,
			(ResourceDimension::Texture1D, true) => ImageViewType::TYPE_1D_ARRAY,
			(ResourceDimension::Texture3D, _) => ImageViewType::TYPE_3D,
			(_, false) => ImageViewType::TYPE_2D,
			(_, true) => ImageViewType::TYPE_2D_ARRAY,
		}
	}
}

impl SampleCount {
	pub fn to_ash_sample_count_flags(&self) -> SampleCountFlags {
		match self {
			SampleCount::X1 => SampleCountFlags::TYPE_1,
			SampleCount::X2 => SampleCountFlags::TYPE_2,
			SampleCount::X4 => SampleCountFlags::TYPE_4,
			SampleCount::X8 => SampleCountFlags::TYPE_8,
		}
	}
}

impl HeapType {
	pub fn to_gpu_allocator_memory_location(&self) -> MemoryLocation {
		match self {
			HeapType::Default => MemoryLocation::GpuOnly,
			HeapType::Upload => MemoryLocation::CpuToGpu,
			HeapType::Readback => MemoryLocation::GpuToCpu,
			HeapType::Custom(props) => match props.cpu_page {
				CpuPageProperty::NotAvailable => MemoryLocation::GpuOnly,
				CpuPageProperty::WriteCombine => MemoryLocation::CpuToGpu,
				CpuPageProperty::WriteBack => MemoryLocation::GpuToCpu,
			},
		}
	}
}

impl TextureLayout {
	pub fn to_ash(&self) -> ImageLayout {
		match self {
			TextureLayout::Undefined => ImageLayout::UNDEFINED,
			TextureLayout::General => ImageLayout::GENERAL,
			TextureLayout::RenderTarget => ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
			TextureLayout::DepthStencilWrite => ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
			TextureLayout::DepthStencilRead => ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
			TextureLayout::ShaderReadOnly => ImageLayout::SHADER_READ_ONLY_OPTIMAL,
			TextureLayout::TransferSrc => ImageLayout::TRANSFER_SRC_OPTIMAL,
			TextureLayout::TransferDst => ImageLayout::TRANSFER_DST_OPTIMAL,
			TextureLayout::Present => ImageLayout::PRESENT_SRC_KHR,
		}
	}
}

impl PipelineStages {
	pub fn to_ash(&self) -> PipelineStageFlags2 {
		let mut out = PipelineStageFlags2::NONE;
		for (stage, flags) in [
			(PipelineStages::DRAW_INDIRECT, PipelineStageFlags2::DRAW_INDIRECT),
			(PipelineStages::VERTEX_INPUT, PipelineStageFlags2::VERTEX_INPUT),
			(PipelineStages::VERTEX_SHADER, PipelineStageFlags2::VERTEX_SHADER),
			(PipelineStages::FRAGMENT_SHADER, PipelineStageFlags2::FRAGMENT_SHADER),
			(PipelineStages::EARLY_FRAGMENT_TESTS, PipelineStageFlags2::EARLY_FRAGMENT_TESTS),
			(PipelineStages::LATE_FRAGMENT_TESTS, PipelineStageFlags2::LATE_FRAGMENT_TESTS),
			(PipelineStages::COLOR_OUTPUT, PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
			(PipelineStages::COMPUTE_SHADER, PipelineStageFlags2::COMPUTE_SHADER),
			(PipelineStages::TRANSFER, PipelineStageFlags2::TRANSFER),
			(PipelineStages::HOST, PipelineStageFlags2::HOST),
			(PipelineStages::ALL_GRAPHICS, PipelineStageFlags2::ALL_GRAPHICS),
			(PipelineStages::ALL_COMMANDS, PipelineStageFlags2::ALL_COMMANDS),
		] {
			if self.contains(stage) {
				out |= flags;
			}
		}
		out
	}
}

impl Access {
	pub fn to_ash(&self) -> AccessFlags2 {
		let mut out = AccessFlags2::NONE;
		for (access, flags) in [
			(Access::INDIRECT_READ, AccessFlags2::INDIRECT_COMMAND_READ),
			(Access::INDEX_READ, AccessFlags2::INDEX_READ),
			(Access::VERTEX_READ, AccessFlags2::VERTEX_ATTRIBUTE_READ),
			(Access::CONSTANT_READ, AccessFlags2::UNIFORM_READ),
			(Access::SHADER_READ, AccessFlags2::SHADER_READ),
			(Access::SHADER_WRITE, AccessFlags2::SHADER_WRITE),
			(Access::RENDER_TARGET_READ, AccessFlags2::COLOR_ATTACHMENT_READ),
			(Access::RENDER_TARGET_WRITE, AccessFlags2::COLOR_ATTACHMENT_WRITE),
			(Access::DEPTH_STENCIL_READ, AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ),
			(Access::DEPTH_STENCIL_WRITE, AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE),
			(Access::TRANSFER_READ, AccessFlags2::TRANSFER_READ),
			(Access::TRANSFER_WRITE, AccessFlags2::TRANSFER_WRITE),
			(Access::HOST_READ, AccessFlags2::HOST_READ),
			(Access::HOST_WRITE, AccessFlags2::HOST_WRITE),
		] {
			if self.contains(access) {
				out |= flags;
			}
		}
		out
	}
}

impl ShaderStages {
	pub fn to_ash(&self) -> ShaderStageFlags {
		let mut out = ShaderStageFlags::empty();
		if self.contains(ShaderStages::VERTEX) {
			out |= ShaderStageFlags::VERTEX;
		}
		if self.contains(ShaderStages::FRAGMENT) {
			out |= ShaderStageFlags::FRAGMENT;
		}
		if self.contains(ShaderStages::COMPUTE) {
			out |= ShaderStageFlags::COMPUTE;
		}
		out
	}
}

impl BindingType {
	pub fn to_ash_descriptor_type(&self) -> DescriptorType {
		match self {
			BindingType::ConstantBuffer => DescriptorType::UNIFORM_BUFFER,
			BindingType::StorageBuffer => DescriptorType::STORAGE_BUFFER,
			BindingType::SampledTexture => DescriptorType::SAMPLED_IMAGE,
			BindingType::StorageTexture => DescriptorType::STORAGE_IMAGE,
			BindingType::Sampler => DescriptorType::SAMPLER,
		}
	}
}

impl PipelineBindPoint {
	pub fn to_ash(&self) -> ash::vk::PipelineBindPoint {
		match self {
			PipelineBindPoint::Graphics => ash::vk::PipelineBindPoint::GRAPHICS,
			PipelineBindPoint::Compute => ash::vk::PipelineBindPoint::COMPUTE,
		}
	}
}

impl Filter {
	pub fn to_ash_filter(&self) -> ash::vk::Filter {
		match self {
			Filter::Nearest => ash::vk::Filter::NEAREST,
			Filter::Linear => ash::vk::Filter::LINEAR,
		}
	}

	pub fn to_ash_mipmap_mode(&self) -> ash::vk::SamplerMipmapMode {
		match self {
			Filter::Nearest => ash::vk::SamplerMipmapMode::NEAREST,
			Filter::Linear => ash::vk::SamplerMipmapMode::LINEAR,
		}
	}
}

impl AddressMode {
	pub fn to_ash_address_mode(&self) -> ash::vk::SamplerAddressMode {
		match self {
			AddressMode::ClampToEdge => ash::vk::SamplerAddressMode::CLAMP_TO_EDGE,
			AddressMode::Repeat => ash::vk::SamplerAddressMode::REPEAT,
			AddressMode::MirroredRepeat => ash::vk::SamplerAddressMode::MIRRORED_REPEAT,
			AddressMode::ClampToBorder => ash::vk::SamplerAddressMode::CLAMP_TO_BORDER,
		}
	}
}

impl BorderColor {
	pub fn to_ash_border_color(&self) -> ash::vk::BorderColor {
		match self {
			BorderColor::TransparentBlack => ash::vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
			BorderColor::OpaqueBlack => ash::vk::BorderColor::FLOAT_OPAQUE_BLACK,
			BorderColor::OpaqueWhite => ash::vk::BorderColor::FLOAT_OPAQUE_WHITE,
		}
	}
}

impl CompareOp {
	pub fn to_ash(&self) -> ash::vk::CompareOp {
		match self {
			CompareOp::Never => ash::vk::CompareOp::NEVER,
			CompareOp::Less => ash::vk::CompareOp::LESS,
			CompareOp::Equal => ash::vk::CompareOp::EQUAL,
			CompareOp::LessOrEqual => ash::vk::CompareOp::LESS_OR_EQUAL,
			CompareOp::Greater => ash::vk::CompareOp::GREATER,
			CompareOp::NotEqual => ash::vk::CompareOp::NOT_EQUAL,
			CompareOp::GreaterOrEqual => ash::vk::CompareOp::GREATER_OR_EQUAL,
			CompareOp::Always => ash::vk::CompareOp::ALWAYS,
		}
	}
}

impl PrimitiveTopology {
	pub fn to_ash(&self) -> ash::vk::PrimitiveTopology {
		match self {
			PrimitiveTopology::PointList => ash::vk::PrimitiveTopology::POINT_LIST,
			PrimitiveTopology::LineList => ash::vk::PrimitiveTopology::LINE_LIST,
			PrimitiveTopology::LineStrip => ash::vk::PrimitiveTopology::LINE_STRIP,
			PrimitiveTopology::TriangleList => ash::vk::PrimitiveTopology::TRIANGLE_LIST,
			PrimitiveTopology::TriangleStrip => ash::vk::PrimitiveTopology::TRIANGLE_STRIP,
		}
	}
}

impl CullMode {
	pub fn to_ash(&self) -> CullModeFlags {
		match self {
			CullMode::None => CullModeFlags::NONE,
			CullMode::Front => CullModeFlags::FRONT,
			CullMode::Back => CullModeFlags::BACK,
		}
	}
}

impl FrontFace {
	pub fn to_ash(&self) -> ash::vk::FrontFace {
		match self {
			FrontFace::CounterClockwise => ash::vk::FrontFace::COUNTER_CLOCKWISE,
			FrontFace::Clockwise => ash::vk::FrontFace::CLOCKWISE,
		}
	}
}

impl PolygonMode {
	pub fn to_ash(&self) -> ash::vk::PolygonMode {
		match self {
			PolygonMode::Fill => ash::vk::PolygonMode::FILL,
			PolygonMode::Line => ash::vk::PolygonMode::LINE,
		}
	}
}

impl BlendFactor {
	pub fn to_ash(&self) -> ash::vk::BlendFactor {
		match self {
			BlendFactor::Zero => ash::vk::BlendFactor::ZERO,
			BlendFactor::One => ash::vk::BlendFactor::ONE,
			BlendFactor::SrcColor => ash::vk::BlendFactor::SRC_COLOR,
			BlendFactor::OneMinusSrcColor => ash::vk::BlendFactor::ONE_MINUS_SRC_COLOR,
			BlendFactor::DstColor => ash::vk::BlendFactor::DST_COLOR,
			BlendFactor::OneMinusDstColor => ash::vk::BlendFactor::ONE_MINUS_DST_COLOR,
			BlendFactor::SrcAlpha => ash::vk::BlendFactor::SRC_ALPHA,
			BlendFactor::OneMinusSrcAlpha => ash::vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
			BlendFactor::DstAlpha => ash::vk::BlendFactor::DST_ALPHA,
			BlendFactor::OneMinusDstAlpha => ash::vk::BlendFactor::ONE_MINUS_DST_ALPHA,
		}
	}
}

impl BlendOp {
	pub fn to_ash(&self) -> ash::vk::BlendOp {
		match self {
			BlendOp::Add => ash::vk::BlendOp::ADD,
			BlendOp::Subtract => ash::vk::BlendOp::SUBTRACT,
			BlendOp::ReverseSubtract => ash::vk::BlendOp::REVERSE_SUBTRACT,
			BlendOp::Min => ash::vk::BlendOp::MIN,
			BlendOp::Max => ash::vk::BlendOp::MAX,
		}
	}
}

impl ColorWriteMask {
	pub fn to_ash(&self) -> ColorComponentFlags {
		ColorComponentFlags::from_raw(self.bits() as u32)
	}
}

impl VertexStepRate {
	pub fn to_ash(&self) -> ash::vk::VertexInputRate {
		match self {
			VertexStepRate::Vertex => ash::vk::VertexInputRate::VERTEX,
			VertexStepRate::Instance => ash::vk::VertexInputRate::INSTANCE,
		}
	}
}

impl LoadOp {
	pub fn to_ash(&self) -> AttachmentLoadOp {
		match self {
			LoadOp::Load => AttachmentLoadOp::LOAD,
			LoadOp::Clear => AttachmentLoadOp::CLEAR,
			LoadOp::DontCare => AttachmentLoadOp::DONT_CARE,
		}
	}
}

impl StoreOp {
	pub fn to_ash(&self) -> AttachmentStoreOp {
		match self {
			StoreOp::Store => AttachmentStoreOp::STORE,
			StoreOp::DontCare => AttachmentStoreOp::DONT_CARE,
		}
	}
}

impl IndexType {
	pub fn to_ash_index_type(&self) -> ash::vk::IndexType {
		match self {
			IndexType::U32 => ash::vk::IndexType::UINT32,
			IndexType::U16 => ash::vk::IndexType::UINT16,
		}
	}
}

impl Viewport {
	pub fn to_ash(&self) -> ash::vk::Viewport {
		ash::vk::Viewport {
			x: self.x,
			y: self.y,
			width: self.width,
			height: self.height,
			min_depth: self.min_depth,
			max_depth: self.max_depth,
		}
	}
}

impl Rect {
	pub fn to_ash(&self) -> Rect2D {
		Rect2D {
			offset: Offset2D { x: self.x, y: self.y },
			extent: Extent2D {
				width: self.width,
				height: self.height,
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn formats_round_trip_through_vulkan() {
		for format in [
			Format::R8G8B8A8Unorm,
			Format::B8G8R8A8Srgb,
			Format::R10G10B10A2Unorm,
			Format::R16G16B16A16Float,
			Format::D24UnormS8Uint,
		] {
			assert_eq!(Format::from_ash(format.to_ash()), format);
		}
		assert_eq!(Format::from_ash(ash::vk::Format::BC1_RGB_UNORM_BLOCK), Format::Unknown);
	}

	#[test]
	fn aspects() {
		assert_eq!(Format::R8Unorm.aspect(), ImageAspectFlags::COLOR);
		assert_eq!(Format::D32Float.aspect(), ImageAspectFlags::DEPTH);
		assert_eq!(
			Format::D32FloatS8Uint.aspect(),
			ImageAspectFlags::DEPTH | ImageAspectFlags::STENCIL
		);
		assert_eq!(Format::D32FloatS8Uint.copy_aspect(), ImageAspectFlags::DEPTH);
	}

	#[test]
	fn host_only_buffers_have_usage() {
		assert_eq!(
			ResourceUsage::empty().to_ash_buffer_usage_flags(),
			BufferUsageFlags::TRANSFER_SRC
		);
		assert_eq!(
			(PipelineStages::TRANSFER | PipelineStages::HOST).to_ash(),
			PipelineStageFlags2::TRANSFER | PipelineStageFlags2::HOST
		);
	}
}
