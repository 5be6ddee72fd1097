use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::memory::{HeapUsage, MemoryDesc};
use crate::platform::ash::Ash;
use ash::prelude::VkResult;
use ash::vk::{
	BufferCreateInfo, BufferUsageFlags, Extent3D, ImageCreateInfo, ImageTiling, ImageType, ImageUsageFlags,
	MemoryRequirements, SampleCountFlags, SharingMode,
};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use std::ptr::NonNull;

/// Memory types acceptable for each [`HeapUsage`], queried once from representative resources.
#[derive(Copy, Clone, Debug, Default)]
pub struct MemoryTypeBits {
	pub buffers: u32,
	pub textures: u32,
	pub render_targets: u32,
}

impl MemoryTypeBits {
	pub unsafe fn query(device: &ash::Device) -> VkResult<Self> {
		unsafe {
			let buffer = device.create_buffer(
				&BufferCreateInfo::default()
					.size(1024)
					.usage(
						BufferUsageFlags::TRANSFER_SRC
							| BufferUsageFlags::TRANSFER_DST
							| BufferUsageFlags::UNIFORM_BUFFER
							| BufferUsageFlags::STORAGE_BUFFER
							| BufferUsageFlags::VERTEX_BUFFER
							| BufferUsageFlags::INDEX_BUFFER,
					)
					.sharing_mode(SharingMode::EXCLUSIVE),
				None,
			)?;
			let buffers = device.get_buffer_memory_requirements(buffer).memory_type_bits;
			device.destroy_buffer(buffer, None);

			let image_bits = |format: Format, usage: ImageUsageFlags| -> VkResult<u32> {
				let image = device.create_image(
					&ImageCreateInfo::default()
						.image_type(ImageType::TYPE_2D)
						.format(format.to_ash())
						.extent(Extent3D {
							width: 64,
							height: 64,
							depth: 1,
						})
						.mip_levels(1)
						.array_layers(1)
						.samples(SampleCountFlags::TYPE_1)
						.tiling(ImageTiling::OPTIMAL)
						.usage(usage)
						.sharing_mode(SharingMode::EXCLUSIVE),
					None,
				)?;
				let bits = device.get_image_memory_requirements(image).memory_type_bits;
				device.destroy_image(image, None);
				Ok(bits)
			};
			let textures = image_bits(
				Format::R8G8B8A8Unorm,
				ImageUsageFlags::SAMPLED
					| ImageUsageFlags::STORAGE
					| ImageUsageFlags::TRANSFER_SRC
					| ImageUsageFlags::TRANSFER_DST,
			)?;
			let color = image_bits(
				Format::R8G8B8A8Unorm,
				ImageUsageFlags::COLOR_ATTACHMENT | ImageUsageFlags::SAMPLED | ImageUsageFlags::TRANSFER_SRC,
			)?;
			let depth = image_bits(
				Format::D32Float,
				ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | ImageUsageFlags::SAMPLED,
			)?;
			Ok(Self {
				buffers,
				textures,
				render_targets: color & depth,
			})
		}
	}

	pub fn for_usage(&self, usage: HeapUsage) -> u32 {
		match usage {
			HeapUsage::Buffers => self.buffers,
			HeapUsage::Textures => self.textures,
			HeapUsage::RenderTargets => self.render_targets,
		}
	}
}

/// A block of device memory sub-allocated by [`gpu_allocator`], that resources are placed into.
#[derive(Debug)]
pub struct AshMemory {
	pub allocation: Allocation,
	pub memory_type_bits: u32,
}

impl AshMemory {
	pub fn mapped_ptr(&self, offset: u64) -> RhiResult<NonNull<u8>> {
		let ptr = self
			.allocation
			.mapped_ptr()
			.ok_or_else(|| RhiError::InvalidState("memory is not host visible".to_string()))?;
		// Safety: the device validates offset lies within the allocation
		unsafe { Ok(ptr.cast::<u8>().add(offset as usize)) }
	}
}

impl Ash {
	pub unsafe fn allocate(&self, desc: &MemoryDesc) -> RhiResult<AshMemory> {
		profiling::function_scope!();
		let memory_type_bits = self.memory_type_bits.for_usage(desc.usage);
		let allocation = self.memory_allocator().allocate(&AllocationCreateDesc {
			name: desc.name,
			requirements: MemoryRequirements {
				size: desc.size,
				alignment: desc.effective_alignment(),
				memory_type_bits,
			},
			location: desc.heap_type.to_gpu_allocator_memory_location(),
			linear: desc.usage == HeapUsage::Buffers,
			allocation_scheme: AllocationScheme::GpuAllocatorManaged,
		})?;
		Ok(AshMemory {
			allocation,
			memory_type_bits,
		})
	}

	pub unsafe fn free(&self, memory: AshMemory) {
		if let Err(e) = self.memory_allocator().free(memory.allocation) {
			log::error!("failed to free memory: {e}");
		}
	}
}
