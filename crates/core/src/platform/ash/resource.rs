use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::memory::AllocationInfo;
use crate::platform::ash::{Ash, AshMemory};
use crate::resource::{ResourceDesc, ResourceDimension};
use crate::view::{SamplerDesc, ViewDesc, ViewType};
use ash::vk::{
	BufferCreateInfo, ComponentMapping, DescriptorBufferInfo, Extent3D, ImageAspectFlags, ImageCreateFlags,
	ImageCreateInfo, ImageLayout, ImageTiling, ImageViewCreateInfo, MemoryRequirements, SamplerCreateInfo,
	SharingMode, LOD_CLAMP_NONE,
};

pub enum AshResource {
	Buffer {
		buffer: ash::vk::Buffer,
		size: u64,
	},
	Image {
		image: ash::vk::Image,
		desc: ResourceDesc<'static>,
		/// Swapchain images are owned by their swapchain.
		owned: bool,
	},
}

impl AshResource {
	/// The buffer handle, or null for images. Resources are validated to be buffers before they're used as one.
	pub fn buffer(&self) -> ash::vk::Buffer {
		match self {
			AshResource::Buffer { buffer, .. } => *buffer,
			AshResource::Image { .. } => ash::vk::Buffer::null(),
		}
	}

	pub fn image(&self) -> ash::vk::Image {
		match self {
			AshResource::Image { image, .. } => *image,
			AshResource::Buffer { .. } => ash::vk::Image::null(),
		}
	}

	pub fn format(&self) -> Format {
		match self {
			AshResource::Image { desc, .. } => desc.format,
			AshResource::Buffer { .. } => Format::Unknown,
		}
	}

	pub fn image_desc(&self) -> Option<&ResourceDesc<'static>> {
		match self {
			AshResource::Image { desc, .. } => Some(desc),
			AshResource::Buffer { .. } => None,
		}
	}
}

pub enum AshView {
	Image {
		view: ash::vk::ImageView,
		format: Format,
	},
	Buffer(DescriptorBufferInfo),
}

impl AshView {
	pub fn image_view(&self) -> ash::vk::ImageView {
		match self {
			AshView::Image { view, .. } => *view,
			AshView::Buffer(_) => ash::vk::ImageView::null(),
		}
	}
}

impl Ash {
	pub unsafe fn create_resource_native(&self, desc: &ResourceDesc) -> RhiResult<AshResource> {
		unsafe {
			let resource = if desc.is_buffer() {
				let buffer = self.device.create_buffer(
					&BufferCreateInfo::default()
						.size(desc.width)
						.usage(desc.usage.to_ash_buffer_usage_flags())
						.sharing_mode(SharingMode::EXCLUSIVE),
					None,
				)?;
				AshResource::Buffer {
					buffer,
					size: desc.width,
				}
			} else {
				let [width, height, depth] = desc.mip_extent(0);
				let image = self.device.create_image(
					&ImageCreateInfo::default()
						.flags(if desc.dimension == ResourceDimension::Texture3D {
							ImageCreateFlags::empty()
						} else {
							ImageCreateFlags::MUTABLE_FORMAT
						})
						.image_type(desc.dimension.to_ash_image_type())
						.format(desc.format.to_ash())
						.extent(Extent3D { width, height, depth })
						.mip_levels(desc.mip_levels)
						.array_layers(desc.array_layers())
						.samples(desc.samples.to_ash_sample_count_flags())
						.tiling(ImageTiling::OPTIMAL)
						.usage(desc.usage.to_ash_image_usage_flags())
						.sharing_mode(SharingMode::EXCLUSIVE)
						.initial_layout(ImageLayout::UNDEFINED),
					None,
				)?;
				AshResource::Image {
					image,
					desc: desc.without_name(),
					owned: true,
				}
			};
			let named = match &resource {
				AshResource::Buffer { buffer, .. } => self.set_debug_object_name(*buffer, desc.name),
				AshResource::Image { image, .. } => self.set_debug_object_name(*image, desc.name),
			};
			if let Err(e) = named {
				log::warn!("failed to name resource {:?}: {e}", desc.name);
			}
			Ok(resource)
		}
	}

	unsafe fn memory_requirements(&self, resource: &AshResource) -> MemoryRequirements {
		unsafe {
			match resource {
				AshResource::Buffer { buffer, .. } => self.device.get_buffer_memory_requirements(*buffer),
				AshResource::Image { image, .. } => self.device.get_image_memory_requirements(*image),
			}
		}
	}

	pub unsafe fn allocation_info(&self, resource: &AshResource) -> AllocationInfo {
		unsafe {
			let requirements = self.memory_requirements(resource);
			AllocationInfo {
				size: requirements.size,
				alignment: requirements.alignment,
			}
		}
	}

	pub unsafe fn bind(&self, resource: &AshResource, memory: &AshMemory, offset: u64) -> RhiResult<()> {
		unsafe {
			let requirements = self.memory_requirements(resource);
			if requirements.memory_type_bits & memory.memory_type_bits == 0 {
				return Err(RhiError::Unsupported(
					"resource can not be placed in memory allocated for this heap usage".to_string(),
				));
			}
			let device_memory = memory.allocation.memory();
			let offset = memory.allocation.offset() + offset;
			match resource {
				AshResource::Buffer { buffer, .. } => self.device.bind_buffer_memory(*buffer, device_memory, offset)?,
				AshResource::Image { image, .. } => self.device.bind_image_memory(*image, device_memory, offset)?,
			}
			Ok(())
		}
	}

	pub unsafe fn destroy_resource_native(&self, resource: AshResource) {
		unsafe {
			match resource {
				AshResource::Buffer { buffer, .. } => self.device.destroy_buffer(buffer, None),
				AshResource::Image { image, owned: true, .. } => self.device.destroy_image(image, None),
				AshResource::Image { owned: false, .. } => {}
			}
		}
	}

	pub unsafe fn create_view_native(&self, resource: &AshResource, desc: &ViewDesc) -> RhiResult<AshView> {
		unsafe {
			match resource {
				AshResource::Buffer { buffer, size } => {
					let range = if desc.buffer_size == 0 {
						size - desc.buffer_offset
					} else {
						desc.buffer_size
					};
					Ok(AshView::Buffer(
						DescriptorBufferInfo::default()
							.buffer(*buffer)
							.offset(desc.buffer_offset)
							.range(range),
					))
				}
				AshResource::Image { image, desc: image_desc, .. } => {
					let aspect = match desc.view_type {
						ViewType::DepthStencil => desc.format.aspect(),
						// shaders may only sample one aspect at a time
						_ if desc.format.is_depth() => ImageAspectFlags::DEPTH,
						_ => ImageAspectFlags::COLOR,
					};
					let arrayed = image_desc.array_layers() > 1;
					let view = self.device.create_image_view(
						&ImageViewCreateInfo::default()
							.image(*image)
							.view_type(image_desc.dimension.to_ash_image_view_type(arrayed))
							.format(desc.format.to_ash())
							.components(ComponentMapping::default()) // identity
							.subresource_range(desc.subresource.to_ash(aspect)),
						None,
					)?;
					Ok(AshView::Image {
						view,
						format: desc.format,
					})
				}
			}
		}
	}

	pub unsafe fn create_sampler_native(&self, desc: &SamplerDesc) -> RhiResult<ash::vk::Sampler> {
		unsafe {
			let max_lod = if desc.max_lod.is_finite() {
				desc.max_lod
			} else {
				LOD_CLAMP_NONE
			};
			Ok(self.device.create_sampler(
				&SamplerCreateInfo::default()
					.mag_filter(desc.mag_filter.to_ash_filter())
					.min_filter(desc.min_filter.to_ash_filter())
					.mipmap_mode(desc.mip_filter.to_ash_mipmap_mode())
					.address_mode_u(desc.address_u.to_ash_address_mode())
					.address_mode_v(desc.address_v.to_ash_address_mode())
					.address_mode_w(desc.address_w.to_ash_address_mode())
					.mip_lod_bias(desc.mip_lod_bias)
					.anisotropy_enable(desc.max_anisotropy.is_some())
					.max_anisotropy(desc.max_anisotropy.unwrap_or(1.))
					.compare_enable(desc.compare.is_some())
					.compare_op(desc.compare.unwrap_or_default().to_ash())
					.min_lod(desc.min_lod)
					.max_lod(max_lod)
					.border_color(desc.border_color.to_ash_border_color()),
				None,
			)?)
		}
	}
}
