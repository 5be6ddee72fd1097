use crate::backing::handle::{MemoryHandle, ResourceHandle, SwapchainHandle};
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::memory::{AllocationInfo, HeapType, HeapUsage};
use crate::platform::RhiPlatform;
use bitflags::bitflags;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ResourceDimension {
	#[default]
	Buffer,
	Texture1D,
	Texture2D,
	Texture3D,
}

impl ResourceDimension {
	pub fn is_texture(&self) -> bool {
		!matches!(self, ResourceDimension::Buffer)
	}
}

bitflags! {
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
	pub struct ResourceUsage: u32 {
		const TRANSFER_SRC = 1 << 0;
		const TRANSFER_DST = 1 << 1;
		const VERTEX_BUFFER = 1 << 2;
		const INDEX_BUFFER = 1 << 3;
		const CONSTANT_BUFFER = 1 << 4;
		const STORAGE_BUFFER = 1 << 5;
		const INDIRECT_BUFFER = 1 << 6;
		const SAMPLED = 1 << 7;
		const STORAGE_TEXTURE = 1 << 8;
		const RENDER_TARGET = 1 << 9;
		const DEPTH_STENCIL = 1 << 10;
	}
}

impl ResourceUsage {
	pub const BUFFER_USAGES: Self = Self::TRANSFER_SRC
		.union(Self::TRANSFER_DST)
		.union(Self::VERTEX_BUFFER)
		.union(Self::INDEX_BUFFER)
		.union(Self::CONSTANT_BUFFER)
		.union(Self::STORAGE_BUFFER)
		.union(Self::INDIRECT_BUFFER);

	pub const TEXTURE_USAGES: Self = Self::TRANSFER_SRC
		.union(Self::TRANSFER_DST)
		.union(Self::SAMPLED)
		.union(Self::STORAGE_TEXTURE)
		.union(Self::RENDER_TARGET)
		.union(Self::DEPTH_STENCIL);
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum SharingMode {
	/// Owned by a single queue family at a time.
	#[default]
	Exclusive,
	Concurrent,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum SampleCount {
	#[default]
	X1,
	X2,
	X4,
	X8,
}

impl SampleCount {
	pub fn count(&self) -> u32 {
		match self {
			SampleCount::X1 => 1,
			SampleCount::X2 => 2,
			SampleCount::X4 => 4,
			SampleCount::X8 => 8,
		}
	}
}

/// Describes a buffer or texture. For buffers `width` is the size in bytes and all other extents are 1.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ResourceDesc<'a> {
	pub dimension: ResourceDimension,
	pub width: u64,
	pub height: u32,
	/// Depth for 3D textures, array layers otherwise.
	pub depth_or_array_layers: u32,
	pub mip_levels: u32,
	pub format: Format,
	pub samples: SampleCount,
	pub usage: ResourceUsage,
	pub sharing: SharingMode,
	pub name: &'a str,
}

impl<'a> ResourceDesc<'a> {
	pub fn buffer(size: u64, usage: ResourceUsage) -> Self {
		Self {
			dimension: ResourceDimension::Buffer,
			width: size,
			height: 1,
			depth_or_array_layers: 1,
			mip_levels: 1,
			format: Format::Unknown,
			samples: SampleCount::X1,
			usage,
			sharing: SharingMode::Exclusive,
			name: "",
		}
	}

	pub fn texture_1d(format: Format, width: u32, usage: ResourceUsage) -> Self {
		Self {
			dimension: ResourceDimension::Texture1D,
			width: width as u64,
			format,
			..Self::buffer(0, usage)
		}
	}

	pub fn texture_2d(format: Format, width: u32, height: u32, usage: ResourceUsage) -> Self {
		Self {
			dimension: ResourceDimension::Texture2D,
			width: width as u64,
			height,
			format,
			..Self::buffer(0, usage)
		}
	}

	pub fn texture_3d(format: Format, extent: [u32; 3], usage: ResourceUsage) -> Self {
		Self {
			dimension: ResourceDimension::Texture3D,
			width: extent[0] as u64,
			height: extent[1],
			depth_or_array_layers: extent[2],
			format,
			..Self::buffer(0, usage)
		}
	}

	pub fn with_name(self, name: &'a str) -> Self {
		Self { name, ..self }
	}

	pub fn with_mip_levels(self, mip_levels: u32) -> Self {
		Self { mip_levels, ..self }
	}

	pub fn with_array_layers(self, layers: u32) -> Self {
		Self {
			depth_or_array_layers: layers,
			..self
		}
	}

	pub fn with_samples(self, samples: SampleCount) -> Self {
		Self { samples, ..self }
	}

	pub fn is_buffer(&self) -> bool {
		!self.dimension.is_texture()
	}

	pub fn is_texture(&self) -> bool {
		self.dimension.is_texture()
	}

	pub fn depth(&self) -> u32 {
		match self.dimension {
			ResourceDimension::Texture3D => self.depth_or_array_layers,
			_ => 1,
		}
	}

	pub fn array_layers(&self) -> u32 {
		match self.dimension {
			ResourceDimension::Texture3D => 1,
			_ => self.depth_or_array_layers,
		}
	}

	/// Extent of the given mip level.
	pub fn mip_extent(&self, mip: u32) -> [u32; 3] {
		let shrink = |x: u32| (x >> mip).max(1);
		[shrink(self.width as u32), shrink(self.height), shrink(self.depth())]
	}

	/// Tightly packed size of a single subresource in bytes.
	pub fn subresource_size(&self, mip: u32) -> u64 {
		let [w, h, d] = self.mip_extent(mip);
		w as u64 * h as u64 * d as u64 * self.format.block_size() as u64
	}

	pub fn subresource_count(&self) -> u32 {
		self.mip_levels * self.array_layers()
	}

	/// The kind of memory this resource has to be placed in.
	pub fn heap_usage(&self) -> HeapUsage {
		if self.is_buffer() {
			HeapUsage::Buffers
		} else if self
			.usage
			.intersects(ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_STENCIL)
		{
			HeapUsage::RenderTargets
		} else {
			HeapUsage::Textures
		}
	}

	pub fn without_name(&self) -> ResourceDesc<'static> {
		ResourceDesc {
			dimension: self.dimension,
			width: self.width,
			height: self.height,
			depth_or_array_layers: self.depth_or_array_layers,
			mip_levels: self.mip_levels,
			format: self.format,
			samples: self.samples,
			usage: self.usage,
			sharing: self.sharing,
			name: "",
		}
	}

	pub fn validate(&self, max_texture_dimension: u32) -> RhiResult<()> {
		let fail = |msg: String| Err(RhiError::InvalidArgument(format!("resource {:?}: {msg}", self.name)));
		if self.usage.is_empty() {
			return fail("usage must not be empty".into());
		}
		if self.width == 0 || self.height == 0 || self.depth_or_array_layers == 0 || self.mip_levels == 0 {
			return fail("extents and mip levels must not be 0".into());
		}
		if self.is_buffer() {
			if !ResourceUsage::BUFFER_USAGES.contains(self.usage) {
				return fail(format!("usage {:?} is not valid for buffers", self.usage));
			}
			if self.height != 1 || self.depth_or_array_layers != 1 || self.mip_levels != 1 {
				return fail("buffers must have height, depth and mip levels of 1".into());
			}
			if self.samples != SampleCount::X1 || !self.format.is_unknown() {
				return fail("buffers must not be multisampled or have a format".into());
			}
			return Ok(());
		}

		if !ResourceUsage::TEXTURE_USAGES.contains(self.usage) {
			return fail(format!("usage {:?} is not valid for textures", self.usage));
		}
		if self.format.is_unknown() {
			return fail("textures require a format".into());
		}
		if self.width > max_texture_dimension as u64
			|| self.height > max_texture_dimension
			|| self.depth() > max_texture_dimension
		{
			return fail(format!("extent exceeds maximum dimension {max_texture_dimension}"));
		}
		if self.dimension == ResourceDimension::Texture1D && self.height != 1 {
			return fail("1D textures must have a height of 1".into());
		}
		let max_extent = (self.width as u32).max(self.height).max(self.depth());
		let max_mips = u32::BITS - max_extent.leading_zeros();
		if self.mip_levels > max_mips {
			return fail(format!("{} mip levels exceed the maximum of {max_mips}", self.mip_levels));
		}
		if self.format.is_depth() {
			if self.usage.intersects(ResourceUsage::RENDER_TARGET | ResourceUsage::STORAGE_TEXTURE) {
				return fail("depth formats can not be render targets or storage textures".into());
			}
		} else if self.usage.contains(ResourceUsage::DEPTH_STENCIL) {
			return fail("depth-stencil usage requires a depth format".into());
		}
		if self.samples != SampleCount::X1 {
			if self.dimension != ResourceDimension::Texture2D || self.mip_levels != 1 {
				return fail("only 2D textures with a single mip level may be multisampled".into());
			}
			if !self
				.usage
				.intersects(ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_STENCIL)
			{
				return fail("multisampled textures must be render targets or depth-stencil".into());
			}
		}
		Ok(())
	}
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct MemoryBinding {
	pub memory: MemoryHandle,
	pub offset: u64,
	pub heap_type: HeapType,
}

pub(crate) struct ResourceSlot<P: RhiPlatform> {
	pub native: P::Resource,
	pub desc: ResourceDesc<'static>,
	pub info: AllocationInfo,
	pub binding: Option<MemoryBinding>,
	pub map_count: AtomicU32,
	/// Back buffers are owned by their swapchain.
	pub swapchain: Option<SwapchainHandle>,
}

impl<P: RhiPlatform> ResourceSlot<P> {
	pub fn require_bound(&self) -> RhiResult<MemoryBinding> {
		self.binding.ok_or_else(|| {
			RhiError::invalid_state(format!("{:?} resource is not bound to memory", self.desc.dimension))
		})
	}
}

/// Host memory of a mapped buffer range, for copying with [`presser`].
struct MappedSlab {
	ptr: NonNull<u8>,
	size: usize,
}

unsafe impl presser::Slab for MappedSlab {
	fn base_ptr(&self) -> *const u8 {
		self.ptr.as_ptr()
	}

	fn base_ptr_mut(&mut self) -> *mut u8 {
		self.ptr.as_ptr()
	}

	fn size(&self) -> usize {
		self.size
	}
}

impl<P: RhiPlatform> Device<P> {
	/// Creates a resource without any memory backing it. It must be bound with [`Self::bind_resource_memory`] before
	/// it can be used.
	pub fn create_resource(&self, desc: &ResourceDesc) -> RhiResult<ResourceHandle> {
		profiling::function_scope!();
		desc.validate(self.limits().max_texture_dimension_2d)?;
		unsafe {
			let native = self.platform.create_resource(desc)?;
			let info = self.platform.resource_allocation_info(&native);
			Ok(self.objects.resources.write().insert(ResourceSlot {
				native,
				desc: desc.without_name(),
				info,
				binding: None,
				map_count: AtomicU32::new(0),
				swapchain: None,
			}))
		}
	}

	pub fn get_resource_allocation_info(&self, resource: ResourceHandle) -> RhiResult<AllocationInfo> {
		Ok(self.objects.resources.read().try_get(resource)?.info)
	}

	pub fn resource_desc(&self, resource: ResourceHandle) -> RhiResult<ResourceDesc<'static>> {
		Ok(self.objects.resources.read().try_get(resource)?.desc)
	}

	pub fn is_resource_bound(&self, resource: ResourceHandle) -> RhiResult<bool> {
		Ok(self.objects.resources.read().try_get(resource)?.binding.is_some())
	}

	/// Places `resource` at `offset` within `memory`. A resource can only be bound once.
	pub fn bind_resource_memory(&self, resource: ResourceHandle, memory: MemoryHandle, offset: u64) -> RhiResult<()> {
		profiling::function_scope!();
		let memory_arena = self.objects.memory.read();
		let memory_slot = memory_arena.try_get(memory)?;
		let mut resources = self.objects.resources.write();
		let slot = resources.try_get_mut(resource)?;

		if slot.binding.is_some() {
			return Err(RhiError::invalid_state(format!("{resource:?} is already bound to memory")));
		}
		let required_usage = slot.desc.heap_usage();
		if required_usage != memory_slot.usage {
			return Err(RhiError::invalid_argument(format!(
				"{resource:?} requires {required_usage:?} memory but {memory:?} is {:?}",
				memory_slot.usage
			)));
		}
		if slot.desc.is_texture() && memory_slot.heap_type.is_host_visible() {
			return Err(RhiError::invalid_argument(format!(
				"textures can not be placed in host-visible {:?} memory",
				memory_slot.heap_type
			)));
		}
		if memory_slot.alignment < slot.info.alignment {
			return Err(RhiError::invalid_argument(format!(
				"{resource:?} requires {} byte aligned memory but {memory:?} is only aligned to {}",
				slot.info.alignment, memory_slot.alignment
			)));
		}
		if offset % slot.info.alignment != 0 {
			return Err(RhiError::invalid_argument(format!(
				"offset {offset} is not aligned to {}",
				slot.info.alignment
			)));
		}
		if offset.checked_add(slot.info.size).map_or(true, |end| end > memory_slot.size) {
			return Err(RhiError::invalid_argument(format!(
				"{} bytes at offset {offset} exceed memory block of {} bytes",
				slot.info.size, memory_slot.size
			)));
		}

		unsafe {
			self.platform
				.bind_resource_memory(&slot.native, &memory_slot.native, offset)?;
		}
		slot.binding = Some(MemoryBinding {
			memory,
			offset,
			heap_type: memory_slot.heap_type,
		});
		memory_slot.bound_resources.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	/// Maps `range` of a bound buffer residing in host-visible memory. Maps are reference counted and every map must
	/// be paired with an [`Self::unmap_resource`].
	///
	/// # Safety
	/// The returned pointer is valid for `range.end - range.start` bytes until the buffer is unmapped or its memory is
	/// freed. Accesses must be synchronized with GPU accesses to the same range.
	pub unsafe fn map_resource(&self, resource: ResourceHandle, range: Range<u64>) -> RhiResult<NonNull<u8>> {
		let memory = self.objects.memory.read();
		let resources = self.objects.resources.read();
		let slot = resources.try_get(resource)?;
		if !slot.desc.is_buffer() {
			return Err(RhiError::Unsupported("only buffers can be mapped".into()));
		}
		let binding = slot.require_bound()?;
		if !binding.heap_type.is_host_visible() {
			return Err(RhiError::invalid_state(format!(
				"{resource:?} is bound to {:?} memory which is not host-visible",
				binding.heap_type
			)));
		}
		if range.start > range.end || range.end > slot.desc.width {
			return Err(RhiError::invalid_argument(format!(
				"map range {range:?} out of bounds for buffer of {} bytes",
				slot.desc.width
			)));
		}
		let memory_slot = memory.try_get(binding.memory)?;
		let ptr = unsafe {
			self.platform
				.map_memory(&memory_slot.native, binding.offset + range.start, range.end - range.start)?
		};
		slot.map_count.fetch_add(1, Ordering::Relaxed);
		Ok(ptr)
	}

	pub fn unmap_resource(&self, resource: ResourceHandle) -> RhiResult<()> {
		let memory = self.objects.memory.read();
		let resources = self.objects.resources.read();
		let slot = resources.try_get(resource)?;
		slot.map_count
			.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
			.map_err(|_| RhiError::invalid_state(format!("{resource:?} is not mapped")))?;
		let binding = slot.require_bound()?;
		unsafe { self.platform.unmap_memory(&memory.try_get(binding.memory)?.native) };
		Ok(())
	}

	/// Copies `data` into a host-visible buffer at `offset`.
	pub fn write_resource(&self, resource: ResourceHandle, offset: u64, data: &[u8]) -> RhiResult<()> {
		profiling::function_scope!();
		let range = offset..offset + data.len() as u64;
		unsafe {
			let ptr = self.map_resource(resource, range)?;
			let mut slab = MappedSlab { ptr, size: data.len() };
			let result = presser::copy_from_slice_to_offset(data, &mut slab, 0);
			self.unmap_resource(resource)?;
			result.map_err(|e| RhiError::invalid_argument(format!("{e:?}")))?;
		}
		Ok(())
	}

	pub fn write_resource_pod<T: bytemuck::Pod>(
		&self,
		resource: ResourceHandle,
		offset: u64,
		data: &[T],
	) -> RhiResult<()> {
		self.write_resource(resource, offset, bytemuck::cast_slice(data))
	}

	/// Copies `out.len()` bytes starting at `offset` of a host-visible buffer into `out`.
	pub fn read_resource(&self, resource: ResourceHandle, offset: u64, out: &mut [u8]) -> RhiResult<()> {
		profiling::function_scope!();
		let range = offset..offset + out.len() as u64;
		unsafe {
			let ptr = self.map_resource(resource, range)?;
			std::ptr::copy_nonoverlapping(ptr.as_ptr(), out.as_mut_ptr(), out.len());
			self.unmap_resource(resource)
		}
	}

	/// Destroys the resource. The memory it was bound to stays allocated.
	pub fn destroy_resource(&self, resource: &mut ResourceHandle) {
		if let Ok(slot) = self.objects.resources.read().try_get(*resource) {
			if let Some(swapchain) = slot.swapchain {
				log::error!("{resource:?} is a back buffer of {swapchain:?} and can not be destroyed");
				return;
			}
		}
		if let Some(slot) = take_slot(&self.objects.resources, resource) {
			if let Some(binding) = slot.binding {
				if let Some(memory) = self.objects.memory.read().get(binding.memory) {
					memory.bound_resources.fetch_sub(1, Ordering::Relaxed);
				}
			}
			unsafe { self.platform.destroy_resource(slot.native) }
		}
	}
}
