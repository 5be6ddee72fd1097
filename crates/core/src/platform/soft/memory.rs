use crate::barrier::TextureLayout;
use crate::error::{RhiError, RhiResult};
use crate::memory::{AllocationInfo, HeapType};
use crate::resource::ResourceDesc;
use crate::view::{SamplerDesc, ViewDesc};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::alloc::Layout;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// Placement alignment of every resource, matching the default of placed resources.
pub const RESOURCE_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

/// A zeroed host allocation standing in for a GPU memory heap.
pub struct HostHeap {
	ptr: NonNull<u8>,
	layout: Layout,
	pub heap_type: HeapType,
}

// The heap is plain bytes, synchronizing accesses is up to the user just like with device memory.
unsafe impl Send for HostHeap {}
unsafe impl Sync for HostHeap {}

impl HostHeap {
	pub fn new(size: u64, alignment: u64, heap_type: HeapType) -> RhiResult<Self> {
		let oom = || RhiError::OutOfMemory(format!("host heap of {size} bytes"));
		let size = usize::try_from(size).map_err(|_| oom())?;
		let alignment = usize::try_from(alignment).map_err(|_| oom())?;
		let layout = Layout::from_size_align(size, alignment).map_err(|_| oom())?;
		// size is never 0, the device rejects empty allocations
		let ptr = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) }).ok_or_else(oom)?;
		Ok(Self { ptr, layout, heap_type })
	}

	pub fn size(&self) -> u64 {
		self.layout.size() as u64
	}

	/// # Safety
	/// `offset` must be within the heap.
	pub unsafe fn ptr(&self, offset: u64) -> NonNull<u8> {
		debug_assert!(offset <= self.size());
		unsafe { self.ptr.add(offset as usize) }
	}
}

impl Drop for HostHeap {
	fn drop(&mut self) {
		unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
	}
}

#[derive(Clone)]
pub struct SoftMemory(pub Arc<HostHeap>);

impl Deref for SoftMemory {
	type Target = HostHeap;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

pub struct SoftResourceData {
	pub desc: ResourceDesc<'static>,
	pub info: AllocationInfo,
	binding: OnceLock<(SoftMemory, u64)>,
	/// Current layout of each subresource, indexed by `layer * mip_levels + mip`.
	layouts: Mutex<SmallVec<[TextureLayout; 4]>>,
}

/// Buffers are stored linearly, textures as tightly packed subresources ordered by layer then mip.
#[derive(Clone)]
pub struct SoftResource(pub Arc<SoftResourceData>);

impl Deref for SoftResource {
	type Target = SoftResourceData;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl SoftResource {
	pub fn new(desc: &ResourceDesc) -> Self {
		let desc = desc.without_name();
		let size = if desc.is_buffer() {
			desc.width
		} else {
			layer_size(&desc) * desc.array_layers() as u64
		};
		let layouts = if desc.is_buffer() {
			SmallVec::new()
		} else {
			SmallVec::from_elem(TextureLayout::Undefined, desc.subresource_count() as usize)
		};
		Self(Arc::new(SoftResourceData {
			desc,
			info: AllocationInfo {
				size: size.next_multiple_of(RESOURCE_PLACEMENT_ALIGNMENT),
				alignment: RESOURCE_PLACEMENT_ALIGNMENT,
			},
			binding: OnceLock::new(),
			layouts: Mutex::new(layouts),
		}))
	}

	/// A swapchain back buffer backed by its own heap, in the present layout.
	pub fn back_buffer(desc: &ResourceDesc) -> RhiResult<Self> {
		let resource = Self::new(desc);
		let memory = SoftMemory(Arc::new(HostHeap::new(
			resource.info.size,
			resource.info.alignment,
			HeapType::Default,
		)?));
		resource.bind(memory, 0);
		resource.layouts.lock().fill(TextureLayout::Present);
		Ok(resource)
	}

	pub fn ptr_eq(&self, other: &SoftResource) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl SoftResourceData {
	pub fn bind(&self, memory: SoftMemory, offset: u64) {
		if self.binding.set((memory, offset)).is_err() {
			log::error!("soft resource bound to memory twice");
		}
	}

	/// Pointer to byte `offset` of this resource.
	///
	/// # Safety
	/// The resource must be bound and `offset` within its size.
	pub unsafe fn ptr(&self, offset: u64) -> Option<NonNull<u8>> {
		self.binding
			.get()
			.map(|(memory, base)| unsafe { memory.ptr(base + offset) })
	}

	pub fn subresource_index(&self, mip: u32, layer: u32) -> usize {
		(layer * self.desc.mip_levels + mip) as usize
	}

	/// Byte offset of a texture subresource.
	pub fn subresource_offset(&self, mip: u32, layer: u32) -> u64 {
		let before_mip = (0..mip).map(|m| subresource_bytes(&self.desc, m)).sum::<u64>();
		layer as u64 * layer_size(&self.desc) + before_mip
	}

	pub fn layout(&self, mip: u32, layer: u32) -> TextureLayout {
		self.layouts
			.lock()
			.get(self.subresource_index(mip, layer))
			.copied()
			.unwrap_or(TextureLayout::Undefined)
	}

	pub fn layouts(&self) -> parking_lot::MutexGuard<'_, SmallVec<[TextureLayout; 4]>> {
		self.layouts.lock()
	}
}

fn subresource_bytes(desc: &ResourceDesc, mip: u32) -> u64 {
	desc.subresource_size(mip) * desc.samples.count() as u64
}

fn layer_size(desc: &ResourceDesc) -> u64 {
	(0..desc.mip_levels).map(|m| subresource_bytes(desc, m)).sum()
}

pub struct SoftViewData {
	pub resource: SoftResource,
	pub desc: ViewDesc,
}

#[derive(Clone)]
pub struct SoftView(pub Arc<SoftViewData>);

impl Deref for SoftView {
	type Target = SoftViewData;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

#[derive(Clone)]
pub struct SoftSampler(pub Arc<SamplerDesc>);

/// Copies `size` bytes between two resources, which may alias the same heap.
///
/// # Safety
/// Both resources must be bound and both ranges within bounds.
pub unsafe fn copy_bytes(src: &SoftResource, src_offset: u64, dst: &SoftResource, dst_offset: u64, size: u64) {
	unsafe {
		if let (Some(src), Some(dst)) = (src.ptr(src_offset), dst.ptr(dst_offset)) {
			std::ptr::copy(src.as_ptr(), dst.as_ptr(), size as usize);
		}
	}
}

/// Fills `size` bytes of `dst` with repetitions of `texel`.
///
/// # Safety
/// The resource must be bound and the range within bounds.
pub unsafe fn fill_texels(dst: &SoftResource, offset: u64, size: u64, texel: &[u8]) {
	unsafe {
		if texel.is_empty() {
			return;
		}
		if let Some(ptr) = dst.ptr(offset) {
			for i in 0..(size as usize / texel.len()) {
				std::ptr::copy_nonoverlapping(texel.as_ptr(), ptr.as_ptr().add(i * texel.len()), texel.len());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::format::Format;
	use crate::resource::ResourceUsage;

	#[test]
	fn texture_subresource_offsets() {
		let desc = ResourceDesc::texture_2d(Format::R8G8B8A8Unorm, 4, 4, ResourceUsage::SAMPLED)
			.with_mip_levels(3)
			.with_array_layers(2);
		let resource = SoftResource::new(&desc);
		// mips are 64, 16 and 4 bytes
		assert_eq!(resource.subresource_offset(0, 0), 0);
		assert_eq!(resource.subresource_offset(2, 0), 80);
		assert_eq!(resource.subresource_offset(1, 1), 84 + 64);
		assert_eq!(resource.subresource_index(1, 1), 4);
		assert_eq!(resource.info.size, RESOURCE_PLACEMENT_ALIGNMENT);
		assert_eq!(resource.layout(2, 1), TextureLayout::Undefined);
	}

	#[test]
	fn back_buffers_start_presentable() -> RhiResult<()> {
		let desc = ResourceDesc::texture_2d(Format::B8G8R8A8Unorm, 8, 8, ResourceUsage::RENDER_TARGET);
		let resource = SoftResource::back_buffer(&desc)?;
		assert_eq!(resource.layout(0, 0), TextureLayout::Present);
		assert!(unsafe { resource.ptr(0) }.is_some());
		Ok(())
	}

	#[test]
	fn copy_and_fill() -> RhiResult<()> {
		let memory = SoftMemory(Arc::new(HostHeap::new(
			2 * RESOURCE_PLACEMENT_ALIGNMENT,
			RESOURCE_PLACEMENT_ALIGNMENT,
			HeapType::Upload,
		)?));
		let desc = ResourceDesc::buffer(16, ResourceUsage::TRANSFER_SRC | ResourceUsage::TRANSFER_DST);
		let a = SoftResource::new(&desc);
		let b = SoftResource::new(&desc);
		a.bind(memory.clone(), 0);
		b.bind(memory.clone(), RESOURCE_PLACEMENT_ALIGNMENT);
		unsafe {
			fill_texels(&a, 0, 16, &[1, 2, 3, 4]);
			copy_bytes(&a, 4, &b, 0, 8);
			let out = std::slice::from_raw_parts(memory.ptr(RESOURCE_PLACEMENT_ALIGNMENT).as_ptr(), 8);
			assert_eq!(out, &[1, 2, 3, 4, 1, 2, 3, 4]);
		}
		Ok(())
	}
}
