use crate::backing::handle::MemoryHandle;
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::platform::RhiPlatform;
use std::sync::atomic::{AtomicU32, Ordering};

/// Alignment of memory blocks that don't request a specific alignment. Large enough to place any resource.
pub const DEFAULT_MEMORY_ALIGNMENT: u64 = 64 * 1024;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CpuPageProperty {
	NotAvailable,
	WriteCombine,
	WriteBack,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemoryPool {
	/// Memory closest to the host, system memory on discrete GPUs.
	L0,
	/// Memory closest to the GPU, video memory on discrete GPUs.
	L1,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CustomHeapProperties {
	pub cpu_page: CpuPageProperty,
	pub memory_pool: MemoryPool,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum HeapType {
	/// GPU-local memory, not accessible from the host.
	#[default]
	Default,
	/// Host-visible write-combined memory for uploading data to the GPU.
	Upload,
	/// Host-visible cached memory for reading back results from the GPU.
	Readback,
	Custom(CustomHeapProperties),
}

impl HeapType {
	pub fn is_host_visible(&self) -> bool {
		match self {
			HeapType::Default => false,
			HeapType::Upload | HeapType::Readback => true,
			HeapType::Custom(props) => props.cpu_page != CpuPageProperty::NotAvailable,
		}
	}
}

/// The category of resources a memory block may back.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum HeapUsage {
	#[default]
	Buffers,
	Textures,
	/// Render target and depth-stencil textures.
	RenderTargets,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct MemoryDesc<'a> {
	pub size: u64,
	/// Required alignment of the block, 0 selects [`DEFAULT_MEMORY_ALIGNMENT`].
	pub alignment: u64,
	pub heap_type: HeapType,
	pub usage: HeapUsage,
	pub name: &'a str,
}

impl MemoryDesc<'_> {
	pub fn effective_alignment(&self) -> u64 {
		if self.alignment == 0 {
			DEFAULT_MEMORY_ALIGNMENT
		} else {
			self.alignment
		}
	}
}

/// Size and alignment a resource requires from the memory it's bound to.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct AllocationInfo {
	pub size: u64,
	pub alignment: u64,
}

pub(crate) struct MemorySlot<P: RhiPlatform> {
	pub native: P::Memory,
	pub size: u64,
	pub alignment: u64,
	pub heap_type: HeapType,
	pub usage: HeapUsage,
	pub bound_resources: AtomicU32,
}

impl<P: RhiPlatform> Device<P> {
	/// Allocates a raw memory block resources can later be bound to.
	pub fn allocate_memory(&self, desc: &MemoryDesc) -> RhiResult<MemoryHandle> {
		profiling::function_scope!();
		if desc.size == 0 {
			return Err(RhiError::invalid_argument("memory size must not be 0"));
		}
		let alignment = desc.effective_alignment();
		if !alignment.is_power_of_two() {
			return Err(RhiError::invalid_argument(format!(
				"memory alignment {alignment} is not a power of two"
			)));
		}
		let desc = MemoryDesc { alignment, ..*desc };
		let native = unsafe { self.platform.allocate_memory(&desc)? };
		log::trace!("allocated {} bytes of {:?} memory {:?}", desc.size, desc.heap_type, desc.name);
		Ok(self.objects.memory.write().insert(MemorySlot {
			native,
			size: desc.size,
			alignment,
			heap_type: desc.heap_type,
			usage: desc.usage,
			bound_resources: AtomicU32::new(0),
		}))
	}

	/// Frees a memory block. Resources bound to it must have been destroyed before.
	pub fn free_memory(&self, memory: &mut MemoryHandle) {
		if let Some(slot) = take_slot(&self.objects.memory, memory) {
			let bound = slot.bound_resources.load(Ordering::Relaxed);
			if bound != 0 {
				log::warn!("freeing memory block with {bound} resources still bound to it");
			}
			unsafe { self.platform.free_memory(slot.native) }
		}
	}

	pub fn memory_size(&self, memory: MemoryHandle) -> RhiResult<u64> {
		Ok(self.objects.memory.read().try_get(memory)?.size)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn host_visibility() {
		assert!(!HeapType::Default.is_host_visible());
		assert!(HeapType::Upload.is_host_visible());
		assert!(HeapType::Readback.is_host_visible());
		let custom = |cpu_page| {
			HeapType::Custom(CustomHeapProperties {
				cpu_page,
				memory_pool: MemoryPool::L0,
			})
		};
		assert!(!custom(CpuPageProperty::NotAvailable).is_host_visible());
		assert!(custom(CpuPageProperty::WriteBack).is_host_visible());
	}

	#[test]
	fn default_alignment() {
		let desc = MemoryDesc {
			size: 16,
			..MemoryDesc::default()
		};
		assert_eq!(desc.effective_alignment(), DEFAULT_MEMORY_ALIGNMENT);
	}
}
