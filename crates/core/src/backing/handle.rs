use static_assertions::const_assert_eq;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Marker trait for the kind of object a [`Handle`] refers to.
pub trait HandleKind: 'static {
	const NAME: &'static str;
}

macro_rules! handle_kinds {
	($($(#[$attr:meta])* $name:ident,)*) => {
		pub mod kind {
			$(
				$(#[$attr])*
				#[derive(Copy, Clone, Debug)]
				pub enum $name {}

				impl super::HandleKind for $name {
					const NAME: &'static str = stringify!($name);
				}
			)*
		}
	};
}

handle_kinds! {
	Queue,
	MemoryBlock,
	Resource,
	/// View onto a [`Resource`], eg. a render target or a sampled texture.
	ResourceView,
	Sampler,
	BindingSetLayout,
	BindingHeapLayout,
	BindingHeap,
	PipelineLayout,
	Pipeline,
	Fence,
	Semaphore,
	CommandPool,
	CommandBuffer,
	Swapchain,
}

pub type QueueHandle = Handle<kind::Queue>;
pub type MemoryHandle = Handle<kind::MemoryBlock>;
pub type ResourceHandle = Handle<kind::Resource>;
pub type ViewHandle = Handle<kind::ResourceView>;
pub type SamplerHandle = Handle<kind::Sampler>;
pub type BindingSetLayoutHandle = Handle<kind::BindingSetLayout>;
pub type BindingHeapLayoutHandle = Handle<kind::BindingHeapLayout>;
pub type BindingHeapHandle = Handle<kind::BindingHeap>;
pub type PipelineLayoutHandle = Handle<kind::PipelineLayout>;
pub type PipelineHandle = Handle<kind::Pipeline>;
pub type FenceHandle = Handle<kind::Fence>;
pub type SemaphoreHandle = Handle<kind::Semaphore>;
pub type CommandPoolHandle = Handle<kind::CommandPool>;
pub type CommandBufferHandle = Handle<kind::CommandBuffer>;
pub type SwapchainHandle = Handle<kind::Swapchain>;

/// A typed, non-owning reference to a device object. The lower 32 bits are the slot index, the upper 32 bits the
/// generation of the slot. Generations start at 1, so the all-zero value is never a live handle and serves as
/// [`Handle::INVALID`].
pub struct Handle<K: HandleKind> {
	raw: u64,
	_phantom: PhantomData<fn() -> K>,
}

const_assert_eq!(size_of::<Handle<kind::Resource>>(), 8);

impl<K: HandleKind> Handle<K> {
	pub const INVALID: Self = Self::from_raw(0);

	#[inline]
	pub(crate) const fn new(index: u32, generation: u32) -> Self {
		Self::from_raw(((generation as u64) << 32) | index as u64)
	}

	#[inline]
	pub const fn from_raw(raw: u64) -> Self {
		Self {
			raw,
			_phantom: PhantomData,
		}
	}

	#[inline]
	pub const fn to_raw(&self) -> u64 {
		self.raw
	}

	#[inline]
	pub const fn index(&self) -> u32 {
		self.raw as u32
	}

	#[inline]
	pub const fn generation(&self) -> u32 {
		(self.raw >> 32) as u32
	}

	/// Whether this handle may refer to a live object. A valid handle may still be stale, that is only known to the
	/// device that created it.
	#[inline]
	pub const fn is_valid(&self) -> bool {
		self.generation() != 0
	}

	#[inline]
	pub const fn is_invalid(&self) -> bool {
		!self.is_valid()
	}
}

impl<K: HandleKind> Copy for Handle<K> {}

impl<K: HandleKind> Clone for Handle<K> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<K: HandleKind> Default for Handle<K> {
	fn default() -> Self {
		Self::INVALID
	}
}

impl<K: HandleKind> PartialEq for Handle<K> {
	fn eq(&self, other: &Self) -> bool {
		self.raw == other.raw
	}
}

impl<K: HandleKind> Eq for Handle<K> {}

impl<K: HandleKind> Hash for Handle<K> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.raw.hash(state)
	}
}

impl<K: HandleKind> Debug for Handle<K> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		if self.is_valid() {
			write!(f, "{}({}v{})", K::NAME, self.index(), self.generation())
		} else {
			write!(f, "{}(invalid)", K::NAME)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_is_invalid() {
		let handle = ResourceHandle::default();
		assert!(handle.is_invalid());
		assert_eq!(handle, ResourceHandle::INVALID);
		assert_eq!(handle.to_raw(), 0);
	}

	#[test]
	fn index_and_generation() {
		let handle = FenceHandle::new(42, 7);
		assert!(handle.is_valid());
		assert_eq!(handle.index(), 42);
		assert_eq!(handle.generation(), 7);
		assert_eq!(FenceHandle::from_raw(handle.to_raw()), handle);
		assert_ne!(FenceHandle::new(42, 8), handle);
	}

	#[test]
	fn debug_names_kind() {
		assert_eq!(format!("{:?}", SemaphoreHandle::new(3, 1)), "Semaphore(3v1)");
		assert_eq!(format!("{:?}", SemaphoreHandle::INVALID), "Semaphore(invalid)");
	}
}
