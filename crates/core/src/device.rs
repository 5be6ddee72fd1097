use crate::backing::arena::Arena;
use crate::backing::handle::{kind, Handle, HandleKind};
use crate::binding::{BindingHeapSlot, BindingLayoutSlot};
use crate::command::{CommandBufferSlot, CommandPoolSlot};
use crate::error::RhiResult;
use crate::factory::{Adapter, FactoryInner};
use crate::memory::MemorySlot;
use crate::pipeline::{PipelineLayoutSlot, PipelineSlot};
use crate::platform::RhiPlatform;
use crate::queue::QueueSlot;
use crate::resource::ResourceSlot;
use crate::swapchain::SwapchainSlot;
use crate::sync::{FenceSlot, SemaphoreSlot};
use crate::view::{SamplerSlot, ViewSlot};
use parking_lot::RwLock;
use std::sync::Arc;

/// Backend properties the device validates against.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceLimits {
	/// Distance between two consecutive descriptors in a binding heap, in the unit [`BindingOffset`]s are expressed in.
	///
	/// [`BindingOffset`]: crate::binding::BindingOffset
	pub descriptor_stride: u32,
	pub constant_buffer_alignment: u64,
	pub storage_buffer_alignment: u64,
	pub max_push_constant_size: u32,
	pub max_texture_dimension_2d: u32,
	pub max_color_attachments: u32,
}

/// Every live object of a device, one arena per kind.
///
/// When locking multiple arenas at once they must be locked in declaration order.
pub(crate) struct DeviceObjects<P: RhiPlatform> {
	pub queues: RwLock<Arena<kind::Queue, QueueSlot<P>>>,
	pub memory: RwLock<Arena<kind::MemoryBlock, MemorySlot<P>>>,
	pub resources: RwLock<Arena<kind::Resource, ResourceSlot<P>>>,
	pub views: RwLock<Arena<kind::ResourceView, ViewSlot<P>>>,
	pub samplers: RwLock<Arena<kind::Sampler, SamplerSlot<P>>>,
	pub set_layouts: RwLock<Arena<kind::BindingSetLayout, BindingLayoutSlot<P>>>,
	pub heap_layouts: RwLock<Arena<kind::BindingHeapLayout, BindingLayoutSlot<P>>>,
	pub heaps: RwLock<Arena<kind::BindingHeap, BindingHeapSlot<P>>>,
	pub pipeline_layouts: RwLock<Arena<kind::PipelineLayout, PipelineLayoutSlot<P>>>,
	pub pipelines: RwLock<Arena<kind::Pipeline, PipelineSlot<P>>>,
	pub fences: RwLock<Arena<kind::Fence, FenceSlot<P>>>,
	pub semaphores: RwLock<Arena<kind::Semaphore, SemaphoreSlot<P>>>,
	pub command_pools: RwLock<Arena<kind::CommandPool, CommandPoolSlot<P>>>,
	pub command_buffers: RwLock<Arena<kind::CommandBuffer, CommandBufferSlot<P>>>,
	pub swapchains: RwLock<Arena<kind::Swapchain, SwapchainSlot<P>>>,
}

impl<P: RhiPlatform> Default for DeviceObjects<P> {
	fn default() -> Self {
		Self {
			queues: Default::default(),
			memory: Default::default(),
			resources: Default::default(),
			views: Default::default(),
			samplers: Default::default(),
			set_layouts: Default::default(),
			heap_layouts: Default::default(),
			heaps: Default::default(),
			pipeline_layouts: Default::default(),
			pipelines: Default::default(),
			fences: Default::default(),
			semaphores: Default::default(),
			command_pools: Default::default(),
			command_buffers: Default::default(),
			swapchains: Default::default(),
		}
	}
}

/// The root object for everything on a single adapter. All objects are referred to by [`Handle`]s and live until
/// explicitly destroyed or until the device is dropped.
///
/// Every method validates its handles and the state of the referenced objects before reaching the backend. Misuse
/// is reported as an error, except for destroying dead handles which is a contract violation that asserts in debug
/// builds.
pub struct Device<P: RhiPlatform> {
	pub(crate) objects: DeviceObjects<P>,
	pub(crate) platform: P,
	adapter: Adapter,
	// must be dropped after platform
	_factory: Arc<FactoryInner<P>>,
}

impl<P: RhiPlatform> Device<P> {
	pub(crate) fn new(platform: P, adapter: Adapter, factory: Arc<FactoryInner<P>>) -> Self {
		Self {
			objects: DeviceObjects::default(),
			platform,
			adapter,
			_factory: factory,
		}
	}

	pub fn adapter(&self) -> &Adapter {
		&self.adapter
	}

	pub fn limits(&self) -> &DeviceLimits {
		self.platform.limits()
	}

	/// Access the backend device, eg. to reach backend-specific settings.
	pub fn platform(&self) -> &P {
		&self.platform
	}

	/// Blocks until all queues are idle.
	pub fn device_wait_idle(&self) -> RhiResult<()> {
		profiling::function_scope!();
		unsafe { self.platform.device_wait_idle() }
	}
}

/// Removes `handle` from `arena` and resets it to [`Handle::INVALID`].
pub(crate) fn take_slot<K: HandleKind, T>(arena: &RwLock<Arena<K, T>>, handle: &mut Handle<K>) -> Option<T> {
	debug_assert!(handle.is_valid(), "destroying an invalid {} handle", K::NAME);
	let slot = arena.write().remove(*handle);
	debug_assert!(slot.is_some(), "{handle:?} was already destroyed");
	*handle = Handle::INVALID;
	slot
}

impl<P: RhiPlatform> Drop for Device<P> {
	fn drop(&mut self) {
		if let Err(e) = unsafe { self.platform.device_wait_idle() } {
			log::error!("device_wait_idle failed during device destruction: {e}");
		}

		let objects = &mut self.objects;
		let platform = &self.platform;
		let mut leaked = 0;
		unsafe {
			for (_, swapchain) in objects.swapchains.get_mut().drain() {
				for handle in swapchain.back_buffers {
					if let Some(slot) = objects.resources.get_mut().remove(handle) {
						platform.destroy_resource(slot.native);
					}
				}
				for handle in swapchain.semaphores {
					if let Some(slot) = objects.semaphores.get_mut().remove(handle) {
						platform.destroy_semaphore(slot.native);
					}
				}
				platform.destroy_swapchain(swapchain.native);
				leaked += 1;
			}
			for (_, cmd) in objects.command_buffers.get_mut().drain() {
				if let Some(pool) = objects.command_pools.get_mut().get(cmd.pool) {
					platform.destroy_command_buffer(&pool.native, cmd.inner.into_inner().native);
				}
			}
			for (_, pool) in objects.command_pools.get_mut().drain() {
				platform.destroy_command_pool(pool.native);
				leaked += 1;
			}
			for (_, pipeline) in objects.pipelines.get_mut().drain() {
				platform.destroy_pipeline(pipeline.native);
				leaked += 1;
			}
			for (_, layout) in objects.pipeline_layouts.get_mut().drain() {
				platform.destroy_pipeline_layout(layout.native);
				leaked += 1;
			}
			for (_, heap) in objects.heaps.get_mut().drain() {
				platform.destroy_binding_heap(heap.native);
				leaked += 1;
			}
			for (_, layout) in objects.heap_layouts.get_mut().drain() {
				platform.destroy_binding_layout(layout.native);
				leaked += 1;
			}
			for (_, layout) in objects.set_layouts.get_mut().drain() {
				platform.destroy_binding_layout(layout.native);
				leaked += 1;
			}
			for (_, sampler) in objects.samplers.get_mut().drain() {
				platform.destroy_sampler(sampler.native);
				leaked += 1;
			}
			for (_, view) in objects.views.get_mut().drain() {
				platform.destroy_view(view.native);
				leaked += 1;
			}
			for (_, resource) in objects.resources.get_mut().drain() {
				platform.destroy_resource(resource.native);
				leaked += 1;
			}
			for (_, memory) in objects.memory.get_mut().drain() {
				platform.free_memory(memory.native);
				leaked += 1;
			}
			for (_, semaphore) in objects.semaphores.get_mut().drain() {
				platform.destroy_semaphore(semaphore.native);
				leaked += 1;
			}
			for (_, fence) in objects.fences.get_mut().drain() {
				platform.destroy_fence(fence.native);
				leaked += 1;
			}
			for (_, queue) in objects.queues.get_mut().drain() {
				platform.destroy_fence(queue.timeline);
				platform.destroy_queue(queue.native);
			}
		}
		if leaked > 0 {
			log::warn!("{} device dropped with {leaked} objects still alive", P::NAME);
		} else {
			log::debug!("{} device dropped", P::NAME);
		}
	}
}
