//! Vulkan 1.3 backend built on [`ash`]: timeline semaphores as fences, descriptor sets allocated from per-heap pools,
//! dynamic rendering and [`gpu_allocator`] managed memory blocks.

mod binding;
mod convert;
mod init;
mod memory;
mod pipeline;
mod recording;
mod resource;
mod swapchain;
mod sync;

pub use binding::*;
pub use init::*;
pub use memory::*;
pub use resource::*;
pub use swapchain::*;

use crate::binding::BindingLayoutInfo;
use crate::device::DeviceLimits;
use crate::error::{RhiError, RhiResult};
use crate::factory::FactoryDesc;
use crate::memory::{AllocationInfo, MemoryDesc};
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PushConstantRange};
use crate::platform::{
	PlatformAdapter, PlatformBackBuffers, PlatformBindingWrite, PlatformCommand, PlatformSubmit, PlatformSwapchain,
	RhiPlatform,
};
use crate::queue::QueueType;
use crate::resource::ResourceDesc;
use crate::swapchain::SwapchainDesc;
use crate::view::{SamplerDesc, ViewDesc};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::vk::{DebugUtilsObjectNameInfoEXT, DeviceCreateInfo, DeviceQueueCreateInfo, Handle, PipelineCacheCreateInfo};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationError, AllocationSizes, AllocatorDebugSettings};
use parking_lot::{Mutex, MutexGuard};
use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Maximum number of hardware queues of the universal queue family handed out round-robin.
pub const MAX_QUEUES: u32 = 4;

impl From<ash::vk::Result> for RhiError {
	fn from(value: ash::vk::Result) -> Self {
		match value {
			ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY | ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
				RhiError::OutOfMemory(format!("{value}"))
			}
			ash::vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
			ash::vk::Result::ERROR_OUT_OF_DATE_KHR => RhiError::OutOfDate,
			ash::vk::Result::TIMEOUT | ash::vk::Result::NOT_READY => RhiError::NotReady,
			ash::vk::Result::ERROR_FEATURE_NOT_PRESENT
			| ash::vk::Result::ERROR_EXTENSION_NOT_PRESENT
			| ash::vk::Result::ERROR_LAYER_NOT_PRESENT
			| ash::vk::Result::ERROR_INCOMPATIBLE_DRIVER => RhiError::Unsupported(format!("{value}")),
			_ => RhiError::Backend {
				backend: Ash::NAME,
				message: format!("{value}"),
			},
		}
	}
}

impl From<AllocationError> for RhiError {
	fn from(value: AllocationError) -> Self {
		match value {
			AllocationError::OutOfMemory => RhiError::OutOfMemory(format!("{value}")),
			_ => RhiError::Backend {
				backend: Ash::NAME,
				message: format!("gpu-allocator: {value}"),
			},
		}
	}
}

#[derive(Default)]
#[non_exhaustive]
pub struct AshExtensions {
	pub debug_utils: Option<debug_utils::Device>,
	pub surface: Option<surface::Instance>,
	pub swapchain: Option<khr_swapchain::Device>,
}

#[derive(Clone)]
pub struct AshQueue {
	pub family: u32,
	pub ty: QueueType,
	queue: Arc<Mutex<ash::vk::Queue>>,
}

impl AshQueue {
	/// Vulkan requires external synchronization of queues, hold the lock while submitting or presenting.
	pub fn lock(&self) -> MutexGuard<'_, ash::vk::Queue> {
		self.queue.lock()
	}
}

pub struct Ash {
	pub entry: ash::Entry,
	pub instance: ash::Instance,
	pub physical_device: ash::vk::PhysicalDevice,
	pub device: ash::Device,
	pub queue_family_index: u32,
	pub extensions: AshExtensions,
	pub cache: ash::vk::PipelineCache,
	queues: Vec<Arc<Mutex<ash::vk::Queue>>>,
	next_queue: AtomicUsize,
	memory_allocator: ManuallyDrop<Mutex<Allocator>>,
	memory_type_bits: MemoryTypeBits,
	limits: DeviceLimits,
}

impl Ash {
	pub unsafe fn new(instance: &AshInstance, adapter: &AshAdapter) -> RhiResult<Self> {
		unsafe {
			let physical_device = adapter.physical_device;
			let want_swapchain = instance.surface.is_some() && adapter.supports_swapchain;
			if instance.surface.is_some() && !adapter.supports_swapchain {
				log::warn!("adapter does not support {:?}, presenting is unavailable", khr_swapchain::NAME);
			}
			let extensions = want_swapchain
				.then_some(khr_swapchain::NAME.as_ptr())
				.into_iter()
				.collect::<Vec<_>>();

			let queue_count = adapter.queue_count.clamp(1, MAX_QUEUES);
			let priorities = vec![1.; queue_count as usize];
			let device = instance.instance.create_device(
				physical_device,
				&DeviceCreateInfo::default()
					.enabled_features(&required_features())
					.enabled_extension_names(&extensions)
					.push_next(&mut required_features_vk11())
					.push_next(&mut required_features_vk12())
					.push_next(&mut required_features_vk13())
					.queue_create_infos(&[DeviceQueueCreateInfo::default()
						.queue_family_index(adapter.queue_family_index)
						.queue_priorities(&priorities)]),
				None,
			)?;

			let queues = (0..queue_count)
				.map(|i| Arc::new(Mutex::new(device.get_device_queue(adapter.queue_family_index, i))))
				.collect();

			let memory_allocator = match Allocator::new(&AllocatorCreateDesc {
				instance: instance.instance.clone(),
				device: device.clone(),
				physical_device,
				debug_settings: AllocatorDebugSettings::default(),
				buffer_device_address: false,
				allocation_sizes: AllocationSizes::default(),
			}) {
				Ok(allocator) => allocator,
				Err(e) => {
					device.destroy_device(None);
					return Err(e.into());
				}
			};

			let memory_type_bits = match MemoryTypeBits::query(&device) {
				Ok(bits) => bits,
				Err(e) => {
					drop(memory_allocator);
					device.destroy_device(None);
					return Err(e.into());
				}
			};

			let cache = match device.create_pipeline_cache(&PipelineCacheCreateInfo::default(), None) {
				Ok(cache) => cache,
				Err(e) => {
					drop(memory_allocator);
					device.destroy_device(None);
					return Err(e.into());
				}
			};

			let properties = instance.instance.get_physical_device_properties(physical_device);
			let limits = DeviceLimits {
				descriptor_stride: 1,
				constant_buffer_alignment: properties.limits.min_uniform_buffer_offset_alignment,
				storage_buffer_alignment: properties.limits.min_storage_buffer_offset_alignment,
				max_push_constant_size: properties.limits.max_push_constants_size,
				max_texture_dimension_2d: properties.limits.max_image_dimension2_d,
				max_color_attachments: properties.limits.max_color_attachments,
			};

			let extensions = AshExtensions {
				debug_utils: instance
					.debug_utils
					.is_some()
					.then(|| debug_utils::Device::new(&instance.instance, &device)),
				surface: instance.surface.clone(),
				swapchain: want_swapchain.then(|| khr_swapchain::Device::new(&instance.instance, &device)),
			};

			log::info!(
				"created Vulkan device with {queue_count} queues of family {}",
				adapter.queue_family_index
			);
			Ok(Self {
				entry: instance.entry.clone(),
				instance: instance.instance.clone(),
				physical_device,
				device,
				queue_family_index: adapter.queue_family_index,
				extensions,
				cache,
				queues,
				next_queue: AtomicUsize::new(0),
				memory_allocator: ManuallyDrop::new(Mutex::new(memory_allocator)),
				memory_type_bits,
				limits,
			})
		}
	}

	pub fn memory_allocator(&self) -> MutexGuard<'_, Allocator> {
		self.memory_allocator.lock()
	}

	pub unsafe fn set_debug_object_name(&self, handle: impl Handle, name: &str) -> RhiResult<()> {
		unsafe {
			if name.is_empty() {
				return Ok(());
			}
			if let Some(debug_marker) = self.extensions.debug_utils.as_ref() {
				let Ok(name) = CString::new(name) else {
					return Ok(());
				};
				debug_marker.set_debug_utils_object_name(
					&DebugUtilsObjectNameInfoEXT::default()
						.object_handle(handle)
						.object_name(&name),
				)?;
			}
			Ok(())
		}
	}
}

impl Drop for Ash {
	fn drop(&mut self) {
		unsafe {
			if let Err(e) = self.device.device_wait_idle() {
				log::error!("device_wait_idle failed while destroying the device: {e}");
			}
			self.device.destroy_pipeline_cache(self.cache, None);
			ManuallyDrop::drop(&mut self.memory_allocator);
			self.device.destroy_device(None);
		}
	}
}

unsafe impl RhiPlatform for Ash {
	const NAME: &'static str = "ash";

	type Instance = AshInstance;
	type Adapter = AshAdapter;
	type Queue = AshQueue;
	type Memory = AshMemory;
	type Resource = AshResource;
	type View = AshView;
	type Sampler = ash::vk::Sampler;
	type BindingLayout = AshBindingLayout;
	type BindingHeap = AshBindingHeap;
	type PipelineLayout = ash::vk::PipelineLayout;
	type Pipeline = ash::vk::Pipeline;
	type Fence = ash::vk::Semaphore;
	type Semaphore = ash::vk::Semaphore;
	type CommandPool = ash::vk::CommandPool;
	type CommandBuffer = ash::vk::CommandBuffer;
	type Swapchain = AshSwapchain;

	unsafe fn create_instance(desc: &FactoryDesc) -> RhiResult<Self::Instance> {
		unsafe { create_instance(desc) }
	}

	unsafe fn enumerate_adapters(instance: &Self::Instance) -> RhiResult<Vec<PlatformAdapter<Self>>> {
		unsafe { enumerate_adapters(instance) }
	}

	unsafe fn create_device(instance: &Self::Instance, adapter: &Self::Adapter, _desc: &FactoryDesc) -> RhiResult<Self> {
		unsafe { Ash::new(instance, adapter) }
	}

	fn limits(&self) -> &DeviceLimits {
		&self.limits
	}

	unsafe fn device_wait_idle(&self) -> RhiResult<()> {
		unsafe {
			// all queues must be externally synchronized
			let _guards = self.queues.iter().map(|q| q.lock()).collect::<Vec<_>>();
			Ok(self.device.device_wait_idle()?)
		}
	}

	unsafe fn create_queue(&self, ty: QueueType) -> RhiResult<Self::Queue> {
		let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % self.queues.len();
		Ok(AshQueue {
			family: self.queue_family_index,
			ty,
			queue: self.queues[index].clone(),
		})
	}

	unsafe fn destroy_queue(&self, _queue: Self::Queue) {}

	unsafe fn queue_submit(&self, queue: &Self::Queue, submit: &PlatformSubmit<'_, Self>) -> RhiResult<()> {
		unsafe { self.submit(queue, submit) }
	}

	unsafe fn queue_wait_idle(&self, queue: &Self::Queue) -> RhiResult<()> {
		unsafe { Ok(self.device.queue_wait_idle(*queue.lock())?) }
	}

	unsafe fn allocate_memory(&self, desc: &MemoryDesc) -> RhiResult<Self::Memory> {
		unsafe { self.allocate(desc) }
	}

	unsafe fn free_memory(&self, memory: Self::Memory) {
		unsafe { self.free(memory) }
	}

	unsafe fn map_memory(&self, memory: &Self::Memory, offset: u64, _size: u64) -> RhiResult<NonNull<u8>> {
		memory.mapped_ptr(offset)
	}

	unsafe fn unmap_memory(&self, _memory: &Self::Memory) {}

	unsafe fn create_resource(&self, desc: &ResourceDesc) -> RhiResult<Self::Resource> {
		unsafe { self.create_resource_native(desc) }
	}

	unsafe fn resource_allocation_info(&self, resource: &Self::Resource) -> AllocationInfo {
		unsafe { self.allocation_info(resource) }
	}

	unsafe fn bind_resource_memory(&self, resource: &Self::Resource, memory: &Self::Memory, offset: u64) -> RhiResult<()> {
		unsafe { self.bind(resource, memory, offset) }
	}

	unsafe fn destroy_resource(&self, resource: Self::Resource) {
		unsafe { self.destroy_resource_native(resource) }
	}

	unsafe fn create_view(&self, resource: &Self::Resource, desc: &ViewDesc) -> RhiResult<Self::View> {
		unsafe { self.create_view_native(resource, desc) }
	}

	unsafe fn destroy_view(&self, view: Self::View) {
		unsafe {
			if let AshView::Image { view, .. } = view {
				self.device.destroy_image_view(view, None);
			}
		}
	}

	unsafe fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<Self::Sampler> {
		unsafe { self.create_sampler_native(desc) }
	}

	unsafe fn destroy_sampler(&self, sampler: Self::Sampler) {
		unsafe { self.device.destroy_sampler(sampler, None) }
	}

	unsafe fn create_binding_layout(&self, info: &BindingLayoutInfo) -> RhiResult<Self::BindingLayout> {
		unsafe { self.create_binding_layout_native(info) }
	}

	unsafe fn destroy_binding_layout(&self, layout: Self::BindingLayout) {
		unsafe { self.device.destroy_descriptor_set_layout(layout.layout, None) }
	}

	unsafe fn create_binding_heap(
		&self,
		layout: &Self::BindingLayout,
		info: &BindingLayoutInfo,
		tables: u32,
		name: &str,
	) -> RhiResult<Self::BindingHeap> {
		unsafe { self.create_binding_heap_native(layout, info, tables, name) }
	}

	unsafe fn destroy_binding_heap(&self, heap: Self::BindingHeap) {
		unsafe { self.device.destroy_descriptor_pool(heap.pool, None) }
	}

	unsafe fn write_binding(&self, heap: &Self::BindingHeap, write: &PlatformBindingWrite<'_, Self>) -> RhiResult<()> {
		unsafe {
			self.write_binding_native(heap, write);
			Ok(())
		}
	}

	unsafe fn create_pipeline_layout(
		&self,
		layouts: &[&Self::BindingLayout],
		push_constant_ranges: &[PushConstantRange],
	) -> RhiResult<Self::PipelineLayout> {
		unsafe { self.create_pipeline_layout_native(layouts, push_constant_ranges) }
	}

	unsafe fn destroy_pipeline_layout(&self, layout: Self::PipelineLayout) {
		unsafe { self.device.destroy_pipeline_layout(layout, None) }
	}

	unsafe fn create_graphics_pipeline(
		&self,
		layout: &Self::PipelineLayout,
		desc: &GraphicsPipelineDesc,
	) -> RhiResult<Self::Pipeline> {
		unsafe { self.create_graphics_pipeline_native(*layout, desc) }
	}

	unsafe fn create_compute_pipeline(
		&self,
		layout: &Self::PipelineLayout,
		desc: &ComputePipelineDesc,
	) -> RhiResult<Self::Pipeline> {
		unsafe { self.create_compute_pipeline_native(*layout, desc) }
	}

	unsafe fn destroy_pipeline(&self, pipeline: Self::Pipeline) {
		unsafe { self.device.destroy_pipeline(pipeline, None) }
	}

	unsafe fn create_fence(&self, initial_value: u64) -> RhiResult<Self::Fence> {
		unsafe { Ok(sync::create_timeline_semaphore(&self.device, initial_value)?) }
	}

	unsafe fn destroy_fence(&self, fence: Self::Fence) {
		unsafe { self.device.destroy_semaphore(fence, None) }
	}

	unsafe fn fence_value(&self, fence: &Self::Fence) -> RhiResult<u64> {
		unsafe { Ok(self.device.get_semaphore_counter_value(*fence)?) }
	}

	unsafe fn signal_fence(&self, fence: &Self::Fence, value: u64) -> RhiResult<()> {
		unsafe { sync::signal_timeline_semaphore(&self.device, *fence, value) }
	}

	unsafe fn wait_fences(&self, fences: &[(&Self::Fence, u64)], wait_all: bool, timeout_ns: u64) -> RhiResult<()> {
		unsafe { sync::wait_timeline_semaphores(&self.device, fences, wait_all, timeout_ns) }
	}

	unsafe fn create_semaphore(&self) -> RhiResult<Self::Semaphore> {
		unsafe { Ok(sync::create_binary_semaphore(&self.device)?) }
	}

	unsafe fn destroy_semaphore(&self, semaphore: Self::Semaphore) {
		unsafe { self.device.destroy_semaphore(semaphore, None) }
	}

	unsafe fn create_command_pool(&self, queue: &Self::Queue) -> RhiResult<Self::CommandPool> {
		unsafe { self.create_command_pool_native(queue) }
	}

	unsafe fn reset_command_pool(&self, pool: &Self::CommandPool) -> RhiResult<()> {
		unsafe {
			Ok(self
				.device
				.reset_command_pool(*pool, ash::vk::CommandPoolResetFlags::empty())?)
		}
	}

	unsafe fn destroy_command_pool(&self, pool: Self::CommandPool) {
		unsafe { self.device.destroy_command_pool(pool, None) }
	}

	unsafe fn create_command_buffer(&self, pool: &Self::CommandPool) -> RhiResult<Self::CommandBuffer> {
		unsafe { self.create_command_buffer_native(*pool) }
	}

	unsafe fn destroy_command_buffer(&self, pool: &Self::CommandPool, cmd: Self::CommandBuffer) {
		unsafe { self.device.free_command_buffers(*pool, &[cmd]) }
	}

	unsafe fn begin_command_buffer(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()> {
		unsafe {
			Ok(self.device.begin_command_buffer(
				*cmd,
				&ash::vk::CommandBufferBeginInfo::default().flags(ash::vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
			)?)
		}
	}

	unsafe fn end_command_buffer(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()> {
		unsafe { Ok(self.device.end_command_buffer(*cmd)?) }
	}

	unsafe fn record(&self, cmd: &mut Self::CommandBuffer, command: PlatformCommand<'_, Self>) {
		unsafe { self.record_native(*cmd, command) }
	}

	unsafe fn create_swapchain(&self, queue: &Self::Queue, desc: &SwapchainDesc) -> RhiResult<PlatformSwapchain<Self>> {
		unsafe { self.create_swapchain_native(queue, desc) }
	}

	unsafe fn acquire_next_image(
		&self,
		swapchain: &Self::Swapchain,
		signal: &Self::Semaphore,
		timeout_ns: u64,
	) -> RhiResult<u32> {
		unsafe { self.acquire_next_image_native(swapchain, *signal, timeout_ns) }
	}

	unsafe fn resize_swapchain(
		&self,
		queue: &Self::Queue,
		swapchain: &mut Self::Swapchain,
		desc: &SwapchainDesc,
	) -> RhiResult<PlatformBackBuffers<Self>> {
		unsafe { self.resize_swapchain_native(queue, swapchain, desc) }
	}

	unsafe fn present(
		&self,
		queue: &Self::Queue,
		swapchain: &Self::Swapchain,
		back_buffer_index: u32,
		wait_semaphores: &[&Self::Semaphore],
	) -> RhiResult<()> {
		unsafe { self.present_native(queue, swapchain, back_buffer_index, wait_semaphores) }
	}

	unsafe fn destroy_swapchain(&self, swapchain: Self::Swapchain) {
		unsafe { self.destroy_swapchain_native(swapchain) }
	}
}
