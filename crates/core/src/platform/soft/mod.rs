//! A CPU emulation of a GPU with the D3D12 programming model: descriptor heaps addressed by byte offsets, native
//! 64-bit fences and explicitly transitioned back buffers. Copies, clears and layout transitions execute on host
//! memory, shaders are never run. Misuse only detectable during execution is reported to a validation layer.

mod binding;
mod command;
mod gpu;
mod memory;
mod swapchain;
mod texel;
mod validation;

pub use binding::*;
pub use command::{SoftCommand, SoftCommandBuffer};
pub use gpu::{ExecutionMode, SoftFence, SoftGpu, SoftSemaphore};
pub use memory::*;
pub use swapchain::*;
pub use validation::Validation;

use crate::binding::BindingLayoutInfo;
use crate::device::DeviceLimits;
use crate::error::{RhiError, RhiResult};
use crate::factory::{AdapterInfo, AdapterKind, FactoryDesc, FactoryFlags};
use crate::memory::{AllocationInfo, MemoryDesc};
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PipelineBindPoint, PushConstantRange};
use crate::platform::soft::gpu::{new_fence, Operation, Presentation, Submission};
use crate::platform::{
	PlatformAdapter, PlatformBackBuffers, PlatformBindingWrite, PlatformCommand, PlatformDescriptor, PlatformSubmit,
	PlatformSwapchain, RhiPlatform,
};
use crate::queue::QueueType;
use crate::resource::ResourceDesc;
use crate::swapchain::SwapchainDesc;
use crate::view::{SamplerDesc, ViewDesc};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Host memory the emulated adapter reports as video memory and allows allocating.
pub const SOFT_MEMORY_BUDGET: u64 = 1 << 30;

pub struct SoftInstance {
	pub flags: FactoryFlags,
}

pub struct SoftAdapter;

#[derive(Clone)]
pub struct SoftQueue {
	id: usize,
	pub ty: QueueType,
}

pub struct SoftCommandPool {
	pub queue: QueueType,
}

pub struct Soft {
	limits: DeviceLimits,
	gpu: SoftGpu,
	allocated: AtomicU64,
}

impl Soft {
	pub fn new(validation: bool) -> Self {
		Self {
			limits: DeviceLimits {
				descriptor_stride: DESCRIPTOR_SIZE,
				constant_buffer_alignment: 256,
				storage_buffer_alignment: 16,
				max_push_constant_size: 128,
				max_texture_dimension_2d: 16384,
				max_color_attachments: 8,
			},
			gpu: SoftGpu::new(Validation::new(validation)),
			allocated: AtomicU64::new(0),
		}
	}

	pub fn execution_mode(&self) -> ExecutionMode {
		self.gpu.mode()
	}

	/// Switching to [`ExecutionMode::Immediate`] executes all pending work that is ready.
	pub fn set_execution_mode(&self, mode: ExecutionMode) {
		log::debug!("soft execution mode set to {mode:?}");
		self.gpu.set_mode(mode);
	}

	/// Executes all submitted work whose waits are satisfied.
	pub fn flush(&self) {
		self.gpu.flush();
	}

	pub fn validation(&self) -> &Validation {
		&self.gpu.validation
	}

	/// Drains all validation messages reported so far.
	pub fn take_validation_messages(&self) -> Vec<String> {
		self.gpu.validation.take_messages()
	}

	pub fn allocated_memory(&self) -> u64 {
		self.allocated.load(Ordering::Relaxed)
	}
}

unsafe impl RhiPlatform for Soft {
	const NAME: &'static str = "soft";

	type Instance = SoftInstance;
	type Adapter = SoftAdapter;
	type Queue = SoftQueue;
	type Memory = SoftMemory;
	type Resource = SoftResource;
	type View = SoftView;
	type Sampler = SoftSampler;
	type BindingLayout = SoftBindingLayout;
	type BindingHeap = SoftBindingHeap;
	type PipelineLayout = SoftPipelineLayout;
	type Pipeline = SoftPipeline;
	type Fence = SoftFence;
	type Semaphore = SoftSemaphore;
	type CommandPool = SoftCommandPool;
	type CommandBuffer = SoftCommandBuffer;
	type Swapchain = SoftSwapchain;

	unsafe fn create_instance(desc: &FactoryDesc) -> RhiResult<Self::Instance> {
		Ok(SoftInstance { flags: desc.flags })
	}

	unsafe fn enumerate_adapters(_instance: &Self::Instance) -> RhiResult<Vec<PlatformAdapter<Self>>> {
		Ok(vec![PlatformAdapter {
			info: AdapterInfo {
				name: "Soft Emulated Adapter".to_string(),
				vendor_id: 0,
				device_id: 0,
				kind: AdapterKind::Cpu,
				dedicated_video_memory: SOFT_MEMORY_BUDGET,
			},
			native: SoftAdapter,
		}])
	}

	unsafe fn create_device(instance: &Self::Instance, _adapter: &Self::Adapter, _desc: &FactoryDesc) -> RhiResult<Self> {
		Ok(Soft::new(instance.flags.validation_enabled()))
	}

	fn limits(&self) -> &DeviceLimits {
		&self.limits
	}

	unsafe fn device_wait_idle(&self) -> RhiResult<()> {
		self.gpu.wait_idle(None)
	}

	unsafe fn create_queue(&self, ty: QueueType) -> RhiResult<Self::Queue> {
		Ok(SoftQueue {
			id: self.gpu.create_queue(),
			ty,
		})
	}

	unsafe fn destroy_queue(&self, queue: Self::Queue) {
		self.gpu.destroy_queue(queue.id);
	}

	unsafe fn queue_submit(&self, queue: &Self::Queue, submit: &PlatformSubmit<'_, Self>) -> RhiResult<()> {
		let owned = |list: &[&SoftSemaphore]| list.iter().map(|s| (*s).clone()).collect();
		let fences = |list: &[(&SoftFence, u64)]| list.iter().map(|(f, v)| ((*f).clone(), *v)).collect();
		self.gpu.enqueue(
			queue.id,
			Operation::Submit(Submission {
				command_buffers: submit.command_buffers.iter().map(|c| c.recorded.clone()).collect(),
				wait_semaphores: owned(submit.wait_semaphores),
				wait_fences: fences(submit.wait_fences),
				signal_semaphores: owned(submit.signal_semaphores),
				signal_fences: fences(submit.signal_fences),
			}),
		);
		Ok(())
	}

	unsafe fn queue_wait_idle(&self, queue: &Self::Queue) -> RhiResult<()> {
		self.gpu.wait_idle(Some(queue.id))
	}

	unsafe fn allocate_memory(&self, desc: &MemoryDesc) -> RhiResult<Self::Memory> {
		let previous = self
			.allocated
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |allocated| {
				allocated
					.checked_add(desc.size)
					.filter(|total| *total <= SOFT_MEMORY_BUDGET)
			})
			.map_err(|allocated| {
				RhiError::OutOfMemory(format!(
					"allocating {} bytes for {:?} with {allocated} of {SOFT_MEMORY_BUDGET} bytes in use",
					desc.size, desc.name
				))
			})?;
		match HostHeap::new(desc.size, desc.effective_alignment(), desc.heap_type) {
			Ok(heap) => Ok(SoftMemory(Arc::new(heap))),
			Err(e) => {
				self.allocated.store(previous, Ordering::Release);
				Err(e)
			}
		}
	}

	unsafe fn free_memory(&self, memory: Self::Memory) {
		self.allocated.fetch_sub(memory.size(), Ordering::AcqRel);
	}

	unsafe fn map_memory(&self, memory: &Self::Memory, offset: u64, _size: u64) -> RhiResult<NonNull<u8>> {
		Ok(unsafe { memory.ptr(offset) })
	}

	unsafe fn unmap_memory(&self, _memory: &Self::Memory) {}

	unsafe fn create_resource(&self, desc: &ResourceDesc) -> RhiResult<Self::Resource> {
		Ok(SoftResource::new(desc))
	}

	unsafe fn resource_allocation_info(&self, resource: &Self::Resource) -> AllocationInfo {
		resource.info
	}

	unsafe fn bind_resource_memory(&self, resource: &Self::Resource, memory: &Self::Memory, offset: u64) -> RhiResult<()> {
		resource.bind(memory.clone(), offset);
		Ok(())
	}

	unsafe fn destroy_resource(&self, _resource: Self::Resource) {}

	unsafe fn create_view(&self, resource: &Self::Resource, desc: &ViewDesc) -> RhiResult<Self::View> {
		Ok(SoftView(Arc::new(SoftViewData {
			resource: resource.clone(),
			desc: *desc,
		})))
	}

	unsafe fn destroy_view(&self, _view: Self::View) {}

	unsafe fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<Self::Sampler> {
		Ok(SoftSampler(Arc::new(*desc)))
	}

	unsafe fn destroy_sampler(&self, _sampler: Self::Sampler) {}

	unsafe fn create_binding_layout(&self, info: &BindingLayoutInfo) -> RhiResult<Self::BindingLayout> {
		Ok(SoftBindingLayout(Arc::new(info.clone())))
	}

	unsafe fn destroy_binding_layout(&self, _layout: Self::BindingLayout) {}

	unsafe fn create_binding_heap(
		&self,
		layout: &Self::BindingLayout,
		_info: &BindingLayoutInfo,
		tables: u32,
		name: &str,
	) -> RhiResult<Self::BindingHeap> {
		let heap = SoftBindingHeap::new(layout, tables, name);
		log::trace!("soft binding heap {name:?} of {} bytes", heap.size_in_bytes());
		Ok(heap)
	}

	unsafe fn destroy_binding_heap(&self, _heap: Self::BindingHeap) {}

	unsafe fn write_binding(&self, heap: &Self::BindingHeap, write: &PlatformBindingWrite<'_, Self>) -> RhiResult<()> {
		let descriptor = match &write.descriptor {
			PlatformDescriptor::View { view, .. } => SoftDescriptor::View((*view).clone()),
			PlatformDescriptor::Sampler(sampler) => SoftDescriptor::Sampler((*sampler).clone()),
		};
		heap.write(write.table, write.range, write.element, descriptor);
		Ok(())
	}

	unsafe fn create_pipeline_layout(
		&self,
		layouts: &[&Self::BindingLayout],
		push_constant_ranges: &[PushConstantRange],
	) -> RhiResult<Self::PipelineLayout> {
		Ok(SoftPipelineLayout::new(layouts, push_constant_ranges))
	}

	unsafe fn destroy_pipeline_layout(&self, _layout: Self::PipelineLayout) {}

	unsafe fn create_graphics_pipeline(
		&self,
		layout: &Self::PipelineLayout,
		desc: &GraphicsPipelineDesc,
	) -> RhiResult<Self::Pipeline> {
		Ok(SoftPipeline(Arc::new(SoftPipelineData {
			bind_point: PipelineBindPoint::Graphics,
			layout: layout.clone(),
			name: desc.name.to_string(),
		})))
	}

	unsafe fn create_compute_pipeline(
		&self,
		layout: &Self::PipelineLayout,
		desc: &ComputePipelineDesc,
	) -> RhiResult<Self::Pipeline> {
		Ok(SoftPipeline(Arc::new(SoftPipelineData {
			bind_point: PipelineBindPoint::Compute,
			layout: layout.clone(),
			name: desc.name.to_string(),
		})))
	}

	unsafe fn destroy_pipeline(&self, _pipeline: Self::Pipeline) {}

	unsafe fn create_fence(&self, initial_value: u64) -> RhiResult<Self::Fence> {
		Ok(new_fence(initial_value))
	}

	unsafe fn destroy_fence(&self, _fence: Self::Fence) {}

	unsafe fn fence_value(&self, fence: &Self::Fence) -> RhiResult<u64> {
		Ok(fence.value())
	}

	unsafe fn signal_fence(&self, fence: &Self::Fence, value: u64) -> RhiResult<()> {
		self.gpu.signal_fence(fence, value);
		Ok(())
	}

	unsafe fn wait_fences(&self, fences: &[(&Self::Fence, u64)], wait_all: bool, timeout_ns: u64) -> RhiResult<()> {
		self.gpu.wait_fences(fences, wait_all, timeout_ns)
	}

	unsafe fn create_semaphore(&self) -> RhiResult<Self::Semaphore> {
		Ok(SoftSemaphore::default())
	}

	unsafe fn destroy_semaphore(&self, _semaphore: Self::Semaphore) {}

	unsafe fn create_command_pool(&self, queue: &Self::Queue) -> RhiResult<Self::CommandPool> {
		Ok(SoftCommandPool { queue: queue.ty })
	}

	unsafe fn reset_command_pool(&self, _pool: &Self::CommandPool) -> RhiResult<()> {
		Ok(())
	}

	unsafe fn destroy_command_pool(&self, _pool: Self::CommandPool) {}

	unsafe fn create_command_buffer(&self, _pool: &Self::CommandPool) -> RhiResult<Self::CommandBuffer> {
		Ok(SoftCommandBuffer::new())
	}

	unsafe fn destroy_command_buffer(&self, _pool: &Self::CommandPool, _cmd: Self::CommandBuffer) {}

	unsafe fn begin_command_buffer(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()> {
		cmd.begin();
		Ok(())
	}

	unsafe fn end_command_buffer(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()> {
		cmd.end();
		Ok(())
	}

	unsafe fn record(&self, cmd: &mut Self::CommandBuffer, command: PlatformCommand<'_, Self>) {
		if let Some(command) = SoftCommand::record(command) {
			cmd.push(command);
		}
	}

	unsafe fn create_swapchain(&self, _queue: &Self::Queue, desc: &SwapchainDesc) -> RhiResult<PlatformSwapchain<Self>> {
		let swapchain = SoftSwapchain::new(desc)?;
		Ok(PlatformSwapchain {
			back_buffers: swapchain.back_buffers(),
			swapchain,
		})
	}

	unsafe fn resize_swapchain(
		&self,
		_queue: &Self::Queue,
		swapchain: &mut Self::Swapchain,
		desc: &SwapchainDesc,
	) -> RhiResult<PlatformBackBuffers<Self>> {
		*swapchain = SoftSwapchain::new(desc)?;
		Ok(swapchain.back_buffers())
	}

	unsafe fn acquire_next_image(
		&self,
		swapchain: &Self::Swapchain,
		signal: &Self::Semaphore,
		timeout_ns: u64,
	) -> RhiResult<u32> {
		let index = self.gpu.acquire(&swapchain.0, timeout_ns)?;
		signal.signal();
		Ok(index)
	}

	unsafe fn present(
		&self,
		queue: &Self::Queue,
		swapchain: &Self::Swapchain,
		back_buffer_index: u32,
		wait_semaphores: &[&Self::Semaphore],
	) -> RhiResult<()> {
		self.gpu.enqueue(
			queue.id,
			Operation::Present(Presentation {
				swapchain: swapchain.0.clone(),
				back_buffer_index,
				wait_semaphores: wait_semaphores.iter().map(|s| (*s).clone()).collect(),
			}),
		);
		Ok(())
	}

	unsafe fn destroy_swapchain(&self, _swapchain: Self::Swapchain) {}
}
