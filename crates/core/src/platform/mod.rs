use crate::barrier::{BufferBarrier, MemoryBarrier, TextureBarrier};
use crate::binding::{BindingLayoutInfo, ShaderStages};
use crate::command::{
	BufferCopyRegion, BufferTextureCopyRegion, ColorAttachment, DepthAttachment, DrawArgs, DrawIndexedArgs,
	IndexType, Rect, TextureCopyRegion, Viewport,
};
use crate::device::DeviceLimits;
use crate::error::RhiResult;
use crate::factory::{AdapterInfo, FactoryDesc};
use crate::format::Format;
use crate::memory::{AllocationInfo, MemoryDesc};
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PipelineBindPoint, PushConstantRange};
use crate::queue::QueueType;
use crate::resource::ResourceDesc;
use crate::swapchain::SwapchainDesc;
use crate::view::{SamplerDesc, ViewDesc};
use std::ptr::NonNull;

pub mod ash;
pub mod soft;

/// Backend interface every platform implements. A [`Device`] validates all arguments and object states before calling
/// into the platform, so implementations may assume every argument is valid and every object is alive.
///
/// Objects are handed out by value on creation and handed back by value on destruction. The [`Device`] guarantees that
/// no object is destroyed while a reference to it is used by another call.
///
/// Queues, fences, semaphores and swapchains are cloned out of the device's object tables before blocking calls, so
/// their clones must refer to the same backend object.
///
/// [`Device`]: crate::device::Device
pub unsafe trait RhiPlatform: Sized + Send + Sync + 'static {
	const NAME: &'static str;

	type Instance: 'static + Send + Sync;
	type Adapter: 'static + Send + Sync;
	type Queue: 'static + Send + Sync + Clone;
	type Memory: 'static + Send + Sync;
	type Resource: 'static + Send + Sync;
	type View: 'static + Send + Sync;
	type Sampler: 'static + Send + Sync;
	type BindingLayout: 'static + Send + Sync;
	type BindingHeap: 'static + Send + Sync;
	type PipelineLayout: 'static + Send + Sync;
	type Pipeline: 'static + Send + Sync;
	type Fence: 'static + Send + Sync + Clone;
	type Semaphore: 'static + Send + Sync + Clone;
	type CommandPool: 'static + Send + Sync;
	type CommandBuffer: 'static + Send + Sync;
	type Swapchain: 'static + Send + Sync + Clone;

	unsafe fn create_instance(desc: &FactoryDesc) -> RhiResult<Self::Instance>;

	unsafe fn enumerate_adapters(instance: &Self::Instance) -> RhiResult<Vec<PlatformAdapter<Self>>>;

	/// Creates the device, which is `Self`. The instance is guaranteed to outlive the returned device.
	unsafe fn create_device(instance: &Self::Instance, adapter: &Self::Adapter, desc: &FactoryDesc) -> RhiResult<Self>;

	fn limits(&self) -> &DeviceLimits;

	unsafe fn device_wait_idle(&self) -> RhiResult<()>;

	// queue
	unsafe fn create_queue(&self, ty: QueueType) -> RhiResult<Self::Queue>;

	unsafe fn destroy_queue(&self, queue: Self::Queue);

	/// Submits the command buffers in order. Waits happen before and signals after the submitted work.
	unsafe fn queue_submit(&self, queue: &Self::Queue, submit: &PlatformSubmit<'_, Self>) -> RhiResult<()>;

	unsafe fn queue_wait_idle(&self, queue: &Self::Queue) -> RhiResult<()>;

	// memory
	unsafe fn allocate_memory(&self, desc: &MemoryDesc) -> RhiResult<Self::Memory>;

	unsafe fn free_memory(&self, memory: Self::Memory);

	/// Returns a host pointer to `offset` within host-visible `memory`.
	unsafe fn map_memory(&self, memory: &Self::Memory, offset: u64, size: u64) -> RhiResult<NonNull<u8>>;

	unsafe fn unmap_memory(&self, memory: &Self::Memory);

	// resources
	unsafe fn create_resource(&self, desc: &ResourceDesc) -> RhiResult<Self::Resource>;

	unsafe fn resource_allocation_info(&self, resource: &Self::Resource) -> AllocationInfo;

	unsafe fn bind_resource_memory(&self, resource: &Self::Resource, memory: &Self::Memory, offset: u64) -> RhiResult<()>;

	unsafe fn destroy_resource(&self, resource: Self::Resource);

	/// `desc` has been resolved: its format is never unknown and its ranges are never open-ended.
	unsafe fn create_view(&self, resource: &Self::Resource, desc: &ViewDesc) -> RhiResult<Self::View>;

	unsafe fn destroy_view(&self, view: Self::View);

	unsafe fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<Self::Sampler>;

	unsafe fn destroy_sampler(&self, sampler: Self::Sampler);

	// binding
	unsafe fn create_binding_layout(&self, info: &BindingLayoutInfo) -> RhiResult<Self::BindingLayout>;

	unsafe fn destroy_binding_layout(&self, layout: Self::BindingLayout);

	/// Creates a heap with room for `tables` consecutive instances of `layout`.
	unsafe fn create_binding_heap(
		&self,
		layout: &Self::BindingLayout,
		info: &BindingLayoutInfo,
		tables: u32,
		name: &str,
	) -> RhiResult<Self::BindingHeap>;

	unsafe fn destroy_binding_heap(&self, heap: Self::BindingHeap);

	/// Writes a single descriptor into `element` of range `range` of table `table`.
	unsafe fn write_binding(&self, heap: &Self::BindingHeap, write: &PlatformBindingWrite<'_, Self>) -> RhiResult<()>;

	// pipelines
	unsafe fn create_pipeline_layout(
		&self,
		layouts: &[&Self::BindingLayout],
		push_constant_ranges: &[PushConstantRange],
	) -> RhiResult<Self::PipelineLayout>;

	unsafe fn destroy_pipeline_layout(&self, layout: Self::PipelineLayout);

	unsafe fn create_graphics_pipeline(
		&self,
		layout: &Self::PipelineLayout,
		desc: &GraphicsPipelineDesc,
	) -> RhiResult<Self::Pipeline>;

	unsafe fn create_compute_pipeline(
		&self,
		layout: &Self::PipelineLayout,
		desc: &ComputePipelineDesc,
	) -> RhiResult<Self::Pipeline>;

	unsafe fn destroy_pipeline(&self, pipeline: Self::Pipeline);

	// sync
	unsafe fn create_fence(&self, initial_value: u64) -> RhiResult<Self::Fence>;

	unsafe fn destroy_fence(&self, fence: Self::Fence);

	unsafe fn fence_value(&self, fence: &Self::Fence) -> RhiResult<u64>;

	unsafe fn signal_fence(&self, fence: &Self::Fence, value: u64) -> RhiResult<()>;

	/// Waits for all or any fence to reach its value. Returns [`RhiError::NotReady`] on timeout.
	///
	/// [`RhiError::NotReady`]: crate::error::RhiError::NotReady
	unsafe fn wait_fences(&self, fences: &[(&Self::Fence, u64)], wait_all: bool, timeout_ns: u64) -> RhiResult<()>;

	unsafe fn create_semaphore(&self) -> RhiResult<Self::Semaphore>;

	unsafe fn destroy_semaphore(&self, semaphore: Self::Semaphore);

	// commands
	unsafe fn create_command_pool(&self, queue: &Self::Queue) -> RhiResult<Self::CommandPool>;

	/// Returns the backing storage of all command buffers of this pool. No buffer of the pool may be in use by the GPU.
	unsafe fn reset_command_pool(&self, pool: &Self::CommandPool) -> RhiResult<()>;

	unsafe fn destroy_command_pool(&self, pool: Self::CommandPool);

	unsafe fn create_command_buffer(&self, pool: &Self::CommandPool) -> RhiResult<Self::CommandBuffer>;

	unsafe fn destroy_command_buffer(&self, pool: &Self::CommandPool, cmd: Self::CommandBuffer);

	unsafe fn begin_command_buffer(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()>;

	unsafe fn end_command_buffer(&self, cmd: &mut Self::CommandBuffer) -> RhiResult<()>;

	unsafe fn record(&self, cmd: &mut Self::CommandBuffer, command: PlatformCommand<'_, Self>);

	// swapchain
	/// Creates a swapchain whose back buffers have all been transitioned to the present layout.
	unsafe fn create_swapchain(&self, queue: &Self::Queue, desc: &SwapchainDesc) -> RhiResult<PlatformSwapchain<Self>>;

	/// Acquires the next back buffer, signaling `signal` once it's available for rendering.
	unsafe fn acquire_next_image(
		&self,
		swapchain: &Self::Swapchain,
		signal: &Self::Semaphore,
		timeout_ns: u64,
	) -> RhiResult<u32>;

	/// Recreates the swapchain in place for `desc`. The old back buffers have already been handed back via
	/// [`Self::destroy_resource`] and the queue is idle. On failure `swapchain` must still be destroyable.
	unsafe fn resize_swapchain(
		&self,
		queue: &Self::Queue,
		swapchain: &mut Self::Swapchain,
		desc: &SwapchainDesc,
	) -> RhiResult<PlatformBackBuffers<Self>>;

	unsafe fn present(
		&self,
		queue: &Self::Queue,
		swapchain: &Self::Swapchain,
		back_buffer_index: u32,
		wait_semaphores: &[&Self::Semaphore],
	) -> RhiResult<()>;

	/// Back buffer resources have already been handed back via [`Self::destroy_resource`].
	unsafe fn destroy_swapchain(&self, swapchain: Self::Swapchain);
}

pub struct PlatformAdapter<P: RhiPlatform> {
	pub info: AdapterInfo,
	pub native: P::Adapter,
}

pub struct PlatformSubmit<'a, P: RhiPlatform> {
	pub command_buffers: &'a [&'a P::CommandBuffer],
	pub wait_semaphores: &'a [&'a P::Semaphore],
	pub wait_fences: &'a [(&'a P::Fence, u64)],
	pub signal_semaphores: &'a [&'a P::Semaphore],
	pub signal_fences: &'a [(&'a P::Fence, u64)],
}

pub struct PlatformBindingWrite<'a, P: RhiPlatform> {
	pub layout: &'a BindingLayoutInfo,
	pub table: u32,
	pub range: usize,
	pub element: u32,
	pub descriptor: PlatformDescriptor<'a, P>,
}

pub enum PlatformDescriptor<'a, P: RhiPlatform> {
	View {
		view: &'a P::View,
		resource: &'a P::Resource,
		desc: &'a ViewDesc,
	},
	Sampler(&'a P::Sampler),
}

pub enum PlatformBarrier<'a, P: RhiPlatform> {
	Memory(MemoryBarrier),
	Buffer(&'a P::Resource, BufferBarrier),
	/// The subresource range has been resolved.
	Texture(&'a P::Resource, TextureBarrier),
}

pub struct PlatformColorAttachment<'a, P: RhiPlatform> {
	pub view: &'a P::View,
	pub resource: &'a P::Resource,
	pub attachment: ColorAttachment,
}

pub struct PlatformDepthAttachment<'a, P: RhiPlatform> {
	pub view: &'a P::View,
	pub resource: &'a P::Resource,
	pub attachment: DepthAttachment,
}

/// A single recorded command with all handles resolved to platform objects.
pub enum PlatformCommand<'a, P: RhiPlatform> {
	BindPipeline {
		pipeline: &'a P::Pipeline,
		layout: &'a P::PipelineLayout,
		bind_point: PipelineBindPoint,
	},
	BindHeaps {
		layout: &'a P::PipelineLayout,
		bind_point: PipelineBindPoint,
		heaps: &'a [(&'a P::BindingHeap, u32)],
	},
	PushConstants {
		layout: &'a P::PipelineLayout,
		stages: ShaderStages,
		offset: u32,
		data: &'a [u8],
	},
	SetViewports(&'a [Viewport]),
	SetScissors(&'a [Rect]),
	BindVertexBuffers {
		first_slot: u32,
		buffers: &'a [(&'a P::Resource, u64)],
	},
	BindIndexBuffer {
		buffer: &'a P::Resource,
		offset: u64,
		index_type: IndexType,
	},
	Draw(DrawArgs),
	DrawIndexed(DrawIndexedArgs),
	Dispatch([u32; 3]),
	CopyBuffer {
		src: &'a P::Resource,
		dst: &'a P::Resource,
		region: BufferCopyRegion,
	},
	CopyBufferToTexture {
		src: &'a P::Resource,
		dst: &'a P::Resource,
		region: BufferTextureCopyRegion,
	},
	CopyTextureToBuffer {
		src: &'a P::Resource,
		dst: &'a P::Resource,
		region: BufferTextureCopyRegion,
	},
	CopyTexture {
		src: &'a P::Resource,
		dst: &'a P::Resource,
		region: TextureCopyRegion,
	},
	Barriers(&'a [PlatformBarrier<'a, P>]),
	BeginRendering {
		render_area: Rect,
		color_attachments: &'a [PlatformColorAttachment<'a, P>],
		depth_attachment: Option<PlatformDepthAttachment<'a, P>>,
	},
	EndRendering,
}

pub struct PlatformSwapchain<P: RhiPlatform> {
	pub swapchain: P::Swapchain,
	pub back_buffers: PlatformBackBuffers<P>,
}

/// Back buffers in the present layout.
pub struct PlatformBackBuffers<P: RhiPlatform> {
	pub resources: Vec<P::Resource>,
	pub format: Format,
	pub extent: [u32; 2],
}
