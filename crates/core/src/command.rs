use crate::backing::handle::{
	BindingHeapHandle, CommandBufferHandle, CommandPoolHandle, PipelineHandle, PipelineLayoutHandle, QueueHandle,
	ResourceHandle, ViewHandle,
};
use crate::barrier::Barrier;
use crate::binding::{BindingLayoutRef, ShaderStages};
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::pipeline::{PipelineBindPoint, PushConstantRange};
use crate::platform::{
	PlatformBarrier, PlatformColorAttachment, PlatformCommand, PlatformDepthAttachment, RhiPlatform,
};
use crate::resource::{ResourceSlot, ResourceUsage};
use crate::view::ViewType;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum CommandBufferState {
	#[default]
	Initial,
	Recording,
	Executable,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
	pub x: f32,
	pub y: f32,
	pub width: f32,
	pub height: f32,
	pub min_depth: f32,
	pub max_depth: f32,
}

impl Viewport {
	pub fn from_extent(width: u32, height: u32) -> Self {
		Self {
			x: 0.,
			y: 0.,
			width: width as f32,
			height: height as f32,
			min_depth: 0.,
			max_depth: 1.,
		}
	}
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Rect {
	pub x: i32,
	pub y: i32,
	pub width: u32,
	pub height: u32,
}

impl Rect {
	pub fn from_extent(width: u32, height: u32) -> Self {
		Self {
			x: 0,
			y: 0,
			width,
			height,
		}
	}
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum IndexType {
	U16,
	#[default]
	U32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexBufferView {
	pub resource: ResourceHandle,
	pub offset: u64,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct DrawArgs {
	pub vertex_count: u32,
	pub instance_count: u32,
	pub first_vertex: u32,
	pub first_instance: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct DrawIndexedArgs {
	pub index_count: u32,
	pub instance_count: u32,
	pub first_index: u32,
	pub vertex_offset: i32,
	pub first_instance: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct BufferCopyRegion {
	pub src_offset: u64,
	pub dst_offset: u64,
	pub size: u64,
}

/// Copies a whole subresource between a texture and tightly packed texels in a buffer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct BufferTextureCopyRegion {
	pub buffer_offset: u64,
	pub mip_level: u32,
	pub array_layer: u32,
}

/// Copies a whole subresource between two textures of identical extent.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TextureCopyRegion {
	pub src_mip_level: u32,
	pub src_array_layer: u32,
	pub dst_mip_level: u32,
	pub dst_array_layer: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum LoadOp {
	#[default]
	Load,
	Clear,
	DontCare,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum StoreOp {
	#[default]
	Store,
	DontCare,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ColorAttachment {
	pub view: ViewHandle,
	pub load_op: LoadOp,
	pub store_op: StoreOp,
	pub clear_color: [f32; 4],
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DepthAttachment {
	pub view: ViewHandle,
	pub load_op: LoadOp,
	pub store_op: StoreOp,
	pub clear_depth: f32,
	pub clear_stencil: u32,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RenderingDesc<'a> {
	pub render_area: Rect,
	pub color_attachments: &'a [ColorAttachment],
	pub depth_attachment: Option<DepthAttachment>,
}

/// Binds table `table` of `heap`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BindingHeapBind {
	pub heap: BindingHeapHandle,
	pub table: u32,
}

pub(crate) struct CommandPoolSlot<P: RhiPlatform> {
	pub native: P::CommandPool,
	pub queue: QueueHandle,
	pub buffers: Mutex<Vec<CommandBufferHandle>>,
	/// Queue timeline value of the latest submission containing a buffer of this pool.
	pub last_submission: AtomicU64,
}

#[derive(Clone, Debug)]
struct BoundPipeline {
	bind_point: PipelineBindPoint,
	layout: PipelineLayoutHandle,
	layout_bindings: SmallVec<[BindingLayoutRef; 4]>,
	push_constant_ranges: SmallVec<[PushConstantRange; 2]>,
	vertex_buffer_count: u32,
	color_formats: SmallVec<[Format; 4]>,
	depth_format: Option<Format>,
}

/// State set by recorded commands that later commands are validated against.
#[derive(Clone, Debug, Default)]
struct RecordingState {
	rendering: Option<RenderingTargets>,
	pipeline: Option<BoundPipeline>,
	bound_heaps: u32,
	viewport_set: bool,
	scissor_set: bool,
	vertex_buffers: u64,
	index_buffer: bool,
}

#[derive(Clone, Debug)]
struct RenderingTargets {
	color_formats: SmallVec<[Format; 4]>,
	depth_format: Option<Format>,
}

pub(crate) struct CommandBufferInner<P: RhiPlatform> {
	pub native: P::CommandBuffer,
	pub state: CommandBufferState,
	tracking: RecordingState,
}

pub(crate) struct CommandBufferSlot<P: RhiPlatform> {
	pub pool: CommandPoolHandle,
	pub inner: Mutex<CommandBufferInner<P>>,
}

fn require_usage<P: RhiPlatform>(slot: &ResourceSlot<P>, usage: ResourceUsage, what: &str) -> RhiResult<()> {
	if slot.desc.usage.contains(usage) {
		Ok(())
	} else {
		Err(RhiError::invalid_argument(format!(
			"{what} requires {usage:?} usage, resource has {:?}",
			slot.desc.usage
		)))
	}
}

impl<P: RhiPlatform> CommandBufferInner<P> {
	fn outside_rendering(&self, what: &str) -> RhiResult<()> {
		if self.tracking.rendering.is_some() {
			Err(RhiError::invalid_state(format!("{what} is not allowed inside rendering")))
		} else {
			Ok(())
		}
	}

	fn pipeline(&self, bind_point: PipelineBindPoint, what: &str) -> RhiResult<&BoundPipeline> {
		match &self.tracking.pipeline {
			Some(pipeline) if pipeline.bind_point == bind_point => Ok(pipeline),
			_ => Err(RhiError::invalid_state(format!("{what} requires a {bind_point:?} pipeline"))),
		}
	}

	fn require_heaps(&self, pipeline: &BoundPipeline, what: &str) -> RhiResult<()> {
		let required = pipeline.layout_bindings.len() as u32;
		if self.tracking.bound_heaps < required {
			return Err(RhiError::invalid_state(format!(
				"{what} requires {required} binding heaps, {} are bound",
				self.tracking.bound_heaps
			)));
		}
		Ok(())
	}

	fn validate_draw(&self, indexed: bool) -> RhiResult<()> {
		let what = if indexed { "indexed draw" } else { "draw" };
		let targets = self
			.tracking
			.rendering
			.as_ref()
			.ok_or_else(|| RhiError::invalid_state(format!("{what} requires an active rendering")))?;
		let pipeline = self.pipeline(PipelineBindPoint::Graphics, what)?;
		self.require_heaps(pipeline, what)?;
		if !self.tracking.viewport_set || !self.tracking.scissor_set {
			return Err(RhiError::invalid_state(format!("{what} requires viewport and scissor")));
		}
		let required = if pipeline.vertex_buffer_count >= 64 {
			u64::MAX
		} else {
			(1u64 << pipeline.vertex_buffer_count) - 1
		};
		if self.tracking.vertex_buffers & required != required {
			return Err(RhiError::invalid_state(format!(
				"{what} requires {} vertex buffers to be bound",
				pipeline.vertex_buffer_count
			)));
		}
		if indexed && !self.tracking.index_buffer {
			return Err(RhiError::invalid_state(format!("{what} requires an index buffer")));
		}
		if targets.color_formats != pipeline.color_formats || targets.depth_format != pipeline.depth_format {
			return Err(RhiError::invalid_state(format!(
				"{what}: pipeline targets {:?} / {:?} do not match rendering targets {:?} / {:?}",
				pipeline.color_formats, pipeline.depth_format, targets.color_formats, targets.depth_format
			)));
		}
		Ok(())
	}
}

impl<P: RhiPlatform> Device<P> {
	/// Creates a command pool whose command buffers can be submitted to `queue`.
	pub fn create_command_pool(&self, queue: QueueHandle) -> RhiResult<CommandPoolHandle> {
		let native = {
			let queues = self.objects.queues.read();
			unsafe { self.platform.create_command_pool(&queues.try_get(queue)?.native)? }
		};
		Ok(self.objects.command_pools.write().insert(CommandPoolSlot {
			native,
			queue,
			buffers: Mutex::new(Vec::new()),
			last_submission: AtomicU64::new(0),
		}))
	}

	/// Destroys the pool and all command buffers allocated from it. The pool's work must have completed.
	pub fn destroy_command_pool(&self, pool: &mut CommandPoolHandle) {
		if let Some(slot) = take_slot(&self.objects.command_pools, pool) {
			let mut buffers = self.objects.command_buffers.write();
			for handle in slot.buffers.into_inner() {
				if let Some(cmd) = buffers.remove(handle) {
					unsafe {
						self.platform
							.destroy_command_buffer(&slot.native, cmd.inner.into_inner().native)
					};
				}
			}
			unsafe { self.platform.destroy_command_pool(slot.native) }
		}
	}

	/// Returns every command buffer of the pool to [`CommandBufferState::Initial`]. Fails with
	/// [`RhiError::NotReady`] while the GPU may still execute work recorded from this pool.
	pub fn reset_command_pool(&self, pool: CommandPoolHandle) -> RhiResult<()> {
		profiling::function_scope!();
		let queues = self.objects.queues.read();
		let pools = self.objects.command_pools.read();
		let buffers = self.objects.command_buffers.read();
		let pool_slot = pools.try_get(pool)?;
		let queue = queues.try_get(pool_slot.queue)?;
		if queue.completed(&self.platform)? < pool_slot.last_submission.load(Ordering::Acquire) {
			return Err(RhiError::NotReady);
		}

		let handles = pool_slot.buffers.lock();
		let mut guards = handles
			.iter()
			.filter_map(|h| buffers.get(*h))
			.map(|slot| slot.inner.lock())
			.collect::<SmallVec<[_; 8]>>();
		unsafe { self.platform.reset_command_pool(&pool_slot.native)? };
		for guard in &mut guards {
			guard.state = CommandBufferState::Initial;
			guard.tracking = RecordingState::default();
		}
		Ok(())
	}

	pub fn create_command_buffer(&self, pool: CommandPoolHandle) -> RhiResult<CommandBufferHandle> {
		let pools = self.objects.command_pools.read();
		let pool_slot = pools.try_get(pool)?;
		let native = unsafe { self.platform.create_command_buffer(&pool_slot.native)? };
		let handle = self.objects.command_buffers.write().insert(CommandBufferSlot {
			pool,
			inner: Mutex::new(CommandBufferInner {
				native,
				state: CommandBufferState::Initial,
				tracking: RecordingState::default(),
			}),
		});
		pool_slot.buffers.lock().push(handle);
		Ok(handle)
	}

	pub fn destroy_command_buffer(&self, cmd: &mut CommandBufferHandle) {
		let pools = self.objects.command_pools.read();
		if let Some(slot) = take_slot(&self.objects.command_buffers, cmd) {
			if let Some(pool) = pools.get(slot.pool) {
				pool.buffers.lock().retain(|h| h != cmd);
				unsafe {
					self.platform
						.destroy_command_buffer(&pool.native, slot.inner.into_inner().native)
				};
			}
		}
	}

	pub fn command_buffer_state(&self, cmd: CommandBufferHandle) -> RhiResult<CommandBufferState> {
		Ok(self.objects.command_buffers.read().try_get(cmd)?.inner.lock().state)
	}

	/// Starts recording. The command buffer must be in the initial state, so executable buffers have to be reset
	/// through their pool first.
	pub fn begin_command_buffer(&self, cmd: CommandBufferHandle) -> RhiResult<()> {
		let buffers = self.objects.command_buffers.read();
		let mut inner = buffers.try_get(cmd)?.inner.lock();
		if inner.state != CommandBufferState::Initial {
			return Err(RhiError::invalid_state(format!(
				"{cmd:?} is {:?}, reset its pool before recording again",
				inner.state
			)));
		}
		unsafe { self.platform.begin_command_buffer(&mut inner.native)? };
		inner.state = CommandBufferState::Recording;
		inner.tracking = RecordingState::default();
		Ok(())
	}

	pub fn end_command_buffer(&self, cmd: CommandBufferHandle) -> RhiResult<()> {
		self.with_recording(cmd, |inner| {
			inner.outside_rendering("ending a command buffer")?;
			unsafe { self.platform.end_command_buffer(&mut inner.native)? };
			inner.state = CommandBufferState::Executable;
			Ok(())
		})
	}

	/// Runs `f` on a command buffer that must be recording.
	fn with_recording<R>(
		&self,
		cmd: CommandBufferHandle,
		f: impl FnOnce(&mut CommandBufferInner<P>) -> RhiResult<R>,
	) -> RhiResult<R> {
		let buffers = self.objects.command_buffers.read();
		let mut inner = buffers.try_get(cmd)?.inner.lock();
		if inner.state != CommandBufferState::Recording {
			return Err(RhiError::invalid_state(format!(
				"{cmd:?} is {:?} and not recording",
				inner.state
			)));
		}
		f(&mut inner)
	}

	pub fn cmd_set_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) -> RhiResult<()> {
		let layouts = self.objects.pipeline_layouts.read();
		let pipelines = self.objects.pipelines.read();
		let pipeline_slot = pipelines.try_get(pipeline)?;
		let layout = layouts.try_get(pipeline_slot.layout)?;
		self.with_recording(cmd, |inner| {
			if pipeline_slot.bind_point == PipelineBindPoint::Compute {
				inner.outside_rendering("binding a compute pipeline")?;
			}
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::BindPipeline {
						pipeline: &pipeline_slot.native,
						layout: &layout.native,
						bind_point: pipeline_slot.bind_point,
					},
				)
			};
			let tracking = &mut inner.tracking;
			let same_layout = tracking.pipeline.as_ref().is_some_and(|p| p.layout == pipeline_slot.layout);
			if !same_layout {
				tracking.bound_heaps = 0;
			}
			tracking.pipeline = Some(BoundPipeline {
				bind_point: pipeline_slot.bind_point,
				layout: pipeline_slot.layout,
				layout_bindings: layout.bindings.clone(),
				push_constant_ranges: layout.push_constant_ranges.clone(),
				vertex_buffer_count: pipeline_slot.vertex_buffer_count,
				color_formats: pipeline_slot.color_formats.clone(),
				depth_format: pipeline_slot.depth_format,
			});
			Ok(())
		})
	}

	/// Binds one heap table per binding layout of the current pipeline's layout, in layout order.
	pub fn cmd_set_binding_heaps(&self, cmd: CommandBufferHandle, heaps: &[BindingHeapBind]) -> RhiResult<()> {
		let heap_arena = self.objects.heaps.read();
		let layouts = self.objects.pipeline_layouts.read();
		self.with_recording(cmd, |inner| {
			let pipeline = inner
				.tracking
				.pipeline
				.as_ref()
				.ok_or_else(|| RhiError::invalid_state("binding heaps requires a pipeline"))?;
			if heaps.len() > pipeline.layout_bindings.len() {
				return Err(RhiError::invalid_argument(format!(
					"{} heaps bound but the pipeline layout has {} binding layouts",
					heaps.len(),
					pipeline.layout_bindings.len()
				)));
			}
			let natives = heaps
				.iter()
				.zip(&pipeline.layout_bindings)
				.map(|(bind, expected)| {
					let heap = heap_arena.try_get(bind.heap)?;
					if heap.layout != *expected {
						return Err(RhiError::invalid_argument(format!(
							"{:?} was created for {:?} but the pipeline expects {expected:?}",
							bind.heap, heap.layout
						)));
					}
					if bind.table >= heap.tables {
						return Err(RhiError::invalid_argument(format!(
							"table {} out of bounds for {:?}",
							bind.table, bind.heap
						)));
					}
					Ok((&heap.native, bind.table))
				})
				.collect::<RhiResult<SmallVec<[_; 4]>>>()?;
			let layout = layouts.try_get(pipeline.layout)?;
			let bind_point = pipeline.bind_point;
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::BindHeaps {
						layout: &layout.native,
						bind_point,
						heaps: &natives,
					},
				)
			};
			inner.tracking.bound_heaps = heaps.len() as u32;
			Ok(())
		})
	}

	pub fn cmd_set_push_constants(&self, cmd: CommandBufferHandle, offset: u32, data: &[u8]) -> RhiResult<()> {
		let layouts = self.objects.pipeline_layouts.read();
		self.with_recording(cmd, |inner| {
			let pipeline = inner
				.tracking
				.pipeline
				.as_ref()
				.ok_or_else(|| RhiError::invalid_state("push constants require a pipeline"))?;
			let end = offset as u64 + data.len() as u64;
			if data.is_empty() || offset % 4 != 0 || data.len() % 4 != 0 {
				return Err(RhiError::invalid_argument("push constants must be non-empty and 4 byte aligned"));
			}
			let mut stages = ShaderStages::empty();
			let mut covered = offset as u64;
			let mut ranges = pipeline.push_constant_ranges.clone();
			ranges.sort_by_key(|r| r.offset);
			for range in &ranges {
				let (start, range_end) = (range.offset as u64, range.offset as u64 + range.size as u64);
				if start < end && range_end > offset as u64 {
					stages |= range.visibility;
					if start <= covered {
						covered = covered.max(range_end);
					}
				}
			}
			if covered < end {
				return Err(RhiError::invalid_argument(format!(
					"push constants {offset}..{end} are not covered by the pipeline layout"
				)));
			}
			let layout = layouts.try_get(pipeline.layout)?;
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::PushConstants {
						layout: &layout.native,
						stages,
						offset,
						data,
					},
				)
			};
			Ok(())
		})
	}

	pub fn cmd_set_viewports(&self, cmd: CommandBufferHandle, viewports: &[Viewport]) -> RhiResult<()> {
		if viewports.is_empty() {
			return Err(RhiError::invalid_argument("at least one viewport is required"));
		}
		self.with_recording(cmd, |inner| {
			unsafe { self.platform.record(&mut inner.native, PlatformCommand::SetViewports(viewports)) };
			inner.tracking.viewport_set = true;
			Ok(())
		})
	}

	pub fn cmd_set_scissors(&self, cmd: CommandBufferHandle, scissors: &[Rect]) -> RhiResult<()> {
		if scissors.is_empty() {
			return Err(RhiError::invalid_argument("at least one scissor is required"));
		}
		self.with_recording(cmd, |inner| {
			unsafe { self.platform.record(&mut inner.native, PlatformCommand::SetScissors(scissors)) };
			inner.tracking.scissor_set = true;
			Ok(())
		})
	}

	pub fn cmd_set_vertex_buffers(
		&self,
		cmd: CommandBufferHandle,
		first_slot: u32,
		buffers: &[VertexBufferView],
	) -> RhiResult<()> {
		if first_slot as usize + buffers.len() > 64 {
			return Err(RhiError::invalid_argument("at most 64 vertex buffer slots are supported"));
		}
		let resources = self.objects.resources.read();
		let natives = buffers
			.iter()
			.map(|view| {
				let slot = resources.try_get(view.resource)?;
				slot.require_bound()?;
				require_usage(slot, ResourceUsage::VERTEX_BUFFER, "vertex buffer")?;
				if view.offset >= slot.desc.width {
					return Err(RhiError::invalid_argument("vertex buffer offset out of bounds"));
				}
				Ok((&slot.native, view.offset))
			})
			.collect::<RhiResult<SmallVec<[_; 4]>>>()?;
		self.with_recording(cmd, |inner| {
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::BindVertexBuffers {
						first_slot,
						buffers: &natives,
					},
				)
			};
			for i in 0..buffers.len() as u32 {
				inner.tracking.vertex_buffers |= 1 << (first_slot + i);
			}
			Ok(())
		})
	}

	pub fn cmd_set_index_buffer(
		&self,
		cmd: CommandBufferHandle,
		resource: ResourceHandle,
		offset: u64,
		index_type: IndexType,
	) -> RhiResult<()> {
		let resources = self.objects.resources.read();
		let slot = resources.try_get(resource)?;
		slot.require_bound()?;
		require_usage(slot, ResourceUsage::INDEX_BUFFER, "index buffer")?;
		if offset >= slot.desc.width {
			return Err(RhiError::invalid_argument("index buffer offset out of bounds"));
		}
		self.with_recording(cmd, |inner| {
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::BindIndexBuffer {
						buffer: &slot.native,
						offset,
						index_type,
					},
				)
			};
			inner.tracking.index_buffer = true;
			Ok(())
		})
	}

	pub fn cmd_draw(
		&self,
		cmd: CommandBufferHandle,
		vertex_count: u32,
		instance_count: u32,
		first_vertex: u32,
		first_instance: u32,
	) -> RhiResult<()> {
		self.with_recording(cmd, |inner| {
			inner.validate_draw(false)?;
			let args = DrawArgs {
				vertex_count,
				instance_count,
				first_vertex,
				first_instance,
			};
			unsafe { self.platform.record(&mut inner.native, PlatformCommand::Draw(args)) };
			Ok(())
		})
	}

	pub fn cmd_draw_indexed(
		&self,
		cmd: CommandBufferHandle,
		index_count: u32,
		instance_count: u32,
		first_index: u32,
		vertex_offset: i32,
		first_instance: u32,
	) -> RhiResult<()> {
		self.with_recording(cmd, |inner| {
			inner.validate_draw(true)?;
			let args = DrawIndexedArgs {
				index_count,
				instance_count,
				first_index,
				vertex_offset,
				first_instance,
			};
			unsafe { self.platform.record(&mut inner.native, PlatformCommand::DrawIndexed(args)) };
			Ok(())
		})
	}

	pub fn cmd_dispatch(&self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) -> RhiResult<()> {
		self.with_recording(cmd, |inner| {
			inner.outside_rendering("dispatch")?;
			let pipeline = inner.pipeline(PipelineBindPoint::Compute, "dispatch")?;
			inner.require_heaps(pipeline, "dispatch")?;
			unsafe { self.platform.record(&mut inner.native, PlatformCommand::Dispatch([x, y, z])) };
			Ok(())
		})
	}

	pub fn cmd_copy_buffer(
		&self,
		cmd: CommandBufferHandle,
		src: ResourceHandle,
		dst: ResourceHandle,
		region: BufferCopyRegion,
	) -> RhiResult<()> {
		let resources = self.objects.resources.read();
		let src_slot = resources.try_get(src)?;
		let dst_slot = resources.try_get(dst)?;
		for (slot, offset, usage) in [
			(src_slot, region.src_offset, ResourceUsage::TRANSFER_SRC),
			(dst_slot, region.dst_offset, ResourceUsage::TRANSFER_DST),
		] {
			if !slot.desc.is_buffer() {
				return Err(RhiError::invalid_argument("buffer copies require buffers"));
			}
			slot.require_bound()?;
			require_usage(slot, usage, "buffer copy")?;
			if offset.checked_add(region.size).map_or(true, |end| end > slot.desc.width) {
				return Err(RhiError::invalid_argument(format!(
					"copy of {} bytes at {offset} out of bounds for buffer of {} bytes",
					region.size, slot.desc.width
				)));
			}
		}
		if src == dst
			&& region.src_offset < region.dst_offset + region.size
			&& region.dst_offset < region.src_offset + region.size
		{
			return Err(RhiError::invalid_argument("copy source and destination overlap"));
		}
		self.with_recording(cmd, |inner| {
			inner.outside_rendering("copy")?;
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::CopyBuffer {
						src: &src_slot.native,
						dst: &dst_slot.native,
						region,
					},
				)
			};
			Ok(())
		})
	}

	fn validate_buffer_texture_copy(
		buffer: &ResourceSlot<P>,
		texture: &ResourceSlot<P>,
		region: &BufferTextureCopyRegion,
	) -> RhiResult<()> {
		if !buffer.desc.is_buffer() || !texture.desc.is_texture() {
			return Err(RhiError::invalid_argument("copy requires a buffer and a texture"));
		}
		buffer.require_bound()?;
		texture.require_bound()?;
		if region.mip_level >= texture.desc.mip_levels || region.array_layer >= texture.desc.array_layers() {
			return Err(RhiError::invalid_argument(format!(
				"subresource mip {} layer {} out of bounds",
				region.mip_level, region.array_layer
			)));
		}
		if texture.desc.samples.count() != 1 {
			return Err(RhiError::invalid_argument("multisampled textures can not be copied to or from buffers"));
		}
		let size = texture.desc.subresource_size(region.mip_level);
		if region.buffer_offset % texture.desc.format.block_size() as u64 != 0
			|| region.buffer_offset.checked_add(size).map_or(true, |end| end > buffer.desc.width)
		{
			return Err(RhiError::invalid_argument(format!(
				"{size} bytes at buffer offset {} out of bounds or misaligned for buffer of {} bytes",
				region.buffer_offset, buffer.desc.width
			)));
		}
		Ok(())
	}

	/// Copies tightly packed texels from a buffer into a whole subresource. The texture must be in the
	/// [`TextureLayout::TransferDst`] layout.
	///
	/// [`TextureLayout::TransferDst`]: crate::barrier::TextureLayout::TransferDst
	pub fn cmd_copy_buffer_to_texture(
		&self,
		cmd: CommandBufferHandle,
		src: ResourceHandle,
		dst: ResourceHandle,
		region: BufferTextureCopyRegion,
	) -> RhiResult<()> {
		let resources = self.objects.resources.read();
		let src_slot = resources.try_get(src)?;
		let dst_slot = resources.try_get(dst)?;
		Self::validate_buffer_texture_copy(src_slot, dst_slot, &region)?;
		require_usage(src_slot, ResourceUsage::TRANSFER_SRC, "copy source")?;
		require_usage(dst_slot, ResourceUsage::TRANSFER_DST, "copy destination")?;
		self.with_recording(cmd, |inner| {
			inner.outside_rendering("copy")?;
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::CopyBufferToTexture {
						src: &src_slot.native,
						dst: &dst_slot.native,
						region,
					},
				)
			};
			Ok(())
		})
	}

	/// Copies a whole subresource into tightly packed texels in a buffer. The texture must be in the
	/// [`TextureLayout::TransferSrc`] layout.
	///
	/// [`TextureLayout::TransferSrc`]: crate::barrier::TextureLayout::TransferSrc
	pub fn cmd_copy_texture_to_buffer(
		&self,
		cmd: CommandBufferHandle,
		src: ResourceHandle,
		dst: ResourceHandle,
		region: BufferTextureCopyRegion,
	) -> RhiResult<()> {
		let resources = self.objects.resources.read();
		let src_slot = resources.try_get(src)?;
		let dst_slot = resources.try_get(dst)?;
		Self::validate_buffer_texture_copy(dst_slot, src_slot, &region)?;
		require_usage(src_slot, ResourceUsage::TRANSFER_SRC, "copy source")?;
		require_usage(dst_slot, ResourceUsage::TRANSFER_DST, "copy destination")?;
		self.with_recording(cmd, |inner| {
			inner.outside_rendering("copy")?;
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::CopyTextureToBuffer {
						src: &src_slot.native,
						dst: &dst_slot.native,
						region,
					},
				)
			};
			Ok(())
		})
	}

	pub fn cmd_copy_texture(
		&self,
		cmd: CommandBufferHandle,
		src: ResourceHandle,
		dst: ResourceHandle,
		region: TextureCopyRegion,
	) -> RhiResult<()> {
		let resources = self.objects.resources.read();
		let src_slot = resources.try_get(src)?;
		let dst_slot = resources.try_get(dst)?;
		for (slot, mip, layer) in [
			(src_slot, region.src_mip_level, region.src_array_layer),
			(dst_slot, region.dst_mip_level, region.dst_array_layer),
		] {
			if !slot.desc.is_texture() {
				return Err(RhiError::invalid_argument("texture copies require textures"));
			}
			slot.require_bound()?;
			if mip >= slot.desc.mip_levels || layer >= slot.desc.array_layers() {
				return Err(RhiError::invalid_argument(format!(
					"subresource mip {mip} layer {layer} out of bounds"
				)));
			}
		}
		require_usage(src_slot, ResourceUsage::TRANSFER_SRC, "copy source")?;
		require_usage(dst_slot, ResourceUsage::TRANSFER_DST, "copy destination")?;
		if src_slot.desc.mip_extent(region.src_mip_level) != dst_slot.desc.mip_extent(region.dst_mip_level)
			|| src_slot.desc.format.block_size() != dst_slot.desc.format.block_size()
			|| src_slot.desc.samples != dst_slot.desc.samples
		{
			return Err(RhiError::invalid_argument(
				"texture copies require matching extents, texel sizes and sample counts",
			));
		}
		if src == dst && region.src_mip_level == region.dst_mip_level && region.src_array_layer == region.dst_array_layer
		{
			return Err(RhiError::invalid_argument("copy source and destination are the same subresource"));
		}
		self.with_recording(cmd, |inner| {
			inner.outside_rendering("copy")?;
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::CopyTexture {
						src: &src_slot.native,
						dst: &dst_slot.native,
						region,
					},
				)
			};
			Ok(())
		})
	}

	/// Records barriers. Texture layouts are not tracked: `old_layout` must match the layout the texture is in when
	/// the barrier executes, which the debug backends validate.
	pub fn cmd_barrier(&self, cmd: CommandBufferHandle, barriers: &[Barrier]) -> RhiResult<()> {
		profiling::function_scope!();
		let resources = self.objects.resources.read();
		let natives = barriers
			.iter()
			.map(|barrier| {
				Ok(match barrier {
					Barrier::Memory(memory) => PlatformBarrier::Memory(*memory),
					Barrier::Buffer(buffer) => {
						let slot = resources.try_get(buffer.resource)?;
						if !slot.desc.is_buffer() {
							return Err(RhiError::invalid_argument("buffer barrier on a texture"));
						}
						slot.require_bound()?;
						require_usage(slot, buffer.dst_access.required_usage(), "buffer barrier")?;
						PlatformBarrier::Buffer(&slot.native, *buffer)
					}
					Barrier::Texture(texture) => {
						let slot = resources.try_get(texture.resource)?;
						if !slot.desc.is_texture() {
							return Err(RhiError::invalid_argument("texture barrier on a buffer"));
						}
						slot.require_bound()?;
						if texture.new_layout == crate::barrier::TextureLayout::Undefined {
							return Err(RhiError::invalid_argument("textures can not transition to Undefined"));
						}
						require_usage(slot, texture.new_layout.required_usage(), "texture barrier")?;
						let mut texture = *texture;
						texture.subresource = texture.subresource.resolve(&slot.desc)?;
						PlatformBarrier::Texture(&slot.native, texture)
					}
				})
			})
			.collect::<RhiResult<SmallVec<[_; 8]>>>()?;
		self.with_recording(cmd, |inner| {
			inner.outside_rendering("barrier")?;
			unsafe { self.platform.record(&mut inner.native, PlatformCommand::Barriers(&natives)) };
			Ok(())
		})
	}

	pub fn cmd_begin_rendering(&self, cmd: CommandBufferHandle, desc: &RenderingDesc) -> RhiResult<()> {
		profiling::function_scope!();
		if desc.color_attachments.is_empty() && desc.depth_attachment.is_none() {
			return Err(RhiError::invalid_argument("rendering requires at least one attachment"));
		}
		let max = self.limits().max_color_attachments as usize;
		if desc.color_attachments.len() > max {
			return Err(RhiError::invalid_argument(format!(
				"{} color attachments exceed the maximum of {max}",
				desc.color_attachments.len()
			)));
		}
		let resources = self.objects.resources.read();
		let views = self.objects.views.read();
		let colors = desc
			.color_attachments
			.iter()
			.map(|attachment| {
				let view = views.try_get(attachment.view)?;
				if view.desc.view_type != ViewType::RenderTarget {
					return Err(RhiError::invalid_argument(format!(
						"color attachment {:?} is a {:?} view",
						attachment.view, view.desc.view_type
					)));
				}
				Ok(PlatformColorAttachment {
					view: &view.native,
					resource: &resources.try_get(view.desc.resource)?.native,
					attachment: *attachment,
				})
			})
			.collect::<RhiResult<SmallVec<[_; 4]>>>()?;
		let depth = desc
			.depth_attachment
			.map(|attachment| {
				let view = views.try_get(attachment.view)?;
				if view.desc.view_type != ViewType::DepthStencil {
					return Err(RhiError::invalid_argument(format!(
						"depth attachment {:?} is a {:?} view",
						attachment.view, view.desc.view_type
					)));
				}
				Ok(PlatformDepthAttachment {
					view: &view.native,
					resource: &resources.try_get(view.desc.resource)?.native,
					attachment,
				})
			})
			.transpose()?;
		let color_formats = desc
			.color_attachments
			.iter()
			.map(|a| views.try_get(a.view).map(|v| v.desc.format))
			.collect::<RhiResult<SmallVec<[_; 4]>>>()?;
		let depth_format = desc
			.depth_attachment
			.map(|a| views.try_get(a.view).map(|v| v.desc.format))
			.transpose()?;

		self.with_recording(cmd, |inner| {
			inner.outside_rendering("beginning rendering")?;
			unsafe {
				self.platform.record(
					&mut inner.native,
					PlatformCommand::BeginRendering {
						render_area: desc.render_area,
						color_attachments: &colors,
						depth_attachment: depth,
					},
				)
			};
			inner.tracking.rendering = Some(RenderingTargets {
				color_formats,
				depth_format,
			});
			Ok(())
		})
	}

	pub fn cmd_end_rendering(&self, cmd: CommandBufferHandle) -> RhiResult<()> {
		self.with_recording(cmd, |inner| {
			if inner.tracking.rendering.is_none() {
				return Err(RhiError::invalid_state("no rendering to end"));
			}
			unsafe { self.platform.record(&mut inner.native, PlatformCommand::EndRendering) };
			inner.tracking.rendering = None;
			Ok(())
		})
	}
}
