use crate::command::BufferTextureCopyRegion;
use crate::error::{RhiError, RhiResult};
use crate::platform::ash::{Ash, AshQueue, AshResource};
use crate::platform::{PlatformBarrier, PlatformCommand, PlatformSubmit, RhiPlatform};
use ash::vk::{
	BufferCopy, BufferImageCopy, BufferMemoryBarrier2, ClearColorValue, ClearDepthStencilValue, ClearValue,
	CommandBuffer, CommandBufferAllocateInfo, CommandBufferLevel, CommandBufferSubmitInfo, CommandPool,
	CommandPoolCreateFlags, CommandPoolCreateInfo, DependencyInfo, Extent3D, ImageCopy, ImageLayout,
	ImageMemoryBarrier2, ImageSubresourceLayers, MemoryBarrier2, Offset3D, PipelineStageFlags2, RenderingAttachmentInfo,
	RenderingInfo, SemaphoreSubmitInfo, SubmitInfo2, QUEUE_FAMILY_IGNORED, WHOLE_SIZE,
};
use smallvec::SmallVec;

impl Ash {
	pub unsafe fn create_command_pool_native(&self, queue: &AshQueue) -> RhiResult<CommandPool> {
		unsafe {
			Ok(self.device.create_command_pool(
				&CommandPoolCreateInfo::default()
					.flags(CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
					.queue_family_index(queue.family),
				None,
			)?)
		}
	}

	pub unsafe fn create_command_buffer_native(&self, pool: CommandPool) -> RhiResult<CommandBuffer> {
		unsafe {
			let buffers = self.device.allocate_command_buffers(
				&CommandBufferAllocateInfo::default()
					.command_pool(pool)
					.level(CommandBufferLevel::PRIMARY)
					.command_buffer_count(1),
			)?;
			buffers.into_iter().next().ok_or_else(|| RhiError::Backend {
				backend: Ash::NAME,
				message: "vkAllocateCommandBuffers returned no command buffer".to_string(),
			})
		}
	}

	/// Submits all command buffers as a single batch, binary semaphores wait and signal with value 0.
	pub unsafe fn submit(&self, queue: &AshQueue, submit: &PlatformSubmit<'_, Ash>) -> RhiResult<()> {
		unsafe {
			profiling::function_scope!();
			let semaphore_info = |semaphore: ash::vk::Semaphore, value: u64| {
				SemaphoreSubmitInfo::default()
					.semaphore(semaphore)
					.value(value)
					.stage_mask(PipelineStageFlags2::ALL_COMMANDS)
			};
			let waits = submit
				.wait_semaphores
				.iter()
				.map(|s| semaphore_info(**s, 0))
				.chain(submit.wait_fences.iter().map(|(f, v)| semaphore_info(**f, *v)))
				.collect::<SmallVec<[_; 4]>>();
			let signals = submit
				.signal_semaphores
				.iter()
				.map(|s| semaphore_info(**s, 0))
				.chain(submit.signal_fences.iter().map(|(f, v)| semaphore_info(**f, *v)))
				.collect::<SmallVec<[_; 4]>>();
			let command_buffers = submit
				.command_buffers
				.iter()
				.map(|cmd| CommandBufferSubmitInfo::default().command_buffer(**cmd))
				.collect::<SmallVec<[_; 4]>>();

			let queue = queue.lock();
			self.device.queue_submit2(
				*queue,
				&[SubmitInfo2::default()
					.wait_semaphore_infos(&waits)
					.command_buffer_infos(&command_buffers)
					.signal_semaphore_infos(&signals)],
				ash::vk::Fence::null(),
			)?;
			Ok(())
		}
	}

	pub unsafe fn record_native(&self, cmd: CommandBuffer, command: PlatformCommand<'_, Ash>) {
		unsafe {
			let device = &self.device;
			match command {
				PlatformCommand::BindPipeline {
					pipeline, bind_point, ..
				} => device.cmd_bind_pipeline(cmd, bind_point.to_ash(), *pipeline),
				PlatformCommand::BindHeaps {
					layout,
					bind_point,
					heaps,
				} => {
					let sets = heaps
						.iter()
						.map(|(heap, table)| heap.sets[*table as usize])
						.collect::<SmallVec<[_; 4]>>();
					device.cmd_bind_descriptor_sets(cmd, bind_point.to_ash(), *layout, 0, &sets, &[]);
				}
				PlatformCommand::PushConstants {
					layout,
					stages,
					offset,
					data,
				} => device.cmd_push_constants(cmd, *layout, stages.to_ash(), offset, data),
				PlatformCommand::SetViewports(viewports) => {
					let viewports = viewports.iter().map(|v| v.to_ash()).collect::<SmallVec<[_; 4]>>();
					device.cmd_set_viewport(cmd, 0, &viewports);
				}
				PlatformCommand::SetScissors(scissors) => {
					let scissors = scissors.iter().map(|r| r.to_ash()).collect::<SmallVec<[_; 4]>>();
					device.cmd_set_scissor(cmd, 0, &scissors);
				}
				PlatformCommand::BindVertexBuffers { first_slot, buffers } => {
					let handles = buffers.iter().map(|(b, _)| b.buffer()).collect::<SmallVec<[_; 4]>>();
					let offsets = buffers.iter().map(|(_, o)| *o).collect::<SmallVec<[_; 4]>>();
					device.cmd_bind_vertex_buffers(cmd, first_slot, &handles, &offsets);
				}
				PlatformCommand::BindIndexBuffer {
					buffer,
					offset,
					index_type,
				} => device.cmd_bind_index_buffer(cmd, buffer.buffer(), offset, index_type.to_ash_index_type()),
				PlatformCommand::Draw(args) => device.cmd_draw(
					cmd,
					args.vertex_count,
					args.instance_count,
					args.first_vertex,
					args.first_instance,
				),
				PlatformCommand::DrawIndexed(args) => device.cmd_draw_indexed(
					cmd,
					args.index_count,
					args.instance_count,
					args.first_index,
					args.vertex_offset,
					args.first_instance,
				),
				PlatformCommand::Dispatch([x, y, z]) => device.cmd_dispatch(cmd, x, y, z),
				PlatformCommand::CopyBuffer { src, dst, region } => device.cmd_copy_buffer(
					cmd,
					src.buffer(),
					dst.buffer(),
					&[BufferCopy {
						src_offset: region.src_offset,
						dst_offset: region.dst_offset,
						size: region.size,
					}],
				),
				PlatformCommand::CopyBufferToTexture { src, dst, region } => {
					if let Some(copy) = buffer_image_copy(dst, &region) {
						device.cmd_copy_buffer_to_image(
							cmd,
							src.buffer(),
							dst.image(),
							ImageLayout::TRANSFER_DST_OPTIMAL,
							&[copy],
						);
					}
				}
				PlatformCommand::CopyTextureToBuffer { src, dst, region } => {
					if let Some(copy) = buffer_image_copy(src, &region) {
						device.cmd_copy_image_to_buffer(
							cmd,
							src.image(),
							ImageLayout::TRANSFER_SRC_OPTIMAL,
							dst.buffer(),
							&[copy],
						);
					}
				}
				PlatformCommand::CopyTexture { src, dst, region } => {
					let (Some(src_desc), Some(dst_desc)) = (src.image_desc(), dst.image_desc()) else {
						return;
					};
					let [width, height, depth] = src_desc.mip_extent(region.src_mip_level);
					device.cmd_copy_image(
						cmd,
						src.image(),
						ImageLayout::TRANSFER_SRC_OPTIMAL,
						dst.image(),
						ImageLayout::TRANSFER_DST_OPTIMAL,
						&[ImageCopy {
							src_subresource: ImageSubresourceLayers {
								aspect_mask: src_desc.format.copy_aspect(),
								mip_level: region.src_mip_level,
								base_array_layer: region.src_array_layer,
								layer_count: 1,
							},
							src_offset: Offset3D::default(),
							dst_subresource: ImageSubresourceLayers {
								aspect_mask: dst_desc.format.copy_aspect(),
								mip_level: region.dst_mip_level,
								base_array_layer: region.dst_array_layer,
								layer_count: 1,
							},
							dst_offset: Offset3D::default(),
							extent: Extent3D { width, height, depth },
						}],
					);
				}
				PlatformCommand::Barriers(barriers) => {
					let mut memory = SmallVec::<[MemoryBarrier2; 2]>::new();
					let mut buffers = SmallVec::<[BufferMemoryBarrier2; 8]>::new();
					let mut images = SmallVec::<[ImageMemoryBarrier2; 8]>::new();
					for barrier in barriers {
						match barrier {
							PlatformBarrier::Memory(b) => memory.push(
								MemoryBarrier2::default()
									.src_stage_mask(b.src_stages.to_ash())
									.src_access_mask(b.src_access.to_ash())
									.dst_stage_mask(b.dst_stages.to_ash())
									.dst_access_mask(b.dst_access.to_ash()),
							),
							PlatformBarrier::Buffer(resource, b) => buffers.push(
								BufferMemoryBarrier2::default()
									.buffer(resource.buffer())
									.offset(0)
									.size(WHOLE_SIZE)
									.src_stage_mask(b.src_stages.to_ash())
									.src_access_mask(b.src_access.to_ash())
									.dst_stage_mask(b.dst_stages.to_ash())
									.dst_access_mask(b.dst_access.to_ash())
									.src_queue_family_index(QUEUE_FAMILY_IGNORED)
									.dst_queue_family_index(QUEUE_FAMILY_IGNORED),
							),
							PlatformBarrier::Texture(resource, b) => images.push(
								ImageMemoryBarrier2::default()
									.image(resource.image())
									.subresource_range(b.subresource.to_ash(resource.format().aspect()))
									.old_layout(b.old_layout.to_ash())
									.new_layout(b.new_layout.to_ash())
									.src_stage_mask(b.src_stages.to_ash())
									.src_access_mask(b.src_access.to_ash())
									.dst_stage_mask(b.dst_stages.to_ash())
									.dst_access_mask(b.dst_access.to_ash())
									.src_queue_family_index(QUEUE_FAMILY_IGNORED)
									.dst_queue_family_index(QUEUE_FAMILY_IGNORED),
							),
						}
					}
					device.cmd_pipeline_barrier2(
						cmd,
						&DependencyInfo::default()
							.memory_barriers(&memory)
							.buffer_memory_barriers(&buffers)
							.image_memory_barriers(&images),
					);
				}
				PlatformCommand::BeginRendering {
					render_area,
					color_attachments,
					depth_attachment,
				} => {
					let colors = color_attachments
						.iter()
						.map(|c| {
							RenderingAttachmentInfo::default()
								.image_view(c.view.image_view())
								.image_layout(ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
								.load_op(c.attachment.load_op.to_ash())
								.store_op(c.attachment.store_op.to_ash())
								.clear_value(ClearValue {
									color: ClearColorValue {
										float32: c.attachment.clear_color,
									},
								})
						})
						.collect::<SmallVec<[_; 4]>>();
					let depth = depth_attachment.as_ref().map(|d| {
						RenderingAttachmentInfo::default()
							.image_view(d.view.image_view())
							.image_layout(ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
							.load_op(d.attachment.load_op.to_ash())
							.store_op(d.attachment.store_op.to_ash())
							.clear_value(ClearValue {
								depth_stencil: ClearDepthStencilValue {
									depth: d.attachment.clear_depth,
									stencil: d.attachment.clear_stencil,
								},
							})
					});
					let stencil = depth_attachment
						.as_ref()
						.filter(|d| d.resource.format().has_stencil())
						.and(depth);
					let mut info = RenderingInfo::default()
						.render_area(render_area.to_ash())
						.layer_count(1)
						.color_attachments(&colors);
					if let Some(depth) = depth.as_ref() {
						info = info.depth_attachment(depth);
					}
					if let Some(stencil) = stencil.as_ref() {
						info = info.stencil_attachment(stencil);
					}
					device.cmd_begin_rendering(cmd, &info);
				}
				PlatformCommand::EndRendering => device.cmd_end_rendering(cmd),
			}
		}
	}
}

/// A copy of a whole subresource from or into tightly packed texels, `None` if `image` is a buffer.
fn buffer_image_copy(image: &AshResource, region: &BufferTextureCopyRegion) -> Option<BufferImageCopy> {
	let desc = image.image_desc()?;
	let [width, height, depth] = desc.mip_extent(region.mip_level);
	Some(BufferImageCopy {
		buffer_offset: region.buffer_offset,
		buffer_row_length: 0,
		buffer_image_height: 0,
		image_subresource: ImageSubresourceLayers {
			aspect_mask: desc.format.copy_aspect(),
			mip_level: region.mip_level,
			base_array_layer: region.array_layer,
			layer_count: 1,
		},
		image_offset: Offset3D::default(),
		image_extent: Extent3D { width, height, depth },
	})
}
