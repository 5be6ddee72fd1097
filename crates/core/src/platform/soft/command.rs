use crate::barrier::TextureLayout;
use crate::command::{
	BufferCopyRegion, BufferTextureCopyRegion, ColorAttachment, DepthAttachment, LoadOp, TextureCopyRegion,
};
use crate::pipeline::PipelineBindPoint;
use crate::platform::soft::binding::{SoftBindingHeap, SoftPipeline};
use crate::platform::soft::memory::{copy_bytes, fill_texels, SoftResource, SoftView};
use crate::platform::soft::texel::{encode_color, encode_depth};
use crate::platform::soft::validation::Validation;
use crate::platform::soft::Soft;
use crate::platform::{PlatformBarrier, PlatformCommand};
use crate::view::SubresourceRange;
use smallvec::SmallVec;
use std::sync::Arc;

pub struct SoftTextureBarrier {
	pub resource: SoftResource,
	pub old_layout: TextureLayout,
	pub new_layout: TextureLayout,
	pub subresource: SubresourceRange,
}

/// A recorded command owning everything it references.
pub enum SoftCommand {
	BindPipeline(SoftPipeline),
	BindHeaps {
		bind_point: PipelineBindPoint,
		heaps: SmallVec<[(SoftBindingHeap, u32); 4]>,
	},
	Draw,
	Dispatch([u32; 3]),
	CopyBuffer {
		src: SoftResource,
		dst: SoftResource,
		region: BufferCopyRegion,
	},
	CopyBufferToTexture {
		src: SoftResource,
		dst: SoftResource,
		region: BufferTextureCopyRegion,
	},
	CopyTextureToBuffer {
		src: SoftResource,
		dst: SoftResource,
		region: BufferTextureCopyRegion,
	},
	CopyTexture {
		src: SoftResource,
		dst: SoftResource,
		region: TextureCopyRegion,
	},
	Barriers(Vec<SoftTextureBarrier>),
	BeginRendering {
		colors: SmallVec<[(SoftView, ColorAttachment); 4]>,
		depth: Option<(SoftView, DepthAttachment)>,
	},
	EndRendering,
}

impl SoftCommand {
	/// Converts a platform command, dropping state only the rasterizer would consume.
	pub fn record(command: PlatformCommand<'_, Soft>) -> Option<Self> {
		Some(match command {
			PlatformCommand::BindPipeline { pipeline, .. } => SoftCommand::BindPipeline(pipeline.clone()),
			PlatformCommand::BindHeaps { bind_point, heaps, .. } => SoftCommand::BindHeaps {
				bind_point,
				heaps: heaps.iter().map(|(heap, table)| ((*heap).clone(), *table)).collect(),
			},
			PlatformCommand::PushConstants { .. }
			| PlatformCommand::SetViewports(_)
			| PlatformCommand::SetScissors(_)
			| PlatformCommand::BindVertexBuffers { .. }
			| PlatformCommand::BindIndexBuffer { .. } => return None,
			PlatformCommand::Draw(_) | PlatformCommand::DrawIndexed(_) => SoftCommand::Draw,
			PlatformCommand::Dispatch(groups) => SoftCommand::Dispatch(groups),
			PlatformCommand::CopyBuffer { src, dst, region } => SoftCommand::CopyBuffer {
				src: src.clone(),
				dst: dst.clone(),
				region,
			},
			PlatformCommand::CopyBufferToTexture { src, dst, region } => SoftCommand::CopyBufferToTexture {
				src: src.clone(),
				dst: dst.clone(),
				region,
			},
			PlatformCommand::CopyTextureToBuffer { src, dst, region } => SoftCommand::CopyTextureToBuffer {
				src: src.clone(),
				dst: dst.clone(),
				region,
			},
			PlatformCommand::CopyTexture { src, dst, region } => SoftCommand::CopyTexture {
				src: src.clone(),
				dst: dst.clone(),
				region,
			},
			PlatformCommand::Barriers(barriers) => SoftCommand::Barriers(
				barriers
					.iter()
					.filter_map(|barrier| match barrier {
						PlatformBarrier::Texture(resource, barrier) => Some(SoftTextureBarrier {
							resource: (*resource).clone(),
							old_layout: barrier.old_layout,
							new_layout: barrier.new_layout,
							subresource: barrier.subresource,
						}),
						PlatformBarrier::Memory(_) | PlatformBarrier::Buffer(..) => None,
					})
					.collect(),
			),
			PlatformCommand::BeginRendering {
				color_attachments,
				depth_attachment,
				..
			} => SoftCommand::BeginRendering {
				colors: color_attachments
					.iter()
					.map(|a| (a.view.clone(), a.attachment))
					.collect(),
				depth: depth_attachment.map(|a| (a.view.clone(), a.attachment)),
			},
			PlatformCommand::EndRendering => SoftCommand::EndRendering,
		})
	}
}

pub struct SoftCommandBuffer {
	recording: Vec<SoftCommand>,
	pub(crate) recorded: Arc<[SoftCommand]>,
}

impl SoftCommandBuffer {
	pub fn new() -> Self {
		Self {
			recording: Vec::new(),
			recorded: Arc::new([]),
		}
	}

	pub fn begin(&mut self) {
		self.recording.clear();
		self.recorded = Arc::new([]);
	}

	pub fn push(&mut self, command: SoftCommand) {
		self.recording.push(command);
	}

	pub fn end(&mut self) {
		self.recorded = std::mem::take(&mut self.recording).into();
	}
}

impl Default for SoftCommandBuffer {
	fn default() -> Self {
		Self::new()
	}
}

/// Executes recorded commands on host memory, reporting misuse to the validation layer.
pub struct Executor<'a> {
	validation: &'a Validation,
	pipeline: Option<SoftPipeline>,
	heaps: [SmallVec<[(SoftBindingHeap, u32); 4]>; 2],
}

fn bind_point_index(bind_point: PipelineBindPoint) -> usize {
	match bind_point {
		PipelineBindPoint::Graphics => 0,
		PipelineBindPoint::Compute => 1,
	}
}

impl<'a> Executor<'a> {
	pub fn new(validation: &'a Validation) -> Self {
		Self {
			validation,
			pipeline: None,
			heaps: Default::default(),
		}
	}

	pub fn execute(&mut self, commands: &[SoftCommand]) {
		for command in commands {
			match command {
				SoftCommand::BindPipeline(pipeline) => self.pipeline = Some(pipeline.clone()),
				SoftCommand::BindHeaps { bind_point, heaps } => {
					self.heaps[bind_point_index(*bind_point)] = heaps.clone();
				}
				SoftCommand::Draw => self.check_heaps(PipelineBindPoint::Graphics, "draw"),
				SoftCommand::Dispatch(_) => self.check_heaps(PipelineBindPoint::Compute, "dispatch"),
				SoftCommand::CopyBuffer { src, dst, region } => unsafe {
					copy_bytes(src, region.src_offset, dst, region.dst_offset, region.size);
				},
				SoftCommand::CopyBufferToTexture { src, dst, region } => {
					self.expect_layout(dst, region.mip_level, region.array_layer, TextureLayout::TransferDst, "copy");
					let size = dst.desc.subresource_size(region.mip_level);
					let offset = dst.subresource_offset(region.mip_level, region.array_layer);
					unsafe { copy_bytes(src, region.buffer_offset, dst, offset, size) };
				}
				SoftCommand::CopyTextureToBuffer { src, dst, region } => {
					self.expect_layout(src, region.mip_level, region.array_layer, TextureLayout::TransferSrc, "copy");
					let size = src.desc.subresource_size(region.mip_level);
					let offset = src.subresource_offset(region.mip_level, region.array_layer);
					unsafe { copy_bytes(src, offset, dst, region.buffer_offset, size) };
				}
				SoftCommand::CopyTexture { src, dst, region } => {
					self.expect_layout(
						src,
						region.src_mip_level,
						region.src_array_layer,
						TextureLayout::TransferSrc,
						"copy",
					);
					self.expect_layout(
						dst,
						region.dst_mip_level,
						region.dst_array_layer,
						TextureLayout::TransferDst,
						"copy",
					);
					let size = src.desc.subresource_size(region.src_mip_level) * src.desc.samples.count() as u64;
					let src_offset = src.subresource_offset(region.src_mip_level, region.src_array_layer);
					let dst_offset = dst.subresource_offset(region.dst_mip_level, region.dst_array_layer);
					unsafe { copy_bytes(src, src_offset, dst, dst_offset, size) };
				}
				SoftCommand::Barriers(barriers) => {
					for barrier in barriers {
						self.transition(barrier);
					}
				}
				SoftCommand::BeginRendering { colors, depth } => {
					for (view, attachment) in colors {
						self.begin_attachment(view, TextureLayout::RenderTarget, attachment.load_op, || {
							encode_color(view.desc.format, attachment.clear_color)
						});
					}
					if let Some((view, attachment)) = depth {
						self.begin_attachment(view, TextureLayout::DepthStencilWrite, attachment.load_op, || {
							encode_depth(view.desc.format, attachment.clear_depth, attachment.clear_stencil)
						});
					}
				}
				SoftCommand::EndRendering => {}
			}
		}
	}

	fn check_heaps(&self, bind_point: PipelineBindPoint, what: &str) {
		if !self.validation.enabled() {
			return;
		}
		let name = self.pipeline.as_ref().map_or("", |p| p.name.as_str());
		for (heap, table) in &self.heaps[bind_point_index(bind_point)] {
			if heap.info.update_after_bind {
				continue;
			}
			if let Some(slot) = heap.first_unwritten(*table) {
				self.validation.report(format!(
					"{what} with pipeline {name:?} reads descriptor {slot} of table {table} of heap {:?}, which was \
					 never written",
					heap.name
				));
			}
		}
	}

	fn expect_layout(&self, resource: &SoftResource, mip: u32, layer: u32, expected: TextureLayout, what: &str) {
		let actual = resource.layout(mip, layer);
		if actual != expected {
			self.validation.report(format!(
				"{what} accesses subresource mip {mip} layer {layer} in layout {actual:?}, expected {expected:?}"
			));
		}
	}

	fn transition(&self, barrier: &SoftTextureBarrier) {
		let resource = &barrier.resource;
		let mut layouts = resource.layouts();
		for layer in barrier.subresource.base_layer..barrier.subresource.base_layer + barrier.subresource.layer_count {
			for mip in barrier.subresource.base_mip..barrier.subresource.base_mip + barrier.subresource.mip_count {
				let Some(layout) = layouts.get_mut(resource.subresource_index(mip, layer)) else {
					continue;
				};
				if barrier.old_layout != TextureLayout::Undefined && *layout != barrier.old_layout {
					self.validation.report(format!(
						"barrier transitions mip {mip} layer {layer} from {:?}, but it is in layout {:?}",
						barrier.old_layout, *layout
					));
				}
				*layout = barrier.new_layout;
			}
		}
	}

	fn begin_attachment(
		&self,
		view: &SoftView,
		expected: TextureLayout,
		load_op: LoadOp,
		clear: impl FnOnce() -> SmallVec<[u8; 16]>,
	) {
		let resource = &view.resource;
		let range = view.desc.subresource;
		let texel = (load_op == LoadOp::Clear).then(clear);
		for layer in range.base_layer..range.base_layer + range.layer_count {
			for mip in range.base_mip..range.base_mip + range.mip_count {
				self.expect_layout(resource, mip, layer, expected, "rendering");
				if let Some(texel) = &texel {
					let size = resource.desc.subresource_size(mip) * resource.desc.samples.count() as u64;
					let offset = resource.subresource_offset(mip, layer);
					unsafe { fill_texels(resource, offset, size, texel) };
				}
			}
		}
	}
}
