use crate::backing::handle::{PipelineHandle, PipelineLayoutHandle};
use crate::binding::{lookup_layout, BindingLayoutRef, ShaderStages};
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::platform::RhiPlatform;
use crate::resource::SampleCount;
use crate::view::CompareOp;
use bitflags::bitflags;
use smallvec::SmallVec;

/// Maximum total size of push constants, the minimum every backend supports.
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PushConstantRange {
	pub visibility: ShaderStages,
	pub offset: u32,
	pub size: u32,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct PipelineLayoutDesc<'a> {
	/// Binding layouts in set / table order.
	pub bindings: &'a [BindingLayoutRef],
	pub push_constant_ranges: &'a [PushConstantRange],
}

pub(crate) struct PipelineLayoutSlot<P: RhiPlatform> {
	pub native: P::PipelineLayout,
	pub binding_count: u32,
	pub bindings: SmallVec<[BindingLayoutRef; 4]>,
	pub push_constant_ranges: SmallVec<[PushConstantRange; 2]>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PipelineBindPoint {
	Graphics,
	Compute,
}

/// A single compiled shader stage. Bytecode is SPIR-V for the Vulkan backend.
#[derive(Copy, Clone, Debug)]
pub struct ShaderStageDesc<'a> {
	pub bytecode: &'a [u8],
	pub entry_point: &'a str,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum VertexStepRate {
	#[default]
	Vertex,
	Instance,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexAttribute {
	pub location: u32,
	pub format: Format,
	pub offset: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct VertexBufferLayout<'a> {
	pub stride: u32,
	pub step_rate: VertexStepRate,
	pub attributes: &'a [VertexAttribute],
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum PrimitiveTopology {
	PointList,
	LineList,
	LineStrip,
	#[default]
	TriangleList,
	TriangleStrip,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum CullMode {
	#[default]
	None,
	Front,
	Back,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum FrontFace {
	#[default]
	CounterClockwise,
	Clockwise,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum PolygonMode {
	#[default]
	Fill,
	Line,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RasterizerState {
	pub cull_mode: CullMode,
	pub front_face: FrontFace,
	pub polygon_mode: PolygonMode,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct DepthStencilState {
	pub depth_test: bool,
	pub depth_write: bool,
	pub compare: CompareOp,
}

impl Default for DepthStencilState {
	fn default() -> Self {
		Self {
			depth_test: true,
			depth_write: true,
			compare: CompareOp::Less,
		}
	}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendFactor {
	Zero,
	One,
	SrcColor,
	OneMinusSrcColor,
	DstColor,
	OneMinusDstColor,
	SrcAlpha,
	OneMinusSrcAlpha,
	DstAlpha,
	OneMinusDstAlpha,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BlendOp {
	Add,
	Subtract,
	ReverseSubtract,
	Min,
	Max,
}

bitflags! {
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
	pub struct ColorWriteMask: u8 {
		const R = 1;
		const G = 2;
		const B = 4;
		const A = 8;
		const ALL = 15;
	}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BlendState {
	pub src_color: BlendFactor,
	pub dst_color: BlendFactor,
	pub color_op: BlendOp,
	pub src_alpha: BlendFactor,
	pub dst_alpha: BlendFactor,
	pub alpha_op: BlendOp,
}

impl BlendState {
	pub const ALPHA_BLENDING: Self = Self {
		src_color: BlendFactor::SrcAlpha,
		dst_color: BlendFactor::OneMinusSrcAlpha,
		color_op: BlendOp::Add,
		src_alpha: BlendFactor::One,
		dst_alpha: BlendFactor::OneMinusSrcAlpha,
		alpha_op: BlendOp::Add,
	};
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ColorTargetState {
	pub format: Format,
	/// `None` disables blending.
	pub blend: Option<BlendState>,
	pub write_mask: ColorWriteMask,
}

impl ColorTargetState {
	pub fn new(format: Format) -> Self {
		Self {
			format,
			blend: None,
			write_mask: ColorWriteMask::ALL,
		}
	}
}

#[derive(Copy, Clone, Debug)]
pub struct GraphicsPipelineDesc<'a> {
	pub layout: PipelineLayoutHandle,
	pub vertex: ShaderStageDesc<'a>,
	pub fragment: Option<ShaderStageDesc<'a>>,
	pub vertex_buffers: &'a [VertexBufferLayout<'a>],
	pub topology: PrimitiveTopology,
	pub rasterizer: RasterizerState,
	pub depth_stencil: Option<DepthStencilState>,
	pub color_targets: &'a [ColorTargetState],
	pub depth_format: Option<Format>,
	pub samples: SampleCount,
	pub name: &'a str,
}

#[derive(Copy, Clone, Debug)]
pub struct ComputePipelineDesc<'a> {
	pub layout: PipelineLayoutHandle,
	pub compute: ShaderStageDesc<'a>,
	pub name: &'a str,
}

pub(crate) struct PipelineSlot<P: RhiPlatform> {
	pub native: P::Pipeline,
	pub layout: PipelineLayoutHandle,
	pub bind_point: PipelineBindPoint,
	pub binding_count: u32,
	pub vertex_buffer_count: u32,
	pub color_formats: SmallVec<[Format; 4]>,
	pub depth_format: Option<Format>,
}

fn validate_push_constants(ranges: &[PushConstantRange]) -> RhiResult<()> {
	for range in ranges {
		if range.size == 0 || range.size % 4 != 0 || range.offset % 4 != 0 {
			return Err(RhiError::invalid_argument(format!(
				"push constant range {range:?} must be non-empty and 4 byte aligned"
			)));
		}
		if range.offset + range.size > MAX_PUSH_CONSTANT_SIZE {
			return Err(RhiError::invalid_argument(format!(
				"push constant range {range:?} exceeds {MAX_PUSH_CONSTANT_SIZE} bytes"
			)));
		}
		if range.visibility.is_empty() {
			return Err(RhiError::invalid_argument("push constant range is not visible to any stage"));
		}
	}
	Ok(())
}

fn validate_shader_stage(stage: &ShaderStageDesc, what: &str) -> RhiResult<()> {
	if stage.bytecode.is_empty() || stage.entry_point.is_empty() {
		return Err(RhiError::invalid_argument(format!(
			"{what} shader requires bytecode and an entry point"
		)));
	}
	Ok(())
}

impl<P: RhiPlatform> Device<P> {
	pub fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> RhiResult<PipelineLayoutHandle> {
		validate_push_constants(desc.push_constant_ranges)?;
		let native = {
			let set_layouts = self.objects.set_layouts.read();
			let heap_layouts = self.objects.heap_layouts.read();
			let layouts = desc
				.bindings
				.iter()
				.map(|b| lookup_layout(&set_layouts, &heap_layouts, *b).map(|slot| &slot.native))
				.collect::<RhiResult<SmallVec<[_; 4]>>>()?;
			unsafe {
				self.platform
					.create_pipeline_layout(&layouts, desc.push_constant_ranges)?
			}
		};
		Ok(self.objects.pipeline_layouts.write().insert(PipelineLayoutSlot {
			native,
			binding_count: desc.bindings.len() as u32,
			bindings: desc.bindings.iter().copied().collect(),
			push_constant_ranges: desc.push_constant_ranges.iter().copied().collect(),
		}))
	}

	pub fn destroy_pipeline_layout(&self, layout: &mut PipelineLayoutHandle) {
		if let Some(slot) = take_slot(&self.objects.pipeline_layouts, layout) {
			unsafe { self.platform.destroy_pipeline_layout(slot.native) }
		}
	}

	pub fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<PipelineHandle> {
		profiling::function_scope!();
		validate_shader_stage(&desc.vertex, "vertex")?;
		if let Some(fragment) = &desc.fragment {
			validate_shader_stage(fragment, "fragment")?;
		}
		let max_color = self.limits().max_color_attachments as usize;
		if desc.color_targets.len() > max_color {
			return Err(RhiError::invalid_argument(format!(
				"{} color targets exceed the maximum of {max_color}",
				desc.color_targets.len()
			)));
		}
		if desc.color_targets.iter().any(|t| t.format.is_unknown() || t.format.is_depth()) {
			return Err(RhiError::invalid_argument("color targets require a color format"));
		}
		if let Some(depth) = desc.depth_format {
			if !depth.is_depth() {
				return Err(RhiError::invalid_argument(format!("{depth:?} is not a depth format")));
			}
		} else if desc.depth_stencil.is_some() {
			return Err(RhiError::invalid_argument("depth-stencil state requires a depth format"));
		}
		for (i, buffer) in desc.vertex_buffers.iter().enumerate() {
			for attribute in buffer.attributes {
				if attribute.format.is_unknown() || attribute.offset + attribute.format.block_size() > buffer.stride {
					return Err(RhiError::invalid_argument(format!(
						"vertex attribute {} does not fit into vertex buffer {i} with stride {}",
						attribute.location, buffer.stride
					)));
				}
			}
		}

		let (native, binding_count) = {
			let layouts = self.objects.pipeline_layouts.read();
			let layout = layouts.try_get(desc.layout)?;
			(
				unsafe { self.platform.create_graphics_pipeline(&layout.native, desc)? },
				layout.binding_count,
			)
		};
		Ok(self.objects.pipelines.write().insert(PipelineSlot {
			native,
			layout: desc.layout,
			bind_point: PipelineBindPoint::Graphics,
			binding_count,
			vertex_buffer_count: desc.vertex_buffers.len() as u32,
			color_formats: desc.color_targets.iter().map(|t| t.format).collect(),
			depth_format: desc.depth_format,
		}))
	}

	pub fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> RhiResult<PipelineHandle> {
		profiling::function_scope!();
		validate_shader_stage(&desc.compute, "compute")?;
		let (native, binding_count) = {
			let layouts = self.objects.pipeline_layouts.read();
			let layout = layouts.try_get(desc.layout)?;
			(
				unsafe { self.platform.create_compute_pipeline(&layout.native, desc)? },
				layout.binding_count,
			)
		};
		Ok(self.objects.pipelines.write().insert(PipelineSlot {
			native,
			layout: desc.layout,
			bind_point: PipelineBindPoint::Compute,
			binding_count,
			vertex_buffer_count: 0,
			color_formats: SmallVec::new(),
			depth_format: None,
		}))
	}

	pub fn destroy_pipeline(&self, pipeline: &mut PipelineHandle) {
		if let Some(slot) = take_slot(&self.objects.pipelines, pipeline) {
			unsafe { self.platform.destroy_pipeline(slot.native) }
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn push_constant_validation() {
		let range = |offset, size| PushConstantRange {
			visibility: ShaderStages::ALL,
			offset,
			size,
		};
		assert!(validate_push_constants(&[range(0, 16), range(16, 112)]).is_ok());
		assert!(validate_push_constants(&[range(0, 0)]).is_err());
		assert!(validate_push_constants(&[range(0, 6)]).is_err());
		assert!(validate_push_constants(&[range(64, 68)]).is_err());
	}
}
