use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, ShaderStageDesc};
use crate::platform::ash::Ash;
use ash::vk::{
	ColorComponentFlags, ComputePipelineCreateInfo, DynamicState, GraphicsPipelineCreateInfo, Pipeline,
	PipelineColorBlendAttachmentState, PipelineColorBlendStateCreateInfo, PipelineDepthStencilStateCreateInfo,
	PipelineDynamicStateCreateInfo, PipelineInputAssemblyStateCreateInfo, PipelineLayout,
	PipelineMultisampleStateCreateInfo, PipelineRasterizationStateCreateInfo, PipelineRenderingCreateInfo,
	PipelineShaderStageCreateInfo, PipelineVertexInputStateCreateInfo, PipelineViewportStateCreateInfo,
	ShaderModule, ShaderModuleCreateInfo, ShaderStageFlags, VertexInputAttributeDescription,
	VertexInputBindingDescription,
};
use smallvec::SmallVec;
use std::ffi::CString;
use std::io::Cursor;

/// A shader module and its entry point, destroyed once the pipeline using it has been created.
struct ShaderStage {
	module: ShaderModule,
	entry_point: CString,
	stage: ShaderStageFlags,
}

impl Ash {
	unsafe fn create_shader_stage(&self, desc: &ShaderStageDesc, stage: ShaderStageFlags) -> RhiResult<ShaderStage> {
		unsafe {
			let code = ash::util::read_spv(&mut Cursor::new(desc.bytecode))
				.map_err(|e| RhiError::InvalidArgument(format!("shader bytecode is not valid SPIR-V: {e}")))?;
			let entry_point = CString::new(desc.entry_point).map_err(|_| {
				RhiError::InvalidArgument(format!("entry point {:?} contains a nul byte", desc.entry_point))
			})?;
			let module = self
				.device
				.create_shader_module(&ShaderModuleCreateInfo::default().code(&code), None)?;
			Ok(ShaderStage {
				module,
				entry_point,
				stage,
			})
		}
	}

	unsafe fn destroy_shader_stages(&self, stages: &[ShaderStage]) {
		unsafe {
			for stage in stages {
				self.device.destroy_shader_module(stage.module, None);
			}
		}
	}

	pub unsafe fn create_graphics_pipeline_native(
		&self,
		layout: PipelineLayout,
		desc: &GraphicsPipelineDesc,
	) -> RhiResult<Pipeline> {
		unsafe {
			let mut stages = SmallVec::<[ShaderStage; 2]>::new();
			let result = (|| {
				stages.push(self.create_shader_stage(&desc.vertex, ShaderStageFlags::VERTEX)?);
				if let Some(fragment) = &desc.fragment {
					stages.push(self.create_shader_stage(fragment, ShaderStageFlags::FRAGMENT)?);
				}
				self.build_graphics_pipeline(layout, desc, &stages)
			})();
			self.destroy_shader_stages(&stages);
			result
		}
	}

	unsafe fn build_graphics_pipeline(
		&self,
		layout: PipelineLayout,
		desc: &GraphicsPipelineDesc,
		stages: &[ShaderStage],
	) -> RhiResult<Pipeline> {
		unsafe {
			let stage_infos = stages
				.iter()
				.map(|s| {
					PipelineShaderStageCreateInfo::default()
						.stage(s.stage)
						.module(s.module)
						.name(&s.entry_point)
				})
				.collect::<SmallVec<[_; 2]>>();

			let bindings = desc
				.vertex_buffers
				.iter()
				.enumerate()
				.map(|(i, buffer)| VertexInputBindingDescription {
					binding: i as u32,
					stride: buffer.stride,
					input_rate: buffer.step_rate.to_ash(),
				})
				.collect::<SmallVec<[_; 4]>>();
			let attributes = desc
				.vertex_buffers
				.iter()
				.enumerate()
				.flat_map(|(i, buffer)| {
					buffer.attributes.iter().map(move |attribute| VertexInputAttributeDescription {
						location: attribute.location,
						binding: i as u32,
						format: attribute.format.to_ash(),
						offset: attribute.offset,
					})
				})
				.collect::<SmallVec<[_; 8]>>();

			let rasterizer = &desc.rasterizer;
			let depth_stencil = desc.depth_stencil.unwrap_or_default();
			let depth_enabled = desc.depth_stencil.is_some();
			let blend_attachments = desc
				.color_targets
				.iter()
				.map(|target| {
					let attachment = PipelineColorBlendAttachmentState::default()
						.color_write_mask(target.write_mask.to_ash() & ColorComponentFlags::RGBA);
					match &target.blend {
						None => attachment.blend_enable(false),
						Some(blend) => attachment
							.blend_enable(true)
							.src_color_blend_factor(blend.src_color.to_ash())
							.dst_color_blend_factor(blend.dst_color.to_ash())
							.color_blend_op(blend.color_op.to_ash())
							.src_alpha_blend_factor(blend.src_alpha.to_ash())
							.dst_alpha_blend_factor(blend.dst_alpha.to_ash())
							.alpha_blend_op(blend.alpha_op.to_ash()),
					}
				})
				.collect::<SmallVec<[_; 4]>>();
			let color_formats = desc
				.color_targets
				.iter()
				.map(|target| target.format.to_ash())
				.collect::<SmallVec<[_; 4]>>();
			let depth_format = desc.depth_format.unwrap_or(Format::Unknown);
			let stencil_format = if depth_format.has_stencil() {
				depth_format
			} else {
				Format::Unknown
			};

			let pipelines = self
				.device
				.create_graphics_pipelines(
					self.cache,
					&[GraphicsPipelineCreateInfo::default()
						.stages(&stage_infos)
						.vertex_input_state(
							&PipelineVertexInputStateCreateInfo::default()
								.vertex_binding_descriptions(&bindings)
								.vertex_attribute_descriptions(&attributes),
						)
						.input_assembly_state(
							&PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology.to_ash()),
						)
						.viewport_state(
							&PipelineViewportStateCreateInfo::default()
								.viewport_count(1)
								.scissor_count(1),
						)
						.rasterization_state(
							&PipelineRasterizationStateCreateInfo::default()
								.polygon_mode(rasterizer.polygon_mode.to_ash())
								.cull_mode(rasterizer.cull_mode.to_ash())
								.front_face(rasterizer.front_face.to_ash())
								.line_width(1.),
						)
						.multisample_state(
							&PipelineMultisampleStateCreateInfo::default()
								.rasterization_samples(desc.samples.to_ash_sample_count_flags()),
						)
						.depth_stencil_state(
							&PipelineDepthStencilStateCreateInfo::default()
								.depth_test_enable(depth_enabled && depth_stencil.depth_test)
								.depth_write_enable(depth_enabled && depth_stencil.depth_write)
								.depth_compare_op(depth_stencil.compare.to_ash()),
						)
						.color_blend_state(&PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments))
						.dynamic_state(
							&PipelineDynamicStateCreateInfo::default()
								.dynamic_states(&[DynamicState::VIEWPORT, DynamicState::SCISSOR]),
						)
						.layout(layout)
						.push_next(
							&mut PipelineRenderingCreateInfo::default()
								.color_attachment_formats(&color_formats)
								.depth_attachment_format(depth_format.to_ash())
								.stencil_attachment_format(stencil_format.to_ash()),
						)],
					None,
				)
				.map_err(|(_, e)| e)?;
			let pipeline = pipelines.into_iter().next().ok_or_else(|| RhiError::Backend {
				backend: "ash",
				message: "vkCreateGraphicsPipelines returned no pipeline".to_string(),
			})?;
			if let Err(e) = self.set_debug_object_name(pipeline, desc.name) {
				log::warn!("failed to name pipeline {:?}: {e}", desc.name);
			}
			Ok(pipeline)
		}
	}

	pub unsafe fn create_compute_pipeline_native(
		&self,
		layout: PipelineLayout,
		desc: &ComputePipelineDesc,
	) -> RhiResult<Pipeline> {
		unsafe {
			let stage = self.create_shader_stage(&desc.compute, ShaderStageFlags::COMPUTE)?;
			let result = self
				.device
				.create_compute_pipelines(
					self.cache,
					&[ComputePipelineCreateInfo::default()
						.stage(
							PipelineShaderStageCreateInfo::default()
								.stage(stage.stage)
								.module(stage.module)
								.name(&stage.entry_point),
						)
						.layout(layout)],
					None,
				)
				.map_err(|(_, e)| RhiError::from(e));
			self.destroy_shader_stages(std::slice::from_ref(&stage));
			let pipeline = result?.into_iter().next().ok_or_else(|| RhiError::Backend {
				backend: "ash",
				message: "vkCreateComputePipelines returned no pipeline".to_string(),
			})?;
			if let Err(e) = self.set_debug_object_name(pipeline, desc.name) {
				log::warn!("failed to name pipeline {:?}: {e}", desc.name);
			}
			Ok(pipeline)
		}
	}
}
