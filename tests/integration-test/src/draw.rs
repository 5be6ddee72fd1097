#![cfg(test)]

use crate::{ash_device, soft_device, Placed};
use gpu_rhi_core::backing::handle::{PipelineHandle, PipelineLayoutHandle};
use gpu_rhi_core::barrier::{TextureBarrier, TextureLayout};
use gpu_rhi_core::command::{
	ColorAttachment, IndexType, LoadOp, Rect, RenderingDesc, StoreOp, VertexBufferView, Viewport,
};
use gpu_rhi_core::device::Device;
use gpu_rhi_core::format::Format;
use gpu_rhi_core::memory::HeapType;
use gpu_rhi_core::pipeline::{
	ColorTargetState, DepthStencilState, GraphicsPipelineDesc, PipelineLayoutDesc, PrimitiveTopology,
	RasterizerState, ShaderStageDesc, VertexAttribute, VertexBufferLayout, VertexStepRate,
};
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::queue::{QueueType, SubmitDesc};
use gpu_rhi_core::resource::{ResourceDesc, ResourceUsage, SampleCount};
use gpu_rhi_core::view::{ViewDesc, ViewType};
use gpu_rhi_core::{ResultCode, RhiError, RhiResult};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 16;

/// SPIR-V passing a `vec3` at location 0 through to the position, with `w = 1`.
#[rustfmt::skip]
const VERTEX_SPIRV: [u32; 82] = [
	0x07230203, 0x00010000, 0, 15, 0,
	0x00020011, 1,
	0x0003000e, 0, 1,
	0x0007000f, 0, 1, 0x6e69616d, 0, 2, 3,
	0x00040047, 2, 30, 0,
	0x00040047, 3, 11, 0,
	0x00020013, 4,
	0x00030021, 5, 4,
	0x00030016, 6, 32,
	0x00040017, 7, 6, 3,
	0x00040017, 8, 6, 4,
	0x00040020, 9, 1, 7,
	0x00040020, 10, 3, 8,
	0x0004003b, 9, 2, 1,
	0x0004003b, 10, 3, 3,
	0x0004002b, 6, 11, 0x3f800000,
	0x00050036, 4, 1, 0, 5,
	0x000200f8, 12,
	0x0004003d, 7, 13, 2,
	0x00050050, 8, 14, 13, 11,
	0x0003003e, 3, 14,
	0x000100fd,
	0x00010038,
];

/// SPIR-V writing opaque white to location 0.
#[rustfmt::skip]
const FRAGMENT_SPIRV: [u32; 66] = [
	0x07230203, 0x00010000, 0, 11, 0,
	0x00020011, 1,
	0x0003000e, 0, 1,
	0x0006000f, 4, 1, 0x6e69616d, 0, 2,
	0x00030010, 1, 7,
	0x00040047, 2, 30, 0,
	0x00020013, 3,
	0x00030021, 4, 3,
	0x00030016, 5, 32,
	0x00040017, 6, 5, 4,
	0x00040020, 7, 3, 6,
	0x0004003b, 7, 2, 3,
	0x0004002b, 5, 8, 0x3f800000,
	0x0007002c, 6, 9, 8, 8, 8, 8,
	0x00050036, 3, 1, 0, 4,
	0x000200f8, 10,
	0x0003003e, 2, 9,
	0x000100fd,
	0x00010038,
];

const POSITION: [VertexAttribute; 1] = [VertexAttribute {
	location: 0,
	format: Format::R32G32B32Float,
	offset: 0,
}];

fn vertex_buffers(stride: u32) -> [VertexBufferLayout<'static>; 1] {
	[VertexBufferLayout {
		stride,
		step_rate: VertexStepRate::Vertex,
		attributes: &POSITION,
	}]
}

fn pipeline_desc<'a>(
	layout: PipelineLayoutHandle,
	vertex_buffers: &'a [VertexBufferLayout<'a>],
	color_targets: &'a [ColorTargetState],
) -> GraphicsPipelineDesc<'a> {
	GraphicsPipelineDesc {
		layout,
		vertex: ShaderStageDesc {
			bytecode: bytemuck::cast_slice(&VERTEX_SPIRV),
			entry_point: "main",
		},
		fragment: Some(ShaderStageDesc {
			bytecode: bytemuck::cast_slice(&FRAGMENT_SPIRV),
			entry_point: "main",
		}),
		vertex_buffers,
		topology: PrimitiveTopology::TriangleList,
		rasterizer: RasterizerState::default(),
		depth_stencil: None,
		color_targets,
		depth_format: None,
		samples: SampleCount::X1,
		name: "triangle",
	}
}

fn assert_invalid_state(result: RhiResult<()>, what: &str) {
	match result {
		Err(e @ RhiError::InvalidState(_)) => assert_eq!(e.code(), ResultCode::Fail, "{what}"),
		other => panic!("{what}: expected InvalidState, got {other:?}"),
	}
}

#[test]
fn test_pipeline_validation_soft() -> anyhow::Result<()> {
	test_pipeline_validation(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_pipeline_validation_ash() -> anyhow::Result<()> {
	test_pipeline_validation(&ash_device()?)
}

/// Malformed graphics pipelines are rejected before they reach the backend.
fn test_pipeline_validation<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut layout = device.create_pipeline_layout(&PipelineLayoutDesc::default())?;
	let buffers = vertex_buffers(12);
	let color = [ColorTargetState::new(Format::R8G8B8A8Unorm)];

	let no_bytecode = GraphicsPipelineDesc {
		vertex: ShaderStageDesc {
			bytecode: &[],
			entry_point: "main",
		},
		..pipeline_desc(layout, &buffers, &color)
	};
	let depth_without_format = GraphicsPipelineDesc {
		depth_stencil: Some(DepthStencilState::default()),
		..pipeline_desc(layout, &buffers, &color)
	};
	let depth_as_color = [ColorTargetState::new(Format::D32Float)];
	let narrow = vertex_buffers(8);
	for (what, desc) in [
		("empty bytecode", no_bytecode),
		("depth-stencil without depth format", depth_without_format),
		("depth color target", pipeline_desc(layout, &buffers, &depth_as_color)),
		("attribute exceeding stride", pipeline_desc(layout, &narrow, &color)),
	] {
		let result = device.create_graphics_pipeline(&desc);
		assert!(matches!(result, Err(RhiError::InvalidArgument(_))), "{what}: {result:?}");
	}

	let mut pipeline = device.create_graphics_pipeline(&pipeline_desc(layout, &buffers, &color))?;
	device.destroy_pipeline(&mut pipeline);
	device.destroy_pipeline_layout(&mut layout);
	Ok(())
}

#[test]
fn test_draw_validation_soft() -> anyhow::Result<()> {
	let device = soft_device()?;
	test_draw_validation(&device)?;
	assert_eq!(device.platform().take_validation_messages(), Vec::<String>::new());
	Ok(())
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_draw_validation_ash() -> anyhow::Result<()> {
	test_draw_validation(&ash_device()?)
}

/// Every draw precondition is checked while recording, then a draw meeting all of them is executed.
fn test_draw_validation<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut queue = device.create_queue(QueueType::Graphics)?;
	let target = Placed::new(
		device,
		&ResourceDesc::texture_2d(Format::R8G8B8A8Unorm, WIDTH, HEIGHT, ResourceUsage::RENDER_TARGET)
			.with_name("draw target"),
		HeapType::Default,
	)?;
	let mut view = device.create_view(&ViewDesc::new(target.resource, ViewType::RenderTarget))?;

	let vertices: [[f32; 3]; 3] = [[-1., -1., 0.], [3., -1., 0.], [-1., 3., 0.]];
	let indices: [u32; 3] = [0, 1, 2];
	let vertex_buffer = Placed::new(
		device,
		&ResourceDesc::buffer(std::mem::size_of_val(&vertices) as u64, ResourceUsage::VERTEX_BUFFER)
			.with_name("vertices"),
		HeapType::Upload,
	)?;
	let index_buffer = Placed::new(
		device,
		&ResourceDesc::buffer(std::mem::size_of_val(&indices) as u64, ResourceUsage::INDEX_BUFFER)
			.with_name("indices"),
		HeapType::Upload,
	)?;
	device.write_resource_pod(vertex_buffer.resource, 0, &vertices)?;
	device.write_resource_pod(index_buffer.resource, 0, &indices)?;

	let mut layout = device.create_pipeline_layout(&PipelineLayoutDesc::default())?;
	let buffers = vertex_buffers(12);
	let mut pipeline = device.create_graphics_pipeline(&pipeline_desc(
		layout,
		&buffers,
		&[ColorTargetState::new(Format::R8G8B8A8Unorm)],
	))?;
	let mut hdr_pipeline = device.create_graphics_pipeline(&pipeline_desc(
		layout,
		&buffers,
		&[ColorTargetState::new(Format::R16G16B16A16Float)],
	))?;

	let mut pool = device.create_command_pool(queue)?;
	let cmd = device.create_command_buffer(pool)?;
	device.begin_command_buffer(cmd)?;
	device.cmd_barrier(
		cmd,
		&[TextureBarrier::transition(target.resource, TextureLayout::Undefined, TextureLayout::RenderTarget).into()],
	)?;
	assert_invalid_state(device.cmd_draw(cmd, 3, 1, 0, 0), "draw outside of rendering");

	device.cmd_begin_rendering(
		cmd,
		&RenderingDesc {
			render_area: Rect::from_extent(WIDTH, HEIGHT),
			color_attachments: &[ColorAttachment {
				view,
				load_op: LoadOp::Clear,
				store_op: StoreOp::Store,
				clear_color: [0., 0., 0., 1.],
			}],
			depth_attachment: None,
		},
	)?;
	assert_invalid_state(device.cmd_draw(cmd, 3, 1, 0, 0), "draw without pipeline");
	device.cmd_set_pipeline(cmd, pipeline)?;
	assert_invalid_state(device.cmd_draw(cmd, 3, 1, 0, 0), "draw without viewport and scissor");
	device.cmd_set_viewports(cmd, &[Viewport::from_extent(WIDTH, HEIGHT)])?;
	assert_invalid_state(device.cmd_draw(cmd, 3, 1, 0, 0), "draw without scissor");
	device.cmd_set_scissors(cmd, &[Rect::from_extent(WIDTH, HEIGHT)])?;
	assert_invalid_state(device.cmd_draw(cmd, 3, 1, 0, 0), "draw without vertex buffers");
	device.cmd_set_vertex_buffers(
		cmd,
		0,
		&[VertexBufferView {
			resource: vertex_buffer.resource,
			offset: 0,
		}],
	)?;
	assert_invalid_state(device.cmd_draw_indexed(cmd, 3, 1, 0, 0, 0), "indexed draw without index buffer");

	device.cmd_set_pipeline(cmd, hdr_pipeline)?;
	assert_invalid_state(device.cmd_draw(cmd, 3, 1, 0, 0), "draw with mismatching target formats");

	// binding an index buffer that can't be used as one is rejected before recording
	assert!(matches!(
		device.cmd_set_index_buffer(cmd, vertex_buffer.resource, 0, IndexType::U32),
		Err(RhiError::InvalidArgument(_))
	));

	device.cmd_set_pipeline(cmd, pipeline)?;
	device.cmd_draw(cmd, 3, 1, 0, 0)?;
	device.cmd_set_index_buffer(cmd, index_buffer.resource, 0, IndexType::U32)?;
	device.cmd_draw_indexed(cmd, 3, 1, 0, 0, 0)?;
	device.cmd_end_rendering(cmd)?;
	device.end_command_buffer(cmd)?;

	let mut fence = device.create_fence(0)?;
	device.queue_submit(
		queue,
		&SubmitDesc {
			command_buffers: &[cmd],
			signal_fences: &[(fence, 1)],
			..SubmitDesc::default()
		},
	)?;
	device.wait_for_fences(&[fence], &[1], true, u64::MAX)?;

	device.destroy_command_pool(&mut pool);
	device.destroy_fence(&mut fence);
	device.destroy_pipeline(&mut pipeline);
	device.destroy_pipeline(&mut hdr_pipeline);
	device.destroy_pipeline_layout(&mut layout);
	device.destroy_view(&mut view);
	vertex_buffer.destroy(device);
	index_buffer.destroy(device);
	target.destroy(device);
	device.destroy_queue(&mut queue);
	Ok(())
}

/// A pipeline handle that was destroyed can't be bound.
#[test]
fn test_destroyed_pipeline_rejected() -> anyhow::Result<()> {
	let device = soft_device()?;
	let mut queue = device.create_queue(QueueType::Graphics)?;
	let mut layout = device.create_pipeline_layout(&PipelineLayoutDesc::default())?;
	let buffers = vertex_buffers(12);
	let mut pipeline = device.create_graphics_pipeline(&pipeline_desc(
		layout,
		&buffers,
		&[ColorTargetState::new(Format::R8G8B8A8Unorm)],
	))?;
	let stale: PipelineHandle = pipeline;
	device.destroy_pipeline(&mut pipeline);

	let mut pool = device.create_command_pool(queue)?;
	let cmd = device.create_command_buffer(pool)?;
	device.begin_command_buffer(cmd)?;
	let err = device.cmd_set_pipeline(cmd, stale).unwrap_err();
	assert_eq!(err.code(), ResultCode::NotFound);

	device.destroy_command_pool(&mut pool);
	device.destroy_pipeline_layout(&mut layout);
	device.destroy_queue(&mut queue);
	Ok(())
}
