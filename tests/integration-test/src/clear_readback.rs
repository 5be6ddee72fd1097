#![cfg(test)]

use crate::{ash_device, soft_device, Placed};
use gpu_rhi_core::barrier::{TextureBarrier, TextureLayout};
use gpu_rhi_core::command::{BufferTextureCopyRegion, ColorAttachment, LoadOp, Rect, RenderingDesc, StoreOp};
use gpu_rhi_core::device::Device;
use gpu_rhi_core::format::Format;
use gpu_rhi_core::memory::HeapType;
use gpu_rhi_core::platform::soft::Soft;
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::queue::{QueueType, SubmitDesc};
use gpu_rhi_core::resource::{ResourceDesc, ResourceUsage};
use gpu_rhi_core::view::{ViewDesc, ViewType};

const WIDTH: u32 = 8;
const HEIGHT: u32 = 4;

#[test]
fn test_clear_readback_soft() -> anyhow::Result<()> {
	let device = soft_device()?;
	let texels = test_clear_readback(&device, TextureLayout::RenderTarget)?;
	assert!(texels.iter().all(|t| *t == [255, 0, 128, 255]), "{texels:?}");
	assert_eq!(device.platform().take_validation_messages(), Vec::<String>::new());
	Ok(())
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_clear_readback_ash() -> anyhow::Result<()> {
	let texels = test_clear_readback(&ash_device()?, TextureLayout::RenderTarget)?;
	assert!(texels.iter().all(|t| *t == [255, 0, 128, 255]), "{texels:?}");
	Ok(())
}

/// Rendering into a texture that was never transitioned is only detectable during execution.
#[test]
fn test_clear_wrong_layout_is_reported() -> anyhow::Result<()> {
	let device = soft_device()?;
	test_clear_readback(&device, TextureLayout::General)?;
	let soft: &Soft = device.platform();
	let messages = soft.take_validation_messages();
	assert!(
		messages.iter().any(|m| m.contains("rendering") && m.contains("General")),
		"{messages:?}"
	);
	Ok(())
}

/// Clears a render target, copies it into a readback buffer and returns its texels.
fn test_clear_readback<P: RhiPlatform>(
	device: &Device<P>,
	render_layout: TextureLayout,
) -> anyhow::Result<Vec<[u8; 4]>> {
	let mut queue = device.create_queue(QueueType::Graphics)?;
	let target = Placed::new(
		device,
		&ResourceDesc::texture_2d(
			Format::R8G8B8A8Unorm,
			WIDTH,
			HEIGHT,
			ResourceUsage::RENDER_TARGET | ResourceUsage::TRANSFER_SRC,
		)
		.with_name("clear target"),
		HeapType::Default,
	)?;
	let readback = Placed::new(
		device,
		&ResourceDesc::buffer((WIDTH * HEIGHT * 4) as u64, ResourceUsage::TRANSFER_DST).with_name("readback"),
		HeapType::Readback,
	)?;
	let mut view = device.create_view(&ViewDesc::new(target.resource, ViewType::RenderTarget))?;

	let mut pool = device.create_command_pool(queue)?;
	let cmd = device.create_command_buffer(pool)?;
	device.begin_command_buffer(cmd)?;
	device.cmd_barrier(
		cmd,
		&[TextureBarrier::transition(target.resource, TextureLayout::Undefined, render_layout).into()],
	)?;
	device.cmd_begin_rendering(
		cmd,
		&RenderingDesc {
			render_area: Rect::from_extent(WIDTH, HEIGHT),
			color_attachments: &[ColorAttachment {
				view,
				load_op: LoadOp::Clear,
				store_op: StoreOp::Store,
				clear_color: [1., 0., 128. / 255., 1.],
			}],
			depth_attachment: None,
		},
	)?;
	device.cmd_end_rendering(cmd)?;
	device.cmd_barrier(
		cmd,
		&[TextureBarrier::transition(target.resource, render_layout, TextureLayout::TransferSrc).into()],
	)?;
	device.cmd_copy_texture_to_buffer(
		cmd,
		target.resource,
		readback.resource,
		BufferTextureCopyRegion::default(),
	)?;
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

	let mut bytes = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
	device.read_resource(readback.resource, 0, &mut bytes)?;
	let texels = bytemuck::cast_slice::<u8, [u8; 4]>(&bytes).to_vec();

	device.destroy_command_pool(&mut pool);
	device.destroy_fence(&mut fence);
	device.destroy_view(&mut view);
	target.destroy(device);
	readback.destroy(device);
	device.destroy_queue(&mut queue);
	Ok(texels)
}
