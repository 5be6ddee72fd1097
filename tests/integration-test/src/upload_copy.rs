#![cfg(test)]

use crate::{ash_device, soft_device, Placed};
use gpu_rhi_core::barrier::{Access, BufferBarrier, PipelineStages, TextureBarrier, TextureLayout};
use gpu_rhi_core::command::{BufferCopyRegion, BufferTextureCopyRegion, CommandBufferState};
use gpu_rhi_core::device::Device;
use gpu_rhi_core::format::Format;
use gpu_rhi_core::memory::HeapType;
use gpu_rhi_core::platform::soft::{ExecutionMode, Soft};
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::queue::{QueueType, SubmitDesc};
use gpu_rhi_core::resource::{ResourceDesc, ResourceUsage};
use gpu_rhi_core::RhiError;

#[test]
fn test_upload_round_trip_soft() -> anyhow::Result<()> {
	test_upload_round_trip(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_upload_round_trip_ash() -> anyhow::Result<()> {
	test_upload_round_trip(&ash_device()?)
}

/// Uploads texels through a staging buffer into mip 1 of a device local texture, then reads them back through a
/// device local buffer.
fn test_upload_round_trip<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	// mip 1 of 16x16 is 8x8 texels of 4 bytes
	const MIP_BYTES: u64 = 8 * 8 * 4;
	let texels = (0..MIP_BYTES as u32 / 4).collect::<Vec<u32>>();

	let mut queue = device.create_queue(QueueType::Transfer)?;
	let staging = Placed::new(
		device,
		&ResourceDesc::buffer(MIP_BYTES, ResourceUsage::TRANSFER_SRC).with_name("staging"),
		HeapType::Upload,
	)?;
	let texture = Placed::new(
		device,
		&ResourceDesc::texture_2d(
			Format::R32Uint,
			16,
			16,
			ResourceUsage::TRANSFER_SRC | ResourceUsage::TRANSFER_DST | ResourceUsage::SAMPLED,
		)
		.with_mip_levels(2)
		.with_name("texture"),
		HeapType::Default,
	)?;
	let local = Placed::new(
		device,
		&ResourceDesc::buffer(MIP_BYTES, ResourceUsage::TRANSFER_SRC | ResourceUsage::TRANSFER_DST)
			.with_name("local"),
		HeapType::Default,
	)?;
	let readback = Placed::new(
		device,
		&ResourceDesc::buffer(MIP_BYTES, ResourceUsage::TRANSFER_DST).with_name("readback"),
		HeapType::Readback,
	)?;
	device.write_resource_pod(staging.resource, 0, &texels)?;

	let mut pool = device.create_command_pool(queue)?;
	let cmd = device.create_command_buffer(pool)?;
	let mip = BufferTextureCopyRegion {
		mip_level: 1,
		..BufferTextureCopyRegion::default()
	};
	device.begin_command_buffer(cmd)?;
	device.cmd_barrier(
		cmd,
		&[TextureBarrier::transition(texture.resource, TextureLayout::Undefined, TextureLayout::TransferDst).into()],
	)?;
	device.cmd_copy_buffer_to_texture(cmd, staging.resource, texture.resource, mip)?;
	device.cmd_barrier(
		cmd,
		&[TextureBarrier::transition(texture.resource, TextureLayout::TransferDst, TextureLayout::TransferSrc).into()],
	)?;
	device.cmd_copy_texture_to_buffer(cmd, texture.resource, local.resource, mip)?;
	device.cmd_barrier(
		cmd,
		&[BufferBarrier {
			resource: local.resource,
			src_stages: PipelineStages::TRANSFER,
			src_access: Access::TRANSFER_WRITE,
			dst_stages: PipelineStages::TRANSFER,
			dst_access: Access::TRANSFER_READ,
		}
		.into()],
	)?;
	device.cmd_copy_buffer(
		cmd,
		local.resource,
		readback.resource,
		BufferCopyRegion {
			src_offset: 0,
			dst_offset: 0,
			size: MIP_BYTES,
		},
	)?;
	device.end_command_buffer(cmd)?;
	assert_eq!(device.command_buffer_state(cmd)?, CommandBufferState::Executable);

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

	let mut out = vec![0u32; texels.len()];
	device.read_resource(readback.resource, 0, bytemuck::cast_slice_mut(&mut out))?;
	assert_eq!(out, texels);

	device.destroy_command_pool(&mut pool);
	device.destroy_fence(&mut fence);
	for placed in [staging, texture, local, readback] {
		placed.destroy(device);
	}
	device.destroy_queue(&mut queue);
	Ok(())
}

#[test]
fn test_copy_validation_soft() -> anyhow::Result<()> {
	test_copy_validation(&soft_device()?)
}

fn test_copy_validation<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut queue = device.create_queue(QueueType::Graphics)?;
	let buffer = Placed::new(
		device,
		&ResourceDesc::buffer(256, ResourceUsage::TRANSFER_SRC | ResourceUsage::TRANSFER_DST),
		HeapType::Default,
	)?;
	let read_only = Placed::new(
		device,
		&ResourceDesc::buffer(256, ResourceUsage::TRANSFER_SRC),
		HeapType::Default,
	)?;
	let mut pool = device.create_command_pool(queue)?;
	let cmd = device.create_command_buffer(pool)?;

	let region = |src_offset, dst_offset, size| BufferCopyRegion {
		src_offset,
		dst_offset,
		size,
	};
	// recording requires begin
	assert!(matches!(
		device.cmd_copy_buffer(cmd, read_only.resource, buffer.resource, region(0, 0, 64)),
		Err(RhiError::InvalidState(_))
	));
	device.begin_command_buffer(cmd)?;
	assert!(matches!(
		device.cmd_copy_buffer(cmd, buffer.resource, read_only.resource, region(0, 0, 64)),
		Err(RhiError::InvalidArgument(_))
	));
	assert!(matches!(
		device.cmd_copy_buffer(cmd, read_only.resource, buffer.resource, region(0, 200, 64)),
		Err(RhiError::InvalidArgument(_))
	));
	assert!(matches!(
		device.cmd_copy_buffer(cmd, buffer.resource, buffer.resource, region(0, 32, 64)),
		Err(RhiError::InvalidArgument(_))
	));
	device.cmd_copy_buffer(cmd, buffer.resource, buffer.resource, region(0, 64, 64))?;
	// a failed command leaves the command buffer recording
	assert_eq!(device.command_buffer_state(cmd)?, CommandBufferState::Recording);
	device.end_command_buffer(cmd)?;
	assert!(matches!(device.begin_command_buffer(cmd), Err(RhiError::InvalidState(_))));

	device.destroy_command_pool(&mut pool);
	buffer.destroy(device);
	read_only.destroy(device);
	device.destroy_queue(&mut queue);
	Ok(())
}

/// A pool can only be reset once the queue finished everything recorded from it.
#[test]
fn test_pool_reset_in_flight() -> anyhow::Result<()> {
	let device = soft_device()?;
	let soft: &Soft = device.platform();
	soft.set_execution_mode(ExecutionMode::Deferred);

	let mut queue = device.create_queue(QueueType::Graphics)?;
	let mut pool = device.create_command_pool(queue)?;
	let cmd = device.create_command_buffer(pool)?;
	assert_eq!(device.command_buffer_state(cmd)?, CommandBufferState::Initial);
	device.begin_command_buffer(cmd)?;
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
	assert!(matches!(device.reset_command_pool(pool), Err(RhiError::NotReady)));
	assert_eq!(device.command_buffer_state(cmd)?, CommandBufferState::Executable);

	device.wait_for_fences(&[fence], &[1], true, u64::MAX)?;
	device.reset_command_pool(pool)?;
	assert_eq!(device.command_buffer_state(cmd)?, CommandBufferState::Initial);
	device.begin_command_buffer(cmd)?;
	device.end_command_buffer(cmd)?;

	device.destroy_fence(&mut fence);
	device.destroy_command_pool(&mut pool);
	device.destroy_queue(&mut queue);
	Ok(())
}
