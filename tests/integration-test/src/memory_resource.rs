#![cfg(test)]

use crate::{ash_device, soft_device, Placed};
use gpu_rhi_core::device::Device;
use gpu_rhi_core::format::Format;
use gpu_rhi_core::memory::{HeapType, HeapUsage, MemoryDesc};
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::resource::{ResourceDesc, ResourceUsage};
use gpu_rhi_core::{ResultCode, RhiError};

#[test]
fn test_placed_resources_soft() -> anyhow::Result<()> {
	test_placed_resources(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_placed_resources_ash() -> anyhow::Result<()> {
	test_placed_resources(&ash_device()?)
}

/// Places two buffers side by side in a single upload block and checks host writes land in the right one.
fn test_placed_resources<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let desc = ResourceDesc::buffer(256, ResourceUsage::TRANSFER_SRC).with_name("placed");
	let mut first = device.create_resource(&desc)?;
	let mut second = device.create_resource(&desc)?;
	let info = device.get_resource_allocation_info(first)?;
	assert!(info.size >= 256);
	assert!(info.alignment.is_power_of_two());

	let stride = info.size.next_multiple_of(info.alignment);
	let mut memory = device.allocate_memory(&MemoryDesc {
		size: stride * 2,
		alignment: info.alignment,
		heap_type: HeapType::Upload,
		usage: HeapUsage::Buffers,
		name: "placed block",
	})?;
	assert_eq!(device.memory_size(memory)?, stride * 2);
	assert!(!device.is_resource_bound(first)?);
	device.bind_resource_memory(first, memory, 0)?;
	device.bind_resource_memory(second, memory, stride)?;
	assert!(device.is_resource_bound(second)?);

	// a resource can only be bound once
	let rebind = device.bind_resource_memory(first, memory, stride);
	assert!(matches!(rebind, Err(RhiError::InvalidState(_))), "{rebind:?}");

	device.write_resource_pod(first, 0, &[1u32; 64])?;
	device.write_resource_pod(second, 0, &[2u32; 64])?;
	let mut out = [0u8; 256];
	device.read_resource(first, 0, &mut out)?;
	assert_eq!(bytemuck::cast_slice::<u8, u32>(&out), &[1u32; 64]);
	device.read_resource(second, 0, &mut out)?;
	assert_eq!(bytemuck::cast_slice::<u8, u32>(&out), &[2u32; 64]);

	let oob = device.write_resource(first, 200, &[0; 100]);
	assert_eq!(oob.as_ref().err().map(RhiError::code), Some(ResultCode::Fail));

	device.destroy_resource(&mut first);
	device.destroy_resource(&mut second);
	assert!(first.is_invalid());
	device.free_memory(&mut memory);
	Ok(())
}

#[test]
fn test_placement_rules_soft() -> anyhow::Result<()> {
	test_placement_rules(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_placement_rules_ash() -> anyhow::Result<()> {
	test_placement_rules(&ash_device()?)
}

fn test_placement_rules<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut texture = device.create_resource(&ResourceDesc::texture_2d(
		Format::R8G8B8A8Unorm,
		64,
		64,
		ResourceUsage::SAMPLED | ResourceUsage::TRANSFER_DST,
	))?;
	let info = device.get_resource_allocation_info(texture)?;

	let allocate = |heap_type, usage, size| {
		device.allocate_memory(&MemoryDesc {
			size,
			alignment: info.alignment,
			heap_type,
			usage,
			name: "rules",
		})
	};

	// textures never live in host-visible memory
	let mut upload = allocate(HeapType::Upload, HeapUsage::Textures, info.size)?;
	assert!(matches!(
		device.bind_resource_memory(texture, upload, 0),
		Err(RhiError::InvalidArgument(_))
	));
	// the heap usage has to match the resource category
	let mut buffers = allocate(HeapType::Default, HeapUsage::Buffers, info.size)?;
	assert!(matches!(
		device.bind_resource_memory(texture, buffers, 0),
		Err(RhiError::InvalidArgument(_))
	));
	// the resource has to fit
	let mut small = allocate(HeapType::Default, HeapUsage::Textures, info.alignment)?;
	if info.size > info.alignment {
		assert!(matches!(
			device.bind_resource_memory(texture, small, 0),
			Err(RhiError::InvalidArgument(_))
		));
	}
	// the block itself must be aligned as strictly as the resource, an aligned offset alone is not enough
	let mut loosely_aligned = device.allocate_memory(&MemoryDesc {
		size: info.size * 2,
		alignment: (info.alignment / 2).max(1),
		heap_type: HeapType::Default,
		usage: HeapUsage::Textures,
		name: "loosely aligned",
	})?;
	if info.alignment > 1 {
		assert!(matches!(
			device.bind_resource_memory(texture, loosely_aligned, 0),
			Err(RhiError::InvalidArgument(_))
		));
	}
	let mut fitting = allocate(HeapType::Default, HeapUsage::Textures, info.size * 2)?;
	if info.alignment > 1 {
		assert!(matches!(
			device.bind_resource_memory(texture, fitting, 1),
			Err(RhiError::InvalidArgument(_))
		));
	}
	device.bind_resource_memory(texture, fitting, 0)?;

	// textures can not be mapped
	let mapped = unsafe { device.map_resource(texture, 0..4) };
	assert!(matches!(mapped, Err(RhiError::Unsupported(_))));

	device.destroy_resource(&mut texture);
	for memory in [&mut upload, &mut buffers, &mut small, &mut loosely_aligned, &mut fitting] {
		device.free_memory(memory);
	}
	Ok(())
}

#[test]
fn test_invalid_descs_soft() -> anyhow::Result<()> {
	test_invalid_descs(&soft_device()?)
}

fn test_invalid_descs<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let zero = device.allocate_memory(&MemoryDesc {
		size: 0,
		..MemoryDesc::default()
	});
	assert!(matches!(zero, Err(RhiError::InvalidArgument(_))));
	let misaligned = device.allocate_memory(&MemoryDesc {
		size: 1024,
		alignment: 3,
		..MemoryDesc::default()
	});
	assert!(matches!(misaligned, Err(RhiError::InvalidArgument(_))));

	let texture_usage_on_buffer = device.create_resource(&ResourceDesc::buffer(64, ResourceUsage::RENDER_TARGET));
	assert!(matches!(texture_usage_on_buffer, Err(RhiError::InvalidArgument(_))));
	let empty_texture = device.create_resource(&ResourceDesc::texture_2d(
		Format::R8G8B8A8Unorm,
		0,
		16,
		ResourceUsage::SAMPLED,
	));
	assert!(matches!(empty_texture, Err(RhiError::InvalidArgument(_))));
	Ok(())
}

#[test]
fn test_stale_handles_soft() -> anyhow::Result<()> {
	test_stale_handles(&soft_device()?)
}

/// A destroyed handle never resolves again, even after its slot got reused.
fn test_stale_handles<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut placed = Placed::new(
		device,
		&ResourceDesc::buffer(64, ResourceUsage::TRANSFER_DST),
		HeapType::Readback,
	)?;
	let stale = placed.resource;
	device.destroy_resource(&mut placed.resource);
	let reused = device.create_resource(&ResourceDesc::buffer(64, ResourceUsage::TRANSFER_DST))?;
	assert_ne!(stale, reused);

	let err = device.get_resource_allocation_info(stale).unwrap_err();
	assert_eq!(err.code(), ResultCode::NotFound);
	let err = device.bind_resource_memory(reused, gpu_rhi_core::MemoryHandle::INVALID, 0).unwrap_err();
	assert_eq!(err.code(), ResultCode::NotFound);

	let mut reused = reused;
	device.destroy_resource(&mut reused);
	device.free_memory(&mut placed.memory);
	Ok(())
}
