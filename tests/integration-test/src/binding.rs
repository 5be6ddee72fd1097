#![cfg(test)]

use crate::{ash_device, soft_device, Placed};
use gpu_rhi_core::binding::{BindingHeapDesc, BindingLayoutRef, BindingRange, BindingType, BindingWrite, ShaderStages};
use gpu_rhi_core::command::BindingHeapBind;
use gpu_rhi_core::device::Device;
use gpu_rhi_core::memory::HeapType;
use gpu_rhi_core::pipeline::{ComputePipelineDesc, PipelineLayoutDesc, ShaderStageDesc};
use gpu_rhi_core::platform::soft::Soft;
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::queue::{QueueType, SubmitDesc};
use gpu_rhi_core::resource::{ResourceDesc, ResourceUsage};
use gpu_rhi_core::view::{SamplerDesc, ViewDesc, ViewType};
use gpu_rhi_core::RhiError;

fn ranges() -> [BindingRange; 3] {
	[
		BindingRange::new(BindingType::ConstantBuffer, 0, 2, ShaderStages::ALL),
		BindingRange::new(BindingType::StorageBuffer, 4, 3, ShaderStages::COMPUTE),
		BindingRange::new(BindingType::Sampler, 10, 1, ShaderStages::ALL),
	]
}

#[test]
fn test_binding_offsets_soft() -> anyhow::Result<()> {
	test_binding_offsets(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_binding_offsets_ash() -> anyhow::Result<()> {
	test_binding_offsets(&ash_device()?)
}

/// Offsets are the prefix sum of the range sizes in units of the device's descriptor stride.
fn test_binding_offsets<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let stride = device.limits().descriptor_stride;
	let mut layout = device.create_binding_heap_layout(&ranges())?;
	let info = device.binding_layout_info(layout)?;
	assert_eq!(info.slot_count, 6);
	assert!(info.update_after_bind);

	for (slot, index) in [(0, 0), (1, 1), (4, 2), (6, 4), (10, 5)] {
		let offset = device.get_binding_offset(layout, slot)?;
		assert_eq!(offset.descriptor_index(), index, "slot {slot}");
		assert_eq!(offset.get(), index * stride as u64, "slot {slot}");
	}
	assert!(matches!(device.get_binding_offset(layout, 2), Err(RhiError::InvalidArgument(_))));

	let mut heap = device.create_binding_heap(&BindingHeapDesc {
		layout: layout.into(),
		tables: 3,
		name: "offsets",
	})?;
	let table = device.heap_table_offset(heap, 2)?;
	assert_eq!(table.descriptor_index(), 12);
	let storage = table + device.get_binding_offset(layout, 4)?;
	assert_eq!(storage.element(2).descriptor_index(), 16);
	assert!(device.heap_table_offset(heap, 3).is_err());

	device.destroy_binding_heap(&mut heap);
	device.destroy_binding_heap_layout(&mut layout);
	Ok(())
}

#[test]
fn test_binding_writes_soft() -> anyhow::Result<()> {
	test_binding_writes(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_binding_writes_ash() -> anyhow::Result<()> {
	test_binding_writes(&ash_device()?)
}

fn test_binding_writes<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut layout = device.create_binding_set_layout(&ranges())?;
	let mut heap = device.create_binding_heap(&BindingHeapDesc {
		layout: layout.into(),
		tables: 2,
		name: "writes",
	})?;
	let buffer = Placed::new(
		device,
		&ResourceDesc::buffer(1024, ResourceUsage::CONSTANT_BUFFER | ResourceUsage::STORAGE_BUFFER),
		HeapType::Default,
	)?;
	let cb_size = device.limits().constant_buffer_alignment as u64;
	let mut constants = device.create_view(
		&ViewDesc::new(buffer.resource, ViewType::ConstantBuffer).with_buffer_range(0, cb_size),
	)?;
	let mut storage = device.create_view(&ViewDesc::new(buffer.resource, ViewType::StorageBuffer))?;
	let mut sampler = device.create_sampler(&SamplerDesc::LINEAR)?;

	let table = device.heap_table_offset(heap, 1)?;
	let at = |slot| -> anyhow::Result<_> { Ok(table + device.get_binding_offset(layout, slot)?) };
	device.write_binding(heap, at(1)?, BindingWrite::View(constants))?;
	device.write_binding(heap, at(4)?.element(2), BindingWrite::View(storage))?;
	device.write_binding(heap, at(10)?, BindingWrite::Sampler(sampler))?;

	// type mismatches are rejected
	assert!(matches!(
		device.write_binding(heap, at(0)?, BindingWrite::View(storage)),
		Err(RhiError::InvalidArgument(_))
	));
	assert!(matches!(
		device.write_binding(heap, at(0)?, BindingWrite::Sampler(sampler)),
		Err(RhiError::InvalidArgument(_))
	));
	// past the last table
	let past = device.heap_table_offset(heap, 1)?.element(6);
	assert!(matches!(
		device.write_binding(heap, past, BindingWrite::View(constants)),
		Err(RhiError::InvalidArgument(_))
	));

	device.destroy_sampler(&mut sampler);
	device.destroy_view(&mut constants);
	device.destroy_view(&mut storage);
	buffer.destroy(device);
	device.destroy_binding_heap(&mut heap);
	device.destroy_binding_set_layout(&mut layout);
	Ok(())
}

#[test]
fn test_overlapping_ranges_rejected() -> anyhow::Result<()> {
	let device = soft_device()?;
	let overlapping = device.create_binding_set_layout(&[
		BindingRange::new(BindingType::StorageBuffer, 0, 4, ShaderStages::ALL),
		BindingRange::new(BindingType::SampledTexture, 3, 1, ShaderStages::ALL),
	]);
	assert!(matches!(overlapping, Err(RhiError::InvalidArgument(_))));
	assert!(matches!(device.create_binding_set_layout(&[]), Err(RhiError::InvalidArgument(_))));
	Ok(())
}

/// Dispatching with a binding set that was never fully written is reported, partially populated heap layouts are not.
#[test]
fn test_unwritten_bindings_reported() -> anyhow::Result<()> {
	let device = soft_device()?;
	let soft: &Soft = device.platform();
	let ranges = [BindingRange::new(BindingType::StorageBuffer, 0, 2, ShaderStages::COMPUTE)];

	let mut queue = device.create_queue(QueueType::Compute)?;
	let mut set_layout = device.create_binding_set_layout(&ranges)?;
	let mut heap_layout = device.create_binding_heap_layout(&ranges)?;
	let mut pool = device.create_command_pool(queue)?;
	let mut fence = device.create_fence(0)?;

	for (value, layout) in [(1, BindingLayoutRef::from(set_layout)), (2, heap_layout.into())] {
		let mut pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDesc {
			bindings: &[layout],
			push_constant_ranges: &[],
		})?;
		let mut pipeline = device.create_compute_pipeline(&ComputePipelineDesc {
			layout: pipeline_layout,
			compute: ShaderStageDesc {
				bytecode: &[0; 4],
				entry_point: "main",
			},
			name: "unwritten",
		})?;
		let mut heap = device.create_binding_heap(&BindingHeapDesc {
			layout,
			tables: 1,
			name: "unwritten",
		})?;

		let cmd = device.create_command_buffer(pool)?;
		device.begin_command_buffer(cmd)?;
		device.cmd_set_pipeline(cmd, pipeline)?;
		// dispatching without bound heaps fails while recording
		assert!(matches!(device.cmd_dispatch(cmd, 1, 1, 1), Err(RhiError::InvalidState(_))));
		device.cmd_set_binding_heaps(cmd, &[BindingHeapBind { heap, table: 0 }])?;
		device.cmd_dispatch(cmd, 1, 1, 1)?;
		device.end_command_buffer(cmd)?;
		device.queue_submit(
			queue,
			&SubmitDesc {
				command_buffers: &[cmd],
				signal_fences: &[(fence, value)],
				..SubmitDesc::default()
			},
		)?;
		device.wait_for_fences(&[fence], &[value], true, u64::MAX)?;

		device.destroy_binding_heap(&mut heap);
		device.destroy_pipeline(&mut pipeline);
		device.destroy_pipeline_layout(&mut pipeline_layout);
	}

	let messages = soft.take_validation_messages();
	assert_eq!(messages.len(), 1, "{messages:?}");
	assert!(messages[0].contains("never written"), "{messages:?}");

	device.destroy_fence(&mut fence);
	device.destroy_command_pool(&mut pool);
	device.destroy_binding_set_layout(&mut set_layout);
	device.destroy_binding_heap_layout(&mut heap_layout);
	device.destroy_queue(&mut queue);
	Ok(())
}
