use gpu_rhi_core::app_config_from_cargo;
use gpu_rhi_core::backing::handle::{MemoryHandle, ResourceHandle};
use gpu_rhi_core::device::Device;
use gpu_rhi_core::factory::{Factory, FactoryDesc, FactoryFlags};
use gpu_rhi_core::memory::{HeapType, MemoryDesc};
use gpu_rhi_core::platform::ash::Ash;
use gpu_rhi_core::platform::soft::Soft;
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::resource::ResourceDesc;
use gpu_rhi_core::RhiResult;

pub mod binding;
pub mod clear_readback;
pub mod draw;
pub mod factory;
pub mod frame_pacing;
pub mod memory_resource;
pub mod sync;
pub mod upload_copy;

/// the global setting on which debug flags to use for integration tests, overridable with `GPU_RHI_DEBUG`
pub fn debug_flags() -> FactoryFlags {
	FactoryFlags::from_env_or(FactoryFlags::VALIDATION)
}

fn init_logger() {
	// multiple tests share the process, only the first one installs the logger
	let _ = env_logger::builder().is_test(true).try_init();
}

pub fn create_device<P: RhiPlatform>() -> RhiResult<Device<P>> {
	init_logger();
	let factory = Factory::<P>::new(&FactoryDesc {
		flags: debug_flags(),
		app: app_config_from_cargo!(),
		display_handle: None,
	})?;
	let adapter = factory
		.preferred_adapter()
		.ok_or_else(|| gpu_rhi_core::RhiError::Unsupported("no adapter available".to_string()))?
		.index;
	factory.create_device(adapter)
}

pub fn soft_device() -> RhiResult<Device<Soft>> {
	create_device::<Soft>()
}

pub fn ash_device() -> RhiResult<Device<Ash>> {
	create_device::<Ash>()
}

/// A resource bound to the start of its own dedicated memory block.
pub struct Placed {
	pub resource: ResourceHandle,
	pub memory: MemoryHandle,
}

impl Placed {
	pub fn new<P: RhiPlatform>(device: &Device<P>, desc: &ResourceDesc, heap_type: HeapType) -> RhiResult<Self> {
		let mut resource = device.create_resource(desc)?;
		let result = (|| {
			let info = device.get_resource_allocation_info(resource)?;
			let memory = device.allocate_memory(&MemoryDesc {
				size: info.size,
				alignment: info.alignment,
				heap_type,
				usage: desc.heap_usage(),
				name: desc.name,
			})?;
			if let Err(e) = device.bind_resource_memory(resource, memory, 0) {
				let mut memory = memory;
				device.free_memory(&mut memory);
				return Err(e);
			}
			Ok(memory)
		})();
		match result {
			Ok(memory) => Ok(Self { resource, memory }),
			Err(e) => {
				device.destroy_resource(&mut resource);
				Err(e)
			}
		}
	}

	pub fn destroy<P: RhiPlatform>(mut self, device: &Device<P>) {
		device.destroy_resource(&mut self.resource);
		device.free_memory(&mut self.memory);
	}
}
