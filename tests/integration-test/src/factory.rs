#![cfg(test)]

use crate::debug_flags;
use gpu_rhi_core::app_config_from_cargo;
use gpu_rhi_core::factory::{Factory, FactoryDesc};
use gpu_rhi_core::platform::ash::Ash;
use gpu_rhi_core::platform::soft::Soft;
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::ResultCode;

#[test]
fn test_adapter_lookup_soft() -> anyhow::Result<()> {
	test_adapter_lookup::<Soft>()
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_adapter_lookup_ash() -> anyhow::Result<()> {
	test_adapter_lookup::<Ash>()
}

fn test_adapter_lookup<P: RhiPlatform>() -> anyhow::Result<()> {
	let factory = Factory::<P>::new(&FactoryDesc {
		flags: debug_flags(),
		app: app_config_from_cargo!(),
		display_handle: None,
	})?;
	let adapters = factory.enumerate_adapters();
	assert!(!adapters.is_empty());
	for (i, adapter) in adapters.iter().enumerate() {
		assert_eq!(adapter.index, i);
	}

	let missing = factory.create_device(adapters.len());
	assert_eq!(missing.err().map(|e| e.code()), Some(ResultCode::NotFound));
	let device = factory.create_device(adapters.len() - 1)?;
	assert_eq!(device.adapter().index, adapters.len() - 1);
	Ok(())
}
