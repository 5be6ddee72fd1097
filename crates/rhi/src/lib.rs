/// The primary platform is Ash
#[cfg(all(feature = "ash", not(feature = "soft")))]
pub type P = gpu_rhi_core::platform::ash::Ash;
/// The primary platform is the CPU-emulated soft platform
#[cfg(all(feature = "soft", not(feature = "ash")))]
pub type P = gpu_rhi_core::platform::soft::Soft;
#[cfg(all(feature = "ash", feature = "soft"))]
compile_error!("The \"ash\" and \"soft\" platforms are mutually exclusive, enable exactly one of them");
#[cfg(not(any(feature = "ash", feature = "soft")))]
compile_error!("Must select a primary platform by enabling a feature like \"ash\" or \"soft\"");

pub type Factory = gpu_rhi_core::factory::Factory<P>;
pub type Device = gpu_rhi_core::device::Device<P>;

pub use gpu_rhi_core::app_config_from_cargo;
pub use gpu_rhi_core::{
	Adapter, AdapterInfo, AdapterKind, AppConfig, DeviceLimits, FactoryDesc, FactoryFlags, Format, ResultCode, RhiError,
	RhiResult,
};
pub use gpu_rhi_core::backing::handle::*;

pub mod backing {
	pub use gpu_rhi_core::backing::*;
}

pub mod barrier {
	pub use gpu_rhi_core::barrier::*;
}

pub mod binding {
	pub use gpu_rhi_core::binding::*;
}

pub mod command {
	pub use gpu_rhi_core::command::*;
}

pub mod error {
	pub use gpu_rhi_core::error::*;
}

pub mod factory {
	pub use gpu_rhi_core::factory::*;
}

pub mod format {
	pub use gpu_rhi_core::format::*;
}

pub mod memory {
	pub use gpu_rhi_core::memory::*;
}

pub mod pipeline {
	pub use gpu_rhi_core::pipeline::*;
}

pub mod platform {
	pub use gpu_rhi_core::platform::*;
}

pub mod queue {
	pub use gpu_rhi_core::queue::*;
}

pub mod resource {
	pub use gpu_rhi_core::resource::*;
}

pub mod swapchain {
	pub use gpu_rhi_core::swapchain::*;
}

pub mod sync {
	pub use gpu_rhi_core::sync::*;
}

pub mod view {
	pub use gpu_rhi_core::view::*;
}
