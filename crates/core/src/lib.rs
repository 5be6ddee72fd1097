pub mod backing;
pub mod barrier;
pub mod binding;
pub mod command;
pub mod device;
pub mod error;
pub mod factory;
pub mod format;
pub mod memory;
pub mod pipeline;
pub mod platform;
pub mod queue;
pub mod resource;
pub mod swapchain;
pub mod sync;
pub mod view;

pub use backing::handle::*;
pub use device::{Device, DeviceLimits};
pub use error::{ResultCode, RhiError, RhiResult};
pub use factory::{Adapter, AdapterInfo, AdapterKind, AppConfig, Factory, FactoryDesc, FactoryFlags};
pub use format::Format;
pub use platform::RhiPlatform;

pub mod __private {
	pub use ash::vk::make_api_version;
}

static_assertions::assert_impl_all!(Device<platform::soft::Soft>: Send, Sync);
static_assertions::assert_impl_all!(Device<platform::ash::Ash>: Send, Sync);
static_assertions::assert_impl_all!(Factory<platform::soft::Soft>: Send, Sync, Clone);
