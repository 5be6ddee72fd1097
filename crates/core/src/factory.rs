use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::platform::RhiPlatform;
use bitflags::bitflags;
use raw_window_handle::RawDisplayHandle;
use std::sync::Arc;

bitflags! {
	/// Debug and validation toggles applied when creating a [`Factory`].
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
	pub struct FactoryFlags: u32 {
		/// Enable the backend's validation layer.
		const VALIDATION = 1;
		/// Enable GPU-assisted validation, implies [`Self::VALIDATION`].
		const GPU_VALIDATION = 2;
		/// Enable shader debug printf, implies [`Self::VALIDATION`].
		const DEBUG_PRINTF = 4;
		/// Prepare the process for a RenderDoc capture.
		const RENDERDOC = 8;
	}
}

pub const DEBUG_ENV_VAR: &str = "GPU_RHI_DEBUG";

impl FactoryFlags {
	/// Parses a comma separated list of `none`, `validation`, `gpu`, `printf` and `renderdoc`.
	pub fn parse(input: &str) -> RhiResult<Self> {
		input
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.try_fold(FactoryFlags::empty(), |flags, s| {
				Ok(flags
					| match s.to_ascii_lowercase().as_str() {
						"none" => FactoryFlags::empty(),
						"validation" => FactoryFlags::VALIDATION,
						"gpu" => FactoryFlags::GPU_VALIDATION,
						"printf" => FactoryFlags::DEBUG_PRINTF,
						"renderdoc" => FactoryFlags::RENDERDOC,
						other => {
							return Err(RhiError::invalid_argument(format!(
								"unknown {DEBUG_ENV_VAR} entry {other:?}"
							)));
						}
					})
			})
	}

	/// Reads [`DEBUG_ENV_VAR`], falling back to `default` if it is unset or malformed.
	pub fn from_env_or(default: FactoryFlags) -> Self {
		match std::env::var(DEBUG_ENV_VAR) {
			Ok(value) => Self::parse(&value).unwrap_or_else(|e| {
				log::warn!("ignoring {DEBUG_ENV_VAR}: {e}");
				default
			}),
			Err(_) => default,
		}
	}

	pub fn validation_enabled(&self) -> bool {
		self.intersects(FactoryFlags::VALIDATION | FactoryFlags::GPU_VALIDATION | FactoryFlags::DEBUG_PRINTF)
	}
}

#[derive(Copy, Clone, Debug)]
pub struct AppConfig {
	pub name: &'static str,
	pub version: u32,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			name: "Unknown App",
			version: 0,
		}
	}
}

pub const fn compile_time_parse(input: &'static str) -> u32 {
	match konst::primitive::parse_u32(input) {
		Ok(e) => e,
		Err(_) => unreachable!(),
	}
}

/// Creates an [`AppConfig`] from the cargo package name and version of the calling crate.
#[macro_export]
macro_rules! app_config_from_cargo {
	() => {
		$crate::factory::AppConfig {
			name: env!("CARGO_PKG_NAME"),
			version: $crate::__private::make_api_version(
				0,
				$crate::factory::compile_time_parse(env!("CARGO_PKG_VERSION_MAJOR")),
				$crate::factory::compile_time_parse(env!("CARGO_PKG_VERSION_MINOR")),
				$crate::factory::compile_time_parse(env!("CARGO_PKG_VERSION_PATCH")),
			),
		}
	};
}

#[derive(Copy, Clone, Debug, Default)]
pub struct FactoryDesc {
	pub flags: FactoryFlags,
	pub app: AppConfig,
	/// The display windows will be created on. Required for backends that need surface support enabled up front.
	pub display_handle: Option<RawDisplayHandle>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AdapterKind {
	Discrete,
	Integrated,
	Virtual,
	Cpu,
	Other,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdapterInfo {
	pub name: String,
	pub vendor_id: u32,
	pub device_id: u32,
	pub kind: AdapterKind,
	pub dedicated_video_memory: u64,
}

/// A physical GPU (or emulated one) discovered by a [`Factory`]. Adapters are identified by their index into
/// [`Factory::enumerate_adapters`] and stay valid for the lifetime of the factory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Adapter {
	pub index: usize,
	pub info: AdapterInfo,
}

pub(crate) struct FactoryInner<P: RhiPlatform> {
	pub adapters: Vec<Adapter>,
	pub native_adapters: Vec<P::Adapter>,
	pub desc: FactoryDesc,
	// dropped last
	pub instance: P::Instance,
}

// RawDisplayHandle is only read during instance creation
unsafe impl<P: RhiPlatform> Send for FactoryInner<P> {}
unsafe impl<P: RhiPlatform> Sync for FactoryInner<P> {}

/// Entry point of the API: owns the backend instance and the list of adapters.
pub struct Factory<P: RhiPlatform> {
	inner: Arc<FactoryInner<P>>,
}

impl<P: RhiPlatform> Clone for Factory<P> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<P: RhiPlatform> Factory<P> {
	pub fn new(desc: &FactoryDesc) -> RhiResult<Self> {
		profiling::function_scope!();
		unsafe {
			let instance = P::create_instance(desc)?;
			let (adapters, native_adapters) = P::enumerate_adapters(&instance)?
				.into_iter()
				.enumerate()
				.map(|(index, adapter)| (Adapter { index, info: adapter.info }, adapter.native))
				.unzip::<_, _, Vec<_>, Vec<_>>();
			log::info!(
				"{} factory created with {} adapter(s) and flags {:?}",
				P::NAME,
				adapters.len(),
				desc.flags
			);
			for adapter in &adapters {
				log::debug!("adapter {}: {:?}", adapter.index, adapter.info);
			}
			Ok(Self {
				inner: Arc::new(FactoryInner {
					adapters,
					native_adapters,
					desc: *desc,
					instance,
				}),
			})
		}
	}

	pub fn flags(&self) -> FactoryFlags {
		self.inner.desc.flags
	}

	pub fn enumerate_adapters(&self) -> &[Adapter] {
		&self.inner.adapters
	}

	/// Picks the adapter most suited for rendering, preferring discrete over integrated GPUs.
	pub fn preferred_adapter(&self) -> Option<&Adapter> {
		self.inner.adapters.iter().min_by_key(|a| match a.info.kind {
			AdapterKind::Discrete => 1,
			AdapterKind::Virtual => 2,
			AdapterKind::Integrated => 3,
			AdapterKind::Cpu => 4,
			AdapterKind::Other => 5,
		})
	}

	pub fn create_device(&self, adapter_index: usize) -> RhiResult<Device<P>> {
		profiling::function_scope!();
		let adapter = self
			.inner
			.adapters
			.get(adapter_index)
			.ok_or(RhiError::InvalidHandle { kind: "Adapter" })?;
		let native = &self.inner.native_adapters[adapter_index];
		unsafe {
			let platform = P::create_device(&self.inner.instance, native, &self.inner.desc)?;
			log::info!("{} device created on {:?}", P::NAME, adapter.info.name);
			Ok(Device::new(platform, adapter.clone(), self.inner.clone()))
		}
	}
}
