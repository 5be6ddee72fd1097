use crate::error::{RhiError, RhiResult};
use crate::factory::{AdapterInfo, AdapterKind, FactoryDesc, FactoryFlags};
use crate::platform::PlatformAdapter;
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk::{
	ApplicationInfo, Bool32, DebugUtilsMessageSeverityFlagsEXT, DebugUtilsMessageTypeFlagsEXT,
	DebugUtilsMessengerCallbackDataEXT, DebugUtilsMessengerCreateInfoEXT, DebugUtilsMessengerEXT, InstanceCreateInfo,
	MemoryHeapFlags, PhysicalDevice, PhysicalDeviceFeatures, PhysicalDeviceType, PhysicalDeviceVulkan11Features,
	PhysicalDeviceVulkan12Features, PhysicalDeviceVulkan13Features, QueueFlags, ValidationFeatureEnableEXT,
	ValidationFeaturesEXT,
};
use ash::Entry;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr, CString};

pub fn required_features() -> PhysicalDeviceFeatures {
	PhysicalDeviceFeatures::default()
		.sampler_anisotropy(true)
		.shader_storage_buffer_array_dynamic_indexing(true)
		.shader_uniform_buffer_array_dynamic_indexing(true)
		.shader_storage_image_array_dynamic_indexing(true)
		.shader_sampled_image_array_dynamic_indexing(true)
}

pub fn required_features_vk11() -> PhysicalDeviceVulkan11Features<'static> {
	PhysicalDeviceVulkan11Features::default()
}

pub fn required_features_vk12() -> PhysicalDeviceVulkan12Features<'static> {
	PhysicalDeviceVulkan12Features::default()
		.descriptor_binding_update_unused_while_pending(true)
		.descriptor_binding_partially_bound(true)
		.descriptor_indexing(true)
		.descriptor_binding_storage_buffer_update_after_bind(true)
		.descriptor_binding_uniform_buffer_update_after_bind(true)
		.descriptor_binding_storage_image_update_after_bind(true)
		.descriptor_binding_sampled_image_update_after_bind(true)
		.timeline_semaphore(true)
}

pub fn required_features_vk13() -> PhysicalDeviceVulkan13Features<'static> {
	PhysicalDeviceVulkan13Features::default()
		.synchronization2(true)
		.dynamic_rendering(true)
}

pub const LAYER_VALIDATION: &CStr = c"VK_LAYER_KHRONOS_validation";

pub const REQUIRED_API_VERSION: u32 = ash::vk::make_api_version(0, 1, 3, 0);

pub struct AshInstance {
	pub entry: Entry,
	pub instance: ash::Instance,
	pub flags: FactoryFlags,
	pub debug_utils: Option<(debug_utils::Instance, DebugUtilsMessengerEXT)>,
	/// Only available if the factory was created with a display handle.
	pub surface: Option<surface::Instance>,
}

impl Drop for AshInstance {
	fn drop(&mut self) {
		unsafe {
			if let Some((debug_instance, messenger)) = self.debug_utils.take() {
				debug_instance.destroy_debug_utils_messenger(messenger, None);
			}
			self.instance.destroy_instance(None);
		}
	}
}

pub struct AshAdapter {
	pub physical_device: PhysicalDevice,
	/// A queue family supporting graphics, compute and transfer.
	pub queue_family_index: u32,
	pub queue_count: u32,
	pub supports_swapchain: bool,
}

fn name_set<'a>(names: impl Iterator<Item = &'a CStr>) -> FxHashSet<&'a CStr> {
	names.collect()
}

pub unsafe fn create_instance(desc: &FactoryDesc) -> RhiResult<AshInstance> {
	unsafe {
		if desc.flags.contains(FactoryFlags::RENDERDOC) {
			// renderdoc does not yet support wayland
			std::env::remove_var("WAYLAND_DISPLAY");
			std::env::set_var("ENABLE_VULKAN_RENDERDOC_CAPTURE", "1");
		}
		let entry = Entry::load().map_err(|e| RhiError::Unsupported(format!("failed to load Vulkan: {e}")))?;

		let layer_properties = entry.enumerate_instance_layer_properties()?;
		let available_layers = name_set(layer_properties.iter().filter_map(|l| l.layer_name_as_c_str().ok()));
		let extension_properties = entry.enumerate_instance_extension_properties(None)?;
		let available_extensions =
			name_set(extension_properties.iter().filter_map(|e| e.extension_name_as_c_str().ok()));

		let mut layers = SmallVec::<[*const c_char; 1]>::new();
		let mut validation_features = SmallVec::<[ValidationFeatureEnableEXT; 4]>::new();
		if desc.flags.validation_enabled() {
			if available_layers.contains(LAYER_VALIDATION) {
				layers.push(LAYER_VALIDATION.as_ptr());
				let feature = if desc.flags.contains(FactoryFlags::GPU_VALIDATION) {
					Some(ValidationFeatureEnableEXT::GPU_ASSISTED)
				} else if desc.flags.contains(FactoryFlags::DEBUG_PRINTF) {
					Some(ValidationFeatureEnableEXT::DEBUG_PRINTF)
				} else {
					None
				};
				if let Some(feature) = feature {
					validation_features
						.extend_from_slice(&[feature, ValidationFeatureEnableEXT::GPU_ASSISTED_RESERVE_BINDING_SLOT]);
				}
			} else {
				log::warn!("validation requested, but {LAYER_VALIDATION:?} is not installed");
			}
		}

		let mut extensions = SmallVec::<[*const c_char; 6]>::new();
		let debug_utils_enabled = available_extensions.contains(debug_utils::NAME);
		if debug_utils_enabled {
			extensions.push(debug_utils::NAME.as_ptr());
		}
		if let Some(display_handle) = desc.display_handle {
			extensions.extend_from_slice(ash_window::enumerate_required_extensions(display_handle)?);
		}

		let app_name = CString::new(desc.app.name)
			.map_err(|_| RhiError::InvalidArgument(format!("app name {:?} contains a nul byte", desc.app.name)))?;
		let instance = entry.create_instance(
			&InstanceCreateInfo::default()
				.application_info(
					&ApplicationInfo::default()
						.application_name(&app_name)
						.application_version(desc.app.version)
						.engine_name(c"gpu-rhi")
						.engine_version(1)
						.api_version(REQUIRED_API_VERSION),
				)
				.enabled_extension_names(&extensions)
				.enabled_layer_names(&layers)
				.push_next(&mut ValidationFeaturesEXT::default().enabled_validation_features(&validation_features)),
			None,
		)?;

		let debug_utils = if debug_utils_enabled {
			let debug_instance = debug_utils::Instance::new(&entry, &instance);
			let mut severity = DebugUtilsMessageSeverityFlagsEXT::ERROR | DebugUtilsMessageSeverityFlagsEXT::WARNING;
			if desc.flags.validation_enabled() {
				severity |= DebugUtilsMessageSeverityFlagsEXT::INFO;
			}
			match debug_instance.create_debug_utils_messenger(
				&DebugUtilsMessengerCreateInfoEXT::default()
					.message_severity(severity)
					.message_type(
						DebugUtilsMessageTypeFlagsEXT::GENERAL
							| DebugUtilsMessageTypeFlagsEXT::VALIDATION
							| DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
					)
					.pfn_user_callback(Some(debug_callback)),
				None,
			) {
				Ok(messenger) => Some((debug_instance, messenger)),
				Err(e) => {
					instance.destroy_instance(None);
					return Err(e.into());
				}
			}
		} else {
			None
		};

		let surface = desc.display_handle.map(|_| surface::Instance::new(&entry, &instance));
		log::info!(
			"created Vulkan instance with {} layers and {} extensions",
			layers.len(),
			extensions.len()
		);
		Ok(AshInstance {
			entry,
			instance,
			flags: desc.flags,
			debug_utils,
			surface,
		})
	}
}

fn adapter_kind(device_type: PhysicalDeviceType) -> AdapterKind {
	match device_type {
		PhysicalDeviceType::DISCRETE_GPU => AdapterKind::Discrete,
		PhysicalDeviceType::INTEGRATED_GPU => AdapterKind::Integrated,
		PhysicalDeviceType::VIRTUAL_GPU => AdapterKind::Virtual,
		PhysicalDeviceType::CPU => AdapterKind::Cpu,
		_ => AdapterKind::Other,
	}
}

/// Lists every physical device supporting Vulkan 1.3 with a universal queue family, dedicated GPUs first.
pub unsafe fn enumerate_adapters(ash_instance: &AshInstance) -> RhiResult<Vec<PlatformAdapter<super::Ash>>> {
	unsafe {
		let instance = &ash_instance.instance;
		let mut adapters = Vec::new();
		for physical_device in instance.enumerate_physical_devices()? {
			let properties = instance.get_physical_device_properties(physical_device);
			let name = properties
				.device_name_as_c_str()
				.map_or(Cow::Borrowed("unknown"), CStr::to_string_lossy)
				.into_owned();
			if properties.api_version < REQUIRED_API_VERSION {
				log::info!("skipping adapter {name:?}, it does not support Vulkan 1.3");
				continue;
			}

			let Some((queue_family_index, family)) = instance
				.get_physical_device_queue_family_properties(physical_device)
				.into_iter()
				.enumerate()
				.find(|(_, prop)| prop.queue_flags.contains(QueueFlags::GRAPHICS | QueueFlags::COMPUTE))
			else {
				log::info!("skipping adapter {name:?}, it has no graphics + compute queue family");
				continue;
			};

			let device_extensions = instance.enumerate_device_extension_properties(physical_device)?;
			let supports_swapchain = device_extensions
				.iter()
				.filter_map(|e| e.extension_name_as_c_str().ok())
				.any(|e| e == swapchain::NAME);

			let memory = instance.get_physical_device_memory_properties(physical_device);
			let dedicated_video_memory = memory
				.memory_heaps_as_slice()
				.iter()
				.filter(|heap| heap.flags.contains(MemoryHeapFlags::DEVICE_LOCAL))
				.map(|heap| heap.size)
				.sum();

			adapters.push(PlatformAdapter {
				info: AdapterInfo {
					name,
					vendor_id: properties.vendor_id,
					device_id: properties.device_id,
					kind: adapter_kind(properties.device_type),
					dedicated_video_memory,
				},
				native: AshAdapter {
					physical_device,
					queue_family_index: queue_family_index as u32,
					queue_count: family.queue_count,
					supports_swapchain,
				},
			});
		}
		adapters.sort_by_key(|adapter| match adapter.info.kind {
			AdapterKind::Discrete => 1,
			AdapterKind::Virtual => 2,
			AdapterKind::Integrated => 3,
			AdapterKind::Cpu => 4,
			AdapterKind::Other => 5,
		});
		Ok(adapters)
	}
}

/// All child objects created on device must have been destroyed prior to destroying device
/// https://vulkan.lunarg.com/doc/view/1.3.296.0/linux/1.3-extensions/vkspec.html#VUID-vkDestroyDevice-device-05137
const VUID_VK_DESTROY_DEVICE_DEVICE_05137: i32 = 0x4872eaa0;

const IGNORED_MSG_IDS: &[i32] = &[VUID_VK_DESTROY_DEVICE_DEVICE_05137];

unsafe extern "system" fn debug_callback(
	message_severity: DebugUtilsMessageSeverityFlagsEXT,
	message_type: DebugUtilsMessageTypeFlagsEXT,
	callback_data: *const DebugUtilsMessengerCallbackDataEXT<'_>,
	_p_user_data: *mut c_void,
) -> Bool32 {
	unsafe {
		let callback_data = *callback_data;
		let message_id_number = callback_data.message_id_number;
		if IGNORED_MSG_IDS.contains(&message_id_number) {
			return false.into();
		}
		let message_id_name = callback_data
			.message_id_name_as_c_str()
			.map_or(Cow::Borrowed(""), CStr::to_string_lossy);
		let message = callback_data
			.message_as_c_str()
			.map_or(Cow::Borrowed("No message"), CStr::to_string_lossy);
		let level = if message_severity.contains(DebugUtilsMessageSeverityFlagsEXT::ERROR) {
			log::Level::Error
		} else if message_severity.contains(DebugUtilsMessageSeverityFlagsEXT::WARNING) {
			log::Level::Warn
		} else if message_severity.contains(DebugUtilsMessageSeverityFlagsEXT::INFO) {
			log::Level::Debug
		} else {
			log::Level::Trace
		};
		log::log!(
			target: "gpu_rhi::vulkan",
			level,
			"{message_type:?} [{message_id_name} ({message_id_number:#x})]: {message}"
		);
		false.into()
	}
}
