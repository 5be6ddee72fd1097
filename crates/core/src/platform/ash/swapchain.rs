use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::platform::ash::{Ash, AshQueue, AshResource};
use crate::platform::{PlatformBackBuffers, PlatformSwapchain, RhiPlatform};
use crate::resource::ResourceDesc;
use crate::swapchain::SwapchainDesc;
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::vk::{
	ColorSpaceKHR, CommandBufferAllocateInfo, CommandBufferBeginInfo, CommandBufferLevel, CommandBufferSubmitInfo,
	CommandBufferUsageFlags, CommandPoolCreateFlags, CommandPoolCreateInfo, CompositeAlphaFlagsKHR, DependencyInfo,
	Extent2D, Image, ImageAspectFlags, ImageLayout, ImageMemoryBarrier2, ImageSubresourceRange, PresentInfoKHR,
	PresentModeKHR, SharingMode, SubmitInfo2, SurfaceKHR, SurfaceTransformFlagsKHR, SwapchainCreateInfoKHR,
	SwapchainKHR, QUEUE_FAMILY_IGNORED,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Clone)]
pub struct AshSwapchain {
	pub surface: SurfaceKHR,
	pub swapchain: SwapchainKHR,
	pub format: Format,
	pub extent: [u32; 2],
	/// Vulkan requires external synchronization of the swapchain between acquire and present, shared by all clones.
	sync: Arc<Mutex<()>>,
}

/// Picks the requested format if the surface supports it, or the first known SRGB_NONLINEAR format otherwise.
fn choose_format(supported: &[(Format, ColorSpaceKHR)], preferred: Format) -> Option<Format> {
	let nonlinear = || {
		supported
			.iter()
			.filter(|(f, c)| *c == ColorSpaceKHR::SRGB_NONLINEAR && !f.is_unknown())
			.map(|(f, _)| *f)
	};
	nonlinear().find(|f| *f == preferred).or_else(|| nonlinear().next())
}

fn choose_present_mode(supported: &[PresentModeKHR], vsync: bool) -> PresentModeKHR {
	if vsync {
		return PresentModeKHR::FIFO;
	}
	[PresentModeKHR::MAILBOX, PresentModeKHR::IMMEDIATE]
		.into_iter()
		.find(|mode| supported.contains(mode))
		// FIFO is always available
		.unwrap_or(PresentModeKHR::FIFO)
}

impl Ash {
	fn surface_ext(&self) -> RhiResult<&surface::Instance> {
		self.extensions
			.surface
			.as_ref()
			.ok_or_else(|| RhiError::Unsupported("factory was created without a display handle".to_string()))
	}

	fn swapchain_ext(&self) -> RhiResult<&khr_swapchain::Device> {
		self.extensions
			.swapchain
			.as_ref()
			.ok_or_else(|| RhiError::Unsupported("device does not support presenting".to_string()))
	}

	pub unsafe fn create_swapchain_native(
		&self,
		queue: &AshQueue,
		desc: &SwapchainDesc,
	) -> RhiResult<PlatformSwapchain<Ash>> {
		unsafe {
			let surface_ext = self.surface_ext()?;
			self.swapchain_ext()?;
			let surface = ash_window::create_surface(
				&self.entry,
				&self.instance,
				desc.window.display,
				desc.window.window,
				None,
			)?;
			let result = (|| {
				if !surface_ext.get_physical_device_surface_support(self.physical_device, queue.family, surface)? {
					return Err(RhiError::Unsupported(
						"queue family can not present to this surface".to_string(),
					));
				}
				let mut swapchain = AshSwapchain {
					surface,
					swapchain: SwapchainKHR::null(),
					format: Format::Unknown,
					extent: [0, 0],
					sync: Arc::new(Mutex::new(())),
				};
				let back_buffers = self.build_swapchain(queue, &mut swapchain, desc)?;
				Ok(PlatformSwapchain {
					swapchain,
					back_buffers,
				})
			})();
			if result.is_err() {
				surface_ext.destroy_surface(surface, None);
			}
			result
		}
	}

	/// (Re)creates the `VkSwapchainKHR` of `swapchain`, retiring the previous one. On failure `swapchain` is left
	/// untouched.
	unsafe fn build_swapchain(
		&self,
		queue: &AshQueue,
		swapchain: &mut AshSwapchain,
		desc: &SwapchainDesc,
	) -> RhiResult<PlatformBackBuffers<Ash>> {
		profiling::function_scope!();
		unsafe {
			let surface_ext = self.surface_ext()?;
			let swapchain_ext = self.swapchain_ext()?;
			let phy = self.physical_device;
			let capabilities = surface_ext.get_physical_device_surface_capabilities(phy, swapchain.surface)?;

			let supported_formats = surface_ext
				.get_physical_device_surface_formats(phy, swapchain.surface)?
				.into_iter()
				.map(|f| (Format::from_ash(f.format), f.color_space))
				.collect::<SmallVec<[_; 8]>>();
			let format = choose_format(&supported_formats, desc.format)
				.ok_or_else(|| RhiError::Unsupported("no SRGB_NONLINEAR surface format available".to_string()))?;
			if format != desc.format {
				log::info!("surface does not support {:?}, using {format:?}", desc.format);
			}

			let extent = if capabilities.current_extent.width != u32::MAX {
				capabilities.current_extent
			} else {
				let min = capabilities.min_image_extent;
				let max = capabilities.max_image_extent;
				Extent2D {
					width: u32::clamp(desc.window.width, min.width, max.width),
					height: u32::clamp(desc.window.height, min.height, max.height),
				}
			};
			if extent.width == 0 || extent.height == 0 {
				return Err(RhiError::OutOfDate);
			}

			let mut image_count = desc.back_buffer_count.max(capabilities.min_image_count);
			if capabilities.max_image_count != 0 {
				image_count = image_count.min(capabilities.max_image_count);
			}
			let present_mode = choose_present_mode(
				&surface_ext.get_physical_device_surface_present_modes(phy, swapchain.surface)?,
				desc.vsync,
			);

			let new_swapchain = swapchain_ext.create_swapchain(
				&SwapchainCreateInfoKHR::default()
					.surface(swapchain.surface)
					.min_image_count(image_count)
					.image_format(format.to_ash())
					.image_color_space(ColorSpaceKHR::SRGB_NONLINEAR)
					.image_extent(extent)
					.image_array_layers(1)
					.image_usage(desc.usage.to_ash_image_usage_flags())
					.image_sharing_mode(SharingMode::EXCLUSIVE)
					.pre_transform(SurfaceTransformFlagsKHR::IDENTITY)
					.composite_alpha(CompositeAlphaFlagsKHR::OPAQUE)
					.present_mode(present_mode)
					.clipped(true)
					.old_swapchain(swapchain.swapchain),
				None,
			)?;
			let images = match swapchain_ext
				.get_swapchain_images(new_swapchain)
				.map_err(RhiError::from)
				.and_then(|images| self.transition_to_present(queue, &images).map(|_| images))
			{
				Ok(images) => images,
				Err(e) => {
					swapchain_ext.destroy_swapchain(new_swapchain, None);
					return Err(e);
				}
			};

			if swapchain.swapchain != SwapchainKHR::null() {
				swapchain_ext.destroy_swapchain(swapchain.swapchain, None);
			}
			swapchain.swapchain = new_swapchain;
			swapchain.format = format;
			swapchain.extent = [extent.width, extent.height];

			let resource_desc = ResourceDesc::texture_2d(format, extent.width, extent.height, desc.usage);
			let resources = images
				.into_iter()
				.enumerate()
				.map(|(i, image)| {
					if let Err(e) = self.set_debug_object_name(image, &format!("Swapchain Image {i}")) {
						log::warn!("failed to name swapchain image {i}: {e}");
					}
					AshResource::Image {
						image,
						desc: resource_desc.without_name(),
						owned: false,
					}
				})
				.collect();
			log::debug!("built swapchain with {image_count} images of {extent:?} presenting with {present_mode:?}");
			Ok(PlatformBackBuffers {
				resources,
				format,
				extent: [extent.width, extent.height],
			})
		}
	}

	/// Transitions freshly created swapchain images into the present layout and waits for it to complete.
	unsafe fn transition_to_present(&self, queue: &AshQueue, images: &[Image]) -> RhiResult<()> {
		unsafe {
			let pool = self.device.create_command_pool(
				&CommandPoolCreateInfo::default()
					.flags(CommandPoolCreateFlags::TRANSIENT)
					.queue_family_index(queue.family),
				None,
			)?;
			let result = (|| {
				let cmd = self
					.device
					.allocate_command_buffers(
						&CommandBufferAllocateInfo::default()
							.command_pool(pool)
							.level(CommandBufferLevel::PRIMARY)
							.command_buffer_count(1),
					)?
					.into_iter()
					.next()
					.ok_or_else(|| RhiError::Backend {
						backend: Ash::NAME,
						message: "vkAllocateCommandBuffers returned no command buffer".to_string(),
					})?;
				self.device.begin_command_buffer(
					cmd,
					&CommandBufferBeginInfo::default().flags(CommandBufferUsageFlags::ONE_TIME_SUBMIT),
				)?;
				let barriers = images
					.iter()
					.map(|image| {
						ImageMemoryBarrier2::default()
							.image(*image)
							.old_layout(ImageLayout::UNDEFINED)
							.new_layout(ImageLayout::PRESENT_SRC_KHR)
							.src_queue_family_index(QUEUE_FAMILY_IGNORED)
							.dst_queue_family_index(QUEUE_FAMILY_IGNORED)
							.subresource_range(
								ImageSubresourceRange::default()
									.aspect_mask(ImageAspectFlags::COLOR)
									.level_count(1)
									.layer_count(1),
							)
					})
					.collect::<SmallVec<[_; 4]>>();
				self.device
					.cmd_pipeline_barrier2(cmd, &DependencyInfo::default().image_memory_barriers(&barriers));
				self.device.end_command_buffer(cmd)?;

				let queue = queue.lock();
				self.device.queue_submit2(
					*queue,
					&[SubmitInfo2::default()
						.command_buffer_infos(&[CommandBufferSubmitInfo::default().command_buffer(cmd)])],
					ash::vk::Fence::null(),
				)?;
				self.device.queue_wait_idle(*queue)?;
				Ok(())
			})();
			self.device.destroy_command_pool(pool, None);
			result
		}
	}

	pub unsafe fn acquire_next_image_native(
		&self,
		swapchain: &AshSwapchain,
		signal: ash::vk::Semaphore,
		timeout_ns: u64,
	) -> RhiResult<u32> {
		unsafe {
			let _sync = swapchain.sync.lock();
			let (index, suboptimal) = self.swapchain_ext()?.acquire_next_image(
				swapchain.swapchain,
				timeout_ns,
				signal,
				ash::vk::Fence::null(),
			)?;
			if suboptimal {
				log::trace!("acquired back buffer {index} of a suboptimal swapchain");
			}
			Ok(index)
		}
	}

	pub unsafe fn resize_swapchain_native(
		&self,
		queue: &AshQueue,
		swapchain: &mut AshSwapchain,
		desc: &SwapchainDesc,
	) -> RhiResult<PlatformBackBuffers<Ash>> {
		unsafe { self.build_swapchain(queue, swapchain, desc) }
	}

	pub unsafe fn present_native(
		&self,
		queue: &AshQueue,
		swapchain: &AshSwapchain,
		back_buffer_index: u32,
		wait_semaphores: &[&ash::vk::Semaphore],
	) -> RhiResult<()> {
		unsafe {
			let waits = wait_semaphores.iter().map(|s| **s).collect::<SmallVec<[_; 4]>>();
			let _sync = swapchain.sync.lock();
			let queue = queue.lock();
			// suboptimal presents still succeed, the next resize fixes them
			self.swapchain_ext()?.queue_present(
				*queue,
				&PresentInfoKHR::default()
					.wait_semaphores(&waits)
					.swapchains(&[swapchain.swapchain])
					.image_indices(&[back_buffer_index]),
			)?;
			Ok(())
		}
	}

	pub unsafe fn destroy_swapchain_native(&self, swapchain: AshSwapchain) {
		unsafe {
			if let Ok(swapchain_ext) = self.swapchain_ext() {
				swapchain_ext.destroy_swapchain(swapchain.swapchain, None);
			}
			if let Ok(surface_ext) = self.surface_ext() {
				surface_ext.destroy_surface(swapchain.surface, None);
			}
		}
	}
}
