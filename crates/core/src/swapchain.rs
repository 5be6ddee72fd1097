use crate::backing::handle::{MemoryHandle, QueueHandle, ResourceHandle, SemaphoreHandle, SwapchainHandle};
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::memory::HeapType;
use crate::platform::{PlatformBackBuffers, PlatformSwapchain, RhiPlatform};
use crate::resource::{MemoryBinding, ResourceDesc, ResourceSlot, ResourceUsage};
use crate::sync::{SemaphoreLocks, SemaphoreSlot, SemaphoreState};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use smallvec::SmallVec;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

/// A platform window and its current size in pixels.
#[derive(Copy, Clone, Debug)]
pub struct WindowHandle {
	pub display: RawDisplayHandle,
	pub window: RawWindowHandle,
	pub width: u32,
	pub height: u32,
}

// Raw window handles are plain identifiers, using them from another thread is up to the windowing system.
unsafe impl Send for WindowHandle {}
unsafe impl Sync for WindowHandle {}

#[derive(Copy, Clone, Debug)]
pub struct SwapchainDesc {
	pub window: WindowHandle,
	/// The queue presenting the back buffers.
	pub queue: QueueHandle,
	pub back_buffer_count: u32,
	/// The preferred back buffer format, the backend may pick a different one if it's unsupported.
	pub format: Format,
	pub vsync: bool,
	pub usage: ResourceUsage,
}

impl SwapchainDesc {
	pub fn new(window: WindowHandle, queue: QueueHandle) -> Self {
		Self {
			window,
			queue,
			back_buffer_count: 3,
			format: Format::B8G8R8A8Srgb,
			vsync: true,
			usage: ResourceUsage::RENDER_TARGET | ResourceUsage::TRANSFER_DST,
		}
	}
}

pub const MAX_BACK_BUFFERS: u32 = 16;

/// An acquired back buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Frame {
	pub back_buffer_index: u32,
	pub back_buffer: ResourceHandle,
	/// Signaled once the back buffer may be written, the first submission rendering to it must wait on it.
	pub availability_semaphore: SemaphoreHandle,
}

#[derive(Copy, Clone, Debug)]
pub struct PresentDesc<'a> {
	pub swapchain: SwapchainHandle,
	pub back_buffer_index: u32,
	/// Semaphores signaled by the submission that rendered into the back buffer.
	pub wait_semaphores: &'a [SemaphoreHandle],
}

#[derive(Debug, Default)]
pub(crate) struct FrameState {
	/// Availability semaphores are handed out round-robin, as the acquired index is only known afterward.
	next_semaphore: usize,
	acquired: SmallVec<[bool; 4]>,
}

pub(crate) struct SwapchainSlot<P: RhiPlatform> {
	pub native: P::Swapchain,
	/// Serializes acquiring, resizing and destroying, held without any object table locked.
	pub acquire: Arc<Mutex<()>>,
	pub desc: SwapchainDesc,
	pub back_buffers: Vec<ResourceHandle>,
	pub semaphores: Vec<SemaphoreHandle>,
	pub state: Mutex<FrameState>,
	pub format: Format,
	pub extent: [u32; 2],
}

/// Handles of the objects registered for a platform swapchain.
struct Registered {
	back_buffers: Vec<ResourceHandle>,
	semaphores: Vec<SemaphoreHandle>,
}

impl<P: RhiPlatform> Device<P> {
	fn validate_swapchain_desc(&self, desc: &SwapchainDesc) -> RhiResult<()> {
		if desc.back_buffer_count == 0 || desc.back_buffer_count > MAX_BACK_BUFFERS {
			return Err(RhiError::invalid_argument(format!(
				"back buffer count {} must be within 1..={MAX_BACK_BUFFERS}",
				desc.back_buffer_count
			)));
		}
		if desc.window.width == 0 || desc.window.height == 0 {
			return Err(RhiError::invalid_argument("swapchain window has a zero extent"));
		}
		if desc.format.is_unknown() || desc.format.is_depth() {
			return Err(RhiError::invalid_argument(format!(
				"{:?} is not a back buffer format",
				desc.format
			)));
		}
		if !desc.usage.contains(ResourceUsage::RENDER_TARGET)
			|| !ResourceUsage::TEXTURE_USAGES.contains(desc.usage)
			|| desc.usage.contains(ResourceUsage::DEPTH_STENCIL)
		{
			return Err(RhiError::invalid_argument(format!(
				"{:?} is not a valid back buffer usage",
				desc.usage
			)));
		}
		Ok(())
	}

	fn create_semaphores(&self, count: usize) -> RhiResult<Vec<P::Semaphore>> {
		let mut semaphores = Vec::with_capacity(count);
		for _ in 0..count {
			match unsafe { self.platform.create_semaphore() } {
				Ok(semaphore) => semaphores.push(semaphore),
				Err(e) => {
					for semaphore in semaphores {
						unsafe { self.platform.destroy_semaphore(semaphore) };
					}
					return Err(e);
				}
			}
		}
		Ok(semaphores)
	}

	fn register_swapchain_objects(
		&self,
		owner: SwapchainHandle,
		usage: ResourceUsage,
		back_buffers: PlatformBackBuffers<P>,
		semaphores: Vec<P::Semaphore>,
	) -> Registered {
		let PlatformBackBuffers {
			resources: natives,
			format,
			extent,
		} = back_buffers;
		let back_buffers = {
			let mut resources = self.objects.resources.write();
			natives
				.into_iter()
				.map(|native| {
					let info = unsafe { self.platform.resource_allocation_info(&native) };
					resources.insert(ResourceSlot {
						native,
						desc: ResourceDesc::texture_2d(format, extent[0], extent[1], usage),
						info,
						binding: Some(MemoryBinding {
							memory: MemoryHandle::INVALID,
							offset: 0,
							heap_type: HeapType::Default,
						}),
						map_count: AtomicU32::new(0),
						swapchain: Some(owner),
					})
				})
				.collect()
		};
		let semaphores = {
			let mut arena = self.objects.semaphores.write();
			semaphores
				.into_iter()
				.map(|native| {
					arena.insert(SemaphoreSlot {
						native,
						state: Mutex::new(SemaphoreState::Unsignaled),
						swapchain: Some(owner),
					})
				})
				.collect()
		};
		Registered {
			back_buffers,
			semaphores,
		}
	}

	fn unregister_swapchain_objects(&self, back_buffers: &[ResourceHandle], semaphores: &[SemaphoreHandle]) {
		{
			let mut resources = self.objects.resources.write();
			for handle in back_buffers {
				if let Some(slot) = resources.remove(*handle) {
					unsafe { self.platform.destroy_resource(slot.native) };
				}
			}
		}
		let mut arena = self.objects.semaphores.write();
		for handle in semaphores {
			if let Some(slot) = arena.remove(*handle) {
				unsafe { self.platform.destroy_semaphore(slot.native) };
			}
		}
	}

	/// Creates a swapchain presenting to `desc.window` from `desc.queue`. Every back buffer starts out in the
	/// [`TextureLayout::Present`] layout.
	///
	/// [`TextureLayout::Present`]: crate::barrier::TextureLayout::Present
	pub fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<SwapchainHandle> {
		profiling::function_scope!();
		self.validate_swapchain_desc(desc)?;
		let PlatformSwapchain {
			swapchain,
			back_buffers,
		} = {
			let queues = self.objects.queues.read();
			unsafe { self.platform.create_swapchain(&queues.try_get(desc.queue)?.native, desc)? }
		};
		let semaphores = match self.create_semaphores(back_buffers.resources.len()) {
			Ok(semaphores) => semaphores,
			Err(e) => {
				unsafe {
					for resource in back_buffers.resources {
						self.platform.destroy_resource(resource);
					}
					self.platform.destroy_swapchain(swapchain);
				}
				return Err(e);
			}
		};
		let (count, format, extent) = (back_buffers.resources.len(), back_buffers.format, back_buffers.extent);

		let handle = self.objects.swapchains.write().insert(SwapchainSlot {
			native: swapchain,
			acquire: Arc::new(Mutex::new(())),
			desc: *desc,
			back_buffers: Vec::new(),
			semaphores: Vec::new(),
			state: Mutex::new(FrameState::default()),
			format,
			extent,
		});
		let registered = self.register_swapchain_objects(handle, desc.usage, back_buffers, semaphores);
		if let Some(slot) = self.objects.swapchains.write().get_mut(handle) {
			slot.back_buffers = registered.back_buffers;
			slot.semaphores = registered.semaphores;
			slot.state.get_mut().acquired = SmallVec::from_elem(false, count);
		}
		log::debug!("created {handle:?} with {count} {format:?} back buffers of {extent:?}");
		Ok(handle)
	}

	pub fn swapchain_back_buffers(&self, swapchain: SwapchainHandle) -> RhiResult<Vec<ResourceHandle>> {
		Ok(self.objects.swapchains.read().try_get(swapchain)?.back_buffers.clone())
	}

	pub fn swapchain_format(&self, swapchain: SwapchainHandle) -> RhiResult<Format> {
		Ok(self.objects.swapchains.read().try_get(swapchain)?.format)
	}

	pub fn swapchain_extent(&self, swapchain: SwapchainHandle) -> RhiResult<[u32; 2]> {
		Ok(self.objects.swapchains.read().try_get(swapchain)?.extent)
	}

	/// Acquires the next back buffer, blocking for at most `timeout_ns`. Returns [`RhiError::NotReady`] if no back
	/// buffer became available in time and [`RhiError::OutOfDate`] if the swapchain must be resized.
	pub fn get_next_frame(&self, swapchain: SwapchainHandle, timeout_ns: u64) -> RhiResult<Frame> {
		profiling::function_scope!();
		let acquire = Arc::clone(&self.objects.swapchains.read().try_get(swapchain)?.acquire);
		let _acquiring = acquire.lock();

		let (native, semaphore, semaphore_native) = {
			let semaphores = self.objects.semaphores.read();
			let swapchains = self.objects.swapchains.read();
			let slot = swapchains.try_get(swapchain)?;
			let semaphore = slot.semaphores[slot.state.lock().next_semaphore];
			let semaphore_slot = semaphores.try_get(semaphore)?;
			if *semaphore_slot.state.lock() != SemaphoreState::Unsignaled {
				return Err(RhiError::invalid_state(format!(
					"availability semaphore {semaphore:?} of {swapchain:?} was never waited on"
				)));
			}
			(slot.native.clone(), semaphore, semaphore_slot.native.clone())
		};

		// acquiring may block until another thread presents, which needs the object tables
		let index = unsafe {
			self.platform
				.acquire_next_image(&native, &semaphore_native, timeout_ns)?
		};

		let semaphores = self.objects.semaphores.read();
		let swapchains = self.objects.swapchains.read();
		let slot = swapchains.try_get(swapchain)?;
		let mut state = slot.state.lock();
		let acquired = state
			.acquired
			.get_mut(index as usize)
			.ok_or_else(|| RhiError::Backend {
				backend: P::NAME,
				message: format!("acquired back buffer index {index} out of bounds"),
			})?;
		if *acquired {
			return Err(RhiError::invalid_state(format!(
				"back buffer {index} of {swapchain:?} is already acquired"
			)));
		}
		*acquired = true;
		*semaphores.try_get(semaphore)?.state.lock() = SemaphoreState::Signaled;
		state.next_semaphore = (state.next_semaphore + 1) % slot.semaphores.len();
		Ok(Frame {
			back_buffer_index: index,
			back_buffer: slot.back_buffers[index as usize],
			availability_semaphore: semaphore,
		})
	}

	/// Presents an acquired back buffer on the swapchain's queue once every wait semaphore is signaled. The back
	/// buffer must be in the [`TextureLayout::Present`] layout.
	///
	/// [`TextureLayout::Present`]: crate::barrier::TextureLayout::Present
	pub fn present(&self, desc: &PresentDesc) -> RhiResult<()> {
		profiling::function_scope!();
		let queues = self.objects.queues.read();
		let semaphores = self.objects.semaphores.read();
		let swapchains = self.objects.swapchains.read();
		let slot = swapchains.try_get(desc.swapchain)?;
		let queue = queues.try_get(slot.desc.queue)?;
		let mut state = slot.state.lock();

		let index = desc.back_buffer_index as usize;
		if !state.acquired.get(index).copied().unwrap_or(false) {
			return Err(RhiError::invalid_state(format!(
				"back buffer {index} of {:?} is presented without being acquired",
				desc.swapchain
			)));
		}
		for (i, semaphore) in desc.wait_semaphores.iter().enumerate() {
			if desc.wait_semaphores[..i].contains(semaphore) {
				return Err(RhiError::invalid_argument(format!("{semaphore:?} is waited on twice")));
			}
		}
		let mut locks = SemaphoreLocks::lock(&semaphores, desc.wait_semaphores.iter().copied())?;
		let plan = locks.plan(desc.wait_semaphores, &[])?;
		let waits = desc
			.wait_semaphores
			.iter()
			.map(|s| locks.native(*s))
			.collect::<SmallVec<[_; 4]>>();

		let result = unsafe {
			self.platform
				.present(&queue.native, &slot.native, desc.back_buffer_index, &waits)
		};
		// the waits are consumed and the back buffer is released even if the surface went out of date
		if matches!(result, Ok(()) | Err(RhiError::OutOfDate)) {
			locks.commit(plan);
			state.acquired[index] = false;
		}
		result
	}

	/// Recreates the swapchain for a new window size. All back buffer handles and availability semaphores are
	/// replaced, no back buffer may be acquired. If recreation fails the swapchain is destroyed.
	pub fn resize_swapchain(&self, swapchain: SwapchainHandle, width: u32, height: u32) -> RhiResult<()> {
		profiling::function_scope!();
		let acquire = Arc::clone(&self.objects.swapchains.read().try_get(swapchain)?.acquire);
		let _acquiring = acquire.lock();
		let (desc, mut native) = {
			let swapchains = self.objects.swapchains.read();
			let slot = swapchains.try_get(swapchain)?;
			if slot.state.lock().acquired.iter().any(|a| *a) {
				return Err(RhiError::invalid_state(format!(
					"{swapchain:?} can not be resized while back buffers are acquired"
				)));
			}
			let mut desc = slot.desc;
			desc.window.width = width;
			desc.window.height = height;
			(desc, slot.native.clone())
		};
		self.validate_swapchain_desc(&desc)?;

		let queue = self.objects.queues.read().try_get(desc.queue)?.native.clone();
		unsafe { self.platform.queue_wait_idle(&queue)? };
		let (old_back_buffers, old_semaphores) = {
			let mut swapchains = self.objects.swapchains.write();
			let slot = swapchains.try_get_mut(swapchain)?;
			(std::mem::take(&mut slot.back_buffers), std::mem::take(&mut slot.semaphores))
		};
		self.unregister_swapchain_objects(&old_back_buffers, &old_semaphores);

		let recreated = unsafe { self.platform.resize_swapchain(&queue, &mut native, &desc) }.and_then(|back_buffers| {
			match self.create_semaphores(back_buffers.resources.len()) {
				Ok(semaphores) => Ok((back_buffers, semaphores)),
				Err(e) => {
					for resource in back_buffers.resources {
						unsafe { self.platform.destroy_resource(resource) };
					}
					Err(e)
				}
			}
		});
		let (back_buffers, semaphores) = match recreated {
			Ok(value) => value,
			Err(e) => {
				// the slot holds a clone of `native`, only one of them may be destroyed
				if self.objects.swapchains.write().remove(swapchain).is_some() {
					unsafe { self.platform.destroy_swapchain(native) };
				}
				log::error!("recreating {swapchain:?} failed, it has been destroyed: {e}");
				return Err(e);
			}
		};

		let (count, format, extent) = (back_buffers.resources.len(), back_buffers.format, back_buffers.extent);
		let registered = self.register_swapchain_objects(swapchain, desc.usage, back_buffers, semaphores);
		let mut swapchains = self.objects.swapchains.write();
		let slot = swapchains.try_get_mut(swapchain)?;
		slot.native = native;
		slot.desc = desc;
		slot.format = format;
		slot.extent = extent;
		slot.back_buffers = registered.back_buffers;
		slot.semaphores = registered.semaphores;
		*slot.state.get_mut() = FrameState {
			next_semaphore: 0,
			acquired: SmallVec::from_elem(false, count),
		};
		log::debug!("resized {swapchain:?} to {extent:?}");
		Ok(())
	}

	/// Destroys the swapchain along with its back buffers and availability semaphores after its queue became idle.
	pub fn destroy_swapchain(&self, swapchain: &mut SwapchainHandle) {
		if let Some(slot) = take_slot(&self.objects.swapchains, swapchain) {
			// wait for an acquire still blocking on the backend swapchain
			let acquire = Arc::clone(&slot.acquire);
			let _acquiring = acquire.lock();
			let queue = self.objects.queues.read().try_get(slot.desc.queue).map(|q| q.native.clone());
			if let Ok(queue) = queue {
				if let Err(e) = unsafe { self.platform.queue_wait_idle(&queue) } {
					log::error!("queue_wait_idle failed while destroying swapchain: {e}");
				}
			}
			self.unregister_swapchain_objects(&slot.back_buffers, &slot.semaphores);
			unsafe { self.platform.destroy_swapchain(slot.native) }
		}
	}
}
