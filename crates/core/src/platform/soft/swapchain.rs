use crate::error::RhiResult;
use crate::format::Format;
use crate::platform::soft::memory::SoftResource;
use crate::platform::soft::Soft;
use crate::platform::PlatformBackBuffers;
use crate::resource::ResourceDesc;
use crate::swapchain::SwapchainDesc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Back buffers presented to nowhere. Acquisition hands out released back buffers in the order they were presented.
pub struct SoftSwapchainData {
	pub images: Vec<SoftResource>,
	available: Mutex<VecDeque<u32>>,
	presented: Mutex<u64>,
}

impl SoftSwapchainData {
	pub fn new(desc: &SwapchainDesc) -> RhiResult<Self> {
		let resource_desc = ResourceDesc::texture_2d(
			desc.format,
			desc.window.width,
			desc.window.height,
			desc.usage,
		);
		let images = (0..desc.back_buffer_count)
			.map(|_| SoftResource::back_buffer(&resource_desc))
			.collect::<RhiResult<Vec<_>>>()?;
		Ok(Self {
			images,
			available: Mutex::new((0..desc.back_buffer_count).collect()),
			presented: Mutex::new(0),
		})
	}

	pub fn try_acquire(&self) -> Option<u32> {
		self.available.lock().pop_front()
	}

	pub fn release(&self, index: u32) {
		self.available.lock().push_back(index);
		*self.presented.lock() += 1;
	}

	/// Number of presents the emulated display has completed.
	pub fn presented(&self) -> u64 {
		*self.presented.lock()
	}

	fn back_buffers(&self) -> PlatformBackBuffers<Soft> {
		let desc = self.images.first().map(|image| image.desc);
		PlatformBackBuffers {
			resources: self.images.clone(),
			format: desc.map_or(Format::Unknown, |d| d.format),
			extent: desc.map_or([0, 0], |d| [d.width as u32, d.height]),
		}
	}
}

#[derive(Clone)]
pub struct SoftSwapchain(pub Arc<SoftSwapchainData>);

impl SoftSwapchain {
	pub fn new(desc: &SwapchainDesc) -> RhiResult<Self> {
		Ok(Self(Arc::new(SoftSwapchainData::new(desc)?)))
	}

	pub fn back_buffers(&self) -> PlatformBackBuffers<Soft> {
		self.0.back_buffers()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backing::handle::QueueHandle;
	use crate::barrier::TextureLayout;
	use crate::swapchain::WindowHandle;
	use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};

	#[test]
	fn acquire_round_robin() -> RhiResult<()> {
		let window = WindowHandle {
			display: RawDisplayHandle::Web(WebDisplayHandle::new()),
			window: RawWindowHandle::Web(WebWindowHandle::new(1)),
			width: 4,
			height: 2,
		};
		let desc = SwapchainDesc {
			back_buffer_count: 2,
			..SwapchainDesc::new(window, QueueHandle::INVALID)
		};
		let swapchain = SoftSwapchain::new(&desc)?;
		let back_buffers = swapchain.back_buffers();
		assert_eq!(back_buffers.extent, [4, 2]);
		assert_eq!(back_buffers.resources[1].layout(0, 0), TextureLayout::Present);

		assert_eq!(swapchain.0.try_acquire(), Some(0));
		assert_eq!(swapchain.0.try_acquire(), Some(1));
		assert_eq!(swapchain.0.try_acquire(), None);
		swapchain.0.release(1);
		swapchain.0.release(0);
		assert_eq!(swapchain.0.try_acquire(), Some(1));
		assert_eq!(swapchain.0.presented(), 2);
		Ok(())
	}
}
