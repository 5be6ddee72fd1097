#![cfg(test)]

use crate::soft_device;
use gpu_rhi_core::backing::handle::{
	CommandBufferHandle, CommandPoolHandle, FenceHandle, QueueHandle, SemaphoreHandle, SwapchainHandle, ViewHandle,
};
use gpu_rhi_core::barrier::{TextureBarrier, TextureLayout};
use gpu_rhi_core::command::{ColorAttachment, LoadOp, Rect, RenderingDesc, StoreOp};
use gpu_rhi_core::device::Device;
use gpu_rhi_core::platform::soft::{ExecutionMode, Soft};
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::queue::{QueueType, SubmitDesc};
use gpu_rhi_core::swapchain::{Frame, PresentDesc, SwapchainDesc, WindowHandle};
use gpu_rhi_core::view::{ViewDesc, ViewType};
use gpu_rhi_core::{ResultCode, RhiError, RhiResult};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};
use std::time::{Duration, Instant};

const FRAMES_IN_FLIGHT: usize = 2;

/// The soft backend presents to nowhere, any window handle will do.
fn headless_window(width: u32, height: u32) -> WindowHandle {
	WindowHandle {
		display: RawDisplayHandle::Web(WebDisplayHandle::new()),
		window: RawWindowHandle::Web(WebWindowHandle::new(1)),
		width,
		height,
	}
}

/// Per in-flight frame resources, reused once `fence` reached `value`.
struct FrameSlot {
	pool: CommandPoolHandle,
	cmd: CommandBufferHandle,
	rendered: SemaphoreHandle,
	fence: FenceHandle,
	value: u64,
}

impl FrameSlot {
	fn new<P: RhiPlatform>(device: &Device<P>, queue: QueueHandle) -> RhiResult<Self> {
		let pool = device.create_command_pool(queue)?;
		Ok(Self {
			pool,
			cmd: device.create_command_buffer(pool)?,
			rendered: device.create_semaphore()?,
			fence: device.create_fence(0)?,
			value: 0,
		})
	}

	fn destroy<P: RhiPlatform>(mut self, device: &Device<P>) {
		device.destroy_command_pool(&mut self.pool);
		device.destroy_semaphore(&mut self.rendered);
		device.destroy_fence(&mut self.fence);
	}
}

struct Renderer {
	queue: QueueHandle,
	swapchain: SwapchainHandle,
	views: Vec<ViewHandle>,
	extent: [u32; 2],
}

impl Renderer {
	fn new<P: RhiPlatform>(device: &Device<P>, back_buffer_count: u32) -> RhiResult<Self> {
		let queue = device.create_queue(QueueType::Graphics)?;
		let swapchain = device.create_swapchain(&SwapchainDesc {
			back_buffer_count,
			..SwapchainDesc::new(headless_window(32, 16), queue)
		})?;
		let views = device
			.swapchain_back_buffers(swapchain)?
			.into_iter()
			.map(|back_buffer| device.create_view(&ViewDesc::new(back_buffer, ViewType::RenderTarget)))
			.collect::<RhiResult<Vec<_>>>()?;
		Ok(Self {
			queue,
			swapchain,
			extent: device.swapchain_extent(swapchain)?,
			views,
		})
	}

	/// Records a clear of the acquired back buffer and submits it, waiting for the back buffer to become available.
	fn submit<P: RhiPlatform>(&self, device: &Device<P>, slot: &mut FrameSlot, frame: &Frame) -> RhiResult<()> {
		let [width, height] = self.extent;
		device.reset_command_pool(slot.pool)?;
		device.begin_command_buffer(slot.cmd)?;
		device.cmd_barrier(
			slot.cmd,
			&[TextureBarrier::transition(frame.back_buffer, TextureLayout::Present, TextureLayout::RenderTarget).into()],
		)?;
		device.cmd_begin_rendering(
			slot.cmd,
			&RenderingDesc {
				render_area: Rect::from_extent(width, height),
				color_attachments: &[ColorAttachment {
					view: self.views[frame.back_buffer_index as usize],
					load_op: LoadOp::Clear,
					store_op: StoreOp::Store,
					clear_color: [0.1, 0.2, 0.3, 1.],
				}],
				depth_attachment: None,
			},
		)?;
		device.cmd_end_rendering(slot.cmd)?;
		device.cmd_barrier(
			slot.cmd,
			&[TextureBarrier::transition(frame.back_buffer, TextureLayout::RenderTarget, TextureLayout::Present).into()],
		)?;
		device.end_command_buffer(slot.cmd)?;

		slot.value += 1;
		device.queue_submit(
			self.queue,
			&SubmitDesc {
				command_buffers: &[slot.cmd],
				wait_semaphores: &[frame.availability_semaphore],
				signal_semaphores: &[slot.rendered],
				signal_fences: &[(slot.fence, slot.value)],
				..SubmitDesc::default()
			},
		)
	}

	fn present<P: RhiPlatform>(&self, device: &Device<P>, slot: &FrameSlot, frame: &Frame) -> RhiResult<()> {
		device.present(&PresentDesc {
			swapchain: self.swapchain,
			back_buffer_index: frame.back_buffer_index,
			wait_semaphores: &[slot.rendered],
		})
	}

	fn destroy<P: RhiPlatform>(mut self, device: &Device<P>) {
		for view in &mut self.views {
			device.destroy_view(view);
		}
		device.destroy_swapchain(&mut self.swapchain);
		device.destroy_queue(&mut self.queue);
	}
}

#[test]
fn test_frame_loop_soft() -> anyhow::Result<()> {
	let device = soft_device()?;
	test_frame_loop(&device, 3, 8)?;
	let soft: &Soft = device.platform();
	assert_eq!(soft.take_validation_messages(), Vec::<String>::new());
	Ok(())
}

/// Runs `frames` frames, waiting on a frame slot's fence before reusing it. The back buffer count and frames in
/// flight differ on purpose.
fn test_frame_loop<P: RhiPlatform>(device: &Device<P>, back_buffer_count: u32, frames: usize) -> anyhow::Result<()> {
	let renderer = Renderer::new(device, back_buffer_count)?;
	let mut slots = (0..FRAMES_IN_FLIGHT)
		.map(|_| FrameSlot::new(device, renderer.queue))
		.collect::<RhiResult<Vec<_>>>()?;

	for i in 0..frames {
		let slot = &mut slots[i % FRAMES_IN_FLIGHT];
		device.wait_for_fences(&[slot.fence], &[slot.value], true, u64::MAX)?;
		let frame = device.get_next_frame(renderer.swapchain, u64::MAX)?;
		assert!(frame.back_buffer_index < back_buffer_count);
		renderer.submit(device, slot, &frame)?;
		renderer.present(device, slot, &frame)?;
	}

	device.queue_wait_idle(renderer.queue)?;
	for slot in slots {
		assert_eq!(device.get_fence_value(slot.fence)?, slot.value);
		slot.destroy(device);
	}
	renderer.destroy(device);
	Ok(())
}

/// With two frames submitted and none executed, the first frame's resources can not be reused yet.
#[test]
fn test_frames_in_flight() -> anyhow::Result<()> {
	let device = soft_device()?;
	let soft: &Soft = device.platform();
	soft.set_execution_mode(ExecutionMode::Deferred);

	let renderer = Renderer::new(&device, 2)?;
	let mut slots = (0..FRAMES_IN_FLIGHT)
		.map(|_| FrameSlot::new(&device, renderer.queue))
		.collect::<RhiResult<Vec<_>>>()?;

	let frames = [
		device.get_next_frame(renderer.swapchain, 0)?,
		device.get_next_frame(renderer.swapchain, 0)?,
	];
	for (slot, frame) in slots.iter_mut().zip(&frames) {
		renderer.submit(&device, slot, frame)?;
		renderer.present(&device, slot, frame)?;
	}
	let reuse = device.reset_command_pool(slots[0].pool);
	assert_eq!(ResultCode::from(&reuse), ResultCode::NotReady);
	assert_eq!(device.get_fence_value(slots[0].fence)?, 0);

	soft.flush();
	device.wait_for_fences(&[slots[0].fence], &[1], true, 0)?;
	device.reset_command_pool(slots[0].pool)?;

	// back buffers come back in the order they were presented
	let next = device.get_next_frame(renderer.swapchain, 0)?;
	assert_eq!(next.back_buffer_index, frames[0].back_buffer_index);
	assert_eq!(soft.take_validation_messages(), Vec::<String>::new());

	renderer.submit(&device, &mut slots[0], &next)?;
	renderer.present(&device, &slots[0], &next)?;
	device.device_wait_idle()?;
	for slot in slots {
		slot.destroy(&device);
	}
	renderer.destroy(&device);
	Ok(())
}

#[test]
fn test_acquire_present_protocol() -> anyhow::Result<()> {
	let device = soft_device()?;
	let renderer = Renderer::new(&device, 3)?;
	let queue = renderer.queue;
	let swapchain = renderer.swapchain;
	assert_eq!(device.swapchain_back_buffers(swapchain)?.len(), 3);
	assert_eq!(renderer.extent, [32, 16]);

	// acquire everything, consuming each availability semaphore with an empty submission
	let mut frames = Vec::new();
	for _ in 0..3 {
		let frame = device.get_next_frame(swapchain, 0)?;
		device.queue_submit(
			queue,
			&SubmitDesc {
				wait_semaphores: &[frame.availability_semaphore],
				..SubmitDesc::default()
			},
		)?;
		frames.push(frame);
	}
	assert!(matches!(device.get_next_frame(swapchain, 0), Err(RhiError::NotReady)));

	// a present waiting on a semaphore nobody signaled is rejected
	let mut unsignaled = device.create_semaphore()?;
	let rejected = device.present(&PresentDesc {
		swapchain,
		back_buffer_index: frames[0].back_buffer_index,
		wait_semaphores: &[unsignaled],
	});
	assert!(matches!(rejected, Err(RhiError::InvalidState(_))));

	// back buffers may be presented out of acquisition order and are reacquired in presentation order
	for i in [2, 0, 1] {
		device.present(&PresentDesc {
			swapchain,
			back_buffer_index: frames[i].back_buffer_index,
			wait_semaphores: &[],
		})?;
	}
	let twice = device.present(&PresentDesc {
		swapchain,
		back_buffer_index: frames[2].back_buffer_index,
		wait_semaphores: &[],
	});
	assert!(matches!(twice, Err(RhiError::InvalidState(_))));
	let reacquired = device.get_next_frame(swapchain, 0)?;
	assert_eq!(reacquired.back_buffer_index, frames[2].back_buffer_index);
	assert_eq!(reacquired.back_buffer, frames[2].back_buffer);

	// back buffers belong to the swapchain
	let mut back_buffer = reacquired.back_buffer;
	device.destroy_resource(&mut back_buffer);
	assert!(device.resource_desc(reacquired.back_buffer).is_ok());

	device.queue_submit(
		queue,
		&SubmitDesc {
			wait_semaphores: &[reacquired.availability_semaphore],
			..SubmitDesc::default()
		},
	)?;
	device.present(&PresentDesc {
		swapchain,
		back_buffer_index: reacquired.back_buffer_index,
		wait_semaphores: &[],
	})?;
	device.destroy_semaphore(&mut unsignaled);
	renderer.destroy(&device);
	Ok(())
}

/// A thread blocked acquiring a back buffer must not stall another thread creating objects and presenting.
#[test]
fn test_acquire_unblocked_by_present() -> anyhow::Result<()> {
	let device = soft_device()?;
	let renderer = Renderer::new(&device, 2)?;
	let swapchain = renderer.swapchain;
	let mut frames = Vec::new();
	for _ in 0..2 {
		let frame = device.get_next_frame(swapchain, 0)?;
		device.queue_submit(
			renderer.queue,
			&SubmitDesc {
				wait_semaphores: &[frame.availability_semaphore],
				..SubmitDesc::default()
			},
		)?;
		frames.push(frame);
	}

	let (presented, acquired, created) = std::thread::scope(|scope| {
		let acquirer = scope.spawn(|| {
			let start = Instant::now();
			let frame = device.get_next_frame(swapchain, Duration::from_secs(10).as_nanos() as u64);
			(frame, start.elapsed())
		});
		let creator = scope.spawn(|| {
			std::thread::sleep(Duration::from_millis(100));
			device.create_fence(0)
		});
		std::thread::sleep(Duration::from_millis(200));
		let presented = device.present(&PresentDesc {
			swapchain,
			back_buffer_index: frames[1].back_buffer_index,
			wait_semaphores: &[],
		});
		(
			presented,
			acquirer.join().expect("acquiring thread panicked"),
			creator.join().expect("creating thread panicked"),
		)
	});
	presented?;
	let mut fence = created?;
	let (frame, acquire_time) = acquired;
	let frame = frame?;
	assert!(acquire_time < Duration::from_secs(5), "acquire returned only after {acquire_time:?}");
	assert_eq!(frame.back_buffer_index, frames[1].back_buffer_index);

	for frame in [frames[0], frame] {
		device.queue_submit(
			renderer.queue,
			&SubmitDesc {
				wait_semaphores: &[frame.availability_semaphore],
				..SubmitDesc::default()
			},
		)?;
		device.present(&PresentDesc {
			swapchain,
			back_buffer_index: frame.back_buffer_index,
			wait_semaphores: &[],
		})?;
	}
	device.queue_wait_idle(renderer.queue)?;
	device.destroy_fence(&mut fence);
	renderer.destroy(&device);
	Ok(())
}

#[test]
fn test_resize() -> anyhow::Result<()> {
	let device = soft_device()?;
	let mut renderer = Renderer::new(&device, 2)?;
	let swapchain = renderer.swapchain;
	let old_back_buffers = device.swapchain_back_buffers(swapchain)?;

	let frame = device.get_next_frame(swapchain, 0)?;
	assert!(matches!(
		device.resize_swapchain(swapchain, 64, 48),
		Err(RhiError::InvalidState(_))
	));
	device.queue_submit(
		renderer.queue,
		&SubmitDesc {
			wait_semaphores: &[frame.availability_semaphore],
			..SubmitDesc::default()
		},
	)?;
	device.present(&PresentDesc {
		swapchain,
		back_buffer_index: frame.back_buffer_index,
		wait_semaphores: &[],
	})?;

	for view in &mut renderer.views {
		device.destroy_view(view);
	}
	assert!(matches!(
		device.resize_swapchain(swapchain, 0, 48),
		Err(RhiError::InvalidArgument(_))
	));
	device.resize_swapchain(swapchain, 64, 48)?;
	assert_eq!(device.swapchain_extent(swapchain)?, [64, 48]);
	let new_back_buffers = device.swapchain_back_buffers(swapchain)?;
	assert_eq!(new_back_buffers.len(), 2);
	for old in old_back_buffers {
		assert_eq!(device.resource_desc(old).unwrap_err().code(), ResultCode::NotFound);
	}
	let desc = device.resource_desc(new_back_buffers[0])?;
	assert_eq!((desc.width, desc.height), (64, 48));

	renderer.views = new_back_buffers
		.iter()
		.map(|back_buffer| device.create_view(&ViewDesc::new(*back_buffer, ViewType::RenderTarget)))
		.collect::<RhiResult<Vec<_>>>()?;
	renderer.extent = [64, 48];
	let mut slot = FrameSlot::new(&device, renderer.queue)?;
	let frame = device.get_next_frame(swapchain, 0)?;
	renderer.submit(&device, &mut slot, &frame)?;
	renderer.present(&device, &slot, &frame)?;
	device.queue_wait_idle(renderer.queue)?;

	let soft: &Soft = device.platform();
	assert_eq!(soft.take_validation_messages(), Vec::<String>::new());
	slot.destroy(&device);
	renderer.destroy(&device);
	Ok(())
}
