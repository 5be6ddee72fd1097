use crate::error::{RhiError, RhiResult};
use ash::prelude::VkResult;
use ash::vk::{
	Semaphore, SemaphoreCreateInfo, SemaphoreSignalInfo, SemaphoreType, SemaphoreTypeCreateInfo, SemaphoreWaitFlags,
	SemaphoreWaitInfo,
};
use ash::Device;
use smallvec::SmallVec;

pub fn create_timeline_semaphore(device: &Device, timeline_value: u64) -> VkResult<Semaphore> {
	unsafe {
		device.create_semaphore(
			&SemaphoreCreateInfo::default().push_next(
				&mut SemaphoreTypeCreateInfo::default()
					.semaphore_type(SemaphoreType::TIMELINE)
					.initial_value(timeline_value),
			),
			None,
		)
	}
}

pub fn create_binary_semaphore(device: &Device) -> VkResult<Semaphore> {
	unsafe { device.create_semaphore(&SemaphoreCreateInfo::default(), None) }
}

/// Signals `semaphore` from the host. A value equal to the current one is a no-op, Vulkan only permits increasing it.
pub unsafe fn signal_timeline_semaphore(device: &Device, semaphore: Semaphore, value: u64) -> RhiResult<()> {
	unsafe {
		if device.get_semaphore_counter_value(semaphore)? >= value {
			return Ok(());
		}
		Ok(device.signal_semaphore(&SemaphoreSignalInfo::default().semaphore(semaphore).value(value))?)
	}
}

pub unsafe fn wait_timeline_semaphores(
	device: &Device,
	fences: &[(&Semaphore, u64)],
	wait_all: bool,
	timeout_ns: u64,
) -> RhiResult<()> {
	unsafe {
		if fences.is_empty() {
			return Ok(());
		}
		let semaphores = fences.iter().map(|(s, _)| **s).collect::<SmallVec<[_; 8]>>();
		let values = fences.iter().map(|(_, v)| *v).collect::<SmallVec<[_; 8]>>();
		let flags = if wait_all {
			SemaphoreWaitFlags::empty()
		} else {
			SemaphoreWaitFlags::ANY
		};
		match device.wait_semaphores(
			&SemaphoreWaitInfo::default()
				.flags(flags)
				.semaphores(&semaphores)
				.values(&values),
			timeout_ns,
		) {
			Ok(()) => Ok(()),
			Err(ash::vk::Result::TIMEOUT) => Err(RhiError::NotReady),
			Err(e) => Err(e.into()),
		}
	}
}
