#![cfg(test)]

use crate::{ash_device, soft_device};
use gpu_rhi_core::device::Device;
use gpu_rhi_core::platform::soft::{ExecutionMode, Soft};
use gpu_rhi_core::platform::RhiPlatform;
use gpu_rhi_core::queue::{QueueType, SubmitDesc};
use gpu_rhi_core::sync::SemaphoreState;
use gpu_rhi_core::{ResultCode, RhiError};
use std::time::{Duration, Instant};

#[test]
fn test_fence_values_soft() -> anyhow::Result<()> {
	test_fence_values(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_fence_values_ash() -> anyhow::Result<()> {
	test_fence_values(&ash_device()?)
}

fn test_fence_values<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut fence = device.create_fence(5)?;
	assert_eq!(device.get_fence_value(fence)?, 5);

	device.signal_fence(fence, 7)?;
	assert_eq!(device.get_fence_value(fence)?, 7);
	// the current value again is a no-op, going backwards is rejected
	device.signal_fence(fence, 7)?;
	assert!(matches!(device.signal_fence(fence, 6), Err(RhiError::InvalidArgument(_))));

	device.wait_for_fences(&[fence], &[7], true, 0)?;
	let timeout = device.wait_for_fences(&[fence], &[8], true, 1_000_000);
	assert!(matches!(timeout, Err(RhiError::NotReady)));
	assert_eq!(ResultCode::from(&timeout), ResultCode::NotReady);

	let mismatched = device.wait_for_fences(&[fence], &[1, 2], true, 0);
	assert!(matches!(mismatched, Err(RhiError::InvalidArgument(_))));
	device.wait_for_fences(&[], &[], true, 0)?;

	device.destroy_fence(&mut fence);
	Ok(())
}

#[test]
fn test_wait_any_soft() -> anyhow::Result<()> {
	test_wait_any(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_wait_any_ash() -> anyhow::Result<()> {
	test_wait_any(&ash_device()?)
}

fn test_wait_any<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut a = device.create_fence(0)?;
	let mut b = device.create_fence(0)?;
	device.signal_fence(b, 3)?;

	device.wait_for_fences(&[a, b], &[1, 3], false, 0)?;
	assert!(matches!(
		device.wait_for_fences(&[a, b], &[1, 3], true, 1_000_000),
		Err(RhiError::NotReady)
	));

	// another thread signals the fence the main thread blocks on
	std::thread::scope(|scope| {
		scope.spawn(|| {
			std::thread::sleep(std::time::Duration::from_millis(20));
			device.signal_fence(a, 1)
		});
		device.wait_for_fences(&[a, b], &[1, 3], true, u64::MAX)
	})?;
	assert_eq!(device.get_fence_value(a)?, 1);

	device.destroy_fence(&mut a);
	device.destroy_fence(&mut b);
	Ok(())
}

#[test]
fn test_wait_with_concurrent_creation_soft() -> anyhow::Result<()> {
	test_wait_with_concurrent_creation(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_wait_with_concurrent_creation_ash() -> anyhow::Result<()> {
	test_wait_with_concurrent_creation(&ash_device()?)
}

/// A thread blocked on a fence must not stall other threads creating objects or signaling the fence.
fn test_wait_with_concurrent_creation<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut fence = device.create_fence(0)?;
	let timeout = Duration::from_secs(10);

	let (signaled, signal_time, waited, created) = std::thread::scope(|scope| {
		let waiter = scope.spawn(|| {
			let start = Instant::now();
			let result = device.wait_for_fences(&[fence], &[1], true, timeout.as_nanos() as u64);
			(result, start.elapsed())
		});
		let creator = scope.spawn(|| {
			std::thread::sleep(Duration::from_millis(100));
			device.create_fence(0)
		});
		std::thread::sleep(Duration::from_millis(200));
		let start = Instant::now();
		let signaled = device.signal_fence(fence, 1);
		let signal_time = start.elapsed();
		(
			signaled,
			signal_time,
			waiter.join().expect("waiting thread panicked"),
			creator.join().expect("creating thread panicked"),
		)
	});
	signaled?;
	let mut created = created?;
	let (result, wait_time) = waited;
	result?;
	assert!(signal_time < Duration::from_secs(2), "signal_fence stalled for {signal_time:?}");
	assert!(wait_time < Duration::from_secs(5), "wait returned only after {wait_time:?}");
	assert_eq!(device.get_fence_value(fence)?, 1);

	device.destroy_fence(&mut created);
	device.destroy_fence(&mut fence);
	Ok(())
}

#[test]
fn test_semaphore_pairing_soft() -> anyhow::Result<()> {
	test_semaphore_pairing(&soft_device()?)
}

#[test]
#[ignore = "requires a Vulkan 1.3 device"]
fn test_semaphore_pairing_ash() -> anyhow::Result<()> {
	test_semaphore_pairing(&ash_device()?)
}

/// Every signal must be consumed by exactly one wait before the semaphore can be signaled again.
fn test_semaphore_pairing<P: RhiPlatform>(device: &Device<P>) -> anyhow::Result<()> {
	let mut graphics = device.create_queue(QueueType::Graphics)?;
	let mut compute = device.create_queue(QueueType::Compute)?;
	let mut semaphore = device.create_semaphore()?;
	let mut fence = device.create_fence(0)?;

	let waiting_on_nothing = device.queue_submit(
		graphics,
		&SubmitDesc {
			wait_semaphores: &[semaphore],
			..SubmitDesc::default()
		},
	);
	assert!(matches!(waiting_on_nothing, Err(RhiError::InvalidState(_))));

	device.queue_submit(
		graphics,
		&SubmitDesc {
			signal_semaphores: &[semaphore],
			..SubmitDesc::default()
		},
	)?;
	assert_eq!(device.semaphore_state(semaphore)?, SemaphoreState::Signaled);
	let double_signal = device.queue_submit(
		graphics,
		&SubmitDesc {
			signal_semaphores: &[semaphore],
			..SubmitDesc::default()
		},
	);
	assert!(matches!(double_signal, Err(RhiError::InvalidState(_))));

	// the compute queue consumes the graphics queue's signal
	device.queue_submit(
		compute,
		&SubmitDesc {
			wait_semaphores: &[semaphore],
			signal_fences: &[(fence, 1)],
			..SubmitDesc::default()
		},
	)?;
	assert_eq!(device.semaphore_state(semaphore)?, SemaphoreState::Unsignaled);
	device.wait_for_fences(&[fence], &[1], true, u64::MAX)?;

	// fence signals must increase beyond what is already scheduled
	let stale_signal = device.queue_submit(
		compute,
		&SubmitDesc {
			signal_fences: &[(fence, 1)],
			..SubmitDesc::default()
		},
	);
	assert!(stale_signal.is_err());

	device.queue_wait_idle(graphics)?;
	device.queue_wait_idle(compute)?;
	device.destroy_fence(&mut fence);
	device.destroy_semaphore(&mut semaphore);
	device.destroy_queue(&mut graphics);
	device.destroy_queue(&mut compute);
	Ok(())
}

/// Cross queue ordering through fence waits, observed while the soft GPU holds work back.
#[test]
fn test_deferred_cross_queue_fences() -> anyhow::Result<()> {
	let device = soft_device()?;
	let soft: &Soft = device.platform();
	soft.set_execution_mode(ExecutionMode::Deferred);

	let mut producer = device.create_queue(QueueType::Compute)?;
	let mut consumer = device.create_queue(QueueType::Graphics)?;
	let mut produced = device.create_fence(0)?;
	let mut consumed = device.create_fence(0)?;

	device.queue_submit(
		consumer,
		&SubmitDesc {
			wait_fences: &[(produced, 1)],
			signal_fences: &[(consumed, 1)],
			..SubmitDesc::default()
		},
	)?;
	device.queue_submit(
		producer,
		&SubmitDesc {
			signal_fences: &[(produced, 1)],
			..SubmitDesc::default()
		},
	)?;
	assert_eq!(device.get_fence_value(produced)?, 0);
	assert_eq!(device.get_fence_value(consumed)?, 0);

	soft.flush();
	assert_eq!(device.get_fence_value(produced)?, 1);
	assert_eq!(device.get_fence_value(consumed)?, 1);

	device.destroy_fence(&mut produced);
	device.destroy_fence(&mut consumed);
	device.destroy_queue(&mut producer);
	device.destroy_queue(&mut consumer);
	Ok(())
}
