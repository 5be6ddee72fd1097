use crate::backing::handle::{CommandBufferHandle, FenceHandle, QueueHandle, SemaphoreHandle};
use crate::command::CommandBufferState;
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::platform::{PlatformSubmit, RhiPlatform};
use crate::sync::SemaphoreLocks;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::Ordering;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum QueueType {
	/// Graphics, compute and transfer work.
	#[default]
	Graphics,
	Compute,
	Transfer,
}

pub(crate) struct QueueSlot<P: RhiPlatform> {
	pub native: P::Queue,
	pub ty: QueueType,
	/// Signaled with an increasing value by every submission, tracks which submissions have completed.
	pub timeline: P::Fence,
	/// The timeline value of the last submission. Held while submitting to keep submissions ordered.
	pub submitted: Mutex<u64>,
}

impl<P: RhiPlatform> QueueSlot<P> {
	/// The timeline value of the most recent submission the GPU has finished.
	pub fn completed(&self, platform: &P) -> RhiResult<u64> {
		unsafe { platform.fence_value(&self.timeline) }
	}
}

/// Work to submit to a queue. Semaphore and fence waits happen before the command buffers execute, signals after.
#[derive(Copy, Clone, Debug, Default)]
pub struct SubmitDesc<'a> {
	pub command_buffers: &'a [CommandBufferHandle],
	pub wait_semaphores: &'a [SemaphoreHandle],
	pub wait_fences: &'a [(FenceHandle, u64)],
	pub signal_semaphores: &'a [SemaphoreHandle],
	pub signal_fences: &'a [(FenceHandle, u64)],
}

impl<P: RhiPlatform> Device<P> {
	pub fn create_queue(&self, ty: QueueType) -> RhiResult<QueueHandle> {
		unsafe {
			let native = self.platform.create_queue(ty)?;
			let timeline = match self.platform.create_fence(0) {
				Ok(fence) => fence,
				Err(e) => {
					self.platform.destroy_queue(native);
					return Err(e);
				}
			};
			Ok(self.objects.queues.write().insert(QueueSlot {
				native,
				ty,
				timeline,
				submitted: Mutex::new(0),
			}))
		}
	}

	pub fn queue_type(&self, queue: QueueHandle) -> RhiResult<QueueType> {
		Ok(self.objects.queues.read().try_get(queue)?.ty)
	}

	/// Destroys the queue after waiting for it to become idle.
	pub fn destroy_queue(&self, queue: &mut QueueHandle) {
		if let Some(slot) = take_slot(&self.objects.queues, queue) {
			unsafe {
				if let Err(e) = self.platform.queue_wait_idle(&slot.native) {
					log::error!("queue_wait_idle failed while destroying queue: {e}");
				}
				self.platform.destroy_fence(slot.timeline);
				self.platform.destroy_queue(slot.native);
			}
		}
	}

	/// Submits work to the queue. The whole submission is validated before anything reaches the backend: every command
	/// buffer must be executable and belong to a pool of this queue, signaled fence values must advance their fences,
	/// waited semaphores must have a pending signal and signaled semaphores must not.
	pub fn queue_submit(&self, queue: QueueHandle, desc: &SubmitDesc) -> RhiResult<()> {
		profiling::function_scope!();
		let queues = self.objects.queues.read();
		let fences = self.objects.fences.read();
		let semaphores = self.objects.semaphores.read();
		let pools = self.objects.command_pools.read();
		let buffers = self.objects.command_buffers.read();

		let queue_slot = queues.try_get(queue)?;
		let mut submitted = queue_slot.submitted.lock();

		for (i, cmd) in desc.command_buffers.iter().enumerate() {
			if desc.command_buffers[..i].contains(cmd) {
				return Err(RhiError::invalid_argument(format!("{cmd:?} is submitted twice")));
			}
		}
		let cmd_guards = desc
			.command_buffers
			.iter()
			.map(|handle| {
				let slot = buffers.try_get(*handle)?;
				let pool = pools.try_get(slot.pool)?;
				if pool.queue != queue {
					return Err(RhiError::invalid_argument(format!(
						"{handle:?} was allocated for {:?} and can not be submitted to {queue:?}",
						pool.queue
					)));
				}
				let guard = slot.inner.lock();
				if guard.state != CommandBufferState::Executable {
					return Err(RhiError::invalid_state(format!(
						"{handle:?} is {:?} and not executable",
						guard.state
					)));
				}
				Ok((pool, guard))
			})
			.collect::<RhiResult<SmallVec<[_; 8]>>>()?;

		let wait_fences = desc
			.wait_fences
			.iter()
			.map(|(fence, value)| Ok((&fences.try_get(*fence)?.native, *value)))
			.collect::<RhiResult<SmallVec<[_; 4]>>>()?;
		for (i, (fence, _)) in desc.signal_fences.iter().enumerate() {
			if desc.signal_fences[..i].iter().any(|(f, _)| f == fence) {
				return Err(RhiError::invalid_argument(format!("{fence:?} is signaled twice")));
			}
		}
		let signal_fence_slots = desc
			.signal_fences
			.iter()
			.map(|(fence, value)| {
				let slot = fences.try_get(*fence)?;
				slot.check_signal(*value)?;
				Ok((slot, *value))
			})
			.collect::<RhiResult<SmallVec<[_; 4]>>>()?;

		let mut semaphore_locks = SemaphoreLocks::lock(
			&semaphores,
			desc.wait_semaphores
				.iter()
				.chain(desc.signal_semaphores.iter())
				.copied(),
		)?;
		let plan = semaphore_locks.plan(desc.wait_semaphores, desc.signal_semaphores)?;

		let timeline_value = *submitted + 1;
		let command_buffers = cmd_guards
			.iter()
			.map(|(_, guard)| &guard.native)
			.collect::<SmallVec<[_; 8]>>();
		let wait_semaphores = desc
			.wait_semaphores
			.iter()
			.map(|s| semaphore_locks.native(*s))
			.collect::<SmallVec<[_; 4]>>();
		let signal_semaphores = desc
			.signal_semaphores
			.iter()
			.map(|s| semaphore_locks.native(*s))
			.collect::<SmallVec<[_; 4]>>();
		let signal_fences = signal_fence_slots
			.iter()
			.map(|(slot, value)| (&slot.native, *value))
			.chain([(&queue_slot.timeline, timeline_value)])
			.collect::<SmallVec<[_; 4]>>();

		unsafe {
			self.platform.queue_submit(
				&queue_slot.native,
				&PlatformSubmit {
					command_buffers: &command_buffers,
					wait_semaphores: &wait_semaphores,
					wait_fences: &wait_fences,
					signal_semaphores: &signal_semaphores,
					signal_fences: &signal_fences,
				},
			)?;
		}

		*submitted = timeline_value;
		semaphore_locks.commit(plan);
		for (slot, value) in &signal_fence_slots {
			slot.scheduled.fetch_max(*value, Ordering::AcqRel);
		}
		for (pool, _) in &cmd_guards {
			pool.last_submission.fetch_max(timeline_value, Ordering::AcqRel);
		}
		Ok(())
	}

	/// Blocks until all work submitted to the queue has completed.
	pub fn queue_wait_idle(&self, queue: QueueHandle) -> RhiResult<()> {
		profiling::function_scope!();
		let native = self.objects.queues.read().try_get(queue)?.native.clone();
		unsafe { self.platform.queue_wait_idle(&native) }
	}
}
