use crate::backing::arena::Arena;
use crate::backing::handle::{kind, FenceHandle, SemaphoreHandle, SwapchainHandle};
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::platform::RhiPlatform;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct FenceSlot<P: RhiPlatform> {
	pub native: P::Fence,
	/// Highest value any signal has been scheduled or performed with.
	pub scheduled: AtomicU64,
	/// Highest value observed, so reported values never decrease.
	pub observed: AtomicU64,
}

impl<P: RhiPlatform> FenceSlot<P> {
	/// Reserves `value` as the next signal. Signals must strictly increase the fence.
	pub fn schedule_signal(&self, value: u64) -> RhiResult<()> {
		self.scheduled
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |scheduled| {
				(value > scheduled).then_some(value)
			})
			.map(|_| ())
			.map_err(|scheduled| {
				RhiError::invalid_argument(format!(
					"signaling fence to {value} would not advance it past {scheduled}"
				))
			})
	}

	pub fn check_signal(&self, value: u64) -> RhiResult<()> {
		let scheduled = self.scheduled.load(Ordering::Acquire);
		if value > scheduled {
			Ok(())
		} else {
			Err(RhiError::invalid_argument(format!(
				"signaling fence to {value} would not advance it past {scheduled}"
			)))
		}
	}

	pub fn observe(&self, value: u64) -> u64 {
		self.observed.fetch_max(value, Ordering::AcqRel).max(value)
	}
}

/// Tracked state of a binary semaphore. Every signal must be consumed by exactly one wait before the semaphore can be
/// signaled again.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum SemaphoreState {
	#[default]
	Unsignaled,
	/// A signal has been submitted that no wait has consumed yet.
	Signaled,
}

pub(crate) struct SemaphoreSlot<P: RhiPlatform> {
	pub native: P::Semaphore,
	pub state: Mutex<SemaphoreState>,
	/// Availability semaphores are owned by their swapchain.
	pub swapchain: Option<SwapchainHandle>,
}

/// Locks on the state of a set of semaphores, taken in handle order.
pub(crate) struct SemaphoreLocks<'a, P: RhiPlatform> {
	entries: SmallVec<[(SemaphoreHandle, &'a SemaphoreSlot<P>, MutexGuard<'a, SemaphoreState>); 8]>,
}

impl<'a, P: RhiPlatform> SemaphoreLocks<'a, P> {
	pub fn lock(
		arena: &'a Arena<kind::Semaphore, SemaphoreSlot<P>>,
		handles: impl IntoIterator<Item = SemaphoreHandle>,
	) -> RhiResult<Self> {
		let mut handles = handles.into_iter().collect::<SmallVec<[_; 8]>>();
		handles.sort_by_key(|h| h.to_raw());
		handles.dedup();
		let entries = handles
			.into_iter()
			.map(|handle| {
				let slot = arena.try_get(handle)?;
				Ok((handle, slot, slot.state.lock()))
			})
			.collect::<RhiResult<_>>()?;
		Ok(Self { entries })
	}

	fn index(&self, handle: SemaphoreHandle) -> usize {
		self.entries
			.binary_search_by_key(&handle.to_raw(), |(h, _, _)| h.to_raw())
			.unwrap_or_else(|_| unreachable!("semaphore was not locked"))
	}

	pub fn native(&self, handle: SemaphoreHandle) -> &'a P::Semaphore {
		&self.entries[self.index(handle)].1.native
	}

	/// Computes the states after consuming `waits` and then signaling `signals`, without applying them.
	pub fn plan(&self, waits: &[SemaphoreHandle], signals: &[SemaphoreHandle]) -> RhiResult<SemaphorePlan> {
		let mut states = self.entries.iter().map(|(_, _, s)| **s).collect::<SmallVec<[_; 8]>>();
		for wait in waits {
			let state = &mut states[self.index(*wait)];
			if *state != SemaphoreState::Signaled {
				return Err(RhiError::invalid_state(format!(
					"{wait:?} is waited on without a pending signal"
				)));
			}
			*state = SemaphoreState::Unsignaled;
		}
		for signal in signals {
			let state = &mut states[self.index(*signal)];
			if *state != SemaphoreState::Unsignaled {
				return Err(RhiError::invalid_state(format!(
					"{signal:?} is signaled while its previous signal has not been waited on"
				)));
			}
			*state = SemaphoreState::Signaled;
		}
		Ok(SemaphorePlan { states })
	}

	pub fn commit(&mut self, plan: SemaphorePlan) {
		for ((_, _, guard), state) in self.entries.iter_mut().zip(plan.states) {
			**guard = state;
		}
	}
}

pub(crate) struct SemaphorePlan {
	states: SmallVec<[SemaphoreState; 8]>,
}

impl<P: RhiPlatform> Device<P> {
	pub fn create_fence(&self, initial_value: u64) -> RhiResult<FenceHandle> {
		let native = unsafe { self.platform.create_fence(initial_value)? };
		Ok(self.objects.fences.write().insert(FenceSlot {
			native,
			scheduled: AtomicU64::new(initial_value),
			observed: AtomicU64::new(initial_value),
		}))
	}

	pub fn destroy_fence(&self, fence: &mut FenceHandle) {
		if let Some(slot) = take_slot(&self.objects.fences, fence) {
			unsafe { self.platform.destroy_fence(slot.native) }
		}
	}

	/// The current value of the fence. Successive calls never return a smaller value.
	pub fn get_fence_value(&self, fence: FenceHandle) -> RhiResult<u64> {
		let fences = self.objects.fences.read();
		let slot = fences.try_get(fence)?;
		let value = unsafe { self.platform.fence_value(&slot.native)? };
		Ok(slot.observe(value))
	}

	/// Signals the fence from the CPU. Signaling the current value is a no-op, any smaller value or a value not
	/// above every pending GPU signal is rejected.
	pub fn signal_fence(&self, fence: FenceHandle, value: u64) -> RhiResult<()> {
		let fences = self.objects.fences.read();
		let slot = fences.try_get(fence)?;
		let current = slot.observe(unsafe { self.platform.fence_value(&slot.native)? });
		if value == current {
			return Ok(());
		}
		slot.schedule_signal(value)?;
		unsafe { self.platform.signal_fence(&slot.native, value) }
	}

	/// Blocks until every fence (or any fence if `wait_all` is false) reached its value. Returns
	/// [`RhiError::NotReady`] if `timeout_ns` elapsed first, `u64::MAX` waits forever.
	pub fn wait_for_fences(
		&self,
		fences: &[FenceHandle],
		values: &[u64],
		wait_all: bool,
		timeout_ns: u64,
	) -> RhiResult<()> {
		profiling::function_scope!();
		if fences.len() != values.len() {
			return Err(RhiError::invalid_argument(format!(
				"{} fences but {} values",
				fences.len(),
				values.len()
			)));
		}
		if fences.is_empty() {
			return Ok(());
		}
		let natives = {
			let arena = self.objects.fences.read();
			let slots = fences
				.iter()
				.map(|f| arena.try_get(*f))
				.collect::<RhiResult<SmallVec<[_; 4]>>>()?;

			// fast path on values we have already observed
			let reached = |(slot, value): (&&FenceSlot<P>, &u64)| slot.observed.load(Ordering::Acquire) >= *value;
			let done = if wait_all {
				slots.iter().zip(values).all(reached)
			} else {
				slots.iter().zip(values).any(reached)
			};
			if done {
				return Ok(());
			}
			slots.iter().map(|slot| slot.native.clone()).collect::<SmallVec<[_; 4]>>()
		};

		// no object table may stay locked while blocking, the signal ending the wait may need to lock it exclusively
		let waits = natives
			.iter()
			.zip(values)
			.map(|(native, value)| (native, *value))
			.collect::<SmallVec<[_; 4]>>();
		unsafe { self.platform.wait_fences(&waits, wait_all, timeout_ns)? };

		let arena = self.objects.fences.read();
		for (fence, native) in fences.iter().zip(&natives) {
			// a fence destroyed during the wait simply isn't observed
			if let Ok(slot) = arena.try_get(*fence) {
				slot.observe(unsafe { self.platform.fence_value(native)? });
			}
		}
		Ok(())
	}

	pub fn create_semaphore(&self) -> RhiResult<SemaphoreHandle> {
		let native = unsafe { self.platform.create_semaphore()? };
		Ok(self.objects.semaphores.write().insert(SemaphoreSlot {
			native,
			state: Mutex::new(SemaphoreState::Unsignaled),
			swapchain: None,
		}))
	}

	pub fn semaphore_state(&self, semaphore: SemaphoreHandle) -> RhiResult<SemaphoreState> {
		Ok(*self.objects.semaphores.read().try_get(semaphore)?.state.lock())
	}

	pub fn destroy_semaphore(&self, semaphore: &mut SemaphoreHandle) {
		if let Ok(slot) = self.objects.semaphores.read().try_get(*semaphore) {
			if let Some(swapchain) = slot.swapchain {
				log::error!("{semaphore:?} is owned by {swapchain:?} and can not be destroyed");
				return;
			}
		}
		if let Some(slot) = take_slot(&self.objects.semaphores, semaphore) {
			unsafe { self.platform.destroy_semaphore(slot.native) }
		}
	}
}
