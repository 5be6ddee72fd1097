use crate::barrier::TextureLayout;
use crate::error::{RhiError, RhiResult};
use crate::platform::soft::command::{Executor, SoftCommand};
use crate::platform::soft::swapchain::SoftSwapchainData;
use crate::platform::soft::validation::Validation;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// When the emulated GPU executes submitted work.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ExecutionMode {
	/// Work executes during submission, as soon as its waits are satisfied.
	#[default]
	Immediate,
	/// Work stays queued until the CPU waits on it or calls [`Soft::flush`], keeping submissions in flight.
	///
	/// [`Soft::flush`]: crate::platform::soft::Soft::flush
	Deferred,
}

/// How long an idle wait may stall on waits that are never signaled before the device is considered lost.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct SoftFenceData {
	value: AtomicU64,
}

impl SoftFenceData {
	pub fn value(&self) -> u64 {
		self.value.load(Ordering::Acquire)
	}

	fn signal(&self, value: u64) {
		self.value.fetch_max(value, Ordering::AcqRel);
	}
}

pub type SoftFence = Arc<SoftFenceData>;

pub fn new_fence(initial_value: u64) -> SoftFence {
	Arc::new(SoftFenceData {
		value: AtomicU64::new(initial_value),
	})
}

/// A binary semaphore counting signals not yet consumed by a wait.
#[derive(Debug, Default)]
pub struct SoftSemaphoreData {
	signals: AtomicU32,
}

impl SoftSemaphoreData {
	pub fn signaled(&self) -> bool {
		self.signals.load(Ordering::Acquire) > 0
	}

	pub(crate) fn signal(&self) {
		self.signals.fetch_add(1, Ordering::AcqRel);
	}

	fn consume(&self) {
		self.signals.fetch_sub(1, Ordering::AcqRel);
	}
}

pub type SoftSemaphore = Arc<SoftSemaphoreData>;

pub struct Submission {
	pub command_buffers: Vec<Arc<[SoftCommand]>>,
	pub wait_semaphores: Vec<SoftSemaphore>,
	pub wait_fences: Vec<(SoftFence, u64)>,
	pub signal_semaphores: Vec<SoftSemaphore>,
	pub signal_fences: Vec<(SoftFence, u64)>,
}

pub struct Presentation {
	pub swapchain: Arc<SoftSwapchainData>,
	pub back_buffer_index: u32,
	pub wait_semaphores: Vec<SoftSemaphore>,
}

pub enum Operation {
	Submit(Submission),
	Present(Presentation),
}

impl Operation {
	fn wait_semaphores(&self) -> &[SoftSemaphore] {
		match self {
			Operation::Submit(submit) => &submit.wait_semaphores,
			Operation::Present(present) => &present.wait_semaphores,
		}
	}

	fn ready(&self) -> bool {
		let fences = match self {
			Operation::Submit(submit) => submit.wait_fences.as_slice(),
			Operation::Present(_) => &[],
		};
		self.wait_semaphores().iter().all(|s| s.signaled()) && fences.iter().all(|(f, v)| f.value() >= *v)
	}
}

#[derive(Default)]
struct GpuState {
	mode: ExecutionMode,
	/// Pending operations per queue, `None` for destroyed queues.
	queues: Vec<Option<VecDeque<Operation>>>,
}

impl GpuState {
	fn idle(&self, queue: Option<usize>) -> bool {
		match queue {
			Some(queue) => self.queues.get(queue).map_or(true, |q| q.as_ref().map_or(true, VecDeque::is_empty)),
			None => self.queues.iter().flatten().all(VecDeque::is_empty),
		}
	}
}

/// The emulated GPU: an in-order queue of operations per device queue, executed on the calling thread.
pub struct SoftGpu {
	state: Mutex<GpuState>,
	progress: Condvar,
	pub validation: Validation,
}

impl SoftGpu {
	pub fn new(validation: Validation) -> Self {
		Self {
			state: Mutex::new(GpuState::default()),
			progress: Condvar::new(),
			validation,
		}
	}

	pub fn mode(&self) -> ExecutionMode {
		self.state.lock().mode
	}

	pub fn set_mode(&self, mode: ExecutionMode) {
		let mut state = self.state.lock();
		state.mode = mode;
		if mode == ExecutionMode::Immediate {
			self.pump(&mut state);
		}
	}

	pub fn create_queue(&self) -> usize {
		let mut state = self.state.lock();
		state.queues.push(Some(VecDeque::new()));
		state.queues.len() - 1
	}

	pub fn destroy_queue(&self, queue: usize) {
		let mut state = self.state.lock();
		if let Some(Some(pending)) = state.queues.get(queue) {
			if !pending.is_empty() {
				log::warn!("destroying soft queue {queue} with {} pending operations", pending.len());
			}
		}
		if let Some(slot) = state.queues.get_mut(queue) {
			*slot = None;
		}
	}

	pub fn enqueue(&self, queue: usize, operation: Operation) {
		let mut state = self.state.lock();
		if let Some(Some(pending)) = state.queues.get_mut(queue) {
			pending.push_back(operation);
		}
		if state.mode == ExecutionMode::Immediate {
			self.pump(&mut state);
		}
	}

	/// Executes all work whose waits are satisfied.
	pub fn flush(&self) {
		let mut state = self.state.lock();
		self.pump(&mut state);
	}

	/// Runs ready operations until no queue makes progress.
	fn pump(&self, state: &mut MutexGuard<GpuState>) {
		let mut any = false;
		loop {
			let mut progressed = false;
			for queue in state.queues.iter_mut().flatten() {
				while queue.front().is_some_and(Operation::ready) {
					if let Some(operation) = queue.pop_front() {
						self.execute(operation);
						progressed = true;
					}
				}
			}
			if !progressed {
				break;
			}
			any = true;
		}
		if any {
			self.progress.notify_all();
		}
	}

	fn execute(&self, operation: Operation) {
		profiling::function_scope!();
		for semaphore in operation.wait_semaphores() {
			semaphore.consume();
		}
		match operation {
			Operation::Submit(submit) => {
				let mut executor = Executor::new(&self.validation);
				for commands in &submit.command_buffers {
					executor.execute(commands);
				}
				for semaphore in &submit.signal_semaphores {
					semaphore.signal();
				}
				for (fence, value) in &submit.signal_fences {
					fence.signal(*value);
				}
			}
			Operation::Present(present) => {
				let swapchain = &present.swapchain;
				if let Some(image) = swapchain.images.get(present.back_buffer_index as usize) {
					let layout = image.layout(0, 0);
					if layout != TextureLayout::Present {
						self.validation.report(format!(
							"back buffer {} is presented in layout {layout:?}",
							present.back_buffer_index
						));
					}
				}
				swapchain.release(present.back_buffer_index);
			}
		}
	}

	/// Blocks until `done` holds, pumping work in between. Returns false on timeout.
	fn wait_until(&self, timeout: Option<Duration>, mut done: impl FnMut(&GpuState) -> bool) -> bool {
		let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
		let mut state = self.state.lock();
		loop {
			self.pump(&mut state);
			if done(&*state) {
				return true;
			}
			match deadline {
				Some(deadline) => {
					if self.progress.wait_until(&mut state, deadline).timed_out() {
						self.pump(&mut state);
						return done(&*state);
					}
				}
				None => self.progress.wait(&mut state),
			}
		}
	}

	pub fn wait_fences(&self, fences: &[(&SoftFence, u64)], wait_all: bool, timeout_ns: u64) -> RhiResult<()> {
		let reached = |(fence, value): &(&SoftFence, u64)| fence.value() >= *value;
		let timeout = (timeout_ns != u64::MAX).then(|| Duration::from_nanos(timeout_ns));
		let done = self.wait_until(timeout, |_| {
			if wait_all {
				fences.iter().all(reached)
			} else {
				fences.iter().any(reached)
			}
		});
		if done {
			Ok(())
		} else {
			Err(RhiError::NotReady)
		}
	}

	pub fn signal_fence(&self, fence: &SoftFence, value: u64) {
		let mut state = self.state.lock();
		fence.signal(value);
		self.pump(&mut state);
		self.progress.notify_all();
	}

	/// Waits for one queue, or every queue if `None`, to drain.
	pub fn wait_idle(&self, queue: Option<usize>) -> RhiResult<()> {
		if self.wait_until(Some(STALL_TIMEOUT), |state| state.idle(queue)) {
			Ok(())
		} else {
			self.validation.report(format!(
				"queue {queue:?} stalled on waits that are never signaled"
			));
			Err(RhiError::DeviceLost)
		}
	}

	/// Blocks until `acquire` hands out a back buffer, pumping presents in between.
	pub fn acquire(&self, swapchain: &SoftSwapchainData, timeout_ns: u64) -> RhiResult<u32> {
		let timeout = (timeout_ns != u64::MAX).then(|| Duration::from_nanos(timeout_ns));
		let mut acquired = None;
		self.wait_until(timeout, |_| {
			acquired = swapchain.try_acquire();
			acquired.is_some()
		});
		acquired.ok_or(RhiError::NotReady)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn submission(wait: Vec<SoftSemaphore>, signal: Vec<SoftSemaphore>, fences: Vec<(SoftFence, u64)>) -> Operation {
		Operation::Submit(Submission {
			command_buffers: Vec::new(),
			wait_semaphores: wait,
			wait_fences: Vec::new(),
			signal_semaphores: signal,
			signal_fences: fences,
		})
	}

	#[test]
	fn deferred_work_runs_on_wait() -> RhiResult<()> {
		let gpu = SoftGpu::new(Validation::new(true));
		gpu.set_mode(ExecutionMode::Deferred);
		let queue = gpu.create_queue();
		let fence = new_fence(0);
		gpu.enqueue(queue, submission(Vec::new(), Vec::new(), vec![(fence.clone(), 1)]));
		assert_eq!(fence.value(), 0);
		gpu.wait_fences(&[(&fence, 1)], true, 0)?;
		assert_eq!(fence.value(), 1);
		Ok(())
	}

	#[test]
	fn semaphores_order_queues() -> RhiResult<()> {
		let gpu = SoftGpu::new(Validation::new(true));
		let (a, b) = (gpu.create_queue(), gpu.create_queue());
		let semaphore: SoftSemaphore = Default::default();
		let fence = new_fence(0);
		gpu.enqueue(b, submission(vec![semaphore.clone()], Vec::new(), vec![(fence.clone(), 5)]));
		assert_eq!(fence.value(), 0, "blocked on the semaphore");
		gpu.enqueue(a, submission(Vec::new(), vec![semaphore.clone()], Vec::new()));
		assert_eq!(fence.value(), 5);
		assert!(!semaphore.signaled());
		gpu.wait_idle(None)
	}

	#[test]
	fn timeouts_are_not_ready() {
		let gpu = SoftGpu::new(Validation::new(true));
		let fence = new_fence(3);
		assert!(gpu.wait_fences(&[(&fence, 3)], true, 0).is_ok());
		assert!(matches!(
			gpu.wait_fences(&[(&fence, 4)], true, 1_000),
			Err(RhiError::NotReady)
		));
		let other = new_fence(10);
		assert!(gpu.wait_fences(&[(&fence, 4), (&other, 10)], false, 0).is_ok());
	}
}
