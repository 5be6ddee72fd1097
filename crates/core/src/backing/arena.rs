use crate::backing::handle::{Handle, HandleKind};
use crate::error::{RhiError, RhiResult};
use std::marker::PhantomData;

/// Slot storage for one kind of device object. Removing an object bumps the generation of its slot, so handles to
/// removed objects never resolve to a newer object reusing the same slot. Slots whose generation would overflow are
/// retired instead of being reused.
pub struct Arena<K: HandleKind, T> {
	slots: Vec<Slot<T>>,
	dead_queue: Vec<u32>,
	len: usize,
	_phantom: PhantomData<fn() -> K>,
}

struct Slot<T> {
	generation: u32,
	value: Option<T>,
}

impl<K: HandleKind, T> Default for Arena<K, T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: HandleKind, T> Arena<K, T> {
	pub const fn new() -> Self {
		Self {
			slots: Vec::new(),
			dead_queue: Vec::new(),
			len: 0,
			_phantom: PhantomData,
		}
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn insert(&mut self, value: T) -> Handle<K> {
		self.len += 1;
		if let Some(index) = self.dead_queue.pop() {
			let slot = &mut self.slots[index as usize];
			debug_assert!(slot.value.is_none());
			slot.value = Some(value);
			Handle::new(index, slot.generation)
		} else {
			let index = u32::try_from(self.slots.len()).expect("arena slot index overflow");
			self.slots.push(Slot {
				generation: 1,
				value: Some(value),
			});
			Handle::new(index, 1)
		}
	}

	fn slot(&self, handle: Handle<K>) -> Option<&Slot<T>> {
		let slot = self.slots.get(handle.index() as usize)?;
		(handle.is_valid() && slot.generation == handle.generation()).then_some(slot)
	}

	pub fn contains(&self, handle: Handle<K>) -> bool {
		self.get(handle).is_some()
	}

	pub fn get(&self, handle: Handle<K>) -> Option<&T> {
		self.slot(handle)?.value.as_ref()
	}

	/// Like [`Self::get`] but returns [`RhiError::InvalidHandle`] for dead handles.
	pub fn try_get(&self, handle: Handle<K>) -> RhiResult<&T> {
		self.get(handle).ok_or(RhiError::InvalidHandle { kind: K::NAME })
	}

	pub fn try_get_mut(&mut self, handle: Handle<K>) -> RhiResult<&mut T> {
		self.get_mut(handle).ok_or(RhiError::InvalidHandle { kind: K::NAME })
	}

	pub fn get_mut(&mut self, handle: Handle<K>) -> Option<&mut T> {
		self.slot(handle)?;
		self.slots[handle.index() as usize].value.as_mut()
	}

	pub fn remove(&mut self, handle: Handle<K>) -> Option<T> {
		self.slot(handle)?;
		let index = handle.index();
		let slot = &mut self.slots[index as usize];
		let value = slot.value.take()?;
		self.len -= 1;
		slot.generation = slot.generation.wrapping_add(1);
		if slot.generation != 0 {
			self.dead_queue.push(index);
		}
		Some(value)
	}

	pub fn iter(&self) -> impl Iterator<Item = (Handle<K>, &T)> + '_ {
		self.slots.iter().enumerate().filter_map(|(index, slot)| {
			slot.value
				.as_ref()
				.map(|value| (Handle::new(index as u32, slot.generation), value))
		})
	}

	pub fn handles(&self) -> Vec<Handle<K>> {
		self.iter().map(|(handle, _)| handle).collect()
	}

	/// Removes all live objects, invalidating every outstanding handle.
	pub fn drain(&mut self) -> Vec<(Handle<K>, T)> {
		self.handles()
			.into_iter()
			.filter_map(|handle| self.remove(handle).map(|value| (handle, value)))
			.collect()
	}
}
