use crate::binding::BindingLayoutInfo;
use crate::pipeline::{PipelineBindPoint, PushConstantRange};
use crate::platform::soft::memory::{SoftSampler, SoftView};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;

/// Size of one descriptor in a binding heap in bytes.
pub const DESCRIPTOR_SIZE: u32 = 32;

#[derive(Clone)]
pub struct SoftBindingLayout(pub Arc<BindingLayoutInfo>);

#[derive(Clone)]
pub enum SoftDescriptor {
	View(SoftView),
	Sampler(SoftSampler),
}

pub struct SoftBindingHeapData {
	pub info: Arc<BindingLayoutInfo>,
	pub tables: u32,
	pub name: String,
	descriptors: Mutex<Vec<Option<SoftDescriptor>>>,
}

#[derive(Clone)]
pub struct SoftBindingHeap(pub Arc<SoftBindingHeapData>);

impl Deref for SoftBindingHeap {
	type Target = SoftBindingHeapData;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl SoftBindingHeap {
	pub fn new(layout: &SoftBindingLayout, tables: u32, name: &str) -> Self {
		let len = tables as usize * layout.0.slot_count as usize;
		Self(Arc::new(SoftBindingHeapData {
			info: layout.0.clone(),
			tables,
			name: name.to_string(),
			descriptors: Mutex::new(vec![None; len]),
		}))
	}

	pub fn size_in_bytes(&self) -> u64 {
		self.descriptors.lock().len() as u64 * DESCRIPTOR_SIZE as u64
	}

	pub fn write(&self, table: u32, range: usize, element: u32, descriptor: SoftDescriptor) {
		let index = self.index(table, self.info.range_offsets[range] + element);
		if let Some(slot) = self.descriptors.lock().get_mut(index) {
			*slot = Some(descriptor);
		}
	}

	fn index(&self, table: u32, slot: u32) -> usize {
		table as usize * self.info.slot_count as usize + slot as usize
	}

	/// The first table-relative slot of `table` that has never been written.
	pub fn first_unwritten(&self, table: u32) -> Option<u32> {
		let descriptors = self.descriptors.lock();
		(0..self.info.slot_count).find(|slot| descriptors.get(self.index(table, *slot)).map_or(true, Option::is_none))
	}

	pub fn descriptor(&self, table: u32, slot: u32) -> Option<SoftDescriptor> {
		self.descriptors.lock().get(self.index(table, slot)).cloned().flatten()
	}
}

pub struct SoftPipelineLayoutData {
	pub layouts: Vec<Arc<BindingLayoutInfo>>,
	pub push_constant_size: u32,
}

#[derive(Clone)]
pub struct SoftPipelineLayout(pub Arc<SoftPipelineLayoutData>);

impl SoftPipelineLayout {
	pub fn new(layouts: &[&SoftBindingLayout], push_constant_ranges: &[PushConstantRange]) -> Self {
		Self(Arc::new(SoftPipelineLayoutData {
			layouts: layouts.iter().map(|l| l.0.clone()).collect(),
			push_constant_size: push_constant_ranges
				.iter()
				.map(|r| r.offset + r.size)
				.max()
				.unwrap_or(0),
		}))
	}
}

pub struct SoftPipelineData {
	pub bind_point: PipelineBindPoint,
	pub layout: SoftPipelineLayout,
	pub name: String,
}

/// Shaders are not executed, a pipeline only carries what draws and dispatches are validated against.
#[derive(Clone)]
pub struct SoftPipeline(pub Arc<SoftPipelineData>);

impl Deref for SoftPipeline {
	type Target = SoftPipelineData;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::binding::{BindingRange, BindingType, ShaderStages};
	use crate::error::RhiResult;

	#[test]
	fn unwritten_slots() -> RhiResult<()> {
		let info = BindingLayoutInfo::new(
			&[
				BindingRange::new(BindingType::Sampler, 0, 1, ShaderStages::ALL),
				BindingRange::new(BindingType::Sampler, 1, 2, ShaderStages::ALL),
			],
			false,
		)?;
		let heap = SoftBindingHeap::new(&SoftBindingLayout(Arc::new(info)), 2, "heap");
		assert_eq!(heap.size_in_bytes(), 6 * DESCRIPTOR_SIZE as u64);
		let sampler = || SoftDescriptor::Sampler(SoftSampler(Arc::new(Default::default())));
		heap.write(1, 0, 0, sampler());
		heap.write(1, 1, 1, sampler());
		assert_eq!(heap.first_unwritten(0), Some(0));
		assert_eq!(heap.first_unwritten(1), Some(1));
		heap.write(1, 1, 0, sampler());
		assert_eq!(heap.first_unwritten(1), None);
		assert!(heap.descriptor(1, 2).is_some());
		Ok(())
	}
}
