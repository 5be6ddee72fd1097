use crate::backing::arena::Arena;
use crate::backing::handle::{
	kind, BindingHeapHandle, BindingHeapLayoutHandle, BindingSetLayoutHandle, SamplerHandle, ViewHandle,
};
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::platform::{PlatformBindingWrite, PlatformDescriptor, RhiPlatform};
use crate::view::ViewType;
use bitflags::bitflags;
use rangemap::RangeSet;
use smallvec::SmallVec;
use std::ops::Add;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BindingType {
	ConstantBuffer,
	StorageBuffer,
	SampledTexture,
	StorageTexture,
	Sampler,
}

impl BindingType {
	pub fn accepts_view(&self, view_type: ViewType) -> bool {
		matches!(
			(self, view_type),
			(BindingType::ConstantBuffer, ViewType::ConstantBuffer)
				| (BindingType::StorageBuffer, ViewType::StorageBuffer)
				| (BindingType::SampledTexture, ViewType::SampledTexture)
				| (BindingType::StorageTexture, ViewType::StorageTexture)
		)
	}

	/// The shader register class, mirroring `b`, `t`, `u` and `s` registers.
	fn register_class(&self) -> usize {
		match self {
			BindingType::ConstantBuffer => 0,
			BindingType::SampledTexture => 1,
			BindingType::StorageBuffer | BindingType::StorageTexture => 2,
			BindingType::Sampler => 3,
		}
	}
}

bitflags! {
	#[repr(transparent)]
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
	pub struct ShaderStages: u32 {
		const VERTEX = 1;
		const FRAGMENT = 2;
		const COMPUTE = 4;
		const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
		const ALL = Self::ALL_GRAPHICS.bits() | Self::COMPUTE.bits();
	}
}

/// A contiguous run of `count` descriptors of one type, visible to shaders at binding slots
/// `base_slot..base_slot + count` and registers `base_register..base_register + count`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BindingRange {
	pub binding_type: BindingType,
	pub base_slot: u32,
	pub base_register: u32,
	pub count: u32,
	pub visibility: ShaderStages,
}

impl BindingRange {
	pub fn new(binding_type: BindingType, base_slot: u32, count: u32, visibility: ShaderStages) -> Self {
		Self {
			binding_type,
			base_slot,
			base_register: base_slot,
			count,
			visibility,
		}
	}
}

/// A validated list of binding ranges and the descriptor offset each range starts at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindingLayoutInfo {
	pub ranges: SmallVec<[BindingRange; 8]>,
	/// Offset of each range in descriptors, relative to the start of a table.
	pub range_offsets: SmallVec<[u32; 8]>,
	/// Total number of descriptors in one table.
	pub slot_count: u32,
	/// Heap layouts may be written while bound and may be partially populated.
	pub update_after_bind: bool,
}

impl BindingLayoutInfo {
	pub fn new(ranges: &[BindingRange], update_after_bind: bool) -> RhiResult<Self> {
		if ranges.is_empty() {
			return Err(RhiError::invalid_argument("binding layouts require at least one range"));
		}
		let mut slots = RangeSet::new();
		let mut registers: [RangeSet<u32>; 4] = Default::default();
		let mut range_offsets = SmallVec::new();
		let mut slot_count = 0u32;
		for (i, range) in ranges.iter().enumerate() {
			if range.count == 0 {
				return Err(RhiError::invalid_argument(format!("binding range {i} has a count of 0")));
			}
			if range.visibility.is_empty() {
				return Err(RhiError::invalid_argument(format!("binding range {i} is not visible to any stage")));
			}
			let overflow = || RhiError::invalid_argument(format!("binding range {i} overflows"));
			let slot_range = range.base_slot..range.base_slot.checked_add(range.count).ok_or_else(overflow)?;
			if slots.overlaps(&slot_range) {
				return Err(RhiError::invalid_argument(format!(
					"binding range {i} with slots {slot_range:?} overlaps a previous range"
				)));
			}
			slots.insert(slot_range);
			let register_range =
				range.base_register..range.base_register.checked_add(range.count).ok_or_else(overflow)?;
			let class = &mut registers[range.binding_type.register_class()];
			if class.overlaps(&register_range) {
				return Err(RhiError::invalid_argument(format!(
					"binding range {i} with registers {register_range:?} overlaps a previous range"
				)));
			}
			class.insert(register_range);
			range_offsets.push(slot_count);
			slot_count = slot_count.checked_add(range.count).ok_or_else(overflow)?;
		}
		Ok(Self {
			ranges: ranges.iter().copied().collect(),
			range_offsets,
			slot_count,
			update_after_bind,
		})
	}

	/// Finds the range and array element the table-relative descriptor `slot` belongs to.
	pub fn locate(&self, slot: u32) -> Option<(usize, u32)> {
		self.ranges
			.iter()
			.zip(&self.range_offsets)
			.enumerate()
			.find(|(_, (range, offset))| (**offset..**offset + range.count).contains(&slot))
			.map(|(i, (_, offset))| (i, slot - offset))
	}

	/// The table-relative descriptor index of shader binding slot `binding_slot`.
	pub fn descriptor_index(&self, binding_slot: u32) -> Option<u32> {
		self.ranges
			.iter()
			.zip(&self.range_offsets)
			.find(|(range, _)| (range.base_slot..range.base_slot + range.count).contains(&binding_slot))
			.map(|(range, offset)| offset + binding_slot - range.base_slot)
	}
}

/// Either kind of binding layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BindingLayoutRef {
	Set(BindingSetLayoutHandle),
	Heap(BindingHeapLayoutHandle),
}

impl From<BindingSetLayoutHandle> for BindingLayoutRef {
	fn from(value: BindingSetLayoutHandle) -> Self {
		BindingLayoutRef::Set(value)
	}
}

impl From<BindingHeapLayoutHandle> for BindingLayoutRef {
	fn from(value: BindingHeapLayoutHandle) -> Self {
		BindingLayoutRef::Heap(value)
	}
}

pub(crate) struct BindingLayoutSlot<P: RhiPlatform> {
	pub native: P::BindingLayout,
	pub info: Arc<BindingLayoutInfo>,
}

pub(crate) fn lookup_layout<'a, P: RhiPlatform>(
	set_layouts: &'a Arena<kind::BindingSetLayout, BindingLayoutSlot<P>>,
	heap_layouts: &'a Arena<kind::BindingHeapLayout, BindingLayoutSlot<P>>,
	layout: BindingLayoutRef,
) -> RhiResult<&'a BindingLayoutSlot<P>> {
	match layout {
		BindingLayoutRef::Set(handle) => set_layouts.try_get(handle),
		BindingLayoutRef::Heap(handle) => heap_layouts.try_get(handle),
	}
}

#[derive(Copy, Clone, Debug)]
pub struct BindingHeapDesc<'a> {
	pub layout: BindingLayoutRef,
	/// Number of instances of the layout the heap holds, eg. one per frame in flight.
	pub tables: u32,
	pub name: &'a str,
}

pub(crate) struct BindingHeapSlot<P: RhiPlatform> {
	pub native: P::BindingHeap,
	pub layout: BindingLayoutRef,
	pub info: Arc<BindingLayoutInfo>,
	pub tables: u32,
}

/// Location of a descriptor within a binding heap, in units of the backend's descriptor stride.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BindingOffset {
	value: u64,
	stride: u32,
}

impl BindingOffset {
	pub const fn new(descriptor_index: u64, stride: u32) -> Self {
		Self {
			value: descriptor_index * stride as u64,
			stride,
		}
	}

	/// The raw offset as the backend sees it, eg. bytes for heaps with a byte increment.
	pub const fn get(&self) -> u64 {
		self.value
	}

	pub const fn stride(&self) -> u32 {
		self.stride
	}

	pub const fn descriptor_index(&self) -> u64 {
		self.value / self.stride as u64
	}

	/// The offset of array element `element` of the range starting at this offset.
	pub const fn element(&self, element: u32) -> Self {
		Self::new(self.descriptor_index() + element as u64, self.stride)
	}
}

impl Add for BindingOffset {
	type Output = BindingOffset;

	fn add(self, rhs: Self) -> Self::Output {
		assert_eq!(self.stride, rhs.stride, "adding binding offsets of different devices");
		Self {
			value: self.value + rhs.value,
			stride: self.stride,
		}
	}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BindingWrite {
	View(ViewHandle),
	Sampler(SamplerHandle),
}

/// A binding as reported by shader reflection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ReflectedBinding {
	pub slot: u32,
	pub register: u32,
	pub binding_type: BindingType,
	pub count: u32,
}

/// Builds binding ranges from reflection records. Records are sorted by slot, duplicates of the same slot are
/// dropped and consecutive records of the same type are merged into a single range.
pub fn binding_ranges_from_reflection(records: &[ReflectedBinding], visibility: ShaderStages) -> Vec<BindingRange> {
	let mut records = records.to_vec();
	records.sort_by_key(|r| r.slot);
	records.dedup_by_key(|r| r.slot);
	let mut ranges: Vec<BindingRange> = Vec::new();
	for record in records {
		if let Some(last) = ranges.last_mut() {
			if last.binding_type == record.binding_type
				&& last.base_slot + last.count == record.slot
				&& last.base_register + last.count == record.register
			{
				last.count += record.count.max(1);
				continue;
			}
		}
		ranges.push(BindingRange {
			binding_type: record.binding_type,
			base_slot: record.slot,
			base_register: record.register,
			count: record.count.max(1),
			visibility,
		});
	}
	ranges
}

impl<P: RhiPlatform> Device<P> {
	pub fn create_binding_set_layout(&self, ranges: &[BindingRange]) -> RhiResult<BindingSetLayoutHandle> {
		let slot = self.create_binding_layout_slot(ranges, false)?;
		Ok(self.objects.set_layouts.write().insert(slot))
	}

	/// Like [`Self::create_binding_set_layout`], but heaps created from it may be written while in use and may be
	/// left partially populated.
	pub fn create_binding_heap_layout(&self, ranges: &[BindingRange]) -> RhiResult<BindingHeapLayoutHandle> {
		let slot = self.create_binding_layout_slot(ranges, true)?;
		Ok(self.objects.heap_layouts.write().insert(slot))
	}

	fn create_binding_layout_slot(
		&self,
		ranges: &[BindingRange],
		update_after_bind: bool,
	) -> RhiResult<BindingLayoutSlot<P>> {
		let info = BindingLayoutInfo::new(ranges, update_after_bind)?;
		let native = unsafe { self.platform.create_binding_layout(&info)? };
		Ok(BindingLayoutSlot {
			native,
			info: Arc::new(info),
		})
	}

	pub fn destroy_binding_set_layout(&self, layout: &mut BindingSetLayoutHandle) {
		if let Some(slot) = take_slot(&self.objects.set_layouts, layout) {
			unsafe { self.platform.destroy_binding_layout(slot.native) }
		}
	}

	pub fn destroy_binding_heap_layout(&self, layout: &mut BindingHeapLayoutHandle) {
		if let Some(slot) = take_slot(&self.objects.heap_layouts, layout) {
			unsafe { self.platform.destroy_binding_layout(slot.native) }
		}
	}

	pub fn binding_layout_info(&self, layout: impl Into<BindingLayoutRef>) -> RhiResult<Arc<BindingLayoutInfo>> {
		let set_layouts = self.objects.set_layouts.read();
		let heap_layouts = self.objects.heap_layouts.read();
		Ok(lookup_layout(&set_layouts, &heap_layouts, layout.into())?.info.clone())
	}

	/// The offset of shader binding slot `binding_slot` relative to the start of a table of `layout`. Offsets only
	/// depend on the layout and the backend.
	pub fn get_binding_offset(&self, layout: impl Into<BindingLayoutRef>, binding_slot: u32) -> RhiResult<BindingOffset> {
		let info = self.binding_layout_info(layout)?;
		let index = info.descriptor_index(binding_slot).ok_or_else(|| {
			RhiError::invalid_argument(format!("binding slot {binding_slot} is not part of the layout"))
		})?;
		Ok(BindingOffset::new(index as u64, self.limits().descriptor_stride))
	}

	pub fn create_binding_heap(&self, desc: &BindingHeapDesc) -> RhiResult<BindingHeapHandle> {
		profiling::function_scope!();
		if desc.tables == 0 {
			return Err(RhiError::invalid_argument("binding heaps require at least one table"));
		}
		let slot = {
			let set_layouts = self.objects.set_layouts.read();
			let heap_layouts = self.objects.heap_layouts.read();
			let layout = lookup_layout(&set_layouts, &heap_layouts, desc.layout)?;
			let native = unsafe {
				self.platform
					.create_binding_heap(&layout.native, &layout.info, desc.tables, desc.name)?
			};
			BindingHeapSlot {
				native,
				layout: desc.layout,
				info: layout.info.clone(),
				tables: desc.tables,
			}
		};
		Ok(self.objects.heaps.write().insert(slot))
	}

	pub fn destroy_binding_heap(&self, heap: &mut BindingHeapHandle) {
		if let Some(slot) = take_slot(&self.objects.heaps, heap) {
			unsafe { self.platform.destroy_binding_heap(slot.native) }
		}
	}

	/// The offset at which table `table` of `heap` starts. Add [`Self::get_binding_offset`] to address a binding.
	pub fn heap_table_offset(&self, heap: BindingHeapHandle, table: u32) -> RhiResult<BindingOffset> {
		let heaps = self.objects.heaps.read();
		let slot = heaps.try_get(heap)?;
		if table >= slot.tables {
			return Err(RhiError::invalid_argument(format!(
				"table {table} out of bounds for heap with {} tables",
				slot.tables
			)));
		}
		Ok(BindingOffset::new(
			table as u64 * slot.info.slot_count as u64,
			self.limits().descriptor_stride,
		))
	}

	/// Writes a view or sampler descriptor at `offset`. The write is visible to commands recorded afterwards.
	pub fn write_binding(&self, heap: BindingHeapHandle, offset: BindingOffset, write: BindingWrite) -> RhiResult<()> {
		profiling::function_scope!();
		let stride = self.limits().descriptor_stride;
		if offset.stride() != stride || offset.get() % stride as u64 != 0 {
			return Err(RhiError::invalid_argument(format!(
				"{offset:?} does not match this device's descriptor stride {stride}"
			)));
		}

		let resources = self.objects.resources.read();
		let views = self.objects.views.read();
		let samplers = self.objects.samplers.read();
		let heaps = self.objects.heaps.read();
		let heap_slot = heaps.try_get(heap)?;
		let info = &heap_slot.info;
		let index = offset.descriptor_index();
		let table = index / info.slot_count as u64;
		if table >= heap_slot.tables as u64 {
			return Err(RhiError::invalid_argument(format!("{offset:?} is out of bounds of {heap:?}")));
		}
		let table = table as u32;
		let (range, element) = info
			.locate((index % info.slot_count as u64) as u32)
			.ok_or_else(|| RhiError::invalid_argument(format!("{offset:?} does not address a binding")))?;
		let binding_type = info.ranges[range].binding_type;

		let descriptor = match write {
			BindingWrite::View(view) => {
				let view_slot = views.try_get(view)?;
				if !binding_type.accepts_view(view_slot.desc.view_type) {
					return Err(RhiError::invalid_argument(format!(
						"{:?} view can not be written to a {binding_type:?} binding",
						view_slot.desc.view_type
					)));
				}
				let resource = resources.try_get(view_slot.desc.resource)?;
				PlatformDescriptor::View {
					view: &view_slot.native,
					resource: &resource.native,
					desc: &view_slot.desc,
				}
			}
			BindingWrite::Sampler(sampler) => {
				let sampler_slot = samplers.try_get(sampler)?;
				if binding_type != BindingType::Sampler {
					return Err(RhiError::invalid_argument(format!(
						"sampler can not be written to a {binding_type:?} binding"
					)));
				}
				PlatformDescriptor::Sampler(&sampler_slot.native)
			}
		};
		unsafe {
			self.platform.write_binding(
				&heap_slot.native,
				&PlatformBindingWrite {
					layout: info,
					table,
					range,
					element,
					descriptor,
				},
			)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ranges() -> [BindingRange; 3] {
		[
			BindingRange::new(BindingType::ConstantBuffer, 0, 1, ShaderStages::ALL),
			BindingRange::new(BindingType::SampledTexture, 1, 4, ShaderStages::FRAGMENT),
			BindingRange::new(BindingType::Sampler, 8, 2, ShaderStages::FRAGMENT),
		]
	}

	#[test]
	fn offsets_are_prefix_sums() {
		let info = BindingLayoutInfo::new(&ranges(), false).unwrap();
		assert_eq!(info.range_offsets.as_slice(), &[0, 1, 5]);
		assert_eq!(info.slot_count, 7);
		assert_eq!(info.descriptor_index(0), Some(0));
		assert_eq!(info.descriptor_index(3), Some(3));
		assert_eq!(info.descriptor_index(9), Some(6));
		assert_eq!(info.descriptor_index(5), None);
		assert_eq!(info.locate(4), Some((1, 3)));
		assert_eq!(info.locate(5), Some((2, 0)));
		assert_eq!(info.locate(7), None);
	}

	#[test]
	fn overlapping_ranges_rejected() {
		let overlap = [
			BindingRange::new(BindingType::StorageBuffer, 0, 4, ShaderStages::COMPUTE),
			BindingRange::new(BindingType::StorageTexture, 3, 1, ShaderStages::COMPUTE),
		];
		assert!(BindingLayoutInfo::new(&overlap, false).is_err());

		let register_overlap = [
			BindingRange::new(BindingType::StorageBuffer, 0, 2, ShaderStages::COMPUTE),
			BindingRange {
				base_register: 1,
				..BindingRange::new(BindingType::StorageTexture, 2, 1, ShaderStages::COMPUTE)
			},
		];
		assert!(BindingLayoutInfo::new(&register_overlap, false).is_err());

		// same registers in different register classes are fine
		let classes = [
			BindingRange::new(BindingType::ConstantBuffer, 0, 1, ShaderStages::ALL),
			BindingRange {
				base_register: 0,
				..BindingRange::new(BindingType::Sampler, 1, 1, ShaderStages::ALL)
			},
		];
		assert!(BindingLayoutInfo::new(&classes, false).is_ok());
	}

	#[test]
	fn invalid_ranges_rejected() {
		assert!(BindingLayoutInfo::new(&[], false).is_err());
		let empty = BindingRange::new(BindingType::Sampler, 0, 0, ShaderStages::ALL);
		assert!(BindingLayoutInfo::new(&[empty], false).is_err());
		let invisible = BindingRange::new(BindingType::Sampler, 0, 1, ShaderStages::empty());
		assert!(BindingLayoutInfo::new(&[invisible], false).is_err());
		let overflow = BindingRange::new(BindingType::Sampler, u32::MAX, 2, ShaderStages::ALL);
		assert!(BindingLayoutInfo::new(&[overflow], false).is_err());
	}

	#[test]
	fn binding_offset_arithmetic() {
		let table = BindingOffset::new(7, 32);
		let binding = BindingOffset::new(1, 32);
		assert_eq!((table + binding).get(), 8 * 32);
		assert_eq!(binding.element(2).descriptor_index(), 3);
	}

	#[test]
	fn reflection_merges_contiguous() {
		let record = |slot, binding_type| ReflectedBinding {
			slot,
			register: slot,
			binding_type,
			count: 1,
		};
		let ranges = binding_ranges_from_reflection(
			&[
				record(2, BindingType::SampledTexture),
				record(0, BindingType::ConstantBuffer),
				record(1, BindingType::SampledTexture),
				record(1, BindingType::SampledTexture),
				record(4, BindingType::SampledTexture),
			],
			ShaderStages::FRAGMENT,
		);
		assert_eq!(
			ranges,
			vec![
				BindingRange::new(BindingType::ConstantBuffer, 0, 1, ShaderStages::FRAGMENT),
				BindingRange::new(BindingType::SampledTexture, 1, 2, ShaderStages::FRAGMENT),
				BindingRange::new(BindingType::SampledTexture, 4, 1, ShaderStages::FRAGMENT),
			]
		);
		assert!(BindingLayoutInfo::new(&ranges, false).is_ok());
	}
}
