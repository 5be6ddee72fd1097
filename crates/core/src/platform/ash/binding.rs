use crate::binding::{BindingLayoutInfo, BindingType};
use crate::error::RhiResult;
use crate::pipeline::PushConstantRange;
use crate::platform::ash::{Ash, AshView};
use crate::platform::{PlatformBindingWrite, PlatformDescriptor};
use ash::vk::{
	DescriptorBindingFlags, DescriptorImageInfo, DescriptorPool, DescriptorPoolCreateFlags, DescriptorPoolCreateInfo,
	DescriptorPoolSize, DescriptorSet, DescriptorSetAllocateInfo, DescriptorSetLayout,
	DescriptorSetLayoutBinding, DescriptorSetLayoutBindingFlagsCreateInfo, DescriptorSetLayoutCreateFlags,
	DescriptorSetLayoutCreateInfo, ImageLayout, PipelineLayout, PipelineLayoutCreateInfo, WriteDescriptorSet,
};
use smallvec::SmallVec;

/// A descriptor set layout. Every binding range becomes one Vulkan binding at its base slot.
pub struct AshBindingLayout {
	pub layout: DescriptorSetLayout,
	pub update_after_bind: bool,
	/// Descriptors a single set of this layout consumes from a pool.
	pub pool_sizes: SmallVec<[DescriptorPoolSize; 5]>,
}

/// A descriptor pool holding one descriptor set per table.
pub struct AshBindingHeap {
	pub pool: DescriptorPool,
	pub sets: Vec<DescriptorSet>,
}

impl Ash {
	pub unsafe fn create_binding_layout_native(&self, info: &BindingLayoutInfo) -> RhiResult<AshBindingLayout> {
		unsafe {
			let bindings = info
				.ranges
				.iter()
				.map(|range| {
					DescriptorSetLayoutBinding::default()
						.binding(range.base_slot)
						.descriptor_type(range.binding_type.to_ash_descriptor_type())
						.descriptor_count(range.count)
						.stage_flags(range.visibility.to_ash())
				})
				.collect::<SmallVec<[_; 8]>>();
			let binding_flags = if info.update_after_bind {
				DescriptorBindingFlags::UPDATE_AFTER_BIND
					| DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING
					| DescriptorBindingFlags::PARTIALLY_BOUND
			} else {
				DescriptorBindingFlags::empty()
			};
			let binding_flags = SmallVec::<[_; 8]>::from_elem(binding_flags, bindings.len());
			let flags = if info.update_after_bind {
				DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
			} else {
				DescriptorSetLayoutCreateFlags::empty()
			};
			let layout = self.device.create_descriptor_set_layout(
				&DescriptorSetLayoutCreateInfo::default()
					.flags(flags)
					.bindings(&bindings)
					.push_next(&mut DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags)),
				None,
			)?;

			let mut pool_sizes = SmallVec::<[DescriptorPoolSize; 5]>::new();
			for range in &info.ranges {
				let ty = range.binding_type.to_ash_descriptor_type();
				match pool_sizes.iter_mut().find(|size| size.ty == ty) {
					Some(size) => size.descriptor_count += range.count,
					None => pool_sizes.push(DescriptorPoolSize {
						ty,
						descriptor_count: range.count,
					}),
				}
			}
			Ok(AshBindingLayout {
				layout,
				update_after_bind: info.update_after_bind,
				pool_sizes,
			})
		}
	}

	pub unsafe fn create_binding_heap_native(
		&self,
		layout: &AshBindingLayout,
		_info: &BindingLayoutInfo,
		tables: u32,
		name: &str,
	) -> RhiResult<AshBindingHeap> {
		unsafe {
			let pool_sizes = layout
				.pool_sizes
				.iter()
				.map(|size| DescriptorPoolSize {
					ty: size.ty,
					descriptor_count: size.descriptor_count * tables,
				})
				.collect::<SmallVec<[_; 5]>>();
			let flags = if layout.update_after_bind {
				DescriptorPoolCreateFlags::UPDATE_AFTER_BIND
			} else {
				DescriptorPoolCreateFlags::empty()
			};
			let pool = self.device.create_descriptor_pool(
				&DescriptorPoolCreateInfo::default()
					.flags(flags)
					.max_sets(tables)
					.pool_sizes(&pool_sizes),
				None,
			)?;
			let set_layouts = vec![layout.layout; tables as usize];
			let sets = match self.device.allocate_descriptor_sets(
				&DescriptorSetAllocateInfo::default()
					.descriptor_pool(pool)
					.set_layouts(&set_layouts),
			) {
				Ok(sets) => sets,
				Err(e) => {
					self.device.destroy_descriptor_pool(pool, None);
					return Err(e.into());
				}
			};
			if let Err(e) = self.set_debug_object_name(pool, name) {
				log::warn!("failed to name binding heap {name:?}: {e}");
			}
			Ok(AshBindingHeap { pool, sets })
		}
	}

	pub unsafe fn write_binding_native(&self, heap: &AshBindingHeap, write: &PlatformBindingWrite<'_, Ash>) {
		unsafe {
			let range = &write.layout.ranges[write.range];
			let descriptor_write = WriteDescriptorSet::default()
				.dst_set(heap.sets[write.table as usize])
				.dst_binding(range.base_slot)
				.dst_array_element(write.element)
				.descriptor_type(range.binding_type.to_ash_descriptor_type());
			match &write.descriptor {
				PlatformDescriptor::View { view, .. } => match view {
					AshView::Buffer(info) => {
						self.device.update_descriptor_sets(
							&[descriptor_write.buffer_info(std::slice::from_ref(info))],
							&[],
						);
					}
					AshView::Image { view, .. } => {
						let image_layout = match range.binding_type {
							BindingType::StorageTexture => ImageLayout::GENERAL,
							_ => ImageLayout::SHADER_READ_ONLY_OPTIMAL,
						};
						let info = DescriptorImageInfo::default().image_view(*view).image_layout(image_layout);
						self.device.update_descriptor_sets(
							&[descriptor_write.image_info(std::slice::from_ref(&info))],
							&[],
						);
					}
				},
				PlatformDescriptor::Sampler(sampler) => {
					let info = DescriptorImageInfo::default().sampler(**sampler);
					self.device
						.update_descriptor_sets(&[descriptor_write.image_info(std::slice::from_ref(&info))], &[]);
				}
			}
		}
	}

	pub unsafe fn create_pipeline_layout_native(
		&self,
		layouts: &[&AshBindingLayout],
		push_constant_ranges: &[PushConstantRange],
	) -> RhiResult<PipelineLayout> {
		unsafe {
			let set_layouts = layouts.iter().map(|l| l.layout).collect::<SmallVec<[_; 4]>>();
			let ranges = push_constant_ranges
				.iter()
				.map(|range| ash::vk::PushConstantRange {
					stage_flags: range.visibility.to_ash(),
					offset: range.offset,
					size: range.size,
				})
				.collect::<SmallVec<[_; 2]>>();
			Ok(self.device.create_pipeline_layout(
				&PipelineLayoutCreateInfo::default()
					.set_layouts(&set_layouts)
					.push_constant_ranges(&ranges),
				None,
			)?)
		}
	}
}
