use crate::backing::handle::{ResourceHandle, SamplerHandle, ViewHandle};
use crate::device::{take_slot, Device};
use crate::error::{RhiError, RhiResult};
use crate::format::Format;
use crate::platform::RhiPlatform;
use crate::resource::{ResourceDesc, ResourceUsage};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ViewType {
	RenderTarget,
	DepthStencil,
	SampledTexture,
	StorageTexture,
	ConstantBuffer,
	StorageBuffer,
}

impl ViewType {
	pub fn is_buffer_view(&self) -> bool {
		matches!(self, ViewType::ConstantBuffer | ViewType::StorageBuffer)
	}

	pub fn required_usage(&self) -> ResourceUsage {
		match self {
			ViewType::RenderTarget => ResourceUsage::RENDER_TARGET,
			ViewType::DepthStencil => ResourceUsage::DEPTH_STENCIL,
			ViewType::SampledTexture => ResourceUsage::SAMPLED,
			ViewType::StorageTexture => ResourceUsage::STORAGE_TEXTURE,
			ViewType::ConstantBuffer => ResourceUsage::CONSTANT_BUFFER,
			ViewType::StorageBuffer => ResourceUsage::STORAGE_BUFFER,
		}
	}
}

/// A range of mip levels and array layers of a texture.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SubresourceRange {
	pub base_mip: u32,
	/// May be [`SubresourceRange::REMAINING`].
	pub mip_count: u32,
	pub base_layer: u32,
	/// May be [`SubresourceRange::REMAINING`].
	pub layer_count: u32,
}

impl Default for SubresourceRange {
	fn default() -> Self {
		Self::ALL
	}
}

impl SubresourceRange {
	pub const REMAINING: u32 = u32::MAX;

	pub const ALL: Self = Self {
		base_mip: 0,
		mip_count: Self::REMAINING,
		base_layer: 0,
		layer_count: Self::REMAINING,
	};

	pub const fn mip(mip: u32) -> Self {
		Self {
			base_mip: mip,
			mip_count: 1,
			base_layer: 0,
			layer_count: Self::REMAINING,
		}
	}

	/// Replaces [`Self::REMAINING`] counts and checks the range lies within `desc`.
	pub fn resolve(&self, desc: &ResourceDesc) -> RhiResult<Self> {
		let resolve = |base: u32, count: u32, total: u32, what: &str| {
			let count = if count == Self::REMAINING {
				total.saturating_sub(base)
			} else {
				count
			};
			if count == 0 || base.checked_add(count).map_or(true, |end| end > total) {
				Err(RhiError::invalid_argument(format!(
					"{what} range {base}+{count} out of bounds for {total} {what}s"
				)))
			} else {
				Ok(count)
			}
		};
		Ok(Self {
			base_mip: self.base_mip,
			mip_count: resolve(self.base_mip, self.mip_count, desc.mip_levels, "mip")?,
			base_layer: self.base_layer,
			layer_count: resolve(self.base_layer, self.layer_count, desc.array_layers(), "layer")?,
		})
	}

	/// Whether this resolved range covers every subresource of `desc`.
	pub fn covers_all(&self, desc: &ResourceDesc) -> bool {
		self.base_mip == 0
			&& self.base_layer == 0
			&& self.mip_count == desc.mip_levels
			&& self.layer_count == desc.array_layers()
	}

	/// Flat indices of all subresources in this resolved range, mip-major within each layer.
	pub fn subresource_indices(&self, desc: &ResourceDesc) -> impl Iterator<Item = usize> + '_ {
		let mips = desc.mip_levels;
		(self.base_layer..self.base_layer + self.layer_count).flat_map(move |layer| {
			(self.base_mip..self.base_mip + self.mip_count).map(move |mip| (layer * mips + mip) as usize)
		})
	}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ViewDesc {
	pub resource: ResourceHandle,
	pub view_type: ViewType,
	/// [`Format::Unknown`] inherits the format of the resource.
	pub format: Format,
	pub subresource: SubresourceRange,
	pub buffer_offset: u64,
	/// 0 selects the remainder of the buffer.
	pub buffer_size: u64,
}

impl ViewDesc {
	pub fn new(resource: ResourceHandle, view_type: ViewType) -> Self {
		Self {
			resource,
			view_type,
			format: Format::Unknown,
			subresource: SubresourceRange::ALL,
			buffer_offset: 0,
			buffer_size: 0,
		}
	}

	pub fn with_buffer_range(self, offset: u64, size: u64) -> Self {
		Self {
			buffer_offset: offset,
			buffer_size: size,
			..self
		}
	}

	pub fn with_subresource(self, subresource: SubresourceRange) -> Self {
		Self { subresource, ..self }
	}
}

pub(crate) struct ViewSlot<P: RhiPlatform> {
	pub native: P::View,
	pub desc: ViewDesc,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Filter {
	#[default]
	Nearest,
	Linear,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum AddressMode {
	#[default]
	Repeat,
	MirroredRepeat,
	ClampToEdge,
	ClampToBorder,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum CompareOp {
	Never,
	Less,
	Equal,
	LessOrEqual,
	Greater,
	NotEqual,
	GreaterOrEqual,
	#[default]
	Always,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum BorderColor {
	#[default]
	TransparentBlack,
	OpaqueBlack,
	OpaqueWhite,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplerDesc {
	pub mag_filter: Filter,
	pub min_filter: Filter,
	pub mip_filter: Filter,
	pub address_u: AddressMode,
	pub address_v: AddressMode,
	pub address_w: AddressMode,
	pub mip_lod_bias: f32,
	pub min_lod: f32,
	pub max_lod: f32,
	/// Anisotropic filtering with the given maximum, must be within 1..=16.
	pub max_anisotropy: Option<f32>,
	/// Makes this a comparison sampler.
	pub compare: Option<CompareOp>,
	pub border_color: BorderColor,
}

impl Default for SamplerDesc {
	fn default() -> Self {
		Self {
			mag_filter: Filter::Nearest,
			min_filter: Filter::Nearest,
			mip_filter: Filter::Nearest,
			address_u: AddressMode::Repeat,
			address_v: AddressMode::Repeat,
			address_w: AddressMode::Repeat,
			mip_lod_bias: 0.,
			min_lod: 0.,
			max_lod: f32::MAX,
			max_anisotropy: None,
			compare: None,
			border_color: BorderColor::TransparentBlack,
		}
	}
}

impl SamplerDesc {
	pub const LINEAR: Self = Self {
		mag_filter: Filter::Linear,
		min_filter: Filter::Linear,
		mip_filter: Filter::Linear,
		address_u: AddressMode::Repeat,
		address_v: AddressMode::Repeat,
		address_w: AddressMode::Repeat,
		mip_lod_bias: 0.,
		min_lod: 0.,
		max_lod: f32::MAX,
		max_anisotropy: None,
		compare: None,
		border_color: BorderColor::TransparentBlack,
	};

	pub fn validate(&self) -> RhiResult<()> {
		if !(self.min_lod <= self.max_lod) {
			return Err(RhiError::invalid_argument(format!(
				"sampler min_lod {} exceeds max_lod {}",
				self.min_lod, self.max_lod
			)));
		}
		if let Some(anisotropy) = self.max_anisotropy {
			if !(1. ..=16.).contains(&anisotropy) {
				return Err(RhiError::invalid_argument(format!(
					"sampler anisotropy {anisotropy} out of range 1..=16"
				)));
			}
		}
		Ok(())
	}
}

pub(crate) struct SamplerSlot<P: RhiPlatform> {
	pub native: P::Sampler,
}

/// Resolves and validates a view against the resource it views. Free of device state so it can be tested alone.
pub(crate) fn resolve_view_desc(
	desc: &ViewDesc,
	resource: &ResourceDesc,
	constant_buffer_alignment: u64,
	storage_buffer_alignment: u64,
) -> RhiResult<ViewDesc> {
	let required = desc.view_type.required_usage();
	if !resource.usage.contains(required) {
		return Err(RhiError::invalid_argument(format!(
			"{:?} view requires {required:?} usage, resource has {:?}",
			desc.view_type, resource.usage
		)));
	}

	if desc.view_type.is_buffer_view() {
		if !resource.is_buffer() {
			return Err(RhiError::invalid_argument(format!(
				"{:?} view requires a buffer",
				desc.view_type
			)));
		}
		let size = if desc.buffer_size == 0 {
			resource.width.saturating_sub(desc.buffer_offset)
		} else {
			desc.buffer_size
		};
		if size == 0 || desc.buffer_offset.checked_add(size).map_or(true, |end| end > resource.width) {
			return Err(RhiError::invalid_argument(format!(
				"buffer view {}+{size} out of bounds for buffer of {} bytes",
				desc.buffer_offset, resource.width
			)));
		}
		let alignment = match desc.view_type {
			ViewType::ConstantBuffer => constant_buffer_alignment,
			_ => storage_buffer_alignment,
		};
		if desc.buffer_offset % alignment != 0 {
			return Err(RhiError::invalid_argument(format!(
				"{:?} view offset {} must be aligned to {alignment}",
				desc.view_type, desc.buffer_offset
			)));
		}
		return Ok(ViewDesc {
			format: Format::Unknown,
			subresource: SubresourceRange::mip(0).resolve(resource)?,
			buffer_size: size,
			..*desc
		});
	}

	if !resource.is_texture() {
		return Err(RhiError::invalid_argument(format!(
			"{:?} view requires a texture",
			desc.view_type
		)));
	}
	let format = if desc.format.is_unknown() {
		resource.format
	} else {
		desc.format
	};
	if format.is_depth() != resource.format.is_depth() || format.block_size() != resource.format.block_size() {
		return Err(RhiError::invalid_argument(format!(
			"view format {format:?} is incompatible with resource format {:?}",
			resource.format
		)));
	}
	let subresource = desc.subresource.resolve(resource)?;
	if matches!(desc.view_type, ViewType::RenderTarget | ViewType::DepthStencil | ViewType::StorageTexture)
		&& subresource.mip_count != 1
	{
		return Err(RhiError::invalid_argument(format!(
			"{:?} views must target a single mip level",
			desc.view_type
		)));
	}
	Ok(ViewDesc {
		format,
		subresource,
		buffer_offset: 0,
		buffer_size: 0,
		..*desc
	})
}

impl<P: RhiPlatform> Device<P> {
	/// Creates a view onto a resource that has been bound to memory.
	pub fn create_view(&self, desc: &ViewDesc) -> RhiResult<ViewHandle> {
		profiling::function_scope!();
		let native;
		let resolved;
		{
			let resources = self.objects.resources.read();
			let resource = resources.try_get(desc.resource)?;
			resource.require_bound()?;
			let limits = self.limits();
			resolved = resolve_view_desc(
				desc,
				&resource.desc,
				limits.constant_buffer_alignment,
				limits.storage_buffer_alignment,
			)?;
			native = unsafe { self.platform.create_view(&resource.native, &resolved)? };
		}
		Ok(self.objects.views.write().insert(ViewSlot {
			native,
			desc: resolved,
		}))
	}

	/// The resolved description of a view.
	pub fn view_desc(&self, view: ViewHandle) -> RhiResult<ViewDesc> {
		Ok(self.objects.views.read().try_get(view)?.desc)
	}

	pub fn destroy_view(&self, view: &mut ViewHandle) {
		if let Some(slot) = take_slot(&self.objects.views, view) {
			unsafe { self.platform.destroy_view(slot.native) }
		}
	}

	pub fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<SamplerHandle> {
		desc.validate()?;
		let native = unsafe { self.platform.create_sampler(desc)? };
		Ok(self.objects.samplers.write().insert(SamplerSlot { native }))
	}

	pub fn destroy_sampler(&self, sampler: &mut SamplerHandle) {
		if let Some(slot) = take_slot(&self.objects.samplers, sampler) {
			unsafe { self.platform.destroy_sampler(slot.native) }
		}
	}
}
