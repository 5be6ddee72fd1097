/// Texel and vertex attribute formats understood by every backend.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Format {
	#[default]
	Unknown,
	R8Unorm,
	R8G8Unorm,
	R8G8B8A8Unorm,
	R8G8B8A8Srgb,
	B8G8R8A8Unorm,
	B8G8R8A8Srgb,
	R10G10B10A2Unorm,
	R16Float,
	R16G16Float,
	R16G16B16A16Float,
	R32Uint,
	R32Float,
	R32G32Float,
	R32G32B32Float,
	R32G32B32A32Float,
	D16Unorm,
	D32Float,
	D24UnormS8Uint,
	D32FloatS8Uint,
}

impl Format {
	/// Size of a single texel in bytes, or 0 for [`Format::Unknown`].
	pub const fn block_size(&self) -> u32 {
		match self {
			Format::Unknown => 0,
			Format::R8Unorm => 1,
			Format::R8G8Unorm | Format::R16Float | Format::D16Unorm => 2,
			Format::R8G8B8A8Unorm
			| Format::R8G8B8A8Srgb
			| Format::B8G8R8A8Unorm
			| Format::B8G8R8A8Srgb
			| Format::R10G10B10A2Unorm
			| Format::R16G16Float
			| Format::R32Uint
			| Format::R32Float
			| Format::D32Float
			| Format::D24UnormS8Uint => 4,
			Format::R16G16B16A16Float | Format::R32G32Float | Format::D32FloatS8Uint => 8,
			Format::R32G32B32Float => 12,
			Format::R32G32B32A32Float => 16,
		}
	}

	pub const fn is_depth(&self) -> bool {
		matches!(
			self,
			Format::D16Unorm | Format::D32Float | Format::D24UnormS8Uint | Format::D32FloatS8Uint
		)
	}

	pub const fn has_stencil(&self) -> bool {
		matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8Uint)
	}

	pub const fn is_srgb(&self) -> bool {
		matches!(self, Format::R8G8B8A8Srgb | Format::B8G8R8A8Srgb)
	}

	pub const fn is_unknown(&self) -> bool {
		matches!(self, Format::Unknown)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn depth_formats() {
		assert!(Format::D32Float.is_depth());
		assert!(!Format::D32Float.has_stencil());
		assert!(Format::D24UnormS8Uint.has_stencil());
		assert!(!Format::R8G8B8A8Unorm.is_depth());
		assert_eq!(Format::R32G32B32Float.block_size(), 12);
		assert_eq!(Format::Unknown.block_size(), 0);
	}
}
