use crate::format::Format;
use smallvec::SmallVec;

pub type Texel = SmallVec<[u8; 16]>;

fn unorm8(x: f32) -> u8 {
	(x.clamp(0., 1.) * 255. + 0.5) as u8
}

fn linear_to_srgb(x: f32) -> f32 {
	let x = x.clamp(0., 1.);
	if x <= 0.003_130_8 {
		x * 12.92
	} else {
		1.055 * x.powf(1. / 2.4) - 0.055
	}
}

/// IEEE 754 binary16 bits of `x`, rounding toward zero.
fn f16_bits(x: f32) -> u16 {
	let bits = x.to_bits();
	let sign = ((bits >> 16) & 0x8000) as u16;
	let exponent = ((bits >> 23) & 0xff) as i32;
	let mantissa = bits & 0x7f_ffff;
	if exponent == 0xff {
		// inf or nan
		return sign | 0x7c00 | if mantissa != 0 { 0x200 } else { 0 };
	}
	let exponent = exponent - 127 + 15;
	if exponent >= 0x1f {
		sign | 0x7c00
	} else if exponent <= 0 {
		if exponent < -10 {
			sign
		} else {
			let mantissa = mantissa | 0x80_0000;
			sign | (mantissa >> (14 - exponent)) as u16
		}
	} else {
		sign | ((exponent as u16) << 10) | (mantissa >> 13) as u16
	}
}

/// Encodes a clear color as a single texel of `format`. Depth formats encode to an empty texel.
pub fn encode_color(format: Format, color: [f32; 4]) -> Texel {
	let [r, g, b, a] = color;
	let srgb = |x| unorm8(linear_to_srgb(x));
	let mut texel = Texel::new();
	match format {
		Format::R8Unorm => texel.push(unorm8(r)),
		Format::R8G8Unorm => texel.extend([unorm8(r), unorm8(g)]),
		Format::R8G8B8A8Unorm => texel.extend([unorm8(r), unorm8(g), unorm8(b), unorm8(a)]),
		Format::R8G8B8A8Srgb => texel.extend([srgb(r), srgb(g), srgb(b), unorm8(a)]),
		Format::B8G8R8A8Unorm => texel.extend([unorm8(b), unorm8(g), unorm8(r), unorm8(a)]),
		Format::B8G8R8A8Srgb => texel.extend([srgb(b), srgb(g), srgb(r), unorm8(a)]),
		Format::R10G10B10A2Unorm => {
			let unorm10 = |x: f32| (x.clamp(0., 1.) * 1023. + 0.5) as u32;
			let a = (a.clamp(0., 1.) * 3. + 0.5) as u32;
			let packed = unorm10(r) | unorm10(g) << 10 | unorm10(b) << 20 | a << 30;
			texel.extend(packed.to_le_bytes());
		}
		Format::R16Float => texel.extend(f16_bits(r).to_le_bytes()),
		Format::R16G16Float => [r, g].iter().for_each(|c| texel.extend(f16_bits(*c).to_le_bytes())),
		Format::R16G16B16A16Float => color.iter().for_each(|c| texel.extend(f16_bits(*c).to_le_bytes())),
		Format::R32Uint => texel.extend((r.max(0.) as u32).to_le_bytes()),
		Format::R32Float => texel.extend(r.to_le_bytes()),
		Format::R32G32Float => [r, g].iter().for_each(|c| texel.extend(c.to_le_bytes())),
		Format::R32G32B32Float => [r, g, b].iter().for_each(|c| texel.extend(c.to_le_bytes())),
		Format::R32G32B32A32Float => color.iter().for_each(|c| texel.extend(c.to_le_bytes())),
		Format::Unknown | Format::D16Unorm | Format::D32Float | Format::D24UnormS8Uint | Format::D32FloatS8Uint => {}
	}
	texel
}

/// Encodes a depth and stencil clear value as a single texel of a depth `format`.
pub fn encode_depth(format: Format, depth: f32, stencil: u32) -> Texel {
	let depth = depth.clamp(0., 1.);
	let mut texel = Texel::new();
	match format {
		Format::D16Unorm => texel.extend(((depth * 65535. + 0.5) as u16).to_le_bytes()),
		Format::D32Float => texel.extend(depth.to_le_bytes()),
		Format::D24UnormS8Uint => {
			let packed = (depth * 16_777_215. + 0.5) as u32 | (stencil & 0xff) << 24;
			texel.extend(packed.to_le_bytes());
		}
		Format::D32FloatS8Uint => {
			texel.extend(depth.to_le_bytes());
			texel.extend((stencil & 0xff).to_le_bytes());
		}
		_ => {}
	}
	texel
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unorm_colors() {
		assert_eq!(
			encode_color(Format::R8G8B8A8Unorm, [1., 0., 0.5, 1.]).as_slice(),
			&[255, 0, 128, 255]
		);
		assert_eq!(
			encode_color(Format::B8G8R8A8Unorm, [1., 0., 0.5, 1.]).as_slice(),
			&[128, 0, 255, 255]
		);
		assert_eq!(encode_color(Format::R8G8B8A8Srgb, [0.5, 0., 1., 0.]).as_slice()[0], 188);
	}

	#[test]
	fn half_floats() {
		assert_eq!(f16_bits(1.), 0x3c00);
		assert_eq!(f16_bits(-2.), 0xc000);
		assert_eq!(f16_bits(0.), 0);
		assert_eq!(f16_bits(f32::INFINITY), 0x7c00);
		assert_eq!(f16_bits(1e10), 0x7c00);
	}

	#[test]
	fn depth_values() {
		assert_eq!(encode_depth(Format::D32Float, 1., 0).as_slice(), &1f32.to_le_bytes());
		assert_eq!(encode_depth(Format::D24UnormS8Uint, 1., 3).as_slice(), &[255, 255, 255, 3]);
		assert_eq!(encode_depth(Format::D32FloatS8Uint, 0., 7).len(), 8);
		assert!(encode_color(Format::D32Float, [1.; 4]).is_empty());
	}
}
