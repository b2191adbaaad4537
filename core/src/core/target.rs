// Copyright 2021 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Proof-of-work targets in their compact 32-bit form, their 256-bit
//! expansion, and the work a target represents.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use crate::core::bigint::BigUint256;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Exponent of the protocol-maximum target.
const MAX_EXPONENT: u32 = 0x1d;
/// Mantissa of the protocol-maximum target.
const MAX_MANTISSA: u32 = 0xffff;
/// Bit implied on top of the 23-bit stored mantissa.
const IMPLIED_BIT: u32 = 1 << 23;

/// The 32-bit compact representation of a 256-bit target: one exponent
/// byte and a 23-bit mantissa under a sign bit. The mantissa carries an
/// implied high bit when expanded.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub struct CompactTarget(u32);

impl CompactTarget {
	/// Wraps raw compact bits as read off the wire.
	pub fn from_bits(bits: u32) -> CompactTarget {
		CompactTarget(bits)
	}

	/// The raw compact bits.
	pub fn bits(&self) -> u32 {
		self.0
	}

	/// Expands the compact form into the full 256-bit target.
	///
	/// A zero mantissa expands to a zero target. Exponents beyond 32 yield
	/// the 256-bit maximum (an invalid target that no expected-bits
	/// comparison will ever produce). Anything looser than the protocol
	/// maximum clamps to it.
	pub fn expand(&self) -> BigUint256 {
		let exponent = self.0 >> 24;
		let mantissa = self.0 & 0x007f_ffff;
		if mantissa == 0 {
			return BigUint256::ZERO;
		}
		if exponent > 32 {
			return BigUint256::MAX;
		}
		if exponent > MAX_EXPONENT || (exponent == MAX_EXPONENT && mantissa > MAX_MANTISSA) {
			return max_target();
		}
		let value = BigUint256::from_u64(u64::from(mantissa | IMPLIED_BIT));
		let shift = 8 * (exponent as i32 - 3);
		if shift >= 0 {
			value << shift as u32
		} else {
			value >> (-shift) as u32
		}
	}

	/// Compresses a 256-bit target back into compact form, the inverse of
	/// `expand` for every protocol-valid encoding.
	pub fn from_target(target: BigUint256) -> CompactTarget {
		if target.is_zero() {
			return CompactTarget(0);
		}
		let bits = target.significant_bits() as i32;
		// smallest exponent placing the top set bit at or below the
		// implied-bit position
		let exponent = div_ceil(bits - 24, 8) + 3;
		let shift = 8 * (exponent - 3);
		let mantissa24 = if shift >= 0 {
			(target >> shift as u32).low_u32()
		} else {
			(target << (-shift) as u32).low_u32()
		};
		CompactTarget(((exponent as u32) << 24) | (mantissa24 & 0x007f_ffff))
	}
}

fn div_ceil(n: i32, d: i32) -> i32 {
	if n <= 0 {
		// round toward zero is correct for the negative range used here
		n / d
	} else {
		(n + d - 1) / d
	}
}

/// The loosest target the protocol accepts.
pub fn max_target() -> BigUint256 {
	BigUint256::from_u64(u64::from(MAX_MANTISSA | IMPLIED_BIT)) << (8 * (MAX_EXPONENT - 3))
}

impl fmt::Display for CompactTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:08x}", self.0)
	}
}

impl Writeable for CompactTarget {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.0)
	}
}

impl Readable for CompactTarget {
	fn read(reader: &mut dyn Reader) -> Result<CompactTarget, ser::Error> {
		Ok(CompactTarget(reader.read_u32()?))
	}
}

/// Cumulative or per-header proof of work. The work of a single target is
/// `2^256 / (target + 1)`, computed as `(~target / (target + 1)) + 1` to
/// stay within 256-bit arithmetic.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Work(BigUint256);

impl Work {
	/// No work at all. Useful as the seed of a summation.
	pub fn zero() -> Work {
		Work(BigUint256::ZERO)
	}

	/// The work represented by one hash meeting the given target.
	pub fn from_target(target: BigUint256) -> Work {
		let (divisor, overflow) = target.overflowing_add(BigUint256::ONE);
		if overflow {
			// target of all ones: a single hash always meets it
			return Work(BigUint256::ONE);
		}
		let (quotient, _) = (!target).div_rem(divisor);
		Work(quotient + BigUint256::ONE)
	}

	/// The work of a header carrying the given compact bits.
	pub fn from_compact(bits: CompactTarget) -> Work {
		Work::from_target(bits.expand())
	}

	/// The underlying 256-bit value.
	pub fn to_biguint(&self) -> BigUint256 {
		self.0
	}
}

impl Add for Work {
	type Output = Work;
	fn add(self, rhs: Work) -> Work {
		Work(self.0 + rhs.0)
	}
}

impl AddAssign for Work {
	fn add_assign(&mut self, rhs: Work) {
		self.0 = self.0 + rhs.0;
	}
}

impl Sub for Work {
	type Output = Work;
	fn sub(self, rhs: Work) -> Work {
		Work(self.0 - rhs.0)
	}
}

impl fmt::Display for Work {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn expand_edge_cases() {
		// zero mantissa expands to zero regardless of exponent
		assert!(CompactTarget::from_bits(0x1d000000).expand().is_zero());
		assert!(CompactTarget::from_bits(0x00000000).expand().is_zero());
		// exponent beyond 32 saturates to the 256-bit maximum
		assert_eq!(
			CompactTarget::from_bits(0x21000001).expand(),
			BigUint256::MAX
		);
		// looser than the protocol maximum clamps to it
		assert_eq!(CompactTarget::from_bits(0x1e000001).expand(), max_target());
		assert_eq!(CompactTarget::from_bits(0x1d010000).expand(), max_target());
	}

	#[test]
	fn expand_positions_mantissa() {
		// exponent 3: no shift, implied bit set
		let t = CompactTarget::from_bits(0x03000001).expand();
		assert_eq!(t, BigUint256::from_u64(0x800001));
		// exponent 4: one byte up
		let t = CompactTarget::from_bits(0x04000001).expand();
		assert_eq!(t, BigUint256::from_u64(0x80000100));
		// exponent below 3 shifts down
		let t = CompactTarget::from_bits(0x02000001).expand();
		assert_eq!(t, BigUint256::from_u64(0x8000));
	}

	#[test]
	fn compact_round_trip() {
		// every protocol-valid encoding survives expand + compress
		for &bits in &[
			0x1d00ffffu32,
			0x1c7fffff,
			0x1b0404cb,
			0x1a05db8b,
			0x170331db,
			0x03000001,
			0x04123456,
			0x1d00abcd,
		] {
			let b = CompactTarget::from_bits(bits);
			assert_eq!(
				CompactTarget::from_target(b.expand()),
				b,
				"round trip of {:08x}",
				bits
			);
		}
	}

	#[test]
	fn work_of_max_target_is_minimal() {
		let w = Work::from_compact(CompactTarget::from_bits(0x1d00ffff));
		assert!(w > Work::zero());
		// halving the target doubles the work, within integer truncation
		let half = max_target() >> 1;
		let w2 = Work::from_target(half);
		assert!(w2 >= w + w - Work(BigUint256::from_u64(4)));
		assert!(w2 <= w + w + Work(BigUint256::from_u64(4)));
	}

	#[test]
	fn work_sums_and_orders() {
		let easy = Work::from_compact(CompactTarget::from_bits(0x1d00ffff));
		let hard = Work::from_compact(CompactTarget::from_bits(0x1c00ffff));
		assert!(hard > easy);
		let mut acc = Work::zero();
		acc += easy;
		acc += easy;
		assert_eq!(acc, easy + easy);
		assert_eq!(acc - easy, easy);
	}
}
