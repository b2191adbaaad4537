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

//! Fixed-width 256-bit unsigned arithmetic. Just enough for target
//! expansion and chain-work computation: carry-aware add/sub, shifts,
//! bitwise not, small-word mul/div and full long division.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Not, Shl, Shr, Sub};

/// A 256-bit unsigned integer as four 64-bit little-endian words.
#[derive(Copy, Clone, PartialEq, Eq, Default, Hash)]
pub struct BigUint256(pub [u64; 4]);

impl BigUint256 {
	/// Zero.
	pub const ZERO: BigUint256 = BigUint256([0; 4]);
	/// One.
	pub const ONE: BigUint256 = BigUint256([1, 0, 0, 0]);
	/// All bits set.
	pub const MAX: BigUint256 = BigUint256([u64::max_value(); 4]);

	/// Widens a u64.
	pub fn from_u64(v: u64) -> BigUint256 {
		BigUint256([v, 0, 0, 0])
	}

	/// Interprets 32 little-endian bytes. This is the numeric reading of a
	/// block hash for the proof-of-work comparison.
	pub fn from_le_bytes(bytes: &[u8; 32]) -> BigUint256 {
		let mut words = [0u64; 4];
		for (i, word) in words.iter_mut().enumerate() {
			let mut w = [0u8; 8];
			w.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
			*word = u64::from_le_bytes(w);
		}
		BigUint256(words)
	}

	/// The value as 32 little-endian bytes.
	pub fn to_le_bytes(&self) -> [u8; 32] {
		let mut bytes = [0u8; 32];
		for (i, word) in self.0.iter().enumerate() {
			bytes[i * 8..i * 8 + 8].copy_from_slice(&word.to_le_bytes());
		}
		bytes
	}

	/// Whether the value is zero.
	pub fn is_zero(&self) -> bool {
		self.0 == [0; 4]
	}

	/// The low 64 bits.
	pub fn low_u64(&self) -> u64 {
		self.0[0]
	}

	/// The low 32 bits.
	pub fn low_u32(&self) -> u32 {
		self.0[0] as u32
	}

	/// Addition reporting the carry out of the top word.
	pub fn overflowing_add(self, rhs: BigUint256) -> (BigUint256, bool) {
		let mut words = [0u64; 4];
		let mut carry = false;
		for i in 0..4 {
			let (sum, c1) = self.0[i].overflowing_add(rhs.0[i]);
			let (sum, c2) = sum.overflowing_add(u64::from(carry as u8));
			words[i] = sum;
			carry = c1 || c2;
		}
		(BigUint256(words), carry)
	}

	/// Subtraction reporting the borrow out of the top word.
	pub fn overflowing_sub(self, rhs: BigUint256) -> (BigUint256, bool) {
		let mut words = [0u64; 4];
		let mut borrow = false;
		for i in 0..4 {
			let (diff, b1) = self.0[i].overflowing_sub(rhs.0[i]);
			let (diff, b2) = diff.overflowing_sub(u64::from(borrow as u8));
			words[i] = diff;
			borrow = b1 || b2;
		}
		(BigUint256(words), borrow)
	}

	/// Number of significant bits; zero for zero.
	pub fn significant_bits(&self) -> u32 {
		for i in (0..4).rev() {
			if self.0[i] != 0 {
				return (i as u32) * 64 + (64 - self.0[i].leading_zeros());
			}
		}
		0
	}

	/// Value of the bit at position `i` (0 = least significant).
	pub fn bit(&self, i: u32) -> bool {
		(self.0[(i / 64) as usize] >> (i % 64)) & 1 == 1
	}

	/// Sets the bit at position `i`.
	pub fn set_bit(&mut self, i: u32) {
		self.0[(i / 64) as usize] |= 1u64 << (i % 64);
	}

	/// Multiplication by a 64-bit word, wrapping at 256 bits. The retarget
	/// multiplier (a clamped timespan) is far below the wrap point.
	pub fn mul_u64(self, rhs: u64) -> BigUint256 {
		let mut words = [0u64; 4];
		let mut carry: u128 = 0;
		for i in 0..4 {
			let prod = u128::from(self.0[i]) * u128::from(rhs) + carry;
			words[i] = prod as u64;
			carry = prod >> 64;
		}
		BigUint256(words)
	}

	/// Division by a 64-bit word. Panics on a zero divisor.
	pub fn div_u64(self, rhs: u64) -> BigUint256 {
		assert!(rhs != 0, "division by zero");
		let mut words = [0u64; 4];
		let mut rem: u128 = 0;
		for i in (0..4).rev() {
			let acc = (rem << 64) | u128::from(self.0[i]);
			words[i] = (acc / u128::from(rhs)) as u64;
			rem = acc % u128::from(rhs);
		}
		BigUint256(words)
	}

	/// Long division, returning (quotient, remainder). Bit-at-a-time over
	/// the dividend's significant bits. Panics on a zero divisor.
	pub fn div_rem(self, divisor: BigUint256) -> (BigUint256, BigUint256) {
		assert!(!divisor.is_zero(), "division by zero");
		let mut quotient = BigUint256::ZERO;
		let mut rem = BigUint256::ZERO;
		for i in (0..self.significant_bits()).rev() {
			rem = rem << 1;
			if self.bit(i) {
				rem.set_bit(0);
			}
			if rem >= divisor {
				let (r, _) = rem.overflowing_sub(divisor);
				rem = r;
				quotient.set_bit(i);
			}
		}
		(quotient, rem)
	}
}

impl Ord for BigUint256 {
	fn cmp(&self, other: &BigUint256) -> Ordering {
		for i in (0..4).rev() {
			match self.0[i].cmp(&other.0[i]) {
				Ordering::Equal => continue,
				ord => return ord,
			}
		}
		Ordering::Equal
	}
}

impl PartialOrd for BigUint256 {
	fn partial_cmp(&self, other: &BigUint256) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Add for BigUint256 {
	type Output = BigUint256;
	fn add(self, rhs: BigUint256) -> BigUint256 {
		let (sum, carry) = self.overflowing_add(rhs);
		debug_assert!(!carry, "256-bit addition overflow");
		sum
	}
}

impl Sub for BigUint256 {
	type Output = BigUint256;
	fn sub(self, rhs: BigUint256) -> BigUint256 {
		let (diff, borrow) = self.overflowing_sub(rhs);
		debug_assert!(!borrow, "256-bit subtraction underflow");
		diff
	}
}

impl Not for BigUint256 {
	type Output = BigUint256;
	fn not(self) -> BigUint256 {
		BigUint256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
	}
}

impl Shl<u32> for BigUint256 {
	type Output = BigUint256;
	fn shl(self, shift: u32) -> BigUint256 {
		if shift >= 256 {
			return BigUint256::ZERO;
		}
		let word_shift = (shift / 64) as usize;
		let bit_shift = shift % 64;
		let mut words = [0u64; 4];
		for i in (word_shift..4).rev() {
			words[i] = self.0[i - word_shift] << bit_shift;
			if bit_shift > 0 && i > word_shift {
				words[i] |= self.0[i - word_shift - 1] >> (64 - bit_shift);
			}
		}
		BigUint256(words)
	}
}

impl Shr<u32> for BigUint256 {
	type Output = BigUint256;
	fn shr(self, shift: u32) -> BigUint256 {
		if shift >= 256 {
			return BigUint256::ZERO;
		}
		let word_shift = (shift / 64) as usize;
		let bit_shift = shift % 64;
		let mut words = [0u64; 4];
		for i in word_shift..4 {
			words[i - word_shift] = self.0[i] >> bit_shift;
			if bit_shift > 0 && i + 1 < 4 {
				words[i - word_shift] |= self.0[i + 1] << (64 - bit_shift);
			}
		}
		BigUint256(words)
	}
}

impl fmt::Debug for BigUint256 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl fmt::Display for BigUint256 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"0x{:016x}{:016x}{:016x}{:016x}",
			self.0[3], self.0[2], self.0[1], self.0[0]
		)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use rand::{Rng, SeedableRng};

	fn random(rng: &mut rand::rngs::StdRng) -> BigUint256 {
		BigUint256([rng.gen(), rng.gen(), rng.gen(), rng.gen()])
	}

	#[test]
	fn add_sub_carry() {
		let max = BigUint256::MAX;
		let (wrapped, carry) = max.overflowing_add(BigUint256::ONE);
		assert!(carry);
		assert!(wrapped.is_zero());

		let (under, borrow) = BigUint256::ZERO.overflowing_sub(BigUint256::ONE);
		assert!(borrow);
		assert_eq!(under, max);

		let a = BigUint256::from_u64(u64::max_value());
		let sum = a + BigUint256::ONE;
		assert_eq!(sum.0, [0, 1, 0, 0]);
	}

	#[test]
	fn shifts() {
		let one = BigUint256::ONE;
		assert_eq!((one << 64).0, [0, 1, 0, 0]);
		assert_eq!((one << 255).0, [0, 0, 0, 1 << 63]);
		assert_eq!((one << 255) >> 255, one);
		assert_eq!(one << 256, BigUint256::ZERO);
		let v = BigUint256([0, 0, 1, 0]);
		assert_eq!((v >> 1).0, [0, 1 << 63, 0, 0]);
	}

	#[test]
	fn significant_bits() {
		assert_eq!(BigUint256::ZERO.significant_bits(), 0);
		assert_eq!(BigUint256::ONE.significant_bits(), 1);
		assert_eq!(BigUint256::from_u64(0xff).significant_bits(), 8);
		assert_eq!((BigUint256::ONE << 200).significant_bits(), 201);
		assert_eq!(BigUint256::MAX.significant_bits(), 256);
	}

	#[test]
	fn div_rem_identity() {
		// (a / b) * b + r == a with 0 <= r < b, over random 256-bit inputs
		let mut rng = rand::rngs::StdRng::seed_from_u64(42);
		for _ in 0..200 {
			let a = random(&mut rng);
			let mut b = random(&mut rng);
			// shrink some divisors so quotients get interesting
			if rng.gen::<bool>() {
				b = b >> rng.gen_range(0, 255);
			}
			if b.is_zero() {
				continue;
			}
			let (q, r) = a.div_rem(b);
			assert!(r < b);
			// reconstruct via shift-and-add multiplication
			let mut product = BigUint256::ZERO;
			for i in 0..q.significant_bits() {
				if q.bit(i) {
					let (p, _) = product.overflowing_add(b << i);
					product = p;
				}
			}
			let (back, _) = product.overflowing_add(r);
			assert_eq!(back, a);
		}
	}

	#[test]
	fn div_u64_matches_div_rem() {
		let mut rng = rand::rngs::StdRng::seed_from_u64(7);
		for _ in 0..100 {
			let a = random(&mut rng);
			let d: u64 = rng.gen_range(1, u64::max_value());
			let (q, _) = a.div_rem(BigUint256::from_u64(d));
			assert_eq!(a.div_u64(d), q);
		}
	}
}
