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

//! Header validation rules. Ordered cheapest first to keep the DoS
//! surface small: linkage, proof of work, then everything needing the
//! ancestry view.

use crate::consensus::{
	is_version_valid, median_time_past, next_compact_target, MAX_FUTURE_DRIFT,
};
use crate::core::bigint::BigUint256;
use crate::core::hash::Hashed;
use crate::core::header::{BlockHeader, HeaderAncestryView, HeaderContext};
use crate::rules::Rule;

/// Ways a header can fail validation.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Fail)]
pub enum HeaderErrorKind {
	/// No known header matches the claimed parent
	#[fail(display = "Parent Not Found")]
	ParentNotFound,
	/// The header hash doesn't meet its own declared target
	#[fail(display = "Invalid Proof of Work")]
	InvalidProofOfWork,
	/// Timestamp at or below the past median, or too far in the future
	#[fail(display = "Bad Timestamp")]
	BadTimestamp,
	/// Declared bits don't match the difficulty schedule
	#[fail(display = "Bad Difficulty Transition")]
	BadDifficultyTransition,
	/// Version retired or unknown at this height
	#[fail(display = "Bad Version")]
	BadVersion,
}

/// Everything the header rules judge: the header, its prospective parent
/// and a view over the parent's ancestry.
pub struct HeaderArgs<'a> {
	/// Header under validation
	pub header: &'a BlockHeader,
	/// Context of the parent it claims to extend
	pub parent: &'a HeaderContext,
	/// Ancestry view pinned at the parent
	pub view: &'a dyn HeaderAncestryView,
	/// Wall-clock now, seconds since the epoch
	pub now: u32,
}

impl<'a> HeaderArgs<'a> {
	/// Height the header would occupy.
	pub fn height(&self) -> i32 {
		self.parent.height + 1
	}
}

type HeaderRule = fn(&HeaderArgs<'_>) -> Result<(), HeaderErrorKind>;

/// The header ruleset, in evaluation order.
pub const HEADER_RULESET: [Rule<HeaderRule>; 6] = [
	Rule {
		check: check_parent,
		bip: None,
	},
	Rule {
		check: check_proof_of_work,
		bip: None,
	},
	Rule {
		check: check_difficulty_transition,
		bip: None,
	},
	Rule {
		check: check_timestamp_median,
		bip: None,
	},
	Rule {
		check: check_timestamp_drift,
		bip: None,
	},
	Rule {
		check: check_version,
		bip: None,
	},
];

/// Runs the full header ruleset.
pub fn validate_header(args: &HeaderArgs<'_>) -> Result<(), HeaderErrorKind> {
	crate::rules::validate(&HEADER_RULESET, args, args.height())
}

fn check_parent(args: &HeaderArgs<'_>) -> Result<(), HeaderErrorKind> {
	if args.header.prev_hash != args.parent.hash {
		return Err(HeaderErrorKind::ParentNotFound);
	}
	Ok(())
}

fn check_proof_of_work(args: &HeaderArgs<'_>) -> Result<(), HeaderErrorKind> {
	let hash = args.header.hash();
	let hash_value = BigUint256::from_le_bytes(&hash.0);
	if hash_value > args.header.bits.expand() {
		return Err(HeaderErrorKind::InvalidProofOfWork);
	}
	Ok(())
}

fn check_difficulty_transition(args: &HeaderArgs<'_>) -> Result<(), HeaderErrorKind> {
	let expected = next_compact_target(args.height(), args.parent.header.bits, args.view);
	if args.header.bits != expected {
		return Err(HeaderErrorKind::BadDifficultyTransition);
	}
	Ok(())
}

fn check_timestamp_median(args: &HeaderArgs<'_>) -> Result<(), HeaderErrorKind> {
	if args.header.timestamp <= median_time_past(args.view) {
		return Err(HeaderErrorKind::BadTimestamp);
	}
	Ok(())
}

fn check_timestamp_drift(args: &HeaderArgs<'_>) -> Result<(), HeaderErrorKind> {
	if args.header.timestamp > args.now.saturating_add(MAX_FUTURE_DRIFT) {
		return Err(HeaderErrorKind::BadTimestamp);
	}
	Ok(())
}

fn check_version(args: &HeaderArgs<'_>) -> Result<(), HeaderErrorKind> {
	if !is_version_valid(args.header.version, args.height()) {
		return Err(HeaderErrorKind::BadVersion);
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::consensus::{activation_height, Bip};
	use crate::core::hash::Hash;
	use crate::core::target::CompactTarget;

	/// Bits whose expansion saturates to the 256-bit maximum, so any
	/// header hash meets the target. Test-only; the difficulty schedule
	/// would never produce it.
	const FREE_BITS: u32 = 0x21000001;

	struct TestView {
		timestamps: Vec<u32>,
		bits: CompactTarget,
	}

	impl HeaderAncestryView for TestView {
		fn height(&self) -> i32 {
			self.timestamps.len() as i32 - 1
		}
		fn timestamp_at(&self, height: i32) -> Option<u32> {
			self.timestamps.get(height as usize).cloned()
		}
		fn last_n_timestamps(&self, n: usize) -> Vec<u32> {
			let skip = self.timestamps.len().saturating_sub(n);
			self.timestamps[skip..].to_vec()
		}
		fn bits_at(&self, _height: i32) -> Option<CompactTarget> {
			Some(self.bits)
		}
	}

	fn parent_at(height: i32, bits: u32) -> (HeaderContext, TestView) {
		use crate::core::target::Work;

		let header = BlockHeader {
			version: 4,
			prev_hash: Hash([1; 32]),
			merkle_root: Hash([0; 32]),
			timestamp: 1000 + height as u32 * 600,
			bits: CompactTarget::from_bits(bits),
			nonce: 0,
		};
		let local_work = Work::from_compact(header.bits);
		let ctx = HeaderContext {
			hash: header.hash(),
			height,
			local_work,
			// rules never look at the accumulated total
			total_work: local_work,
			header,
		};
		let timestamps = (0..=height as u32).map(|h| 1000 + h * 600).collect();
		let bits = header.bits;
		(ctx, TestView { timestamps, bits })
	}

	fn child_of(parent: &HeaderContext) -> BlockHeader {
		let mut header = parent.header;
		header.prev_hash = parent.hash;
		header.timestamp = parent.header.timestamp + 600;
		header
	}

	#[test]
	fn accepts_a_well_formed_header() {
		let (parent, view) = parent_at(10, FREE_BITS);
		let header = child_of(&parent);
		let args = HeaderArgs {
			header: &header,
			parent: &parent,
			view: &view,
			now: header.timestamp + 60,
		};
		assert_eq!(validate_header(&args), Ok(()));
	}

	#[test]
	fn rejects_unknown_parent() {
		let (parent, view) = parent_at(10, FREE_BITS);
		let mut header = child_of(&parent);
		header.prev_hash = Hash([0xcc; 32]);
		let args = HeaderArgs {
			header: &header,
			parent: &parent,
			view: &view,
			now: header.timestamp,
		};
		assert_eq!(validate_header(&args), Err(HeaderErrorKind::ParentNotFound));
	}

	#[test]
	fn rejects_insufficient_work() {
		let (parent, view) = parent_at(10, FREE_BITS);
		let mut header = child_of(&parent);
		// an impossibly tight target: 0x800001
		header.bits = CompactTarget::from_bits(0x03000001);
		let args = HeaderArgs {
			header: &header,
			parent: &parent,
			view: &view,
			now: header.timestamp,
		};
		assert_eq!(
			validate_header(&args),
			Err(HeaderErrorKind::InvalidProofOfWork)
		);
	}

	#[test]
	fn rejects_off_schedule_bits() {
		let (parent, view) = parent_at(10, FREE_BITS);
		let mut header = child_of(&parent);
		// still free to mine, but not what the schedule says
		header.bits = CompactTarget::from_bits(0x22000001);
		let args = HeaderArgs {
			header: &header,
			parent: &parent,
			view: &view,
			now: header.timestamp,
		};
		assert_eq!(
			validate_header(&args),
			Err(HeaderErrorKind::BadDifficultyTransition)
		);
	}

	#[test]
	fn rejects_stale_and_future_timestamps() {
		let (parent, view) = parent_at(12, FREE_BITS);
		let mut header = child_of(&parent);

		// at or below the median of the last eleven
		header.timestamp = median_time_past(&view);
		let args = HeaderArgs {
			header: &header,
			parent: &parent,
			view: &view,
			now: header.timestamp,
		};
		assert_eq!(validate_header(&args), Err(HeaderErrorKind::BadTimestamp));

		// more than two hours past the wall clock
		let mut header = child_of(&parent);
		let now = header.timestamp;
		header.timestamp = now + MAX_FUTURE_DRIFT + 1;
		let args = HeaderArgs {
			header: &header,
			parent: &parent,
			view: &view,
			now,
		};
		assert_eq!(validate_header(&args), Err(HeaderErrorKind::BadTimestamp));
	}

	#[test]
	fn version_gate_follows_activation() {
		// a retired version only fails once its successor activates
		let boundary = activation_height(Bip::Bip34);

		let (parent, view) = parent_at(boundary - 2, FREE_BITS);
		let mut header = child_of(&parent);
		header.version = 1;
		let args = HeaderArgs {
			header: &header,
			parent: &parent,
			view: &view,
			now: header.timestamp,
		};
		assert_eq!(validate_header(&args), Ok(()));

		let (parent, view) = parent_at(boundary - 1, FREE_BITS);
		let mut header = child_of(&parent);
		header.version = 1;
		let args = HeaderArgs {
			header: &header,
			parent: &parent,
			view: &view,
			now: header.timestamp,
		};
		assert_eq!(validate_header(&args), Err(HeaderErrorKind::BadVersion));
	}
}
