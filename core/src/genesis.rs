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

//! Definition of the genesis block. Placeholder for now until the
//! timechain seeds itself from it.

use crate::core::hash::{Hash, ZERO_HASH};
use crate::core::header::BlockHeader;
use crate::core::target::CompactTarget;

/// The mainnet genesis header, hardcoded from the chain everyone agrees on.
pub fn genesis_header() -> BlockHeader {
	BlockHeader {
		version: 1,
		prev_hash: ZERO_HASH,
		merkle_root: Hash::from_hex(
			"4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
		)
		.unwrap(),
		timestamp: 1_231_006_505,
		bits: CompactTarget::from_bits(0x1d00ffff),
		nonce: 2_083_236_893,
	}
}

lazy_static! {
	/// Hash of the mainnet genesis header.
	pub static ref GENESIS_HASH: Hash = Hash::from_hex(
		"000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
	)
	.unwrap();
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::Hashed;

	#[test]
	fn genesis_hashes_to_the_known_value() {
		assert_eq!(genesis_header().hash(), *GENESIS_HASH);
	}
}
