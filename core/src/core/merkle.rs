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

//! Double-SHA256 merkle trees over transaction hashes. Layers are folded
//! in place; odd layers duplicate their last node. Any identical adjacent
//! pair marks the tree non-unique, since duplicating a trailing subtree
//! produces the same root as the honest tree it copies.

use crate::core::block::Block;
use crate::core::hash::{double_sha256, Hash, ZERO_HASH};

/// A computed merkle root plus whether every adjacent pair was distinct.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MerkleRoot {
	/// The root hash
	pub hash: Hash,
	/// False when some layer paired two identical siblings
	pub unique: bool,
}

/// Folds a vector of leaf hashes into its merkle root. An empty vector
/// yields the zero hash (no valid block produces one).
pub fn merkle_root(mut hashes: Vec<Hash>) -> MerkleRoot {
	if hashes.is_empty() {
		return MerkleRoot {
			hash: ZERO_HASH,
			unique: true,
		};
	}
	let mut unique = true;
	let mut len = hashes.len();
	let mut buf = [0u8; 64];
	while len > 1 {
		let mut write = 0;
		let mut read = 0;
		while read < len {
			let left = hashes[read];
			let right = if read + 1 < len {
				if left == hashes[read + 1] {
					unique = false;
				}
				hashes[read + 1]
			} else {
				// odd layer: the last node pairs with itself
				left
			};
			buf[..32].copy_from_slice(left.as_bytes());
			buf[32..].copy_from_slice(right.as_bytes());
			hashes[write] = double_sha256(&buf);
			write += 1;
			read += 2;
		}
		len = write;
	}
	MerkleRoot {
		hash: hashes[0],
		unique,
	}
}

/// The merkle root over a block's transaction ids.
pub fn block_merkle_root(block: &Block) -> MerkleRoot {
	merkle_root(block.transactions.iter().map(|tx| tx.txid()).collect())
}

/// The witness merkle root: wtxids with the coinbase's substituted by the
/// zero hash, since the coinbase commits to this very tree.
pub fn witness_merkle_root(block: &Block) -> MerkleRoot {
	let mut leaves: Vec<Hash> = block.transactions.iter().map(|tx| tx.wtxid()).collect();
	if let Some(first) = leaves.first_mut() {
		*first = ZERO_HASH;
	}
	merkle_root(leaves)
}

#[cfg(test)]
mod test {
	use super::*;

	fn leaf(n: u8) -> Hash {
		Hash([n; 32])
	}

	#[test]
	fn single_leaf_is_root() {
		let root = merkle_root(vec![leaf(1)]);
		assert_eq!(root.hash, leaf(1));
		assert!(root.unique);
	}

	#[test]
	fn duplicate_last_policy_observable() {
		// a 3-leaf root equals the root with the third leaf repeated
		let three = merkle_root(vec![leaf(1), leaf(2), leaf(3)]);
		let four = merkle_root(vec![leaf(1), leaf(2), leaf(3), leaf(3)]);
		assert_eq!(three.hash, four.hash);
		// the honest 3-leaf tree is unique, the padded copy is not
		assert!(three.unique);
		assert!(!four.unique);
	}

	#[test]
	fn twin_pair_marks_non_unique() {
		let root = merkle_root(vec![leaf(1), leaf(1)]);
		assert!(!root.unique);

		// twins deeper in the tree are caught at the layer they pair on
		let deep = merkle_root(vec![leaf(1), leaf(2), leaf(3), leaf(3)]);
		assert!(!deep.unique);
	}

	#[test]
	fn order_matters() {
		let a = merkle_root(vec![leaf(1), leaf(2)]);
		let b = merkle_root(vec![leaf(2), leaf(1)]);
		assert_ne!(a.hash, b.hash);
	}
}
