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

//! The main chain: an append-only, height-indexed run of headers with
//! their recorded hashes and accumulated work. Chain entries are never
//! deleted, only truncated away during a reorg.

use crate::core::core::hash::{Hash, ShortHashMap};
use crate::core::core::header::{BlockHeader, HeaderContext};
use crate::core::core::target::Work;

/// One header in the chain. The hash is recorded at insert time and
/// reused verbatim ever after, a reorg must never recompute it.
#[derive(Clone, Debug)]
pub struct ChainEntry {
	/// The header
	pub header: BlockHeader,
	/// Its recorded hash
	pub hash: Hash,
	/// Work accumulated up to and including this header
	pub total_work: Work,
}

/// The heaviest chain as an ordered sequence keyed by height.
pub struct HeaderChain {
	entries: Vec<ChainEntry>,
	index: ShortHashMap<Hash, i32>,
}

impl HeaderChain {
	/// An empty chain.
	pub fn new() -> HeaderChain {
		HeaderChain {
			entries: vec![],
			index: ShortHashMap::default(),
		}
	}

	/// Number of headers in the chain.
	pub fn len(&self) -> i32 {
		self.entries.len() as i32
	}

	/// Whether the chain holds no headers yet.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Height of the tip, -1 when empty.
	pub fn height(&self) -> i32 {
		self.len() - 1
	}

	/// Hash of the tip header.
	pub fn tip_hash(&self) -> Option<Hash> {
		self.entries.last().map(|e| e.hash)
	}

	/// Work accumulated at the tip.
	pub fn total_work(&self) -> Work {
		self.entries
			.last()
			.map(|e| e.total_work)
			.unwrap_or_else(Work::zero)
	}

	/// Context of the tip header.
	pub fn tip_context(&self) -> Option<HeaderContext> {
		self.context_at(self.height())
	}

	/// Context of the header at the given height.
	pub fn context_at(&self, height: i32) -> Option<HeaderContext> {
		if height < 0 {
			return None;
		}
		self.entries.get(height as usize).map(|e| HeaderContext {
			header: e.header,
			hash: e.hash,
			height,
			local_work: Work::from_compact(e.header.bits),
			total_work: e.total_work,
		})
	}

	/// The header at the given height.
	pub fn header_at(&self, height: i32) -> Option<&BlockHeader> {
		if height < 0 {
			return None;
		}
		self.entries.get(height as usize).map(|e| &e.header)
	}

	/// The recorded hash at the given height.
	pub fn hash_at(&self, height: i32) -> Option<Hash> {
		if height < 0 {
			return None;
		}
		self.entries.get(height as usize).map(|e| e.hash)
	}

	/// The height of the header carrying the given hash, if on the chain.
	pub fn height_of(&self, hash: &Hash) -> Option<i32> {
		self.index.get(hash).cloned()
	}

	/// Appends a validated header context. The context's height must be
	/// the next free height; anything else is a caller bug.
	pub fn push(&mut self, ctx: &HeaderContext) {
		assert_eq!(
			ctx.height,
			self.len(),
			"chain push out of order: {} at {}",
			ctx.hash,
			ctx.height
		);
		self.index.insert(ctx.hash, ctx.height);
		self.entries.push(ChainEntry {
			header: ctx.header,
			hash: ctx.hash,
			total_work: ctx.total_work,
		});
	}

	/// Truncates the chain to `new_len` headers, returning the removed
	/// tail ordered by height.
	pub fn truncate(&mut self, new_len: i32) -> Vec<ChainEntry> {
		let new_len = new_len.max(0) as usize;
		if new_len >= self.entries.len() {
			return vec![];
		}
		let tail = self.entries.split_off(new_len);
		for entry in &tail {
			self.index.remove(&entry.hash);
		}
		tail
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::hash::{Hash, Hashed};
	use crate::core::core::target::CompactTarget;

	fn chain_of(n: i32) -> (HeaderChain, Vec<HeaderContext>) {
		let mut chain = HeaderChain::new();
		let mut contexts = vec![];
		let mut ctx = HeaderContext::genesis(BlockHeader {
			version: 1,
			prev_hash: Hash([0; 32]),
			merkle_root: Hash([0; 32]),
			timestamp: 1000,
			bits: CompactTarget::from_bits(0x21000001),
			nonce: 0,
		});
		chain.push(&ctx);
		contexts.push(ctx.clone());
		for i in 1..n {
			let mut header = ctx.header;
			header.prev_hash = ctx.hash;
			header.timestamp = 1000 + i as u32 * 600;
			ctx = ctx.extend(header);
			chain.push(&ctx);
			contexts.push(ctx.clone());
		}
		(chain, contexts)
	}

	#[test]
	fn linkage_invariant() {
		let (chain, _) = chain_of(6);
		assert_eq!(chain.len(), 6);
		for h in 1..6 {
			// every header references the recorded hash of its parent
			assert_eq!(
				chain.header_at(h).unwrap().prev_hash,
				chain.hash_at(h - 1).unwrap()
			);
			assert_eq!(
				chain.header_at(h).unwrap().hash(),
				chain.hash_at(h).unwrap()
			);
		}
	}

	#[test]
	fn index_and_truncate() {
		let (mut chain, contexts) = chain_of(6);
		assert_eq!(chain.height_of(&contexts[3].hash), Some(3));

		let tail = chain.truncate(4);
		assert_eq!(tail.len(), 2);
		assert_eq!(tail[0].hash, contexts[4].hash);
		assert_eq!(chain.height(), 3);
		assert_eq!(chain.height_of(&contexts[4].hash), None);
		assert_eq!(chain.tip_hash(), Some(contexts[3].hash));
		assert_eq!(chain.total_work(), contexts[3].total_work);
	}
}
