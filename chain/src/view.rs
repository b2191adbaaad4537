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

//! Read-only ancestry views pinned at a header. A view holds no chain
//! lock; each query takes a short read lock of its own, so a validator
//! can keep a view across the writes its own adds perform.

use std::sync::Arc;

use crate::core::core::header::HeaderAncestryView;
use crate::core::core::target::CompactTarget;

use crate::chain::Timechain;
use crate::types::Position;

/// An ancestry view over the timechain, pinned at a position. The pin can
/// be advanced as validation accepts headers, keeping the view one step
/// behind the header being checked.
pub struct ChainView {
	chain: Arc<Timechain>,
	pinned: Position,
	height: i32,
}

impl ChainView {
	/// A view pinned at the given position.
	pub fn new(chain: Arc<Timechain>, pinned: Position, height: i32) -> ChainView {
		ChainView {
			chain,
			pinned,
			height,
		}
	}

	/// The position the view is pinned at.
	pub fn pinned(&self) -> Position {
		self.pinned
	}

	/// Re-pins the view at a new tip, typically the header just accepted.
	pub fn advance(&mut self, pinned: Position, height: i32) {
		self.pinned = pinned;
		self.height = height;
	}
}

impl HeaderAncestryView for ChainView {
	fn height(&self) -> i32 {
		self.height
	}

	fn timestamp_at(&self, height: i32) -> Option<u32> {
		self.chain
			.ancestor_at_height(self.pinned, height)
			.ok()
			.map(|ctx| ctx.header.timestamp)
	}

	fn last_n_timestamps(&self, n: usize) -> Vec<u32> {
		self.chain.last_n_timestamps(self.pinned, n)
	}

	fn bits_at(&self, height: i32) -> Option<CompactTarget> {
		self.chain
			.ancestor_at_height(self.pinned, height)
			.ok()
			.map(|ctx| ctx.header.bits)
	}
}
