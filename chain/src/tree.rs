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

//! The fork forest: competing branches kept off the main chain. Nodes
//! live in an arena of reusable slots and reference their parents through
//! generation-checked handles, so an erased parent reads as absent rather
//! than as whatever reused its slot.

use crate::core::core::hash::{Hash, ShortHashMap};
use crate::core::core::header::HeaderContext;

/// Stable handle to a tree node. Survives arena compaction; resolves to
/// nothing once the node is erased.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct NodeId {
	idx: u32,
	gen: u32,
}

struct Node {
	parent: Option<NodeId>,
	ctx: HeaderContext,
	/// Height of the root of the branch this node belongs to
	root_height: i32,
	/// Insertion order, for latest-to-oldest sweeps
	seq: u64,
}

struct Slot {
	gen: u32,
	node: Option<Node>,
}

/// A forest of fork headers with O(1) lookup by hash.
pub struct HeaderTree {
	slots: Vec<Slot>,
	free: Vec<u32>,
	index: ShortHashMap<Hash, NodeId>,
	next_seq: u64,
}

impl HeaderTree {
	/// An empty forest.
	pub fn new() -> HeaderTree {
		HeaderTree {
			slots: vec![],
			free: vec![],
			index: ShortHashMap::default(),
			next_seq: 0,
		}
	}

	/// Number of live nodes.
	pub fn len(&self) -> usize {
		self.index.len()
	}

	/// Whether the forest holds no nodes.
	pub fn is_empty(&self) -> bool {
		self.index.is_empty()
	}

	/// Inserts a node. A `parent` of None means the node roots its branch
	/// and its parent is (or was) a main-chain header.
	pub fn insert(
		&mut self,
		parent: Option<NodeId>,
		ctx: HeaderContext,
		root_height: i32,
	) -> NodeId {
		let hash = ctx.hash;
		let node = Node {
			parent,
			ctx,
			root_height,
			seq: self.next_seq,
		};
		self.next_seq += 1;
		let id = match self.free.pop() {
			Some(idx) => {
				let slot = &mut self.slots[idx as usize];
				slot.node = Some(node);
				NodeId {
					idx,
					gen: slot.gen,
				}
			}
			None => {
				self.slots.push(Slot {
					gen: 0,
					node: Some(node),
				});
				NodeId {
					idx: (self.slots.len() - 1) as u32,
					gen: 0,
				}
			}
		};
		self.index.insert(hash, id);
		id
	}

	/// Erases a single node. Children keep their handle to it; the handle
	/// simply stops resolving.
	pub fn erase(&mut self, id: NodeId) {
		if let Some(node) = self.slot_node(id) {
			let hash = node.ctx.hash;
			self.index.remove(&hash);
			let slot = &mut self.slots[id.idx as usize];
			slot.node = None;
			slot.gen = slot.gen.wrapping_add(1);
			self.free.push(id.idx);
		}
	}

	fn slot_node(&self, id: NodeId) -> Option<&Node> {
		let slot = self.slots.get(id.idx as usize)?;
		if slot.gen != id.gen {
			return None;
		}
		slot.node.as_ref()
	}

	/// Finds a node by header hash.
	pub fn find(&self, hash: &Hash) -> Option<NodeId> {
		self.index.get(hash).cloned()
	}

	/// The context stored at a node.
	pub fn context(&self, id: NodeId) -> Option<&HeaderContext> {
		self.slot_node(id).map(|n| &n.ctx)
	}

	/// The parent handle, if the parent is still live.
	pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
		let parent = self.slot_node(id)?.parent?;
		// lazily nulled: an erased parent is simply gone
		self.slot_node(parent)?;
		Some(parent)
	}

	/// The recorded root height of the branch a node belongs to.
	pub fn root_height(&self, id: NodeId) -> Option<i32> {
		self.slot_node(id).map(|n| n.root_height)
	}

	/// All live node handles, newest insertion first.
	pub fn ids_latest_first(&self) -> Vec<NodeId> {
		let mut ids: Vec<(u64, NodeId)> = self
			.slots
			.iter()
			.enumerate()
			.filter_map(|(idx, slot)| {
				slot.node.as_ref().map(|n| {
					(
						n.seq,
						NodeId {
							idx: idx as u32,
							gen: slot.gen,
						},
					)
				})
			})
			.collect();
		ids.sort_by(|a, b| b.0.cmp(&a.0));
		ids.into_iter().map(|(_, id)| id).collect()
	}

	/// Smallest recorded root height among live nodes.
	pub fn min_root_height(&self) -> Option<i32> {
		self.slots
			.iter()
			.filter_map(|slot| slot.node.as_ref())
			.map(|n| n.root_height)
			.min()
	}
}
