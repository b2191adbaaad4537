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

//! Facade over the header timechain. One writer-preferring lock protects
//! the chain, the fork forest and the registered sidecars together, so no
//! reader ever observes a half-applied reorg.

use std::sync::Arc;

use crate::util::RwLock;

use crate::core::core::hash::Hash;
use crate::core::core::header::{BlockHeader, HeaderContext};
use crate::core::core::target::Work;

use crate::error::{Error, ErrorKind};
use crate::headers::HeaderChain;
use crate::sidecar::SidecarSync;
use crate::tree::{HeaderTree, NodeId};
use crate::types::{AddSync, Position, Tip};

/// Tuning knobs for the timechain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimechainConfig {
	/// Depth below the tip beyond which competing branches are pruned
	pub max_keep_depth: i32,
	/// Upper bound on any single ancestor walk; exceeding it means a
	/// corrupt forest
	pub max_search_depth: i32,
}

impl Default for TimechainConfig {
	fn default() -> TimechainConfig {
		TimechainConfig {
			max_keep_depth: 1_000,
			max_search_depth: 20_000,
		}
	}
}

struct Inner {
	chain: HeaderChain,
	tree: HeaderTree,
	min_root_height: i32,
	sidecars: Vec<Arc<dyn SidecarSync>>,
}

/// The reorg-aware header timechain.
pub struct Timechain {
	inner: RwLock<Inner>,
	config: TimechainConfig,
}

impl Timechain {
	/// An empty timechain. The first add must be a height-zero context.
	pub fn new(config: TimechainConfig) -> Timechain {
		Timechain {
			inner: RwLock::new(Inner {
				chain: HeaderChain::new(),
				tree: HeaderTree::new(),
				min_root_height: i32::max_value(),
				sidecars: vec![],
			}),
			config,
		}
	}

	/// A timechain seeded with the given genesis header.
	pub fn with_genesis(genesis: BlockHeader, config: TimechainConfig) -> Timechain {
		let chain = Timechain::new(config);
		chain
			.add(HeaderContext::genesis(genesis))
			.expect("genesis add cannot fail");
		chain
	}

	/// Registers a sidecar. It is brought up to the current chain length
	/// and receives every mutation from here on.
	pub fn register_sidecar(&self, sidecar: Arc<dyn SidecarSync>) {
		let mut inner = self.inner.write();
		sidecar.sync_to(inner.chain.len());
		inner.sidecars.push(sidecar);
	}

	/// Number of headers on the main chain.
	pub fn chain_len(&self) -> i32 {
		self.inner.read().chain.len()
	}

	/// The current tip of the heaviest chain.
	pub fn tip(&self) -> Option<Tip> {
		let inner = self.inner.read();
		inner.chain.tip_context().map(|ctx| Tip {
			height: ctx.height,
			hash: ctx.hash,
			total_work: ctx.total_work,
		})
	}

	/// Position and context of the heaviest tip.
	pub fn heaviest_tip(&self) -> Option<(Position, HeaderContext)> {
		let inner = self.inner.read();
		inner
			.chain
			.tip_context()
			.map(|ctx| (Position::Chain(ctx.height), ctx))
	}

	/// Number of live fork nodes.
	pub fn tree_len(&self) -> usize {
		self.inner.read().tree.len()
	}

	/// O(1) lookup in the fork forest. Does not inspect the main chain.
	pub fn find(&self, hash: &Hash) -> Option<NodeId> {
		self.inner.read().tree.find(hash)
	}

	/// Finds a header wherever it lives, forest first then main chain.
	pub fn find_or_chain(&self, hash: &Hash) -> Option<Position> {
		let inner = self.inner.read();
		if let Some(id) = inner.tree.find(hash) {
			return Some(Position::Tree(id));
		}
		inner.chain.height_of(hash).map(Position::Chain)
	}

	/// Context of a header at a known position.
	pub fn context_of(&self, position: Position) -> Option<HeaderContext> {
		let inner = self.inner.read();
		match position {
			Position::Chain(h) => inner.chain.context_at(h),
			Position::Tree(id) => inner.tree.context(id).cloned(),
		}
	}

	/// Recorded hash of the main-chain header at the given height.
	pub fn hash_at(&self, height: i32) -> Option<Hash> {
		self.inner.read().chain.hash_at(height)
	}

	/// Main-chain header at the given height.
	pub fn header_at(&self, height: i32) -> Option<BlockHeader> {
		self.inner.read().chain.header_at(height).cloned()
	}

	/// Inserts a freshly validated header context.
	///
	/// Extends the main chain when the parent is the tip; otherwise the
	/// header joins the fork forest, triggering a reorg if its branch now
	/// carries strictly more work than the chain. Re-adding a known
	/// header returns its current position.
	pub fn add(&self, ctx: HeaderContext) -> Result<Position, Error> {
		let mut inner = self.inner.write();
		self.add_locked(&mut inner, ctx)
	}

	/// As `add`, with a position hint for the parent. The hint is only
	/// trusted if it still resolves to the claimed parent.
	pub fn add_with_hint(&self, ctx: HeaderContext, hint: Position) -> Result<Position, Error> {
		let mut inner = self.inner.write();
		let hint_ok = match hint {
			Position::Chain(h) => inner.chain.hash_at(h) == Some(ctx.header.prev_hash),
			Position::Tree(id) => {
				inner.tree.context(id).map(|c| c.hash) == Some(ctx.header.prev_hash)
			}
		};
		if !hint_ok {
			return self.add_locked(&mut inner, ctx);
		}
		self.insert_at_parent(&mut inner, ctx, hint)
	}

	fn add_locked(&self, inner: &mut Inner, ctx: HeaderContext) -> Result<Position, Error> {
		// duplicate adds are idempotent
		if let Some(id) = inner.tree.find(&ctx.hash) {
			return Ok(Position::Tree(id));
		}
		if let Some(h) = inner.chain.height_of(&ctx.hash) {
			return Ok(Position::Chain(h));
		}

		if inner.chain.is_empty() {
			if ctx.height != 0 {
				return Err(ErrorKind::ParentNotFound.into());
			}
			inner.chain.push(&ctx);
			let ev = AddSync {
				parent_hash: ctx.header.prev_hash,
				hash: ctx.hash,
				height: 0,
				in_chain: true,
				fork_height: -1,
				moved_from_chain: vec![],
				promoted: vec![],
			};
			notify_sidecars(inner, &ev);
			return Ok(Position::Chain(0));
		}

		let parent_hash = ctx.header.prev_hash;
		let parent = if let Some(id) = inner.tree.find(&parent_hash) {
			Position::Tree(id)
		} else if let Some(h) = inner.chain.height_of(&parent_hash) {
			Position::Chain(h)
		} else {
			return Err(ErrorKind::ParentNotFound.into());
		};
		self.insert_at_parent(inner, ctx, parent)
	}

	fn insert_at_parent(
		&self,
		inner: &mut Inner,
		ctx: HeaderContext,
		parent: Position,
	) -> Result<Position, Error> {
		// duplicate adds are idempotent on this path too
		if let Some(id) = inner.tree.find(&ctx.hash) {
			return Ok(Position::Tree(id));
		}
		if let Some(h) = inner.chain.height_of(&ctx.hash) {
			return Ok(Position::Chain(h));
		}
		let result = match parent {
			Position::Chain(h) if h == inner.chain.height() => {
				// plain extension of the heaviest chain
				inner.chain.push(&ctx);
				let ev = AddSync {
					parent_hash: ctx.header.prev_hash,
					hash: ctx.hash,
					height: ctx.height,
					in_chain: true,
					fork_height: ctx.height - 1,
					moved_from_chain: vec![],
					promoted: vec![],
				};
				notify_sidecars(inner, &ev);
				Ok(Position::Chain(ctx.height))
			}
			Position::Chain(_) => {
				// roots a new branch off the chain
				let root_height = ctx.height;
				let id = inner.tree.insert(None, ctx.clone(), root_height);
				inner.min_root_height = inner.min_root_height.min(root_height);
				self.settle(inner, id, &ctx)
			}
			Position::Tree(parent_id) => {
				let root_height = inner
					.tree
					.root_height(parent_id)
					.ok_or_else(|| ErrorKind::ParentNotFound)?;
				let id = inner.tree.insert(Some(parent_id), ctx.clone(), root_height);
				self.settle(inner, id, &ctx)
			}
		};
		self.prune(inner);
		result
	}

	/// Decides whether a freshly inserted tree node displaces the chain
	/// tip, and notifies sidecars either way.
	fn settle(
		&self,
		inner: &mut Inner,
		id: NodeId,
		ctx: &HeaderContext,
	) -> Result<Position, Error> {
		if ctx.total_work > inner.chain.total_work() {
			let ev = self.reorg(inner, id);
			notify_sidecars(inner, &ev);
			debug!(
				"reorg to {} at {} (fork at {}, {} displaced)",
				ev.hash,
				ev.height,
				ev.fork_height,
				ev.moved_from_chain.len()
			);
			Ok(Position::Chain(ctx.height))
		} else {
			let root_height = inner.tree.root_height(id).unwrap_or(ctx.height);
			let ev = AddSync {
				parent_hash: ctx.header.prev_hash,
				hash: ctx.hash,
				height: ctx.height,
				in_chain: false,
				fork_height: root_height - 1,
				moved_from_chain: vec![],
				promoted: vec![],
			};
			notify_sidecars(inner, &ev);
			Ok(Position::Tree(id))
		}
	}

	/// Swaps the branch ending at `new_tip` into the main chain.
	///
	/// Walks up to the branch root, moves the displaced chain tail into
	/// the forest under its recorded hashes, promotes the branch and
	/// erases it from the forest. A branch root whose parent is missing
	/// from the chain is an invariant violation, not an input error.
	fn reorg(&self, inner: &mut Inner, new_tip: NodeId) -> AddSync {
		// 1. collect the branch, tip to root
		let mut branch = vec![new_tip];
		let mut cur = new_tip;
		while let Some(parent) = inner.tree.parent_of(cur) {
			branch.push(parent);
			cur = parent;
			assert!(
				branch.len() <= self.config.max_search_depth as usize,
				"reorg walk exceeded search depth"
			);
		}
		let root_ctx = inner
			.tree
			.context(*branch.last().unwrap())
			.expect("reorg: branch root vanished")
			.clone();
		let fork_height = root_ctx.height - 1;
		match inner.chain.height_of(&root_ctx.header.prev_hash) {
			Some(h) if h == fork_height => {}
			_ => panic!(
				"reorg: no common ancestor on the chain for branch root {}",
				root_ctx.hash
			),
		}

		// 2. + 3. move the displaced tail into the forest, preserving the
		// recorded hashes, then truncate
		let displaced = inner.chain.truncate(fork_height + 1);
		let moved_from_chain: Vec<Hash> = displaced.iter().map(|e| e.hash).collect();
		let displaced_root_height = fork_height + 1;
		let mut parent_id: Option<NodeId> = None;
		let mut parent_total = inner.chain.total_work();
		for (i, entry) in displaced.into_iter().enumerate() {
			let local_work = Work::from_compact(entry.header.bits);
			let total_work = parent_total + local_work;
			let node_ctx = HeaderContext {
				header: entry.header,
				hash: entry.hash,
				height: displaced_root_height + i as i32,
				local_work,
				total_work,
			};
			parent_id = Some(inner.tree.insert(parent_id, node_ctx, displaced_root_height));
			parent_total = total_work;
		}
		if !moved_from_chain.is_empty() {
			inner.min_root_height = inner.min_root_height.min(displaced_root_height);
		}

		// 4. promote the branch, root to tip
		let mut promoted = vec![];
		let new_tip_ctx = inner
			.tree
			.context(new_tip)
			.expect("reorg: new tip vanished")
			.clone();
		for id in branch.iter().rev() {
			let ctx = inner
				.tree
				.context(*id)
				.expect("reorg: branch node vanished")
				.clone();
			inner.chain.push(&ctx);
			promoted.push(ctx.hash);
		}

		// 5. the promoted branch leaves the forest
		for id in &branch {
			inner.tree.erase(*id);
		}
		inner.min_root_height = inner.tree.min_root_height().unwrap_or(i32::max_value());

		AddSync {
			parent_hash: new_tip_ctx.header.prev_hash,
			hash: new_tip_ctx.hash,
			height: new_tip_ctx.height,
			in_chain: true,
			fork_height,
			moved_from_chain,
			promoted,
		}
	}

	/// Erases branches that have fallen too far behind the tip.
	fn prune(&self, inner: &mut Inner) {
		let threshold = inner.chain.height() - self.config.max_keep_depth;
		if inner.min_root_height > threshold {
			return;
		}
		for id in inner.tree.ids_latest_first() {
			if let Some(root_height) = inner.tree.root_height(id) {
				if root_height < threshold {
					inner.tree.erase(id);
				}
			}
		}
		inner.min_root_height = inner.tree.min_root_height().unwrap_or(i32::max_value());
	}

	/// The header at `height` on the path from `from` back to genesis:
	/// walks tree edges until the walk reaches the chain, then indexes
	/// directly.
	pub fn ancestor_at_height(
		&self,
		from: Position,
		height: i32,
	) -> Result<HeaderContext, Error> {
		let inner = self.inner.read();
		if height < 0 {
			return Err(ErrorKind::OutOfRange(format!("height {}", height)).into());
		}
		match from {
			Position::Chain(h) => {
				if height > h {
					return Err(ErrorKind::OutOfRange(format!(
						"ancestor {} above tip {}",
						height, h
					))
					.into());
				}
				inner
					.chain
					.context_at(height)
					.ok_or_else(|| ErrorKind::OutOfRange(format!("height {}", height)).into())
			}
			Position::Tree(id) => {
				let mut cur = id;
				let mut steps = 0;
				loop {
					let ctx = inner.tree.context(cur).ok_or_else(|| {
						Error::from(ErrorKind::OutOfRange("stale tree handle".to_string()))
					})?;
					if ctx.height == height {
						return Ok(ctx.clone());
					}
					if ctx.height < height {
						return Err(ErrorKind::OutOfRange(format!(
							"ancestor {} above node {}",
							height, ctx.height
						))
						.into());
					}
					steps += 1;
					if steps > self.config.max_search_depth {
						return Err(ErrorKind::Other("ancestor walk too deep".to_string()).into());
					}
					match inner.tree.parent_of(cur) {
						Some(parent) => cur = parent,
						None => {
							// crossed onto the chain
							let fork = inner
								.chain
								.height_of(&ctx.header.prev_hash)
								.ok_or_else(|| {
									Error::from(ErrorKind::Other(
										"branch detached from chain".to_string(),
									))
								})?;
							debug_assert!(height <= fork);
							return inner.chain.context_at(height).ok_or_else(|| {
								ErrorKind::OutOfRange(format!("height {}", height)).into()
							});
						}
					}
				}
			}
		}
	}

	/// Up to the last `n` timestamps on the path ending at `from`,
	/// ordered oldest to newest.
	pub fn last_n_timestamps(&self, from: Position, n: usize) -> Vec<u32> {
		let inner = self.inner.read();
		let mut newest_first = Vec::with_capacity(n);
		let mut chain_height = match from {
			Position::Chain(h) => Some(h),
			Position::Tree(id) => {
				let mut cur = id;
				let mut crossed = None;
				while newest_first.len() < n {
					match inner.tree.context(cur) {
						Some(ctx) => {
							newest_first.push(ctx.header.timestamp);
							match inner.tree.parent_of(cur) {
								Some(parent) => cur = parent,
								None => {
									crossed = inner.chain.height_of(&ctx.header.prev_hash);
									break;
								}
							}
						}
						None => break,
					}
				}
				crossed
			}
		};
		while newest_first.len() < n {
			match chain_height {
				Some(h) if h >= 0 => {
					if let Some(header) = inner.chain.header_at(h) {
						newest_first.push(header.timestamp);
					}
					chain_height = Some(h - 1);
				}
				_ => break,
			}
		}
		newest_first.reverse();
		newest_first
	}
}

fn notify_sidecars(inner: &Inner, ev: &AddSync) {
	for sidecar in &inner.sidecars {
		sidecar.add_sync(ev);
	}
}
