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

//! Base types that the timechain and its consumers share.

use crate::core::core::hash::Hash;
use crate::core::core::target::Work;

use crate::tree::NodeId;

/// The tip of the heaviest chain: its height, the hash of its last header
/// and the work accumulated from genesis.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tip {
	/// Height of the tip
	pub height: i32,
	/// Hash of the last header
	pub hash: Hash,
	/// Total work accumulated on the chain
	pub total_work: Work,
}

/// Where a header sits: in the main chain at a height, or in the fork
/// forest under a stable node handle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Position {
	/// In the main chain at this height
	Chain(i32),
	/// In the fork forest
	Tree(NodeId),
}

/// Address of a piece of per-header metadata: a height in the main chain
/// or a header hash on a fork.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Locator {
	/// Main-chain position
	Height(i32),
	/// Fork position, by header hash
	Fork(Hash),
}

/// How far a block at some chain position has been validated.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BlockValidationStatus {
	/// Nothing beyond the header has been checked
	Unvalidated,
	/// Trusted without validation (checkpointed history)
	AssumedValid,
	/// Structural and contextual block rules passed
	StructureValid,
	/// Fully validated including spends
	Validated,
}

/// Notification delivered to every registered sidecar on each timechain
/// mutation, while the chain lock is held exclusively.
#[derive(Clone, Debug)]
pub struct AddSync {
	/// Parent of the inserted header
	pub parent_hash: Hash,
	/// Hash of the inserted header
	pub hash: Hash,
	/// Height of the inserted header
	pub height: i32,
	/// Whether the insert ended up on the main chain
	pub in_chain: bool,
	/// Height of the last common header when a reorg happened
	pub fork_height: i32,
	/// Hashes displaced from the chain by a reorg, ordered by height
	pub moved_from_chain: Vec<Hash>,
	/// Hashes of the branch promoted into the chain, root to tip
	pub promoted: Vec<Hash>,
}

impl AddSync {
	/// Whether this notification reflects a reorg.
	pub fn is_reorg(&self) -> bool {
		!self.moved_from_chain.is_empty() || self.promoted.len() > 1
	}
}
