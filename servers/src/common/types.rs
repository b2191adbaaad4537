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

//! Shared sync types and the abstract peer surface the workers drive.

use crate::core::core::hash::Hash;
use crate::core::core::header::BlockHeader;

/// Opaque identity of a connected peer, assigned by the caller.
pub type PeerTag = u64;

/// Sync tuning knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
	/// Largest headers batch a peer may deliver; a shorter batch signals
	/// the end of that peer's chain
	pub max_headers_per_batch: usize,
	/// Byte budget of the pending-block queue
	pub block_queue_bytes: usize,
}

impl Default for SyncConfig {
	fn default() -> SyncConfig {
		SyncConfig {
			max_headers_per_batch: 2_000,
			block_queue_bytes: 8 * 1024 * 1024,
		}
	}
}

/// The outbound surface of a peer, as seen by the sync workers. Wire
/// framing and sockets live with the implementation.
pub trait SyncPeer: Send + Sync {
	/// The peer's identity tag.
	fn tag(&self) -> PeerTag;

	/// Asks the peer for headers following the locator hash.
	fn request_headers(&self, locator: Hash);

	/// Asks the peer for the block with the given hash.
	fn request_block(&self, hash: Hash);

	/// Reports a protocol violation. The implementation is expected to
	/// disconnect the peer.
	fn on_error(&self, reason: &str);
}

/// A batch of headers as delivered by one peer, in chain order.
pub struct HeaderBatch {
	/// The delivering peer
	pub peer: PeerTag,
	/// The headers, oldest first
	pub headers: Vec<BlockHeader>,
}

/// Callback invoked when a peer signals the end of its header chain.
pub type OnComplete = Box<dyn Fn(PeerTag) + Send + Sync>;
