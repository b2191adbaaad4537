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

//! The block synchronization worker. One get-data request is in flight
//! at a time, aimed at the first chain height whose validation status is
//! still unvalidated; received blocks pass through a byte-bounded queue
//! to a background validator that runs the structural and contextual
//! rulesets and records progress in the status sidecar.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::util::{Mutex, Timeout, WorkQueue};

use crate::chain::{
	BlockValidationStatus, ChainView, Locator, Position, StatusSidecar, Timechain,
};
use crate::core::core::block::Block;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::rules::{validate_block_context, validate_block_structure};

use crate::common::hooks::{Notification, NotificationSink, Value};
use crate::common::types::{OnComplete, PeerTag, SyncConfig, SyncPeer};

struct BlockItem {
	peer: PeerTag,
	height: i32,
	block: Block,
	bytes: usize,
}

/// The single in-flight block request.
#[derive(Clone, Copy, Debug)]
struct BlockRequest {
	height: i32,
	hash: Hash,
}

struct Shared {
	chain: Arc<Timechain>,
	status: Arc<StatusSidecar>,
	queue: WorkQueue<BlockItem>,
	queued_bytes: AtomicUsize,
	request: Mutex<Option<BlockRequest>>,
	last_requested: Mutex<Option<BlockRequest>>,
	peers: Mutex<HashMap<PeerTag, Arc<dyn SyncPeer>>>,
	on_complete: Mutex<Option<OnComplete>>,
	sink: Arc<dyn NotificationSink>,
	config: SyncConfig,
}

/// The block-sync pipeline.
pub struct BlockSyncer {
	shared: Arc<Shared>,
	worker: Option<thread::JoinHandle<()>>,
}

impl BlockSyncer {
	/// Builds the syncer and starts its validator thread.
	pub fn new(
		chain: Arc<Timechain>,
		status: Arc<StatusSidecar>,
		sink: Arc<dyn NotificationSink>,
		config: SyncConfig,
	) -> BlockSyncer {
		let shared = Arc::new(Shared {
			chain,
			status,
			queue: WorkQueue::new(),
			queued_bytes: AtomicUsize::new(0),
			request: Mutex::new(None),
			last_requested: Mutex::new(None),
			peers: Mutex::new(HashMap::new()),
			on_complete: Mutex::new(None),
			sink,
			config,
		});

		let worker_shared = shared.clone();
		let worker = thread::Builder::new()
			.name("block-sync".to_string())
			.spawn(move || {
				while let Some(item) = worker_shared.queue.wait_pop(Timeout::infinite()) {
					worker_shared
						.queued_bytes
						.fetch_sub(item.bytes, Ordering::SeqCst);
					process_item(&worker_shared, item);
				}
			})
			.expect("spawn block-sync worker");

		BlockSyncer {
			shared,
			worker: Some(worker),
		}
	}

	/// Makes a peer known to the syncer.
	pub fn register_peer(&self, peer: Arc<dyn SyncPeer>) {
		self.shared.peers.lock().insert(peer.tag(), peer);
	}

	/// Installs the handler invoked when every chain block is validated.
	pub fn set_on_complete(&self, handler: OnComplete) {
		*self.shared.on_complete.lock() = Some(handler);
	}

	/// Issues the next block request to the given peer, unless one is
	/// already pending or nothing remains to validate.
	pub fn request_next(&self, peer_tag: PeerTag) {
		request_next(&self.shared, peer_tag);
	}

	/// Ingests a block delivered by a peer. The block must answer the
	/// pending request hash exactly; anything else is a peer violation.
	pub fn block_received(&self, peer_tag: PeerTag, block: Block) {
		let pending = *self.shared.request.lock();
		let request = match pending {
			Some(request) => request,
			None => {
				peer_error(&self.shared, peer_tag, "unsolicited block");
				return;
			}
		};
		let hash = block.header.hash();
		if hash != request.hash {
			peer_error(&self.shared, peer_tag, "block answers the wrong hash");
			*self.shared.request.lock() = None;
			*self.shared.last_requested.lock() = None;
			return;
		}

		let bytes = block.total_size();
		let queued = self.shared.queued_bytes.load(Ordering::SeqCst);
		if queued + bytes > self.shared.config.block_queue_bytes {
			// over budget: drop and let the height be requested again
			debug!(
				"block queue full ({} + {} bytes), deferring height {}",
				queued, bytes, request.height
			);
			*self.shared.request.lock() = None;
			*self.shared.last_requested.lock() = None;
			return;
		}

		self.shared.queued_bytes.fetch_add(bytes, Ordering::SeqCst);
		self.shared.queue.push(BlockItem {
			peer: peer_tag,
			height: request.height,
			block,
			bytes,
		});
		*self.shared.request.lock() = None;
		// opportunistically keep the pipe full
		request_next(&self.shared, peer_tag);
	}

	/// Bytes waiting in the validation queue.
	pub fn queued_bytes(&self) -> usize {
		self.shared.queued_bytes.load(Ordering::SeqCst)
	}

	/// Stops the pipeline; the validator exits at its next wait.
	pub fn stop(&self) {
		self.shared.queue.stop();
	}
}

impl Drop for BlockSyncer {
	fn drop(&mut self) {
		self.shared.queue.stop();
		if let Some(handle) = self.worker.take() {
			let _ = handle.join();
		}
	}
}

/// First chain height at or above 1 still reported unvalidated. Resumes
/// from the last request while its block is still on the heaviest chain.
fn next_unvalidated(shared: &Shared) -> Option<i32> {
	let start = match *shared.last_requested.lock() {
		Some(last) if shared.chain.hash_at(last.height) == Some(last.hash) => last.height + 1,
		_ => 1,
	};
	let tip = shared.chain.chain_len() - 1;
	for height in start..=tip {
		match shared.status.get(Locator::Height(height)) {
			Some(BlockValidationStatus::Unvalidated) => return Some(height),
			_ => continue,
		}
	}
	None
}

fn request_next(shared: &Arc<Shared>, peer_tag: PeerTag) {
	let mut request = shared.request.lock();
	if request.is_some() {
		return;
	}
	let height = match next_unvalidated(shared) {
		Some(height) => height,
		None => {
			drop(request);
			signal_complete(shared, peer_tag);
			return;
		}
	};
	let hash = match shared.chain.hash_at(height) {
		Some(hash) => hash,
		None => return,
	};
	let next = BlockRequest { height, hash };
	*request = Some(next);
	*shared.last_requested.lock() = Some(next);
	drop(request);

	if let Some(peer) = shared.peers.lock().get(&peer_tag).cloned() {
		debug!("requesting block {} at {} from peer {}", hash, height, peer_tag);
		peer.request_block(hash);
	}
}

fn signal_complete(shared: &Arc<Shared>, peer_tag: PeerTag) {
	shared.sink.emit(Notification::event(
		"sync/blocks",
		vec![(
			"done_height".to_string(),
			Value::Int(i64::from(shared.chain.chain_len() - 1)),
		)],
	));
	if let Some(handler) = shared.on_complete.lock().as_ref() {
		handler(peer_tag);
	}
}

fn peer_error(shared: &Arc<Shared>, peer_tag: PeerTag, reason: &str) {
	warn!("block sync: peer {} error: {}", peer_tag, reason);
	if let Some(peer) = shared.peers.lock().remove(&peer_tag) {
		peer.on_error(reason);
	}
	let queued_bytes = &shared.queued_bytes;
	shared.queue.erase_if(|item| {
		if item.peer == peer_tag {
			queued_bytes.fetch_sub(item.bytes, Ordering::SeqCst);
			true
		} else {
			false
		}
	});
}

/// Validates one queued block and records the outcome.
fn process_item(shared: &Arc<Shared>, item: BlockItem) {
	let height = item.height;
	let hash = item.block.header.hash();

	let structural = validate_block_structure(&item.block, height);
	let contextual = structural.and_then(|_| {
		let view = ChainView::new(
			shared.chain.clone(),
			Position::Chain(height - 1),
			height - 1,
		);
		validate_block_context(&item.block, height, &view)
	});

	match contextual {
		Ok(()) => {
			let locator = if shared.chain.hash_at(height) == Some(hash) {
				Locator::Height(height)
			} else {
				Locator::Fork(hash)
			};
			shared
				.status
				.set(locator, BlockValidationStatus::StructureValid);
			shared.sink.emit(Notification::update(
				"sync/blocks",
				vec![("height".to_string(), Value::Int(i64::from(height)))],
			));
			if next_unvalidated(shared).is_none() {
				signal_complete(shared, item.peer);
			}
		}
		Err(kind) => {
			peer_error(shared, item.peer, &format!("{}", kind));
			*shared.request.lock() = None;
			*shared.last_requested.lock() = None;
		}
	}
}
