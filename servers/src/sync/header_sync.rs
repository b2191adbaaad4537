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

//! The header synchronization worker. Peer batches land on a shared
//! queue; one background thread validates them in arrival order and
//! feeds the timechain. Outgoing header requests are paced by a single
//! gate: cleared on start and after every full batch, consumed by the
//! one request that wins it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::Utc;

use crate::util::{Mutex, Timeout, WorkQueue};

use crate::chain::{ChainView, Timechain};
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::header::BlockHeader;
use crate::core::rules::{validate_header, HeaderArgs};

use crate::common::hooks::{Notification, NotificationSink, Value};
use crate::common::types::{HeaderBatch, OnComplete, PeerTag, SyncConfig, SyncPeer};

type PeerMap = Mutex<HashMap<PeerTag, Arc<dyn SyncPeer>>>;

/// The header-sync pipeline: batch intake, request pacing and the
/// background validator.
pub struct HeaderSyncer {
	chain: Arc<Timechain>,
	queue: Arc<WorkQueue<HeaderBatch>>,
	send_blocked: AtomicBool,
	peers: Arc<PeerMap>,
	on_complete: Arc<Mutex<Option<OnComplete>>>,
	config: SyncConfig,
	worker: Option<thread::JoinHandle<()>>,
}

impl HeaderSyncer {
	/// Builds the syncer and starts its validator thread.
	pub fn new(
		chain: Arc<Timechain>,
		sink: Arc<dyn NotificationSink>,
		config: SyncConfig,
	) -> HeaderSyncer {
		let queue = Arc::new(WorkQueue::new());
		let peers: Arc<PeerMap> = Arc::new(Mutex::new(HashMap::new()));

		let worker_chain = chain.clone();
		let worker_queue = queue.clone();
		let worker_peers = peers.clone();
		let worker = thread::Builder::new()
			.name("header-sync".to_string())
			.spawn(move || {
				while let Some(batch) = worker_queue.wait_pop(Timeout::infinite()) {
					validate_batch(
						&worker_chain,
						&worker_queue,
						&worker_peers,
						sink.as_ref(),
						batch,
					);
				}
			})
			.expect("spawn header-sync worker");

		HeaderSyncer {
			chain,
			queue,
			send_blocked: AtomicBool::new(true),
			peers,
			on_complete: Arc::new(Mutex::new(None)),
			config,
			worker: Some(worker),
		}
	}

	/// Makes a peer known to the syncer so errors can reach it.
	pub fn register_peer(&self, peer: Arc<dyn SyncPeer>) {
		self.peers.lock().insert(peer.tag(), peer);
	}

	/// Installs the handler invoked when a peer signals end-of-chain.
	pub fn set_on_complete(&self, handler: OnComplete) {
		*self.on_complete.lock() = Some(handler);
	}

	/// Begins syncing against a peer: opens the request gate and emits
	/// one get-headers from the current tip.
	pub fn start_sync(&self, peer_tag: PeerTag) {
		self.send_blocked.store(false, Ordering::SeqCst);
		if let Some(locator) = self.chain.tip().map(|tip| tip.hash) {
			self.try_request(peer_tag, locator);
		}
	}

	/// Attempts one header request; suppressed while another is pending.
	fn try_request(&self, peer_tag: PeerTag, locator: Hash) {
		if self.send_blocked.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(peer) = self.peers.lock().get(&peer_tag).cloned() {
			debug!("requesting headers after {} from peer {}", locator, peer_tag);
			peer.request_headers(locator);
		}
	}

	/// Ingests one headers batch from a peer. A full batch re-opens the
	/// request gate and chains the next request off the batch's last
	/// header; a short one signals that peer's chain is exhausted.
	pub fn headers_received(&self, peer_tag: PeerTag, headers: Vec<BlockHeader>) {
		if headers.is_empty() {
			self.complete(peer_tag);
			return;
		}
		let full = headers.len() >= self.config.max_headers_per_batch;
		let last_hash = headers.last().map(|h| h.hash());
		self.queue.push(HeaderBatch {
			peer: peer_tag,
			headers,
		});
		if full {
			self.send_blocked.store(false, Ordering::SeqCst);
			if let Some(locator) = last_hash {
				self.try_request(peer_tag, locator);
			}
		} else {
			self.complete(peer_tag);
		}
	}

	fn complete(&self, peer_tag: PeerTag) {
		if let Some(handler) = self.on_complete.lock().as_ref() {
			handler(peer_tag);
		}
	}

	/// Number of batches waiting for the validator.
	pub fn pending_batches(&self) -> usize {
		self.queue.len()
	}

	/// Stops the pipeline; the validator exits at its next wait.
	pub fn stop(&self) {
		self.queue.stop();
	}
}

impl Drop for HeaderSyncer {
	fn drop(&mut self) {
		self.queue.stop();
		if let Some(handle) = self.worker.take() {
			let _ = handle.join();
		}
	}
}

/// Reports a peer violation and purges the peer's remaining batches.
fn peer_error(
	queue: &WorkQueue<HeaderBatch>,
	peers: &PeerMap,
	peer_tag: PeerTag,
	reason: &str,
) {
	warn!("header sync: peer {} error: {}", peer_tag, reason);
	if let Some(peer) = peers.lock().remove(&peer_tag) {
		peer.on_error(reason);
	}
	queue.erase_if(|batch| batch.peer == peer_tag);
}

/// Validates one batch sequentially against the timechain, advancing a
/// pinned view one header at a time. The first bad header aborts the
/// whole batch.
fn validate_batch(
	chain: &Arc<Timechain>,
	queue: &WorkQueue<HeaderBatch>,
	peers: &PeerMap,
	sink: &dyn NotificationSink,
	batch: HeaderBatch,
) {
	let first = match batch.headers.first() {
		Some(header) => header,
		None => return,
	};
	let parent_pos = match chain.find_or_chain(&first.prev_hash) {
		Some(position) => position,
		None => {
			peer_error(queue, peers, batch.peer, "batch parent unknown");
			return;
		}
	};
	let mut parent = match chain.context_of(parent_pos) {
		Some(ctx) => ctx,
		None => {
			peer_error(queue, peers, batch.peer, "batch parent vanished");
			return;
		}
	};
	let mut view = ChainView::new(chain.clone(), parent_pos, parent.height);
	let now = Utc::now().timestamp() as u32;

	for header in &batch.headers {
		let args = HeaderArgs {
			header,
			parent: &parent,
			view: &view,
			now,
		};
		if let Err(kind) = validate_header(&args) {
			peer_error(queue, peers, batch.peer, &format!("{}", kind));
			return;
		}
		let ctx = parent.extend(*header);
		match chain.add_with_hint(ctx.clone(), view.pinned()) {
			Ok(position) => {
				view.advance(position, ctx.height);
				parent = ctx;
			}
			Err(e) => {
				peer_error(queue, peers, batch.peer, &format!("{}", e));
				return;
			}
		}
	}

	sink.emit(Notification::update(
		"sync/headers",
		vec![
			("height".to_string(), Value::Int(i64::from(parent.height))),
			("peer".to_string(), Value::Int(batch.peer as i64)),
		],
	));
}
