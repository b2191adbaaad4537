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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use kestrel_chain::{sidecar, BlockValidationStatus, Locator, Timechain, TimechainConfig};
use kestrel_core::core::block::Block;
use kestrel_core::core::hash::{Hash, Hashed};
use kestrel_core::core::header::{BlockHeader, HeaderContext};
use kestrel_core::core::target::CompactTarget;
use kestrel_core::core::transaction::{OutPoint, Transaction, TxInput, TxOutput, SEQUENCE_FINAL};
use kestrel_servers::{BlockSyncer, HeaderSyncer, LogSink, PeerTag, SyncConfig, SyncPeer};
use kestrel_util::Mutex;

/// Bits whose target expands to the 256-bit maximum, so test headers
/// don't need mining.
const FREE_BITS: u32 = 0x21000001;

struct MockPeer {
	tag: PeerTag,
	header_requests: Mutex<Vec<Hash>>,
	block_requests: Mutex<Vec<Hash>>,
	errors: Mutex<Vec<String>>,
}

impl MockPeer {
	fn new(tag: PeerTag) -> Arc<MockPeer> {
		Arc::new(MockPeer {
			tag,
			header_requests: Mutex::new(vec![]),
			block_requests: Mutex::new(vec![]),
			errors: Mutex::new(vec![]),
		})
	}

	fn header_request_count(&self) -> usize {
		self.header_requests.lock().len()
	}

	fn error_count(&self) -> usize {
		self.errors.lock().len()
	}
}

impl SyncPeer for MockPeer {
	fn tag(&self) -> PeerTag {
		self.tag
	}
	fn request_headers(&self, locator: Hash) {
		self.header_requests.lock().push(locator);
	}
	fn request_block(&self, hash: Hash) {
		self.block_requests.lock().push(hash);
	}
	fn on_error(&self, reason: &str) {
		self.errors.lock().push(reason.to_string());
	}
}

fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
	let deadline = Instant::now() + Duration::from_secs(5);
	while !cond() {
		assert!(Instant::now() < deadline, "timed out waiting for {}", what);
		thread::sleep(Duration::from_millis(5));
	}
}

fn test_genesis() -> BlockHeader {
	BlockHeader {
		version: 4,
		prev_hash: Hash([0; 32]),
		merkle_root: Hash([0; 32]),
		timestamp: Utc::now().timestamp() as u32 - 200_000,
		bits: CompactTarget::from_bits(FREE_BITS),
		nonce: 0,
	}
}

/// A run of headers extending the given context, ten minutes apart.
fn headers_from(parent: &HeaderContext, n: usize) -> Vec<BlockHeader> {
	let mut headers = vec![];
	let mut ctx = parent.clone();
	for i in 0..n {
		let mut header = ctx.header;
		header.prev_hash = ctx.hash;
		header.timestamp = ctx.header.timestamp + 600;
		header.nonce = 0xbeef + i as u32;
		ctx = ctx.extend(header);
		headers.push(header);
	}
	headers
}

#[test]
fn header_sync_advances_the_chain() {
	kestrel_util::init_test_logger();
	let timechain = Arc::new(Timechain::with_genesis(
		test_genesis(),
		TimechainConfig::default(),
	));
	let config = SyncConfig {
		max_headers_per_batch: 4,
		..Default::default()
	};
	let syncer = HeaderSyncer::new(timechain.clone(), Arc::new(LogSink), config);
	let peer = MockPeer::new(1);
	syncer.register_peer(peer.clone());

	let completed = Arc::new(AtomicBool::new(false));
	let complete_flag = completed.clone();
	syncer.set_on_complete(Box::new(move |_| {
		complete_flag.store(true, Ordering::SeqCst);
	}));

	// start-sync opens the gate for exactly one request
	syncer.start_sync(peer.tag());
	assert_eq!(peer.header_request_count(), 1);
	assert_eq!(
		peer.header_requests.lock()[0],
		timechain.tip().unwrap().hash
	);

	let (_, genesis) = timechain.heaviest_tip().unwrap();
	let headers = headers_from(&genesis, 6);

	// a full batch re-opens the gate, chaining off its last header
	syncer.headers_received(peer.tag(), headers[..4].to_vec());
	assert_eq!(peer.header_request_count(), 2);
	assert_eq!(peer.header_requests.lock()[1], headers[3].hash());

	// a short batch completes the peer and leaves the gate closed
	syncer.headers_received(peer.tag(), headers[4..].to_vec());
	assert_eq!(peer.header_request_count(), 2);
	assert!(completed.load(Ordering::SeqCst));

	wait_until("headers to validate", || timechain.chain_len() == 7);
	assert_eq!(timechain.tip().unwrap().hash, headers[5].hash());
	assert_eq!(peer.error_count(), 0);
}

#[test]
fn header_sync_rejects_bad_batches() {
	kestrel_util::init_test_logger();
	let timechain = Arc::new(Timechain::with_genesis(
		test_genesis(),
		TimechainConfig::default(),
	));
	let syncer = HeaderSyncer::new(
		timechain.clone(),
		Arc::new(LogSink),
		SyncConfig::default(),
	);
	let peer = MockPeer::new(7);
	syncer.register_peer(peer.clone());

	let (_, genesis) = timechain.heaviest_tip().unwrap();
	let mut headers = headers_from(&genesis, 3);
	// stale timestamp: at or below the median of its ancestors
	headers[2].timestamp = genesis.header.timestamp;

	// a second batch from the same peer queued behind the bad one
	let tail = headers_from(&genesis, 1);

	syncer.headers_received(peer.tag(), headers);
	syncer.headers_received(peer.tag(), tail);

	wait_until("the peer to be errored", || peer.error_count() > 0);
	// the first two headers landed, the bad one aborted the batch and
	// the follow-up batch was purged with the peer
	wait_until("queue to drain", || syncer.pending_batches() == 0);
	assert_eq!(timechain.chain_len(), 3);
}

#[test]
fn header_sync_rejects_unknown_parents() {
	kestrel_util::init_test_logger();
	let timechain = Arc::new(Timechain::with_genesis(
		test_genesis(),
		TimechainConfig::default(),
	));
	let syncer = HeaderSyncer::new(
		timechain.clone(),
		Arc::new(LogSink),
		SyncConfig::default(),
	);
	let peer = MockPeer::new(9);
	syncer.register_peer(peer.clone());

	let (_, genesis) = timechain.heaviest_tip().unwrap();
	let mut headers = headers_from(&genesis, 2);
	headers[0].prev_hash = Hash([0xee; 32]);

	syncer.headers_received(peer.tag(), headers);
	wait_until("the peer to be errored", || peer.error_count() > 0);
	assert_eq!(timechain.chain_len(), 1);
}

/// A block whose header is ready to append to the given context.
fn block_at(parent: &HeaderContext, height: i32) -> (Block, HeaderContext) {
	let coinbase = Transaction {
		version: 1,
		inputs: vec![TxInput {
			prevout: OutPoint::null(),
			script_sig: vec![0x01, height as u8],
			sequence: SEQUENCE_FINAL,
			witness: vec![],
		}],
		outputs: vec![TxOutput {
			value: 5_000_000_000,
			pk_script: vec![0x51],
		}],
		lock_time: 0,
	};
	let mut header = parent.header;
	header.prev_hash = parent.hash;
	header.timestamp = parent.header.timestamp + 600;
	header.merkle_root = coinbase.txid();
	let ctx = parent.extend(header);
	(
		Block {
			header,
			transactions: vec![coinbase],
		},
		ctx,
	)
}

#[test]
fn block_sync_validates_the_chain() {
	kestrel_util::init_test_logger();
	let timechain = Arc::new(Timechain::with_genesis(
		test_genesis(),
		TimechainConfig::default(),
	));
	let status = Arc::new(sidecar::status_sidecar());
	timechain.register_sidecar(status.clone());

	// three blocks committed as headers
	let (_, genesis) = timechain.heaviest_tip().unwrap();
	let mut blocks = vec![];
	let mut ctx = genesis;
	for height in 1..=3 {
		let (block, next) = block_at(&ctx, height);
		timechain.add(next.clone()).unwrap();
		blocks.push(block);
		ctx = next;
	}

	let syncer = BlockSyncer::new(
		timechain.clone(),
		status.clone(),
		Arc::new(LogSink),
		SyncConfig::default(),
	);
	let peer = MockPeer::new(2);
	syncer.register_peer(peer.clone());

	let completed = Arc::new(AtomicBool::new(false));
	let complete_flag = completed.clone();
	syncer.set_on_complete(Box::new(move |_| {
		complete_flag.store(true, Ordering::SeqCst);
	}));

	// requests walk the unvalidated heights one at a time
	syncer.request_next(peer.tag());
	{
		let requests = peer.block_requests.lock();
		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0], blocks[0].header.hash());
	}
	syncer.block_received(peer.tag(), blocks[0].clone());
	wait_until("block 1 to validate", || {
		status.get(Locator::Height(1)) == Some(BlockValidationStatus::StructureValid)
	});
	wait_until("the next request", || peer.block_requests.lock().len() == 2);

	syncer.block_received(peer.tag(), blocks[1].clone());
	wait_until("block 2 to validate", || {
		status.get(Locator::Height(2)) == Some(BlockValidationStatus::StructureValid)
	});
	wait_until("the last request", || peer.block_requests.lock().len() == 3);

	syncer.block_received(peer.tag(), blocks[2].clone());
	wait_until("completion", || completed.load(Ordering::SeqCst));
	assert_eq!(
		status.get(Locator::Height(3)),
		Some(BlockValidationStatus::StructureValid)
	);
	assert_eq!(peer.error_count(), 0);
	assert_eq!(syncer.queued_bytes(), 0);
}

#[test]
fn block_sync_rejects_wrong_answers() {
	kestrel_util::init_test_logger();
	let timechain = Arc::new(Timechain::with_genesis(
		test_genesis(),
		TimechainConfig::default(),
	));
	let status = Arc::new(sidecar::status_sidecar());
	timechain.register_sidecar(status.clone());

	let (_, genesis) = timechain.heaviest_tip().unwrap();
	let (block1, ctx1) = block_at(&genesis, 1);
	let (block2, _ctx2) = block_at(&ctx1, 2);
	timechain.add(ctx1.clone()).unwrap();

	let syncer = BlockSyncer::new(
		timechain.clone(),
		status.clone(),
		Arc::new(LogSink),
		SyncConfig::default(),
	);
	let peer = MockPeer::new(3);
	syncer.register_peer(peer.clone());

	syncer.request_next(peer.tag());
	// answer the request for block 1 with block 2
	syncer.block_received(peer.tag(), block2);
	assert_eq!(peer.error_count(), 1);
	assert_eq!(status.get(Locator::Height(1)), Some(BlockValidationStatus::Unvalidated));

	// a fresh peer can pick the request up again
	let peer2 = MockPeer::new(4);
	syncer.register_peer(peer2.clone());
	syncer.request_next(peer2.tag());
	assert_eq!(peer2.block_requests.lock()[0], block1.header.hash());
}

#[test]
fn block_sync_rejects_invalid_blocks() {
	kestrel_util::init_test_logger();
	let timechain = Arc::new(Timechain::with_genesis(
		test_genesis(),
		TimechainConfig::default(),
	));
	let status = Arc::new(sidecar::status_sidecar());
	timechain.register_sidecar(status.clone());

	let (_, genesis) = timechain.heaviest_tip().unwrap();
	let (mut block1, ctx1) = block_at(&genesis, 1);
	timechain.add(ctx1).unwrap();
	// break the merkle commitment after the header was committed
	block1.transactions[0].outputs[0].value = 1;

	let syncer = BlockSyncer::new(
		timechain.clone(),
		status.clone(),
		Arc::new(LogSink),
		SyncConfig::default(),
	);
	let peer = MockPeer::new(5);
	syncer.register_peer(peer.clone());

	syncer.request_next(peer.tag());
	// the header still matches, the merkle commitment no longer does
	syncer.block_received(peer.tag(), block1.clone());
	wait_until("the peer to be errored", || peer.error_count() > 0);
	assert_eq!(
		status.get(Locator::Height(1)),
		Some(BlockValidationStatus::Unvalidated)
	);
}
