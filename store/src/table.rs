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

//! The output record table. Block appends build one contiguous buffer of
//! `{header, pk_script}` records, reserve a byte range off an atomic
//! cursor and publish into a copy-on-write tail; a background flusher
//! commits tail blocks past the mutable window into the segment files.
//! Readers take the tail snapshot without blocking writers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use byteorder::{ByteOrder, LittleEndian};

use crate::util::{Mutex, RwLock, Timeout, WorkQueue};

use crate::core::core::block::Block;

use crate::error::{Error, ErrorKind};
use crate::segment::SegmentStore;
use crate::types::{
	OutputDetail, OutputId, OutputKV, OutputKey, OutputOp, ScriptRef, OUTPUT_FLAG_COINBASE,
	OUTPUT_RECORD_HEADER_LEN,
};

/// Tuning knobs for the output table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
	/// Number of most recent heights kept in the mutable tail; anything
	/// older is eligible for commit to the segment files
	pub mutable_window: i32,
}

impl Default for TableConfig {
	fn default() -> TableConfig {
		TableConfig { mutable_window: 8 }
	}
}

/// All output records of one block, contiguous at an assigned offset.
pub struct BlockOutputs {
	/// Height of the block
	pub height: i32,
	/// Logical offset of the first record byte
	pub start_offset: u64,
	/// The raw record bytes
	pub buf: Vec<u8>,
}

impl BlockOutputs {
	fn end_offset(&self) -> u64 {
		self.start_offset + self.buf.len() as u64
	}
}

/// Largest staging buffer one batched committed read will allocate.
const MAX_FETCH_SPAN: u64 = 4 * 1024 * 1024;

type TailSnapshot = Arc<Vec<Arc<BlockOutputs>>>;

struct Shared {
	segments: Mutex<SegmentStore>,
	tail: RwLock<TailSnapshot>,
	/// Serializes tail writers; readers only touch the snapshot
	writer: Mutex<()>,
	next_offset: AtomicU64,
	committed_len: AtomicU64,
	fatal: Mutex<Option<String>>,
	flush_queue: WorkQueue<i32>,
}

/// The output record store: committed segments plus the in-memory tail.
pub struct OutputTable {
	shared: Arc<Shared>,
	config: TableConfig,
	flusher: Option<thread::JoinHandle<()>>,
}

impl OutputTable {
	/// Opens the table over a segment directory and starts the flusher.
	pub fn open(dir: &std::path::Path, config: TableConfig) -> Result<OutputTable, Error> {
		let segments = SegmentStore::open(dir)?;
		let committed = segments.logical_len();
		let shared = Arc::new(Shared {
			segments: Mutex::new(segments),
			tail: RwLock::new(Arc::new(vec![])),
			writer: Mutex::new(()),
			next_offset: AtomicU64::new(committed),
			committed_len: AtomicU64::new(committed),
			fatal: Mutex::new(None),
			flush_queue: WorkQueue::new(),
		});

		let worker = shared.clone();
		let flusher = thread::Builder::new()
			.name("table-flusher".to_string())
			.spawn(move || {
				while let Some(before_height) = worker.flush_queue.wait_pop(Timeout::infinite())
				{
					commit(&worker, before_height);
				}
			})
			.map_err(|e| ErrorKind::Io(format!("spawn flusher: {}", e)))?;

		Ok(OutputTable {
			shared,
			config,
			flusher: Some(flusher),
		})
	}

	fn check_fatal(&self) -> Result<(), Error> {
		if let Some(msg) = self.shared.fatal.lock().clone() {
			return Err(ErrorKind::Poisoned(msg).into());
		}
		Ok(())
	}

	/// Number of blocks currently in the tail.
	pub fn tail_len(&self) -> usize {
		self.shared.tail.read().len()
	}

	/// Bytes committed to the segment files so far.
	pub fn committed_len(&self) -> u64 {
		self.shared.committed_len.load(Ordering::SeqCst)
	}

	/// Appends all outputs of a block, publishing them in the tail and
	/// pushing one Add entry per output onto `entries`. Enqueues a commit
	/// once the tail spans the mutable window.
	pub fn append_block(
		&self,
		height: i32,
		block: &Block,
		entries: &mut Vec<OutputKV>,
	) -> Result<(), Error> {
		self.check_fatal()?;

		// records in transaction-then-index order
		let mut buf = vec![];
		let mut records: Vec<(OutputKey, usize, usize)> = vec![];
		for tx in &block.transactions {
			let txid = tx.txid();
			let flags = if tx.is_coinbase() {
				OUTPUT_FLAG_COINBASE
			} else {
				0
			};
			for (index, output) in tx.outputs.iter().enumerate() {
				let rel = buf.len();
				let mut header = [0u8; OUTPUT_RECORD_HEADER_LEN];
				LittleEndian::write_i32(&mut header[0..4], height);
				LittleEndian::write_u32(&mut header[4..8], flags);
				LittleEndian::write_i64(&mut header[8..16], output.value);
				buf.extend_from_slice(&header);
				buf.extend_from_slice(&output.pk_script);
				records.push((
					OutputKey {
						txid,
						index: index as u32,
					},
					rel,
					OUTPUT_RECORD_HEADER_LEN + output.pk_script.len(),
				));
			}
		}

		// reserve the byte range without holding any table lock
		let start = self
			.shared
			.next_offset
			.fetch_add(buf.len() as u64, Ordering::SeqCst);
		for (key, rel, len) in records {
			entries.push(OutputKV {
				key,
				height,
				op: OutputOp::Add,
				rid: OutputId::encode(start + rel as u64, len),
			});
		}

		// publish in offset-sorted position
		let _writer = self.shared.writer.lock();
		let snapshot = self.shared.tail.read().clone();
		let mut tail = (*snapshot).clone();
		let pos = tail
			.binary_search_by(|b| b.start_offset.cmp(&start))
			.unwrap_err();
		tail.insert(
			pos,
			Arc::new(BlockOutputs {
				height,
				start_offset: start,
				buf,
			}),
		);
		let spans = tail.len() as i32;
		let max_height = tail.iter().map(|b| b.height).max().unwrap_or(height);
		*self.shared.tail.write() = Arc::new(tail);
		drop(_writer);

		if spans >= self.config.mutable_window {
			let before = max_height + 1 - self.config.mutable_window;
			if !self.shared.flush_queue.push(before) {
				warn!("table flusher stopped, dropping commit at {}", before);
			}
		}
		Ok(())
	}

	/// Fetches the records for a batch of ids sorted by encoded offset.
	/// Null ids are skipped, leaving an absent detail in their slot. The
	/// scripts of all fetched records share the returned buffer.
	pub fn fetch(&self, rids: &[OutputId]) -> Result<(Vec<OutputDetail>, Vec<u8>), Error> {
		self.check_fatal()?;
		debug_assert!(rids.windows(2).all(|w| w[0] <= w[1]));

		let mut details = vec![OutputDetail::absent(); rids.len()];
		let mut scripts = vec![];
		let snapshot = self.shared.tail.read().clone();
		let committed = self.shared.committed_len.load(Ordering::SeqCst);

		let mut staging = vec![];
		let mut i = 0;
		while i < rids.len() {
			let rid = rids[i];
			if !rid.is_real() {
				i += 1;
				continue;
			}
			if rid.offset() + rid.len() as u64 <= committed {
				// batch consecutive committed ids into one read, bounded so
				// sparse batches don't drag the whole gap into staging
				let span_start = rids[i].offset();
				let mut j = i + 1;
				while j < rids.len()
					&& rids[j].is_real()
					&& rids[j].offset() + rids[j].len() as u64 <= committed
					&& rids[j].offset() + rids[j].len() as u64 - span_start <= MAX_FETCH_SPAN
				{
					j += 1;
				}
				let span_len = (rids[j - 1].offset() + rids[j - 1].len() as u64 - span_start)
					as usize;
				staging.clear();
				self.shared
					.segments
					.lock()
					.read(span_start, span_len, &mut staging)?;
				for k in i..j {
					let local = (rids[k].offset() - span_start) as usize;
					details[k] = unpack_record(
						&staging[local..local + rids[k].len()],
						&mut scripts,
					);
				}
				i = j;
			} else {
				let block = locate_tail_block(&snapshot, rid.offset()).ok_or_else(|| {
					Error::from(ErrorKind::InvalidArgument(format!(
						"no record at offset {}",
						rid.offset()
					)))
				})?;
				let local = (rid.offset() - block.start_offset) as usize;
				if local + rid.len() > block.buf.len() {
					return Err(ErrorKind::InvalidArgument(format!(
						"record {} overruns its block",
						rid
					))
					.into());
				}
				details[i] = unpack_record(&block.buf[local..local + rid.len()], &mut scripts);
				i += 1;
			}
		}
		Ok((details, scripts))
	}

	/// Removes every tail block at or above the given height. Committed
	/// data is never touched; by construction committed heights are below
	/// the mutable window.
	pub fn erase_since(&self, height: i32) {
		let _writer = self.shared.writer.lock();
		let snapshot = self.shared.tail.read().clone();
		let kept: Vec<Arc<BlockOutputs>> = snapshot
			.iter()
			.filter(|b| b.height < height)
			.cloned()
			.collect();
		if kept.len() == snapshot.len() {
			return;
		}
		// rewind the cursor over the erased region so replacement blocks
		// reuse its offsets and the committed stream stays dense
		let kept_end = kept
			.iter()
			.map(|b| b.end_offset())
			.max()
			.unwrap_or(0)
			.max(self.shared.committed_len.load(Ordering::SeqCst));
		let erased_below_kept = snapshot
			.iter()
			.any(|b| b.height >= height && b.end_offset() <= kept_end);
		if erased_below_kept {
			warn!(
				"erase at {} leaves a hole below offset {}; commits will stall until a reorg refills it",
				height, kept_end
			);
		}
		self.shared.next_offset.store(kept_end, Ordering::SeqCst);
		*self.shared.tail.write() = Arc::new(kept);
	}

	/// Synchronously commits tail blocks below the given height. The
	/// background flusher does the same on its own schedule; tests use
	/// this for determinism.
	pub fn flush_before(&self, before_height: i32) {
		commit(&self.shared, before_height);
	}
}

impl Drop for OutputTable {
	fn drop(&mut self) {
		self.shared.flush_queue.stop();
		if let Some(handle) = self.flusher.take() {
			let _ = handle.join();
		}
	}
}

fn locate_tail_block(snapshot: &TailSnapshot, offset: u64) -> Option<&Arc<BlockOutputs>> {
	let idx = match snapshot.binary_search_by(|b| b.start_offset.cmp(&offset)) {
		Ok(i) => i,
		Err(0) => return None,
		Err(i) => i - 1,
	};
	let block = &snapshot[idx];
	if offset < block.end_offset() {
		Some(block)
	} else {
		None
	}
}

fn unpack_record(bytes: &[u8], scripts: &mut Vec<u8>) -> OutputDetail {
	let height = LittleEndian::read_i32(&bytes[0..4]);
	let flags = LittleEndian::read_u32(&bytes[4..8]);
	let amount = LittleEndian::read_i64(&bytes[8..16]);
	let script_bytes = &bytes[OUTPUT_RECORD_HEADER_LEN..];
	let offset = scripts.len();
	scripts.extend_from_slice(script_bytes);
	OutputDetail {
		height,
		flags,
		amount,
		script: ScriptRef {
			offset,
			len: script_bytes.len(),
		},
	}
}

/// Commits tail blocks below `before_height` in offset order, stopping
/// at the first gap or younger block. Failures poison the table rather
/// than abort the process.
fn commit(shared: &Arc<Shared>, before_height: i32) {
	let _writer = shared.writer.lock();
	loop {
		let snapshot = shared.tail.read().clone();
		let front = match snapshot.first() {
			Some(front) => front.clone(),
			None => break,
		};
		if front.height >= before_height {
			break;
		}
		let committed = shared.committed_len.load(Ordering::SeqCst);
		if front.start_offset != committed {
			// out-of-order hole ahead of the front block
			debug!(
				"commit stops at offset {} (committed {})",
				front.start_offset, committed
			);
			break;
		}
		let result = shared.segments.lock().append(&front.buf);
		match result {
			Ok(offset) => {
				debug_assert_eq!(offset, committed);
				shared
					.committed_len
					.store(committed + front.buf.len() as u64, Ordering::SeqCst);
			}
			Err(e) => {
				error!("table commit failed at height {}: {}", front.height, e);
				*shared.fatal.lock() = Some(format!("commit failed: {}", e));
				return;
			}
		}
		let mut tail = (*snapshot).clone();
		tail.remove(0);
		*shared.tail.write() = Arc::new(tail);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::hash::Hash;
	use crate::core::core::header::BlockHeader;
	use crate::core::core::target::CompactTarget;
	use crate::core::core::transaction::{OutPoint, Transaction, TxInput, TxOutput, SEQUENCE_FINAL};
	use tempfile::tempdir;

	fn block_with_outputs(values: &[i64]) -> Block {
		let tx = Transaction {
			version: 1,
			inputs: vec![TxInput {
				prevout: OutPoint::null(),
				script_sig: vec![0x01, 0x02],
				sequence: SEQUENCE_FINAL,
				witness: vec![],
			}],
			outputs: values
				.iter()
				.map(|&value| TxOutput {
					value,
					pk_script: vec![0x51, 0x52, 0x53],
				})
				.collect(),
			lock_time: 0,
		};
		Block {
			header: BlockHeader {
				version: 1,
				prev_hash: Hash([0; 32]),
				merkle_root: Hash([0; 32]),
				timestamp: 0,
				bits: CompactTarget::from_bits(0x1d00ffff),
				nonce: 0,
			},
			transactions: vec![tx],
		}
	}

	#[test]
	fn append_and_fetch_from_tail() {
		let dir = tempdir().unwrap();
		let table = OutputTable::open(dir.path(), TableConfig::default()).unwrap();

		let mut entries = vec![];
		table
			.append_block(0, &block_with_outputs(&[100, 200]), &mut entries)
			.unwrap();
		assert_eq!(entries.len(), 2);
		assert_eq!(table.tail_len(), 1);

		let rids: Vec<OutputId> = entries.iter().map(|e| e.rid).collect();
		let (details, scripts) = table.fetch(&rids).unwrap();
		assert_eq!(details[0].amount, 100);
		assert_eq!(details[1].amount, 200);
		assert_eq!(details[0].height, 0);
		assert_eq!(details[0].flags, OUTPUT_FLAG_COINBASE);
		let s = details[1].script;
		assert_eq!(&scripts[s.offset..s.offset + s.len], &[0x51, 0x52, 0x53]);
	}

	#[test]
	fn null_rids_are_skipped() {
		let dir = tempdir().unwrap();
		let table = OutputTable::open(dir.path(), TableConfig::default()).unwrap();

		let mut entries = vec![];
		table
			.append_block(0, &block_with_outputs(&[7]), &mut entries)
			.unwrap();
		let rids = vec![entries[0].rid, OutputId::NULL];
		let (details, _) = table.fetch(&rids).unwrap();
		assert!(details[0].is_present());
		assert!(!details[1].is_present());
	}

	#[test]
	fn commit_moves_tail_into_segments() {
		let dir = tempdir().unwrap();
		let table = OutputTable::open(dir.path(), TableConfig { mutable_window: 4 }).unwrap();

		let mut entries = vec![];
		for h in 0..6 {
			table
				.append_block(h, &block_with_outputs(&[100 + i64::from(h)]), &mut entries)
				.unwrap();
		}
		table.flush_before(3);
		assert_eq!(table.tail_len(), 3);
		assert!(table.committed_len() > 0);

		// committed records read back exactly like tail records
		let rids: Vec<OutputId> = entries.iter().map(|e| e.rid).collect();
		let (details, _) = table.fetch(&rids).unwrap();
		for (h, detail) in details.iter().enumerate() {
			assert_eq!(detail.amount, 100 + h as i64);
			assert_eq!(detail.height, h as i32);
		}
	}

	#[test]
	fn erase_since_rewinds_the_tail() {
		let dir = tempdir().unwrap();
		let table = OutputTable::open(dir.path(), TableConfig::default()).unwrap();

		let mut entries = vec![];
		for h in 0..4 {
			table
				.append_block(h, &block_with_outputs(&[i64::from(h)]), &mut entries)
				.unwrap();
		}
		let before = entries
			.iter()
			.filter(|e| e.height < 2)
			.map(|e| e.rid)
			.collect::<Vec<_>>();

		table.erase_since(2);
		assert_eq!(table.tail_len(), 2);
		// surviving records still fetch
		let (details, _) = table.fetch(&before).unwrap();
		assert!(details.iter().all(|d| d.is_present()));

		// replacement blocks reuse the erased offsets
		let mut replay = vec![];
		table
			.append_block(2, &block_with_outputs(&[42]), &mut replay)
			.unwrap();
		assert_eq!(replay[0].rid.offset(), before.last().unwrap().offset() + before.last().unwrap().len() as u64);
	}

	#[test]
	fn out_of_order_appends_sort_by_offset() {
		let dir = tempdir().unwrap();
		let table = OutputTable::open(dir.path(), TableConfig::default()).unwrap();

		// height 1 lands before height 0; offsets stay in append order
		let mut e1 = vec![];
		table
			.append_block(1, &block_with_outputs(&[10]), &mut e1)
			.unwrap();
		let mut e0 = vec![];
		table
			.append_block(0, &block_with_outputs(&[20]), &mut e0)
			.unwrap();
		assert!(e1[0].rid.offset() < e0[0].rid.offset());

		// both fetchable
		let mut rids = vec![e1[0].rid, e0[0].rid];
		rids.sort();
		let (details, _) = table.fetch(&rids).unwrap();
		assert_eq!(details[0].amount, 10);
		assert_eq!(details[1].amount, 20);
	}
}
