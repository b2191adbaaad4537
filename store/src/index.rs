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

//! The output index: for an outpoint, the id of its most recent fund not
//! cancelled by a spend. Keys partition into shards by hash prefix; each
//! shard stratifies its entries into ages, merged in the background by
//! the compactor.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

use crate::util::{Mutex, RwLock, Timeout, WorkQueue};

use crate::age::{default_age_params, merge_runs, Age, AgeParams};
use crate::error::{Error, ErrorKind};
use crate::run::Run;
use crate::types::{key_prefix, OutputId, OutputKV, OutputKey, OutputOp};

/// Tuning knobs for the output index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
	/// Key-hash bits selecting the shard
	pub shard_bits: u32,
	/// The age ladder, tier zero first
	pub ages: Vec<AgeParams>,
}

impl Default for IndexConfig {
	fn default() -> IndexConfig {
		IndexConfig {
			shard_bits: 9,
			ages: default_age_params(),
		}
	}
}

/// Per-key query outcome, packed alongside counts for telemetry.
pub struct QueryResult {
	/// Per input key: the fund's record id, `SPENT`, or `NULL`
	pub rids: Vec<OutputId>,
	/// Keys found funded and not spent inside the window
	pub funded: usize,
	/// Keys whose newest event in the window is a spend
	pub spent: usize,
}

struct Shard {
	ages: RwLock<Vec<Age>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct MergeJob {
	shard: usize,
	age: usize,
}

struct Shared {
	shards: Vec<Shard>,
	config: IndexConfig,
	retain_height: AtomicI32,
	merge_queue: WorkQueue<MergeJob>,
	in_flight: Mutex<HashSet<MergeJob>>,
}

/// The sharded, age-stratified key index.
pub struct OutputIndex {
	shared: Arc<Shared>,
	compactor: Option<thread::JoinHandle<()>>,
}

impl OutputIndex {
	/// Builds an empty index and starts its compactor.
	pub fn new(config: IndexConfig) -> Result<OutputIndex, Error> {
		assert!(!config.ages.is_empty(), "index needs at least one age");
		assert!(
			config.ages[0].mutable,
			"the receiving age must keep tombstones"
		);
		let shard_count = 1usize << config.shard_bits;
		let shards = (0..shard_count)
			.map(|_| Shard {
				ages: RwLock::new(config.ages.iter().map(|p| Age::new(*p)).collect()),
			})
			.collect();
		let shared = Arc::new(Shared {
			shards,
			config,
			retain_height: AtomicI32::new(0),
			merge_queue: WorkQueue::new(),
			in_flight: Mutex::new(HashSet::new()),
		});

		let worker = shared.clone();
		let compactor = thread::Builder::new()
			.name("index-compactor".to_string())
			.spawn(move || {
				while let Some(job) = worker.merge_queue.wait_pop(Timeout::infinite()) {
					run_merge(&worker, job);
				}
			})
			.map_err(|e| ErrorKind::Io(format!("spawn compactor: {}", e)))?;

		Ok(OutputIndex {
			shared,
			compactor: Some(compactor),
		})
	}

	/// Moves the height below which runs become eligible for merging,
	/// typically the lower edge of the reorg-mutable window.
	pub fn set_retain_height(&self, height: i32) {
		self.shared.retain_height.store(height, Ordering::SeqCst);
	}

	/// Appends one block's entries: funds from the table append plus a
	/// spend tombstone per consumed prevout, sorted by key. Every entry
	/// must carry the same height.
	pub fn append(&self, entries: &[OutputKV]) -> Result<(), Error> {
		if entries.is_empty() {
			return Ok(());
		}
		debug_assert!(entries
			.windows(2)
			.all(|w| w[0].cmp_index(&w[1]) != std::cmp::Ordering::Greater));
		let height = entries[0].height;
		debug_assert!(entries.iter().all(|e| e.height == height));

		// sorted keys make shard groups consecutive
		let mut touched = vec![];
		let mut start = 0;
		while start < entries.len() {
			let shard_idx = self.shard_of(&entries[start].key);
			let mut end = start + 1;
			while end < entries.len() && self.shard_of(&entries[end].key) == shard_idx {
				end += 1;
			}
			let run = Run::new(
				entries[start..end].to_vec(),
				self.shared.config.shard_bits,
				self.shared.config.ages[0].dir_bits,
				height,
				height + 1,
				true,
			);
			let mut ages = self.shared.shards[shard_idx].ages.write();
			ages[0].add_run(Arc::new(run));
			drop(ages);
			touched.push(shard_idx);
			start = end;
		}
		for shard_idx in touched {
			self.maybe_schedule(shard_idx, 0);
		}
		Ok(())
	}

	/// Point-queries a sorted key batch over the height window
	/// `[since, before)`. Ages are consulted oldest first so a younger
	/// spend can cancel an older fund; a spend is terminal for its key.
	pub fn query(
		&self,
		keys: &[OutputKey],
		since: i32,
		before: i32,
	) -> Result<QueryResult, Error> {
		debug_assert!(keys.windows(2).all(|w| w[0] <= w[1]));
		let mut rids = vec![OutputId::NULL; keys.len()];
		let mut funded = 0;
		let mut spent = 0;
		let mut start = 0;
		while start < keys.len() {
			let shard_idx = self.shard_of(&keys[start]);
			let mut end = start + 1;
			while end < keys.len() && self.shard_of(&keys[end]) == shard_idx {
				end += 1;
			}
			let ages = self.shared.shards[shard_idx].ages.read();
			for (key, rid) in keys[start..end].iter().zip(rids[start..end].iter_mut()) {
				for age in ages.iter().rev() {
					match age.query_key(key, since, before).map_err(|e| {
						warn!("index query window rejected: {}", e);
						e
					})? {
						Some(kv) => match kv.op {
							OutputOp::Add => *rid = kv.rid,
							OutputOp::Delete => {
								*rid = OutputId::SPENT;
								break;
							}
						},
						None => {}
					}
				}
				if rid.is_spent() {
					spent += 1;
				} else if rid.is_real() {
					funded += 1;
				}
			}
			start = end;
		}
		Ok(QueryResult {
			rids,
			funded,
			spent,
		})
	}

	/// Reorg erase: every mutable age drops or rebuilds runs reaching
	/// `height` or beyond.
	pub fn erase_since(&self, height: i32) {
		for shard in &self.shared.shards {
			let mut ages = shard.ages.write();
			for age in ages.iter_mut() {
				if age.params.mutable {
					age.erase_since(height);
				}
			}
		}
	}

	/// Total entries across all shards and ages, for tests and telemetry.
	pub fn entry_count(&self) -> usize {
		self.shared
			.shards
			.iter()
			.map(|shard| {
				shard
					.ages
					.read()
					.iter()
					.flat_map(|age| age.runs().iter().map(|r| r.len()))
					.sum::<usize>()
			})
			.sum()
	}

	/// Runs every merge the ladder currently allows, synchronously.
	/// The compactor does the same in the background; tests use this for
	/// determinism.
	pub fn compact_now(&self) {
		loop {
			let mut progressed = false;
			for shard_idx in 0..self.shared.shards.len() {
				for age_idx in 0..self.shared.config.ages.len() - 1 {
					progressed |= try_merge(&self.shared, MergeJob {
						shard: shard_idx,
						age: age_idx,
					});
				}
			}
			if !progressed {
				break;
			}
		}
	}

	fn shard_of(&self, key: &OutputKey) -> usize {
		key_prefix(key, 0, self.shared.config.shard_bits) as usize
	}

	fn maybe_schedule(&self, shard: usize, age: usize) {
		maybe_schedule(&self.shared, shard, age);
	}
}

impl Drop for OutputIndex {
	fn drop(&mut self) {
		self.shared.merge_queue.stop();
		if let Some(handle) = self.compactor.take() {
			let _ = handle.join();
		}
	}
}

fn maybe_schedule(shared: &Arc<Shared>, shard: usize, age: usize) {
	if age + 1 >= shared.config.ages.len() {
		// the deepest age only ever grows
		return;
	}
	let retain = shared.retain_height.load(Ordering::SeqCst);
	let ready = {
		let ages = shared.shards[shard].ages.read();
		ages[age].merge_candidates(retain).is_some()
	};
	if !ready {
		return;
	}
	let job = MergeJob { shard, age };
	let mut in_flight = shared.in_flight.lock();
	if in_flight.insert(job) {
		if !shared.merge_queue.push(job) {
			in_flight.remove(&job);
		}
	}
}

fn run_merge(shared: &Arc<Shared>, job: MergeJob) {
	try_merge(shared, job);
	shared.in_flight.lock().remove(&job);
	// a merge may have made the next tier ready
	maybe_schedule(shared, job.shard, job.age);
	maybe_schedule(shared, job.shard, job.age + 1);
}

/// Performs one merge if the age is ready. The expensive k-way merge
/// runs without any lock; the swap re-checks that every consumed run is
/// still published before committing.
fn try_merge(shared: &Arc<Shared>, job: MergeJob) -> bool {
	let retain = shared.retain_height.load(Ordering::SeqCst);
	let candidates = {
		let ages = shared.shards[job.shard].ages.read();
		match ages[job.age].merge_candidates(retain) {
			Some(c) => c,
			None => return false,
		}
	};
	let next_params = shared.config.ages[job.age + 1];
	let merged = merge_runs(
		&candidates,
		shared.config.shard_bits,
		next_params.dir_bits,
		next_params.mutable,
	);

	let mut ages = shared.shards[job.shard].ages.write();
	// a reorg erase may have swapped runs out from under the merge
	let removed = ages[job.age].remove_runs(&candidates);
	if removed != candidates.len() {
		warn!(
			"merge of shard {} age {} raced an erase, discarding",
			job.shard, job.age
		);
		return false;
	}
	trace!(
		"merged {} runs ({} entries) into shard {} age {}",
		candidates.len(),
		merged.len(),
		job.shard,
		job.age + 1
	);
	ages[job.age + 1].add_run(Arc::new(merged));
	true
}
