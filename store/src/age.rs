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

//! One tier of the log-structured index: an ordered collection of runs.
//! Ages fill with runs migrating down from the previous tier; once a
//! fan-in of height-contiguous runs has dropped below the retain height
//! they merge into a single run of the next age.

use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::run::Run;
use crate::types::{OutputKV, OutputKey, OutputOp};

/// Shape of one age tier.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AgeParams {
	/// Whether runs in this age retain cancelled fund/spend pairs
	pub mutable: bool,
	/// Directory prefix bits of runs in this age
	pub dir_bits: u32,
	/// How many contiguous runs merge into the next age
	pub fan_in: usize,
}

/// The default eight-tier ladder.
pub fn default_age_params() -> Vec<AgeParams> {
	vec![
		AgeParams {
			mutable: true,
			dir_bits: 8,
			fan_in: 8,
		},
		AgeParams {
			mutable: true,
			dir_bits: 8,
			fan_in: 8,
		},
		AgeParams {
			mutable: true,
			dir_bits: 10,
			fan_in: 8,
		},
		AgeParams {
			mutable: false,
			dir_bits: 12,
			fan_in: 8,
		},
		AgeParams {
			mutable: false,
			dir_bits: 13,
			fan_in: 8,
		},
		AgeParams {
			mutable: false,
			dir_bits: 15,
			fan_in: 8,
		},
		AgeParams {
			mutable: false,
			dir_bits: 16,
			fan_in: 8,
		},
		AgeParams {
			mutable: false,
			dir_bits: 17,
			fan_in: 8,
		},
	]
}

/// One age tier of a shard.
pub struct Age {
	/// The tier's shape
	pub params: AgeParams,
	/// Runs, newest height range first
	runs: Vec<Arc<Run>>,
}

impl Age {
	/// An empty age.
	pub fn new(params: AgeParams) -> Age {
		Age {
			params,
			runs: vec![],
		}
	}

	/// The runs, newest first.
	pub fn runs(&self) -> &[Arc<Run>] {
		&self.runs
	}

	/// Inserts a run at its height-ordered position.
	pub fn add_run(&mut self, run: Arc<Run>) {
		let pos = self
			.runs
			.partition_point(|r| r.begin() > run.begin());
		self.runs.insert(pos, run);
	}

	/// Removes runs by identity. Returns how many were found.
	pub fn remove_runs(&mut self, victims: &[Arc<Run>]) -> usize {
		let before = self.runs.len();
		self.runs
			.retain(|run| !victims.iter().any(|v| Arc::ptr_eq(run, v)));
		before - self.runs.len()
	}

	/// The newest entry for `key` within the window across this age's
	/// runs, newest run first.
	///
	/// An immutable age can only answer windows wholly containing each
	/// overlapped run: collapsed pairs make partial windows unanswerable,
	/// so those fail with an invalid-argument error instead of lying.
	pub fn query_key(
		&self,
		key: &OutputKey,
		since: i32,
		before: i32,
	) -> Result<Option<OutputKV>, Error> {
		for run in &self.runs {
			if !run.overlaps(since, before) {
				continue;
			}
			if !self.params.mutable && !run.within(since, before) {
				return Err(ErrorKind::InvalidArgument(format!(
					"window [{}, {}) cuts immutable run [{}, {})",
					since,
					before,
					run.begin(),
					run.end()
				))
				.into());
			}
			if let Some(kv) = run.lookup(key, since, before) {
				return Ok(Some(*kv));
			}
		}
		Ok(None)
	}

	/// The first fan-in runs if, sorted by ascending height range, they
	/// form a contiguous sequence ending at or below the retain height.
	pub fn merge_candidates(&self, retain_height: i32) -> Option<Vec<Arc<Run>>> {
		if self.runs.len() < self.params.fan_in {
			return None;
		}
		let mut sorted: Vec<Arc<Run>> = self.runs.clone();
		sorted.sort_by_key(|r| r.begin());
		let picked = &sorted[..self.params.fan_in];
		for pair in picked.windows(2) {
			if pair[0].end() != pair[1].begin() {
				return None;
			}
		}
		if picked.last().unwrap().end() > retain_height {
			return None;
		}
		Some(picked.to_vec())
	}

	/// Reorg erase: drops runs wholly at or above `height` and rebuilds
	/// those straddling it. Only meaningful on mutable ages; immutable
	/// ages hold heights the reorg horizon can no longer reach.
	pub fn erase_since(&mut self, height: i32) {
		debug_assert!(self.params.mutable);
		let mut rebuilt = vec![];
		for run in &self.runs {
			if run.begin() >= height {
				continue;
			}
			if run.end() > height {
				let reduced = run.rebuild_below(height);
				if !reduced.is_empty() || reduced.end() > reduced.begin() {
					rebuilt.push(Arc::new(reduced));
				}
			} else {
				rebuilt.push(run.clone());
			}
		}
		self.runs = rebuilt;
	}
}

/// K-way merge of height-contiguous runs into one run for the next age.
/// When the output is immutable, a spend directly cancelling a fund of
/// the same key eliminates the pair.
pub fn merge_runs(
	inputs: &[Arc<Run>],
	skip_bits: u32,
	dir_bits: u32,
	mutable_output: bool,
) -> Run {
	use std::cmp::Ordering;
	use std::collections::BinaryHeap;

	struct Head {
		kv: OutputKV,
		run: usize,
		pos: usize,
	}
	impl PartialEq for Head {
		fn eq(&self, other: &Head) -> bool {
			self.cmp(other) == Ordering::Equal
		}
	}
	impl Eq for Head {}
	impl PartialOrd for Head {
		fn partial_cmp(&self, other: &Head) -> Option<Ordering> {
			Some(self.cmp(other))
		}
	}
	impl Ord for Head {
		fn cmp(&self, other: &Head) -> Ordering {
			// reversed so the max-heap pops the smallest entry
			other
				.kv
				.cmp_index(&self.kv)
				.then(other.run.cmp(&self.run))
		}
	}

	let begin = inputs.iter().map(|r| r.begin()).min().unwrap_or(0);
	let end = inputs.iter().map(|r| r.end()).max().unwrap_or(0);

	let mut heap = BinaryHeap::new();
	for (run, input) in inputs.iter().enumerate() {
		if let Some(kv) = input.entries().first() {
			heap.push(Head {
				kv: *kv,
				run,
				pos: 0,
			});
		}
	}

	let total: usize = inputs.iter().map(|r| r.len()).sum();
	let mut merged: Vec<OutputKV> = Vec::with_capacity(total);
	while let Some(head) = heap.pop() {
		if !mutable_output {
			// a spend arriving right after a fund of the same key
			// cancels it out of the immutable run
			if head.kv.op == OutputOp::Delete {
				if let Some(last) = merged.last() {
					if last.key == head.kv.key && last.op == OutputOp::Add {
						merged.pop();
						advance(&mut heap, inputs, head.run, head.pos);
						continue;
					}
				}
			}
		}
		merged.push(head.kv);
		advance(&mut heap, inputs, head.run, head.pos);
	}

	fn advance(
		heap: &mut BinaryHeap<Head>,
		inputs: &[Arc<Run>],
		run: usize,
		pos: usize,
	) {
		if let Some(kv) = inputs[run].entries().get(pos + 1) {
			heap.push(Head {
				kv: *kv,
				run,
				pos: pos + 1,
			});
		}
	}

	Run::new(merged, skip_bits, dir_bits, begin, end, mutable_output)
}
