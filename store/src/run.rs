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

//! A run: a sorted, immutable-once-published slice of index entries for
//! one height range, with a small directory bracketing keys by a prefix
//! of their hash. Mutable runs keep fund/spend pairs so a reorg can be
//! unwound; immutable runs have had cancelled pairs collapsed away.

use crate::types::{key_prefix, OutputKV, OutputKey};

/// A sorted slice of index entries covering the height range
/// `[begin, end)`.
pub struct Run {
	entries: Vec<OutputKV>,
	/// Bucket boundaries into `entries`, one per prefix value plus a
	/// trailing sentinel
	directory: Vec<u32>,
	skip_bits: u32,
	dir_bits: u32,
	begin: i32,
	end: i32,
	mutable: bool,
}

impl Run {
	/// Builds a run over entries, sorting them into index order. The
	/// directory brackets `dir_bits` of key hash after the `skip_bits`
	/// the shard routing already consumed.
	pub fn new(
		mut entries: Vec<OutputKV>,
		skip_bits: u32,
		dir_bits: u32,
		begin: i32,
		end: i32,
		mutable: bool,
	) -> Run {
		entries.sort_by(|a, b| a.cmp_index(b));
		let directory = build_directory(&entries, skip_bits, dir_bits);
		Run {
			entries,
			directory,
			skip_bits,
			dir_bits,
			begin,
			end,
			mutable,
		}
	}

	/// First height covered.
	pub fn begin(&self) -> i32 {
		self.begin
	}

	/// One past the last height covered.
	pub fn end(&self) -> i32 {
		self.end
	}

	/// Whether the run still carries cancelled fund/spend pairs.
	pub fn is_mutable(&self) -> bool {
		self.mutable
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the run holds no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// The sorted entries.
	pub fn entries(&self) -> &[OutputKV] {
		&self.entries
	}

	/// Whether the run's height range intersects the window.
	pub fn overlaps(&self, since: i32, before: i32) -> bool {
		self.begin < before && since < self.end
	}

	/// Whether the run's height range lies wholly inside the window.
	pub fn within(&self, since: i32, before: i32) -> bool {
		since <= self.begin && self.end <= before
	}

	/// The newest entry for `key` with height inside `[since, before)`.
	pub fn lookup(&self, key: &OutputKey, since: i32, before: i32) -> Option<&OutputKV> {
		let bucket = key_prefix(key, self.skip_bits, self.dir_bits) as usize;
		let lo = self.directory[bucket] as usize;
		let hi = self.directory[bucket + 1] as usize;
		let span = &self.entries[lo..hi];

		let start = gallop_to_key(span, key);
		let mut end = start;
		while end < span.len() && span[end].key == *key {
			end += 1;
		}
		// entries for one key sort oldest to newest; scan from the back
		for entry in span[start..end].iter().rev() {
			if entry.height >= before {
				continue;
			}
			if entry.height < since {
				break;
			}
			return Some(entry);
		}
		None
	}

	/// A copy of this run without any entry at or above `height`, its
	/// range truncated accordingly.
	pub fn rebuild_below(&self, height: i32) -> Run {
		let entries: Vec<OutputKV> = self
			.entries
			.iter()
			.filter(|e| e.height < height)
			.cloned()
			.collect();
		Run::new(
			entries,
			self.skip_bits,
			self.dir_bits,
			self.begin,
			self.end.min(height),
			self.mutable,
		)
	}
}

fn build_directory(entries: &[OutputKV], skip_bits: u32, dir_bits: u32) -> Vec<u32> {
	let buckets = 1usize << dir_bits;
	let mut directory = vec![0u32; buckets + 1];
	let mut entry = 0;
	for bucket in 0..buckets {
		while entry < entries.len()
			&& (key_prefix(&entries[entry].key, skip_bits, dir_bits) as usize) < bucket
		{
			entry += 1;
		}
		directory[bucket] = entry as u32;
	}
	directory[buckets] = entries.len() as u32;
	directory
}

/// Doubling steps toward the first entry at or above `key`, then a
/// binary search over the bracketed window.
fn gallop_to_key(span: &[OutputKV], key: &OutputKey) -> usize {
	if span.is_empty() || span[0].key >= *key {
		return 0;
	}
	let mut step = 1;
	let mut lo = 0;
	while lo + step < span.len() && span[lo + step].key < *key {
		lo += step;
		step *= 2;
	}
	let hi = (lo + step).min(span.len());
	lo + span[lo..hi].partition_point(|e| e.key < *key)
}
