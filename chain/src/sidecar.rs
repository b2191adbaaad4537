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

//! Sidecars mirror the timechain topology to keep per-header metadata in
//! lockstep with it, through extensions, forks and reorgs. Main-chain
//! values are run-length encoded as keyframes; fork values hang off an
//! auxiliary map keyed by header hash.

use crate::core::core::hash::{Hash, ShortHashMap};

use crate::util::RwLock;

use crate::types::{AddSync, BlockValidationStatus, Locator};

/// Receives timechain mutations. Implementations are invoked while the
/// chain lock is held exclusively, so they must not call back into the
/// timechain.
pub trait SidecarSync: Send + Sync {
	/// Applies one mutation.
	fn add_sync(&self, ev: &AddSync);
	/// Adjusts to the given chain length on registration.
	fn sync_to(&self, chain_len: i32);
}

/// A run of equal values starting at a height.
#[derive(Clone, Debug)]
struct Keyframe<T> {
	start: i32,
	value: T,
}

/// Piecewise-constant per-height metadata in minimal run-length form,
/// plus fork values keyed by header hash.
pub struct KeyframeSidecar<T> {
	frames: Vec<Keyframe<T>>,
	len: i32,
	forks: ShortHashMap<Hash, T>,
	default: T,
}

impl<T: Clone + PartialEq> KeyframeSidecar<T> {
	/// An empty sidecar; new chain positions take the default value.
	pub fn new(default: T) -> KeyframeSidecar<T> {
		KeyframeSidecar {
			frames: vec![],
			len: 0,
			forks: ShortHashMap::default(),
			default,
		}
	}

	/// Number of chain positions tracked.
	pub fn len(&self) -> i32 {
		self.len
	}

	/// Whether no chain positions are tracked yet.
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Number of keyframes in the representation. No two adjacent
	/// keyframes ever hold an equal value.
	pub fn frame_count(&self) -> usize {
		self.frames.len()
	}

	/// The value at a locator, if the position is known.
	pub fn get(&self, locator: Locator) -> Option<T> {
		match locator {
			Locator::Height(h) => {
				if h < 0 || h >= self.len {
					None
				} else {
					Some(self.value_at(h).clone())
				}
			}
			Locator::Fork(hash) => self.forks.get(&hash).cloned(),
		}
	}

	/// Sets the value at a locator. Heights must already be tracked; fork
	/// entries spring into being on first set.
	pub fn set(&mut self, locator: Locator, value: T) {
		match locator {
			Locator::Height(h) => self.set_height(h, value),
			Locator::Fork(hash) => {
				self.forks.insert(hash, value);
			}
		}
	}

	fn frame_index(&self, height: i32) -> usize {
		// greatest frame starting at or before the height
		self.frames.partition_point(|f| f.start <= height) - 1
	}

	fn value_at(&self, height: i32) -> &T {
		&self.frames[self.frame_index(height)].value
	}

	fn set_height(&mut self, height: i32, value: T) {
		assert!(
			height >= 0 && height < self.len,
			"sidecar set outside chain: {} of {}",
			height,
			self.len
		);
		if *self.value_at(height) == value {
			return;
		}
		let idx = self.frame_index(height);
		let run_start = self.frames[idx].start;
		let run_end = self
			.frames
			.get(idx + 1)
			.map(|f| f.start)
			.unwrap_or(self.len);
		let run_value = self.frames[idx].value.clone();

		let mut replacement = vec![];
		if run_start < height {
			replacement.push(Keyframe {
				start: run_start,
				value: run_value.clone(),
			});
		}
		replacement.push(Keyframe {
			start: height,
			value,
		});
		if height + 1 < run_end {
			replacement.push(Keyframe {
				start: height + 1,
				value: run_value,
			});
		}
		self.frames.splice(idx..idx + 1, replacement);
		self.coalesce();
	}

	fn coalesce(&mut self) {
		let mut i = 1;
		while i < self.frames.len() {
			if self.frames[i].value == self.frames[i - 1].value {
				self.frames.remove(i);
			} else {
				i += 1;
			}
		}
	}

	/// Extends the chain portion by one position holding `value`.
	pub fn push(&mut self, value: T) {
		self.len += 1;
		if self.frames.is_empty() {
			self.frames.push(Keyframe {
				start: 0,
				value,
			});
		} else {
			self.set_height(self.len - 1, value);
		}
	}

	/// Truncates the chain portion to `new_len` positions.
	pub fn truncate(&mut self, new_len: i32) {
		self.len = new_len.max(0);
		let len = self.len;
		self.frames.retain(|f| f.start < len);
	}

	/// Applies one timechain mutation.
	pub fn add_sync(&mut self, ev: &AddSync) {
		if ev.is_reorg() {
			// displaced chain values move under their fork hashes
			for (i, hash) in ev.moved_from_chain.iter().enumerate() {
				let height = ev.fork_height + 1 + i as i32;
				if let Some(value) = self.get(Locator::Height(height)) {
					self.forks.insert(*hash, value);
				}
			}
			self.truncate(ev.fork_height + 1);
			// the promoted branch pulls its fork values into the chain
			for hash in &ev.promoted {
				let value = self
					.forks
					.get(hash)
					.cloned()
					.unwrap_or_else(|| self.default.clone());
				self.push(value);
			}
			for hash in &ev.promoted {
				self.forks.remove(hash);
			}
		} else if ev.in_chain {
			self.push(self.default.clone());
		}
		// a fork add needs nothing until a value is set on its hash
	}

	/// Adjusts the tracked chain length, filling with the default.
	pub fn sync_to(&mut self, chain_len: i32) {
		if chain_len < self.len {
			self.truncate(chain_len);
		}
		while self.len < chain_len {
			self.push(self.default.clone());
		}
	}
}

/// A keyframe sidecar behind its own lock, shareable with the timechain
/// and with readers. Reader locks are taken per call, never held.
pub struct SharedSidecar<T> {
	inner: RwLock<KeyframeSidecar<T>>,
}

impl<T: Clone + PartialEq> SharedSidecar<T> {
	/// A shareable sidecar with the given default value.
	pub fn new(default: T) -> SharedSidecar<T> {
		SharedSidecar {
			inner: RwLock::new(KeyframeSidecar::new(default)),
		}
	}

	/// The value at a locator.
	pub fn get(&self, locator: Locator) -> Option<T> {
		self.inner.read().get(locator)
	}

	/// Sets the value at a locator.
	pub fn set(&self, locator: Locator, value: T) {
		self.inner.write().set(locator, value)
	}

	/// Number of chain positions tracked.
	pub fn len(&self) -> i32 {
		self.inner.read().len()
	}

	/// Whether no chain positions are tracked yet.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<T: Clone + PartialEq + Send + Sync> SidecarSync for SharedSidecar<T> {
	fn add_sync(&self, ev: &AddSync) {
		self.inner.write().add_sync(ev)
	}

	fn sync_to(&self, chain_len: i32) {
		self.inner.write().sync_to(chain_len)
	}
}

/// Block validation progress keyed by chain position.
pub type StatusSidecar = SharedSidecar<BlockValidationStatus>;

/// A status sidecar starting everything at `Unvalidated`.
pub fn status_sidecar() -> StatusSidecar {
	SharedSidecar::new(BlockValidationStatus::Unvalidated)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn set_get_round_trip() {
		let mut sc = KeyframeSidecar::new(0u32);
		sc.sync_to(10);
		assert_eq!(sc.get(Locator::Height(5)), Some(0));
		sc.set(Locator::Height(5), 7);
		assert_eq!(sc.get(Locator::Height(4)), Some(0));
		assert_eq!(sc.get(Locator::Height(5)), Some(7));
		assert_eq!(sc.get(Locator::Height(6)), Some(0));
		assert_eq!(sc.get(Locator::Height(10)), None);
	}

	#[test]
	fn representation_stays_minimal() {
		let mut sc = KeyframeSidecar::new(0u32);
		sc.sync_to(10);
		assert_eq!(sc.frame_count(), 1);

		// carving a run out and filling it back in coalesces
		for h in 3..7 {
			sc.set(Locator::Height(h), 1);
		}
		assert_eq!(sc.frame_count(), 3);
		for h in 3..7 {
			sc.set(Locator::Height(h), 0);
		}
		assert_eq!(sc.frame_count(), 1);

		// setting the same value is a no-op
		sc.set(Locator::Height(5), 0);
		assert_eq!(sc.frame_count(), 1);
	}

	#[test]
	fn fork_entries() {
		let mut sc = KeyframeSidecar::new(0u32);
		let hash = Hash([7; 32]);
		assert_eq!(sc.get(Locator::Fork(hash)), None);
		sc.set(Locator::Fork(hash), 3);
		assert_eq!(sc.get(Locator::Fork(hash)), Some(3));
	}

	#[test]
	fn reorg_promotion_swaps_values() {
		let mut sc = KeyframeSidecar::new(0u32);
		sc.sync_to(4); // heights 0..3
		sc.set(Locator::Height(2), 5);
		sc.set(Locator::Height(3), 6);

		// fork values staged for the incoming branch
		let b2 = Hash([2; 32]);
		let b3 = Hash([3; 32]);
		let b4 = Hash([4; 32]);
		sc.set(Locator::Fork(b2), 50);
		sc.set(Locator::Fork(b3), 60);

		let old2 = Hash([0x22; 32]);
		let old3 = Hash([0x33; 32]);
		sc.add_sync(&AddSync {
			parent_hash: b3,
			hash: b4,
			height: 4,
			in_chain: true,
			fork_height: 1,
			moved_from_chain: vec![old2, old3],
			promoted: vec![b2, b3, b4],
		});

		// chain now carries the fork's values, default for the new tip
		assert_eq!(sc.len(), 5);
		assert_eq!(sc.get(Locator::Height(2)), Some(50));
		assert_eq!(sc.get(Locator::Height(3)), Some(60));
		assert_eq!(sc.get(Locator::Height(4)), Some(0));

		// displaced values are reachable under their fork hashes
		assert_eq!(sc.get(Locator::Fork(old2)), Some(5));
		assert_eq!(sc.get(Locator::Fork(old3)), Some(6));

		// promoted hashes no longer shadow the chain
		assert_eq!(sc.get(Locator::Fork(b2)), None);
	}
}
