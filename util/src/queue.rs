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

//! A blocking FIFO work queue shared between an ingesting thread and a
//! worker thread. Waiters park on a condition variable until an item
//! arrives or the queue is stopped. A stopped queue stays stopped (all
//! waits return empty) until `start` is called again.

use crate::timeout::Timeout;
use crate::{Condvar, Mutex};
use std::collections::VecDeque;

struct Inner<T> {
	items: VecDeque<T>,
	stopped: bool,
}

/// Thread-safe blocking queue.
pub struct WorkQueue<T> {
	inner: Mutex<Inner<T>>,
	cond: Condvar,
}

impl<T> WorkQueue<T> {
	/// Creates an empty, started queue.
	pub fn new() -> WorkQueue<T> {
		WorkQueue {
			inner: Mutex::new(Inner {
				items: VecDeque::new(),
				stopped: false,
			}),
			cond: Condvar::new(),
		}
	}

	/// Appends an item, waking one waiter. Returns false (dropping the
	/// item) if the queue is stopped.
	pub fn push(&self, item: T) -> bool {
		let mut inner = self.inner.lock();
		if inner.stopped {
			return false;
		}
		inner.items.push_back(item);
		self.cond.notify_one();
		true
	}

	/// Pops the front item if one is immediately available.
	pub fn try_pop(&self) -> Option<T> {
		let mut inner = self.inner.lock();
		inner.items.pop_front()
	}

	/// Pops the front item, parking until one arrives, the timeout fires
	/// or the queue is stopped. A stopped queue returns None without
	/// waiting.
	pub fn wait_pop(&self, timeout: Timeout) -> Option<T> {
		let mut inner = self.inner.lock();
		loop {
			if let Some(item) = inner.items.pop_front() {
				return Some(item);
			}
			if inner.stopped || timeout.is_immediate() {
				return None;
			}
			if timeout.is_infinite() {
				self.cond.wait(&mut inner);
			} else {
				let remaining = timeout.remaining();
				if remaining.as_secs() == 0 && remaining.subsec_nanos() == 0 {
					return None;
				}
				if self.cond.wait_for(&mut inner, remaining).timed_out() {
					return inner.items.pop_front();
				}
			}
		}
	}

	/// Transitions the queue into its terminal state, waking every waiter
	/// with no value. Pending items are dropped.
	pub fn stop(&self) {
		let mut inner = self.inner.lock();
		inner.stopped = true;
		inner.items.clear();
		self.cond.notify_all();
	}

	/// Leaves the stopped state, allowing pushes again.
	pub fn start(&self) {
		let mut inner = self.inner.lock();
		inner.stopped = false;
	}

	/// Removes all queued items matching the predicate, returning how many
	/// were erased. Used to purge a misbehaving peer's pending work.
	pub fn erase_if<F>(&self, mut pred: F) -> usize
	where
		F: FnMut(&T) -> bool,
	{
		let mut inner = self.inner.lock();
		let before = inner.items.len();
		inner.items.retain(|item| !pred(item));
		before - inner.items.len()
	}

	/// Number of queued items.
	pub fn len(&self) -> usize {
		let inner = self.inner.lock();
		inner.items.len()
	}

	/// Whether the queue currently holds no items.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Whether the queue is in its stopped state.
	pub fn is_stopped(&self) -> bool {
		let inner = self.inner.lock();
		inner.stopped
	}
}
