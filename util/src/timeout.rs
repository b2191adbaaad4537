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

//! Deadline-based timeouts for blocking waits.

use std::time::{Duration, Instant};

/// A wait bound. Either a concrete deadline, "forever" or "don't wait at
/// all". Queue waits honor the timeout or block indefinitely when infinite.
#[derive(Clone, Copy, Debug)]
pub struct Timeout {
	deadline: Instant,
	infinite: bool,
	immediate: bool,
}

impl Timeout {
	/// A timeout that never fires.
	pub fn infinite() -> Timeout {
		Timeout {
			deadline: Instant::now(),
			infinite: true,
			immediate: false,
		}
	}

	/// A timeout that has already fired. Waits using it return without
	/// parking.
	pub fn immediate() -> Timeout {
		Timeout {
			deadline: Instant::now(),
			infinite: false,
			immediate: true,
		}
	}

	/// A timeout firing the given number of milliseconds from now.
	pub fn from_millis(ms: u64) -> Timeout {
		Timeout {
			deadline: Instant::now() + Duration::from_millis(ms),
			infinite: false,
			immediate: false,
		}
	}

	/// Whether this timeout blocks forever.
	pub fn is_infinite(&self) -> bool {
		self.infinite
	}

	/// Whether this timeout forbids blocking entirely.
	pub fn is_immediate(&self) -> bool {
		self.immediate
	}

	/// Time left until the deadline, clamped to zero. Infinite timeouts
	/// report the maximum representable duration.
	pub fn remaining(&self) -> Duration {
		if self.infinite {
			return Duration::from_secs(u64::max_value());
		}
		if self.immediate {
			return Duration::from_millis(0);
		}
		let now = Instant::now();
		if now >= self.deadline {
			Duration::from_millis(0)
		} else {
			self.deadline - now
		}
	}

	/// Milliseconds left until the deadline, clamped to >= 0.
	pub fn remaining_ms(&self) -> u64 {
		if self.infinite {
			return u64::max_value();
		}
		let rem = self.remaining();
		rem.as_secs()
			.saturating_mul(1000)
			.saturating_add(u64::from(rem.subsec_millis()))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::thread;

	#[test]
	fn remaining_is_monotonic() {
		let t = Timeout::from_millis(50);
		let first = t.remaining_ms();
		thread::sleep(Duration::from_millis(10));
		let second = t.remaining_ms();
		assert!(second <= first);
		thread::sleep(Duration::from_millis(60));
		assert_eq!(t.remaining_ms(), 0);
	}

	#[test]
	fn immediate_and_infinite() {
		assert_eq!(Timeout::immediate().remaining_ms(), 0);
		assert!(Timeout::immediate().is_immediate());
		assert!(Timeout::infinite().is_infinite());
		assert!(Timeout::infinite().remaining_ms() > 0);
	}
}
