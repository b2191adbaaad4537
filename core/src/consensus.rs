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

//! All the rules required for a cryptocurrency to have reach consensus across
//! the whole network are complex and hard to completely isolate. Some can be
//! simple parameters (like block reward), others complex algorithms (like
//! the difficulty adjustment). As long as they're simple enough,
//! consensus-relevant constants and short functions are kept here.

use crate::core::header::HeaderAncestryView;
use crate::core::target::{max_target, CompactTarget};

/// One coin in base units
pub const COIN: i64 = 100_000_000;

/// Total supply cap; also the largest value any single output may carry
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// The block subsidy before any halving
pub const BASE_REWARD: i64 = 50 * COIN;

/// Blocks between subsidy halvings
pub const HALVING_INTERVAL: i32 = 210_000;

/// Number of confirmations before a coinbase output may be spent
pub const COINBASE_MATURITY: i32 = 100;

/// Maximum size of the pre-witness serialization of a block, in bytes
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Maximum block weight (base size * 3 + total size)
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;

/// Weight units per pre-witness byte
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Maximum weighted legacy signature operations per block
pub const MAX_BLOCK_SIGOPS_COST: usize = 80_000;

/// Coinbase signature script length bounds, inclusive
pub const COINBASE_SCRIPT_SIG_MIN: usize = 2;
/// See `COINBASE_SCRIPT_SIG_MIN`
pub const COINBASE_SCRIPT_SIG_MAX: usize = 100;

/// Blocks between difficulty adjustments
pub const DIFFICULTY_ADJUST_WINDOW: i32 = 2_016;

/// Block interval target, in seconds
pub const TARGET_SPACING: u32 = 600;

/// Wall-clock span one difficulty window is aimed at
pub const TARGET_TIMESPAN: u32 = DIFFICULTY_ADJUST_WINDOW as u32 * TARGET_SPACING;

/// Number of ancestor timestamps the past-median is taken over
pub const MEDIAN_TIME_WINDOW: usize = 11;

/// How far into the future a header timestamp may run, in seconds
pub const MAX_FUTURE_DRIFT: u32 = 2 * 60 * 60;

/// Soft-fork upgrades gated by activation height.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Bip {
	/// Coinbase carries the block height
	Bip34,
	/// OP_CHECKLOCKTIMEVERIFY
	Bip65,
	/// Strict DER signatures
	Bip66,
	/// Median time past for locktime comparisons
	Bip113,
	/// Segregated witness
	Bip141,
}

/// Mainnet height at which the given upgrade activated.
pub fn activation_height(bip: Bip) -> i32 {
	match bip {
		Bip::Bip34 => 227_931,
		Bip::Bip65 => 388_381,
		Bip::Bip66 => 363_725,
		Bip::Bip113 => 419_328,
		Bip::Bip141 => 481_824,
	}
}

/// Whether the given upgrade is active for a block at the given height.
pub fn is_bip_enabled(bip: Bip, height: i32) -> bool {
	height >= activation_height(bip)
}

/// The block subsidy at the given height.
pub fn block_reward(height: i32) -> i64 {
	let halvings = height / HALVING_INTERVAL;
	if halvings >= 64 {
		0
	} else {
		BASE_REWARD >> halvings
	}
}

// Each entry retires the 1-based header version at its index once active.
const VERSION_UPGRADES: [Bip; 3] = [Bip::Bip34, Bip::Bip66, Bip::Bip65];

/// Whether a header version is acceptable at the given height. Versions
/// at most zero never are; each legacy version is retired by the upgrade
/// that obsoleted it; versions past the upgrade table are unknown.
pub fn is_version_valid(version: i32, height: i32) -> bool {
	if version <= 0 || version as usize > VERSION_UPGRADES.len() + 1 {
		return false;
	}
	let idx = version as usize - 1;
	if idx < VERSION_UPGRADES.len() && is_bip_enabled(VERSION_UPGRADES[idx], height) {
		return false;
	}
	true
}

/// Median of the last eleven ancestor timestamps ending at the view's
/// pinned header. Requires at least one ancestor timestamp; by
/// construction the genesis header is never validated against a view.
pub fn median_time_past(view: &dyn HeaderAncestryView) -> u32 {
	let mut timestamps = view.last_n_timestamps(MEDIAN_TIME_WINDOW);
	debug_assert!(!timestamps.is_empty());
	timestamps.sort_unstable();
	timestamps[timestamps.len() / 2]
}

/// The compact target a header at `height` must carry, given its parent's
/// bits and a view over the ancestor timestamps.
///
/// Away from a window boundary the target carries over unchanged. At a
/// boundary it is scaled by the wall-clock the closing window actually
/// took, clamped to a quarter of the aimed-for timespan on either side,
/// and never looser than the protocol maximum.
pub fn next_compact_target(
	height: i32,
	parent_bits: CompactTarget,
	view: &dyn HeaderAncestryView,
) -> CompactTarget {
	if height % DIFFICULTY_ADJUST_WINDOW != 0 {
		return parent_bits;
	}
	let window_start = match view.timestamp_at(height - DIFFICULTY_ADJUST_WINDOW) {
		Some(t) => t,
		None => return parent_bits,
	};
	let window_end = match view.timestamp_at(height - 1) {
		Some(t) => t,
		None => return parent_bits,
	};

	let mut timespan = window_end.saturating_sub(window_start);
	if timespan < TARGET_TIMESPAN / 4 {
		timespan = TARGET_TIMESPAN / 4;
	}
	if timespan > TARGET_TIMESPAN * 4 {
		timespan = TARGET_TIMESPAN * 4;
	}

	let adjusted = parent_bits
		.expand()
		.mul_u64(u64::from(timespan))
		.div_u64(u64::from(TARGET_TIMESPAN));
	let limit = max_target();
	if adjusted > limit {
		CompactTarget::from_target(limit)
	} else {
		CompactTarget::from_target(adjusted)
	}
}
