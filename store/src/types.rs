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

//! Common store types: record ids, index entries and fetch results.

use std::cmp::Ordering;
use std::fmt;

use crate::core::core::transaction::OutPoint;

/// The outpoint being funded or spent. The store keys everything by it.
pub type OutputKey = OutPoint;

/// Fixed byte size of an output record's header on disk; the pk_script
/// follows immediately after.
pub const OUTPUT_RECORD_HEADER_LEN: usize = 16;

/// Flag bit marking an output created by a coinbase.
pub const OUTPUT_FLAG_COINBASE: u32 = 1;

/// A 64-bit record id packing a record's absolute byte offset into the
/// table stream (high 40 bits) and its byte length (low 24 bits). Two
/// values are reserved: `NULL` for a record not yet located and `SPENT`
/// for a record known-spent during a query.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct OutputId(u64);

const LEN_BITS: u32 = 24;
const LEN_MASK: u64 = (1 << LEN_BITS) - 1;

impl OutputId {
	/// Record not yet located.
	pub const NULL: OutputId = OutputId(u64::max_value());
	/// Record known-spent during a query.
	pub const SPENT: OutputId = OutputId(u64::max_value() - 1);

	/// Packs an offset and a record length.
	pub fn encode(offset: u64, len: usize) -> OutputId {
		debug_assert!(offset < (1 << (64 - LEN_BITS)));
		debug_assert!((len as u64) < (1 << LEN_BITS));
		OutputId((offset << LEN_BITS) | len as u64)
	}

	/// Absolute byte offset into the table stream.
	pub fn offset(&self) -> u64 {
		self.0 >> LEN_BITS
	}

	/// Byte length of the record, header plus script.
	pub fn len(&self) -> usize {
		(self.0 & LEN_MASK) as usize
	}

	/// Whether this is the not-yet-located marker.
	pub fn is_null(&self) -> bool {
		*self == OutputId::NULL
	}

	/// Whether this is the known-spent marker.
	pub fn is_spent(&self) -> bool {
		*self == OutputId::SPENT
	}

	/// Whether this id points at actual record bytes.
	pub fn is_real(&self) -> bool {
		!self.is_null() && !self.is_spent()
	}
}

impl fmt::Display for OutputId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_null() {
			f.write_str("null")
		} else if self.is_spent() {
			f.write_str("spent")
		} else {
			write!(f, "{}+{}", self.offset(), self.len())
		}
	}
}

/// Whether an index entry funds or spends its key.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum OutputOp {
	/// The key came into existence at this height
	Add,
	/// The key was spent at this height
	Delete,
}

/// One index entry: a key, the height and kind of the event, and for
/// funds the id of the output record. Delete entries are tombstones
/// whose record id carries no meaning.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OutputKV {
	/// The outpoint
	pub key: OutputKey,
	/// Block height of the event
	pub height: i32,
	/// Fund or spend
	pub op: OutputOp,
	/// Record id, valid for Add entries
	pub rid: OutputId,
}

impl OutputKV {
	/// Index sort order: key, then height, funds before spends.
	pub fn cmp_index(&self, other: &OutputKV) -> Ordering {
		self.key
			.cmp(&other.key)
			.then(self.height.cmp(&other.height))
			.then(self.op.cmp(&other.op))
	}
}

/// A slice into the shared scripts buffer a fetch returns.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct ScriptRef {
	/// Byte offset into the scripts buffer
	pub offset: usize,
	/// Script length in bytes
	pub len: usize,
}

/// A decoded output record. The script bytes live in the fetch's shared
/// buffer, referenced by `script`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OutputDetail {
	/// Height the output was created at
	pub height: i32,
	/// Record flags
	pub flags: u32,
	/// Amount in base units
	pub amount: i64,
	/// Where the script lives in the shared buffer
	pub script: ScriptRef,
}

impl OutputDetail {
	/// Placeholder detail for a null record id.
	pub fn absent() -> OutputDetail {
		OutputDetail {
			height: -1,
			flags: 0,
			amount: 0,
			script: ScriptRef::default(),
		}
	}

	/// Whether this detail holds actual record data.
	pub fn is_present(&self) -> bool {
		self.height >= 0
	}
}

/// The first `take` bits of the key's identifying hash, skipping `skip`
/// bits, read lexicographically (byte zero is most significant). Shards
/// and run directories bracket keys with it.
pub fn key_prefix(key: &OutputKey, skip: u32, take: u32) -> u32 {
	debug_assert!(skip + take <= 32);
	let mut word = [0u8; 8];
	word.copy_from_slice(&key.txid.0[..8]);
	let bits = u64::from_be_bytes(word);
	if take == 0 {
		return 0;
	}
	((bits << skip) >> (64 - take)) as u32
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::hash::Hash;

	#[test]
	fn output_id_packing() {
		let id = OutputId::encode(123_456, 789);
		assert_eq!(id.offset(), 123_456);
		assert_eq!(id.len(), 789);
		assert!(id.is_real());
		assert!(OutputId::NULL.is_null());
		assert!(OutputId::SPENT.is_spent());
		// ordering by encoded value is ordering by offset, reserved
		// values at the very end
		assert!(OutputId::encode(1, 10) < OutputId::encode(2, 1));
		assert!(OutputId::encode(u32::max_value() as u64, 1) < OutputId::SPENT);
		assert!(OutputId::SPENT < OutputId::NULL);
	}

	#[test]
	fn key_prefix_is_lexicographic() {
		let mut a = Hash([0; 32]);
		a.0[0] = 0b1010_0000;
		let key_a = OutputKey { txid: a, index: 0 };
		assert_eq!(key_prefix(&key_a, 0, 4), 0b1010);
		assert_eq!(key_prefix(&key_a, 1, 3), 0b010);

		let mut b = Hash([0; 32]);
		b.0[0] = 0b1011_0000;
		let key_b = OutputKey { txid: b, index: 0 };
		// prefix order matches the key sort order
		assert!(key_a < key_b);
		assert!(key_prefix(&key_a, 0, 8) < key_prefix(&key_b, 0, 8));
	}

	#[test]
	fn index_sort_order() {
		let key = OutputKey {
			txid: Hash([1; 32]),
			index: 0,
		};
		let add = OutputKV {
			key,
			height: 5,
			op: OutputOp::Add,
			rid: OutputId::encode(0, 20),
		};
		let spend = OutputKV {
			key,
			height: 9,
			op: OutputOp::Delete,
			rid: OutputId::NULL,
		};
		assert_eq!(add.cmp_index(&spend), Ordering::Less);
		let same_height_spend = OutputKV {
			height: 5,
			..spend
		};
		assert_eq!(add.cmp_index(&same_height_spend), Ordering::Less);
	}
}
