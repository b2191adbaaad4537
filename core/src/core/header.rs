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

//! Block headers, their wire form and the per-header chain context
//! (height and accumulated work) carried alongside them.

use std::fmt;

use crate::core::hash::{DefaultHashable, Hash, Hashed};
use crate::core::target::{CompactTarget, Work};
use crate::ser::{self, FixedLength, Readable, Reader, Writeable, Writer};

/// A block header as it travels on the wire: 80 bytes, all integers
/// little-endian.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct BlockHeader {
	/// Protocol version of the block
	pub version: i32,
	/// Hash of the header this one builds on
	pub prev_hash: Hash,
	/// Root of the transaction merkle tree
	pub merkle_root: Hash,
	/// Claimed creation time, seconds since the epoch
	pub timestamp: u32,
	/// Compact encoding of the proof-of-work target
	pub bits: CompactTarget,
	/// Solution counter
	pub nonce: u32,
}

impl FixedLength for BlockHeader {
	const LEN: usize = 4 + 32 + 32 + 4 + 4 + 4;
}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		self.prev_hash.write(writer)?;
		self.merkle_root.write(writer)?;
		writer.write_u32(self.timestamp)?;
		self.bits.write(writer)?;
		writer.write_u32(self.nonce)
	}
}

impl Readable for BlockHeader {
	fn read(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
		Ok(BlockHeader {
			version: reader.read_i32()?,
			prev_hash: Hash::read(reader)?,
			merkle_root: Hash::read(reader)?,
			timestamp: reader.read_u32()?,
			bits: CompactTarget::read(reader)?,
			nonce: reader.read_u32()?,
		})
	}
}

impl DefaultHashable for BlockHeader {}

/// Reads one entry of a headers message: the 80 header bytes followed by
/// a transaction count that must be zero for a bare header.
pub fn read_wire_header(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
	let header = BlockHeader::read(reader)?;
	let txn_count = reader.read_varint()?;
	if txn_count != 0 {
		return Err(ser::Error::CorruptedData);
	}
	Ok(header)
}

/// Writes one entry of a headers message, the trailing count always zero.
pub fn write_wire_header<W: Writer>(writer: &mut W, header: &BlockHeader) -> Result<(), ser::Error> {
	header.write(writer)?;
	writer.write_varint(0)
}

/// A header plus everything the timechain knows about its position: its
/// hash, its height, the work its own target represents and the work
/// accumulated from genesis.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HeaderContext {
	/// The header itself
	pub header: BlockHeader,
	/// Cached hash of the header
	pub hash: Hash,
	/// Height, zero for genesis
	pub height: i32,
	/// Work of this header's own target
	pub local_work: Work,
	/// Work of the chain up to and including this header
	pub total_work: Work,
}

impl HeaderContext {
	/// Context of a chain root: height zero, total work equal to its own.
	pub fn genesis(header: BlockHeader) -> HeaderContext {
		let local_work = Work::from_compact(header.bits);
		HeaderContext {
			hash: header.hash(),
			height: 0,
			local_work,
			total_work: local_work,
			header,
		}
	}

	/// Context of a child header extending this one.
	pub fn extend(&self, header: BlockHeader) -> HeaderContext {
		debug_assert_eq!(header.prev_hash, self.hash);
		let local_work = Work::from_compact(header.bits);
		HeaderContext {
			hash: header.hash(),
			height: self.height + 1,
			local_work,
			total_work: self.total_work + local_work,
			header,
		}
	}

	/// Context of this header's parent, given the parent header. The
	/// parent's hash is already recorded here as `prev_hash`, so nothing
	/// is recomputed.
	pub fn rewind(&self, parent: BlockHeader) -> HeaderContext {
		let local_work = Work::from_compact(parent.bits);
		HeaderContext {
			hash: self.header.prev_hash,
			height: self.height - 1,
			local_work,
			total_work: self.total_work - self.local_work,
			header: parent,
		}
	}
}

impl fmt::Display for HeaderContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} at {}", self.hash, self.height)
	}
}

/// Read access to the ancestry of a header under validation, pinned at
/// the parent of the header being checked. Heights index the ancestor
/// chain the view was built over.
pub trait HeaderAncestryView {
	/// Height of the header the view is pinned at.
	fn height(&self) -> i32;

	/// Timestamp of the ancestor at the given height, if within reach.
	fn timestamp_at(&self, height: i32) -> Option<u32>;

	/// Up to the last `n` ancestor timestamps ordered oldest to newest,
	/// ending at (and including) the pinned header.
	fn last_n_timestamps(&self, n: usize) -> Vec<u32>;

	/// Compact target bits of the ancestor at the given height.
	fn bits_at(&self, height: i32) -> Option<CompactTarget>;
}
