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

//! Hash Function
//!
//! Primary hash function used in the protocol: double SHA-256 over a
//! type's serialized bytes. Hashes are held in little-endian byte order
//! and displayed reversed, as the protocol convention goes.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{BuildHasherDefault, Hasher};

use sha2::{Digest, Sha256};

use crate::ser::{self, FixedLength, Readable, Reader, SerializationMode, Writeable, Writer};
use kestrel_util as util;

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Used pervasively for blocks, transactions and outputs.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

/// The "zero" hash. Marks null prevouts and absent parents.
pub const ZERO_HASH: Hash = Hash([0; 32]);

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let hex = self.to_hex();
		f.write_str(&hex[..12.min(hex.len())])
	}
}

impl Hash {
	/// Builds a Hash from a byte vector. The vector must be 32 bytes.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut h = [0; 32];
		h.copy_from_slice(&v[..32]);
		Hash(h)
	}

	/// Converts the hash to a byte vector
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// Converts the hash to a byte slice
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// The hash in the display convention: byte-reversed hex.
	pub fn to_hex(&self) -> String {
		let mut reversed = self.0;
		reversed.reverse();
		util::to_hex(&reversed)
	}

	/// Parses a display-convention (byte-reversed) hex string.
	pub fn from_hex(hex: &str) -> Result<Hash, ser::Error> {
		let mut bytes = util::from_hex(hex).map_err(|_| ser::Error::CorruptedData)?;
		if bytes.len() != 32 {
			return Err(ser::Error::CorruptedData);
		}
		bytes.reverse();
		Ok(Hash::from_vec(&bytes))
	}

	/// Compares the hashes as little-endian 256-bit integers, which is what
	/// the proof-of-work target comparison needs.
	pub fn cmp_le_num(&self, other: &Hash) -> Ordering {
		for i in (0..32).rev() {
			match self.0[i].cmp(&other.0[i]) {
				Ordering::Equal => continue,
				ord => return ord,
			}
		}
		Ordering::Equal
	}
}

impl FixedLength for Hash {
	const LEN: usize = 32;
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read(reader: &mut dyn Reader) -> Result<Hash, ser::Error> {
		let v = reader.read_32_bytes()?;
		Ok(Hash::from_vec(&v))
	}
}

/// Serializer that outputs the double-SHA256 of everything written to it.
pub struct HashWriter {
	state: Sha256,
	mode: SerializationMode,
}

impl HashWriter {
	/// Consume the `HashWriter`, outputting the final hash.
	pub fn into_hash(self) -> Hash {
		let first = self.state.finalize();
		let second = Sha256::digest(&first);
		Hash::from_vec(&second)
	}

	/// A writer hashing the identity (pre-witness) serialization.
	pub fn hash_mode() -> HashWriter {
		HashWriter {
			state: Sha256::new(),
			mode: SerializationMode::Hash,
		}
	}

	/// A writer hashing the full serialization.
	pub fn full_mode() -> HashWriter {
		HashWriter {
			state: Sha256::new(),
			mode: SerializationMode::Full,
		}
	}
}

impl Default for HashWriter {
	fn default() -> HashWriter {
		HashWriter::hash_mode()
	}
}

impl Writer for HashWriter {
	fn serialization_mode(&self) -> SerializationMode {
		self.mode
	}
	fn write_u8(&mut self, n: u8) -> Result<(), ser::Error> {
		self.state.update(&[n]);
		Ok(())
	}
	fn write_u16(&mut self, n: u16) -> Result<(), ser::Error> {
		self.state.update(&n.to_le_bytes());
		Ok(())
	}
	fn write_u32(&mut self, n: u32) -> Result<(), ser::Error> {
		self.state.update(&n.to_le_bytes());
		Ok(())
	}
	fn write_i32(&mut self, n: i32) -> Result<(), ser::Error> {
		self.state.update(&n.to_le_bytes());
		Ok(())
	}
	fn write_u64(&mut self, n: u64) -> Result<(), ser::Error> {
		self.state.update(&n.to_le_bytes());
		Ok(())
	}
	fn write_i64(&mut self, n: i64) -> Result<(), ser::Error> {
		self.state.update(&n.to_le_bytes());
		Ok(())
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), ser::Error> {
		self.state.update(bytes);
		Ok(())
	}
}

/// Double-SHA256 of a raw byte slice. Merkle interior nodes use this on
/// the 64-byte concatenation of their children.
pub fn double_sha256(data: &[u8]) -> Hash {
	let first = Sha256::digest(data);
	let second = Sha256::digest(&first);
	Hash::from_vec(&second)
}

/// A trait for types that have their identity hash taken over their
/// serialized form.
pub trait Hashed {
	/// Obtain the hash of the object
	fn hash(&self) -> Hash;
}

/// Implementing this empty trait gives a type the hash of its identity
/// (pre-witness) serialization via the blanket `Hashed` impl.
pub trait DefaultHashable: Writeable {}

impl<D: DefaultHashable> Hashed for D {
	fn hash(&self) -> Hash {
		let mut hasher = HashWriter::default();
		// hashing a vec cannot fail
		self.write(&mut hasher).unwrap();
		hasher.into_hash()
	}
}

/// A fast non-cryptographic hasher for maps keyed by `Hash` (or by types
/// built from one). Keys are already uniformly distributed, so the first
/// eight bytes written win.
#[derive(Default, Clone, Copy)]
pub struct ShortHasher(u64);

impl Hasher for ShortHasher {
	fn finish(&self) -> u64 {
		self.0
	}

	fn write(&mut self, bytes: &[u8]) {
		let mut word = [0u8; 8];
		let take = bytes.len().min(8);
		word[..take].copy_from_slice(&bytes[..take]);
		self.0 ^= u64::from_le_bytes(word);
	}
}

/// Map keyed by a hash, using the short hasher.
pub type ShortHashMap<K, V> = HashMap<K, V, BuildHasherDefault<ShortHasher>>;
/// Set of hash-like keys, using the short hasher.
pub type ShortHashSet<K> = HashSet<K, BuildHasherDefault<ShortHasher>>;
