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

//! Transactions and their building blocks. The codec understands both the
//! legacy and the witness-bearing serialization; a transaction's identity
//! (txid) is always taken over the pre-witness form.

use crate::core::hash::{Hash, HashWriter, ZERO_HASH};
use crate::ser::{self, Readable, Reader, SerializationMode, Writeable, Writer};

/// Locktime values below this are block heights, above it unix times.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number that exempts an input from locktime.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// A reference to a specific transaction output.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct OutPoint {
	/// Transaction the output was created in
	pub txid: Hash,
	/// Index of the output within that transaction
	pub index: u32,
}

impl OutPoint {
	/// The null outpoint, only valid in a coinbase input.
	pub fn null() -> OutPoint {
		OutPoint {
			txid: ZERO_HASH,
			index: u32::max_value(),
		}
	}

	/// Whether this is the null outpoint.
	pub fn is_null(&self) -> bool {
		self.txid == ZERO_HASH && self.index == u32::max_value()
	}
}

impl Writeable for OutPoint {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.txid.write(writer)?;
		writer.write_u32(self.index)
	}
}

impl Readable for OutPoint {
	fn read(reader: &mut dyn Reader) -> Result<OutPoint, ser::Error> {
		Ok(OutPoint {
			txid: Hash::read(reader)?,
			index: reader.read_u32()?,
		})
	}
}

/// A transaction input spending a previous output.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxInput {
	/// The output being spent
	pub prevout: OutPoint,
	/// Unlocking script
	pub script_sig: Vec<u8>,
	/// Relative locktime / replacement counter
	pub sequence: u32,
	/// Witness stack, empty for non-witness spends
	pub witness: Vec<Vec<u8>>,
}

impl Writeable for TxInput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.prevout.write(writer)?;
		writer.write_bytes(&self.script_sig)?;
		writer.write_u32(self.sequence)
	}
}

impl Readable for TxInput {
	fn read(reader: &mut dyn Reader) -> Result<TxInput, ser::Error> {
		Ok(TxInput {
			prevout: OutPoint::read(reader)?,
			script_sig: reader.read_bytes_len_prefix()?,
			sequence: reader.read_u32()?,
			witness: vec![],
		})
	}
}

/// A transaction output carrying value to a locking script.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxOutput {
	/// Amount in the base unit. Signed so range rules can reject
	/// deserialized negatives rather than have them wrap.
	pub value: i64,
	/// Locking script
	pub pk_script: Vec<u8>,
}

impl Writeable for TxOutput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i64(self.value)?;
		writer.write_bytes(&self.pk_script)
	}
}

impl Readable for TxOutput {
	fn read(reader: &mut dyn Reader) -> Result<TxOutput, ser::Error> {
		Ok(TxOutput {
			value: reader.read_i64()?,
			pk_script: reader.read_bytes_len_prefix()?,
		})
	}
}

/// A full transaction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
	/// Transaction format version
	pub version: i32,
	/// Outputs being consumed
	pub inputs: Vec<TxInput>,
	/// Outputs being created
	pub outputs: Vec<TxOutput>,
	/// Earliest block height or time this transaction may be mined at
	pub lock_time: u32,
}

/// Upper bound on deserialized collection counts. A consensus-valid
/// transaction stays far below this; it only bounds allocation.
const MAX_PARSE_ITEMS: u64 = 1_000_000;

impl Transaction {
	/// Whether this transaction creates new supply: a single input
	/// spending the null outpoint.
	pub fn is_coinbase(&self) -> bool {
		self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
	}

	/// Whether any input carries witness data.
	pub fn has_witness(&self) -> bool {
		self.inputs.iter().any(|input| !input.witness.is_empty())
	}

	/// The transaction identity: double-SHA256 of the pre-witness form.
	pub fn txid(&self) -> Hash {
		let mut hasher = HashWriter::hash_mode();
		self.write(&mut hasher).unwrap();
		hasher.into_hash()
	}

	/// Hash of the full serialization, witnesses included. Equal to the
	/// txid for a transaction without witnesses.
	pub fn wtxid(&self) -> Hash {
		let mut hasher = HashWriter::full_mode();
		self.write(&mut hasher).unwrap();
		hasher.into_hash()
	}

	/// Byte size of the pre-witness serialization.
	pub fn serialized_size(&self) -> usize {
		ser::ser_size_hash_mode(self).unwrap()
	}

	/// Byte size of the full serialization.
	pub fn total_size(&self) -> usize {
		ser::ser_size(self).unwrap()
	}

	/// Weight: three times the pre-witness size plus the full size.
	pub fn weight(&self) -> usize {
		self.serialized_size() * 3 + self.total_size()
	}

	/// Whether the transaction is final with respect to a block at
	/// `height` whose locktime reference point is `time_ref`.
	pub fn is_final(&self, height: i32, time_ref: u32) -> bool {
		if self.lock_time == 0 {
			return true;
		}
		let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
			height as i64
		} else {
			i64::from(time_ref)
		};
		if i64::from(self.lock_time) < cutoff {
			return true;
		}
		self.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
	}

	/// Legacy signature-operation count over all unlocking and locking
	/// scripts, the pre-witness accounting the block limit applies to.
	pub fn legacy_sig_ops(&self) -> usize {
		let inputs = self
			.inputs
			.iter()
			.map(|input| count_sig_ops(&input.script_sig));
		let outputs = self
			.outputs
			.iter()
			.map(|output| count_sig_ops(&output.pk_script));
		inputs.chain(outputs).sum()
	}
}

impl Writeable for Transaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		let with_witness =
			writer.serialization_mode() == SerializationMode::Full && self.has_witness();
		writer.write_i32(self.version)?;
		if with_witness {
			// marker and flag distinguishing the extended form
			writer.write_u8(0x00)?;
			writer.write_u8(0x01)?;
		}
		writer.write_varint(self.inputs.len() as u64)?;
		for input in &self.inputs {
			input.write(writer)?;
		}
		writer.write_varint(self.outputs.len() as u64)?;
		for output in &self.outputs {
			output.write(writer)?;
		}
		if with_witness {
			for input in &self.inputs {
				writer.write_varint(input.witness.len() as u64)?;
				for item in &input.witness {
					writer.write_bytes(item)?;
				}
			}
		}
		writer.write_u32(self.lock_time)
	}
}

impl Readable for Transaction {
	fn read(reader: &mut dyn Reader) -> Result<Transaction, ser::Error> {
		let version = reader.read_i32()?;
		let mut count = reader.read_varint()?;
		let mut extended = false;
		if count == 0 {
			// marker byte was zero: the witness flag must follow
			reader.expect_u8(0x01)?;
			extended = true;
			count = reader.read_varint()?;
		}
		if count > MAX_PARSE_ITEMS {
			return Err(ser::Error::TooLargeReadErr);
		}
		let mut inputs = Vec::with_capacity(count.min(1024) as usize);
		for _ in 0..count {
			inputs.push(TxInput::read(reader)?);
		}
		let out_count = reader.read_varint()?;
		if out_count > MAX_PARSE_ITEMS {
			return Err(ser::Error::TooLargeReadErr);
		}
		let mut outputs = Vec::with_capacity(out_count.min(1024) as usize);
		for _ in 0..out_count {
			outputs.push(TxOutput::read(reader)?);
		}
		if extended {
			let mut any = false;
			for input in inputs.iter_mut() {
				let items = reader.read_varint()?;
				if items > MAX_PARSE_ITEMS {
					return Err(ser::Error::TooLargeReadErr);
				}
				for _ in 0..items {
					input.witness.push(reader.read_bytes_len_prefix()?);
					any = true;
				}
			}
			// the extended form with no witness at all re-encodes as
			// legacy; reject the ambiguity
			if !any {
				return Err(ser::Error::CorruptedData);
			}
		}
		let lock_time = reader.read_u32()?;
		Ok(Transaction {
			version,
			inputs,
			outputs,
			lock_time,
		})
	}
}

// script opcodes the sig-op scan cares about
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKSIGVERIFY: u8 = 0xad;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Counts signature operations in a script without executing it. Walks
/// push opcodes so data bytes are never misread as operators; a malformed
/// trailing push simply ends the scan, matching the accounting the block
/// limit has always used.
pub fn count_sig_ops(script: &[u8]) -> usize {
	let mut count = 0;
	let mut i = 0;
	while i < script.len() {
		let op = script[i];
		i += 1;
		match op {
			0x01..=0x4b => i += op as usize,
			OP_PUSHDATA1 => {
				if i >= script.len() {
					break;
				}
				i += 1 + script[i] as usize;
			}
			OP_PUSHDATA2 => {
				if i + 1 >= script.len() {
					break;
				}
				let len = u16::from_le_bytes([script[i], script[i + 1]]) as usize;
				i += 2 + len;
			}
			OP_PUSHDATA4 => {
				if i + 3 >= script.len() {
					break;
				}
				let len = u32::from_le_bytes([
					script[i],
					script[i + 1],
					script[i + 2],
					script[i + 3],
				]) as usize;
				i += 4 + len;
			}
			OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
			OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => count += 20,
			_ => {}
		}
	}
	count
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ser;

	fn coinbase(height_script: Vec<u8>) -> Transaction {
		Transaction {
			version: 1,
			inputs: vec![TxInput {
				prevout: OutPoint::null(),
				script_sig: height_script,
				sequence: SEQUENCE_FINAL,
				witness: vec![],
			}],
			outputs: vec![TxOutput {
				value: 5_000_000_000,
				pk_script: vec![0x51],
			}],
			lock_time: 0,
		}
	}

	fn spend(prev: OutPoint) -> Transaction {
		Transaction {
			version: 1,
			inputs: vec![TxInput {
				prevout: prev,
				script_sig: vec![0x00],
				sequence: SEQUENCE_FINAL,
				witness: vec![],
			}],
			outputs: vec![TxOutput {
				value: 4_000_000_000,
				pk_script: vec![0x51],
			}],
			lock_time: 0,
		}
	}

	#[test]
	fn coinbase_detection() {
		assert!(coinbase(vec![1, 2]).is_coinbase());
		let other = spend(OutPoint {
			txid: Hash([9; 32]),
			index: 0,
		});
		assert!(!other.is_coinbase());
	}

	#[test]
	fn legacy_round_trip() {
		let tx = spend(OutPoint {
			txid: Hash([5; 32]),
			index: 1,
		});
		let bytes = ser::ser_vec(&tx).unwrap();
		let back: Transaction = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(back, tx);
		assert_eq!(tx.serialized_size(), bytes.len());
		assert_eq!(tx.total_size(), bytes.len());
		assert_eq!(tx.weight(), bytes.len() * 4);
	}

	#[test]
	fn witness_round_trip_and_txid() {
		let mut tx = spend(OutPoint {
			txid: Hash([5; 32]),
			index: 1,
		});
		let plain_txid = tx.txid();
		tx.inputs[0].witness = vec![vec![1, 2, 3], vec![4]];

		let bytes = ser::ser_vec(&tx).unwrap();
		// marker + flag follow the version
		assert_eq!(bytes[4], 0x00);
		assert_eq!(bytes[5], 0x01);
		let back: Transaction = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(back, tx);

		// witness data doesn't change identity, but does change the wtxid
		assert_eq!(tx.txid(), plain_txid);
		assert_ne!(tx.wtxid(), plain_txid);
		assert!(tx.total_size() > tx.serialized_size());
	}

	#[test]
	fn finality() {
		let mut tx = spend(OutPoint {
			txid: Hash([5; 32]),
			index: 1,
		});
		assert!(tx.is_final(0, 0));

		tx.lock_time = 100;
		tx.inputs[0].sequence = 0;
		assert!(tx.is_final(101, 0));
		assert!(!tx.is_final(100, 0));

		tx.lock_time = LOCKTIME_THRESHOLD + 50;
		assert!(tx.is_final(0, LOCKTIME_THRESHOLD + 51));
		assert!(!tx.is_final(0, LOCKTIME_THRESHOLD + 50));

		// final sequences override the locktime
		tx.inputs[0].sequence = SEQUENCE_FINAL;
		assert!(tx.is_final(0, 0));
	}

	#[test]
	fn sig_op_counting() {
		assert_eq!(count_sig_ops(&[OP_CHECKSIG]), 1);
		assert_eq!(count_sig_ops(&[OP_CHECKMULTISIG]), 20);
		// checksig byte hidden inside a push is data, not an operator
		assert_eq!(count_sig_ops(&[0x01, OP_CHECKSIG]), 0);
		assert_eq!(
			count_sig_ops(&[OP_PUSHDATA1, 0x01, OP_CHECKSIG, OP_CHECKSIGVERIFY]),
			1
		);
		// truncated push ends the scan
		assert_eq!(count_sig_ops(&[OP_PUSHDATA2, 0x05]), 0);
	}
}
