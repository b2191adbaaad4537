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

//! Full blocks: a header plus its transactions, with the size, weight and
//! witness-commitment accessors the block rules need.

use crate::core::hash::{double_sha256, Hash};
use crate::core::header::BlockHeader;
use crate::core::merkle;
use crate::core::transaction::Transaction;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Prefix identifying the witness commitment output in a coinbase:
/// OP_RETURN, a 36-byte push, and the commitment magic.
const WITNESS_COMMITMENT_PREFIX: [u8; 6] = [0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];

/// A block as it travels on the wire.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
	/// The block header
	pub header: BlockHeader,
	/// All transactions, coinbase first
	pub transactions: Vec<Transaction>,
}

impl Block {
	/// Byte size of the pre-witness serialization, the size the legacy
	/// block limit applies to.
	pub fn base_size(&self) -> usize {
		ser::ser_size_hash_mode(self).unwrap()
	}

	/// Byte size of the full serialization, witnesses included.
	pub fn total_size(&self) -> usize {
		ser::ser_size(self).unwrap()
	}

	/// Block weight: three times the base size plus the total size.
	pub fn weight(&self) -> usize {
		self.base_size() * 3 + self.total_size()
	}

	/// Whether any transaction carries witness data.
	pub fn has_witness_data(&self) -> bool {
		self.transactions.iter().any(Transaction::has_witness)
	}

	/// The coinbase transaction, if the block has any transactions at all.
	pub fn coinbase(&self) -> Option<&Transaction> {
		self.transactions.first()
	}

	/// The witness nonce: the coinbase input's single 32-byte witness item.
	pub fn witness_nonce(&self) -> Option<Hash> {
		let coinbase = self.coinbase()?;
		let input = coinbase.inputs.first()?;
		if input.witness.len() == 1 && input.witness[0].len() == 32 {
			Some(Hash::from_vec(&input.witness[0]))
		} else {
			None
		}
	}

	/// The declared witness commitment: the last coinbase output whose
	/// script starts with the commitment prefix, per the upgrade rules.
	pub fn witness_commitment(&self) -> Option<Hash> {
		let coinbase = self.coinbase()?;
		for output in coinbase.outputs.iter().rev() {
			let script = &output.pk_script;
			if script.len() >= 38 && script[..6] == WITNESS_COMMITMENT_PREFIX {
				return Some(Hash::from_vec(&script[6..38]));
			}
		}
		None
	}

	/// Computes the witness commitment this block should carry for the
	/// given nonce: the witness merkle root hashed together with it.
	pub fn compute_witness_commitment(&self, nonce: &Hash) -> Hash {
		let root = merkle::witness_merkle_root(self);
		let mut buf = [0u8; 64];
		buf[..32].copy_from_slice(root.hash.as_bytes());
		buf[32..].copy_from_slice(nonce.as_bytes());
		double_sha256(&buf)
	}
}

impl Writeable for Block {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_varint(self.transactions.len() as u64)?;
		for tx in &self.transactions {
			tx.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Block {
	fn read(reader: &mut dyn Reader) -> Result<Block, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let count = reader.read_varint()?;
		if count > 1_000_000 {
			return Err(ser::Error::TooLargeReadErr);
		}
		let mut transactions = Vec::with_capacity(count.min(1024) as usize);
		for _ in 0..count {
			transactions.push(Transaction::read(reader)?);
		}
		Ok(Block {
			header,
			transactions,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::Hashed;
	use crate::core::target::CompactTarget;
	use crate::core::transaction::{OutPoint, TxInput, TxOutput, SEQUENCE_FINAL};

	fn test_block() -> Block {
		let coinbase = Transaction {
			version: 1,
			inputs: vec![TxInput {
				prevout: OutPoint::null(),
				script_sig: vec![0x01, 0x00],
				sequence: SEQUENCE_FINAL,
				witness: vec![],
			}],
			outputs: vec![TxOutput {
				value: 5_000_000_000,
				pk_script: vec![0x51],
			}],
			lock_time: 0,
		};
		let mut header = BlockHeader {
			version: 1,
			prev_hash: Hash([0; 32]),
			merkle_root: Hash([0; 32]),
			timestamp: 1231006505,
			bits: CompactTarget::from_bits(0x1d00ffff),
			nonce: 0,
		};
		header.merkle_root = coinbase.txid();
		Block {
			header,
			transactions: vec![coinbase],
		}
	}

	#[test]
	fn round_trip() {
		let block = test_block();
		let bytes = ser::ser_vec(&block).unwrap();
		let back: Block = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(back, block);
		assert_eq!(back.header.hash(), block.header.hash());
		assert_eq!(block.base_size(), bytes.len());
		assert_eq!(block.weight(), bytes.len() * 4);
	}

	#[test]
	fn witness_commitment_extraction() {
		let mut block = test_block();
		assert_eq!(block.witness_commitment(), None);
		assert_eq!(block.witness_nonce(), None);

		let mut script = vec![0u8; 38];
		script[..6].copy_from_slice(&WITNESS_COMMITMENT_PREFIX);
		script[6..].copy_from_slice(&[0xab; 32]);
		block.transactions[0].outputs.push(TxOutput {
			value: 0,
			pk_script: script,
		});
		block.transactions[0].inputs[0].witness = vec![vec![0u8; 32]];

		assert_eq!(block.witness_commitment(), Some(Hash([0xab; 32])));
		assert_eq!(block.witness_nonce(), Some(Hash([0; 32])));
	}
}
