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

//! Block validation in two phases. Structural rules judge the block in
//! isolation; contextual rules additionally see the block's height and an
//! ancestry view pinned at its parent.

use crate::consensus::{
	is_bip_enabled, median_time_past, Bip, MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_SIZE,
	MAX_BLOCK_WEIGHT, WITNESS_SCALE_FACTOR,
};
use crate::core::block::Block;
use crate::core::header::HeaderAncestryView;
use crate::core::merkle;
use crate::rules::transaction::{validate_transaction, TxErrorKind};
use crate::rules::Rule;

/// Ways a block can fail validation.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Fail)]
pub enum BlockErrorKind {
	/// Pre-witness serialization above the size limit
	#[fail(display = "Bad Size")]
	BadSize,
	/// No transactions at all
	#[fail(display = "Bad Transaction Count")]
	BadTransactionCount,
	/// Coinbase missing from index zero, or present elsewhere
	#[fail(display = "Bad CoinBase")]
	BadCoinBase,
	/// Coinbase script doesn't commit to the block height
	#[fail(display = "Bad CoinBase Height")]
	BadCoinBaseHeight,
	/// Header merkle root doesn't match the transactions, or the tree
	/// pairs identical siblings
	#[fail(display = "Bad Merkle Root")]
	BadMerkleRoot,
	/// A transaction failed its own ruleset
	#[fail(display = "Bad Transaction: {}", _0)]
	BadTransaction(TxErrorKind),
	/// Too many weighted signature operations
	#[fail(display = "Bad SigOp Count")]
	BadSigOpCount,
	/// A transaction isn't final at this height and time
	#[fail(display = "Non Final Transaction")]
	NonFinalTransaction,
	/// Witness data present without a usable nonce
	#[fail(display = "Bad Witness Nonce")]
	BadWitnessNonce,
	/// Witness commitment doesn't match the witness merkle root
	#[fail(display = "Bad Witness Merkle")]
	BadWitnessMerkle,
	/// Witness data in a block that commits to none
	#[fail(display = "Unexpected Witness")]
	UnexpectedWitness,
	/// Block weight above the limit
	#[fail(display = "Bad Block Weight")]
	BadBlockWeight,
}

/// Argument bundle for the structural block rules.
pub struct BlockArgs<'a> {
	/// Block under validation
	pub block: &'a Block,
	/// Height the block would occupy
	pub height: i32,
}

/// Argument bundle for the contextual block rules.
pub struct ContextArgs<'a> {
	/// Block under validation
	pub block: &'a Block,
	/// Height the block would occupy
	pub height: i32,
	/// Ancestry view pinned at the block's parent
	pub view: &'a dyn HeaderAncestryView,
}

type BlockRule = fn(&BlockArgs<'_>) -> Result<(), BlockErrorKind>;
type ContextRule = fn(&ContextArgs<'_>) -> Result<(), BlockErrorKind>;

/// The structural ruleset, in evaluation order.
pub const BLOCK_RULESET: [Rule<BlockRule>; 6] = [
	Rule {
		check: check_has_transactions,
		bip: None,
	},
	Rule {
		check: check_merkle_root,
		bip: None,
	},
	Rule {
		check: check_size,
		bip: None,
	},
	Rule {
		check: check_coinbase_position,
		bip: None,
	},
	Rule {
		check: check_transactions,
		bip: None,
	},
	Rule {
		check: check_sig_ops,
		bip: None,
	},
];

/// The contextual ruleset, in evaluation order.
pub const CONTEXT_RULESET: [Rule<ContextRule>; 6] = [
	Rule {
		check: check_finality,
		bip: None,
	},
	Rule {
		check: check_coinbase_height,
		bip: Some(Bip::Bip34),
	},
	Rule {
		check: check_witness_commitment,
		bip: Some(Bip::Bip141),
	},
	Rule {
		check: check_weight,
		bip: None,
	},
	Rule {
		check: check_coinbase_maturity,
		bip: None,
	},
	Rule {
		check: check_witness_scripts,
		bip: Some(Bip::Bip141),
	},
];

/// Runs the structural ruleset.
pub fn validate_block_structure(block: &Block, height: i32) -> Result<(), BlockErrorKind> {
	crate::rules::validate(&BLOCK_RULESET, &BlockArgs { block, height }, height)
}

/// Runs the contextual ruleset against an ancestry view pinned at the
/// block's parent.
pub fn validate_block_context(
	block: &Block,
	height: i32,
	view: &dyn HeaderAncestryView,
) -> Result<(), BlockErrorKind> {
	crate::rules::validate(
		&CONTEXT_RULESET,
		&ContextArgs {
			block,
			height,
			view,
		},
		height,
	)
}

fn check_has_transactions(args: &BlockArgs<'_>) -> Result<(), BlockErrorKind> {
	if args.block.transactions.is_empty() {
		return Err(BlockErrorKind::BadTransactionCount);
	}
	Ok(())
}

fn check_merkle_root(args: &BlockArgs<'_>) -> Result<(), BlockErrorKind> {
	let root = merkle::block_merkle_root(args.block);
	if !root.unique || root.hash != args.block.header.merkle_root {
		return Err(BlockErrorKind::BadMerkleRoot);
	}
	Ok(())
}

fn check_size(args: &BlockArgs<'_>) -> Result<(), BlockErrorKind> {
	if args.block.base_size() > MAX_BLOCK_SIZE {
		return Err(BlockErrorKind::BadSize);
	}
	Ok(())
}

fn check_coinbase_position(args: &BlockArgs<'_>) -> Result<(), BlockErrorKind> {
	let txs = &args.block.transactions;
	if !txs[0].is_coinbase() {
		return Err(BlockErrorKind::BadCoinBase);
	}
	if txs.iter().skip(1).any(|tx| tx.is_coinbase()) {
		return Err(BlockErrorKind::BadCoinBase);
	}
	Ok(())
}

fn check_transactions(args: &BlockArgs<'_>) -> Result<(), BlockErrorKind> {
	for tx in &args.block.transactions {
		validate_transaction(tx, args.height).map_err(BlockErrorKind::BadTransaction)?;
	}
	Ok(())
}

fn check_sig_ops(args: &BlockArgs<'_>) -> Result<(), BlockErrorKind> {
	let total: usize = args
		.block
		.transactions
		.iter()
		.map(|tx| tx.legacy_sig_ops())
		.sum();
	if total * WITNESS_SCALE_FACTOR > MAX_BLOCK_SIGOPS_COST {
		return Err(BlockErrorKind::BadSigOpCount);
	}
	Ok(())
}

fn check_finality(args: &ContextArgs<'_>) -> Result<(), BlockErrorKind> {
	let time_ref = if is_bip_enabled(Bip::Bip113, args.height) {
		median_time_past(args.view)
	} else {
		args.block.header.timestamp
	};
	for tx in &args.block.transactions {
		if !tx.is_final(args.height, time_ref) {
			return Err(BlockErrorKind::NonFinalTransaction);
		}
	}
	Ok(())
}

/// The minimal script-number push of a block height, as the coinbase of
/// every block since the height commitment activated must lead with.
pub fn height_push(height: i32) -> Vec<u8> {
	let mut num = vec![];
	let mut v = height as i64;
	while v > 0 {
		num.push((v & 0xff) as u8);
		v >>= 8;
	}
	if let Some(&last) = num.last() {
		if last & 0x80 != 0 {
			num.push(0);
		}
	}
	let mut script = vec![num.len() as u8];
	script.extend(num);
	script
}

fn check_coinbase_height(args: &ContextArgs<'_>) -> Result<(), BlockErrorKind> {
	let expected = height_push(args.height);
	let coinbase = match args.block.coinbase() {
		Some(tx) => tx,
		None => return Err(BlockErrorKind::BadCoinBaseHeight),
	};
	let script = &coinbase.inputs[0].script_sig;
	if script.len() < expected.len() || script[..expected.len()] != expected[..] {
		return Err(BlockErrorKind::BadCoinBaseHeight);
	}
	Ok(())
}

fn check_witness_commitment(args: &ContextArgs<'_>) -> Result<(), BlockErrorKind> {
	match args.block.witness_commitment() {
		Some(commitment) => {
			let nonce = args
				.block
				.witness_nonce()
				.ok_or(BlockErrorKind::BadWitnessNonce)?;
			if args.block.compute_witness_commitment(&nonce) != commitment {
				return Err(BlockErrorKind::BadWitnessMerkle);
			}
			Ok(())
		}
		None => {
			// a block committing to no witnesses may not carry any
			if args.block.has_witness_data() {
				return Err(BlockErrorKind::UnexpectedWitness);
			}
			Ok(())
		}
	}
}

fn check_weight(args: &ContextArgs<'_>) -> Result<(), BlockErrorKind> {
	if args.block.weight() > MAX_BLOCK_WEIGHT {
		return Err(BlockErrorKind::BadBlockWeight);
	}
	Ok(())
}

// TODO: needs the spend pipeline to surface creation heights of the
// spent outputs before the 100-block rule can be enforced here.
fn check_coinbase_maturity(_args: &ContextArgs<'_>) -> Result<(), BlockErrorKind> {
	Ok(())
}

// TODO: witness program execution needs the script runtime.
fn check_witness_scripts(_args: &ContextArgs<'_>) -> Result<(), BlockErrorKind> {
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::consensus::activation_height;
	use crate::core::hash::Hash;
	use crate::core::header::BlockHeader;
	use crate::core::target::CompactTarget;
	use crate::core::transaction::{OutPoint, Transaction, TxInput, TxOutput, SEQUENCE_FINAL};

	struct EmptyView;

	impl HeaderAncestryView for EmptyView {
		fn height(&self) -> i32 {
			0
		}
		fn timestamp_at(&self, _height: i32) -> Option<u32> {
			None
		}
		fn last_n_timestamps(&self, _n: usize) -> Vec<u32> {
			vec![1000]
		}
		fn bits_at(&self, _height: i32) -> Option<CompactTarget> {
			None
		}
	}

	fn coinbase_at(height: i32) -> Transaction {
		let mut script_sig = height_push(height);
		if script_sig.len() < 2 {
			script_sig.push(0);
		}
		Transaction {
			version: 1,
			inputs: vec![TxInput {
				prevout: OutPoint::null(),
				script_sig,
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

	fn block_at(height: i32, extra: Vec<Transaction>) -> Block {
		let mut transactions = vec![coinbase_at(height)];
		transactions.extend(extra);
		let mut header = BlockHeader {
			version: 4,
			prev_hash: Hash([2; 32]),
			merkle_root: Hash([0; 32]),
			timestamp: 2000,
			bits: CompactTarget::from_bits(0x1d00ffff),
			nonce: 0,
		};
		header.merkle_root = merkle::merkle_root(
			transactions.iter().map(|tx| tx.txid()).collect(),
		)
		.hash;
		Block {
			header,
			transactions,
		}
	}

	fn spend_of(txid: Hash) -> Transaction {
		Transaction {
			version: 1,
			inputs: vec![TxInput {
				prevout: OutPoint { txid, index: 0 },
				script_sig: vec![0x00],
				sequence: SEQUENCE_FINAL,
				witness: vec![],
			}],
			outputs: vec![TxOutput {
				value: 1000,
				pk_script: vec![0x51],
			}],
			lock_time: 0,
		}
	}

	#[test]
	fn accepts_a_minimal_block() {
		let block = block_at(1, vec![]);
		assert_eq!(validate_block_structure(&block, 1), Ok(()));
		assert_eq!(validate_block_context(&block, 1, &EmptyView), Ok(()));
	}

	#[test]
	fn rejects_empty_and_uncoinbased_blocks() {
		let mut block = block_at(1, vec![]);
		block.transactions.clear();
		assert_eq!(
			validate_block_structure(&block, 1),
			Err(BlockErrorKind::BadTransactionCount)
		);

		// a block whose first transaction isn't a coinbase
		let spend = spend_of(Hash([9; 32]));
		let mut block = block_at(1, vec![]);
		block.transactions = vec![spend];
		block.header.merkle_root = merkle::merkle_root(
			block.transactions.iter().map(|tx| tx.txid()).collect(),
		)
		.hash;
		assert_eq!(
			validate_block_structure(&block, 1),
			Err(BlockErrorKind::BadCoinBase)
		);

		// two coinbases
		let mut block = block_at(1, vec![coinbase_at(1)]);
		block.transactions[1].lock_time = 1; // distinct txid
		block.header.merkle_root = merkle::merkle_root(
			block.transactions.iter().map(|tx| tx.txid()).collect(),
		)
		.hash;
		assert_eq!(
			validate_block_structure(&block, 1),
			Err(BlockErrorKind::BadCoinBase)
		);
	}

	#[test]
	fn rejects_wrong_merkle_root() {
		let mut block = block_at(1, vec![]);
		block.header.merkle_root = Hash([0xee; 32]);
		assert_eq!(
			validate_block_structure(&block, 1),
			Err(BlockErrorKind::BadMerkleRoot)
		);
	}

	#[test]
	fn rejects_twin_transaction_pair() {
		// duplicating a transaction mutates the tree without changing the
		// root; the uniqueness bit catches it even when the root matches
		let spend = spend_of(Hash([9; 32]));
		let mut block = block_at(1, vec![]);
		block.transactions = vec![spend.clone(), spend];
		block.header.merkle_root = merkle::merkle_root(
			block.transactions.iter().map(|tx| tx.txid()).collect(),
		)
		.hash;
		let err = validate_block_structure(&block, 1);
		assert_eq!(err, Err(BlockErrorKind::BadMerkleRoot));
	}

	#[test]
	fn coinbase_height_commitment_gated() {
		let active = activation_height(Bip::Bip34);

		// wrong height in the coinbase: caught once the gate is active
		let block = block_at(active + 1, vec![]);
		assert_eq!(
			validate_block_context(&block, active + 1, &EmptyView),
			Ok(())
		);

		let mut wrong = block_at(active + 1, vec![]);
		wrong.transactions[0].inputs[0].script_sig = height_push(active + 2);
		wrong.header.merkle_root = merkle::merkle_root(
			wrong.transactions.iter().map(|tx| tx.txid()).collect(),
		)
		.hash;
		assert_eq!(
			validate_block_context(&wrong, active + 1, &EmptyView),
			Err(BlockErrorKind::BadCoinBaseHeight)
		);

		// below the gate nobody cares what the script says
		let mut old = block_at(100, vec![]);
		old.transactions[0].inputs[0].script_sig = vec![0xde, 0xad];
		assert_eq!(validate_block_context(&old, 100, &EmptyView), Ok(()));
	}

	#[test]
	fn finality_uses_block_time_before_mtp() {
		let mut block = block_at(1, vec![spend_of(Hash([9; 32]))]);
		// non-final: locktime in the future, sequence not final
		block.transactions[1].lock_time = 100;
		block.transactions[1].inputs[0].sequence = 0;
		block.header.merkle_root = merkle::merkle_root(
			block.transactions.iter().map(|tx| tx.txid()).collect(),
		)
		.hash;
		assert_eq!(
			validate_block_context(&block, 1, &EmptyView),
			Err(BlockErrorKind::NonFinalTransaction)
		);
	}

	#[test]
	fn witness_rules_gated_on_activation() {
		let active = activation_height(Bip::Bip141);

		// witness data with no commitment: fine before the gate...
		let mut early = block_at(300_000, vec![spend_of(Hash([9; 32]))]);
		early.transactions[1].inputs[0].witness = vec![vec![1]];
		assert_eq!(validate_block_context(&early, 300_000, &EmptyView), Ok(()));

		// ...fatal after it
		let mut late = block_at(active + 1, vec![spend_of(Hash([9; 32]))]);
		late.transactions[1].inputs[0].witness = vec![vec![1]];
		assert_eq!(
			validate_block_context(&late, active + 1, &EmptyView),
			Err(BlockErrorKind::UnexpectedWitness)
		);
	}

	#[test]
	fn witness_commitment_checked_when_present() {
		let active = activation_height(Bip::Bip141);
		let mut block = block_at(active + 1, vec![spend_of(Hash([9; 32]))]);
		block.transactions[1].inputs[0].witness = vec![vec![1, 2, 3]];
		// nonce on the coinbase input
		block.transactions[0].inputs[0].witness = vec![vec![0u8; 32]];

		// commit to the real witness root
		let commitment = block.compute_witness_commitment(&Hash([0; 32]));
		let mut script = vec![0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];
		script.extend_from_slice(commitment.as_bytes());
		block.transactions[0].outputs.push(TxOutput {
			value: 0,
			pk_script: script,
		});
		assert_eq!(
			validate_block_context(&block, active + 1, &EmptyView),
			Ok(())
		);

		// flip a witness byte: the commitment no longer matches
		block.transactions[1].inputs[0].witness = vec![vec![1, 2, 4]];
		assert_eq!(
			validate_block_context(&block, active + 1, &EmptyView),
			Err(BlockErrorKind::BadWitnessMerkle)
		);
	}
}
