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

use std::collections::HashMap;

use kestrel_core::consensus::COIN;
use kestrel_core::core::block::Block;
use kestrel_core::core::hash::Hash;
use kestrel_core::core::header::BlockHeader;
use kestrel_core::core::target::CompactTarget;
use kestrel_core::core::transaction::{OutPoint, Transaction, TxInput, TxOutput, SEQUENCE_FINAL};
use kestrel_store::{IndexConfig, OutputKey, TableConfig, Utxo};
use tempfile::tempdir;

fn coinbase(height: i32) -> Transaction {
	Transaction {
		version: 1,
		inputs: vec![TxInput {
			prevout: OutPoint::null(),
			// salt the script so every coinbase txid is distinct
			script_sig: vec![
				0x04,
				height as u8,
				(height >> 8) as u8,
				(height >> 16) as u8,
				0x00,
			],
			sequence: SEQUENCE_FINAL,
			witness: vec![],
		}],
		outputs: vec![TxOutput {
			value: 50 * COIN,
			pk_script: vec![0x51],
		}],
		lock_time: 0,
	}
}

fn spend(prevouts: &[OutPoint], total: i64) -> Transaction {
	let half = total / 2;
	Transaction {
		version: 1,
		inputs: prevouts
			.iter()
			.map(|&prevout| TxInput {
				prevout,
				script_sig: vec![0x00],
				sequence: SEQUENCE_FINAL,
				witness: vec![],
			})
			.collect(),
		outputs: vec![
			TxOutput {
				value: half,
				pk_script: vec![0x52],
			},
			TxOutput {
				value: total - half,
				pk_script: vec![0x53],
			},
		],
		lock_time: 0,
	}
}

fn block_of(transactions: Vec<Transaction>) -> Block {
	Block {
		header: BlockHeader {
			version: 1,
			prev_hash: Hash([0; 32]),
			merkle_root: Hash([0; 32]),
			timestamp: 0,
			bits: CompactTarget::from_bits(0x1d00ffff),
			nonce: 0,
		},
		transactions,
	}
}

fn open_utxo(dir: &std::path::Path) -> Utxo {
	// small shards exercise routing even with few keys
	let index_config = IndexConfig {
		shard_bits: 3,
		..Default::default()
	};
	Utxo::open(dir, TableConfig::default(), index_config).unwrap()
}

/// A deterministic chain: every block's coinbase mints 50 coins and
/// spends the previous block's coinbase into two halves. Returns the
/// amounts of every output ever created.
fn build_chain(utxo: &Utxo, height: i32) -> HashMap<OutputKey, i64> {
	let mut amounts = HashMap::new();
	let mut prev_coinbase: Option<OutPoint> = None;
	for h in 0..height {
		let mut transactions = vec![coinbase(h)];
		if let Some(prev) = prev_coinbase {
			transactions.push(spend(&[prev], 50 * COIN));
		}
		let block = block_of(transactions);
		for tx in &block.transactions {
			let txid = tx.txid();
			for (i, output) in tx.outputs.iter().enumerate() {
				amounts.insert(
					OutPoint {
						txid,
						index: i as u32,
					},
					output.value,
				);
			}
		}
		prev_coinbase = Some(OutPoint {
			txid: block.transactions[0].txid(),
			index: 0,
		});
		utxo.connect_block(h, &block).unwrap();
	}
	amounts
}

#[test]
fn conservation_of_value() {
	kestrel_util::init_test_logger();
	let dir = tempdir().unwrap();
	let utxo = open_utxo(dir.path());
	let height = 20;
	let amounts = build_chain(&utxo, height);

	let mut keys: Vec<OutputKey> = amounts.keys().cloned().collect();
	keys.sort();
	let result = utxo.query(&keys, 0, height).unwrap();

	let unspent: i64 = keys
		.iter()
		.zip(result.rids.iter())
		.filter(|(_, rid)| rid.is_real())
		.map(|(key, _)| amounts[key])
		.sum();
	assert_eq!(unspent, i64::from(height) * 50 * COIN);

	// one coinbase spent per block after the first
	assert_eq!(result.spent as i32, height - 1);
}

#[test]
fn fetched_records_match_created_outputs() {
	kestrel_util::init_test_logger();
	let dir = tempdir().unwrap();
	let utxo = open_utxo(dir.path());
	let amounts = build_chain(&utxo, 6);

	let mut keys: Vec<OutputKey> = amounts.keys().cloned().collect();
	keys.sort();
	let result = utxo.query(&keys, 0, 6).unwrap();
	let (details, _scripts) = utxo
		.table()
		.fetch(&{
			let mut rids = result.rids.clone();
			rids.sort();
			rids
		})
		.unwrap();

	// every funded record carries the amount it was created with
	let mut fetched: Vec<i64> = details
		.iter()
		.filter(|d| d.is_present())
		.map(|d| d.amount)
		.collect();
	let mut expected: Vec<i64> = keys
		.iter()
		.zip(result.rids.iter())
		.filter(|(_, rid)| rid.is_real())
		.map(|(key, _)| amounts[key])
		.collect();
	fetched.sort();
	expected.sort();
	assert_eq!(fetched, expected);
}

#[test]
fn out_of_order_block_processing() {
	kestrel_util::init_test_logger();
	let dir = tempdir().unwrap();
	let utxo = open_utxo(dir.path());

	// blocks 0..=2 in order
	let b0 = block_of(vec![coinbase(0)]);
	let cb0 = OutPoint {
		txid: b0.transactions[0].txid(),
		index: 0,
	};
	utxo.connect_block(0, &b0).unwrap();

	let b1 = block_of(vec![coinbase(1)]);
	let cb1 = OutPoint {
		txid: b1.transactions[0].txid(),
		index: 0,
	};
	utxo.connect_block(1, &b1).unwrap();

	let b2 = block_of(vec![coinbase(2)]);
	let cb2 = OutPoint {
		txid: b2.transactions[0].txid(),
		index: 0,
	};
	utxo.connect_block(2, &b2).unwrap();

	// block 4 spends coinbases of blocks 2 and 3; block 3 not yet seen
	let b3 = block_of(vec![coinbase(3)]);
	let cb3 = OutPoint {
		txid: b3.transactions[0].txid(),
		index: 0,
	};
	let b4 = block_of(vec![
		coinbase(4),
		spend(&[cb2], 50 * COIN),
		spend(&[cb3], 50 * COIN),
	]);
	utxo.connect_block(4, &b4).unwrap();

	// querying b4's prevouts before block 3 arrives: partial result
	let mut keys = vec![cb2, cb3];
	keys.sort();
	let q = utxo.query(&keys, 0, 3).unwrap();
	assert_eq!(q.funded, 1, "only the block-2 coinbase is visible");
	assert_eq!(q.spent, 0);

	// block 3 lands late; the remainder window completes the picture
	utxo.connect_block(3, &b3).unwrap();
	let q = utxo.query(&[cb3], 3, 4).unwrap();
	assert_eq!(q.funded, 1);

	// with every block in, both prevouts report spent
	let q = utxo.query(&keys, 0, 6).unwrap();
	assert_eq!(q.spent, 2);
	assert_eq!(q.funded, 0);

	// untouched outputs stay funded
	let mut untouched = vec![cb0, cb1];
	untouched.sort();
	let q = utxo.query(&untouched, 0, 6).unwrap();
	assert_eq!(q.funded, 2);
}

#[test]
fn reorg_erase_and_replay() {
	kestrel_util::init_test_logger();
	let dir = tempdir().unwrap();
	let utxo = open_utxo(dir.path());

	let b0 = block_of(vec![coinbase(0)]);
	let cb0 = OutPoint {
		txid: b0.transactions[0].txid(),
		index: 0,
	};
	utxo.connect_block(0, &b0).unwrap();

	// block 1 spends the coinbase
	let b1 = block_of(vec![coinbase(1), spend(&[cb0], 50 * COIN)]);
	utxo.connect_block(1, &b1).unwrap();
	let q = utxo.query(&[cb0], 0, 2).unwrap();
	assert!(q.rids[0].is_spent());

	// the reorg replaces block 1 with one that leaves the coinbase alone
	utxo.erase_since(1);
	let q = utxo.query(&[cb0], 0, 2).unwrap();
	assert!(q.rids[0].is_real());

	let b1b = block_of(vec![coinbase(1001)]);
	utxo.connect_block(1, &b1b).unwrap();
	let q = utxo.query(&[cb0], 0, 2).unwrap();
	assert!(q.rids[0].is_real());

	// the replacement block's outputs resolve through the table
	let cb1b = OutPoint {
		txid: b1b.transactions[0].txid(),
		index: 0,
	};
	let q = utxo.query(&[cb1b], 0, 2).unwrap();
	assert_eq!(q.funded, 1);
	let (details, _) = utxo.table().fetch(&q.rids).unwrap();
	assert_eq!(details[0].amount, 50 * COIN);
	assert_eq!(details[0].height, 1);
}
