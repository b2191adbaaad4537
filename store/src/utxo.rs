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

//! The spend pipeline: ties the record table and the key index together
//! into one unspent-output set. Connecting a block appends its outputs
//! to the table and publishes fund entries plus spend tombstones into
//! the index; a reorg erases both in lockstep.

use std::path::Path;

use crate::core::core::block::Block;

use crate::error::Error;
use crate::index::{IndexConfig, OutputIndex, QueryResult};
use crate::table::{OutputTable, TableConfig};
use crate::types::{OutputDetail, OutputId, OutputKV, OutputKey, OutputOp};

/// The unspent-output set: record table plus key index.
pub struct Utxo {
	table: OutputTable,
	index: OutputIndex,
	mutable_window: i32,
}

impl Utxo {
	/// Opens the table under `dir` and builds an empty index.
	pub fn open(
		dir: &Path,
		table_config: TableConfig,
		index_config: IndexConfig,
	) -> Result<Utxo, Error> {
		let mutable_window = table_config.mutable_window;
		Ok(Utxo {
			table: OutputTable::open(dir, table_config)?,
			index: OutputIndex::new(index_config)?,
			mutable_window,
		})
	}

	/// The record table.
	pub fn table(&self) -> &OutputTable {
		&self.table
	}

	/// The key index.
	pub fn index(&self) -> &OutputIndex {
		&self.index
	}

	/// Applies one block at the given height: all its outputs become
	/// funds, all its non-coinbase prevouts become spend tombstones.
	/// Blocks may arrive out of height order; the index keeps per-height
	/// runs either way.
	pub fn connect_block(&self, height: i32, block: &Block) -> Result<(), Error> {
		let mut entries: Vec<OutputKV> = vec![];
		self.table.append_block(height, block, &mut entries)?;

		for tx in &block.transactions {
			if tx.is_coinbase() {
				continue;
			}
			for input in &tx.inputs {
				entries.push(OutputKV {
					key: input.prevout,
					height,
					op: OutputOp::Delete,
					rid: OutputId::NULL,
				});
			}
		}
		entries.sort_by(|a, b| a.cmp_index(b));
		self.index.append(&entries)?;

		// everything below the mutable window is safe to compact
		self.index
			.set_retain_height(height + 1 - self.mutable_window);
		Ok(())
	}

	/// Reorg erase: drops table records and index entries at or above
	/// the given height.
	pub fn erase_since(&self, height: i32) {
		self.index.erase_since(height);
		self.table.erase_since(height);
	}

	/// Point-queries the index over `[since, before)` with a sorted key
	/// batch.
	pub fn query(
		&self,
		keys: &[OutputKey],
		since: i32,
		before: i32,
	) -> Result<QueryResult, Error> {
		self.index.query(keys, since, before)
	}

	/// Resolves and fetches the records funding a block's prevouts as of
	/// `height`: index lookup, then a batched table read. Returns the
	/// query outcome alongside the fetched details, which follow the
	/// sorted key order.
	pub fn fetch_prevouts(
		&self,
		block: &Block,
		height: i32,
	) -> Result<(QueryResult, Vec<OutputDetail>, Vec<u8>), Error> {
		let mut keys: Vec<OutputKey> = block
			.transactions
			.iter()
			.filter(|tx| !tx.is_coinbase())
			.flat_map(|tx| tx.inputs.iter().map(|input| input.prevout))
			.collect();
		keys.sort();
		keys.dedup();

		let query = self.index.query(&keys, 0, height)?;

		// fetch in offset order, then fold back into key order
		let mut order: Vec<usize> = (0..query.rids.len()).collect();
		order.sort_by_key(|&i| query.rids[i]);
		let sorted_rids: Vec<OutputId> = order.iter().map(|&i| query.rids[i]).collect();
		let (sorted_details, scripts) = self.table.fetch(&sorted_rids)?;
		let mut details = vec![OutputDetail::absent(); sorted_details.len()];
		for (slot, detail) in order.into_iter().zip(sorted_details) {
			details[slot] = detail;
		}
		Ok((query, details, scripts))
	}
}
