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

//! Context-free transaction validation rules: structure, value ranges and
//! input sanity. Anything needing the chain (prevout existence, maturity,
//! scripts) lives with the block rules or the spend pipeline.

use crate::consensus::{
	COINBASE_SCRIPT_SIG_MAX, COINBASE_SCRIPT_SIG_MIN, MAX_BLOCK_SIZE, MAX_MONEY,
};
use crate::core::hash::ShortHashSet;
use crate::core::transaction::{OutPoint, Transaction};
use crate::rules::Rule;

/// Ways a transaction can fail validation.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Fail)]
pub enum TxErrorKind {
	/// No inputs at all
	#[fail(display = "Empty Inputs")]
	EmptyInputs,
	/// No outputs at all
	#[fail(display = "Empty Outputs")]
	EmptyOutputs,
	/// Pre-witness serialization above the block size limit
	#[fail(display = "Oversized Byte Count")]
	OversizedByteCount,
	/// An output with a negative value
	#[fail(display = "Negative Output Value")]
	NegativeOutputValue,
	/// An output above the supply cap
	#[fail(display = "Oversized Output Value")]
	OversizedOutputValue,
	/// Outputs summing above the supply cap
	#[fail(display = "Oversized Total Output Values")]
	OversizedTotalOutputValues,
	/// Two inputs spending the same outpoint
	#[fail(display = "Duplicated Input")]
	DuplicatedInput,
	/// A non-coinbase input spending the null outpoint
	#[fail(display = "Null Previous Output")]
	NullPreviousOutput,
	/// Coinbase signature script outside its length bounds
	#[fail(display = "Bad CoinBase Signature Script Size")]
	BadCoinBaseSignatureScriptSize,
}

/// Argument bundle for the transaction rules.
pub struct TxArgs<'a> {
	/// Transaction under validation
	pub tx: &'a Transaction,
}

type TxRule = fn(&TxArgs<'_>) -> Result<(), TxErrorKind>;

/// The transaction ruleset, in evaluation order.
pub const TX_RULESET: [Rule<TxRule>; 7] = [
	Rule {
		check: check_has_inputs,
		bip: None,
	},
	Rule {
		check: check_has_outputs,
		bip: None,
	},
	Rule {
		check: check_size,
		bip: None,
	},
	Rule {
		check: check_output_values,
		bip: None,
	},
	Rule {
		check: check_distinct_inputs,
		bip: None,
	},
	Rule {
		check: check_coinbase_script_size,
		bip: None,
	},
	Rule {
		check: check_prevouts_not_null,
		bip: None,
	},
];

/// Runs the full transaction ruleset. Transaction rules carry no upgrade
/// gates; the height only feeds the shared engine.
pub fn validate_transaction(tx: &Transaction, height: i32) -> Result<(), TxErrorKind> {
	crate::rules::validate(&TX_RULESET, &TxArgs { tx }, height)
}

fn check_has_inputs(args: &TxArgs<'_>) -> Result<(), TxErrorKind> {
	if args.tx.inputs.is_empty() {
		return Err(TxErrorKind::EmptyInputs);
	}
	Ok(())
}

fn check_has_outputs(args: &TxArgs<'_>) -> Result<(), TxErrorKind> {
	if args.tx.outputs.is_empty() {
		return Err(TxErrorKind::EmptyOutputs);
	}
	Ok(())
}

fn check_size(args: &TxArgs<'_>) -> Result<(), TxErrorKind> {
	if args.tx.serialized_size() > MAX_BLOCK_SIZE {
		return Err(TxErrorKind::OversizedByteCount);
	}
	Ok(())
}

fn check_output_values(args: &TxArgs<'_>) -> Result<(), TxErrorKind> {
	let mut total: i64 = 0;
	for output in &args.tx.outputs {
		if output.value < 0 {
			return Err(TxErrorKind::NegativeOutputValue);
		}
		if output.value > MAX_MONEY {
			return Err(TxErrorKind::OversizedOutputValue);
		}
		total = total
			.checked_add(output.value)
			.ok_or(TxErrorKind::OversizedTotalOutputValues)?;
		if total > MAX_MONEY {
			return Err(TxErrorKind::OversizedTotalOutputValues);
		}
	}
	Ok(())
}

fn check_distinct_inputs(args: &TxArgs<'_>) -> Result<(), TxErrorKind> {
	let mut seen: ShortHashSet<OutPoint> = ShortHashSet::default();
	for input in &args.tx.inputs {
		if !seen.insert(input.prevout) {
			return Err(TxErrorKind::DuplicatedInput);
		}
	}
	Ok(())
}

fn check_coinbase_script_size(args: &TxArgs<'_>) -> Result<(), TxErrorKind> {
	if args.tx.is_coinbase() {
		let len = args.tx.inputs[0].script_sig.len();
		if len < COINBASE_SCRIPT_SIG_MIN || len > COINBASE_SCRIPT_SIG_MAX {
			return Err(TxErrorKind::BadCoinBaseSignatureScriptSize);
		}
	}
	Ok(())
}

fn check_prevouts_not_null(args: &TxArgs<'_>) -> Result<(), TxErrorKind> {
	if args.tx.is_coinbase() {
		return Ok(());
	}
	for input in &args.tx.inputs {
		if input.prevout.is_null() {
			return Err(TxErrorKind::NullPreviousOutput);
		}
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::Hash;
	use crate::core::transaction::{TxInput, TxOutput, SEQUENCE_FINAL};

	fn input(prevout: OutPoint) -> TxInput {
		TxInput {
			prevout,
			script_sig: vec![0x00, 0x00],
			sequence: SEQUENCE_FINAL,
			witness: vec![],
		}
	}

	fn output(value: i64) -> TxOutput {
		TxOutput {
			value,
			pk_script: vec![0x51],
		}
	}

	fn spend() -> Transaction {
		Transaction {
			version: 1,
			inputs: vec![input(OutPoint {
				txid: Hash([1; 32]),
				index: 0,
			})],
			outputs: vec![output(1000)],
			lock_time: 0,
		}
	}

	#[test]
	fn accepts_a_plain_spend() {
		assert_eq!(validate_transaction(&spend(), 0), Ok(()));
	}

	#[test]
	fn rejects_empty_sides() {
		let mut tx = spend();
		tx.inputs.clear();
		assert_eq!(validate_transaction(&tx, 0), Err(TxErrorKind::EmptyInputs));

		let mut tx = spend();
		tx.outputs.clear();
		assert_eq!(validate_transaction(&tx, 0), Err(TxErrorKind::EmptyOutputs));
	}

	#[test]
	fn rejects_value_ranges() {
		let mut tx = spend();
		tx.outputs[0].value = -1;
		assert_eq!(
			validate_transaction(&tx, 0),
			Err(TxErrorKind::NegativeOutputValue)
		);

		let mut tx = spend();
		tx.outputs[0].value = MAX_MONEY + 1;
		assert_eq!(
			validate_transaction(&tx, 0),
			Err(TxErrorKind::OversizedOutputValue)
		);

		let mut tx = spend();
		tx.outputs = vec![output(MAX_MONEY), output(1)];
		assert_eq!(
			validate_transaction(&tx, 0),
			Err(TxErrorKind::OversizedTotalOutputValues)
		);
	}

	#[test]
	fn rejects_duplicate_and_null_inputs() {
		let prev = OutPoint {
			txid: Hash([1; 32]),
			index: 7,
		};
		let mut tx = spend();
		tx.inputs = vec![input(prev), input(prev)];
		assert_eq!(
			validate_transaction(&tx, 0),
			Err(TxErrorKind::DuplicatedInput)
		);

		let mut tx = spend();
		tx.inputs.push(input(OutPoint::null()));
		assert_eq!(
			validate_transaction(&tx, 0),
			Err(TxErrorKind::NullPreviousOutput)
		);
	}

	#[test]
	fn coinbase_script_bounds() {
		let mut coinbase = Transaction {
			version: 1,
			inputs: vec![input(OutPoint::null())],
			outputs: vec![output(5_000_000_000)],
			lock_time: 0,
		};
		assert_eq!(validate_transaction(&coinbase, 0), Ok(()));

		coinbase.inputs[0].script_sig = vec![0x00];
		assert_eq!(
			validate_transaction(&coinbase, 0),
			Err(TxErrorKind::BadCoinBaseSignatureScriptSize)
		);

		coinbase.inputs[0].script_sig = vec![0x00; 101];
		assert_eq!(
			validate_transaction(&coinbase, 0),
			Err(TxErrorKind::BadCoinBaseSignatureScriptSize)
		);
	}
}
