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

//! The composable validation rule engine. A rule is a plain function plus
//! the soft-fork upgrade gating it, if any; a ruleset is a fixed ordered
//! array of rules evaluated left to right, short-circuiting on the first
//! failure. Rules hold no state of their own: everything they judge comes
//! in through their argument struct.

pub mod block;
pub mod header;
pub mod transaction;

pub use self::block::{
	validate_block_context, validate_block_structure, BlockArgs, BlockErrorKind, ContextArgs,
};
pub use self::header::{validate_header, HeaderArgs, HeaderErrorKind};
pub use self::transaction::{validate_transaction, TxArgs, TxErrorKind};

use crate::consensus::{is_bip_enabled, Bip};

/// A single validation rule: the check itself and the upgrade gating it.
/// A gated rule is skipped entirely while its upgrade is inactive.
pub struct Rule<F> {
	/// The check to run
	pub check: F,
	/// Upgrade that must be active for the check to apply
	pub bip: Option<Bip>,
}

/// Evaluates a ruleset against one subject at the given height. Rules run
/// in array order; the first failure is returned as-is.
pub fn validate<A, E, F>(rules: &[Rule<F>], args: &A, height: i32) -> Result<(), E>
where
	F: Fn(&A) -> Result<(), E>,
{
	for rule in rules {
		if let Some(bip) = rule.bip {
			if !is_bip_enabled(bip, height) {
				continue;
			}
		}
		(rule.check)(args)?;
	}
	Ok(())
}
