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

//! Core types: headers, transactions, blocks, hashes, targets and the
//! arithmetic underneath them.

pub mod bigint;
pub mod block;
pub mod hash;
pub mod header;
pub mod merkle;
pub mod target;
pub mod transaction;

pub use self::bigint::BigUint256;
pub use self::block::Block;
pub use self::hash::{Hash, Hashed, ShortHashMap, ShortHashSet, ZERO_HASH};
pub use self::header::{BlockHeader, HeaderAncestryView, HeaderContext};
pub use self::merkle::{block_merkle_root, merkle_root, witness_merkle_root, MerkleRoot};
pub use self::target::{CompactTarget, Work};
pub use self::transaction::{OutPoint, Transaction, TxInput, TxOutput};
