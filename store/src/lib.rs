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

//! The unspent-output database: an append-only record table split into
//! rotating segment files with an in-memory tail, and a sharded,
//! age-stratified key index with reorg-safe tombstones and background
//! compaction.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

extern crate kestrel_core as core;
extern crate kestrel_util as util;

pub mod age;
pub mod error;
pub mod index;
pub mod run;
pub mod segment;
pub mod table;
pub mod types;
pub mod utxo;

pub use crate::error::{Error, ErrorKind};
pub use crate::index::{IndexConfig, OutputIndex, QueryResult};
pub use crate::table::{OutputTable, TableConfig};
pub use crate::types::{OutputDetail, OutputId, OutputKV, OutputKey, OutputOp};
pub use crate::utxo::Utxo;
