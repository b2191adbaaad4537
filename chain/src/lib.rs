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

//! The header timechain itself: maintains the single heaviest chain and a
//! bounded forest of competing branches, handles reorgs, and keeps
//! registered sidecars in lockstep.

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

mod chain;
pub mod error;
pub mod headers;
pub mod sidecar;
pub mod tree;
pub mod types;
pub mod view;

// Re-export the base interface
pub use crate::chain::{Timechain, TimechainConfig};
pub use crate::error::{Error, ErrorKind};
pub use crate::sidecar::{KeyframeSidecar, SharedSidecar, SidecarSync, StatusSidecar};
pub use crate::types::{AddSync, BlockValidationStatus, Locator, Position, Tip};
pub use crate::view::ChainView;
