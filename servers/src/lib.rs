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

//! Synchronization workers driving the timechain and the block pipeline
//! from peer-supplied data, plus the notification plumbing they report
//! through. Peers themselves are abstract here: wire framing, sockets
//! and message codecs live with the caller.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

extern crate kestrel_chain as chain;
extern crate kestrel_core as core;
extern crate kestrel_util as util;

pub mod common;
pub mod sync;

pub use crate::common::hooks::{
	LogSink, Notification, NotificationKind, NotificationSink, QueuedSink, Value,
};
pub use crate::common::types::{HeaderBatch, OnComplete, PeerTag, SyncConfig, SyncPeer};
pub use crate::sync::block_sync::BlockSyncer;
pub use crate::sync::header_sync::HeaderSyncer;
