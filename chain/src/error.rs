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

//! Error types for the timechain
use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};

use crate::core::rules::{BlockErrorKind, HeaderErrorKind};

/// Error definition
#[derive(Debug, Fail)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Timechain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// No known header matches the claimed parent
	#[fail(display = "Parent Not Found")]
	ParentNotFound,
	/// A header failed its ruleset
	#[fail(display = "Invalid Header: {}", _0)]
	InvalidHeader(HeaderErrorKind),
	/// A block failed its ruleset
	#[fail(display = "Invalid Block: {}", _0)]
	InvalidBlock(BlockErrorKind),
	/// A locator pointing outside the chain or the forest
	#[fail(display = "Out of Range: {}", _0)]
	OutOfRange(String),
	/// Anything else
	#[fail(display = "Other Error: {}", _0)]
	Other(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.inner, f)
	}
}

impl Error {
	/// get kind
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// get cause
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// get backtrace
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<HeaderErrorKind> for Error {
	fn from(kind: HeaderErrorKind) -> Error {
		Error {
			inner: Context::new(ErrorKind::InvalidHeader(kind)),
		}
	}
}

impl From<BlockErrorKind> for Error {
	fn from(kind: BlockErrorKind) -> Error {
		Error {
			inner: Context::new(ErrorKind::InvalidBlock(kind)),
		}
	}
}
