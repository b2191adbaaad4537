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

//! Serialization and deserialization layer specialized for binary encoding.
//! Ensures consistency and safety for the consensus-critical wire forms.
//!
//! All integers are little-endian on the wire. Collection lengths use the
//! variable-size integer encoding (1, 3, 5 or 9 bytes, minimal form
//! required).
//!
//! To use it simply implement `Writeable` or `Readable` and then use the
//! `serialize` or `deserialize` functions on them as appropriate.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};

/// Largest single byte-vector the reader will allocate for. Nothing in a
/// consensus-valid message exceeds the maximum base block size.
const MAX_READ_BYTES: u64 = 1_000_000;

/// Possible errors deriving from serializing or deserializing.
#[derive(Debug)]
pub enum Error {
	/// Wraps an io error produced when reading or writing
	IOErr(String, io::ErrorKind),
	/// Expected a given value that wasn't found
	UnexpectedData {
		/// What we wanted
		expected: Vec<u8>,
		/// What we got
		received: Vec<u8>,
	},
	/// Data wasn't in a consumable format
	CorruptedData,
	/// When asked to read too much data
	TooLargeReadErr,
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOErr(format!("{}", e), e.kind())
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			Error::IOErr(ref e, ref _k) => write!(f, "{}", e),
			Error::UnexpectedData {
				expected: ref e,
				received: ref r,
			} => write!(f, "expected {:?}, got {:?}", e, r),
			Error::CorruptedData => f.write_str("corrupted data"),
			Error::TooLargeReadErr => f.write_str("too large read"),
		}
	}
}

impl std::error::Error for Error {}

/// Signal to a serializable object how much of its data should be serialized
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SerializationMode {
	/// Serialize everything sufficiently to fully reconstruct the object
	Full,
	/// Serialize the data that defines the object's identity. For a
	/// transaction this is the pre-witness form that its txid is taken
	/// over.
	Hash,
}

/// Implementations defined how different numbers and binary structures are
/// written to an underlying stream or container (depending on implementation).
pub trait Writer {
	/// The mode this serializer is writing in
	fn serialization_mode(&self) -> SerializationMode;

	/// Writes a u8 as bytes
	fn write_u8(&mut self, n: u8) -> Result<(), Error>;
	/// Writes a u16 as bytes
	fn write_u16(&mut self, n: u16) -> Result<(), Error>;
	/// Writes a u32 as bytes
	fn write_u32(&mut self, n: u32) -> Result<(), Error>;
	/// Writes a i32 as bytes
	fn write_i32(&mut self, n: i32) -> Result<(), Error>;
	/// Writes a u64 as bytes
	fn write_u64(&mut self, n: u64) -> Result<(), Error>;
	/// Writes a i64 as bytes
	fn write_i64(&mut self, n: i64) -> Result<(), Error>;

	/// Writes a variable-size integer in its minimal encoding.
	fn write_varint(&mut self, n: u64) -> Result<(), Error> {
		if n < 0xfd {
			self.write_u8(n as u8)
		} else if n <= 0xffff {
			self.write_u8(0xfd)?;
			self.write_u16(n as u16)
		} else if n <= 0xffff_ffff {
			self.write_u8(0xfe)?;
			self.write_u32(n as u32)
		} else {
			self.write_u8(0xff)?;
			self.write_u64(n)
		}
	}

	/// Writes a variable length byte vector prefixed with its varint length.
	fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.write_varint(bytes.len() as u64)?;
		self.write_fixed_bytes(bytes)
	}

	/// Writes a fixed number of bytes. The reader is expected to know the
	/// actual length on read.
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;
}

/// Implementations defined how different numbers and binary structures are
/// read from an underlying stream or container (depending on implementation).
pub trait Reader {
	/// Read a u8 from the underlying Read
	fn read_u8(&mut self) -> Result<u8, Error>;
	/// Read a u16 from the underlying Read
	fn read_u16(&mut self) -> Result<u16, Error>;
	/// Read a u32 from the underlying Read
	fn read_u32(&mut self) -> Result<u32, Error>;
	/// Read a i32 from the underlying Read
	fn read_i32(&mut self) -> Result<i32, Error>;
	/// Read a u64 from the underlying Read
	fn read_u64(&mut self) -> Result<u64, Error>;
	/// Read a i64 from the underlying Read
	fn read_i64(&mut self) -> Result<i64, Error>;
	/// Read a fixed number of bytes from the underlying reader.
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error>;

	/// Read a variable-size integer. Non-minimal encodings are rejected as
	/// corrupted: they would make the same message serialize two ways.
	fn read_varint(&mut self) -> Result<u64, Error> {
		let b = self.read_u8()?;
		match b {
			0xfd => {
				let n = u64::from(self.read_u16()?);
				if n < 0xfd {
					return Err(Error::CorruptedData);
				}
				Ok(n)
			}
			0xfe => {
				let n = u64::from(self.read_u32()?);
				if n <= 0xffff {
					return Err(Error::CorruptedData);
				}
				Ok(n)
			}
			0xff => {
				let n = self.read_u64()?;
				if n <= 0xffff_ffff {
					return Err(Error::CorruptedData);
				}
				Ok(n)
			}
			n => Ok(u64::from(n)),
		}
	}

	/// Read a varint-length-prefixed byte vector.
	fn read_bytes_len_prefix(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_varint()?;
		if len > MAX_READ_BYTES {
			return Err(Error::TooLargeReadErr);
		}
		self.read_fixed_bytes(len as usize)
	}

	/// Convenience function to read 32 fixed bytes
	fn read_32_bytes(&mut self) -> Result<Vec<u8>, Error> {
		self.read_fixed_bytes(32)
	}

	/// Consumes a byte from the reader, producing an error if it doesn't have
	/// the expected value
	fn expect_u8(&mut self, val: u8) -> Result<u8, Error> {
		let b = self.read_u8()?;
		if b == val {
			Ok(b)
		} else {
			Err(Error::UnexpectedData {
				expected: vec![val],
				received: vec![b],
			})
		}
	}
}

/// Trait that every type that can be serialized as binary must implement.
/// Writes directly to a Writer, a utility type thinly wrapping an
/// underlying Write implementation.
pub trait Writeable {
	/// Write the data held by this Writeable to the provided writer
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error>;
}

/// Trait that every type that can be deserialized from binary must implement.
/// Reads directly to a Reader, a utility type thinly wrapping an
/// underlying Read implementation.
pub trait Readable: Sized {
	/// Reads the data necessary to this Readable from the provided reader
	fn read(reader: &mut dyn Reader) -> Result<Self, Error>;
}

/// Types with a known, fixed serialized byte length.
pub trait FixedLength {
	/// The serialized size in bytes.
	const LEN: usize;
}

/// Deserializes a Readable from any std::io::Read implementation.
pub fn deserialize<T: Readable>(source: &mut dyn Read) -> Result<T, Error> {
	let mut reader = BinReader { source };
	T::read(&mut reader)
}

/// Serializes a Writeable into any std::io::Write implementation.
pub fn serialize<W: Writeable>(sink: &mut dyn Write, thing: &W) -> Result<(), Error> {
	let mut writer = BinWriter {
		sink,
		mode: SerializationMode::Full,
	};
	thing.write(&mut writer)
}

/// Utility function to serialize a writeable directly in memory using a
/// Vec<u8>.
pub fn ser_vec<W: Writeable>(thing: &W) -> Result<Vec<u8>, Error> {
	let mut vec = vec![];
	serialize(&mut vec, thing)?;
	Ok(vec)
}

/// Serialized byte size of a writeable, without keeping the bytes around.
pub fn ser_size<W: Writeable>(thing: &W) -> Result<usize, Error> {
	let mut counter = CountingWriter {
		count: 0,
		mode: SerializationMode::Full,
	};
	thing.write(&mut counter)?;
	Ok(counter.count)
}

/// As `ser_size` but for the identity (pre-witness) form.
pub fn ser_size_hash_mode<W: Writeable>(thing: &W) -> Result<usize, Error> {
	let mut counter = CountingWriter {
		count: 0,
		mode: SerializationMode::Hash,
	};
	thing.write(&mut counter)?;
	Ok(counter.count)
}

struct BinReader<'a> {
	source: &'a mut dyn Read,
}

/// Utility wrapper for an underlying byte Reader. Defines higher level methods
/// to read numbers, byte vectors, hashes, etc.
impl<'a> Reader for BinReader<'a> {
	fn read_u8(&mut self) -> Result<u8, Error> {
		self.source.read_u8().map_err(From::from)
	}
	fn read_u16(&mut self) -> Result<u16, Error> {
		self.source.read_u16::<LittleEndian>().map_err(From::from)
	}
	fn read_u32(&mut self) -> Result<u32, Error> {
		self.source.read_u32::<LittleEndian>().map_err(From::from)
	}
	fn read_i32(&mut self) -> Result<i32, Error> {
		self.source.read_i32::<LittleEndian>().map_err(From::from)
	}
	fn read_u64(&mut self) -> Result<u64, Error> {
		self.source.read_u64::<LittleEndian>().map_err(From::from)
	}
	fn read_i64(&mut self) -> Result<i64, Error> {
		self.source.read_i64::<LittleEndian>().map_err(From::from)
	}
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error> {
		if length as u64 > MAX_READ_BYTES {
			return Err(Error::TooLargeReadErr);
		}
		let mut buf = vec![0; length];
		self.source
			.read_exact(&mut buf)
			.map(move |_| buf)
			.map_err(From::from)
	}
}

/// Utility wrapper for an underlying byte Writer. Defines higher level methods
/// to write numbers, byte vectors, hashes, etc.
pub struct BinWriter<'a> {
	sink: &'a mut dyn Write,
	mode: SerializationMode,
}

impl<'a> BinWriter<'a> {
	/// Wrap a sink, writing in the given mode.
	pub fn new(sink: &'a mut dyn Write, mode: SerializationMode) -> BinWriter<'a> {
		BinWriter { sink, mode }
	}
}

impl<'a> Writer for BinWriter<'a> {
	fn serialization_mode(&self) -> SerializationMode {
		self.mode
	}
	fn write_u8(&mut self, n: u8) -> Result<(), Error> {
		self.sink.write_u8(n).map_err(From::from)
	}
	fn write_u16(&mut self, n: u16) -> Result<(), Error> {
		self.sink.write_u16::<LittleEndian>(n).map_err(From::from)
	}
	fn write_u32(&mut self, n: u32) -> Result<(), Error> {
		self.sink.write_u32::<LittleEndian>(n).map_err(From::from)
	}
	fn write_i32(&mut self, n: i32) -> Result<(), Error> {
		self.sink.write_i32::<LittleEndian>(n).map_err(From::from)
	}
	fn write_u64(&mut self, n: u64) -> Result<(), Error> {
		self.sink.write_u64::<LittleEndian>(n).map_err(From::from)
	}
	fn write_i64(&mut self, n: i64) -> Result<(), Error> {
		self.sink.write_i64::<LittleEndian>(n).map_err(From::from)
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.sink.write_all(bytes).map_err(From::from)
	}
}

/// A writer that counts bytes instead of storing them.
struct CountingWriter {
	count: usize,
	mode: SerializationMode,
}

impl Writer for CountingWriter {
	fn serialization_mode(&self) -> SerializationMode {
		self.mode
	}
	fn write_u8(&mut self, _n: u8) -> Result<(), Error> {
		self.count += 1;
		Ok(())
	}
	fn write_u16(&mut self, _n: u16) -> Result<(), Error> {
		self.count += 2;
		Ok(())
	}
	fn write_u32(&mut self, _n: u32) -> Result<(), Error> {
		self.count += 4;
		Ok(())
	}
	fn write_i32(&mut self, _n: i32) -> Result<(), Error> {
		self.count += 4;
		Ok(())
	}
	fn write_u64(&mut self, _n: u64) -> Result<(), Error> {
		self.count += 8;
		Ok(())
	}
	fn write_i64(&mut self, _n: i64) -> Result<(), Error> {
		self.count += 8;
		Ok(())
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.count += bytes.len();
		Ok(())
	}
}
