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

//! Append-only segment files backing the output table. The committed
//! record stream is a concatenation of `table_seg###.bin` files in
//! lexicographic order; a record's id carries its absolute offset into
//! that stream. Files rotate once appending would push them past the
//! size cap.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap::Mmap;

use crate::error::{Error, ErrorKind};

/// Rotation threshold for a single segment file.
pub const SEGMENT_MAX_BYTES: u64 = 1 << 30;

const SEGMENT_PREFIX: &str = "table_seg";
const SEGMENT_SUFFIX: &str = ".bin";

struct Segment {
	path: PathBuf,
	/// Logical offset of this file's first byte
	start: u64,
	len: u64,
	/// Read mapping, refreshed after appends
	map: Option<Mmap>,
}

impl Segment {
	fn remap(&mut self) -> Result<(), Error> {
		if self.len == 0 {
			self.map = None;
			return Ok(());
		}
		let file = File::open(&self.path)?;
		let map = unsafe { Mmap::map(&file)? };
		self.map = Some(map);
		Ok(())
	}
}

/// The ordered collection of segment files as one logical byte stream.
pub struct SegmentStore {
	dir: PathBuf,
	segments: Vec<Segment>,
	writer: Option<File>,
}

impl SegmentStore {
	/// Opens (or creates) the store under the given directory, picking up
	/// any segments already on disk.
	pub fn open<P: AsRef<Path>>(dir: P) -> Result<SegmentStore, Error> {
		let dir = dir.as_ref().to_path_buf();
		fs::create_dir_all(&dir)?;

		let mut names: Vec<String> = fs::read_dir(&dir)?
			.filter_map(|entry| entry.ok())
			.filter_map(|entry| entry.file_name().into_string().ok())
			.filter(|name| name.starts_with(SEGMENT_PREFIX) && name.ends_with(SEGMENT_SUFFIX))
			.collect();
		names.sort();

		let mut segments = vec![];
		let mut start = 0;
		for name in names {
			let path = dir.join(&name);
			let len = fs::metadata(&path)?.len();
			let mut segment = Segment {
				path,
				start,
				len,
				map: None,
			};
			segment.remap()?;
			start += len;
			segments.push(segment);
		}

		let mut store = SegmentStore {
			dir,
			segments,
			writer: None,
		};
		store.reopen_writer()?;
		Ok(store)
	}

	fn reopen_writer(&mut self) -> Result<(), Error> {
		if let Some(segment) = self.segments.last() {
			let file = OpenOptions::new().append(true).open(&segment.path)?;
			self.writer = Some(file);
		}
		Ok(())
	}

	fn rotate(&mut self) -> Result<(), Error> {
		let start = self.logical_len();
		let path = self.dir.join(format!(
			"{}{:03}{}",
			SEGMENT_PREFIX,
			self.segments.len(),
			SEGMENT_SUFFIX
		));
		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)?;
		self.segments.push(Segment {
			path,
			start,
			len: 0,
			map: None,
		});
		self.writer = Some(file);
		debug!("segment store rotated to {} files", self.segments.len());
		Ok(())
	}

	/// Total committed bytes across all segments.
	pub fn logical_len(&self) -> u64 {
		self.segments.last().map(|s| s.start + s.len).unwrap_or(0)
	}

	/// Number of segment files.
	pub fn file_count(&self) -> usize {
		self.segments.len()
	}

	/// Appends a whole buffer, rotating first if it would overflow the
	/// current file, and returns the buffer's logical offset. The buffer
	/// never spans two files, so records inside it stay contiguous.
	pub fn append(&mut self, buf: &[u8]) -> Result<u64, Error> {
		let needs_rotation = match self.segments.last() {
			Some(segment) => segment.len + buf.len() as u64 > SEGMENT_MAX_BYTES,
			None => true,
		};
		if needs_rotation {
			self.rotate()?;
		}
		let offset = self.logical_len();
		let writer = self
			.writer
			.as_mut()
			.ok_or_else(|| Error::from(ErrorKind::Io("no writable segment".to_string())))?;
		writer.write_all(buf)?;
		writer.flush()?;
		{
			let segment = self.segments.last_mut().unwrap();
			segment.len += buf.len() as u64;
			segment.remap()?;
		}
		Ok(offset)
	}

	/// Reads `len` bytes at the given logical offset into `out`,
	/// following the stream across file boundaries.
	pub fn read(&self, mut offset: u64, mut len: usize, out: &mut Vec<u8>) -> Result<(), Error> {
		if offset + len as u64 > self.logical_len() {
			return Err(ErrorKind::InvalidArgument(format!(
				"read past committed stream: {}+{}",
				offset, len
			))
			.into());
		}
		while len > 0 {
			let idx = match self
				.segments
				.binary_search_by(|s| s.start.cmp(&offset))
			{
				Ok(i) => i,
				Err(i) => i - 1,
			};
			let segment = &self.segments[idx];
			let local = (offset - segment.start) as usize;
			let take = len.min((segment.len as usize) - local);
			let map = segment.map.as_ref().ok_or_else(|| {
				Error::from(ErrorKind::Io("segment unmapped".to_string()))
			})?;
			out.extend_from_slice(&map[local..local + take]);
			offset += take as u64;
			len -= take;
		}
		Ok(())
	}
}
