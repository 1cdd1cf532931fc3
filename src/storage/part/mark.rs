// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Mark files and their decoding.
//!
//! A mark file is a sequence of fixed-size little-endian records, one per
//! granule of the stream:
//!
//! ```plain
//! | offset in compressed file | offset in decompressed block | rows (adaptive only) |
//! |            8B             |              8B              |          8B          |
//! ```
//!
//! Compressed mark files hold the same records wrapped in compressed frames.

use std::io::{self, Read};

use bytes::{Buf, BufMut};
use tracing::{debug, warn};

use super::compressed::read_exact_or_eof;
use super::{
    compress_frames, CompressedReader, CompressionMethod, IndexGranularity, PartOptions,
    PartStorage,
};
use crate::storage::{StorageResult, TracedStorageError};

/// Format of the mark files of a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MarkType {
    /// Every mark carries its own row count.
    pub adaptive: bool,
    /// The records are wrapped in compressed frames.
    pub compressed: bool,
}

impl MarkType {
    pub const ALL: [MarkType; 4] = [
        MarkType::new(false, false),
        MarkType::new(true, false),
        MarkType::new(false, true),
        MarkType::new(true, true),
    ];

    pub const fn new(adaptive: bool, compressed: bool) -> Self {
        Self {
            adaptive,
            compressed,
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match (self.adaptive, self.compressed) {
            (false, false) => ".mrk",
            (true, false) => ".mrk2",
            (false, true) => ".cmrk",
            (true, true) => ".cmrk2",
        }
    }

    /// The mark type of a file name like `v1.mrk2`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = &name[name.rfind('.')?..];
        Self::ALL
            .into_iter()
            .find(|mark_type| mark_type.file_extension() == ext)
    }

    /// Size of one uncompressed record.
    pub fn mark_size_in_bytes(&self) -> usize {
        if self.adaptive {
            8 * 3
        } else {
            8 * 2
        }
    }
}

/// Part-level description of how marks are stored and how many rows they cover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexGranularityInfo {
    pub mark_type: MarkType,
    /// Rows per mark when the marks are not adaptive.
    pub fixed_index_granularity: u64,
}

impl IndexGranularityInfo {
    pub fn new(mark_type: MarkType, fixed_index_granularity: u64) -> Self {
        Self {
            mark_type,
            fixed_index_granularity,
        }
    }

    pub fn from_options(options: &PartOptions) -> Self {
        Self::new(options.mark_type(), options.index_granularity)
    }

    pub fn marks_file_path(&self, stream_file_name: &str) -> String {
        format!("{}{}", stream_file_name, self.mark_type.file_extension())
    }

    /// Adopt the mark type actually found on storage, e.g. non-adaptive marks of a
    /// legacy part opened with adaptive defaults.
    pub fn change_granularity_if_required(&mut self, storage: &dyn PartStorage) -> StorageResult<()> {
        let found = storage
            .list_files()?
            .iter()
            .find_map(|name| MarkType::from_file_name(name));
        if let Some(found) = found {
            if found != self.mark_type {
                warn!(
                    "{}: marks are stored as {}, not {}",
                    storage.full_path(),
                    found.file_extension(),
                    self.mark_type.file_extension()
                );
                self.mark_type = found;
            }
        }
        Ok(())
    }
}

/// Position of a granule inside a compressed data file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarkInCompressedFile {
    pub offset_in_compressed_file: u64,
    pub offset_in_decompressed_block: u64,
}

impl MarkInCompressedFile {
    pub fn new(offset_in_compressed_file: u64, offset_in_decompressed_block: u64) -> Self {
        Self {
            offset_in_compressed_file,
            offset_in_decompressed_block,
        }
    }
}

/// One decoded mark. `rows` is only known for adaptive marks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mark {
    pub position: MarkInCompressedFile,
    pub rows: Option<u64>,
}

/// Reads mark records one by one until the end of the stream.
struct MarkRecords<R> {
    reader: R,
    mark_type: MarkType,
}

impl<R: Read> MarkRecords<R> {
    fn new(reader: R, mark_type: MarkType) -> Self {
        Self { reader, mark_type }
    }

    fn next_mark(&mut self) -> io::Result<Option<Mark>> {
        let mut record = [0u8; 24];
        let record = &mut record[..self.mark_type.mark_size_in_bytes()];
        if !read_exact_or_eof(&mut self.reader, record)? {
            return Ok(None);
        }
        let mut buf = &record[..];
        let position = MarkInCompressedFile::new(buf.get_u64_le(), buf.get_u64_le());
        let rows = self.mark_type.adaptive.then(|| buf.get_u64_le());
        Ok(Some(Mark { position, rows }))
    }
}

/// Open `marks_file` as a stream of plain records.
fn open_records(
    storage: &dyn PartStorage,
    marks_file: &str,
    mark_type: MarkType,
) -> StorageResult<MarkRecords<Box<dyn Read>>> {
    let file = storage.read_file(marks_file)?;
    let reader: Box<dyn Read> = if mark_type.compressed {
        Box::new(CompressedReader::new(file))
    } else {
        Box::new(file)
    };
    Ok(MarkRecords::new(reader, mark_type))
}

fn truncated(part_name: &str, marks_file: &str, err: io::Error) -> TracedStorageError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TracedStorageError::size_mismatch(part_name, format!("marks file {marks_file} is truncated"))
    } else {
        err.into()
    }
}

fn check_exists(storage: &dyn PartStorage, marks_file: &str, part_name: &str) -> StorageResult<()> {
    if !storage.exists(marks_file) {
        return Err(TracedStorageError::missing_file(
            part_name,
            None,
            format!("{}/{}", storage.full_path(), marks_file),
        ));
    }
    Ok(())
}

/// Decode the row count of every mark from a mark file.
///
/// Uncompressed fixed-granularity marks are counted from the file size alone and
/// every mark is given the fixed granularity; the last mark must be reconciled
/// with the row count of the part afterwards. In every other format the records
/// are read until the end of the stream.
pub fn load_index_granularity(
    storage: &dyn PartStorage,
    info: &IndexGranularityInfo,
    marks_file: &str,
    part_name: &str,
) -> StorageResult<IndexGranularity> {
    check_exists(storage, marks_file, part_name)?;

    let mark_type = info.mark_type;
    let mut index_granularity = IndexGranularity::new();

    if !mark_type.adaptive && !mark_type.compressed {
        let file_size = storage.file_size(marks_file)?;
        let mark_size = mark_type.mark_size_in_bytes() as u64;
        if file_size % mark_size != 0 {
            return Err(TracedStorageError::size_mismatch(
                part_name,
                format!("size {file_size} of marks file {marks_file} is not a multiple of {mark_size}"),
            ));
        }
        index_granularity
            .resize_with_fixed_granularity((file_size / mark_size) as usize, info.fixed_index_granularity);
    } else {
        let mut records = open_records(storage, marks_file, mark_type)?;
        let mut marks_count = 0;
        while let Some(mark) = records
            .next_mark()
            .map_err(|e| truncated(part_name, marks_file, e))?
        {
            marks_count += 1;
            if let Some(rows) = mark.rows {
                index_granularity.append_mark(rows);
            }
        }
        if !mark_type.adaptive {
            index_granularity.resize_with_fixed_granularity(marks_count, info.fixed_index_granularity);
        }
    }

    debug!(
        "loaded {} marks of {} from {}",
        index_granularity.marks_count(),
        part_name,
        marks_file
    );
    Ok(index_granularity)
}

/// Decode all marks of a mark file.
pub fn read_marks(
    storage: &dyn PartStorage,
    marks_file: &str,
    mark_type: MarkType,
    part_name: &str,
) -> StorageResult<Vec<Mark>> {
    check_exists(storage, marks_file, part_name)?;
    let mut records = open_records(storage, marks_file, mark_type)?;
    let mut marks = vec![];
    while let Some(mark) = records
        .next_mark()
        .map_err(|e| truncated(part_name, marks_file, e))?
    {
        marks.push(mark);
    }
    Ok(marks)
}

/// Encode marks of one stream. Returns the file contents and their uncompressed size.
///
/// `positions` and `index_granularity` must have one entry per mark.
pub fn encode_marks(
    positions: &[MarkInCompressedFile],
    index_granularity: &IndexGranularity,
    mark_type: MarkType,
    compress_block_size: usize,
) -> (Vec<u8>, u64) {
    let mut data = Vec::with_capacity(positions.len() * mark_type.mark_size_in_bytes());
    for (position, rows) in positions.iter().zip(index_granularity.granularities()) {
        data.put_u64_le(position.offset_in_compressed_file);
        data.put_u64_le(position.offset_in_decompressed_block);
        if mark_type.adaptive {
            data.put_u64_le(rows);
        }
    }
    let uncompressed_size = data.len() as u64;
    if mark_type.compressed {
        data = compress_frames(&data, compress_block_size, CompressionMethod::Lz4);
    }
    (data, uncompressed_size)
}
