// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;

use super::{
    enumerate_streams, read_marks, DataPart, DataPartRef, Mark, MarkRange, MarkRanges, StreamId,
};
use crate::catalog::ColumnCatalog;
use crate::storage::{StorageResult, TracedStorageError};

/// A stream together with the physical files backing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedStream {
    pub stream: StreamId,
    pub data_file: String,
    pub marks_file: String,
}

/// The streams to read for one requested column.
#[derive(Clone, Debug)]
pub struct ColumnStreams {
    pub column: ColumnCatalog,
    pub streams: Vec<ResolvedStream>,
    /// `false` if the column was added after the part was written. Such a column is
    /// filled with default values by the caller.
    pub has_files: bool,
}

/// Reads the requested columns of a part within a set of mark ranges.
pub struct PartReader {
    part: DataPartRef,
    columns: Vec<ColumnStreams>,
    mark_ranges: MarkRanges,
}

impl DataPart {
    /// Create a reader over `columns` restricted to `mark_ranges`.
    pub fn get_reader(
        self: &Arc<Self>,
        columns: &[ColumnCatalog],
        mark_ranges: MarkRanges,
    ) -> StorageResult<PartReader> {
        for range in &mark_ranges {
            if range.begin > range.end || range.end > self.marks_count() {
                return Err(TracedStorageError::logical_error(format!(
                    "mark range {}..{} is out of the {} marks of part {}",
                    range.begin,
                    range.end,
                    self.marks_count(),
                    self.name()
                )));
            }
        }

        let resolver = self.resolver();
        let columns = columns
            .iter()
            .map(|column| ColumnStreams {
                column: column.clone(),
                streams: enumerate_streams(column)
                    .into_iter()
                    .map(|stream| ResolvedStream {
                        data_file: resolver.data_file(&stream),
                        marks_file: resolver.marks_file(&stream),
                        stream,
                    })
                    .collect(),
                has_files: self.has_column_files(column),
            })
            .collect();

        Ok(PartReader {
            part: self.clone(),
            columns,
            mark_ranges,
        })
    }
}

impl PartReader {
    pub fn part(&self) -> &DataPartRef {
        &self.part
    }

    pub fn columns(&self) -> &[ColumnStreams] {
        &self.columns
    }

    pub fn mark_ranges(&self) -> &[MarkRange] {
        &self.mark_ranges
    }

    pub fn rows_to_read(&self) -> u64 {
        self.part
            .index_granularity()
            .rows_count_in_ranges(&self.mark_ranges)
    }

    pub fn row_ranges(&self) -> Vec<Range<u64>> {
        let index = self.part.index_granularity();
        self.mark_ranges
            .iter()
            .map(|range| index.row_range(*range))
            .collect()
    }

    pub fn read_marks(&self, stream: &ResolvedStream) -> StorageResult<Vec<Mark>> {
        read_marks(
            self.part.storage(),
            &stream.marks_file,
            self.part.index_granularity_info().mark_type,
            &self.part.full_path(),
        )
    }

    /// Byte range of the data file holding the granules of `range`.
    ///
    /// Starts at the compressed block of the first mark and ends at the block of the
    /// mark after the range, or at the end of the file. The end is exclusive only at
    /// block granularity: a granule may end inside the block where the next one starts.
    pub fn compressed_range(
        &self,
        stream: &ResolvedStream,
        marks: &[Mark],
        range: MarkRange,
    ) -> StorageResult<Range<u64>> {
        let file_size = self.part.storage().file_size(&stream.data_file)?;
        let offset_of = |mark: usize| match marks.get(mark) {
            Some(mark) => mark.position.offset_in_compressed_file,
            None => file_size,
        };
        let begin = offset_of(range.begin);
        let mut end = begin;
        if range.begin != range.end {
            end = offset_of(range.end);
            // the next granule may start inside the last block of this range
            if range.end < marks.len()
                && marks[range.end].position.offset_in_decompressed_block != 0
            {
                end = marks[range.end..]
                    .iter()
                    .map(|mark| mark.position.offset_in_compressed_file)
                    .find(|&offset| offset > end)
                    .unwrap_or(file_size);
            }
        }
        if begin > end || end > file_size {
            return Err(TracedStorageError::size_mismatch(
                self.part.full_path(),
                format!(
                    "marks of {} point outside of its {} bytes",
                    stream.data_file, file_size
                ),
            ));
        }
        Ok(begin..end)
    }

    /// Compressed bytes of `stream` covering the granules of `range`.
    pub fn read_compressed(&self, stream: &ResolvedStream, range: MarkRange) -> StorageResult<Bytes> {
        let marks = self.read_marks(stream)?;
        let byte_range = self.compressed_range(stream, &marks, range)?;
        let data = self.part.storage().read_all(&stream.data_file)?;
        Ok(Bytes::from(data).slice(byte_range.start as usize..byte_range.end as usize))
    }
}
