// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use tracing::{debug, info};

use super::data_part::write_columns;
use super::{
    compress_frames, encode_marks, enumerate_streams, stream_file_base_name, ChecksumEntry,
    Checksums, CompressionMethod, DataPart, IndexGranularity, MarkInCompressedFile, MarkType,
    PartInfo, PartLoader, PartOptions, PartStorageRef, COUNT_FILE_NAME, DATA_FILE_EXTENSION,
};
use crate::catalog::ColumnsRef;
use crate::storage::{StorageResult, TracedStorageError};

/// Encoded contents of one stream: the compressed data file and one position per mark.
#[derive(Clone, Debug, Default)]
pub struct StreamData {
    pub data: Vec<u8>,
    pub uncompressed_size: u64,
    pub marks: Vec<MarkInCompressedFile>,
}

impl StreamData {
    /// Compress each granule into its own frame, with one mark at the start of each.
    pub fn from_granules<'a>(
        granules: impl IntoIterator<Item = &'a [u8]>,
        method: CompressionMethod,
    ) -> Self {
        let mut stream = StreamData::default();
        for granule in granules {
            stream
                .marks
                .push(MarkInCompressedFile::new(stream.data.len() as u64, 0));
            if !granule.is_empty() {
                stream
                    .data
                    .extend(compress_frames(granule, granule.len(), method));
            }
            stream.uncompressed_size += granule.len() as u64;
        }
        stream
    }
}

/// A part that is still being written.
pub struct MutableDataPart {
    name: String,
    info: PartInfo,
    storage: PartStorageRef,
    options: PartOptions,
}

impl MutableDataPart {
    pub fn new(name: impl Into<String>, storage: PartStorageRef, options: PartOptions) -> StorageResult<Self> {
        let name = name.into();
        let info = name.parse()?;
        Ok(Self {
            name,
            info,
            storage,
            options,
        })
    }

    pub fn info(&self) -> &PartInfo {
        &self.info
    }

    /// Writer for `columns`, whose granules hold the rows given by `index_granularity`.
    pub fn get_writer(self, columns: ColumnsRef, index_granularity: IndexGranularity) -> PartWriter {
        PartWriter {
            mark_type: self.options.mark_type(),
            part: self,
            columns,
            index_granularity,
            checksums: Checksums::new(),
            written_streams: HashSet::new(),
            written_columns: HashSet::new(),
        }
    }
}

/// Writes the files of a wide part, one column at a time.
pub struct PartWriter {
    part: MutableDataPart,
    columns: ColumnsRef,
    index_granularity: IndexGranularity,
    mark_type: MarkType,
    checksums: Checksums,
    written_streams: HashSet<String>,
    written_columns: HashSet<String>,
}

impl PartWriter {
    /// Write the streams of `column_name`. Streams shared with a column written before
    /// (like `n.size0` of a nested table) are written once and may be left out.
    pub fn write_column(
        &mut self,
        column_name: &str,
        mut streams: HashMap<String, StreamData>,
    ) -> StorageResult<()> {
        let column = self
            .columns
            .iter()
            .find(|column| column.name() == column_name)
            .cloned()
            .ok_or_else(|| TracedStorageError::not_found("column", column_name))?;
        if !self.written_columns.insert(column_name.to_string()) {
            return Err(TracedStorageError::logical_error(format!(
                "column {column_name} is written twice"
            )));
        }

        for stream in enumerate_streams(&column) {
            let data = streams.remove(&stream.name);
            if self.written_streams.contains(&stream.name) {
                continue;
            }
            let data = data.ok_or_else(|| {
                TracedStorageError::missing_file(
                    &self.part.name,
                    Some(column_name),
                    format!("{}{DATA_FILE_EXTENSION}", stream.name),
                )
            })?;
            self.write_stream(&stream.name, data)?;
            self.written_streams.insert(stream.name);
        }

        if !streams.is_empty() {
            return Err(TracedStorageError::logical_error(format!(
                "column {} has no streams {}",
                column_name,
                streams.keys().sorted().join(", ")
            )));
        }
        Ok(())
    }

    fn write_stream(&mut self, stream_name: &str, stream: StreamData) -> StorageResult<()> {
        if stream.marks.len() != self.index_granularity.marks_count() {
            return Err(TracedStorageError::logical_error(format!(
                "stream {} has {} marks, expected {}",
                stream_name,
                stream.marks.len(),
                self.index_granularity.marks_count()
            )));
        }
        let options = &self.part.options;
        let base_name = stream_file_base_name(
            stream_name,
            options.replace_long_file_name_to_hash,
            options.max_file_name_length,
        );
        let storage = self.part.storage.as_ref();

        let data_file = format!("{base_name}{DATA_FILE_EXTENSION}");
        storage.write_file(&data_file, &stream.data)?;
        self.checksums.add_file(
            data_file,
            ChecksumEntry::of_compressed(&stream.data, stream.uncompressed_size),
        );

        let (marks, uncompressed_size) = encode_marks(
            &stream.marks,
            &self.index_granularity,
            self.mark_type,
            options.marks_compress_block_size,
        );
        let marks_file = format!("{base_name}{}", self.mark_type.file_extension());
        storage.write_file(&marks_file, &marks)?;
        let entry = if self.mark_type.compressed {
            ChecksumEntry::of_compressed(&marks, uncompressed_size)
        } else {
            ChecksumEntry::of_plain(&marks)
        };
        self.checksums.add_file(marks_file, entry);

        debug!("wrote stream {} of part {}", stream_name, self.part.name);
        Ok(())
    }

    /// Write the metadata files and open the finished part.
    pub fn finish(self) -> StorageResult<DataPart> {
        let Self {
            part,
            columns,
            index_granularity,
            mut checksums,
            written_columns,
            ..
        } = self;

        if let Some(column) = columns
            .iter()
            .find(|column| !written_columns.contains(column.name()))
        {
            return Err(TracedStorageError::logical_error(format!(
                "column {} of part {} is not written",
                column.name(),
                part.name
            )));
        }

        let storage = part.storage.as_ref();
        let count = index_granularity.total_rows().to_string();
        storage.write_file(COUNT_FILE_NAME, count.as_bytes())?;
        checksums.add_file(COUNT_FILE_NAME, ChecksumEntry::of_plain(count.as_bytes()));
        write_columns(storage, &columns)?;
        checksums.write(storage)?;

        info!(
            "wrote part {} with {} columns and {} rows",
            part.name,
            columns.len(),
            index_granularity.total_rows()
        );
        PartLoader::new(part.name, part.storage, part.options).load()
    }
}
