// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::HashSet;

use tracing::debug;

use super::{enumerate_streams, DataPart, SerializationKind, DATA_FILE_EXTENSION};
use crate::catalog::ColumnCatalog;
use crate::storage::{StorageResult, TracedStorageError};

/// On-disk footprint of a column, summed over its streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColumnSize {
    pub marks: u64,
    pub data_compressed: u64,
    pub data_uncompressed: u64,
}

impl ColumnSize {
    pub fn add(&mut self, other: ColumnSize) {
        self.marks += other.marks;
        self.data_compressed += other.data_compressed;
        self.data_uncompressed += other.data_uncompressed;
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl DataPart {
    /// Size of the streams of `column`, counting shared streams in full.
    pub fn column_size(&self, column: &ColumnCatalog) -> ColumnSize {
        self.column_size_dedup(column, None)
    }

    /// Size of the streams of `column`. Streams whose file name is already in
    /// `processed_streams` are skipped, and every counted file name is added to it.
    pub fn column_size_dedup(
        &self,
        column: &ColumnCatalog,
        mut processed_streams: Option<&mut HashSet<String>>,
    ) -> ColumnSize {
        let mut size = ColumnSize::default();
        let checksums = self.checksums();
        if checksums.is_empty() {
            return size;
        }

        let resolver = self.resolver();
        for stream in enumerate_streams(column) {
            let file_name = resolver.resolve(&stream);
            if let Some(processed) = processed_streams.as_deref_mut() {
                if !processed.insert(file_name.clone()) {
                    continue;
                }
            }
            if let Some(entry) = checksums.get(&format!("{file_name}{DATA_FILE_EXTENSION}")) {
                size.data_compressed += entry.file_size;
                size.data_uncompressed += entry.uncompressed_size;
            }
            if let Some(entry) = checksums.get(&format!("{file_name}{}", resolver.marks_extension())) {
                size.marks += entry.file_size;
            }
        }
        size
    }

    /// Per-column sizes in column order, and the total over all columns.
    ///
    /// Streams shared by several columns (like the sizes of a nested table) are
    /// reported by each of those columns, but counted only once in the total.
    pub fn calculate_each_columns_size(&self) -> StorageResult<(Vec<(String, ColumnSize)>, ColumnSize)> {
        let mut processed_streams = HashSet::new();
        let mut each_columns_size = Vec::with_capacity(self.columns().len());
        let mut total_size = ColumnSize::default();

        for column in self.columns().iter() {
            let size = self.column_size(column);
            total_size.add(self.column_size_dedup(column, Some(&mut processed_streams)));
            if cfg!(debug_assertions) || self.options().verify_column_sizes {
                self.check_column_size(column, &size)?;
            }
            each_columns_size.push((column.name().to_string(), size));
        }

        debug!(
            "part {}: {} bytes compressed, {} bytes uncompressed, {} bytes of marks",
            self.name(),
            total_size.data_compressed,
            total_size.data_uncompressed,
            total_size.marks
        );
        Ok((each_columns_size, total_size))
    }

    pub fn total_columns_size(&self) -> StorageResult<ColumnSize> {
        Ok(self.calculate_each_columns_size()?.1)
    }

    /// The uncompressed size of a plain fixed-width column must hold exactly one value per row.
    fn check_column_size(&self, column: &ColumnCatalog, size: &ColumnSize) -> StorageResult<()> {
        let datatype = column.datatype();
        if self.rows_count() == 0
            || !datatype.is_value_represented_by_number()
            || datatype.has_subtypes()
            || column.serialization_kind() != SerializationKind::Default
        {
            return Ok(());
        }
        let Some(width) = datatype.value_width() else {
            return Ok(());
        };
        let rows_in_column = size.data_uncompressed / width as u64;
        if rows_in_column != self.rows_count() {
            return Err(TracedStorageError::logical_error(format!(
                "column {} of type {} has {} rows in part {}, but the part has {} rows",
                column.name(),
                datatype,
                rows_in_column,
                self.name(),
                self.rows_count()
            )));
        }
        Ok(())
    }
}
