// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use super::{
    enumerate_streams, load_index_granularity, Checksums, IndexGranularity, IndexGranularityInfo,
    PartInfo, PartOptions, PartStorage, PartStorageRef, StreamId, StreamNameResolver,
    SerializationKind, DATA_FILE_EXTENSION,
};
use crate::catalog::{ColumnCatalog, ColumnsRef};
use crate::storage::{StorageResult, TracedStorageError};

pub const COLUMNS_FILE_NAME: &str = "columns.json";
pub const COUNT_FILE_NAME: &str = "count.txt";

/// An immutable, loaded part.
///
/// A [`DataPart`] can only be obtained through [`PartLoader::load`], which runs the
/// whole load sequence (columns, checksums, granularity, consistency check) before
/// handing out the part. Afterwards nothing in it changes, so it can be shared
/// between any number of readers.
pub struct DataPart {
    name: String,
    info: PartInfo,
    storage: PartStorageRef,
    columns: ColumnsRef,
    checksums: Checksums,
    index_granularity: IndexGranularity,
    index_granularity_info: IndexGranularityInfo,
    rows_count: u64,
    options: PartOptions,
    remove_on_drop: AtomicBool,
}

pub type DataPartRef = Arc<DataPart>;

impl DataPart {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &PartInfo {
        &self.info
    }

    pub fn storage(&self) -> &dyn PartStorage {
        self.storage.as_ref()
    }

    pub fn full_path(&self) -> String {
        self.storage.full_path()
    }

    pub fn columns(&self) -> &ColumnsRef {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnCatalog> {
        self.columns.iter().find(|column| column.name() == name)
    }

    pub fn checksums(&self) -> &Checksums {
        &self.checksums
    }

    pub fn index_granularity(&self) -> &IndexGranularity {
        &self.index_granularity
    }

    pub fn index_granularity_info(&self) -> &IndexGranularityInfo {
        &self.index_granularity_info
    }

    pub fn rows_count(&self) -> u64 {
        self.rows_count
    }

    pub fn marks_count(&self) -> usize {
        self.index_granularity.marks_count()
    }

    pub fn options(&self) -> &PartOptions {
        &self.options
    }

    pub fn resolver(&self) -> StreamNameResolver<'_> {
        StreamNameResolver::new(
            &self.checksums,
            self.storage.as_ref(),
            self.index_granularity_info.mark_type,
        )
    }

    /// Physical base name of the first stream of `column`.
    pub fn file_name_for_column(&self, column: &ColumnCatalog) -> Option<String> {
        first_stream_file_name(&self.resolver(), column)
    }

    /// Whether every stream of `column` has both its data and its marks registered in
    /// the checksum index. `false` for columns added after the part was written.
    pub fn has_column_files(&self, column: &ColumnCatalog) -> bool {
        let resolver = self.resolver();
        enumerate_streams(column).iter().all(|stream| {
            self.checksums.contains(&resolver.data_file(stream))
                && self.checksums.contains(&resolver.marks_file(stream))
        })
    }

    pub fn is_stored_on_remote_disk(&self) -> bool {
        self.storage.is_stored_on_remote_disk()
    }

    pub fn is_stored_on_remote_disk_with_zero_copy_support(&self) -> bool {
        self.storage.supports_zero_copy_replication()
    }

    /// Remove the backing files once the last reference to this part is dropped.
    pub fn mark_for_removal(&self) {
        self.remove_on_drop.store(true, Ordering::Release);
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.remove_on_drop.load(Ordering::Acquire)
    }
}

impl Drop for DataPart {
    fn drop(&mut self) {
        if !self.is_marked_for_removal() {
            return;
        }
        match self.storage.remove_recursive() {
            Ok(()) => info!("removed part {} at {}", self.name, self.full_path()),
            Err(err) => warn!("failed to remove part {}: {}", self.name, err.kind()),
        }
    }
}

impl std::fmt::Debug for DataPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPart")
            .field("name", &self.name)
            .field("path", &self.full_path())
            .field("rows", &self.rows_count)
            .field("marks", &self.marks_count())
            .finish()
    }
}

fn first_stream_file_name(resolver: &StreamNameResolver<'_>, column: &ColumnCatalog) -> Option<String> {
    enumerate_streams(column)
        .first()
        .map(|stream| resolver.resolve(stream))
}

/// Loads a part from its storage location.
pub struct PartLoader {
    name: String,
    storage: PartStorageRef,
    options: PartOptions,
}

impl PartLoader {
    pub fn new(name: impl Into<String>, storage: PartStorageRef, options: PartOptions) -> Self {
        Self {
            name: name.into(),
            storage,
            options,
        }
    }

    /// Run the load sequence. The part is only returned if every step succeeds.
    pub fn load(self) -> StorageResult<DataPart> {
        let Self {
            name,
            storage,
            options,
        } = self;
        let info: PartInfo = name.parse()?;
        let full_path = storage.full_path();

        let columns = load_columns(storage.as_ref(), &full_path)?;
        let checksums = match Checksums::load(storage.as_ref())? {
            Some(checksums) => checksums,
            None => {
                warn!("part {} has no checksums, using weaker checks", full_path);
                Checksums::new()
            }
        };

        // granularity is a property of the whole part, so the marks of any column will do
        let mut index_granularity_info = IndexGranularityInfo::from_options(&options);
        index_granularity_info.change_granularity_if_required(storage.as_ref())?;
        let resolver = StreamNameResolver::new(
            &checksums,
            storage.as_ref(),
            index_granularity_info.mark_type,
        );
        let any_column_file = columns
            .first()
            .and_then(|column| first_stream_file_name(&resolver, column))
            .ok_or_else(|| {
                TracedStorageError::missing_file(&full_path, None, COLUMNS_FILE_NAME)
            })?;
        let mut index_granularity = load_index_granularity(
            storage.as_ref(),
            &index_granularity_info,
            &index_granularity_info.marks_file_path(&any_column_file),
            &full_path,
        )?;

        let rows_count = load_rows_count(
            storage.as_ref(),
            &checksums,
            &resolver,
            &columns,
            &index_granularity,
            &index_granularity_info,
            &full_path,
        )?;
        if index_granularity_info.mark_type.adaptive {
            if index_granularity.total_rows() != rows_count {
                return Err(TracedStorageError::logical_error(format!(
                    "marks of part {} describe {} rows, but it has {} rows",
                    full_path,
                    index_granularity.total_rows(),
                    rows_count
                )));
            }
        } else {
            index_granularity.reconcile_last_mark(rows_count)?;
        }
        index_granularity.set_initialized();

        let part = DataPart {
            name,
            info,
            storage,
            columns,
            checksums,
            index_granularity,
            index_granularity_info,
            rows_count,
            remove_on_drop: AtomicBool::new(false),
            options,
        };
        part.check_consistency(part.options.require_part_metadata)?;

        info!(
            "loaded part {} with {} rows in {} marks",
            part.name,
            part.rows_count,
            part.marks_count()
        );
        Ok(part)
    }
}

fn load_columns(storage: &dyn PartStorage, full_path: &str) -> StorageResult<ColumnsRef> {
    if !storage.exists(COLUMNS_FILE_NAME) {
        return Err(TracedStorageError::missing_file(
            full_path,
            None,
            COLUMNS_FILE_NAME,
        ));
    }
    let columns: Vec<ColumnCatalog> = serde_json::from_slice(&storage.read_all(COLUMNS_FILE_NAME)?)?;
    Ok(columns.into())
}

pub(super) fn write_columns(storage: &dyn PartStorage, columns: &[ColumnCatalog]) -> StorageResult<()> {
    storage.write_file(COLUMNS_FILE_NAME, &serde_json::to_vec_pretty(columns)?)
}

/// Row count from `count.txt`, or derived from the marks or column sizes of legacy parts.
fn load_rows_count(
    storage: &dyn PartStorage,
    checksums: &Checksums,
    resolver: &StreamNameResolver<'_>,
    columns: &[ColumnCatalog],
    index_granularity: &IndexGranularity,
    index_granularity_info: &IndexGranularityInfo,
    full_path: &str,
) -> StorageResult<u64> {
    if storage.exists(COUNT_FILE_NAME) {
        let data = storage.read_all(COUNT_FILE_NAME)?;
        return std::str::from_utf8(&data)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| TracedStorageError::decode(format!("invalid {COUNT_FILE_NAME} in part {full_path}")));
    }

    warn!("part {} has no {}", full_path, COUNT_FILE_NAME);
    if index_granularity_info.mark_type.adaptive {
        return Ok(index_granularity.total_rows());
    }
    if index_granularity.is_empty() {
        return Ok(0);
    }

    // the first plain fixed-width column tells the row count through its uncompressed size
    for column in columns {
        let Some(width) = column.datatype().value_width() else {
            continue;
        };
        if column.serialization_kind() != SerializationKind::Default {
            continue;
        }
        let stream: &StreamId = &enumerate_streams(column)[0];
        let data_file = format!("{}{DATA_FILE_EXTENSION}", resolver.resolve(stream));
        if let Some(entry) = checksums.get(&data_file) {
            return Ok(entry.uncompressed_size / width as u64);
        }
    }
    Err(TracedStorageError::missing_file(full_path, None, COUNT_FILE_NAME))
}
