// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use tracing::warn;

use super::{enumerate_streams, read_marks, DataPart, COUNT_FILE_NAME};
use crate::storage::{StorageResult, TracedStorageError};

impl DataPart {
    /// Check that the files of the part agree with its metadata.
    ///
    /// With a checksum index and `require_part_metadata`, every stream of every
    /// column must have both its data and its marks registered. Without an index,
    /// all mark files that exist must be non-empty and of the same size, since
    /// every column of a part has one mark per granule.
    pub fn check_consistency(&self, require_part_metadata: bool) -> StorageResult<()> {
        self.check_consistency_base(require_part_metadata)?;

        let full_path = self.full_path();
        let checksums = self.checksums();
        let resolver = self.resolver();

        if !checksums.is_empty() {
            if !require_part_metadata {
                return Ok(());
            }
            for column in self.columns().iter() {
                for stream in enumerate_streams(column) {
                    for file in [resolver.marks_file(&stream), resolver.data_file(&stream)] {
                        if !checksums.contains(&file) {
                            return Err(TracedStorageError::missing_file(
                                &full_path,
                                Some(column.name()),
                                file,
                            ));
                        }
                    }
                }
            }
            return Ok(());
        }

        let mut marks_size: Option<(String, u64)> = None;
        for column in self.columns().iter() {
            for stream in enumerate_streams(column) {
                let file = resolver.marks_file(&stream);
                if !self.storage().exists(&file) {
                    // columns added after the part was written have no files
                    warn!("{}: no marks for column {}", full_path, column.name());
                    continue;
                }
                let size = self.marks_size(&file)?;
                if size == 0 {
                    return Err(TracedStorageError::size_mismatch(
                        &full_path,
                        format!("marks file {file} is empty"),
                    ));
                }
                match &marks_size {
                    None => marks_size = Some((file, size)),
                    Some((first_file, first_size)) if *first_size != size => {
                        return Err(TracedStorageError::size_mismatch(
                            &full_path,
                            format!(
                                "marks files {first_file} and {file} have different sizes ({first_size} and {size})"
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn check_consistency_base(&self, require_part_metadata: bool) -> StorageResult<()> {
        let checksums = self.checksums();
        if checksums.is_empty() {
            return Ok(());
        }
        if require_part_metadata && !checksums.contains(COUNT_FILE_NAME) {
            return Err(TracedStorageError::missing_file(
                self.full_path(),
                None,
                COUNT_FILE_NAME,
            ));
        }
        checksums.check_sizes(self.storage(), &self.full_path())
    }

    /// Size of the mark records in `file`. Compressed frames differ in size with their
    /// contents, so compressed marks are measured after decompression.
    fn marks_size(&self, file: &str) -> StorageResult<u64> {
        let mark_type = self.index_granularity_info().mark_type;
        if !mark_type.compressed {
            return self.storage().file_size(file);
        }
        let marks = read_marks(self.storage(), file, mark_type, &self.full_path())?;
        Ok((marks.len() * mark_type.mark_size_in_bytes()) as u64)
    }

    /// Re-hash every file registered in the checksum index.
    pub fn verify_checksums(&self) -> StorageResult<()> {
        if self.checksums().is_empty() {
            warn!("{}: no checksums to verify", self.full_path());
            return Ok(());
        }
        self.checksums().verify(self.storage(), &self.full_path())
    }
}
