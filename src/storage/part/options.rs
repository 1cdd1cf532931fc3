// Copyright 2022 RisingLight Project Authors. Licensed under Apache-2.0.

use super::MarkType;

/// Options for reading and writing parts.
#[derive(Clone, Debug)]
pub struct PartOptions {
    /// Number of rows per mark for fixed granularity, and the default for adaptive marks.
    pub index_granularity: u64,

    /// Target size (in bytes) of a granule. Non-zero means newly written parts use adaptive
    /// marks.
    pub index_granularity_bytes: u64,

    /// Whether mark files of newly written parts are compressed.
    pub compress_marks: bool,

    /// Size of uncompressed mark data per compressed frame.
    pub marks_compress_block_size: usize,

    /// Whether loading a part checks that every stream is registered in the checksum index.
    pub require_part_metadata: bool,

    /// Whether stream names longer than `max_file_name_length` are replaced by their hash.
    pub replace_long_file_name_to_hash: bool,

    /// Maximum length of a stream file name before it is replaced by its hash.
    pub max_file_name_length: usize,

    /// Cross-check column sizes against row counts even in release builds.
    pub verify_column_sizes: bool,
}

impl PartOptions {
    pub fn default_for_cli() -> Self {
        Self {
            index_granularity: 8192,
            index_granularity_bytes: 10 * (1 << 20), // 10MB
            compress_marks: false,
            marks_compress_block_size: 64 * (1 << 10), // 64KB
            require_part_metadata: true,
            replace_long_file_name_to_hash: true,
            max_file_name_length: 127,
            verify_column_sizes: false,
        }
    }

    pub fn default_for_test() -> Self {
        Self {
            index_granularity: 8192,
            index_granularity_bytes: 1 << 20,
            compress_marks: false,
            marks_compress_block_size: 128,
            require_part_metadata: true,
            replace_long_file_name_to_hash: true,
            max_file_name_length: 127,
            verify_column_sizes: true,
        }
    }

    /// Mark type used by parts written with these options.
    pub fn mark_type(&self) -> MarkType {
        MarkType::new(self.index_granularity_bytes != 0, self.compress_marks)
    }
}

impl Default for PartOptions {
    fn default() -> Self {
        Self::default_for_cli()
    }
}
