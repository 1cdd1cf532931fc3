// Copyright 2022 RisingLight Project Authors. Licensed under Apache-2.0.

use std::backtrace::Backtrace;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0}({1}) not found")]
    NotFound(&'static str, String),
    #[error("no file {file}{} in part {part}", column_suffix(.column))]
    MissingFile {
        part: String,
        column: Option<String>,
        file: String,
    },
    #[error("part {part} is broken: {reason}")]
    SizeMismatch { part: String, reason: String },
    #[error("logical error: {0}")]
    InternalConsistency(String),
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid checksum: found {0}, expected {1}")]
    Checksum(u64, u64),
    #[error("checksum mismatch for {file} in part {part}: found {found:032x}, expected {expected:032x}")]
    FileChecksum {
        part: String,
        file: String,
        found: u128,
        expected: u128,
    },
}

fn column_suffix(column: &Option<String>) -> String {
    match column {
        Some(column) => format!(" for column {column}"),
        None => String::new(),
    }
}

impl From<std::io::Error> for TracedStorageError {
    #[inline]
    fn from(e: std::io::Error) -> TracedStorageError {
        StorageError::Io(e.into()).into()
    }
}

impl From<serde_json::Error> for TracedStorageError {
    #[inline]
    fn from(e: serde_json::Error) -> TracedStorageError {
        StorageError::JsonDecode(e).into()
    }
}

/// [`StorageResult`] with backtrace.
// `thiserror` cannot derive `Error` for a struct with a `Backtrace` field on
// stable Rust, so the derived impls are written out by hand.
pub struct TracedStorageError {
    source: StorageError,
    backtrace: Backtrace,
}

impl std::fmt::Display for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}\n{}", self.source, self.backtrace)
    }
}

impl std::error::Error for TracedStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<StorageError> for TracedStorageError {
    #[inline]
    fn from(source: StorageError) -> Self {
        TracedStorageError {
            source,
            backtrace: Backtrace::capture(),
        }
    }
}

impl std::fmt::Debug for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl TracedStorageError {
    /// The error without its backtrace.
    pub fn kind(&self) -> &StorageError {
        &self.source
    }

    pub fn not_found(ty: &'static str, item: impl ToString) -> Self {
        StorageError::NotFound(ty, item.to_string()).into()
    }

    pub fn missing_file(part: impl ToString, column: Option<&str>, file: impl ToString) -> Self {
        StorageError::MissingFile {
            part: part.to_string(),
            column: column.map(str::to_string),
            file: file.to_string(),
        }
        .into()
    }

    pub fn size_mismatch(part: impl ToString, reason: impl ToString) -> Self {
        StorageError::SizeMismatch {
            part: part.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }

    pub fn logical_error(message: impl ToString) -> Self {
        StorageError::InternalConsistency(message.to_string()).into()
    }

    pub fn decode(message: impl ToString) -> Self {
        StorageError::Decode(message.to_string()).into()
    }

    pub fn checksum(found: u64, expected: u64) -> Self {
        StorageError::Checksum(found, expected).into()
    }

    pub fn is_missing_file(&self) -> bool {
        matches!(self.source, StorageError::MissingFile { .. })
    }

    pub fn is_size_mismatch(&self) -> bool {
        matches!(self.source, StorageError::SizeMismatch { .. })
    }

    pub fn is_internal_consistency(&self) -> bool {
        matches!(self.source, StorageError::InternalConsistency(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, TracedStorageError>;
