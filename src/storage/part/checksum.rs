// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Checksum index of a part and the hash functions behind it.
//!
//! The index maps every physical file of a part to its size and content hash.
//! It is persisted as `checksums.json`; a part without it is a legacy part and
//! is verified with weaker, existence-based checks.

use std::collections::BTreeMap;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher24};
use tracing::debug;

use super::PartStorage;
use crate::storage::{StorageError, StorageResult, TracedStorageError};

pub const CHECKSUMS_FILE_NAME: &str = "checksums.json";

/// Checksum of one frame of a compressed stream.
pub fn build_checksum(data: &[u8]) -> u64 {
    crc32fast::hash(data) as u64
}

pub fn verify_checksum(data: &[u8], checksum: u64) -> StorageResult<()> {
    let found = build_checksum(data);
    if found != checksum {
        return Err(TracedStorageError::checksum(found, checksum));
    }
    Ok(())
}

/// 128-bit SipHash-2-4 with zero keys.
pub fn sip_hash128(data: &[u8]) -> u128 {
    let mut hasher = SipHasher24::new();
    hasher.write(data);
    hasher.finish128().as_u128()
}

/// Lowercase hex form of [`sip_hash128`], used as a short replacement for long file names.
pub fn sip_hash128_string(s: &str) -> String {
    format!("{:032x}", sip_hash128(s.as_bytes()))
}

/// Size and hash of one file of a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    pub file_size: u64,
    #[serde(with = "hex_u128")]
    pub file_hash: u128,
    #[serde(default)]
    pub is_compressed: bool,
    /// Size of the data after decompression. Equals `file_size` for plain files.
    #[serde(default)]
    pub uncompressed_size: u64,
}

impl ChecksumEntry {
    /// Entry of a plain file.
    pub fn of_plain(data: &[u8]) -> Self {
        Self {
            file_size: data.len() as u64,
            file_hash: sip_hash128(data),
            is_compressed: false,
            uncompressed_size: data.len() as u64,
        }
    }

    /// Entry of a compressed file that decompresses to `uncompressed_size` bytes.
    pub fn of_compressed(data: &[u8], uncompressed_size: u64) -> Self {
        Self {
            is_compressed: true,
            uncompressed_size,
            ..Self::of_plain(data)
        }
    }
}

/// Mapping from physical file name to its [`ChecksumEntry`]. Keys are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    files: BTreeMap<String, ChecksumEntry>,
}

impl Checksums {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ChecksumEntry> {
        self.files.get(name)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &ChecksumEntry)> {
        self.files.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn add_file(&mut self, name: impl Into<String>, entry: ChecksumEntry) {
        self.files.insert(name.into(), entry);
    }

    /// Total size on disk of all registered files.
    pub fn total_size_on_disk(&self) -> u64 {
        self.files.values().map(|entry| entry.file_size).sum()
    }

    /// Load the checksum index of a part. `None` means the part has no index.
    pub fn load(storage: &dyn PartStorage) -> StorageResult<Option<Self>> {
        if !storage.exists(CHECKSUMS_FILE_NAME) {
            return Ok(None);
        }
        let data = storage.read_all(CHECKSUMS_FILE_NAME)?;
        let checksums: Self = serde_json::from_slice(&data)?;
        debug!(
            "loaded {} checksums of {}",
            checksums.len(),
            storage.full_path()
        );
        Ok(Some(checksums))
    }

    pub fn write(&self, storage: &dyn PartStorage) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        storage.write_file(CHECKSUMS_FILE_NAME, &json)
    }

    /// Check that every registered file exists with its registered size.
    pub fn check_sizes(&self, storage: &dyn PartStorage, part_name: &str) -> StorageResult<()> {
        for (name, entry) in &self.files {
            if !storage.exists(name) {
                return Err(TracedStorageError::missing_file(part_name, None, name));
            }
            let size = storage.file_size(name)?;
            if size != entry.file_size {
                return Err(TracedStorageError::size_mismatch(
                    part_name,
                    format!(
                        "{} has size {}, expected {}",
                        name, size, entry.file_size
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Re-hash every registered file and compare with its registered hash.
    pub fn verify(&self, storage: &dyn PartStorage, part_name: &str) -> StorageResult<()> {
        self.check_sizes(storage, part_name)?;
        for (name, entry) in &self.files {
            let found = sip_hash128(&storage.read_all(name)?);
            if found != entry.file_hash {
                return Err(StorageError::FileChecksum {
                    part: part_name.to_string(),
                    file: name.clone(),
                    found,
                    expected: entry.file_hash,
                }
                .into());
            }
        }
        Ok(())
    }
}

mod hex_u128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:032x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        u128::from_str_radix(&s, 16).map_err(serde::de::Error::custom)
    }
}
