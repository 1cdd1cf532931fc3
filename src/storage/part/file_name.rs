// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use super::{sip_hash128_string, Checksums, MarkType, PartStorage, StreamId};

pub const DATA_FILE_EXTENSION: &str = ".bin";

/// Resolves stream names to the physical names used on storage.
///
/// A stream is stored either under its literal name or under the SipHash-128 of that
/// name (for names too long for the storage backend). With a checksum index, the
/// registered name wins. Without one, storage is probed for the literal name first.
///
/// Mark decoding, size calculation and consistency checks all go through this type.
#[derive(Clone, Copy)]
pub struct StreamNameResolver<'a> {
    checksums: &'a Checksums,
    storage: &'a dyn PartStorage,
    marks_extension: &'static str,
}

impl<'a> StreamNameResolver<'a> {
    pub fn new(checksums: &'a Checksums, storage: &'a dyn PartStorage, mark_type: MarkType) -> Self {
        Self {
            checksums,
            storage,
            marks_extension: mark_type.file_extension(),
        }
    }

    pub fn marks_extension(&self) -> &'static str {
        self.marks_extension
    }

    /// Physical base name of the stream, without extension.
    pub fn resolve(&self, stream: &StreamId) -> String {
        self.resolve_name(&stream.name)
    }

    pub fn resolve_name(&self, stream_name: &str) -> String {
        let registered = |name: &str| -> bool {
            if self.checksums.is_empty() {
                self.storage.exists(&format!("{name}{}", self.marks_extension))
                    || self.storage.exists(&format!("{name}{DATA_FILE_EXTENSION}"))
            } else {
                self.checksums.contains(&format!("{name}{DATA_FILE_EXTENSION}"))
                    || self.checksums.contains(&format!("{name}{}", self.marks_extension))
            }
        };

        if registered(stream_name) {
            return stream_name.to_string();
        }
        let hashed = sip_hash128_string(stream_name);
        if registered(&hashed) {
            return hashed;
        }
        stream_name.to_string()
    }

    pub fn data_file(&self, stream: &StreamId) -> String {
        format!("{}{DATA_FILE_EXTENSION}", self.resolve(stream))
    }

    pub fn marks_file(&self, stream: &StreamId) -> String {
        format!("{}{}", self.resolve(stream), self.marks_extension)
    }
}

/// Name a writer gives to a new stream: the literal name, or its hash when too long.
pub fn stream_file_base_name(stream_name: &str, replace_long_names: bool, max_length: usize) -> String {
    // leave room for the longest extension
    if replace_long_names && stream_name.len() + ".cmrk2".len() > max_length {
        sip_hash128_string(stream_name)
    } else {
        stream_name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::part::{ChecksumEntry, InMemoryPartStorage, Substream};

    fn stream(name: &str) -> StreamId {
        StreamId {
            name: name.to_string(),
            path: vec![Substream::Regular],
        }
    }

    #[test]
    fn test_resolve_with_checksums() {
        let storage = InMemoryPartStorage::new("all_1_1_0");
        let long = "x".repeat(200);
        let hashed = sip_hash128_string(&long);

        let mut checksums = Checksums::new();
        checksums.add_file("v1.bin", ChecksumEntry::of_plain(b""));
        checksums.add_file(format!("{hashed}.bin"), ChecksumEntry::of_plain(b""));

        let resolver = StreamNameResolver::new(&checksums, &storage, MarkType::new(true, false));
        assert_eq!(resolver.resolve(&stream("v1")), "v1");
        assert_eq!(resolver.resolve(&stream(&long)), hashed);
        assert_eq!(resolver.marks_file(&stream(&long)), format!("{hashed}.mrk2"));
        // unknown streams keep their literal name
        assert_eq!(resolver.data_file(&stream("v2")), "v2.bin");
    }

    #[test]
    fn test_resolve_by_probing_storage() {
        let storage = InMemoryPartStorage::new("all_1_1_0");
        let long = "y".repeat(200);
        let hashed = sip_hash128_string(&long);
        storage.put("v1.mrk", vec![0u8; 16]);
        storage.put(format!("{hashed}.mrk"), vec![0u8; 16]);

        let checksums = Checksums::new();
        let resolver = StreamNameResolver::new(&checksums, &storage, MarkType::new(false, false));
        assert_eq!(resolver.marks_file(&stream("v1")), "v1.mrk");
        assert_eq!(resolver.marks_file(&stream(&long)), format!("{hashed}.mrk"));
    }

    #[test]
    fn test_stream_file_base_name() {
        assert_eq!(stream_file_base_name("v1", true, 127), "v1");
        let long = "z".repeat(127);
        assert_eq!(stream_file_base_name(&long, true, 127), sip_hash128_string(&long));
        assert_eq!(stream_file_base_name(&long, false, 127), long);
    }
}
