// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Arc;

use partstore::catalog::{ColumnCatalog, ColumnsRef};
use partstore::storage::part::*;
use partstore::storage::StorageResult;
use partstore::types::DataType;
use test_case::test_case;

const PART_NAME: &str = "all_1_1_0";

fn column(name: &str, datatype: &str) -> ColumnCatalog {
    ColumnCatalog::new(name, datatype.parse::<DataType>().unwrap())
}

fn fixed_options() -> PartOptions {
    PartOptions {
        index_granularity_bytes: 0,
        ..PartOptions::default_for_test()
    }
}

/// Little-endian values `0..rows` of `width` bytes each, split by `granularity`.
fn granules(granularity: &[u64], width: usize) -> Vec<Vec<u8>> {
    let mut next = 0u64;
    granularity
        .iter()
        .map(|&rows| {
            let granule = (next..next + rows)
                .flat_map(|x| x.to_le_bytes()[..width].to_vec())
                .collect();
            next += rows;
            granule
        })
        .collect()
}

fn stream(granularity: &[u64], width: usize) -> StreamData {
    let granules = granules(granularity, width);
    StreamData::from_granules(granules.iter().map(|g| &g[..]), CompressionMethod::Lz4)
}

/// Write a part with one `width`-byte value stream per entry of `streams`.
fn write_part(
    storage: PartStorageRef,
    options: PartOptions,
    columns: Vec<ColumnCatalog>,
    streams: &[(&str, &[(&str, usize)])],
    granularity: &[u64],
) -> StorageResult<DataPart> {
    let columns: ColumnsRef = columns.into();
    let mut writer = MutableDataPart::new(PART_NAME, storage, options)?.get_writer(
        columns,
        IndexGranularity::from_granularities(granularity.iter().copied()),
    );
    for (column_name, column_streams) in streams {
        let data = column_streams
            .iter()
            .map(|(name, width)| (name.to_string(), stream(granularity, *width)))
            .collect();
        writer.write_column(column_name, data)?;
    }
    writer.finish()
}

fn two_u64_columns(storage: PartStorageRef, options: PartOptions, granularity: &[u64]) -> DataPart {
    write_part(
        storage,
        options,
        vec![column("v1", "UInt64"), column("v2", "UInt64")],
        &[("v1", &[("v1", 8)]), ("v2", &[("v2", 8)])],
        granularity,
    )
    .unwrap()
}

/// Drop `file` from the checksum index of the part.
fn unregister(storage: &InMemoryPartStorage, file: &str) {
    let mut checksums = Checksums::new();
    for (name, entry) in Checksums::load(storage).unwrap().unwrap().files() {
        if name != file {
            checksums.add_file(name, *entry);
        }
    }
    storage.remove(CHECKSUMS_FILE_NAME);
    checksums.write(storage).unwrap();
}

fn reload(storage: &InMemoryPartStorage, options: PartOptions) -> StorageResult<DataPart> {
    PartLoader::new(PART_NAME, Arc::new(storage.clone()), options).load()
}

#[test]
fn test_fixed_granularity_part() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let part = two_u64_columns(Arc::new(storage.clone()), fixed_options(), &[8192, 8192, 3616]);

    // 3 marks of 16 bytes for 20000 rows
    assert_eq!(storage.get("v1.mrk").unwrap().len(), 3 * 16);
    let info = IndexGranularityInfo::new(MarkType::new(false, false), 8192);
    let decoded = load_index_granularity(&storage, &info, "v1.mrk", PART_NAME).unwrap();
    assert_eq!(decoded.granularities().collect::<Vec<_>>(), vec![8192; 3]);

    assert_eq!(part.rows_count(), 20000);
    assert!(part.index_granularity().is_initialized());
    assert_eq!(
        part.index_granularity().granularities().collect::<Vec<_>>(),
        vec![8192, 8192, 3616]
    );
}

#[test_case(false; "plain marks")]
#[test_case(true; "compressed marks")]
fn test_adaptive_granularity_part(compress_marks: bool) {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let options = PartOptions {
        compress_marks,
        ..PartOptions::default_for_test()
    };
    let part = two_u64_columns(Arc::new(storage.clone()), options, &[100, 250, 17]);

    assert_eq!(
        part.index_granularity().granularities().collect::<Vec<_>>(),
        vec![100, 250, 17]
    );
    assert_eq!(part.rows_count(), 367);
    assert_eq!(part.index_granularity_info().mark_type.compressed, compress_marks);
    assert_eq!(part.index_granularity().mark_of_row(120), Some(1));
}

#[test]
fn test_mismatched_mark_sizes_without_checksums() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    two_u64_columns(Arc::new(storage.clone()), fixed_options(), &[8192, 8192, 3616]);
    storage.remove(CHECKSUMS_FILE_NAME);

    // legacy parts still load with consistent marks
    reload(&storage, fixed_options()).unwrap();

    storage.put("v2.mrk", vec![0u8; 32]);
    let err = reload(&storage, fixed_options()).unwrap_err();
    assert!(err.is_size_mismatch(), "{err}");

    storage.put("v2.mrk", vec![]);
    let err = reload(&storage, fixed_options()).unwrap_err();
    assert!(err.is_size_mismatch(), "{err}");
}

#[test]
fn test_mismatched_compressed_mark_sizes_without_checksums() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let options = PartOptions {
        compress_marks: true,
        ..PartOptions::default_for_test()
    };
    two_u64_columns(Arc::new(storage.clone()), options.clone(), &[100, 250, 17]);
    storage.remove(CHECKSUMS_FILE_NAME);
    reload(&storage, options.clone()).unwrap();

    // two of the three marks, compressed again
    let mark_type = MarkType::new(true, true);
    let positions: Vec<_> = read_marks(&storage, "v2.cmrk2", mark_type, PART_NAME)
        .unwrap()
        .iter()
        .map(|mark| mark.position)
        .take(2)
        .collect();
    let (marks, _) = encode_marks(
        &positions,
        &IndexGranularity::from_granularities([100, 250]),
        mark_type,
        options.marks_compress_block_size,
    );
    storage.put("v2.cmrk2", marks);
    let err = reload(&storage, options.clone()).unwrap_err();
    assert!(err.is_size_mismatch(), "{err}");

    storage.put("v2.cmrk2", vec![]);
    let err = reload(&storage, options).unwrap_err();
    assert!(err.is_size_mismatch(), "{err}");
    assert!(err.kind().to_string().contains("empty"), "{err}");
}

#[test]
fn test_legacy_part_without_column_marks() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    two_u64_columns(Arc::new(storage.clone()), fixed_options(), &[8192, 1000]);
    storage.remove(CHECKSUMS_FILE_NAME);
    storage.remove("v2.mrk");
    storage.remove("v2.bin");

    let part = reload(&storage, fixed_options()).unwrap();
    assert_eq!(part.rows_count(), 9192);
    assert!(!part.has_column_files(&column("v2", "UInt64")));
    assert!(part.column_size(&column("v1", "UInt64")).is_empty());
}

#[test]
fn test_missing_mark_entry() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    two_u64_columns(Arc::new(storage.clone()), PartOptions::default_for_test(), &[100, 100]);

    unregister(&storage, "v2.mrk2");

    let err = reload(&storage, PartOptions::default_for_test()).unwrap_err();
    assert!(err.is_missing_file());
    let message = err.kind().to_string();
    assert!(message.contains("v2.mrk2"), "{message}");
    assert!(message.contains("column v2"), "{message}");

    let options = PartOptions {
        require_part_metadata: false,
        ..PartOptions::default_for_test()
    };
    let part = reload(&storage, options).unwrap();
    assert!(!part.has_column_files(&column("v2", "UInt64")));
    assert!(part.has_column_files(&column("v1", "UInt64")));
    assert!(part.check_consistency(true).unwrap_err().is_missing_file());
}

#[test]
fn test_column_size_mismatch() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let columns: ColumnsRef = vec![column("v1", "UInt64")].into();
    let mut writer = MutableDataPart::new(
        PART_NAME,
        Arc::new(storage.clone()),
        PartOptions::default_for_test(),
    )
    .unwrap()
    .get_writer(columns, IndexGranularity::from_granularities([1000]));
    let mut data = stream(&[1000], 8);
    data.uncompressed_size = 999 * 8;
    writer
        .write_column("v1", HashMap::from([("v1".to_string(), data)]))
        .unwrap();
    let part = writer.finish().unwrap();

    let err = part.calculate_each_columns_size().unwrap_err();
    assert!(err.is_internal_consistency());
    let message = err.kind().to_string();
    assert!(message.contains("v1") && message.contains(PART_NAME), "{message}");
}

#[test]
fn test_shared_streams_are_counted_once() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let part = write_part(
        Arc::new(storage.clone()),
        PartOptions::default_for_test(),
        vec![
            column("n.a", "Array(UInt8)"),
            column("n.b", "Array(UInt16)"),
            column("id", "UInt32"),
        ],
        &[
            ("n.a", &[("n.size0", 8), ("n%2Ea", 1)][..]),
            ("n.b", &[("n%2Eb", 2)][..]),
            ("id", &[("id", 4)][..]),
        ],
        &[64, 64],
    )
    .unwrap();

    let sizes = part.checksums();
    let shared = sizes.get("n.size0.bin").unwrap().file_size;
    let (each, total) = part.calculate_each_columns_size().unwrap();
    assert_eq!(each.len(), 3);
    assert_eq!(
        each[0].1.data_compressed,
        shared + sizes.get("n%2Ea.bin").unwrap().file_size
    );
    assert_eq!(
        each[1].1.data_compressed,
        shared + sizes.get("n%2Eb.bin").unwrap().file_size
    );
    let sum: u64 = each.iter().map(|(_, size)| size.data_compressed).sum();
    assert_eq!(total.data_compressed, sum - shared);
    assert_eq!(each[2].1.data_uncompressed, 128 * 4);

    let marks: u64 = sizes
        .files()
        .filter(|(name, _)| name.ends_with(".mrk2"))
        .map(|(_, entry)| entry.file_size)
        .sum();
    assert_eq!(total.marks, marks);
    assert_eq!(part.total_columns_size().unwrap(), total);

    // a dedup pass over a subset of the columns
    let mut processed = HashSet::new();
    let a = part.column_size_dedup(&column("n.a", "Array(UInt8)"), Some(&mut processed));
    let b = part.column_size_dedup(&column("n.b", "Array(UInt16)"), Some(&mut processed));
    assert_eq!(a, each[0].1);
    assert_eq!(b.data_compressed, sizes.get("n%2Eb.bin").unwrap().file_size);
    assert!(processed.contains("n.size0"));
    assert_eq!(processed.len(), 3);
}

#[test]
fn test_dedup_uses_hashed_file_names() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let nested = "n".repeat(130);
    let a = format!("{nested}.a");
    let b = format!("{nested}.b");
    let size0 = format!("{nested}.size0");
    let a_stream = format!("{nested}%2Ea");
    let b_stream = format!("{nested}%2Eb");
    let part = write_part(
        Arc::new(storage.clone()),
        PartOptions::default_for_test(),
        vec![column(&a, "Array(UInt8)"), column(&b, "Array(UInt8)")],
        &[
            (a.as_str(), &[(size0.as_str(), 8), (a_stream.as_str(), 1)][..]),
            (b.as_str(), &[(b_stream.as_str(), 1)][..]),
        ],
        &[16],
    )
    .unwrap();

    let hashed = sip_hash128_string(&size0);
    let mut processed = HashSet::new();
    part.column_size_dedup(&column(&a, "Array(UInt8)"), Some(&mut processed));
    assert!(processed.contains(&hashed));
    assert!(!processed.contains(&size0));

    let shared = part.checksums().get(&format!("{hashed}.bin")).unwrap().file_size;
    let (each, total) = part.calculate_each_columns_size().unwrap();
    assert_eq!(
        total.data_compressed,
        each[0].1.data_compressed + each[1].1.data_compressed - shared
    );
}

#[test]
fn test_long_stream_names_are_hashed() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let long_name = "c".repeat(150);
    let part = write_part(
        Arc::new(storage.clone()),
        PartOptions::default_for_test(),
        vec![column(&long_name, "UInt64")],
        &[(long_name.as_str(), &[(long_name.as_str(), 8)][..])],
        &[10],
    )
    .unwrap();

    let hashed = sip_hash128_string(&long_name);
    assert!(storage.get(&format!("{hashed}.bin")).is_some());
    assert!(storage.get(&format!("{long_name}.bin")).is_none());
    assert_eq!(part.file_name_for_column(&column(&long_name, "UInt64")), Some(hashed.clone()));
    assert!(part.has_column_files(&column(&long_name, "UInt64")));

    // without checksums the hashed name is found by probing storage
    storage.remove(CHECKSUMS_FILE_NAME);
    let part = reload(&storage, PartOptions::default_for_test()).unwrap();
    assert_eq!(part.file_name_for_column(&column(&long_name, "UInt64")), Some(hashed));
}

#[test]
fn test_reader() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let part = Arc::new(two_u64_columns(
        Arc::new(storage.clone()),
        PartOptions::default_for_test(),
        &[100, 250, 17],
    ));

    let columns = [column("v2", "UInt64"), column("v9", "UInt64")];
    let reader = part
        .get_reader(&columns, vec![MarkRange::new(1, 3)])
        .unwrap();
    assert_eq!(reader.rows_to_read(), 267);
    assert_eq!(reader.row_ranges(), vec![100..367]);
    assert!(reader.columns()[0].has_files);
    assert!(!reader.columns()[1].has_files);

    let v2 = &reader.columns()[0].streams[0];
    assert_eq!(v2.data_file, "v2.bin");
    assert_eq!(v2.marks_file, "v2.mrk2");
    let marks = reader.read_marks(v2).unwrap();
    assert_eq!(marks.len(), 3);
    assert_eq!(marks[2].rows, Some(17));

    let data = reader.read_compressed(v2, MarkRange::new(1, 2)).unwrap();
    let mut decoded = vec![];
    CompressedReader::new(&data[..]).read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, granules(&[100, 250, 17], 8)[1]);

    assert!(part.get_reader(&columns, vec![MarkRange::new(2, 4)]).is_err());
}

#[test]
fn test_reader_with_mark_out_of_file() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let part = Arc::new(two_u64_columns(
        Arc::new(storage.clone()),
        PartOptions::default_for_test(),
        &[2, 2, 2],
    ));
    let reader = part
        .get_reader(&[column("v1", "UInt64")], vec![MarkRange::new(0, 3)])
        .unwrap();
    let v1 = &reader.columns()[0].streams[0];
    assert!(reader
        .read_compressed(v1, MarkRange::new(1, 1))
        .unwrap()
        .is_empty());

    // the data offset of mark 1 points far past the end of v1.bin
    let mut marks = storage.get("v1.mrk2").unwrap().to_vec();
    marks[24..32].copy_from_slice(&1_000_000u64.to_le_bytes());
    storage.put("v1.mrk2", marks);

    for range in [MarkRange::new(1, 1), MarkRange::new(0, 1), MarkRange::new(1, 2)] {
        let err = reader.read_compressed(v1, range).unwrap_err();
        assert!(err.is_size_mismatch(), "{err}");
    }
}

#[test]
fn test_broken_files() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    two_u64_columns(Arc::new(storage.clone()), PartOptions::default_for_test(), &[10, 10]);
    reload(&storage, PartOptions::default_for_test()).unwrap();

    let original = storage.get("v1.bin").unwrap();
    let mut flipped = original.to_vec();
    flipped[0] ^= 0xff;
    storage.put("v1.bin", flipped);
    // same size, so only a deep check notices
    let part = reload(&storage, PartOptions::default_for_test()).unwrap();
    assert!(part.verify_checksums().is_err());

    storage.put("v1.bin", original.slice(1..));
    let err = reload(&storage, PartOptions::default_for_test()).unwrap_err();
    assert!(err.is_size_mismatch());

    storage.remove("v1.bin");
    let err = reload(&storage, PartOptions::default_for_test()).unwrap_err();
    assert!(err.is_missing_file());
}

#[test]
fn test_legacy_row_count() {
    // adaptive marks know the row count
    let storage = InMemoryPartStorage::new(PART_NAME);
    two_u64_columns(Arc::new(storage.clone()), PartOptions::default_for_test(), &[30, 12]);
    storage.remove(COUNT_FILE_NAME);
    storage.remove(CHECKSUMS_FILE_NAME);
    assert_eq!(reload(&storage, PartOptions::default_for_test()).unwrap().rows_count(), 42);

    // fixed marks fall back to the uncompressed size of a fixed-width column
    let storage = InMemoryPartStorage::new(PART_NAME);
    two_u64_columns(Arc::new(storage.clone()), fixed_options(), &[8192, 808]);
    storage.remove(COUNT_FILE_NAME);
    unregister(&storage, COUNT_FILE_NAME);
    let options = PartOptions {
        require_part_metadata: false,
        ..fixed_options()
    };
    assert_eq!(reload(&storage, options).unwrap().rows_count(), 9000);
    assert!(reload(&storage, fixed_options())
        .unwrap_err()
        .is_missing_file());
}

#[test]
fn test_mark_type_of_legacy_part() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    two_u64_columns(Arc::new(storage.clone()), fixed_options(), &[8192, 5]);

    // opened with adaptive defaults, the fixed marks on disk win
    let part = reload(&storage, PartOptions::default_for_test()).unwrap();
    assert_eq!(part.index_granularity_info().mark_type, MarkType::new(false, false));
    assert_eq!(part.rows_count(), 8197);
}

#[test]
fn test_bad_row_count() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    two_u64_columns(Arc::new(storage.clone()), PartOptions::default_for_test(), &[10, 10]);
    // same size as the registered count.txt
    storage.put(COUNT_FILE_NAME, "21");
    let err = reload(&storage, PartOptions::default_for_test()).unwrap_err();
    assert!(err.is_internal_consistency(), "{err}");
}

#[test]
fn test_no_columns() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    storage.put(COLUMNS_FILE_NAME, "[]");
    assert!(reload(&storage, PartOptions::default_for_test())
        .unwrap_err()
        .is_missing_file());

    let storage = InMemoryPartStorage::new(PART_NAME);
    assert!(reload(&storage, PartOptions::default_for_test())
        .unwrap_err()
        .is_missing_file());
}

#[test_case(InMemoryPartStorage::new(PART_NAME), false, false; "local disk")]
#[test_case(InMemoryPartStorage::new(PART_NAME).with_remote(false), true, false; "remote")]
#[test_case(InMemoryPartStorage::new(PART_NAME).with_remote(true), true, true; "remote zero copy")]
fn test_remote_storage(storage: InMemoryPartStorage, remote: bool, zero_copy: bool) {
    let part = two_u64_columns(Arc::new(storage), PartOptions::default_for_test(), &[4]);
    assert_eq!(part.is_stored_on_remote_disk(), remote);
    assert_eq!(part.is_stored_on_remote_disk_with_zero_copy_support(), zero_copy);
}

#[test]
fn test_local_part_removed_on_drop() {
    let tempdir = tempfile::tempdir().unwrap();
    let dir = tempdir.path().join(PART_NAME);
    let storage = Arc::new(LocalPartStorage::create(&dir).unwrap());
    let part = Arc::new(two_u64_columns(storage, PartOptions::default_for_test(), &[16, 16]));
    assert!(dir.join("v1.bin").is_file());
    assert!(dir.join(CHECKSUMS_FILE_NAME).is_file());

    let reader = part
        .get_reader(&[column("v1", "UInt64")], vec![MarkRange::new(0, 2)])
        .unwrap();
    part.mark_for_removal();
    drop(part);
    // still referenced by the reader
    assert!(dir.is_dir());
    drop(reader);
    assert!(!dir.exists());
}

#[test]
fn test_nullable_and_tuple_columns() {
    let storage = InMemoryPartStorage::new(PART_NAME);
    let part = write_part(
        Arc::new(storage.clone()),
        PartOptions::default_for_test(),
        vec![
            column("x", "Nullable(UInt8)"),
            column("t", "Tuple(a UInt8, b UInt16)"),
        ],
        &[
            ("x", &[("x.null", 1), ("x", 1)]),
            ("t", &[("t%2Ea", 1), ("t%2Eb", 2)]),
        ],
        &[7],
    )
    .unwrap();
    for name in ["x.null.mrk2", "x.mrk2", "t%2Ea.mrk2", "t%2Eb.mrk2"] {
        assert!(part.checksums().contains(name), "{name}");
    }
    part.check_consistency(true).unwrap();
    part.calculate_each_columns_size().unwrap();
}
