// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Wide parts: one directory per part, with every column split into streams and
//! every stream stored in its own pair of files.
//!
//! For example, a part with columns `id UInt64` and `n.a Array(Nullable(String))`
//! has the following layout:
//!
//! ```plain
//! all_1_1_0           directory name = <partition>_<min block>_<max block>_<level>
//! |- columns.json     column names, types and serialization kinds
//! |- checksums.json   size and hash of every other file
//! |- count.txt        number of rows
//! |- id.bin           compressed values of id
//! |- id.mrk2          one mark per granule of id.bin
//! |- n.size0.bin      array sizes, shared by all columns of nested table n
//! |- n.size0.mrk2
//! |- n%2Ea.null.bin   null map of the array elements
//! |- n%2Ea.null.mrk2
//! |- n%2Ea.bin        the string elements
//! \- n%2Ea.mrk2
//! ```
//!
//! Stream names that are too long for the file system are replaced by their
//! SipHash-128. The checksum index records which name was used.
//!
//! A part is written by a [`PartWriter`] obtained from a [`MutableDataPart`], and
//! becomes an immutable [`DataPart`] once [`PartLoader`] has loaded and checked it.
//! Files of a loaded part never change; a part marked for removal deletes its
//! directory when the last reference is dropped.

mod checksum;
mod column_size;
mod compressed;
mod consistency;
mod data_part;
mod file_name;
mod index_granularity;
mod location;
mod mark;
mod options;
mod part_info;
mod reader;
mod serialization;
mod writer;

pub use checksum::*;
pub use column_size::*;
pub use compressed::{compress_frames, CompressedReader, CompressionMethod};
pub use data_part::{DataPart, DataPartRef, PartLoader, COLUMNS_FILE_NAME, COUNT_FILE_NAME};
pub use file_name::*;
pub use index_granularity::*;
pub use location::*;
pub use mark::*;
pub use options::*;
pub use part_info::*;
pub use reader::*;
pub use serialization::*;
pub use writer::*;
