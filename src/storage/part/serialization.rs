// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Decomposition of logical columns into physical streams.
//!
//! Every type family knows how its values are laid out on disk as a set of
//! substreams (values, array sizes, null maps, ...). A [`SubstreamPath`] names
//! one of them, and [`stream_name`] turns a column name and a path into the
//! stream name that both the data file and the mark file are derived from.
//!
//! Enumeration is deterministic: the checksum index and the files on disk are
//! keyed by these names, so the same column must always produce the same
//! streams.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::ColumnCatalog;

/// How a column is serialized. Persisted per column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializationKind {
    #[default]
    Default,
    /// Only non-default values are stored, along with their offsets.
    Sparse,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Substream {
    Regular,
    ArraySizes,
    ArrayElements,
    NullMap,
    NullableElements,
    TupleElement(String),
    SparseOffsets,
    SparseElements,
}

/// Path from the root of a column's serialization to one of its substreams.
pub type SubstreamPath = Vec<Substream>;

/// Per-type-family knowledge of the substreams of a column.
pub trait Serialization: Send + Sync + fmt::Debug {
    /// Calls `callback` with the path of every substream that is backed by a stream.
    /// `path` holds the enclosing substreams and is restored before returning.
    fn enumerate_streams(&self, path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath));

    fn kind(&self) -> SerializationKind {
        SerializationKind::Default
    }
}

pub type SerializationRef = Arc<dyn Serialization>;

fn leaf(path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath)) {
    path.push(Substream::Regular);
    callback(path);
    path.pop();
}

/// Fixed-width values represented by a number.
#[derive(Debug)]
pub struct NumberSerialization {
    width: usize,
}

impl NumberSerialization {
    pub fn new(width: usize) -> SerializationRef {
        Arc::new(Self { width })
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl Serialization for NumberSerialization {
    fn enumerate_streams(&self, path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath)) {
        leaf(path, callback)
    }
}

/// Length-prefixed variable width strings.
#[derive(Debug)]
pub struct StringSerialization;

impl StringSerialization {
    pub fn new() -> SerializationRef {
        Arc::new(Self)
    }
}

impl Serialization for StringSerialization {
    fn enumerate_streams(&self, path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath)) {
        leaf(path, callback)
    }
}

#[derive(Debug)]
pub struct FixedStringSerialization {
    width: usize,
}

impl FixedStringSerialization {
    pub fn new(width: usize) -> SerializationRef {
        Arc::new(Self { width })
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl Serialization for FixedStringSerialization {
    fn enumerate_streams(&self, path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath)) {
        leaf(path, callback)
    }
}

/// Arrays are a sizes stream plus the streams of their elements.
#[derive(Debug)]
pub struct ArraySerialization {
    nested: SerializationRef,
}

impl ArraySerialization {
    pub fn new(nested: SerializationRef) -> SerializationRef {
        Arc::new(Self { nested })
    }
}

impl Serialization for ArraySerialization {
    fn enumerate_streams(&self, path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath)) {
        path.push(Substream::ArraySizes);
        callback(path);
        path.pop();

        path.push(Substream::ArrayElements);
        self.nested.enumerate_streams(path, callback);
        path.pop();
    }
}

/// Nullable values are a null map stream plus the streams of the nested type.
#[derive(Debug)]
pub struct NullableSerialization {
    nested: SerializationRef,
}

impl NullableSerialization {
    pub fn new(nested: SerializationRef) -> SerializationRef {
        Arc::new(Self { nested })
    }
}

impl Serialization for NullableSerialization {
    fn enumerate_streams(&self, path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath)) {
        path.push(Substream::NullMap);
        callback(path);
        path.pop();

        path.push(Substream::NullableElements);
        self.nested.enumerate_streams(path, callback);
        path.pop();
    }
}

#[derive(Debug)]
pub struct TupleSerialization {
    elements: Vec<(String, SerializationRef)>,
}

impl TupleSerialization {
    pub fn new(elements: Vec<(String, SerializationRef)>) -> SerializationRef {
        Arc::new(Self { elements })
    }
}

impl Serialization for TupleSerialization {
    fn enumerate_streams(&self, path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath)) {
        for (name, element) in &self.elements {
            path.push(Substream::TupleElement(name.clone()));
            element.enumerate_streams(path, callback);
            path.pop();
        }
    }
}

/// Stores offsets of non-default values, then the values themselves.
#[derive(Debug)]
pub struct SparseSerialization {
    nested: SerializationRef,
}

impl SparseSerialization {
    pub fn new(nested: SerializationRef) -> SerializationRef {
        Arc::new(Self { nested })
    }
}

impl Serialization for SparseSerialization {
    fn enumerate_streams(&self, path: &mut SubstreamPath, callback: &mut dyn FnMut(&SubstreamPath)) {
        path.push(Substream::SparseOffsets);
        callback(path);
        path.pop();

        path.push(Substream::SparseElements);
        self.nested.enumerate_streams(path, callback);
        path.pop();
    }

    fn kind(&self) -> SerializationKind {
        SerializationKind::Sparse
    }
}

/// One physical stream of a column.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StreamId {
    /// Literal stream name, before any hashing of long names.
    pub name: String,
    pub path: SubstreamPath,
}

/// All streams of `column`, in serialization order.
pub fn enumerate_streams(column: &ColumnCatalog) -> Vec<StreamId> {
    let mut streams = vec![];
    column
        .serialization()
        .enumerate_streams(&mut vec![], &mut |path| {
            streams.push(StreamId {
                name: stream_name(column.name(), path),
                path: path.clone(),
            });
        });
    streams
}

/// Escape everything outside `[A-Za-z0-9_]` as `%XX`.
pub fn escape_for_file_name(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' {
            escaped.push(b as char);
        } else {
            escaped.push_str(&format!("%{b:02X}"));
        }
    }
    escaped
}

/// Table name of a nested column `n.x`, i.e. `n`. Names without an inner dot are returned
/// unchanged.
pub fn nested_table_name(column_name: &str) -> &str {
    match column_name.find('.') {
        Some(pos) if pos > 0 && pos + 1 < column_name.len() => &column_name[..pos],
        _ => column_name,
    }
}

/// Name of the stream of `column_name` at `path`.
///
/// The sizes stream of a top-level array column `n.x` is named after the nested table `n`,
/// which makes it shared by all `n.*` columns.
pub fn stream_name(column_name: &str, path: &[Substream]) -> String {
    let nested_table = nested_table_name(column_name);
    let mut name = if nested_table != column_name
        && path.len() == 1
        && path[0] == Substream::ArraySizes
    {
        escape_for_file_name(nested_table)
    } else {
        escape_for_file_name(column_name)
    };

    let mut array_level = 0;
    for substream in path {
        match substream {
            Substream::NullMap => name.push_str(".null"),
            Substream::ArraySizes => name.push_str(&format!(".size{array_level}")),
            Substream::ArrayElements => array_level += 1,
            Substream::TupleElement(element) => {
                name.push_str(&escape_for_file_name("."));
                name.push_str(&escape_for_file_name(element));
            }
            Substream::SparseOffsets => name.push_str(".sparse.idx"),
            Substream::Regular | Substream::NullableElements | Substream::SparseElements => {}
        }
    }
    name
}
