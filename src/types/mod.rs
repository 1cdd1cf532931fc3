// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Logical column types and their textual grammar.
//!
//! The grammar is the one used in `columns.json`, e.g. `UInt64`,
//! `Array(Nullable(String))` or `Tuple(a UInt8, b FixedString(16))`.

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;

use crate::storage::part::{
    ArraySerialization, FixedStringSerialization, NullableSerialization, NumberSerialization,
    SerializationKind, SerializationRef, SparseSerialization, StringSerialization,
    TupleSerialization,
};

/// Inner data type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    Date,
    DateTime,
    String,
    FixedString(usize),
    Array(Box<DataType>),
    Nullable(Box<DataType>),
    Tuple(Vec<(String, DataType)>),
}

impl DataType {
    /// Byte width of a single value, for types whose values are represented by a number.
    pub fn value_width(&self) -> Option<usize> {
        match self {
            Self::UInt8 | Self::Int8 | Self::Bool => Some(1),
            Self::UInt16 | Self::Int16 | Self::Date => Some(2),
            Self::UInt32 | Self::Int32 | Self::Float32 | Self::DateTime => Some(4),
            Self::UInt64 | Self::Int64 | Self::Float64 => Some(8),
            _ => None,
        }
    }

    pub fn is_value_represented_by_number(&self) -> bool {
        self.value_width().is_some()
    }

    pub fn has_subtypes(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Nullable(_) | Self::Tuple(_))
    }

    /// Builds the serialization of this type. `Sparse` only wraps the outermost level.
    pub fn serialization(&self, kind: SerializationKind) -> SerializationRef {
        let inner = self.default_serialization();
        match kind {
            SerializationKind::Default => inner,
            SerializationKind::Sparse => SparseSerialization::new(inner),
        }
    }

    fn default_serialization(&self) -> SerializationRef {
        match self {
            Self::String => StringSerialization::new(),
            Self::FixedString(n) => FixedStringSerialization::new(*n),
            Self::Array(nested) => ArraySerialization::new(nested.default_serialization()),
            Self::Nullable(nested) => NullableSerialization::new(nested.default_serialization()),
            Self::Tuple(elements) => TupleSerialization::new(
                elements
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.default_serialization()))
                    .collect(),
            ),
            // all remaining types are fixed-width numbers
            ty => NumberSerialization::new(ty.value_width().unwrap_or_default()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UInt8 => write!(f, "UInt8"),
            Self::UInt16 => write!(f, "UInt16"),
            Self::UInt32 => write!(f, "UInt32"),
            Self::UInt64 => write!(f, "UInt64"),
            Self::Int8 => write!(f, "Int8"),
            Self::Int16 => write!(f, "Int16"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float32 => write!(f, "Float32"),
            Self::Float64 => write!(f, "Float64"),
            Self::Bool => write!(f, "Bool"),
            Self::Date => write!(f, "Date"),
            Self::DateTime => write!(f, "DateTime"),
            Self::String => write!(f, "String"),
            Self::FixedString(n) => write!(f, "FixedString({n})"),
            Self::Array(nested) => write!(f, "Array({nested})"),
            Self::Nullable(nested) => write!(f, "Nullable({nested})"),
            Self::Tuple(elements) => write!(
                f,
                "Tuple({})",
                elements
                    .iter()
                    .map(|(name, ty)| format!("{name} {ty}"))
                    .join(", ")
            ),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to parse data type `{input}`: {reason}")]
pub struct ParseTypeError {
    input: String,
    reason: &'static str,
}

impl FromStr for DataType {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseTypeError {
            input: s.to_string(),
            reason,
        };
        let s = s.trim();
        let Some(open) = s.find('(') else {
            return match s {
                "UInt8" => Ok(Self::UInt8),
                "UInt16" => Ok(Self::UInt16),
                "UInt32" => Ok(Self::UInt32),
                "UInt64" => Ok(Self::UInt64),
                "Int8" => Ok(Self::Int8),
                "Int16" => Ok(Self::Int16),
                "Int32" => Ok(Self::Int32),
                "Int64" => Ok(Self::Int64),
                "Float32" => Ok(Self::Float32),
                "Float64" => Ok(Self::Float64),
                "Bool" => Ok(Self::Bool),
                "Date" => Ok(Self::Date),
                "DateTime" => Ok(Self::DateTime),
                "String" => Ok(Self::String),
                _ => Err(err("unknown type")),
            };
        };
        let args = s[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| err("unbalanced parentheses"))?;
        match &s[..open] {
            "FixedString" => args
                .trim()
                .parse()
                .map(Self::FixedString)
                .map_err(|_| err("invalid FixedString width")),
            "Array" => Ok(Self::Array(Box::new(args.parse()?))),
            "Nullable" => Ok(Self::Nullable(Box::new(args.parse()?))),
            "Tuple" => {
                let mut elements = vec![];
                for element in split_top_level(args).ok_or_else(|| err("unbalanced parentheses"))? {
                    let (name, ty) = element
                        .trim()
                        .split_once(' ')
                        .ok_or_else(|| err("tuple elements must be named"))?;
                    elements.push((name.to_string(), ty.parse()?));
                }
                if elements.is_empty() {
                    return Err(err("empty tuple"));
                }
                Ok(Self::Tuple(elements))
            }
            _ => Err(err("unknown type")),
        }
    }
}

/// Splits `a T, b Array(Tuple(x U, y V))` on commas that are not nested in parentheses.
fn split_top_level(s: &str) -> Option<Vec<&str>> {
    let mut parts = vec![];
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    if !s[start..].trim().is_empty() {
        parts.push(&s[start..]);
    }
    Some(parts)
}
