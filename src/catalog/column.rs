// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use serde::{Deserialize, Serialize};

use crate::storage::part::{SerializationKind, SerializationRef};
use crate::types::DataType;

/// A logical column of a part: name, type and serialization kind.
///
/// A column has no 1:1 file mapping; its physical streams are derived from the
/// serialization of its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCatalog {
    name: String,
    #[serde(rename = "type", with = "datatype_str")]
    datatype: DataType,
    #[serde(default)]
    kind: SerializationKind,
}

impl ColumnCatalog {
    pub fn new(name: impl Into<String>, datatype: DataType) -> ColumnCatalog {
        ColumnCatalog {
            name: name.into(),
            datatype,
            kind: SerializationKind::Default,
        }
    }

    pub fn with_kind(mut self, kind: SerializationKind) -> ColumnCatalog {
        self.kind = kind;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    pub fn serialization_kind(&self) -> SerializationKind {
        self.kind
    }

    pub fn serialization(&self) -> SerializationRef {
        self.datatype.serialization(self.kind)
    }
}

mod datatype_str {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::DataType;

    pub fn serialize<S: Serializer>(ty: &DataType, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(ty)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DataType, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
