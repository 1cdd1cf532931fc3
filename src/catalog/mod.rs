// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

pub use self::column::*;

mod column;

/// Ordered column list of a part, shared by the part and its readers.
pub type ColumnsRef = Arc<[ColumnCatalog]>;
