// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Storage of immutable column parts.

mod error;
pub mod part;

pub use error::*;
