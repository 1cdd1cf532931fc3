// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! On-disk layout, sparse mark index and integrity checks of immutable wide
//! column parts.

#![deny(unused_must_use)]

pub mod catalog;
pub mod storage;
pub mod types;
