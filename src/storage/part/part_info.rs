// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::fmt;
use std::str::FromStr;

use crate::storage::TracedStorageError;

/// Identity of a part, encoded in its name as
/// `<partition>_<min block>_<max block>_<level>[_<mutation>]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartInfo {
    pub partition_id: String,
    pub min_block: u64,
    pub max_block: u64,
    pub level: u32,
    pub mutation: u64,
}

impl PartInfo {
    /// Whether this part covers all blocks of `other`.
    pub fn contains(&self, other: &PartInfo) -> bool {
        self.partition_id == other.partition_id
            && self.min_block <= other.min_block
            && self.max_block >= other.max_block
            && self.level >= other.level
            && self.mutation >= other.mutation
    }
}

impl FromStr for PartInfo {
    type Err = TracedStorageError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let invalid = || TracedStorageError::decode(format!("invalid part name: {name}"));

        let fields: Vec<&str> = name.split('_').collect();
        let (partition_id, min_block, max_block, level, mutation) = match fields[..] {
            [partition, min, max, level] => (partition, min, max, level, None),
            [partition, min, max, level, mutation] => (partition, min, max, level, Some(mutation)),
            _ => return Err(invalid()),
        };
        if partition_id.is_empty() {
            return Err(invalid());
        }
        let info = PartInfo {
            partition_id: partition_id.to_string(),
            min_block: min_block.parse().map_err(|_| invalid())?,
            max_block: max_block.parse().map_err(|_| invalid())?,
            level: level.parse().map_err(|_| invalid())?,
            mutation: match mutation {
                Some(mutation) => mutation.parse().map_err(|_| invalid())?,
                None => 0,
            },
        };
        if info.min_block > info.max_block {
            return Err(invalid());
        }
        Ok(info)
    }
}

impl fmt::Display for PartInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.partition_id, self.min_block, self.max_block, self.level
        )?;
        if self.mutation != 0 {
            write!(f, "_{}", self.mutation)?;
        }
        Ok(())
    }
}
