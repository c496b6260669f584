use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::model::{ColumnMeta, Encoding, TableSchema};
use crate::error::{Error, Result};

pub const FORMAT_VERSION: u32 = 1;

/// Footer of a container file: every group and where its payload lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerIndex {
    pub format_version: u32,
    pub groups: BTreeMap<String, GroupEntry>,
}

impl Default for ContainerIndex {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            groups: BTreeMap::new(),
        }
    }
}

/// One stored group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Byte offset of the payload from the start of the file.
    pub offset: u64,
    pub length: u64,
    pub columns: Vec<ColumnMeta>,
    /// Row count of each stored partition, in order.
    pub partitions: Vec<u64>,
    /// Dictionary of each categorical column, shared by all partitions.
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

impl GroupEntry {
    pub fn schema(&self) -> TableSchema {
        TableSchema::new(self.columns.clone())
    }

    pub fn num_rows(&self) -> u64 {
        self.partitions.iter().sum()
    }

    pub fn categorical_columns(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns
            .iter()
            .filter(|c| c.encoding == Encoding::Categorical)
    }
}

/// Normalise a group path: a leading `/`, non-empty segments, no whitespace.
/// `data` and `/data` name the same group.
pub fn normalize_group(name: &str) -> Result<String> {
    let invalid = |reason: &'static str| Error::InvalidGroupName {
        name: name.to_string(),
        reason,
    };

    let trimmed = name.strip_prefix('/').unwrap_or(name);
    if trimmed.is_empty() {
        return Err(invalid("empty name"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }
    if trimmed.split('/').any(str::is_empty) {
        return Err(invalid("empty path segment"));
    }
    Ok(format!("/{trimmed}"))
}
