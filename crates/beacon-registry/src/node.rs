//! Registered node model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Instance attributes (address, version, ...) attached to a node
pub type Metadata = HashMap<String, String>;

/// A service instance as registered in, or read back from, the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Instance identifier, unique within one service and scheme
    pub name: String,
    /// Instance attributes; `None` when absent or undecodable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Add a single metadata attribute, creating the mapping if needed
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }

    /// Look up a metadata attribute
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }
}
