//! Root-scoped filesystem gateway.
//!
//! Every client path goes through [`resolver::PathResolver`] before
//! [`gateway::StorageGateway`] touches the disk. Nothing is cached; each call
//! re-reads the filesystem.

pub mod gateway;
pub mod resolver;

use serde::{Deserialize, Serialize};

pub use gateway::{Download, StorageGateway};
pub use resolver::PathResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// A single listed, created or renamed entry. `path` is root-relative, `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub path: String,
}

impl Entry {
    pub fn new(parent_rel: &str, name: &str, kind: EntryKind) -> Self {
        Self { name: name.to_string(), kind, path: join_rel(parent_rel, name) }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub files: Vec<Entry>,
    pub dirs: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub data: Entry,
    pub is_leaf: bool,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFailure {
    pub path: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub uploaded: Vec<String>,
}

pub(crate) fn join_rel(parent_rel: &str, name: &str) -> String {
    if parent_rel.is_empty() { name.to_string() } else { format!("{parent_rel}/{name}") }
}
