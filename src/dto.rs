//! Request bodies accepted by the HTTP routes. Responses reuse the storage types directly.

use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

/// `{"path": ...}`; a missing or `null` path means the storage root.
#[serde_as]
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PathRef {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDirRequest {
    #[serde(default)]
    pub parent: PathRef,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub target: PathRef,
    pub new_name: String,
}

pub type DeleteRequest = Vec<PathRef>;
