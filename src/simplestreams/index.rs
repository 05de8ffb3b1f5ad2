use serde::Deserialize;
use std::collections::HashMap;

/// Datatype of the index entries that describe downloadable images.
pub const IMAGE_DOWNLOADS: &str = "image-downloads";

/// `streams/v1/index.json`: the table of contents of a simplestreams remote.
#[derive(Debug, Deserialize)]
pub struct Index {
    #[serde(default)]
    index: HashMap<String, IndexEntry>,
}

#[derive(Debug, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    datatype: String,
    #[serde(default)]
    path: String,
}

impl Index {
    /// Relative paths of every products file carrying image downloads,
    /// sorted so repeated reads query the remote in the same order.
    pub fn image_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .index
            .values()
            .filter(|entry| entry.datatype == IMAGE_DOWNLOADS && !entry.path.is_empty())
            .map(|entry| entry.path.as_str())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}
