use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct Version {
    #[serde(default)]
    items: HashMap<String, super::Item>,
}

impl Version {
    /// First valid fingerprint `pick` finds on the items of this version.
    pub fn fingerprint(&self, pick: impl Fn(&super::Item) -> Option<&str>) -> Option<String> {
        let mut names: Vec<&String> = self.items.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.items.get(name))
            .filter_map(&pick)
            .find(|hash| is_fingerprint(hash))
            .map(|hash| hash.to_lowercase())
    }
}

/// A fingerprint is a sha256 digest in hex.
fn is_fingerprint(value: &str) -> bool {
    hex::decode(value).map(|bytes| bytes.len() == 32).unwrap_or(false)
}
