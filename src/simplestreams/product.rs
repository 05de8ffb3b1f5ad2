use serde::Deserialize;
use std::collections::HashMap;

use super::{Item, StreamImage};
use crate::helpers::simplestreams_architecture;

#[derive(Debug, Deserialize)]
pub struct Product {
    #[serde(default)]
    arch: Option<String>,

    #[serde(default)]
    os: Option<String>,

    #[serde(default)]
    release: Option<String>,

    #[serde(default)]
    release_title: Option<String>,

    #[serde(default)]
    aliases: Option<String>,

    #[serde(default)]
    versions: HashMap<String, super::Version>,
}

impl Product {
    /// Product architecture in the endpoint's naming. Older catalogues omit
    /// the field, in which case the last segment of the product id is used.
    fn native_arch(&self, product_id: &str) -> Option<&'static str> {
        let arch = self
            .arch
            .as_deref()
            .or_else(|| product_id.rsplit(':').next())?;
        simplestreams_architecture(arch)
    }

    /// Every name the product answers to.
    fn alias_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .aliases
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(os) = self.os.as_deref().map(str::to_lowercase) {
            for release in [self.release.as_deref(), self.release_title.as_deref()]
                .into_iter()
                .flatten()
            {
                names.push(format!("{os}/{}", release.to_lowercase()));
            }
        }

        names.sort();
        names.dedup();
        names
    }

    pub fn latest_image(&self, product_id: &str) -> Option<StreamImage> {
        let arch = self.native_arch(product_id)?;

        // Version keys are build serials (e.g. 20240513 or 20240513_07:42),
        // so the lexicographically largest one is the newest.
        let mut serials: Vec<&String> = self.versions.keys().collect();
        serials.sort();
        serials.reverse();

        serials.into_iter().find_map(|serial| {
            let version = self.versions.get(serial)?;
            let container = version.fingerprint(Item::container_fingerprint);
            let vm = version.fingerprint(Item::vm_fingerprint);
            if container.is_none() && vm.is_none() {
                return None;
            }

            Some(StreamImage::new(
                product_id.to_string(),
                arch.to_string(),
                self.os.clone().unwrap_or_default(),
                self.release.clone().unwrap_or_default(),
                serial.clone(),
                self.alias_names(),
                container,
                vm,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Product;

    fn product(json: &str) -> Product {
        serde_json::from_str(json).expect("valid product")
    }

    #[test]
    fn newest_version_with_fingerprints_wins() {
        let fp_old = "a".repeat(64);
        let fp_new = "b".repeat(64);
        let p = product(&format!(
            r#"{{
                "arch": "amd64",
                "os": "Ubuntu",
                "release": "jammy",
                "release_title": "22.04",
                "aliases": "22.04,jammy,lts",
                "versions": {{
                    "20240101": {{"items": {{"lxd.tar.xz": {{"ftype": "lxd.tar.xz", "combined_squashfs_sha256": "{fp_old}"}}}}}},
                    "20240513": {{"items": {{"lxd.tar.xz": {{"ftype": "lxd.tar.xz", "combined_squashfs_sha256": "{fp_new}", "combined_disk-kvm-img_sha256": "{fp_old}"}}}}}},
                    "20240601": {{"items": {{"root.squashfs": {{"ftype": "squashfs", "sha256": "{fp_new}"}}}}}}
                }}
            }}"#
        ));

        let image = p
            .latest_image("com.ubuntu.cloud:server:22.04:amd64")
            .unwrap();
        assert_eq!(image.arch(), "x86_64");
        assert_eq!(image.serial(), "20240513");
        assert_eq!(image.container_fingerprint(), Some(fp_new.as_str()));
        assert_eq!(image.vm_fingerprint(), Some(fp_old.as_str()));
        assert!(image.has_alias("jammy"));
        assert!(image.has_alias("ubuntu/22.04"));
        assert!(!image.has_alias("focal"));
    }

    #[test]
    fn architecture_falls_back_to_product_id() {
        let fp = "c".repeat(64);
        let p = product(&format!(
            r#"{{"versions": {{"1": {{"items": {{"lxd_combined.tar.gz": {{"ftype": "lxd_combined.tar.gz", "sha256": "{fp}"}}}}}}}}}}"#
        ));

        let image = p.latest_image("images:alpine:3.19:arm64").unwrap();
        assert_eq!(image.arch(), "aarch64");
        assert_eq!(image.container_fingerprint(), Some(fp.as_str()));
        assert_eq!(image.vm_fingerprint(), None);
    }

    #[test]
    fn unknown_architecture_is_skipped() {
        let p = product(r#"{"arch": "sparc", "versions": {}}"#);
        assert!(p.latest_image("x:sparc").is_none());
    }
}
