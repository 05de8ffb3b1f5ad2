use serde::Deserialize;

/// Metadata tarball item; combined hashes for the whole image hang off it.
pub const LXD_METADATA_FTYPE: &str = "lxd.tar.xz";
/// Unified tarball carrying metadata and rootfs in one file.
pub const LXD_COMBINED_FTYPE: &str = "lxd_combined.tar.gz";

#[derive(Debug, Deserialize)]
pub struct Item {
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    ftype: Option<String>,
    #[serde(default)]
    combined_sha256: Option<String>,
    #[serde(default)]
    combined_rootxz_sha256: Option<String>,
    #[serde(default)]
    combined_squashfs_sha256: Option<String>,
    #[serde(rename = "combined_disk-kvm-img_sha256", default)]
    combined_disk_kvm_img_sha256: Option<String>,
    #[serde(rename = "combined_disk-img_sha256", default)]
    combined_disk_img_sha256: Option<String>,
}

impl Item {
    pub fn ftype(&self) -> Option<&str> {
        self.ftype.as_deref()
    }

    fn is_metadata(&self) -> bool {
        self.ftype() == Some(LXD_METADATA_FTYPE)
    }

    /// Fingerprint of the container image this item describes, if any.
    pub fn container_fingerprint(&self) -> Option<&str> {
        if self.ftype() == Some(LXD_COMBINED_FTYPE) {
            return self.sha256.as_deref();
        }
        if !self.is_metadata() {
            return None;
        }
        self.combined_squashfs_sha256
            .as_deref()
            .or(self.combined_rootxz_sha256.as_deref())
            .or(self.combined_sha256.as_deref())
    }

    /// Fingerprint of the virtual-machine image this item describes, if any.
    pub fn vm_fingerprint(&self) -> Option<&str> {
        if !self.is_metadata() {
            return None;
        }
        self.combined_disk_kvm_img_sha256
            .as_deref()
            .or(self.combined_disk_img_sha256.as_deref())
    }
}
