use std::collections::BTreeMap;

use crate::config::InstanceKind;

/// Normalised view of one simplestreams product: the newest build and the
/// fingerprints under which the endpoint knows it.
#[derive(Debug, Clone)]
pub struct StreamImage {
    product_id: String,
    arch: String,
    os: String,
    release: String,
    serial: String,
    aliases: Vec<String>,
    container_fingerprint: Option<String>,
    vm_fingerprint: Option<String>,
}

impl StreamImage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product_id: String,
        arch: String,
        os: String,
        release: String,
        serial: String,
        aliases: Vec<String>,
        container_fingerprint: Option<String>,
        vm_fingerprint: Option<String>,
    ) -> Self {
        Self {
            product_id,
            arch,
            os,
            release,
            serial,
            aliases,
            container_fingerprint,
            vm_fingerprint,
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// Architecture, in the endpoint's naming (e.g. x86_64).
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Build serial
    /// eg. 20240513
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn container_fingerprint(&self) -> Option<&str> {
        self.container_fingerprint.as_deref()
    }

    pub fn vm_fingerprint(&self) -> Option<&str> {
        self.vm_fingerprint.as_deref()
    }

    pub fn fingerprint(&self, kind: InstanceKind) -> Option<&str> {
        match kind {
            InstanceKind::Container => self.container_fingerprint(),
            InstanceKind::VirtualMachine => self.vm_fingerprint(),
        }
    }

    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|alias| alias == name)
    }

    pub fn has_fingerprint(&self, fingerprint: &str) -> bool {
        self.container_fingerprint() == Some(fingerprint) || self.vm_fingerprint() == Some(fingerprint)
    }

    /// Image properties in the form the endpoint stores them.
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        properties.insert("os".to_string(), self.os.clone());
        properties.insert("release".to_string(), self.release.clone());
        properties.insert("serial".to_string(), self.serial.clone());
        properties.insert("architecture".to_string(), self.arch.clone());
        properties
    }
}
