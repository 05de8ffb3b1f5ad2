use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use super::ConfigError;

/// Protocol spoken by an image remote. Only simplestreams is supported.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteProtocol {
    #[default]
    SimpleStreams,
    Unsupported(String),
}

impl From<String> for RemoteProtocol {
    fn from(value: String) -> Self {
        match value.as_str() {
            "simplestreams" => RemoteProtocol::SimpleStreams,
            _ => RemoteProtocol::Unsupported(value),
        }
    }
}

impl From<RemoteProtocol> for String {
    fn from(value: RemoteProtocol) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RemoteProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteProtocol::SimpleStreams => f.write_str("simplestreams"),
            RemoteProtocol::Unsupported(other) => f.write_str(other),
        }
    }
}

/// Kind of instance created on the endpoint. Containers and virtual machines
/// live in disjoint image namespaces on the same remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceKind {
    #[serde(rename = "container")]
    Container,
    #[serde(rename = "virtual-machine")]
    VirtualMachine,
}

impl InstanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceKind::Container => "container",
            InstanceKind::VirtualMachine => "virtual-machine",
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote server from which the endpoint can fetch OS images.
///
/// The name is the key of the `[image_remotes.<name>]` table and is filled
/// in after decoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteImageSource {
    #[serde(skip)]
    pub(crate) name: String,
    #[serde(rename = "addr", default)]
    pub(crate) address: String,
    #[serde(default)]
    pub(crate) protocol: RemoteProtocol,
    #[serde(rename = "skip_verify", default)]
    pub(crate) insecure_skip_verify: bool,
}

impl RemoteImageSource {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            protocol: RemoteProtocol::SimpleStreams,
            insecure_skip_verify: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn protocol(&self) -> &RemoteProtocol {
        &self.protocol
    }

    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Remote {
            name: self.name.clone(),
            reason,
        };

        if self.protocol != RemoteProtocol::SimpleStreams {
            return Err(invalid(format!(
                "invalid remote protocol {}. Supported protocols: {}",
                self.protocol,
                RemoteProtocol::SimpleStreams
            )));
        }
        if self.address.is_empty() {
            return Err(invalid("missing address".to_string()));
        }

        let url = Url::parse(&self.address)
            .map_err(|e| invalid(format!("validating address {}: {e}", self.address)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid(format!(
                "address {} must be http or https",
                self.address
            )));
        }

        Ok(())
    }
}
