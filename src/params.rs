//! Orchestrator-facing types: the bootstrap request we receive on create and
//! the provider instance we hand back for every query.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
    #[default]
    Unknown,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Windows => "windows",
            OsType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Error,
    #[default]
    Unknown,
}

impl InstanceStatus {
    /// Case-insensitive mapping of the endpoint's status string.
    pub fn from_native(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "running" => InstanceStatus::Running,
            "stopped" => InstanceStatus::Stopped,
            "error" => InstanceStatus::Error,
            _ => InstanceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: AddressType,
}

/// Canonical projection of an endpoint instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub provider_id: String,
    pub name: String,
    pub os_type: OsType,
    pub os_name: String,
    pub os_version: String,
    pub os_arch: String,
    pub addresses: Vec<Address>,
    pub status: InstanceStatus,
}

/// One downloadable build of the runner agent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunnerApplicationDownload {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_download_token: Option<String>,
}

/// Cloud-init knobs derived from the pool's extra specs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserDataOptions {
    #[serde(default)]
    pub disable_updates_on_boot: bool,
    #[serde(default)]
    pub extra_packages: Vec<String>,
    #[serde(default)]
    pub enable_boot_debug: bool,
}

/// Provisioning request sent by the orchestrator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BootstrapInstance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tools: Vec<RunnerApplicationDownload>,
    #[serde(default)]
    pub repo_url: String,
    #[serde(rename = "callback-url", default)]
    pub callback_url: String,
    #[serde(rename = "metadata-url", default)]
    pub metadata_url: String,
    #[serde(rename = "instance-token", default)]
    pub instance_token: String,
    #[serde(rename = "ssh-keys", default)]
    pub ssh_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_specs: Option<serde_json::Value>,
    #[serde(default)]
    pub os_type: OsType,
    /// Kept as sent so an unsupported value can be reported verbatim.
    #[serde(rename = "arch", default)]
    pub os_arch: String,
    #[serde(default)]
    pub flavor: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub pool_id: String,
    #[serde(default)]
    pub user_data_options: UserDataOptions,
}
