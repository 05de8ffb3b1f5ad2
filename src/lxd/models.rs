//! Native LXD REST shapes, limited to the fields the provider reads or
//! writes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::InstanceKind;

/// Body of `POST /1.0/instances`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstancesPost {
    pub name: String,
    pub architecture: String,
    pub profiles: Vec<String>,
    pub description: String,
    pub config: BTreeMap<String, String>,
    pub source: InstanceSource,
    #[serde(rename = "type")]
    pub kind: InstanceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub fingerprint: String,
    /// Image remote the endpoint pulls from; empty means its local store.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

/// Body of `PUT /1.0/instances/<name>/state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatePut {
    pub action: String,
    /// Seconds to wait for the action; `-1` waits forever.
    pub timeout: i64,
    pub force: bool,
    pub stateful: bool,
}

impl InstanceStatePut {
    /// Sentinel asking the endpoint to wait as long as the action takes.
    pub const WAIT_FOREVER: i64 = -1;

    pub fn new(action: &str, force: bool) -> Self {
        Self {
            action: action.to_string(),
            timeout: Self::WAIT_FOREVER,
            force,
            stateful: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Instance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub expanded_config: HashMap<String, String>,
}

/// Instance with its runtime state, as returned with `recursion=1`/`2`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct InstanceFull {
    #[serde(flatten)]
    pub instance: Instance,
    #[serde(default)]
    pub state: Option<InstanceState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct InstanceState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub network: Option<HashMap<String, InstanceStateNetwork>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct InstanceStateNetwork {
    #[serde(default)]
    pub addresses: Vec<InstanceStateNetworkAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct InstanceStateNetworkAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub scope: String,
}

/// Metadata of a background operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub err: String,
}

impl OperationInfo {
    pub fn failed(&self) -> bool {
        self.status_code >= 400 || self.status.eq_ignore_ascii_case("failure")
    }
}

/// Envelope wrapping every LXD response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
