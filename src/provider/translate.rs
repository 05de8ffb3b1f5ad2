use crate::helpers::{canonical_architecture, os_type_from_name};
use crate::lxd::InstanceFull;
use crate::params::{Address, AddressType, InstanceStatus, OsType, ProviderInstance};

use super::args::RunnerTags;

const IMAGE_OS_KEY: &str = "image.os";
const IMAGE_RELEASE_KEY: &str = "image.release";
const GLOBAL_SCOPE: &str = "global";

/// Project a native instance snapshot onto the orchestrator's model.
pub fn translate(full: &InstanceFull) -> ProviderInstance {
    let instance = &full.instance;
    let config = &instance.expanded_config;
    let image_os = config.get(IMAGE_OS_KEY).cloned().unwrap_or_default();

    let os_type = match os_type_from_name(&image_os) {
        OsType::Unknown => os_type_from_name(&RunnerTags::from_config(config).os_type),
        known => known,
    };

    let status = match &full.state {
        Some(state) if !state.status.is_empty() => &state.status,
        _ => &instance.status,
    };

    ProviderInstance {
        provider_id: instance.name.clone(),
        name: instance.name.clone(),
        os_type,
        os_name: image_os,
        os_version: config.get(IMAGE_RELEASE_KEY).cloned().unwrap_or_default(),
        os_arch: canonical_architecture(&instance.architecture),
        addresses: global_addresses(full),
        status: InstanceStatus::from_native(status),
    }
}

/// Globally scoped addresses of every interface, interfaces in name order.
fn global_addresses(full: &InstanceFull) -> Vec<Address> {
    let Some(network) = full.state.as_ref().and_then(|s| s.network.as_ref()) else {
        return Vec::new();
    };

    let mut interfaces: Vec<_> = network.iter().collect();
    interfaces.sort_by(|a, b| a.0.cmp(b.0));

    interfaces
        .into_iter()
        .flat_map(|(_, iface)| iface.addresses.iter())
        .filter(|addr| addr.scope == GLOBAL_SCOPE)
        .map(|addr| Address {
            address: addr.address.clone(),
            kind: AddressType::Public,
        })
        .collect()
}
