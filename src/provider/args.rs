//! Instance-argument builder: turns a bootstrap request plus a resolved image
//! into the creation request sent to the endpoint.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::cloudconfig::{CloudConfigRenderer, ToolFetcher};
use super::specs::ExtraSpecs;
use crate::config::{InstanceKind, RemoteProtocol};
use crate::error::{Error, Result};
use crate::helpers::image_resolver::ResolvedImage;
use crate::helpers::native_architecture;
use crate::lxd::InstancesPost;
use crate::lxd::models::InstanceSource;
use crate::params::{BootstrapInstance, OsType};

pub const USER_DATA_KEY: &str = "user.user-data";
pub const OS_TYPE_KEY: &str = "user.os-type";
pub const OS_ARCH_KEY: &str = "user.os-arch";
pub const CONTROLLER_ID_KEY: &str = "user.runner-controller-id";
pub const POOL_ID_KEY: &str = "user.runner-pool-id";
pub const SECURE_BOOT_KEY: &str = "security.secureboot";

pub const DEFAULT_PROFILE: &str = "default";
pub const INSTANCE_DESCRIPTION: &str = "Github runner provisioned by garm";

/// First line Windows VM agents look for before running the user data.
const WINDOWS_VM_MARKER: &str = "#ps1_sysnative\n";

/// Ownership and platform tags written on every instance we create.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunnerTags {
    pub os_type: String,
    pub os_arch: String,
    pub controller_id: String,
    pub pool_id: String,
}

impl RunnerTags {
    /// Read the tags back from an instance's expanded config. Missing keys
    /// come back empty.
    pub fn from_config(config: &HashMap<String, String>) -> Self {
        let get = |key: &str| config.get(key).cloned().unwrap_or_default();
        Self {
            os_type: get(OS_TYPE_KEY),
            os_arch: get(OS_ARCH_KEY),
            controller_id: get(CONTROLLER_ID_KEY),
            pool_id: get(POOL_ID_KEY),
        }
    }
}

/// Typed view of the flat config map of a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub user_data: String,
    pub tags: RunnerTags,
    /// `Some(false)` disables secure boot explicitly.
    pub secure_boot: Option<bool>,
}

impl InstanceConfig {
    fn into_map(self) -> BTreeMap<String, String> {
        let mut config = BTreeMap::from([
            (USER_DATA_KEY.to_string(), self.user_data),
            (OS_TYPE_KEY.to_string(), self.tags.os_type),
            (OS_ARCH_KEY.to_string(), self.tags.os_arch),
            (CONTROLLER_ID_KEY.to_string(), self.tags.controller_id),
            (POOL_ID_KEY.to_string(), self.tags.pool_id),
        ]);
        if let Some(enabled) = self.secure_boot {
            config.insert(SECURE_BOOT_KEY.to_string(), enabled.to_string());
        }
        config
    }
}

/// Fully resolved creation request, consumed once by the endpoint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationArgs {
    pub name: String,
    pub architecture: String,
    pub profiles: Vec<String>,
    pub description: String,
    pub config: InstanceConfig,
    pub fingerprint: String,
    pub server: String,
    pub protocol: RemoteProtocol,
    pub kind: InstanceKind,
}

impl CreationArgs {
    pub fn into_native(self) -> InstancesPost {
        InstancesPost {
            name: self.name,
            architecture: self.architecture,
            profiles: self.profiles,
            description: self.description,
            config: self.config.into_map(),
            source: InstanceSource {
                source_type: "image".to_string(),
                fingerprint: self.fingerprint,
                server: self.server,
                protocol: self.protocol.to_string(),
            },
            kind: self.kind,
        }
    }
}

pub struct ArgsBuilder {
    pub controller_id: String,
    pub kind: InstanceKind,
    pub include_default_profile: bool,
    pub secure_boot: bool,
    pub tools: Arc<dyn ToolFetcher>,
    pub renderer: Arc<dyn CloudConfigRenderer>,
}

impl ArgsBuilder {
    /// Profiles for `flavor`, checked against what the endpoint knows.
    fn profiles(&self, flavor: &str, known: &[String]) -> Result<Vec<String>> {
        if !known.iter().any(|p| p == flavor) {
            return Err(Error::ProfileNotFound {
                flavor: flavor.to_string(),
            });
        }

        let mut profiles = Vec::with_capacity(2);
        if self.include_default_profile && flavor != DEFAULT_PROFILE {
            profiles.push(DEFAULT_PROFILE.to_string());
        }
        profiles.push(flavor.to_string());
        Ok(profiles)
    }

    /// Build the creation request. Depends only on its inputs and the
    /// builder settings.
    pub fn build(
        &self,
        bootstrap: &BootstrapInstance,
        image: &ResolvedImage,
        profile_names: &[String],
    ) -> Result<CreationArgs> {
        if bootstrap.name.is_empty() {
            return Err(Error::Validation("missing name".to_string()));
        }

        let profiles = self.profiles(&bootstrap.flavor, profile_names)?;

        let architecture = native_architecture(&bootstrap.os_arch).ok_or_else(|| {
            Error::UnsupportedArchitecture {
                arch: bootstrap.os_arch.clone(),
            }
        })?;

        let specs = ExtraSpecs::parse(bootstrap.extra_specs.as_ref())?;
        let tools = self
            .tools
            .select(bootstrap.os_type, &bootstrap.os_arch, &bootstrap.tools)?;

        let mut bootstrap = bootstrap.clone();
        let options = &mut bootstrap.user_data_options;
        options.disable_updates_on_boot = specs.disable_updates;
        options.extra_packages = specs.extra_packages;
        options.enable_boot_debug = specs.enable_boot_debug;

        let mut user_data = self
            .renderer
            .render(&bootstrap, &tools, &specs.cloud_config)?;

        let windows_vm =
            bootstrap.os_type == OsType::Windows && self.kind == InstanceKind::VirtualMachine;
        if windows_vm {
            user_data.insert_str(0, WINDOWS_VM_MARKER);
        }

        Ok(CreationArgs {
            name: bootstrap.name.clone(),
            architecture: architecture.to_string(),
            profiles,
            description: INSTANCE_DESCRIPTION.to_string(),
            config: InstanceConfig {
                user_data,
                tags: RunnerTags {
                    os_type: bootstrap.os_type.to_string(),
                    os_arch: bootstrap.os_arch.clone(),
                    controller_id: self.controller_id.clone(),
                    pool_id: bootstrap.pool_id.clone(),
                },
                secure_boot: (windows_vm && !self.secure_boot).then_some(false),
            },
            fingerprint: image.fingerprint.clone(),
            server: image.server.clone(),
            protocol: image.protocol.clone(),
            kind: self.kind,
        })
    }
}
