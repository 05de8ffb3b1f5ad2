mod models;

use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

use serde::Deserialize;

pub use models::{InstanceKind, RemoteImageSource, RemoteProtocol};

/// Connection information for an LXD server or cluster, decoded from the
/// provider TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LxdConfig {
    /// Path to the LXD unix socket. Preferred over `url` when set.
    #[serde(rename = "unix_socket_path", default)]
    pub unix_socket: String,

    /// Project in which instances are created. The project must already
    /// hold every profile used as a pool flavor.
    #[serde(default)]
    pub project_name: String,

    /// Always attach the `default` profile to new instances.
    #[serde(default)]
    pub include_default_profile: bool,

    /// Address of a remote LXD server, e.g. `https://10.10.10.1:8443/`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub client_certificate: String,
    #[serde(default)]
    pub client_key: String,
    /// Server certificate to trust instead of the system roots.
    #[serde(rename = "tls_server_certificate", default)]
    pub tls_server_cert: String,
    /// CA certificate when LXD runs in PKI mode.
    #[serde(default)]
    pub tls_ca: String,

    /// Remote image repositories, keyed by name.
    #[serde(default)]
    pub image_remotes: BTreeMap<String, RemoteImageSource>,

    #[serde(default)]
    pub secure_boot: bool,

    #[serde(default)]
    pub instance_type: Option<String>,
}

impl LxdConfig {
    /// Decode and validate a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Decode a TOML document without validating it.
    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        let mut config: LxdConfig = toml::from_str(data)?;
        for (name, remote) in config.image_remotes.iter_mut() {
            remote.name = name.clone();
        }
        Ok(config)
    }

    /// Instance kind to create; anything unrecognised means virtual machine.
    pub fn instance_kind(&self) -> InstanceKind {
        match self.instance_type.as_deref() {
            Some("container") => InstanceKind::Container,
            _ => InstanceKind::VirtualMachine,
        }
    }

    pub fn remotes(&self) -> RemoteCatalog {
        RemoteCatalog::new(self.image_remotes.values().cloned())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for remote in self.image_remotes.values() {
            remote.validate()?;
        }

        if !self.unix_socket.is_empty() {
            ensure_exists("unix_socket_path", &self.unix_socket)?;
            return Ok(());
        }

        if self.url.is_empty() {
            return Err(ConfigError::Invalid(
                "unix_socket or address must be specified".to_string(),
            ));
        }

        let url = url::Url::parse(&self.url)
            .map_err(|_| ConfigError::Invalid(format!("invalid LXD URL {}", self.url)))?;
        if url.scheme() != "https" {
            return Err(ConfigError::Invalid(format!(
                "address {} must be https",
                self.url
            )));
        }

        if self.client_certificate.is_empty() || self.client_key.is_empty() {
            return Err(ConfigError::Invalid(
                "client_certificate and client_key are mandatory".to_string(),
            ));
        }
        ensure_exists("client_certificate", &self.client_certificate)?;
        ensure_exists("client_key", &self.client_key)?;

        if !self.tls_server_cert.is_empty() {
            ensure_exists("tls_server_certificate", &self.tls_server_cert)?;
        }

        Ok(())
    }
}

fn ensure_exists(field: &'static str, path: &str) -> Result<(), ConfigError> {
    fs::metadata(path)
        .map(|_| ())
        .map_err(|source| ConfigError::Access {
            field,
            path: PathBuf::from(path),
            source,
        })
}

/// Immutable set of configured image remotes, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RemoteCatalog {
    remotes: BTreeMap<String, RemoteImageSource>,
}

impl RemoteCatalog {
    pub fn new(remotes: impl IntoIterator<Item = RemoteImageSource>) -> Self {
        Self {
            remotes: remotes
                .into_iter()
                .map(|r| (r.name().to_string(), r))
                .collect(),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&RemoteImageSource> {
        self.remotes.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.remotes.keys().cloned().collect()
    }
}

/// ---- Errors ----
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("error decoding config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("remote {name} is invalid: {reason}")]
    Remote { name: String, reason: String },
    #[error("failed to access {field} {path}: {source}")]
    Access {
        field: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("reading {field} {path}: {source}")]
    Tls {
        field: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}
