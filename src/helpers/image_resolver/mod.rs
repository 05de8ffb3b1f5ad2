use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{InstanceKind, RemoteCatalog, RemoteImageSource, RemoteProtocol};
use crate::error::{Error, Result};

/// Alias entry of an image remote: `target` is the fingerprint the alias
/// points at for one architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub name: String,
    pub kind: InstanceKind,
    pub target: String,
}

/// Full image record as served by a remote.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageRecord {
    pub fingerprint: String,
    pub architecture: String,
    pub properties: BTreeMap<String, String>,
}

/// Read-only view of a remote image server.
#[async_trait]
pub trait ImageServer: Send + Sync {
    /// Aliases called `name` for the given kind, keyed by architecture.
    async fn image_alias_architectures(
        &self,
        kind: InstanceKind,
        name: &str,
    ) -> Result<HashMap<String, AliasEntry>>;

    async fn image(&self, fingerprint: &str) -> Result<ImageRecord>;
}

/// Opens an [`ImageServer`] for a configured remote.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, remote: &RemoteImageSource) -> Result<Box<dyn ImageServer>>;
}

/// A concrete image, identified by fingerprint, found on a named remote.
/// `server` and `protocol` tell the endpoint where to pull it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub fingerprint: String,
    pub arch: String,
    pub remote: String,
    pub server: String,
    pub protocol: RemoteProtocol,
}

pub struct ImageResolver {
    remotes: RemoteCatalog,
    connector: Arc<dyn RemoteConnector>,
}

impl ImageResolver {
    pub fn new(remotes: RemoteCatalog, connector: Arc<dyn RemoteConnector>) -> Self {
        Self { remotes, connector }
    }

    /// Split `remote:name` and look the remote up. There is no default
    /// remote: a bare name is rejected.
    pub fn parse_image_name<'a>(
        &self,
        image: &'a str,
    ) -> Result<(&RemoteImageSource, &'a str)> {
        let Some((remote_name, image_name)) = image.split_once(':') else {
            return Err(Error::MissingRemote {
                image: image.to_string(),
            });
        };

        let remote = self
            .remotes
            .by_name(remote_name)
            .ok_or_else(|| Error::UnknownRemote {
                image: image.to_string(),
                configured: self.remotes.names(),
            })?;

        Ok((remote, image_name))
    }

    /// Resolve `image` for `kind` and the endpoint architecture `arch`.
    /// Every call queries the remote again.
    pub async fn resolve(
        &self,
        image: &str,
        kind: InstanceKind,
        arch: &str,
    ) -> Result<ResolvedImage> {
        let (remote, image_name) = self.parse_image_name(image)?;
        let server = self.connector.connect(remote)?;

        let record = lookup_by_alias(server.as_ref(), image_name, kind, arch).await?;
        debug!(
            remote = remote.name(),
            image = image_name,
            %kind,
            arch,
            fingerprint = %record.fingerprint,
            "resolved image"
        );

        Ok(ResolvedImage {
            fingerprint: record.fingerprint,
            arch: arch.to_string(),
            remote: remote.name().to_string(),
            server: remote.address().to_string(),
            protocol: remote.protocol().clone(),
        })
    }
}

async fn lookup_by_alias(
    server: &dyn ImageServer,
    image_name: &str,
    kind: InstanceKind,
    arch: &str,
) -> Result<ImageRecord> {
    let aliases = server.image_alias_architectures(kind, image_name).await?;

    let alias = aliases
        .get(arch)
        .ok_or_else(|| Error::ArchitectureNotFound {
            image: image_name.to_string(),
            arch: arch.to_string(),
        })?;

    server.image(&alias.target).await
}
