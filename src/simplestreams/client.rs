use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{Catalog, Index, StreamImage};
use crate::config::{InstanceKind, RemoteImageSource};
use crate::error::{Error, Result};
use crate::helpers::image_resolver::{
    AliasEntry, ImageRecord, ImageServer, RemoteConnector,
};

const INDEX_PATH: &str = "streams/v1/index.json";
const USER_AGENT: &str = concat!("rust-lxd-provider/", env!("CARGO_PKG_VERSION"));

/// Opens a [`SimpleStreamsServer`] per configured remote.
#[derive(Debug, Default)]
pub struct SimpleStreamsConnector;

impl RemoteConnector for SimpleStreamsConnector {
    fn connect(&self, remote: &RemoteImageSource) -> Result<Box<dyn ImageServer>> {
        Ok(Box::new(SimpleStreamsServer::new(remote)?))
    }
}

/// A simplestreams remote. The catalogue is downloaded on first use and kept
/// for the lifetime of this value only.
pub struct SimpleStreamsServer {
    base: Url,
    client: Client,
    images: OnceCell<Vec<StreamImage>>,
}

impl SimpleStreamsServer {
    pub fn new(remote: &RemoteImageSource) -> Result<Self> {
        // A trailing slash keeps the last path segment when joining.
        let mut address = remote.address().to_string();
        if !address.ends_with('/') {
            address.push('/');
        }
        let base = Url::parse(&address)
            .map_err(|e| Error::transport(&format!("parsing remote {}", remote.name()), e))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(remote.insecure_skip_verify())
            .build()
            .map_err(|e| Error::transport("building simplestreams client", e))?;

        Ok(Self {
            base,
            client,
            images: OnceCell::new(),
        })
    }

    /// GET `path` relative to the remote and decode the JSON body.
    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self
            .base
            .join(path)
            .map_err(|e| Error::transport(&format!("joining {path}"), e))?;
        let operation = format!("GET {url}");

        let res = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::transport(&operation, e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::transport(&operation, format!("HTTP {status}")));
        }

        let bytes = res
            .bytes()
            .await
            .map_err(|e| Error::transport(&operation, e))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| Error::transport(&format!("parse JSON from {url}"), e))
    }

    async fn images(&self) -> Result<&[StreamImage]> {
        let images = self
            .images
            .get_or_try_init(|| async {
                let index: Index = self.fetch_json(INDEX_PATH).await?;
                let mut images = Vec::new();
                for path in index.image_paths() {
                    let catalog: Catalog = self.fetch_json(path).await?;
                    images.extend(catalog.images());
                }
                debug!(remote = %self.base, count = images.len(), "loaded simplestreams catalogue");
                Ok::<_, Error>(images)
            })
            .await?;
        Ok(images.as_slice())
    }
}

#[async_trait]
impl ImageServer for SimpleStreamsServer {
    async fn image_alias_architectures(
        &self,
        kind: InstanceKind,
        name: &str,
    ) -> Result<HashMap<String, AliasEntry>> {
        Ok(alias_architectures(self.images().await?, kind, name))
    }

    async fn image(&self, fingerprint: &str) -> Result<ImageRecord> {
        self.images()
            .await?
            .iter()
            .find(|image| image.has_fingerprint(fingerprint))
            .map(|image| {
                debug!(
                    fingerprint,
                    product = image.product_id(),
                    serial = image.serial(),
                    "found image"
                );
                ImageRecord {
                    fingerprint: fingerprint.to_string(),
                    architecture: image.arch().to_string(),
                    properties: image.properties(),
                }
            })
            .ok_or_else(|| {
                Error::transport(
                    &format!("fetching image {fingerprint} from {}", self.base),
                    "image not found",
                )
            })
    }
}

/// Aliases named `name` that have a build for `kind`, keyed by architecture.
/// When several products claim the same alias and architecture the first in
/// product-id order wins.
fn alias_architectures(
    images: &[StreamImage],
    kind: InstanceKind,
    name: &str,
) -> HashMap<String, AliasEntry> {
    let mut aliases = HashMap::new();
    for image in images.iter().filter(|image| image.has_alias(name)) {
        let Some(fingerprint) = image.fingerprint(kind) else {
            continue;
        };
        aliases
            .entry(image.arch().to_string())
            .or_insert_with(|| AliasEntry {
                name: name.to_string(),
                kind,
                target: fingerprint.to_string(),
            });
    }
    aliases
}
