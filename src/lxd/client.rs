use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client as LegacyClient;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri};
use reqwest::{Certificate, Client, Identity, Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::errors::{Target, endpoint_error};
use super::models::{InstanceFull, InstanceStatePut, InstancesPost, OperationInfo, Response};
use super::{InstanceServer, Operation};
use crate::config::{ConfigError, LxdConfig};
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("rust-lxd-provider/", env!("CARGO_PKG_VERSION"));

/// How requests reach the endpoint.
enum Transport {
    Https { client: Client, base: Url },
    Unix {
        socket: PathBuf,
        client: LegacyClient<UnixConnector, Full<Bytes>>,
    },
}

impl Transport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        operation: &str,
    ) -> Result<(u16, Bytes)> {
        match self {
            Transport::Https { client, base } => {
                let url = base
                    .join(path)
                    .map_err(|e| Error::transport(operation, e))?;
                let mut request = client.request(method, url);
                if let Some(body) = body {
                    request = request
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(body);
                }
                let res = request
                    .send()
                    .await
                    .map_err(|e| Error::transport(operation, e))?;
                let status = res.status().as_u16();
                let bytes = res
                    .bytes()
                    .await
                    .map_err(|e| Error::transport(operation, e))?;
                Ok((status, bytes))
            }
            Transport::Unix { socket, client } => {
                let uri: hyper::Uri = UnixUri::new(socket, path).into();
                let mut builder = hyper::Request::builder().method(method).uri(uri);
                let payload = match body {
                    Some(body) => {
                        builder = builder.header("content-type", "application/json");
                        Full::new(Bytes::from(body))
                    }
                    None => Full::new(Bytes::new()),
                };
                let request = builder
                    .body(payload)
                    .map_err(|e| Error::transport(operation, e))?;

                let response = client.request(request).await.map_err(|e| {
                    Error::transport(operation, format!("{}: {e}", socket.display()))
                })?;
                let status = response.status().as_u16();
                let bytes = response
                    .into_body()
                    .collect()
                    .await
                    .map_err(|e| Error::transport(operation, e))?
                    .to_bytes();
                Ok((status, bytes))
            }
        }
    }

    /// Send a request and unwrap the LXD envelope.
    async fn query(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        operation: &str,
        target: &Target,
    ) -> Result<Response> {
        debug!(%method, path, "lxd request");
        let (status, bytes) = self.send(method, path, body, operation).await?;
        parse_response(status, &bytes, operation, target)
    }
}

fn parse_response(
    status: u16,
    bytes: &[u8],
    operation: &str,
    target: &Target,
) -> Result<Response> {
    let response = match serde_json::from_slice::<Response>(bytes) {
        Ok(response) => response,
        Err(_) if status >= 400 => {
            let message = String::from_utf8_lossy(bytes);
            return Err(endpoint_error(operation, target, status, message.trim()));
        }
        Err(e) => {
            return Err(Error::transport(
                operation,
                format!("malformed response: {e}"),
            ));
        }
    };

    if response.kind == "error" || status >= 400 {
        let code = u16::try_from(response.error_code)
            .ok()
            .filter(|code| *code > 0)
            .unwrap_or(status);
        return Err(endpoint_error(operation, target, code, &response.error));
    }

    Ok(response)
}

fn decode<T: DeserializeOwned>(response: Response, operation: &str) -> Result<T> {
    serde_json::from_value(response.metadata)
        .map_err(|e| Error::transport(operation, format!("malformed response: {e}")))
}

fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(body)?)
}

/// Production adapter for the LXD REST API.
pub struct LxdClient {
    transport: Arc<Transport>,
    project: String,
}

impl LxdClient {
    /// Build a client from the provider config. The unix socket wins over
    /// the URL when both are set.
    pub fn from_config(cfg: &LxdConfig) -> Result<Self> {
        let transport = if !cfg.unix_socket.is_empty() {
            Transport::Unix {
                socket: PathBuf::from(&cfg.unix_socket),
                client: LegacyClient::unix(),
            }
        } else if !cfg.url.is_empty() {
            https_transport(cfg)?
        } else {
            return Err(ConfigError::Invalid("no URL or UnixSocket specified".to_string()).into());
        };

        Ok(Self {
            transport: Arc::new(transport),
            project: cfg.project_name.clone(),
        })
    }

    /// API path with query parameters and the configured project.
    fn endpoint_path(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            query.append_pair(key, value);
        }
        if !self.project.is_empty() {
            query.append_pair("project", &self.project);
        }
        let query = query.finish();
        if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        }
    }

    async fn query(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        operation: &str,
        target: &Target,
    ) -> Result<Response> {
        self.transport
            .query(method, path, body, operation, target)
            .await
    }

    /// Issue a request that starts a background operation.
    async fn start_operation(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        operation: &str,
        target: Target,
    ) -> Result<Box<dyn Operation>> {
        let response = self.query(method, path, body, operation, &target).await?;
        if response.operation.is_empty() {
            return Ok(Box::new(Completed));
        }

        let wait_path = self.endpoint_path(
            &format!("{}/wait", response.operation),
            &[("timeout", "-1")],
        );
        Ok(Box::new(LxdOperation {
            transport: self.transport.clone(),
            wait_path,
            operation: operation.to_string(),
            target,
        }))
    }
}

fn https_transport(cfg: &LxdConfig) -> Result<Transport> {
    let base = Url::parse(&cfg.url)
        .map_err(|_| ConfigError::Invalid(format!("invalid LXD URL {}", cfg.url)))?;
    let mut builder = Client::builder().use_rustls_tls().user_agent(USER_AGENT);

    if !cfg.tls_server_cert.is_empty() {
        let pem = read_tls("tls_server_certificate", &cfg.tls_server_cert)?;
        let cert = Certificate::from_pem(&pem).map_err(|e| invalid_pem("tls_server_certificate", e))?;
        builder = builder.tls_built_in_root_certs(false).add_root_certificate(cert);
    }

    if !cfg.tls_ca.is_empty() {
        let pem = read_tls("tls_ca", &cfg.tls_ca)?;
        let cert = Certificate::from_pem(&pem).map_err(|e| invalid_pem("tls_ca", e))?;
        builder = builder.add_root_certificate(cert);
    }

    let client_cert = match cfg.client_certificate.as_str() {
        "" => None,
        path => Some(read_tls("client_certificate", path)?),
    };
    let client_key = match cfg.client_key.as_str() {
        "" => None,
        path => Some(read_tls("client_key", path)?),
    };
    if let (Some(mut pem), Some(key)) = (client_cert, client_key) {
        pem.push(b'\n');
        pem.extend_from_slice(&key);
        let identity = Identity::from_pem(&pem).map_err(|e| invalid_pem("client_certificate", e))?;
        builder = builder.identity(identity);
    }

    let client = builder
        .build()
        .map_err(|e| Error::transport("building LXD client", e))?;
    Ok(Transport::Https { client, base })
}

fn read_tls(field: &'static str, path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| {
        ConfigError::Tls {
            field,
            path: PathBuf::from(path),
            source,
        }
        .into()
    })
}

fn invalid_pem(field: &str, err: reqwest::Error) -> Error {
    ConfigError::Invalid(format!("parsing {field}: {err}")).into()
}

#[async_trait]
impl InstanceServer for LxdClient {
    async fn profile_names(&self) -> Result<Vec<String>> {
        let operation = "listing profiles";
        let path = self.endpoint_path("/1.0/profiles", &[]);
        let response = self
            .query(Method::GET, &path, None, operation, &Target::other("profiles"))
            .await?;
        let urls: Vec<String> = decode(response, operation)?;
        Ok(urls
            .iter()
            .filter_map(|url| url.rsplit('/').next())
            .map(str::to_string)
            .collect())
    }

    async fn create_instance(&self, args: &InstancesPost) -> Result<Box<dyn Operation>> {
        let path = self.endpoint_path("/1.0/instances", &[]);
        self.start_operation(
            Method::POST,
            &path,
            Some(encode(args)?),
            "creating instance",
            Target::other(&args.name),
        )
        .await
    }

    async fn update_instance_state(
        &self,
        name: &str,
        state: &InstanceStatePut,
    ) -> Result<Box<dyn Operation>> {
        let path = self.endpoint_path(&format!("/1.0/instances/{name}/state"), &[]);
        let operation = format!("changing state of instance ({})", state.action);
        self.start_operation(
            Method::PUT,
            &path,
            Some(encode(state)?),
            &operation,
            Target::instance(name),
        )
        .await
    }

    async fn instance_full(&self, name: &str) -> Result<InstanceFull> {
        let operation = "fetching instance";
        let path = self.endpoint_path(&format!("/1.0/instances/{name}"), &[("recursion", "1")]);
        let response = self
            .query(Method::GET, &path, None, operation, &Target::instance(name))
            .await?;
        decode(response, operation)
    }

    async fn instances_full(&self) -> Result<Vec<InstanceFull>> {
        let operation = "listing instances";
        let path = self.endpoint_path(
            "/1.0/instances",
            &[("recursion", "2"), ("instance-type", "")],
        );
        let response = self
            .query(Method::GET, &path, None, operation, &Target::other("instances"))
            .await?;
        decode(response, operation)
    }

    async fn delete_instance(&self, name: &str) -> Result<Box<dyn Operation>> {
        let path = self.endpoint_path(&format!("/1.0/instances/{name}"), &[]);
        self.start_operation(
            Method::DELETE,
            &path,
            None,
            "deleting instance",
            Target::instance(name),
        )
        .await
    }
}

/// Background operation tracked through `/1.0/operations/<id>/wait`.
struct LxdOperation {
    transport: Arc<Transport>,
    wait_path: String,
    operation: String,
    target: Target,
}

#[async_trait]
impl Operation for LxdOperation {
    async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        let request = self.transport.query(
            Method::GET,
            &self.wait_path,
            None,
            &self.operation,
            &self.target,
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled {
                    operation: self.operation.clone(),
                });
            }
            response = request => response?,
        };

        let info: OperationInfo = decode(response, &self.operation)?;
        if info.failed() {
            return Err(Error::AsyncOperation {
                operation: self.operation.clone(),
                message: info.err,
            });
        }
        debug!(id = %info.id, status = %info.status, "operation finished");
        Ok(())
    }
}

/// The endpoint answered synchronously; there is nothing to wait for.
struct Completed;

#[async_trait]
impl Operation for Completed {
    async fn wait(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}
