//! Lifecycle controller: create, inspect, start, stop and delete runner
//! instances on one LXD endpoint.

pub mod args;
pub mod cloudconfig;
pub mod specs;
pub mod translate;

#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LxdConfig;
use crate::error::{Error, Result};
use crate::helpers::image_resolver::{ImageResolver, RemoteConnector};
use crate::helpers::native_architecture;
use crate::lxd::errors::{ErrorClass, classify_error};
use crate::lxd::{InstanceServer, InstanceStatePut, LxdClient, Operation};
use crate::params::{BootstrapInstance, ProviderInstance};
use crate::simplestreams::SimpleStreamsConnector;

use args::{ArgsBuilder, RunnerTags};
use cloudconfig::{CloudConfigRenderer, DefaultCloudConfig, RunnerToolFetcher, ToolFetcher};
use translate::translate;

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled {
            operation: operation.to_string(),
        }),
        result = fut => result,
    }
}

/// Treat errors of the given classes as success.
fn tolerate(result: Result<()>, classes: &[ErrorClass]) -> Result<()> {
    match result {
        Err(err) if classes.contains(&classify_error(&err)) => {
            debug!(error = %err, "tolerated endpoint error");
            Ok(())
        }
        other => other,
    }
}

pub struct LxdProvider {
    cli: Arc<dyn InstanceServer>,
    resolver: ImageResolver,
    builder: ArgsBuilder,
    controller_id: String,
}

impl LxdProvider {
    /// Wire the provider against the configured endpoint and image remotes.
    pub fn new(cfg: &LxdConfig, controller_id: &str) -> Result<Self> {
        let cli = LxdClient::from_config(cfg)?;
        Ok(Self::with_collaborators(
            cfg,
            controller_id,
            Arc::new(cli),
            Arc::new(SimpleStreamsConnector),
            Arc::new(RunnerToolFetcher),
            Arc::new(DefaultCloudConfig),
        ))
    }

    pub fn with_collaborators(
        cfg: &LxdConfig,
        controller_id: &str,
        cli: Arc<dyn InstanceServer>,
        connector: Arc<dyn RemoteConnector>,
        tools: Arc<dyn ToolFetcher>,
        renderer: Arc<dyn CloudConfigRenderer>,
    ) -> Self {
        Self {
            cli,
            resolver: ImageResolver::new(cfg.remotes(), connector),
            builder: ArgsBuilder {
                controller_id: controller_id.to_string(),
                kind: cfg.instance_kind(),
                include_default_profile: cfg.include_default_profile,
                secure_boot: cfg.secure_boot,
                tools,
                renderer,
            },
            controller_id: controller_id.to_string(),
        }
    }

    async fn wait(
        &self,
        op: Result<Box<dyn Operation>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        op?.wait(cancel).await
    }

    /// Resolve the image, build the request, create the instance and start
    /// it. Nothing is cleaned up when a step fails.
    pub async fn create_instance(
        &self,
        bootstrap: &BootstrapInstance,
        cancel: &CancellationToken,
    ) -> Result<ProviderInstance> {
        if bootstrap.name.is_empty() {
            return Err(Error::Validation("missing name".to_string()));
        }
        let arch = native_architecture(&bootstrap.os_arch).ok_or_else(|| {
            Error::UnsupportedArchitecture {
                arch: bootstrap.os_arch.clone(),
            }
        })?;

        let image = cancellable(
            cancel,
            "resolving image",
            self.resolver.resolve(&bootstrap.image, self.builder.kind, arch),
        )
        .await?;
        let profiles = cancellable(cancel, "listing profiles", self.cli.profile_names()).await?;

        let args = self
            .builder
            .build(bootstrap, &image, &profiles)?
            .into_native();
        let name = args.name.clone();

        info!(
            instance = %name,
            kind = %args.kind,
            fingerprint = %args.source.fingerprint,
            remote = %image.remote,
            server = %args.source.server,
            "creating instance"
        );
        let op = cancellable(cancel, "creating instance", self.cli.create_instance(&args)).await;
        self.wait(op, cancel).await?;

        self.start(&name, cancel).await?;
        self.get_instance(&name, cancel).await
    }

    pub async fn get_instance(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderInstance> {
        let full = cancellable(cancel, "fetching instance", self.cli.instance_full(name)).await?;
        Ok(translate(&full))
    }

    /// Instances tagged with this controller's id, optionally narrowed to a
    /// pool.
    pub async fn list_instances(
        &self,
        pool_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProviderInstance>> {
        let instances = cancellable(cancel, "listing instances", self.cli.instances_full()).await?;

        let owned: Vec<ProviderInstance> = instances
            .iter()
            .filter(|full| {
                let tags = RunnerTags::from_config(&full.instance.expanded_config);
                tags.controller_id == self.controller_id
                    && (pool_id.is_empty() || tags.pool_id == pool_id)
            })
            .map(translate)
            .collect();

        debug!(
            total = instances.len(),
            owned = owned.len(),
            pool = pool_id,
            "listed instances"
        );
        Ok(owned)
    }

    /// Stop the instance. Stopping an instance that is already stopped or
    /// gone succeeds.
    pub async fn stop(&self, name: &str, force: bool, cancel: &CancellationToken) -> Result<()> {
        let state = InstanceStatePut::new("stop", force);
        let op = cancellable(
            cancel,
            "stopping instance",
            self.cli.update_instance_state(name, &state),
        )
        .await;
        tolerate(
            self.wait(op, cancel).await,
            &[ErrorClass::AlreadyStopped, ErrorClass::NotFound],
        )
    }

    pub async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let state = InstanceStatePut::new("start", false);
        let op = cancellable(
            cancel,
            "starting instance",
            self.cli.update_instance_state(name, &state),
        )
        .await;
        self.wait(op, cancel).await?;
        info!(instance = name, "instance started");
        Ok(())
    }

    /// Force-stop then delete. A failed stop is logged and the delete goes
    /// ahead; only cancellation aborts it. A missing instance is a success.
    pub async fn delete_instance(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        if let Err(err) = self.stop(name, true, cancel).await {
            if matches!(err, Error::Cancelled { .. }) {
                return Err(err);
            }
            warn!(instance = name, error = %err, "failed to stop instance before delete");
        }

        let op = cancellable(cancel, "deleting instance", self.cli.delete_instance(name)).await;
        tolerate(self.wait(op, cancel).await, &[ErrorClass::NotFound])?;
        info!(instance = name, "instance deleted");
        Ok(())
    }

    /// Delete every instance owned by this controller, stopping at the first
    /// failure.
    pub async fn remove_all_instances(&self, cancel: &CancellationToken) -> Result<()> {
        let instances = self.list_instances("", cancel).await?;
        for instance in instances {
            self.delete_instance(&instance.name, cancel).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::args::testing::{FirstTool, StaticCloudConfig, bootstrap};
    use super::args::{CONTROLLER_ID_KEY, POOL_ID_KEY};
    use super::testing::MemoryInstanceServer;
    use super::*;
    use crate::config::{InstanceKind, RemoteImageSource};
    use crate::helpers::image_resolver::testing::{MemoryConnector, MemoryImageServer};
    use crate::lxd::InstanceFull;
    use crate::lxd::models::{
        Instance, InstanceState, InstanceStateNetwork, InstanceStateNetworkAddress,
    };
    use crate::params::{Address, AddressType, InstanceStatus, OsType};

    fn config(kind: &str) -> LxdConfig {
        LxdConfig {
            unix_socket: "/var/snap/lxd/common/lxd/unix.socket".to_string(),
            instance_type: Some(kind.to_string()),
            include_default_profile: true,
            image_remotes: [(
                "remote".to_string(),
                RemoteImageSource::new("remote", "https://images.example.com"),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        }
    }

    fn provider(kind: &str, server: Arc<MemoryInstanceServer>) -> LxdProvider {
        let images = MemoryImageServer::default()
            .with_image(InstanceKind::Container, "ubuntu", "x86_64", "123abc")
            .with_image(InstanceKind::VirtualMachine, "windows", "x86_64", "456def");
        LxdProvider::with_collaborators(
            &config(kind),
            "controller",
            server,
            Arc::new(MemoryConnector::new(images)),
            Arc::new(FirstTool),
            Arc::new(StaticCloudConfig),
        )
    }

    fn instance(name: &str, tags: &[(&str, &str)]) -> InstanceFull {
        let mut expanded_config: HashMap<String, String> = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        expanded_config.insert("image.os".to_string(), "windows".to_string());
        expanded_config.insert("image.release".to_string(), String::new());

        InstanceFull {
            instance: Instance {
                name: name.to_string(),
                architecture: "x86_64".to_string(),
                kind: "container".to_string(),
                status: "Running".to_string(),
                expanded_config,
            },
            state: Some(InstanceState {
                status: "Running".to_string(),
                network: Some(HashMap::from([(
                    "eth0".to_string(),
                    InstanceStateNetwork {
                        addresses: vec![InstanceStateNetworkAddress {
                            address: "10.10.0.0".to_string(),
                            scope: "global".to_string(),
                        }],
                    },
                )])),
            }),
        }
    }

    fn owned(name: &str, pool: &str) -> InstanceFull {
        instance(name, &[(CONTROLLER_ID_KEY, "controller"), (POOL_ID_KEY, pool)])
    }

    fn expected(name: &str) -> ProviderInstance {
        ProviderInstance {
            provider_id: name.to_string(),
            name: name.to_string(),
            os_type: OsType::Windows,
            os_name: "windows".to_string(),
            os_version: String::new(),
            os_arch: "amd64".to_string(),
            addresses: vec![Address {
                address: "10.10.0.0".to_string(),
                kind: AddressType::Public,
            }],
            status: InstanceStatus::Running,
        }
    }

    #[tokio::test]
    async fn create_runs_the_full_chain() {
        let server = Arc::new(
            MemoryInstanceServer::new(&["default", "virtual-machine"])
                .with_instance(owned("test-instance", "default")),
        );
        let provider = provider("virtual-machine", server.clone());

        let mut request = bootstrap("virtual-machine", OsType::Windows);
        request.image = "remote:windows".to_string();

        let created = provider
            .create_instance(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(created, expected("test-instance"));

        assert_eq!(
            server.calls(),
            vec![
                "profiles",
                "create test-instance",
                "wait create test-instance",
                "start test-instance timeout=-1 force=false",
                "wait start test-instance",
                "get test-instance",
            ]
        );
        let post = &server.created()[0];
        assert_eq!(post.source.fingerprint, "456def");
        assert_eq!(post.source.server, "https://images.example.com");
        assert_eq!(post.source.protocol, "simplestreams");
        assert_eq!(post.config["user.user-data"], "#ps1_sysnative\n#cloud-config");
    }

    #[tokio::test]
    async fn create_fails_fast_without_name() {
        let server = Arc::new(MemoryInstanceServer::new(&["default"]));
        let provider = provider("container", server.clone());

        let err = provider
            .create_instance(&BootstrapInstance::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing name");
        assert!(server.calls().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_bare_image_names() {
        let server = Arc::new(MemoryInstanceServer::new(&["default", "container"]));
        let provider = provider("container", server.clone());

        let mut request = bootstrap("container", OsType::Linux);
        request.image = "ubuntu".to_string();
        let err = provider
            .create_instance(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingRemote { .. }));
        assert!(server.created().is_empty());
    }

    #[tokio::test]
    async fn failed_start_leaves_instance_in_place() {
        let server = Arc::new(
            MemoryInstanceServer::new(&["default", "container"])
                .fail_wait("start test-instance", "boot failed"),
        );
        let provider = provider("container", server.clone());

        let err = provider
            .create_instance(&bootstrap("container", OsType::Linux), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AsyncOperation { .. }));
        assert!(!server.calls().iter().any(|c| c.starts_with("delete")));
    }

    #[tokio::test]
    async fn missing_image_on_create_is_not_a_missing_instance() {
        let server = Arc::new(
            MemoryInstanceServer::new(&["default", "container"]).fail_call(
                "create test-instance",
                404,
                "Failed getting image: Image not found",
            ),
        );
        let provider = provider("container", server.clone());

        let err = provider
            .create_instance(&bootstrap("container", OsType::Linux), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("Failed getting image: Image not found"));
        assert_eq!(crate::execution::exit_code(&err), crate::execution::EXIT_FAILURE);
    }

    #[tokio::test]
    async fn profile_listing_404_is_an_endpoint_error() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[]).fail_call("profiles", 404, "Project not found"),
        );
        let err = provider("container", server)
            .create_instance(&bootstrap("container", OsType::Linux), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Endpoint { status: 404, .. }));
        assert!(err.to_string().contains("Project not found"));
    }

    #[tokio::test]
    async fn get_missing_instance_is_not_found() {
        let provider = provider("container", Arc::new(MemoryInstanceServer::new(&[])));
        let err = provider
            .get_instance("missing", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_only_returns_owned_instances() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[])
                .with_instance(owned("mine", "test-pool-id"))
                .with_instance(owned("other-pool", "another-pool"))
                .with_instance(instance("foreign", &[(CONTROLLER_ID_KEY, "someone-else")]))
                .with_instance(instance("untagged", &[])),
        );
        let provider = provider("container", server);
        let cancel = CancellationToken::new();

        let listed = provider.list_instances("test-pool-id", &cancel).await.unwrap();
        assert_eq!(listed, vec![expected("mine")]);

        let all: Vec<_> = provider
            .list_instances("", &cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(all, vec!["mine", "other-pool"]);
    }

    #[tokio::test]
    async fn stop_and_start_use_wait_forever() {
        let server = Arc::new(MemoryInstanceServer::new(&[]));
        let provider = provider("container", server.clone());
        let cancel = CancellationToken::new();

        provider.stop("test-instance", true, &cancel).await.unwrap();
        provider.start("test-instance", &cancel).await.unwrap();
        assert_eq!(
            server.calls(),
            vec![
                "stop test-instance timeout=-1 force=true",
                "wait stop test-instance",
                "start test-instance timeout=-1 force=false",
                "wait start test-instance",
            ]
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[])
                .fail_call("stop stopped", 400, "The instance is already stopped")
                .fail_call("stop gone", 404, "Instance not found")
                .fail_wait("stop racing", "Instance is not running"),
        );
        let provider = provider("container", server);
        let cancel = CancellationToken::new();

        for name in ["stopped", "gone", "racing"] {
            provider.stop(name, false, &cancel).await.unwrap();
        }
    }

    #[tokio::test]
    async fn stop_propagates_other_errors() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[]).fail_call("stop busy", 500, "disk quota exceeded"),
        );
        let err = provider("container", server)
            .stop("busy", false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk quota exceeded"));
    }

    #[tokio::test]
    async fn start_propagates_not_found() {
        let server =
            Arc::new(MemoryInstanceServer::new(&[]).fail_call("start gone", 404, "Instance not found"));
        let err = provider("container", server)
            .start("gone", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_stops_first() {
        let server = Arc::new(MemoryInstanceServer::new(&[]));
        provider("container", server.clone())
            .delete_instance("test-instance", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            server.calls(),
            vec![
                "stop test-instance timeout=-1 force=true",
                "wait stop test-instance",
                "delete test-instance",
                "wait delete test-instance",
            ]
        );
    }

    #[tokio::test]
    async fn delete_survives_failed_stop() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[]).fail_call("stop test-instance", 500, "agent unreachable"),
        );
        provider("container", server.clone())
            .delete_instance("test-instance", &CancellationToken::new())
            .await
            .unwrap();
        assert!(server.calls().contains(&"delete test-instance".to_string()));
    }

    #[tokio::test]
    async fn delete_of_missing_instance_succeeds() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[])
                .fail_call("stop gone", 404, "Instance not found")
                .fail_call("delete gone", 404, "Instance not found")
                .fail_wait("delete vanished", "Instance not found"),
        );
        let provider = provider("container", server);
        let cancel = CancellationToken::new();
        provider.delete_instance("gone", &cancel).await.unwrap();
        provider.delete_instance("vanished", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn delete_failure_propagates() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[]).fail_wait("delete test-instance", "storage busy"),
        );
        let err = provider("container", server)
            .delete_instance("test-instance", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AsyncOperation { .. }));
    }

    #[tokio::test]
    async fn remove_all_aborts_on_first_failure() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[])
                .with_instance(owned("first", "p"))
                .with_instance(owned("second", "p"))
                .with_instance(owned("third", "p"))
                .fail_call("delete second", 500, "storage busy"),
        );
        let err = provider("container", server.clone())
            .remove_all_instances(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("storage busy"));

        let deletes: Vec<_> = server
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete"))
            .collect();
        assert_eq!(deletes, vec!["delete first", "delete second"]);
    }

    #[tokio::test]
    async fn remove_all_skips_foreign_instances() {
        let server = Arc::new(
            MemoryInstanceServer::new(&[])
                .with_instance(owned("mine", "p"))
                .with_instance(instance("foreign", &[(CONTROLLER_ID_KEY, "other")])),
        );
        provider("container", server.clone())
            .remove_all_instances(&CancellationToken::new())
            .await
            .unwrap();
        assert!(!server.calls().iter().any(|c| c.contains("foreign")));
    }

    #[tokio::test]
    async fn cancellation_aborts_a_pending_wait() {
        let server = Arc::new(MemoryInstanceServer::new(&[]).hang_wait("delete stuck"));
        let provider = provider("container", server);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = provider.delete_instance("stuck", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn cancelled_delete_skips_the_delete_call() {
        let server = Arc::new(MemoryInstanceServer::new(&[]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provider("container", server.clone())
            .delete_instance("test-instance", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(!server.calls().iter().any(|c| c.starts_with("delete")));
    }
}
